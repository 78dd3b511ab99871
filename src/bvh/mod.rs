//! This module defines the [`OptimizedBvh`], its node store and the operations on it.
//!
//! [`OptimizedBvh`]: struct.OptimizedBvh.html
//!

mod builder;
mod bvh_impl;
mod bvh_node;
mod iter;
mod refit;
mod serialize;
mod storage;
mod traverse;

pub use self::bvh_impl::*;
pub use self::bvh_node::*;
pub use self::iter::*;
pub use self::serialize::SERIALIZED_HEADER_SIZE;
pub use self::storage::*;
pub use self::traverse::{
    BoxQuery, NodeQuery, QuantizedBoxQuery, SweptBoxQuery, TraversalMode, TraversalStats,
};
