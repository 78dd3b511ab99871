//! This module holds the [`Ray`] definition used for ray and swept box queries.
mod ray_impl;

pub use self::ray_impl::*;
