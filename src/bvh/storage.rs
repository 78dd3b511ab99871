//! Owned or borrowed backing memory for the node store.

use crate::bvh::{FloatBvhNode, QuantizedBvhNode};
use std::ops::{Deref, DerefMut};

/// A slice of records that is either owned by the tree or borrowed from a caller's buffer.
///
/// Trees produced by a build own their arrays. Trees produced by in-place deserialization
/// borrow them, so refits write straight into the caller's buffer.
#[derive(Debug)]
pub enum Storage<'a, T> {
    /// Memory allocated by the tree.
    Owned(Vec<T>),
    /// Memory aliasing a caller-provided buffer.
    Borrowed(&'a mut [T]),
}

impl<T: Clone> Storage<'_, T> {
    /// Copies the records into an owned [`Storage`].
    pub fn to_owned_storage(&self) -> Storage<'static, T> {
        Storage::Owned(self.deref().to_vec())
    }
}

impl<T> Storage<'_, T> {
    /// Returns true if the records live in a caller-provided buffer.
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Storage::Borrowed(_))
    }
}

impl<T> Default for Storage<'_, T> {
    fn default() -> Self {
        Storage::Owned(Vec::new())
    }
}

impl<T> Deref for Storage<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            Storage::Owned(records) => records,
            Storage::Borrowed(records) => records,
        }
    }
}

impl<T> DerefMut for Storage<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self {
            Storage::Owned(records) => records,
            Storage::Borrowed(records) => records,
        }
    }
}

/// The node store in one of its two encodings.
#[derive(Debug)]
pub enum NodeArray<'a> {
    /// 16 byte nodes with quantized bounds.
    Quantized(Storage<'a, QuantizedBvhNode>),
    /// Nodes with full precision bounds.
    Float(Storage<'a, FloatBvhNode>),
}

impl NodeArray<'_> {
    /// Number of nodes.
    pub fn len(&self) -> usize {
        match self {
            NodeArray::Quantized(nodes) => nodes.len(),
            NodeArray::Float(nodes) => nodes.len(),
        }
    }

    /// Returns true if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for the quantized encoding.
    pub fn is_quantized(&self) -> bool {
        matches!(self, NodeArray::Quantized(_))
    }

    /// Size of one node record in bytes.
    pub fn node_size(&self) -> usize {
        match self {
            NodeArray::Quantized(_) => std::mem::size_of::<QuantizedBvhNode>(),
            NodeArray::Float(_) => std::mem::size_of::<FloatBvhNode>(),
        }
    }

    /// Copies the nodes into an owned [`NodeArray`].
    pub fn to_owned_array(&self) -> NodeArray<'static> {
        match self {
            NodeArray::Quantized(nodes) => NodeArray::Quantized(nodes.to_owned_storage()),
            NodeArray::Float(nodes) => NodeArray::Float(nodes.to_owned_storage()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bvh::Storage;

    #[test]
    /// Both variants expose the same slice API.
    fn test_storage_deref() {
        let mut owned = Storage::Owned(vec![1, 2, 3]);
        owned[1] = 5;
        assert_eq!(&*owned, &[1, 5, 3]);
        assert!(!owned.is_borrowed());

        let mut buffer = [7, 8];
        let mut borrowed = Storage::Borrowed(&mut buffer[..]);
        borrowed[0] = 1;
        assert!(borrowed.is_borrowed());
        let copy = borrowed.to_owned_storage();
        drop(borrowed);
        assert_eq!(buffer, [1, 8]);
        assert_eq!(&*copy, &[1, 8]);
    }
}
