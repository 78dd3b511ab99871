//! Flat binary image of a tree that can be used in place, without copying the node arrays.
//!
//! Layout, all records in the byte order chosen at serialization time:
//!
//! | offset                         | content                                              |
//! |--------------------------------|------------------------------------------------------|
//! | 0                              | domain min, domain max, scale (3 reals each), margin |
//! | 10 reals                       | node count, header count, traversal mode, quantized  |
//! | [`SERIALIZED_HEADER_SIZE`]     | node array                                           |
//! | after the nodes                | subtree header array                                 |
//!
//! The header is padded to a multiple of 16 bytes. A buffer whose start is aligned to
//! 8 bytes therefore keeps every record array aligned.

use crate::bvh::{
    BvhNode, ByteSwap, FloatBvhNode, NodeArray, OptimizedBvh, QuantizedBvhNode, Storage,
    SubtreeHeader, TraversalMode,
};
use crate::error::{Error, Result};
use crate::quantization::Quantizer;
use crate::utils::align_up;
use crate::{Point3, Real, Vector3};
use byteorder::{ByteOrder, NativeEndian};
use bytemuck::Pod;
use std::mem::{align_of, size_of};

#[cfg(target_endian = "little")]
type SwappedEndian = byteorder::BigEndian;
#[cfg(target_endian = "big")]
type SwappedEndian = byteorder::LittleEndian;

const REAL_SIZE: usize = size_of::<Real>();
const COUNTS_OFFSET: usize = 10 * REAL_SIZE;

/// Size of the serialized header in bytes.
pub const SERIALIZED_HEADER_SIZE: usize = align_up(COUNTS_OFFSET + 4 * size_of::<u32>(), 16);

#[cfg(not(feature = "f64"))]
fn read_real<B: ByteOrder>(buf: &[u8]) -> Real {
    B::read_f32(buf)
}

#[cfg(feature = "f64")]
fn read_real<B: ByteOrder>(buf: &[u8]) -> Real {
    B::read_f64(buf)
}

#[cfg(not(feature = "f64"))]
fn write_real<B: ByteOrder>(buf: &mut [u8], value: Real) {
    B::write_f32(buf, value)
}

#[cfg(feature = "f64")]
fn write_real<B: ByteOrder>(buf: &mut [u8], value: Real) {
    B::write_f64(buf, value)
}

/// The decoded fixed-size header of a serialized tree.
#[derive(Debug, Clone, Copy)]
struct SerializedHeader {
    quantizer: Quantizer,
    margin: Real,
    node_count: usize,
    subtree_header_count: usize,
    traversal_mode: TraversalMode,
    use_quantization: bool,
}

impl SerializedHeader {
    fn node_size(&self) -> usize {
        if self.use_quantization {
            size_of::<QuantizedBvhNode>()
        } else {
            size_of::<FloatBvhNode>()
        }
    }

    /// Total size of the serialized tree, or `None` on overflow.
    fn total_size(&self) -> Option<usize> {
        let nodes = self.node_count.checked_mul(self.node_size())?;
        let headers = self
            .subtree_header_count
            .checked_mul(size_of::<SubtreeHeader>())?;
        SERIALIZED_HEADER_SIZE.checked_add(nodes)?.checked_add(headers)
    }

    fn write<B: ByteOrder>(&self, out: &mut [u8]) {
        let domain = self.quantizer.domain();
        let scale = self.quantizer.scale();
        let reals = [
            domain.min.x,
            domain.min.y,
            domain.min.z,
            domain.max.x,
            domain.max.y,
            domain.max.z,
            scale.x,
            scale.y,
            scale.z,
            self.margin,
        ];
        for (i, value) in reals.iter().enumerate() {
            write_real::<B>(&mut out[i * REAL_SIZE..], *value);
        }
        let counts = [
            self.node_count as u32,
            self.subtree_header_count as u32,
            self.traversal_mode as u32,
            u32::from(self.use_quantization),
        ];
        B::write_u32_into(&counts, &mut out[COUNTS_OFFSET..COUNTS_OFFSET + 16]);
        out[COUNTS_OFFSET + 16..SERIALIZED_HEADER_SIZE].fill(0);
    }

    fn read<B: ByteOrder>(buf: &[u8]) -> Result<SerializedHeader> {
        let real = |i: usize| read_real::<B>(&buf[i * REAL_SIZE..]);
        let min = Point3::new(real(0), real(1), real(2));
        let max = Point3::new(real(3), real(4), real(5));
        let scale = Vector3::new(real(6), real(7), real(8));
        let margin = real(9);
        if !(min.iter().chain(max.iter()).all(|v| v.is_finite())
            && scale.iter().all(|s| s.is_finite() && *s > 0.0))
        {
            return Err(Error::invalid_header("non-finite quantization domain"));
        }
        if (0..3).any(|i| min[i] > max[i]) || !(margin.is_finite() && margin >= 0.0) {
            return Err(Error::invalid_header("inverted quantization domain"));
        }

        let mut counts = [0u32; 4];
        B::read_u32_into(&buf[COUNTS_OFFSET..COUNTS_OFFSET + 16], &mut counts);
        let use_quantization = match counts[3] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::invalid_header(format!(
                    "quantization flag {}",
                    other
                )))
            }
        };
        let subtree_header_count = counts[1] as usize;
        if !use_quantization && subtree_header_count > 0 {
            return Err(Error::invalid_header(
                "subtree headers in a full precision tree",
            ));
        }

        Ok(SerializedHeader {
            quantizer: Quantizer::from_raw_parts(min, max, scale),
            margin,
            node_count: counts[0] as usize,
            subtree_header_count,
            traversal_mode: TraversalMode::try_from(counts[2])?,
            use_quantization,
        })
    }
}

/// Copies `records` into `out`, swapping each record if requested. `out` may be unaligned.
fn write_records<T: Pod + ByteSwap>(out: &mut [u8], records: &[T], swap_endian: bool) {
    for (chunk, record) in out.chunks_exact_mut(size_of::<T>()).zip(records) {
        let mut record = *record;
        if swap_endian {
            record.swap_bytes();
        }
        chunk.copy_from_slice(bytemuck::bytes_of(&record));
    }
}

/// Reinterprets `bytes` as records without touching them.
fn cast_records<T: Pod>(bytes: &mut [u8]) -> Result<&mut [T]> {
    if bytes.is_empty() {
        return Ok(&mut []);
    }
    bytemuck::try_cast_slice_mut(bytes).map_err(|_| Error::MisalignedBuffer {
        align: align_of::<T>(),
    })
}

fn swap_records<T: ByteSwap>(records: &mut [T]) {
    records.iter_mut().for_each(ByteSwap::swap_bytes);
}

/// Casts the node and header arrays, swaps them into native order if requested and
/// validates them. On failure the bytes are left as they were.
fn load_records<'b, N: BvhNode>(
    node_bytes: &'b mut [u8],
    header_bytes: &'b mut [u8],
    swap_endian: bool,
    has_headers: bool,
) -> Result<(&'b mut [N], &'b mut [SubtreeHeader])> {
    let nodes: &mut [N] = cast_records(node_bytes)?;
    let headers: &mut [SubtreeHeader] = cast_records(header_bytes)?;
    if swap_endian {
        swap_records(nodes);
        swap_records(headers);
    }
    let valid = validate_nodes(nodes).and_then(|()| {
        if has_headers {
            validate_headers(headers, nodes)
        } else {
            Ok(())
        }
    });
    if let Err(err) = valid {
        if swap_endian {
            swap_records(nodes);
            swap_records(headers);
        }
        return Err(err);
    }
    Ok((nodes, headers))
}

/// Checks that escape indices split every subtree into two children inside the array.
fn validate_nodes<N: BvhNode>(nodes: &[N]) -> Result<()> {
    let corrupt = |index: usize, reason: &str| Error::CorruptNode {
        index,
        reason: reason.to_string(),
    };
    // Children come after their parent, so they are validated first.
    for index in (0..nodes.len()).rev() {
        let node = &nodes[index];
        if node.is_leaf() {
            continue;
        }
        let escape = node.escape_index();
        let end = match index.checked_add(escape) {
            Some(end) if escape >= 3 && end <= nodes.len() => end,
            _ => return Err(corrupt(index, "escape index out of range")),
        };
        let right = index + 1 + nodes[index + 1].subtree_size();
        if right >= end || right + nodes[right].subtree_size() != end {
            return Err(corrupt(index, "children do not fill the subtree"));
        }
    }
    if let Some(root) = nodes.first() {
        if root.subtree_size() != nodes.len() {
            return Err(corrupt(0, "root does not span the node array"));
        }
    }
    Ok(())
}

/// Checks that every header matches a subtree root, that header subtrees are disjoint
/// and that every leaf lies in one of them.
fn validate_headers<N: BvhNode>(headers: &[SubtreeHeader], nodes: &[N]) -> Result<()> {
    let mut ranges = Vec::with_capacity(headers.len());
    for (i, header) in headers.iter().enumerate() {
        let root = header.root_node_index();
        let fits = root
            .checked_add(header.subtree_size())
            .is_some_and(|end| root < nodes.len() && end <= nodes.len());
        if !fits || nodes[root].subtree_size() != header.subtree_size() {
            return Err(Error::invalid_header(format!(
                "subtree header {} does not match the node array",
                i
            )));
        }
        ranges.push(header.node_range());
    }
    ranges.sort_unstable_by_key(|range| range.start);

    let uncovered = |gap: &[N]| gap.iter().any(BvhNode::is_leaf);
    let mut next = 0;
    for range in &ranges {
        if range.start < next {
            return Err(Error::invalid_header("overlapping subtree headers"));
        }
        if uncovered(&nodes[next..range.start]) {
            return Err(Error::invalid_header("leaf outside every subtree header"));
        }
        next = range.end;
    }
    if uncovered(&nodes[next..]) {
        return Err(Error::invalid_header("leaf outside every subtree header"));
    }
    Ok(())
}

impl OptimizedBvh<'_> {
    /// Size in bytes of the image written by [`OptimizedBvh::serialize`].
    pub fn calculate_serialize_buffer_size(&self) -> usize {
        SERIALIZED_HEADER_SIZE
            + self.nodes.len() * self.nodes.node_size()
            + self.subtree_headers.len() * size_of::<SubtreeHeader>()
    }

    fn serialized_header(&self) -> SerializedHeader {
        SerializedHeader {
            quantizer: self.quantizer,
            margin: self.margin,
            node_count: self.nodes.len(),
            subtree_header_count: self.subtree_headers.len(),
            traversal_mode: self.traversal_mode,
            use_quantization: self.is_quantized(),
        }
    }

    /// Writes the tree into `buffer` and returns the number of bytes written.
    ///
    /// With `swap_endian` the image is written in the opposite of the native byte order.
    /// Fails without touching `buffer` if it is shorter than
    /// [`OptimizedBvh::calculate_serialize_buffer_size`].
    pub fn serialize(&self, buffer: &mut [u8], swap_endian: bool) -> Result<usize> {
        let required = self.calculate_serialize_buffer_size();
        if buffer.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                actual: buffer.len(),
            });
        }

        let (header_bytes, rest) = buffer[..required].split_at_mut(SERIALIZED_HEADER_SIZE);
        let header = self.serialized_header();
        if swap_endian {
            header.write::<SwappedEndian>(header_bytes);
        } else {
            header.write::<NativeEndian>(header_bytes);
        }

        let (node_bytes, header_array_bytes) =
            rest.split_at_mut(self.nodes.len() * self.nodes.node_size());
        match &self.nodes {
            NodeArray::Quantized(nodes) => write_records(node_bytes, nodes, swap_endian),
            NodeArray::Float(nodes) => write_records(node_bytes, nodes, swap_endian),
        }
        write_records(header_array_bytes, &self.subtree_headers, swap_endian);

        log::trace!(
            "Serialized {} nodes and {} subtree headers into {} bytes",
            self.nodes.len(),
            self.subtree_headers.len(),
            required
        );
        Ok(required)
    }

    /// Rewrites the header of the image this tree was deserialized from, if any.
    pub(crate) fn write_image_header(&mut self) {
        let header = self.serialized_header();
        if let Some(bytes) = self.image_header.as_deref_mut() {
            header.write::<NativeEndian>(bytes);
        }
    }

    /// Serializes into a freshly allocated buffer.
    pub fn serialize_to_vec(&self, swap_endian: bool) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.calculate_serialize_buffer_size()];
        self.serialize(&mut buffer, swap_endian)?;
        Ok(buffer)
    }
}

impl<'a> OptimizedBvh<'a> {
    /// Reinterprets a serialized image as a tree whose node arrays live in `buffer`.
    ///
    /// With `swap_endian` the image is expected in the opposite of the native byte order. It
    /// is converted to native order in place, header included, so the buffer holds a native
    /// image afterwards. The node arrays must be aligned, which holds for buffers aligned to
    /// 8 bytes. Refits of the returned tree write into `buffer`, including the new domain.
    pub fn deserialize_in_place(
        buffer: &'a mut [u8],
        swap_endian: bool,
    ) -> Result<OptimizedBvh<'a>> {
        if buffer.len() < SERIALIZED_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: SERIALIZED_HEADER_SIZE,
                actual: buffer.len(),
            });
        }
        let header = if swap_endian {
            SerializedHeader::read::<SwappedEndian>(buffer)?
        } else {
            SerializedHeader::read::<NativeEndian>(buffer)?
        };
        let required = header
            .total_size()
            .ok_or_else(|| Error::invalid_header("record counts overflow"))?;
        if buffer.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                actual: buffer.len(),
            });
        }

        let (header_bytes, rest) = buffer[..required].split_at_mut(SERIALIZED_HEADER_SIZE);
        let (node_bytes, header_array_bytes) =
            rest.split_at_mut(header.node_count * header.node_size());

        let (nodes, subtree_headers) = if header.use_quantization {
            let (nodes, headers) = load_records::<QuantizedBvhNode>(
                node_bytes,
                header_array_bytes,
                swap_endian,
                true,
            )?;
            (NodeArray::Quantized(Storage::Borrowed(nodes)), headers)
        } else {
            let (nodes, headers) = load_records::<FloatBvhNode>(
                node_bytes,
                header_array_bytes,
                swap_endian,
                false,
            )?;
            (NodeArray::Float(Storage::Borrowed(nodes)), headers)
        };
        if swap_endian {
            header.write::<NativeEndian>(header_bytes);
        }

        log::debug!(
            "Deserialized {} nodes and {} subtree headers in place",
            header.node_count,
            header.subtree_header_count
        );
        Ok(OptimizedBvh {
            quantizer: header.quantizer,
            margin: header.margin,
            nodes,
            subtree_headers: Storage::Borrowed(subtree_headers),
            traversal_mode: header.traversal_mode,
            image_header: Some(header_bytes),
        })
    }

    /// Decodes a serialized image from a buffer of any alignment into an owned tree.
    pub fn deserialize_owned(buffer: &[u8], swap_endian: bool) -> Result<OptimizedBvh<'static>> {
        let mut aligned = vec![0u64; buffer.len().div_ceil(size_of::<u64>())];
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut aligned)[..buffer.len()];
        bytes.copy_from_slice(buffer);
        let bvh = OptimizedBvh::deserialize_in_place(bytes, swap_endian)?;
        Ok(bvh.to_owned_bvh())
    }
}
