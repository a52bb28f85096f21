use std::{mem, ptr::NonNull};

use crate::{
    ALIGNMENT,
    block::Block,
    list::Node,
    utils::align,
};

/// Header size of a chunk. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Chunk` as a node of a block's
/// chunk list, and then round to [`ALIGNMENT`] so the payload that follows the
/// header keeps the 16-byte guarantee.
pub(crate) const CHUNK_HEADER_SIZE: usize = align(mem::size_of::<Node<Chunk>>(), ALIGNMENT);

/// The smallest chunk we are willing to create: a header plus one aligned
/// payload unit. Splitting never produces a remainder below this, otherwise
/// the fragment could never satisfy any request again.
pub(crate) const MIN_CHUNK_SIZE: usize = CHUNK_HEADER_SIZE + ALIGNMENT;

/// This is the structure of a chunk. The fields of the chunk are its metadata,
/// the payload handed to the caller is placed right after this header.
///
/// The following diagram represents this structure ignoring that the chunk will
/// be wrapped inside a [`Node`]:
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |    is_free (1b)     |        | -> Header
/// +---------------------+        |
/// |        block        |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        |
/// |         ...         |        | -> Addressable content
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `size` counts the whole chunk, header included, for both used and free
/// chunks. Because consecutive list nodes are also consecutive in memory,
/// `chunk address + size` is always the address of the next chunk (or the end
/// of the block), which is what makes splitting and coalescing plain pointer
/// arithmetic.
///
/// The `block` back-pointer plays the same role as the region back-pointer in
/// the region/block design this allocator grew out of: when a payload pointer
/// comes back through `free`, it is the only way to reach the owning block's
/// chunk list so neighbours can be spliced out.
pub(crate) struct Chunk {
    /// Size of the chunk, including this header.
    pub size: usize,
    /// Flag to tell whether the chunk is free or not.
    pub is_free: bool,
    /// Block which the chunk belongs to.
    pub block: NonNull<Node<Block>>,
}

impl Chunk {
    /// Address of the payload: the first byte after the header. This is the
    /// only address ever handed out to callers.
    #[inline]
    pub unsafe fn payload(node: NonNull<Node<Chunk>>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(node.as_ptr().cast::<u8>().add(CHUNK_HEADER_SIZE)) }
    }

    /// Recovers the chunk node a payload pointer belongs to by walking back
    /// over the header.
    ///
    /// **SAFETY**: `payload` must be a pointer previously returned by
    /// [`Chunk::payload`] for a still-live chunk. Nothing here can detect a
    /// foreign pointer.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Node<Chunk>> {
        unsafe { NonNull::new_unchecked(payload.as_ptr().sub(CHUNK_HEADER_SIZE)).cast() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_keeps_payloads_aligned() {
        assert_eq!(CHUNK_HEADER_SIZE % ALIGNMENT, 0);
        assert!(CHUNK_HEADER_SIZE >= mem::size_of::<Node<Chunk>>());
        assert!(MIN_CHUNK_SIZE > CHUNK_HEADER_SIZE);
    }
}
