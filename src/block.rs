use std::{mem, ptr::NonNull};

use crate::{
    ALIGNMENT,
    chunk::{Chunk, MIN_CHUNK_SIZE},
    list::{List, Node},
    utils::align,
};

/// This is the overhead size introduced by the [`Block`] header in bytes.
/// The header is represented as a [`Node`] (see [`List`] for more detail) and
/// rounded to [`ALIGNMENT`] so the first chunk starts on an aligned address.
pub(crate) const BLOCK_HEADER_SIZE: usize = align(mem::size_of::<Node<Block>>(), ALIGNMENT);

/// This struct contains the block-specific metadata. However, as every other
/// header, this is usually represented as a [`Node<Block>`] so that would be
/// the complete block data.
///
/// The OS gives us memory regions aligned with the computer page size. But we
/// cannot burn a full region each time the user allocates memory, since we
/// would be wasting a lot of space. Also, we cannot assume these regions are
/// adjacent. Therefore, we use the following data structure which consists in
/// a LinkedList of `Block` which inside of them have a LinkedList of
/// [`Chunk`]:
///
/// ```text
/// +-----------------------------------------------+      +-----------------------------------------------+
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// | Block  | | Chunk | -> | Chunk | -> | Chunk |  | ---> | Block  | | Chunk | -> | Chunk | -> | Chunk |  |
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// +-----------------------------------------------+      +-----------------------------------------------+
/// ```
///
/// The block header lives at the very start of its mapped span and its single
/// initial chunk right after it, so the chunk list capacity is always
/// `size - BLOCK_HEADER_SIZE`. Chunk links never cross a block boundary, which
/// is why coalescing can never merge memory belonging to two different OS
/// regions.
pub(crate) struct Block {
    /// Total size of the mapped span, header included.
    pub size: usize,
    /// List of chunks in the block.
    pub chunks: List<Chunk>,
}

impl Block {
    /// Capacity available to the chunk list. The per-block invariant is that
    /// the sizes of all chunks in [`Block::chunks`] sum exactly to this value.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size - BLOCK_HEADER_SIZE
    }

    /// Hands out the chunk at `node`, splitting off the excess first when it
    /// is worth keeping.
    ///
    /// If the chunk exceeds `needed` by at least [`MIN_CHUNK_SIZE`], it is cut
    /// into a used chunk of exactly `needed` bytes and a free remainder
    /// spliced into the list right after it. A smaller excess is handed out
    /// with the chunk instead of becoming a fragment no request could ever
    /// use again.
    ///
    /// **SAFETY**: `node` must be a free chunk of this block's list with
    /// `size >= needed`, and `needed` must be a multiple of [`ALIGNMENT`].
    pub(crate) unsafe fn split_chunk(&mut self, mut node: NonNull<Node<Chunk>>, needed: usize) {
        unsafe {
            let excess = node.as_ref().data.size - needed;

            if excess >= MIN_CHUNK_SIZE {
                // The remainder starts `needed` bytes into the chunk. Both
                // `needed` and the chunk address are aligned, so the new
                // header lands on an aligned address as well.
                let rest_addr =
                    NonNull::new_unchecked(node.as_ptr().cast::<u8>().add(needed));

                let owner = node.as_ref().data.block;
                self.chunks.insert_after(
                    node,
                    Chunk {
                        size: excess,
                        is_free: true,
                        block: owner,
                    },
                    rest_addr,
                );

                node.as_mut().data.size = needed;
            }

            node.as_mut().data.is_free = false;
        }
    }

    /// Tries to merge the given chunk `node` with the next one on the list.
    /// This can be performed if that next chunk is free.
    pub(crate) unsafe fn merge_with_next(&mut self, mut node: NonNull<Node<Chunk>>) {
        unsafe {
            if let Some(next_node) = node.as_ref().next {
                if next_node.as_ref().data.is_free {
                    // Chunk sizes count their own header, so absorbing the
                    // neighbour is adding its full size and unlinking it.
                    node.as_mut().data.size += next_node.as_ref().data.size;
                    self.chunks.remove(next_node);
                }
            }
        }
    }

    /// Tries to merge the given chunk `node` with the previous one on the
    /// list. This can be performed if that previous chunk is free.
    pub(crate) unsafe fn merge_with_prev(&mut self, node: NonNull<Node<Chunk>>) {
        unsafe {
            if let Some(mut prev_node) = node.as_ref().prev {
                if prev_node.as_ref().data.is_free {
                    // The previous chunk grows over this one, which stops
                    // existing as a separate list entry.
                    prev_node.as_mut().data.size += node.as_ref().data.size;
                    self.chunks.remove(node);
                }
            }
        }
    }
}
