use std::ptr::NonNull;

use log::{debug, trace};

use crate::{
    ALIGNMENT, MAX_POOL_PAGES,
    block::{BLOCK_HEADER_SIZE, Block},
    chunk::{CHUNK_HEADER_SIZE, Chunk},
    error::AllocError,
    list::{Link, List, Node},
    os::{OsMemory, RegionProvider},
    utils::align,
};

/// The pool allocator. It owns a list of OS-backed blocks and serves requests
/// by carving chunks out of them, so most allocations cost no syscall at all.
///
/// ```text
///                      blocks (acquisition order)
///
/// +--------------------------------------------+      +----------------------------+
/// |        | +------+    +------+    +------+  |      |        | +------+          |
/// | Block  | | used | -> | free | -> | used |  | ---> | Block  | | free |          |
/// |        | +------+    +------+    +------+  |      |        | +------+          |
/// +--------------------------------------------+      +----------------------------+
///      ^                                                   ^
///      head (first-fit scan starts here)                   tail (growth point)
/// ```
///
/// Allocation is a first-fit walk over that structure: blocks in acquisition
/// order, chunks in address order, first free chunk big enough wins. Only
/// when the walk comes up empty does the pool ask the [`RegionProvider`] for
/// one more block. Freeing marks the chunk and merges it with free
/// neighbours; memory only goes back to the OS through [`PoolAllocator::destroy`].
///
/// Each instance is an independent pool with its own state. There is no
/// internal locking: all calls must be serialized by a single logical owner,
/// and the structure is `!Sync` accordingly.
pub struct PoolAllocator<P: RegionProvider = OsMemory> {
    /// Linked list of blocks. The head is the oldest block and the scan
    /// origin; the tail is the most recently acquired block.
    blocks: List<Block>,
    /// Where new regions come from.
    provider: P,
    /// The provider's page size, cached at construction.
    page_size: usize,
}

impl PoolAllocator<OsMemory> {
    /// A pool backed by real anonymous OS mappings.
    pub fn new() -> Self {
        Self::with_provider(OsMemory::new())
    }
}

impl Default for PoolAllocator<OsMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RegionProvider> PoolAllocator<P> {
    /// A pool backed by an arbitrary region provider. No region is requested
    /// until the first allocation needs one.
    pub fn with_provider(provider: P) -> Self {
        let page_size = provider.page_size();

        Self {
            blocks: List::new(),
            provider,
            page_size,
        }
    }

    /// Sanity ceiling for a single request: [`MAX_POOL_PAGES`] worth of pages.
    #[inline]
    fn ceiling(&self) -> usize {
        self.page_size * MAX_POOL_PAGES
    }

    /// Serves `size` bytes of memory and returns the payload pointer, which
    /// is always 16-byte aligned.
    ///
    /// The pointer stays valid until it is passed to [`PoolAllocator::free`]
    /// or the pool is destroyed. The caller must not touch the chunk header
    /// that precedes it.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }

        // Account for the header we keep in front of every payload, then
        // round so payload addresses stay aligned.
        let adjusted = size
            .checked_add(CHUNK_HEADER_SIZE)
            .ok_or(AllocError::TooLarge)?;
        if adjusted > self.ceiling() {
            return Err(AllocError::TooLarge);
        }
        let needed = align(adjusted, ALIGNMENT);

        unsafe {
            let node = match self.find_free_chunk(needed) {
                Some(node) => node,
                // Nothing fits anywhere: grow by exactly one region and
                // carve its seed chunk like any other.
                None => self.grow(needed)?,
            };

            let mut owner = node.as_ref().data.block;
            owner.as_mut().data.split_chunk(node, needed);

            Ok(Chunk::payload(node))
        }
    }

    /// First-fit search: blocks in acquisition order, chunks in address
    /// order, first free chunk with enough room wins. A linear scan is all
    /// there is; the pool keeps no free-list index.
    unsafe fn find_free_chunk(&self, needed: usize) -> Link<Node<Chunk>> {
        let mut block_node = self.blocks.first();

        while let Some(block) = block_node {
            unsafe {
                let mut chunk_node = block.as_ref().data.chunks.first();

                while let Some(chunk) = chunk_node {
                    if chunk.as_ref().data.is_free && chunk.as_ref().data.size >= needed {
                        return Some(chunk);
                    }

                    chunk_node = chunk.as_ref().next;
                }

                block_node = block.as_ref().next;
            }
        }

        None
    }

    /// Acquires one new block big enough for `needed`, appends it at the
    /// tail of the block list and returns its single seed chunk, free and
    /// spanning the whole capacity.
    unsafe fn grow(&mut self, needed: usize) -> Result<NonNull<Node<Chunk>>, AllocError> {
        // The block header shares the span with the chunk list, so it must be
        // included before rounding or a near-page `needed` would not fit.
        let region_size = align(needed + BLOCK_HEADER_SIZE, self.page_size);

        let addr = self
            .provider
            .request(region_size)
            .ok_or(AllocError::OutOfMemory)?;

        debug!("acquired {region_size} byte block at {:p}", addr.as_ptr());

        unsafe {
            let mut block = self.blocks.append(
                Block {
                    size: region_size,
                    chunks: List::new(),
                },
                addr,
            );
            let owner = block;
            let seed_size = block.as_ref().data.capacity();

            // The freshly appended block is the new growth point.
            debug_assert_eq!(self.blocks.last(), Some(block));

            let chunk_addr = NonNull::new_unchecked(addr.as_ptr().add(BLOCK_HEADER_SIZE));
            let seed = block.as_mut().data.chunks.append(
                Chunk {
                    size: seed_size,
                    is_free: true,
                    block: owner,
                },
                chunk_addr,
            );

            Ok(seed)
        }
    }

    /// Returns a chunk to the pool. Passing a null pointer is a no-op, and so
    /// is freeing a chunk that is already free.
    ///
    /// The freed chunk is merged with its free neighbours on the spot:
    /// forward first, then backward, so a chunk sitting between two free
    /// ones collapses into a single chunk spanning all three extents.
    /// Merging never crosses a block boundary.
    ///
    /// **SAFETY**: `ptr` must be null or a pointer previously returned by
    /// [`PoolAllocator::allocate`] on this pool and not invalidated by
    /// [`PoolAllocator::destroy`]. No validation of foreign pointers is
    /// performed; handing one in is undefined behavior.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        unsafe {
            let mut node = Chunk::from_payload(payload);

            // Double-free guard at the flag level only.
            if node.as_ref().data.is_free {
                trace!("ignoring free of already-free chunk at {:p}", node.as_ptr());
                return;
            }

            node.as_mut().data.is_free = true;

            let mut owner = node.as_ref().data.block;
            owner.as_mut().data.merge_with_next(node);
            owner.as_mut().data.merge_with_prev(node);
        }
    }

    /// Releases every block back to the OS and resets the pool to its
    /// pristine state. Safe to call on an empty pool.
    ///
    /// Every pointer handed out by this pool becomes invalid; using one
    /// afterwards is undefined behavior. A later [`PoolAllocator::allocate`]
    /// simply starts over by acquiring a fresh region.
    pub fn destroy(&mut self) {
        if !self.blocks.is_empty() {
            let total: usize = self.blocks.iter().map(|block| block.size).sum();
            debug!("releasing {} block(s), {total} bytes", self.blocks.len());
        }

        let mut block_node = self.blocks.first();

        while let Some(node) = block_node {
            unsafe {
                // Read the link before the span is unmapped.
                block_node = node.as_ref().next;

                let size = node.as_ref().data.size;
                self.provider.release(node.cast::<u8>(), size);
            }
        }

        self.blocks = List::new();
    }
}

impl<P: RegionProvider> Drop for PoolAllocator<P> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        alloc::{Layout, alloc, dealloc},
        cell::Cell,
        ptr,
        rc::Rc,
    };

    const PAGE: usize = 4096;

    /// Shared view on what the fake provider has been asked to do.
    #[derive(Clone, Default)]
    struct Counters {
        requests: Rc<Cell<usize>>,
        releases: Rc<Cell<usize>>,
    }

    /// In-memory stand-in for the OS: hands out page-aligned spans from the
    /// test harness allocator and counts every request and release.
    struct FakeProvider {
        counters: Counters,
    }

    impl FakeProvider {
        fn new() -> (Self, Counters) {
            let counters = Counters::default();
            (
                Self {
                    counters: counters.clone(),
                },
                counters,
            )
        }
    }

    impl RegionProvider for FakeProvider {
        fn request(&mut self, len: usize) -> Option<NonNull<u8>> {
            self.counters.requests.set(self.counters.requests.get() + 1);

            let layout = Layout::from_size_align(len, PAGE).unwrap();
            NonNull::new(unsafe { alloc(layout) })
        }

        unsafe fn release(&mut self, addr: NonNull<u8>, len: usize) {
            self.counters.releases.set(self.counters.releases.get() + 1);

            let layout = Layout::from_size_align(len, PAGE).unwrap();
            unsafe { dealloc(addr.as_ptr(), layout) };
        }

        fn page_size(&self) -> usize {
            PAGE
        }
    }

    fn pool() -> (PoolAllocator<FakeProvider>, Counters) {
        let (provider, counters) = FakeProvider::new();
        (PoolAllocator::with_provider(provider), counters)
    }

    /// Walks every block and returns `(size, is_free)` per chunk, asserting
    /// the structural invariants on the way: list order equals address order
    /// with no gaps, and chunk sizes sum to the block capacity.
    fn chunk_map<P: RegionProvider>(pool: &PoolAllocator<P>) -> Vec<Vec<(usize, bool)>> {
        let mut blocks = Vec::new();
        let mut block_node = pool.blocks.first();

        while let Some(block) = block_node {
            unsafe {
                let mut chunks = Vec::new();
                let mut expected_addr = block.as_ptr().cast::<u8>().add(BLOCK_HEADER_SIZE);
                let mut total = 0;
                let mut chunk_node = block.as_ref().data.chunks.first();

                while let Some(chunk) = chunk_node {
                    assert_eq!(chunk.as_ptr().cast::<u8>(), expected_addr);

                    let size = chunk.as_ref().data.size;
                    chunks.push((size, chunk.as_ref().data.is_free));
                    total += size;

                    expected_addr = expected_addr.add(size);
                    chunk_node = chunk.as_ref().next;
                }

                assert_eq!(total, block.as_ref().data.capacity());
                blocks.push(chunks);
                block_node = block.as_ref().next;
            }
        }

        blocks
    }

    #[test]
    fn zero_sized_request_is_rejected_without_growing() {
        let (mut pool, counters) = pool();

        assert_eq!(pool.allocate(0), Err(AllocError::InvalidSize));
        assert_eq!(counters.requests.get(), 0);
    }

    #[test]
    fn oversized_request_is_rejected_without_growing() {
        let (mut pool, counters) = pool();

        assert_eq!(
            pool.allocate(PAGE * MAX_POOL_PAGES + 1),
            Err(AllocError::TooLarge)
        );
        assert_eq!(counters.requests.get(), 0);
    }

    #[test]
    fn request_at_the_ceiling_is_accepted() {
        let (mut pool, _) = pool();

        // Largest size whose header-adjusted form still fits the ceiling.
        let size = PAGE * MAX_POOL_PAGES - CHUNK_HEADER_SIZE;
        assert!(pool.allocate(size).is_ok());
    }

    #[test]
    fn payload_pointers_are_16_byte_aligned() {
        let (mut pool, _) = pool();

        for size in [1, 7, 16, 33, 100, 1000, 4000] {
            let ptr = pool.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0, "size {size}");
        }
    }

    #[test]
    fn payloads_are_disjoint_usable_memory() {
        let (mut pool, _) = pool();

        unsafe {
            let a = pool.allocate(256).unwrap();
            a.as_ptr().write_bytes(0x33, 256);

            let b = pool.allocate(256).unwrap();
            b.as_ptr().write_bytes(0x55, 256);

            for i in 0..256 {
                assert_eq!(a.as_ptr().add(i).read(), 0x33);
                assert_eq!(b.as_ptr().add(i).read(), 0x55);
            }
        }
    }

    #[test]
    fn splitting_leaves_the_remainder_free() {
        let (mut pool, _) = pool();

        let needed = align(100 + CHUNK_HEADER_SIZE, ALIGNMENT);
        pool.allocate(100).unwrap();

        let capacity = PAGE - BLOCK_HEADER_SIZE;
        assert_eq!(
            chunk_map(&pool),
            vec![vec![(needed, false), (capacity - needed, true)]]
        );
    }

    #[test]
    fn tiny_excess_is_handed_out_instead_of_split() {
        let (mut pool, _) = pool();

        // Leaves 16 spare bytes, less than a viable chunk, so the whole
        // chunk goes out oversized and no fragment is created.
        let capacity = PAGE - BLOCK_HEADER_SIZE;
        pool.allocate(capacity - ALIGNMENT - CHUNK_HEADER_SIZE).unwrap();

        assert_eq!(chunk_map(&pool), vec![vec![(capacity, false)]]);
    }

    #[test]
    fn freed_chunk_is_reused_without_growing() {
        let (mut pool, counters) = pool();

        let a = pool.allocate(128).unwrap();
        assert_eq!(counters.requests.get(), 1);

        unsafe { pool.free(a.as_ptr()) };

        let b = pool.allocate(64).unwrap();
        assert_eq!(counters.requests.get(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn coalescing_merges_all_three_extents() {
        let (mut pool, _) = pool();

        let needed = align(100 + CHUNK_HEADER_SIZE, ALIGNMENT);
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let c = pool.allocate(100).unwrap();
        // Keeps the block's trailing free space away from C.
        let _guard = pool.allocate(100).unwrap();

        unsafe { pool.free(b.as_ptr()) };
        let map = chunk_map(&pool);
        assert_eq!(
            &map[0][0..4],
            &[
                (needed, false),
                (needed, true),
                (needed, false),
                (needed, false)
            ]
        );

        unsafe { pool.free(a.as_ptr()) };
        unsafe { pool.free(c.as_ptr()) };

        let map = chunk_map(&pool);
        assert_eq!(map[0][0], (3 * needed, true));
        assert_eq!(map[0][1], (needed, false));
    }

    #[test]
    fn coalescing_works_in_the_other_order_too() {
        let (mut pool, _) = pool();

        let needed = align(100 + CHUNK_HEADER_SIZE, ALIGNMENT);
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let c = pool.allocate(100).unwrap();
        let _guard = pool.allocate(100).unwrap();

        unsafe {
            pool.free(b.as_ptr());
            pool.free(c.as_ptr());
            pool.free(a.as_ptr());
        }

        let map = chunk_map(&pool);
        assert_eq!(map[0][0], (3 * needed, true));
    }

    #[test]
    fn double_free_is_a_no_op() {
        let (mut pool, _) = pool();

        let a = pool.allocate(100).unwrap();
        let _b = pool.allocate(100).unwrap();

        unsafe { pool.free(a.as_ptr()) };
        let before = chunk_map(&pool);

        unsafe { pool.free(a.as_ptr()) };
        // chunk_map re-checks contiguity and size conservation.
        assert_eq!(chunk_map(&pool), before);
    }

    #[test]
    fn free_accepts_null() {
        let (mut pool, counters) = pool();

        unsafe { pool.free(ptr::null_mut()) };
        assert_eq!(counters.requests.get(), 0);

        pool.allocate(32).unwrap();
        unsafe { pool.free(ptr::null_mut()) };
        assert_eq!(chunk_map(&pool).len(), 1);
    }

    #[test]
    fn exhaustion_acquires_exactly_one_region() {
        let (mut pool, counters) = pool();

        // Fills the first block to the last byte.
        let big = PAGE - BLOCK_HEADER_SIZE - CHUNK_HEADER_SIZE;
        pool.allocate(big).unwrap();
        assert_eq!(counters.requests.get(), 1);

        pool.allocate(100).unwrap();
        assert_eq!(counters.requests.get(), 2);

        // The fresh block's seed chunk went through the normal split policy.
        let needed = align(100 + CHUNK_HEADER_SIZE, ALIGNMENT);
        let map = chunk_map(&pool);
        assert_eq!(map.len(), 2);
        assert_eq!(map[1][0], (needed, false));
        assert_eq!(map[1].len(), 2);
        assert!(map[1][1].1);
    }

    #[test]
    fn destroy_releases_every_block_and_resets() {
        let (mut pool, counters) = pool();

        pool.allocate(PAGE).unwrap();
        pool.allocate(PAGE * 2).unwrap();
        assert_eq!(counters.requests.get(), 2);

        pool.destroy();
        assert_eq!(counters.releases.get(), 2);
        assert!(pool.blocks.is_empty());

        // Pristine again: the next request maps a region exactly as on
        // first use.
        pool.allocate(64).unwrap();
        assert_eq!(counters.requests.get(), 3);
        assert_eq!(chunk_map(&pool).len(), 1);
    }

    #[test]
    fn destroy_on_an_empty_pool_is_a_no_op() {
        let (mut pool, counters) = pool();

        pool.destroy();
        assert_eq!(counters.releases.get(), 0);

        assert!(pool.allocate(16).is_ok());
    }

    #[test]
    fn dropping_the_pool_releases_its_regions() {
        let (mut pool, counters) = pool();

        pool.allocate(1).unwrap();
        drop(pool);

        assert_eq!(counters.releases.get(), 1);
    }

    #[test]
    fn end_to_end_with_the_real_os() {
        let mut pool = PoolAllocator::new();

        let a = pool.allocate(512).unwrap();
        unsafe {
            a.as_ptr().write_bytes(0x42, 512);
            assert_eq!(a.as_ptr().add(511).read(), 0x42);

            pool.free(a.as_ptr());
        }

        pool.destroy();
    }
}
