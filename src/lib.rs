//! A user-space pool allocator. Memory is requested from the OS in
//! page-sized blocks and served to the caller chunk by chunk, so the usual
//! allocation costs no syscall at all.
//!
//! Every chunk has an associated header with metadata that precedes the
//! actual payload, therefore
//!
//! ```text
//! +--------------------------------+
//! | Header   |       Payload       |
//! +--------------------------------+
//!            ^
//!            returned pointer
//! ```
//!
//! The headers form a doubly-linked list per block, and the blocks form a
//! doubly-linked list per pool:
//!
//! ```text
//! +-----------------------------------------------+      +-----------------------------------------------+
//! |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
//! | Block  | | Chunk | -> | Chunk | -> | Chunk |  | ---> | Block  | | Chunk | -> | Chunk | -> | Chunk |  |
//! |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
//! +-----------------------------------------------+      +-----------------------------------------------+
//! ```
//!
//! Allocation walks this structure first-fit and splits the chunk it picks;
//! freeing merges the chunk back into its free neighbours. Only
//! [`PoolAllocator::destroy`] (or dropping the pool) returns memory to the
//! OS.
//!
//! # Quick start
//!
//! ```
//! use poolalloc::PoolAllocator;
//!
//! let mut pool = PoolAllocator::new();
//!
//! let ptr = pool.allocate(64).expect("allocation failed");
//! unsafe {
//!     ptr.as_ptr().write(42u8);
//!     assert_eq!(ptr.as_ptr().read(), 42);
//!
//!     pool.free(ptr.as_ptr());
//! }
//!
//! pool.destroy();
//! ```
//!
//! # Limitations
//!
//! - **Single-threaded only**: a pool has one logical owner and no internal
//!   locking; it is deliberately not `Sync`.
//! - **No free-list index**: the first-fit scan is linear over blocks and
//!   chunks, chosen for simplicity over throughput.
//! - **No pointer validation**: `free` trusts the caller; foreign or dangling
//!   pointers are undefined behavior, exactly like `libc::free`.

mod block;
mod chunk;
mod error;
mod list;
mod os;
mod pool;
mod utils;

pub use error::AllocError;
pub use os::{OsMemory, RegionProvider};
pub use pool::PoolAllocator;

/// Payload alignment guarantee. Every pointer handed out by
/// [`PoolAllocator::allocate`] is aligned to this many bytes, and all chunk
/// sizes are multiples of it.
pub const ALIGNMENT: usize = 16;

/// Sanity ceiling for a single request, expressed in pages: one allocation
/// may span at most this many OS pages. Total pool growth is not bounded,
/// only the size of an individual request.
pub const MAX_POOL_PAGES: usize = 16;
