use thiserror::Error;

/// Errors an allocation request can fail with.
///
/// Every failure is reported once to the immediate caller; the allocator never
/// retries an OS request on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Zero-byte requests are rejected before touching any allocator state.
    #[error("requested size must be greater than zero")]
    InvalidSize,
    /// The header-adjusted, aligned size exceeds the configured pool ceiling.
    /// This is a sanity bound, not an architectural limit.
    #[error("requested size exceeds the maximum pool capacity")]
    TooLarge,
    /// The operating system refused to map a new region.
    #[error("the operating system could not provide more memory")]
    OutOfMemory,
}
