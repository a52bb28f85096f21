//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` upwards using `alignment`, which must be a power of two.
///
/// This method is used to round chunk sizes up to [`crate::ALIGNMENT`] and region
/// sizes up to a whole number of OS pages. It is a `const fn` because the header
/// size constants in [`crate::block`] and [`crate::chunk`] are computed with it.
pub(crate) const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ALIGNMENT;

    #[test]
    fn align_chunk_size() {
        let alignments = vec![(1..=16, 16), (17..=32, 32), (33..=48, 48), (49..=64, 64)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size, ALIGNMENT));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let alignments = vec![(1..=4096, 4096), (4097..=8192, 8192)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }
}
