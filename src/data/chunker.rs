// ============================================================
// Layer 4 — Manifest Sharding
// ============================================================
// Splits a manifest into `num_chunks` contiguous slices so that
// independent processes can each take one, with no coordination.
//
// chunk_size = ceil(L / K). Chunk k covers
//   [k * chunk_size, min((k + 1) * chunk_size, L))
//
// Example with L = 10, K = 3 (chunk_size = 4):
//   chunk 0: 0 1 2 3
//   chunk 1: 4 5 6 7
//   chunk 2: 8 9          (shorter final chunk)
//
// When K does not divide L well (L = 4, K = 3 → chunk_size 2)
// the last chunks may be empty; a process assigned such a chunk
// has nothing to do and writes an empty answer file.
//
// The same arithmetic with a fixed size forms batches within a
// chunk (batch_ranges).

use std::ops::Range;

use crate::domain::error::{ensure_invariant, PipelineError};

/// Index range of chunk `chunk_idx` out of `num_chunks` over `len` items.
pub fn chunk_range(len: usize, num_chunks: usize, chunk_idx: usize) -> Result<Range<usize>, PipelineError> {
    ensure_invariant(num_chunks > 0, || "num_chunks must be at least 1".to_string())?;
    ensure_invariant(chunk_idx < num_chunks, || {
        format!("chunk_idx {chunk_idx} out of range for {num_chunks} chunks")
    })?;
    let chunk_size = len.div_ceil(num_chunks);
    let start = (chunk_idx * chunk_size).min(len);
    let end   = (start + chunk_size).min(len);
    Ok(start..end)
}

/// Every chunk's range, in order.
pub fn split_ranges(len: usize, num_chunks: usize) -> Result<Vec<Range<usize>>, PipelineError> {
    (0..num_chunks).map(|k| chunk_range(len, num_chunks, k)).collect()
}

/// The slice owned by chunk `chunk_idx`.
pub fn get_chunk<T>(items: &[T], num_chunks: usize, chunk_idx: usize) -> Result<&[T], PipelineError> {
    let range = chunk_range(items.len(), num_chunks, chunk_idx)?;
    Ok(&items[range])
}

/// Consecutive ranges of at most `batch_size` items covering `0..len`.
pub fn batch_ranges(len: usize, batch_size: usize) -> Result<Vec<Range<usize>>, PipelineError> {
    ensure_invariant(batch_size > 0, || "batch_size must be at least 1".to_string())?;
    Ok((0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_layout() {
        let ranges = split_ranges(10, 3).unwrap();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_chunks_cover_every_index_exactly_once() {
        for len in 0..40 {
            for k in 1..12 {
                let ranges = split_ranges(len, k).unwrap();
                let size = len.div_ceil(k);

                let mut seen = Vec::new();
                for r in &ranges {
                    assert!(r.len() <= size);
                    seen.extend(r.clone());
                }
                assert_eq!(seen, (0..len).collect::<Vec<_>>(), "len={len} k={k}");

                // Only the tail may be short.
                let full = ranges.iter().take_while(|r| r.len() == size).count();
                assert!(ranges[full..].iter().skip(1).all(|r| r.is_empty()));
            }
        }
    }

    #[test]
    fn test_trailing_chunks_can_be_empty() {
        let items = [1, 2, 3, 4];
        assert_eq!(get_chunk(&items, 3, 1).unwrap(), &[3, 4]);
        assert!(get_chunk(&items, 3, 2).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_chunk_arguments() {
        assert!(chunk_range(5, 0, 0).is_err());
        assert!(chunk_range(5, 2, 2).is_err());
    }

    #[test]
    fn test_batch_ranges() {
        assert_eq!(batch_ranges(5, 2).unwrap(), vec![0..2, 2..4, 4..5]);
        assert!(batch_ranges(0, 4).unwrap().is_empty());
        assert!(batch_ranges(3, 0).is_err());
    }
}
