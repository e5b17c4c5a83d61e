// ============================================================
// Layer 4 — Test/Train Splitter
// ============================================================
// Shuffles a conversation dataset with a fixed seed and splits
// it into a held-out test set and a training set.
//
// The seed makes the split reproducible: the same input file and
// seed always produce the same two output files.
//
// test_size = floor(total × test_fraction); the first test_size
// shuffled items become the test set.
//
// Reference: rand crate documentation (SeedableRng, SliceRandom)

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (test, train).
pub fn split_test_train<T>(mut samples: Vec<T>, test_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total     = samples.len();
    let test_size = ((total as f64) * test_fraction.clamp(0.0, 1.0)) as usize;

    // split_off(n) leaves [0..n) in `samples` and returns [n..total)
    let train = samples.split_off(test_size.min(total));

    tracing::debug!(
        "Dataset split: {} test, {} train (seed {})",
        samples.len(),
        train.len(),
        seed,
    );

    (samples, train)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (test, train)     = split_test_train(items, 0.1, 42);
        assert_eq!(test.len(),  10);
        assert_eq!(train.len(), 90);
    }

    #[test]
    fn test_fraction_rounds_down() {
        let items: Vec<usize> = (0..15).collect();
        let (test, train)     = split_test_train(items, 0.1, 42);
        assert_eq!(test.len(),  1);
        assert_eq!(train.len(), 14);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (test, train)     = split_test_train(items, 0.3, 7);
        let mut all: Vec<usize> = test.into_iter().chain(train).collect();
        all.sort();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_test_train((0..30).collect::<Vec<_>>(), 0.2, 42);
        let b = split_test_train((0..30).collect::<Vec<_>>(), 0.2, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let (test, train) = split_test_train(Vec::<usize>::new(), 0.1, 42);
        assert!(test.is_empty());
        assert!(train.is_empty());
    }
}
