// ============================================================
// Layer 4 — Ordered Prefetch
// ============================================================
// Loads upcoming batches on background threads while the
// current batch runs through the model.
//
//   producer thread                         consumer (caller)
//   ───────────────                         ─────────────────
//   for each batch range:
//     rayon pool loads samples in parallel
//     collect() keeps index order
//     send(batch) ──── bounded channel ───→ for batch in prefetcher
//
// Batches come out in exactly the order of `batch_ranges`, so the
// answer file order never depends on which worker finished first.
// At most PREFETCH_DEPTH loaded batches wait in the channel.
//
// Reference: rayon docs (ThreadPool::install),
//            crossbeam-channel docs (bounded)

use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;

use crate::data::chunker::batch_ranges;
use crate::data::dataset::IndexedSource;

const PREFETCH_DEPTH: usize = 2;

/// What to do when one sample fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the run with the sample's error
    #[default]
    Abort,
    /// Log a warning and leave the sample out of its batch
    Skip,
}

pub struct Prefetcher<S> {
    rx:     Receiver<Result<Vec<S>>>,
    handle: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> Prefetcher<S> {
    pub fn spawn(
        source:      Arc<dyn IndexedSource<S>>,
        batch_size:  usize,
        num_workers: usize,
        policy:      FailurePolicy,
    ) -> Result<Self> {
        let ranges = batch_ranges(source.count(), batch_size)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("prefetch-{i}"))
            .build()?;
        let (tx, rx) = bounded(PREFETCH_DEPTH);

        let handle = thread::Builder::new()
            .name("prefetch".into())
            .spawn(move || produce(source, ranges, policy, pool, tx))?;

        Ok(Self { rx, handle: Some(handle) })
    }
}

fn produce<S: Send>(
    source: Arc<dyn IndexedSource<S>>,
    ranges: Vec<Range<usize>>,
    policy: FailurePolicy,
    pool:   rayon::ThreadPool,
    tx:     Sender<Result<Vec<S>>>,
) {
    for range in ranges {
        let loaded: Vec<(usize, Result<S>)> = pool.install(|| {
            range
                .clone()
                .into_par_iter()
                .map(|i| (i, source.load(i)))
                .collect()
        });

        let mut batch = Vec::with_capacity(loaded.len());
        for (index, result) in loaded {
            match (result, policy) {
                (Ok(sample), _) => batch.push(sample),
                (Err(e), FailurePolicy::Abort) => {
                    let err = e.context(format!("Failed to load {}", source.describe(index)));
                    let _ = tx.send(Err(err));
                    return;
                }
                (Err(e), FailurePolicy::Skip) => {
                    tracing::warn!("Skipping {}: {:#}", source.describe(index), e);
                }
            }
        }

        if batch.is_empty() {
            continue;
        }
        tracing::debug!("Prefetched batch {:?}", range);
        if tx.send(Ok(batch)).is_err() {
            // consumer hung up
            return;
        }
    }
}

impl<S> Iterator for Prefetcher<S> {
    type Item = Result<Vec<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(batch) => Some(batch),
            Err(_) => {
                // Producer is gone; surface a panic instead of ending quietly.
                let handle = self.handle.take()?;
                match handle.join() {
                    Ok(()) => None,
                    Err(_) => Some(Err(anyhow!("prefetch thread panicked"))),
                }
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::PipelineError;
    use std::time::Duration;

    /// Later indices load faster, so completion order is reversed.
    struct SlowFirst {
        n:       usize,
        failing: Option<usize>,
    }

    impl IndexedSource<usize> for SlowFirst {
        fn count(&self) -> usize {
            self.n
        }

        fn load(&self, index: usize) -> Result<usize> {
            thread::sleep(Duration::from_millis(((self.n - index) * 3) as u64));
            if Some(index) == self.failing {
                return Err(PipelineError::decode(format!("{index}.png"), "truncated").into());
            }
            Ok(index)
        }

        fn describe(&self, index: usize) -> String {
            format!("sample {index}")
        }
    }

    fn collect(p: Prefetcher<usize>) -> Result<Vec<Vec<usize>>> {
        p.collect()
    }

    #[test]
    fn test_batches_arrive_in_index_order() {
        let src = Arc::new(SlowFirst { n: 7, failing: None });
        let batches = collect(Prefetcher::spawn(src, 3, 4, FailurePolicy::Abort).unwrap()).unwrap();
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn test_abort_policy_stops_with_error() {
        let src = Arc::new(SlowFirst { n: 6, failing: Some(4) });
        let mut p = Prefetcher::spawn(src, 2, 2, FailurePolicy::Abort).unwrap();
        assert_eq!(p.next().unwrap().unwrap(), vec![0, 1]);
        assert_eq!(p.next().unwrap().unwrap(), vec![2, 3]);
        let err = p.next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Decode { .. })
        ));
        assert!(p.next().is_none());
    }

    #[test]
    fn test_skip_policy_drops_failed_sample() {
        let src = Arc::new(SlowFirst { n: 4, failing: Some(1) });
        let batches = collect(Prefetcher::spawn(src, 2, 2, FailurePolicy::Skip).unwrap()).unwrap();
        assert_eq!(batches, vec![vec![0], vec![2, 3]]);
    }

    #[test]
    fn test_empty_source() {
        let src = Arc::new(SlowFirst { n: 0, failing: None });
        let batches = collect(Prefetcher::spawn(src, 2, 0, FailurePolicy::Abort).unwrap()).unwrap();
        assert!(batches.is_empty());
    }
}
