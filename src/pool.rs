//! Bounded worker pool with in-order result delivery.
//!
//! Design:
//! - **Workers:** a dedicated `rayon` pool of `workers` threads pulls job
//!   indices from a shared channel and runs the work function
//! - **Backpressure:** jobs are handed out at most `workers +
//!   result_capacity` indices ahead of the next result to deliver, so a slow
//!   item holds back the queue instead of growing the reorder buffer
//! - **Ordering:** the calling thread buffers out-of-order results and hands
//!   them to the sink strictly by input index
//! - **Cancellation:** a shared [`CancellationToken`]; jobs that have not
//!   started once it is set come back as [`HoldingsError::Cancelled`]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::debug;

use crate::error::{HoldingsError, HoldingsResult};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker threads
    pub workers: usize,
    /// Result channel capacity; with `workers` it also bounds how many
    /// finished results can wait behind an unfinished one
    pub result_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            result_capacity: 64,
        }
    }
}

impl PoolConfig {
    /// A pool of `workers` threads with the default channel capacity.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this token to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `work` over `items` concurrently and feed the results to `sink` in
/// input order.
///
/// `sink` runs on the calling thread and receives each item's index, the item
/// and its result. If the sink returns an error the token is cancelled, the
/// remaining results are drained without reaching the sink, and the error is
/// returned.
///
/// # Errors
///
/// Returns the first sink error, [`HoldingsError::Cancelled`] if the token was
/// cancelled from outside, or [`HoldingsError::Config`] if the pool cannot be
/// built.
pub fn run_ordered<I, T, F, S>(
    config: &PoolConfig,
    cancel: &CancellationToken,
    items: &[I],
    work: F,
    mut sink: S,
) -> HoldingsResult<()>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> HoldingsResult<T> + Sync,
    S: FnMut(usize, &I, HoldingsResult<T>) -> HoldingsResult<()>,
{
    if config.workers == 0 {
        return Err(HoldingsError::Config(
            "worker count must be at least 1".to_string(),
        ));
    }
    if items.is_empty() {
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|i| format!("holdings-worker-{i}"))
        .build()
        .map_err(|e| HoldingsError::Config(format!("cannot start worker pool: {e}")))?;

    let capacity = config.result_capacity.max(1);
    let window = config.workers + capacity;
    let (job_tx, job_rx) = unbounded::<usize>();
    let mut jobs = JobQueue::new(job_tx, items.len());
    jobs.fill(window);

    let (result_tx, result_rx) = bounded::<(usize, HoldingsResult<T>)>(capacity);
    let work = &work;

    let sink_error = pool.in_place_scope(|scope| {
        for _ in 0..config.workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move |_| {
                for index in job_rx {
                    let result = if cancel.is_cancelled() {
                        Err(HoldingsError::Cancelled)
                    } else {
                        work(&items[index])
                    };
                    if result_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut pending = BTreeMap::new();
        let mut next = 0;
        let mut first_error = None;
        for (index, result) in &result_rx {
            pending.insert(index, result);
            while let Some(result) = pending.remove(&next) {
                if first_error.is_none() {
                    if let Err(e) = sink(next, &items[next], result) {
                        debug!(index = next, "Sink failed, cancelling remaining jobs");
                        cancel.cancel();
                        jobs.close();
                        first_error = Some(e);
                    }
                }
                next += 1;
            }
            jobs.fill(next + window);
        }
        first_error
    });

    match sink_error {
        Some(e) => Err(e),
        None if cancel.is_cancelled() => Err(HoldingsError::Cancelled),
        None => Ok(()),
    }
}

/// Job indices handed to the workers, in order, up to a moving limit.
///
/// Dropping the sender once every index is queued (or on [`close`](Self::close))
/// lets the workers drain the queue and exit.
struct JobQueue {
    sender: Option<Sender<usize>>,
    queued: usize,
    total: usize,
}

impl JobQueue {
    fn new(sender: Sender<usize>, total: usize) -> Self {
        JobQueue {
            sender: Some(sender),
            queued: 0,
            total,
        }
    }

    /// Queue indices below `limit`.
    fn fill(&mut self, limit: usize) {
        let Some(sender) = &self.sender else {
            return;
        };
        while self.queued < limit.min(self.total) {
            if sender.send(self.queued).is_err() {
                break;
            }
            self.queued += 1;
        }
        if self.queued == self.total {
            self.close();
        }
    }

    /// Stop handing out jobs.
    fn close(&mut self) {
        self.sender = None;
    }
}
