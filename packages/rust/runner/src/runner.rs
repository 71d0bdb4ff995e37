//! Bounded-concurrency task runner.
//!
//! [`Runner`] executes a worker once per item on the tokio scheduler. A
//! semaphore sized by [`RunnerConfig::max_concurrency`] caps how many workers
//! execute at once. Progress messages, successes, and failures travel over
//! three channels that are drained while the workers run; a call returns only
//! after every worker has been joined and every channel is empty.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use regindex_shared::{EventSink, RunnerConfig, TracingSink};

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// Aggregate of one run: every completed item contributes one entry to
/// either `results` or `errors`. Neither list follows input order.
#[derive(Debug)]
pub struct RunResult<R, E> {
    /// Values returned by successful workers.
    pub results: Vec<R>,
    /// Errors returned by failed workers.
    pub errors: Vec<E>,
}

impl<R, E> RunResult<R, E> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Number of items that reported an outcome.
    pub fn completed(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    /// True when no worker failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<R, E> Default for RunResult<R, E> {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Handle a worker uses to emit progress messages.
#[derive(Debug, Clone)]
pub struct Progress {
    tx: mpsc::UnboundedSender<String>,
}

impl Progress {
    /// Emit one progress message. Messages sent after the run has finished
    /// draining are dropped.
    pub fn message(&self, message: impl Into<String>) {
        let _ = self.tx.send(message.into());
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs a worker over a collection of items with bounded parallelism.
#[derive(Clone)]
pub struct Runner {
    config: RunnerConfig,
    events: Arc<dyn EventSink>,
}

impl Runner {
    /// Create a runner that reports to `tracing`.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            events: Arc::new(TracingSink),
        }
    }

    /// Replace the event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `worker` once per item and aggregate every outcome.
    ///
    /// The worker's `Ok` value lands in [`RunResult::results`], its `Err` in
    /// [`RunResult::errors`]. One item's failure never affects another.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, worker: F) -> RunResult<R, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T, Progress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        if items.is_empty() {
            return RunResult::empty();
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        self.drive(
            items,
            worker,
            |_| {},
            |result| results.push(result),
            |error| errors.push(error),
        )
        .await;

        RunResult { results, errors }
    }

    /// Like [`Runner::run`], but hands each message, result, and error to a
    /// callback as soon as it arrives instead of aggregating them.
    pub async fn run_with_callbacks<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        on_message: impl FnMut(&str),
        on_result: impl FnMut(R),
        on_error: impl FnMut(E),
    ) where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T, Progress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        if items.is_empty() {
            return;
        }

        self.drive(items, worker, on_message, on_result, on_error)
            .await;
    }

    /// Dispatch one task per item, then wait on the workers and the three
    /// collectors together.
    #[instrument(skip_all, fields(runner = %self.config.log_prefix, items = items.len()))]
    async fn drive<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        mut on_message: impl FnMut(&str),
        mut on_result: impl FnMut(R),
        mut on_error: impl FnMut(E),
    ) where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T, Progress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let prefix = self.config.log_prefix.as_str();
        let total = items.len();
        self.events.run_started(prefix, total);

        let (message_tx, mut message_rx) = mpsc::unbounded_channel::<String>();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<R>();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<E>();

        let throttle = self
            .config
            .is_bounded()
            .then(|| {
                let permits = self.config.max_concurrency.min(Semaphore::MAX_PERMITS);
                Arc::new(Semaphore::new(permits))
            });
        let worker = Arc::new(worker);

        let mut workers = JoinSet::new();
        for item in items {
            let worker = Arc::clone(&worker);
            let throttle = throttle.clone();
            let progress = Progress {
                tx: message_tx.clone(),
            };
            let result_tx = result_tx.clone();
            let error_tx = error_tx.clone();

            workers.spawn(async move {
                // Held until the worker's outcome has been sent.
                let _permit = match throttle {
                    Some(sem) => Some(
                        sem.acquire_owned()
                            .await
                            .expect("runner semaphore is never closed"),
                    ),
                    None => None,
                };

                match (*worker)(item, progress).await {
                    Ok(result) => {
                        let _ = result_tx.send(result);
                    }
                    Err(error) => {
                        let _ = error_tx.send(error);
                    }
                }
            });
        }

        // Only worker-held senders remain; each stream closes when the last
        // worker holding it finishes.
        drop(message_tx);
        drop(result_tx);
        drop(error_tx);

        let mut succeeded = 0usize;
        let mut failed = 0usize;

        let join_workers = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!(runner = prefix, error = %e, "worker task did not complete");
                }
            }
        };

        let drain_messages = async {
            while let Some(message) = message_rx.recv().await {
                self.events.run_message(prefix, &message);
                on_message(&message);
            }
        };

        let drain_results = async {
            while let Some(result) = result_rx.recv().await {
                succeeded += 1;
                self.events.item_finished(prefix, true);
                on_result(result);
            }
        };

        let drain_errors = async {
            while let Some(error) = error_rx.recv().await {
                failed += 1;
                self.events.item_finished(prefix, false);
                on_error(error);
            }
        };

        tokio::join!(join_workers, drain_messages, drain_results, drain_errors);

        debug!(total, succeeded, failed, "all workers joined");
        self.events.run_finished(prefix, succeeded, failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use regindex_shared::SilentSink;

    fn runner(max_concurrency: i64) -> Runner {
        let config = RunnerConfig::new(max_concurrency, "test").expect("valid config");
        Runner::new(config).with_events(Arc::new(SilentSink))
    }

    /// Tracks how many workers are inside their body at once.
    #[derive(Default)]
    struct ConcurrencyGauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyGauge {
        fn enter(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn empty_input_never_invokes_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: RunResult<u32, String> = runner(2)
            .run(Vec::<u32>::new(), move |item, _progress| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(item) }
            })
            .await;

        assert!(result.results.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_ceiling() {
        let gauge = Arc::new(ConcurrencyGauge::default());
        let tracked = Arc::clone(&gauge);

        let result: RunResult<u32, String> = runner(2)
            .run(vec![1, 2, 3, 4, 5], move |item, _progress| {
                let gauge = Arc::clone(&tracked);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    gauge.exit();
                    Ok(item)
                }
            })
            .await;

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(result.results.len(), 5);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn oversized_ceiling_is_clamped() {
        let result: RunResult<u32, String> = runner(i64::MAX)
            .run(vec![1, 2, 3], |item, _progress| async move { Ok(item * 2) })
            .await;

        let mut results = result.results;
        results.sort_unstable();
        assert_eq!(results, vec![2, 4, 6]);
        assert!(result.errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unlimited_runs_all_items_at_once() {
        let gauge = Arc::new(ConcurrencyGauge::default());
        let tracked = Arc::clone(&gauge);

        let result: RunResult<u32, String> = runner(0)
            .run((0..6).collect(), move |item, _progress| {
                let gauge = Arc::clone(&tracked);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    gauge.exit();
                    Ok(item)
                }
            })
            .await;

        assert_eq!(result.results.len(), 6);
        assert!(gauge.peak.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let result: RunResult<String, String> = runner(2)
            .run(vec!["i1", "i2"], |item, _progress| async move {
                if item == "i1" {
                    Err(format!("error({item})"))
                } else {
                    Ok(format!("success({item})"))
                }
            })
            .await;

        assert_eq!(result.results, vec!["success(i2)".to_string()]);
        assert_eq!(result.errors, vec!["error(i1)".to_string()]);
        assert!(!result.is_clean());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_item_reports_exactly_once() {
        let items: Vec<u32> = (0..50).collect();
        let result: RunResult<u32, u32> = runner(3)
            .run(items, |item, _progress| async move {
                tokio::task::yield_now().await;
                if item % 7 == 0 { Err(item) } else { Ok(item) }
            })
            .await;

        assert_eq!(result.completed(), 50);
        assert_eq!(result.errors.len(), 8);

        let mut seen: Vec<u32> = result
            .results
            .iter()
            .chain(result.errors.iter())
            .copied()
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn callbacks_receive_every_stream() {
        let mut messages = Vec::new();
        let mut results = Vec::new();
        let mut errors = Vec::new();

        runner(1)
            .run_with_callbacks(
                vec![1u32, 2, 3],
                |item, progress| async move {
                    progress.message(format!("processing {item}"));
                    if item == 2 {
                        Err(format!("bad {item}"))
                    } else {
                        Ok(item * 10)
                    }
                },
                |msg| messages.push(msg.to_string()),
                |value| results.push(value),
                |err| errors.push(err),
            )
            .await;

        messages.sort();
        results.sort_unstable();
        assert_eq!(
            messages,
            vec!["processing 1", "processing 2", "processing 3"]
        );
        assert_eq!(results, vec![10, 30]);
        assert_eq!(errors, vec!["bad 2".to_string()]);
    }

    #[tokio::test]
    async fn messages_reach_event_sink() {
        #[derive(Default)]
        struct Recorder {
            messages: Mutex<Vec<String>>,
            outcomes: Mutex<Vec<bool>>,
            finished: Mutex<Option<(usize, usize)>>,
        }

        impl EventSink for Recorder {
            fn run_message(&self, prefix: &str, message: &str) {
                self.messages
                    .lock()
                    .unwrap()
                    .push(format!("{prefix}: {message}"));
            }

            fn item_finished(&self, _prefix: &str, succeeded: bool) {
                self.outcomes.lock().unwrap().push(succeeded);
            }

            fn run_finished(&self, _prefix: &str, succeeded: usize, failed: usize) {
                *self.finished.lock().unwrap() = Some((succeeded, failed));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let config = RunnerConfig::new(0, "Title Import").unwrap();
        let runner = Runner::new(config).with_events(recorder.clone());

        let result: RunResult<u32, String> = runner
            .run(vec![7u32, 8], |item, progress| async move {
                if item == 8 {
                    return Err(format!("bad {item}"));
                }
                progress.message(format!("Success: Title {item}"));
                Ok(item)
            })
            .await;

        assert_eq!(result.results, vec![7]);
        assert_eq!(
            *recorder.messages.lock().unwrap(),
            vec!["Title Import: Success: Title 7".to_string()]
        );
        let mut outcomes = recorder.outcomes.lock().unwrap().clone();
        outcomes.sort_unstable();
        assert_eq!(outcomes, vec![false, true]);
        assert_eq!(*recorder.finished.lock().unwrap(), Some((1, 1)));
    }

    #[tokio::test]
    async fn panicking_worker_does_not_stall_the_run() {
        let result: RunResult<u32, String> = runner(1)
            .run(vec![1u32, 2, 3], |item, _progress| async move {
                if item == 2 {
                    panic!("worker bug");
                }
                Ok(item)
            })
            .await;

        let mut results = result.results;
        results.sort_unstable();
        assert_eq!(results, vec![1, 3]);
        assert!(result.errors.is_empty());
    }
}
