// Bounded fan-out of work items over a fixed number of slots

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::outcome::{Completion, Outcome};
use super::runner::TaskRunner;
use super::task::{TaskSpec, WorkItem};
use super::RemoteTask;
use crate::output::errors::FanoutError;

/// Runs every work item through a [`TaskRunner`], never more than
/// `capacity` at a time.
///
/// Built once per run and passed to whoever dispatches; there is no global
/// pool.
pub struct BoundedDispatcher {
    capacity: usize,
    runner: TaskRunner,
}

impl BoundedDispatcher {
    pub fn new(task: Arc<dyn RemoteTask>, spec: Arc<TaskSpec>) -> Result<Self, FanoutError> {
        spec.validate()?;
        let capacity = spec.max_concurrency;
        let runner = TaskRunner::new(task, spec)?;
        Ok(BoundedDispatcher { capacity, runner })
    }

    /// Slots actually allocated for `items` work items
    pub fn effective_capacity(&self, items: usize) -> usize {
        self.capacity.min(items)
    }

    pub fn timeout(&self) -> Duration {
        self.runner.timeout()
    }

    /// Start dispatching `items` and return the outcomes as they become
    /// available, in input order.
    ///
    /// Items are submitted in order; a slot freed by any finished or
    /// timed-out item immediately takes the next pending one. Must be called
    /// from within a tokio runtime.
    pub fn dispatch_all(&self, items: Vec<WorkItem>) -> Result<Dispatch, FanoutError> {
        if items.is_empty() {
            return Err(FanoutError::config(
                "Nothing to dispatch: the host list is empty",
                Some("Add at least one host to the host list"),
            ));
        }

        let total = items.len();
        let capacity = self.effective_capacity(total);
        let semaphore = Arc::new(Semaphore::new(capacity));
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = self.runner.clone();

        info!(
            hosts = total,
            capacity,
            timeout_secs = runner.timeout().as_secs_f64(),
            "dispatch started"
        );

        let driver = tokio::spawn(async move {
            for (index, item) in items.into_iter().enumerate() {
                // Suspends only while every slot is taken
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                debug!(host = %item, index, "slot acquired");

                let runner = runner.clone();
                let run_item = item.clone();
                let handle = tokio::spawn(async move {
                    let completion = runner.run_indexed(index, run_item).await;
                    debug!(host = %completion.item, index, "slot released");
                    drop(permit);
                    completion
                });

                // Receiver gone means the caller stopped listening
                if tx.send(Pending {
                    index,
                    item,
                    handle,
                })
                .is_err()
                {
                    break;
                }
            }
        });

        Ok(Dispatch {
            pending: rx,
            driver,
            total,
            delivered: 0,
            capacity,
        })
    }
}

struct Pending {
    index: usize,
    item: WorkItem,
    handle: JoinHandle<Completion>,
}

/// Outcomes of one dispatch, yielded in input order.
///
/// Finite and not restartable: yields exactly one [`Completion`] per item,
/// then `None`. Dropping it stops submission of items not yet started.
pub struct Dispatch {
    pending: mpsc::UnboundedReceiver<Pending>,
    driver: JoinHandle<()>,
    total: usize,
    delivered: usize,
    capacity: usize,
}

impl Dispatch {
    /// Number of items in this dispatch
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Slots in use for this dispatch, after clamping to the item count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for the next item's outcome in input order
    pub async fn next(&mut self) -> Option<Completion> {
        let Pending {
            index,
            item,
            handle,
        } = self.pending.recv().await?;

        let completion = match handle.await {
            Ok(completion) => completion,
            Err(e) => Completion {
                index,
                outcome: Outcome::failure(&item, format!("runner failed: {}", e)),
                item,
                elapsed: Duration::ZERO,
            },
        };

        self.delivered += 1;
        if self.delivered == self.total {
            info!(hosts = self.total, "dispatch finished");
        }
        Some(completion)
    }

    /// Drain every outcome
    pub async fn collect(mut self) -> Vec<Completion> {
        let mut completions = Vec::with_capacity(self.total);
        while let Some(completion) = self.next().await {
            completions.push(completion);
        }
        completions
    }

    pub fn into_stream(self) -> impl Stream<Item = Completion> {
        stream::unfold(self, |mut dispatch| async move {
            dispatch.next().await.map(|completion| (completion, dispatch))
        })
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecError;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Records how many tasks are inside the task function at once
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    fn hosts(names: &[&str]) -> Vec<WorkItem> {
        names.iter().map(|n| WorkItem::new(n)).collect()
    }

    fn dispatcher<F>(capacity: usize, timeout: Duration, f: F) -> BoundedDispatcher
    where
        F: Fn(&WorkItem, &TaskSpec, &CancellationToken) -> Result<String, ExecError>
            + Send
            + Sync
            + 'static,
    {
        let spec = TaskSpec::new("true")
            .with_timeout(timeout)
            .with_max_concurrency(capacity);
        BoundedDispatcher::new(Arc::new(f), Arc::new(spec)).unwrap()
    }

    /// A task that sleeps `delay` while counted in `gauge`, then answers "<host>-ok"
    fn sleepy(
        gauge: Arc<Gauge>,
        delay: Duration,
    ) -> impl Fn(&WorkItem, &TaskSpec, &CancellationToken) -> Result<String, ExecError> + Send + Sync + 'static
    {
        move |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
            gauge.enter();
            std::thread::sleep(delay);
            gauge.exit();
            Ok(format!("{}-ok", item))
        }
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let spec = TaskSpec::new("true").with_max_concurrency(0);
        let task = |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| -> Result<String, ExecError> {
            Ok(String::new())
        };
        let result = BoundedDispatcher::new(Arc::new(task), Arc::new(spec));
        assert!(matches!(result, Err(FanoutError::Config { .. })));
    }

    #[tokio::test]
    async fn test_rejects_empty_host_list() {
        let d = dispatcher(2, Duration::from_secs(1), |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
            Ok(String::new())
        });
        assert!(matches!(d.dispatch_all(Vec::new()), Err(FanoutError::Config { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_batches_with_capacity_two() {
        let gauge = Arc::new(Gauge::default());
        let delay = Duration::from_millis(300);
        let d = dispatcher(2, Duration::from_secs(5), sleepy(gauge.clone(), delay));

        let start = Instant::now();
        let completions = d.dispatch_all(hosts(&["a", "b", "c"])).unwrap().collect().await;
        let elapsed = start.elapsed();

        let outcomes: Vec<_> = completions.into_iter().map(|c| c.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                Outcome::success("a-ok"),
                Outcome::success("b-ok"),
                Outcome::success("c-ok"),
            ]
        );
        assert_eq!(gauge.peak(), 2);
        assert!(elapsed >= delay * 2 - Duration::from_millis(50), "{:?}", elapsed);
        assert!(elapsed < delay * 3, "{:?}", elapsed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hung_host_does_not_hold_up_others() {
        let d = dispatcher(
            2,
            Duration::from_millis(200),
            |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                if item.as_str() == "a" {
                    std::thread::sleep(Duration::from_secs(2));
                }
                Ok(format!("{}-result", item))
            },
        );

        let start = Instant::now();
        let completions = d.dispatch_all(hosts(&["a", "b"])).unwrap().collect().await;
        let elapsed = start.elapsed();

        let outcomes: Vec<_> = completions.into_iter().map(|c| c.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::timeout(&WorkItem::new("a")), Outcome::success("b-result")]
        );
        assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_clamps_to_host_count() {
        let gauge = Arc::new(Gauge::default());
        let delay = Duration::from_millis(300);
        let d = dispatcher(5, Duration::from_secs(5), sleepy(gauge.clone(), delay));
        assert_eq!(d.effective_capacity(2), 2);

        let start = Instant::now();
        let dispatch = d.dispatch_all(hosts(&["a", "b"])).unwrap();
        assert_eq!(dispatch.capacity(), 2);
        let completions = dispatch.collect().await;

        assert_eq!(completions.len(), 2);
        assert_eq!(gauge.peak(), 2);
        // Both ran at once: one delay, not two
        assert!(start.elapsed() < delay * 2, "{:?}", start.elapsed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_follow_input_order_not_completion_order() {
        let names = ["h0", "h1", "h2", "h3", "h4", "h5"];
        let d = dispatcher(
            3,
            Duration::from_secs(5),
            |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                // Earlier hosts take longer
                let n: u64 = item.as_str()[1..].parse().unwrap();
                std::thread::sleep(Duration::from_millis(40 * (6 - n)));
                Ok(item.to_string())
            },
        );

        let completions = d.dispatch_all(hosts(&names)).unwrap().collect().await;

        let order: Vec<_> = completions.iter().map(|c| c.item.as_str()).collect();
        assert_eq!(order, names.to_vec());
        let indexes: Vec<_> = completions.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
        for c in &completions {
            assert_eq!(c.outcome, Outcome::success(c.item.as_str()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_capacity() {
        for (capacity, count) in [(1, 4), (2, 7), (3, 3), (4, 10), (8, 5)] {
            let gauge = Arc::new(Gauge::default());
            let d = dispatcher(
                capacity,
                Duration::from_secs(5),
                sleepy(gauge.clone(), Duration::from_millis(20)),
            );

            let items: Vec<_> = (0..count).map(|i| WorkItem::new(format!("h{}", i))).collect();
            let completions = d.dispatch_all(items).unwrap().collect().await;

            assert_eq!(completions.len(), count);
            assert!(gauge.peak() <= capacity.min(count));
            assert!(gauge.peak() >= 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_do_not_abort_other_hosts() {
        let d = dispatcher(
            2,
            Duration::from_secs(5),
            |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| match item.as_str() {
                "bad" => Err(ExecError::Connect {
                    host: item.to_string(),
                    message: "No route to host".to_string(),
                }),
                "worse" => panic!("driver crashed"),
                _ => Ok("fine".to_string()),
            },
        );

        let completions = d
            .dispatch_all(hosts(&["good", "bad", "worse", "good"]))
            .unwrap()
            .collect()
            .await;

        assert_eq!(completions.len(), 4);
        assert!(completions[0].outcome.is_success());
        assert!(matches!(
            completions[1].outcome,
            Outcome::ConnectionFailure { .. }
        ));
        assert!(matches!(
            completions[2].outcome,
            Outcome::ConnectionFailure { .. }
        ));
        assert!(completions[3].outcome.is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abandoned_task_never_reports_twice() {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = finished.clone();
        let d = dispatcher(
            2,
            Duration::from_millis(50),
            move |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                // Ignores cancellation on purpose
                std::thread::sleep(Duration::from_millis(250));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{}-late", item))
            },
        );

        let mut dispatch = d.dispatch_all(hosts(&["x", "y"])).unwrap();
        let first = dispatch.next().await.unwrap();
        let second = dispatch.next().await.unwrap();
        assert!(first.outcome.is_timeout());
        assert!(second.outcome.is_timeout());

        // Let the abandoned workers finish, then confirm nothing more arrives
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert!(dispatch.next().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timed_out_slot_is_reused() {
        let d = dispatcher(
            1,
            Duration::from_millis(100),
            move |item: &WorkItem, _: &TaskSpec, cancel: &CancellationToken| {
                if item.as_str() == "stuck" {
                    while !cancel.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    return Err(ExecError::Cancelled {
                        host: item.to_string(),
                    });
                }
                Ok("next".to_string())
            },
        );

        let start = Instant::now();
        let completions = d
            .dispatch_all(hosts(&["stuck", "after"]))
            .unwrap()
            .collect()
            .await;

        assert!(completions[0].outcome.is_timeout());
        assert_eq!(completions[1].outcome, Outcome::success("next"));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abandoned_workers_do_not_starve_later_hosts() {
        // More stuck workers than tokio's blocking pool would ever hold
        const DEAD: usize = 600;
        const LIVE: usize = 20;

        let d = dispatcher(
            50,
            Duration::from_millis(100),
            |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                if item.as_str().starts_with("dead") {
                    // Ignores cancellation, like a blocked connect
                    std::thread::sleep(Duration::from_secs(3));
                }
                Ok(format!("{}-ok", item))
            },
        );

        let items: Vec<_> = (0..DEAD)
            .map(|i| WorkItem::new(format!("dead{}", i)))
            .chain((0..LIVE).map(|i| WorkItem::new(format!("live{}", i))))
            .collect();
        let completions = d.dispatch_all(items).unwrap().collect().await;

        assert_eq!(completions.len(), DEAD + LIVE);
        assert!(completions[..DEAD].iter().all(|c| c.outcome.is_timeout()));
        let live_timeouts = completions[DEAD..]
            .iter()
            .filter(|c| c.outcome.is_timeout())
            .count();
        assert_eq!(live_timeouts, 0);
        for c in &completions[DEAD..] {
            assert_eq!(c.outcome, Outcome::success(format!("{}-ok", c.item)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_hosts_are_independent_items() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let d = dispatcher(
            2,
            Duration::from_secs(5),
            move |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(n.to_string())
            },
        );

        let completions: Vec<_> = d
            .dispatch_all(hosts(&["web1", "web1", "web1"]))
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(completions.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
