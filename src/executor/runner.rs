// Runs one work item on a dedicated worker under a deadline

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::{Completion, Outcome, OutcomeSlot};
use super::task::{TaskSpec, WorkItem};
use super::RemoteTask;
use crate::output::errors::FanoutError;

/// Executes single work items, abandoning any that outlive the deadline.
///
/// Each item gets its own OS worker thread, its own cancellation token
/// and its own [`OutcomeSlot`]. The worker and the deadline race to fill the
/// slot; whichever gets there first is the item's outcome. A worker that
/// loses the race keeps running until it notices the token (or finishes on
/// its own) and its result is dropped.
#[derive(Clone)]
pub struct TaskRunner {
    task: Arc<dyn RemoteTask>,
    spec: Arc<TaskSpec>,
    timeout: Duration,
}

impl TaskRunner {
    pub fn new(task: Arc<dyn RemoteTask>, spec: Arc<TaskSpec>) -> Result<Self, FanoutError> {
        if spec.timeout.is_zero() {
            return Err(FanoutError::config(
                "Timeout must be greater than zero",
                Some("Every host needs a deadline; pass --timeout"),
            ));
        }
        let timeout = spec.timeout;
        Ok(TaskRunner {
            task,
            spec,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `item` to an outcome. Returns no later than the deadline plus
    /// scheduling overhead.
    ///
    /// The deadline only covers the item's own worker thread; workers
    /// abandoned by earlier items never delay this one.
    pub async fn run(&self, item: WorkItem) -> Outcome {
        let slot = Arc::new(OutcomeSlot::new());
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let spawned = {
            let task = self.task.clone();
            let spec = self.spec.clone();
            let slot = slot.clone();
            let cancel = cancel.clone();
            let item = item.clone();
            let runtime = Handle::current();

            thread::Builder::new()
                .name("fanout-worker".to_string())
                .spawn(move || {
                    let _runtime = runtime.enter();
                    let result =
                        panic::catch_unwind(AssertUnwindSafe(|| task.execute(&item, &spec, &cancel)));
                    let outcome = match result {
                        Ok(Ok(text)) => Outcome::success(text),
                        Ok(Err(e)) => Outcome::failure(&item, e.to_string()),
                        Err(payload) => {
                            let message = format!("task panicked: {}", panic_message(&*payload));
                            warn!(host = %item, %message, "task did not complete");
                            Outcome::failure(&item, message)
                        }
                    };
                    if slot.fill(outcome).is_err() {
                        debug!(host = %item, "discarding result of abandoned task");
                    }
                    done_tx.send(()).ok();
                })
        };

        if let Err(e) = spawned {
            warn!(host = %item, error = %e, "failed to start worker thread");
            return slot.resolve(Outcome::failure(
                &item,
                format!("failed to start worker thread: {}", e),
            ));
        }

        match tokio::time::timeout(self.timeout, done_rx).await {
            Ok(_) => slot.resolve(Outcome::failure(&item, "task finished without a result")),
            Err(_elapsed) => {
                // The worker is detached, not killed
                cancel.cancel();
                let outcome = slot.resolve(Outcome::timeout(&item));
                if outcome.is_timeout() {
                    debug!(host = %item, timeout_secs = self.timeout.as_secs_f64(), "task abandoned after timeout");
                }
                outcome
            }
        }
    }

    /// Like [`run`](Self::run), recording where the item sat in the input and
    /// how long it took
    pub async fn run_indexed(&self, index: usize, item: WorkItem) -> Completion {
        let start = Instant::now();
        let outcome = self.run(item.clone()).await;
        Completion {
            index,
            item,
            outcome,
            elapsed: start.elapsed(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecError;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn spec(timeout: Duration) -> Arc<TaskSpec> {
        Arc::new(TaskSpec::new("true").with_timeout(timeout))
    }

    fn runner<F>(timeout: Duration, f: F) -> TaskRunner
    where
        F: Fn(&WorkItem, &TaskSpec, &CancellationToken) -> Result<String, ExecError>
            + Send
            + Sync
            + 'static,
    {
        TaskRunner::new(Arc::new(f), spec(timeout)).unwrap()
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let task = |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| -> Result<String, ExecError> {
            Ok(String::new())
        };
        let result = TaskRunner::new(Arc::new(task), spec(Duration::ZERO));
        assert!(matches!(result, Err(FanoutError::Config { .. })));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let runner = runner(
            Duration::from_secs(5),
            |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| Ok(format!("{}-ok", item)),
        );

        let outcome = runner.run(WorkItem::new("a")).await;
        assert_eq!(outcome, Outcome::success("a-ok"));
    }

    #[tokio::test]
    async fn test_task_error_becomes_connection_failure() {
        let runner = runner(
            Duration::from_secs(5),
            |item: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                Err(ExecError::Connect {
                    host: item.to_string(),
                    message: "Connection refused".to_string(),
                })
            },
        );

        let outcome = runner.run(WorkItem::new("web1")).await;
        assert_eq!(
            outcome,
            Outcome::failure(
                &WorkItem::new("web1"),
                "Unable to connect to web1: Connection refused"
            )
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_connection_failure() {
        let runner = runner(
            Duration::from_secs(5),
            |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| -> Result<String, ExecError> {
                panic!("socket exploded")
            },
        );

        match runner.run(WorkItem::new("web1")).await {
            Outcome::ConnectionFailure { host, message } => {
                assert_eq!(host, "web1");
                assert!(message.contains("socket exploded"));
            }
            other => panic!("expected connection failure, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_returns_without_waiting_for_task() {
        let runner = runner(
            Duration::from_millis(100),
            |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| {
                std::thread::sleep(Duration::from_secs(2));
                Ok("too late".to_string())
            },
        );

        let start = Instant::now();
        let outcome = runner.run(WorkItem::new("slow")).await;

        assert_eq!(outcome, Outcome::timeout(&WorkItem::new("slow")));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_signals_cancellation() {
        let observed = Arc::new(AtomicBool::new(false));
        let seen = observed.clone();

        let runner = runner(
            Duration::from_millis(50),
            move |item: &WorkItem, _: &TaskSpec, cancel: &CancellationToken| {
                let deadline = Instant::now() + Duration::from_secs(5);
                while Instant::now() < deadline {
                    if cancel.is_cancelled() {
                        seen.store(true, Ordering::SeqCst);
                        return Err(ExecError::Cancelled {
                            host: item.to_string(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok("finished".to_string())
            },
        );

        let outcome = runner.run(WorkItem::new("h")).await;
        assert!(outcome.is_timeout());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_indexed_records_position() {
        let runner = runner(
            Duration::from_secs(5),
            |_: &WorkItem, _: &TaskSpec, _: &CancellationToken| Ok("x".to_string()),
        );

        let completion = runner.run_indexed(7, WorkItem::new("h7")).await;
        assert_eq!(completion.index, 7);
        assert_eq!(completion.item.as_str(), "h7");
        assert!(completion.outcome.is_success());
    }
}
