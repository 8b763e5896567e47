//! Bounded task executor.
//!
//! Work bodies run on tokio's blocking pool, at most `workers` at a time.
//! Submissions beyond that wait on a semaphore. [`TaskExecutor::shutdown`]
//! closes the semaphore: queued work is cancelled immediately while work that
//! already holds a permit is left to finish on its own.

use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mca_events::{EventBus, call_isolated, panic_message};
use mca_telemetry::{Latency, Metrics, metrics::names};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult, TaskError};
use crate::handle::{TaskContext, TaskHandle};
use crate::task::{CancellableTask, TaskOutcome};

/// Delivers a task's outcome exactly once.
///
/// Dropping an undelivered completion (e.g. the runtime went away before the
/// task was polled) delivers [`TaskOutcome::Cancelled`].
struct Completion<T, C: FnOnce(TaskOutcome<T>)> {
    handle: TaskHandle,
    callback: Option<C>,
    metrics: Option<Metrics>,
    _outcome: PhantomData<fn(T)>,
}

impl<T, C: FnOnce(TaskOutcome<T>)> Completion<T, C> {
    fn new(handle: TaskHandle, callback: C, metrics: Option<Metrics>) -> Self {
        Self {
            handle,
            callback: Some(callback),
            metrics,
            _outcome: PhantomData,
        }
    }

    fn deliver(&mut self, outcome: TaskOutcome<T>) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let state = outcome.state();
        if !self.handle.inner.state.finish(state) {
            warn!(task_id = %self.handle.id(), "Task already terminal; outcome dropped");
            self.handle.mark_delivered();
            return;
        }

        if let Some(metrics) = &self.metrics {
            let name = match &outcome {
                TaskOutcome::Completed(_) => names::TASK_SUCCESS,
                TaskOutcome::Failed(_) => names::TASK_ERRORS,
                TaskOutcome::Cancelled => names::TASK_CANCELLED,
            };
            metrics.counter(name).inc();
        }

        match &outcome {
            TaskOutcome::Failed(e) => {
                warn!(task_id = %self.handle.id(), name = %self.handle.name(), error = %e, "Task failed");
            },
            _ => {
                debug!(task_id = %self.handle.id(), name = %self.handle.name(), %state, "Task finished");
            },
        }

        call_isolated("task completion callback", || callback(outcome));
        self.handle.publish_finished(state);
        self.handle.mark_delivered();
    }
}

impl<T, C: FnOnce(TaskOutcome<T>)> Drop for Completion<T, C> {
    fn drop(&mut self) {
        if self.callback.is_some() {
            self.deliver(TaskOutcome::Cancelled);
        }
    }
}

struct ExecutorInner {
    workers: usize,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    runtime: Handle,
    metrics: Option<Metrics>,
    bus: Option<EventBus>,
    is_shutdown: AtomicBool,
}

impl ExecutorInner {
    async fn run_one<T, W, C>(&self, handle: TaskHandle, work: W, mut completion: Completion<T, C>)
    where
        T: Send + 'static,
        W: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            () = handle.inner.token.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };

        let Some(permit) = permit else {
            completion.deliver(TaskOutcome::Cancelled);
            return;
        };
        if self.shutdown.is_cancelled() || handle.is_cancelled() || !handle.inner.state.start() {
            drop(permit);
            completion.deliver(TaskOutcome::Cancelled);
            return;
        }

        debug!(task_id = %handle.id(), name = %handle.name(), "Task started");
        handle.publish_started();
        let ctx = TaskContext::new(handle.clone(), self.runtime.clone());
        let latency = self.metrics.as_ref().map(|m| m.latency(names::TASK_SECONDS));

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let timer = latency.as_ref().map(Latency::start);
            let result = catch_unwind(AssertUnwindSafe(|| work(&ctx)));
            drop(timer);

            let outcome = match result {
                Ok(result) => TaskOutcome::from_result(result),
                Err(payload) => TaskOutcome::Failed(TaskError::Panicked(panic_message(&*payload))),
            };
            completion.deliver(outcome);
        })
        .await;

        if let Err(e) = joined {
            warn!(task_id = %handle.id(), error = %e, "Task worker did not complete");
        }
    }
}

/// Builder for [`TaskExecutor`].
#[derive(Debug)]
pub struct ExecutorBuilder {
    workers: usize,
    runtime: Option<Handle>,
    metrics: Option<Metrics>,
    bus: Option<EventBus>,
}

impl ExecutorBuilder {
    /// Run work on `runtime` instead of the ambient one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Record task counters and latency in `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publish progress and completion events on `bus`.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the executor.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidWorkerCount`] for zero workers and
    /// [`ExecutorError::NoRuntime`] if no runtime was given and none is
    /// current.
    pub fn build(self) -> ExecutorResult<TaskExecutor> {
        if self.workers == 0 {
            return Err(ExecutorError::InvalidWorkerCount(self.workers));
        }
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?,
        };

        info!(workers = self.workers, "Task executor started");
        Ok(TaskExecutor {
            inner: Arc::new(ExecutorInner {
                workers: self.workers,
                semaphore: Arc::new(Semaphore::new(self.workers)),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                runtime,
                metrics: self.metrics,
                bus: self.bus,
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }
}

/// Bounded worker pool with completion callbacks.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    /// Executor with `workers` concurrent work bodies on the current runtime.
    ///
    /// # Errors
    ///
    /// See [`ExecutorBuilder::build`].
    pub fn new(workers: usize) -> ExecutorResult<Self> {
        Self::builder(workers).build()
    }

    /// Start building an executor.
    #[must_use]
    pub fn builder(workers: usize) -> ExecutorBuilder {
        ExecutorBuilder {
            workers,
            runtime: None,
            metrics: None,
            bus: None,
        }
    }

    /// Submit a work body. `on_complete` runs exactly once with the outcome.
    pub fn submit<T, W, C>(&self, work: W, on_complete: C) -> TaskHandle
    where
        T: Send + 'static,
        W: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        self.submit_named("task", work, on_complete)
    }

    /// [`TaskExecutor::submit`] with a name for logs and events.
    ///
    /// After [`TaskExecutor::shutdown`] the returned handle is already
    /// cancelled and `on_complete` has been called on this thread.
    pub fn submit_named<T, W, C>(&self, name: impl Into<String>, work: W, on_complete: C) -> TaskHandle
    where
        T: Send + 'static,
        W: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
        C: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let handle = TaskHandle::new(name, self.inner.bus.clone());
        let mut completion = Completion::new(handle.clone(), on_complete, self.inner.metrics.clone());

        if self.is_shutdown() {
            debug!(task_id = %handle.id(), "Submission after shutdown; cancelling");
            completion.deliver(TaskOutcome::Cancelled);
            return handle;
        }

        let inner = Arc::clone(&self.inner);
        let task = handle.clone();
        self.inner.tracker.spawn_on(
            async move { inner.run_one(task, work, completion).await },
            &self.inner.runtime,
        );
        handle
    }

    /// Submit a [`CancellableTask`].
    pub fn submit_task<K, C>(&self, task: K, on_complete: C) -> TaskHandle
    where
        K: CancellableTask,
        C: FnOnce(TaskOutcome<K::Output>) + Send + 'static,
    {
        let name = task.name().to_string();
        let mut task = task;
        self.submit_named(name, move |ctx| task.run(ctx), on_complete)
    }

    /// Stop accepting work and cancel everything still queued.
    ///
    /// Does not wait: work already running is abandoned to finish on its
    /// own. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.is_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.semaphore.close();
        self.inner.tracker.close();
        info!(
            workers = self.inner.workers,
            outstanding = self.inner.tracker.len(),
            "Task executor shut down"
        );
    }

    /// [`TaskExecutor::shutdown`], then wait up to `timeout` for in-flight
    /// work. Returns `true` if everything finished in time.
    pub async fn shutdown_and_drain(&self, timeout: Duration) -> bool {
        self.shutdown();
        let drained = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(outstanding = self.inner.tracker.len(), "Drain timed out; abandoning in-flight tasks");
        }
        drained
    }

    /// Whether [`TaskExecutor::shutdown`] was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Acquire)
    }

    /// Configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Tasks submitted but not yet finished.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("workers", &self.inner.workers)
            .field("outstanding", &self.outstanding())
            .field("is_shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
