//! Task handles, progress reporting and the context passed to work bodies.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mca_events::{Event, EventBus, EventType, call_isolated};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::TaskError;
use crate::state::{AtomicTaskState, TaskState};

/// Unique identifier of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new random task ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The ID as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Completion fraction, clamped to `0.0..=1.0`.
    pub fraction: f32,
    /// Optional human-readable status.
    pub message: Option<String>,
}

/// Progress listener.
pub type ProgressListener = Arc<dyn Fn(&Progress) + Send + Sync>;

pub(crate) struct HandleInner {
    id: TaskId,
    name: String,
    pub(crate) state: AtomicTaskState,
    pub(crate) token: CancellationToken,
    listeners: Mutex<Vec<ProgressListener>>,
    last_progress: Mutex<Option<Progress>>,
    delivered: AtomicBool,
    done: Notify,
    bus: Option<EventBus>,
}

/// Caller-side view of a submitted task.
///
/// Cloning is cheap; every clone observes the same task.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) inner: Arc<HandleInner>,
}

impl TaskHandle {
    pub(crate) fn new(name: impl Into<String>, bus: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: TaskId::new(),
                name: name.into(),
                state: AtomicTaskState::new(),
                token: CancellationToken::new(),
                listeners: Mutex::new(Vec::new()),
                last_progress: Mutex::new(None),
                delivered: AtomicBool::new(false),
                done: Notify::new(),
                bus,
            }),
        }
    }

    /// Task ID.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    /// Task name given at submission.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.state.load()
    }

    /// Request cancellation. Idempotent and callable from any thread.
    ///
    /// A queued task is cancelled before it starts. A running task sees the
    /// request at its next [`TaskContext::checkpoint`]. After a terminal
    /// state this does nothing.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        debug!(task_id = %self.inner.id, name = %self.inner.name, "Cancellation requested");
        self.inner.token.cancel();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Register a progress listener. Listeners run in registration order on
    /// the reporting thread; a panicking listener is isolated.
    pub fn progress_subscribe<F>(&self, listener: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Report progress. Returns `false` (and notifies nobody) once the task
    /// has reached a terminal state.
    pub fn report_progress(&self, fraction: f32, message: Option<&str>) -> bool {
        if self.state().is_terminal() {
            return false;
        }

        let progress = Progress {
            fraction: if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) },
            message: message.map(str::to_string),
        };
        *self
            .inner
            .last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(progress.clone());

        let listeners: Vec<ProgressListener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            call_isolated("progress listener", || listener(&progress));
        }

        if let Some(bus) = &self.inner.bus {
            let mut event = Event::new(EventType::TaskProgress)
                .with("task_id", self.inner.id.as_str())
                .with("name", self.inner.name.as_str())
                .with("fraction", f64::from(progress.fraction));
            if let Some(message) = &progress.message {
                event = event.with("message", message.as_str());
            }
            bus.publish(event);
        }
        true
    }

    /// Most recent progress report.
    #[must_use]
    pub fn progress(&self) -> Option<Progress> {
        self.inner
            .last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the completion callback has already run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.delivered.load(Ordering::Acquire)
    }

    /// Wait until the task is terminal and its callback has run.
    pub async fn wait(&self) -> TaskState {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_finished() {
                return self.state();
            }
            notified.await;
        }
    }

    /// [`TaskHandle::wait`] bounded by `timeout`. `None` if it elapsed.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    pub(crate) fn mark_delivered(&self) {
        self.inner.delivered.store(true, Ordering::Release);
        self.inner.done.notify_waiters();
    }

    pub(crate) fn publish_started(&self) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(
                Event::new(EventType::TaskStarted)
                    .with("task_id", self.inner.id.as_str())
                    .with("name", self.inner.name.as_str()),
            );
        }
    }

    pub(crate) fn publish_finished(&self, state: TaskState) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(
                Event::new(EventType::TaskFinished)
                    .with("task_id", self.inner.id.as_str())
                    .with("name", self.inner.name.as_str())
                    .with("state", state.to_string()),
            );
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Passed to every work body: cancellation checks and progress reporting.
pub struct TaskContext {
    handle: TaskHandle,
    runtime: tokio::runtime::Handle,
}

impl TaskContext {
    pub(crate) fn new(handle: TaskHandle, runtime: tokio::runtime::Handle) -> Self {
        Self { handle, runtime }
    }

    /// Return [`TaskError::Cancelled`] if cancellation was requested.
    ///
    /// Call before each unit of work and propagate with `?`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cancelled`] once the task has been cancelled.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.handle.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Report progress on the owning task.
    pub fn report_progress(&self, fraction: f32, message: Option<&str>) -> bool {
        self.handle.report_progress(fraction, message)
    }

    /// Run `f` for every unit, checking for cancellation before each one and
    /// reporting fractional progress after each one.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cancelled`] if cancelled between units, or the
    /// first error returned by `f`.
    #[allow(clippy::cast_precision_loss)]
    pub fn for_each_unit<I, F>(&self, units: I, mut f: F) -> Result<(), TaskError>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(I::Item) -> Result<(), TaskError>,
    {
        let units = units.into_iter();
        let total = units.len().max(1) as f32;
        for (i, unit) in units.enumerate() {
            self.checkpoint()?;
            f(unit)?;
            self.report_progress(i.saturating_add(1) as f32 / total, None);
        }
        Ok(())
    }

    /// Sleep on the worker thread, waking early on cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cancelled`] if cancelled while sleeping.
    pub fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        let token = self.handle.inner.token.clone();
        self.runtime.block_on(async move {
            tokio::select! {
                () = token.cancelled() => Err(TaskError::Cancelled),
                () = tokio::time::sleep(duration) => Ok(()),
            }
        })
    }

    /// The handle of the task this context belongs to.
    #[must_use]
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.handle)
            .finish_non_exhaustive()
    }
}
