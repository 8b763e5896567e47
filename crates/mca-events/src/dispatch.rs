//! Isolate-and-continue callback dispatch.
//!
//! A callback that panics is contained: the panic is logged, counted in the
//! returned [`DispatchReport`], and the remaining callbacks still run.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

/// Outcome of invoking a batch of callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked and were isolated.
    pub failed: usize,
}

impl DispatchReport {
    /// Total callbacks invoked.
    #[must_use]
    pub fn invoked(&self) -> usize {
        self.delivered.saturating_add(self.failed)
    }

    pub(crate) fn record(&mut self, ok: bool) {
        if ok {
            self.delivered = self.delivered.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
    }
}

/// Run `f`, containing any panic.
///
/// Returns `false` if `f` panicked. `context` names the callback in the log.
pub fn call_isolated<F: FnOnce()>(context: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(callback = context, error = %panic_message(&*payload), "Callback panicked; continuing dispatch");
            false
        },
    }
}

/// Invoke every callback in order with isolation, collecting a report.
pub fn dispatch_all<'a, T, I>(context: &str, callbacks: I, mut invoke: impl FnMut(&T)) -> DispatchReport
where
    T: ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut report = DispatchReport::default();
    for callback in callbacks {
        report.record(call_isolated(context, || invoke(callback)));
    }
    report
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
