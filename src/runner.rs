//! Background execution of synthesis requests.
//!
//! A [`TaskRunner`] moves an [`Orchestrator`] onto a worker thread, so the
//! caller (a CLI or a UI loop) stays responsive. It drains the returned
//! [`TaskHandle`]'s events at its own pace. At most one request runs at a
//! time; a second submission while one is in flight is rejected.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::orchestrator::{panic_message, Orchestrator, SynthesisResult};
use crate::progress::{ProgressEvent, ProgressReporter, TaskEvent};
use crate::request::SynthesisRequest;
use crate::InferenceGateway;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("A synthesis task is already running. Wait for it to finish.")]
    Busy,
    #[error("Failed to start synthesis worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Clears the busy flag however the worker exits.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-slot executor for synthesis requests.
///
/// Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    busy: Arc<AtomicBool>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run `request` on a worker thread.
    ///
    /// Returns [`RunnerError::Busy`] without touching the request when another
    /// task has not finished yet. The slot frees up before the task's final
    /// [`TaskEvent::Finished`] is sent, so a consumer may submit again as soon
    /// as it sees that event.
    pub fn submit<G>(
        &self,
        mut orchestrator: Orchestrator<G>,
        request: SynthesisRequest,
    ) -> Result<TaskHandle<G>, RunnerError>
    where
        G: InferenceGateway + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Rejected synthesis request: a task is already running");
            return Err(RunnerError::Busy);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let (tx, rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name("synthesis-worker".to_string())
            .spawn(move || {
                let mut reporter = ProgressReporter::with_channel(tx);
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    orchestrator.run(&request, &mut reporter)
                }))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    log::error!("Synthesis worker panicked: {message}");
                    SynthesisResult::failed(
                        format!("Synthesis task aborted unexpectedly: {message}"),
                        0,
                    )
                });
                drop(guard);
                reporter.finish(result);
                orchestrator
            })?;

        Ok(TaskHandle { events: rx, join })
    }
}

/// Foreground end of a running task.
pub struct TaskHandle<G> {
    events: Receiver<TaskEvent>,
    join: JoinHandle<Orchestrator<G>>,
}

impl<G> TaskHandle<G> {
    /// Blocking iterator over the task's events. Ends after
    /// [`TaskEvent::Finished`].
    pub fn events(&self) -> impl Iterator<Item = TaskEvent> + '_ {
        self.events.iter()
    }

    /// Next event if one is ready, for polling from an event loop.
    pub fn try_event(&self) -> Option<TaskEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the task ends, passing each progress event to
    /// `on_progress`. Returns the result and the orchestrator for reuse.
    pub fn wait_with(
        self,
        mut on_progress: impl FnMut(&ProgressEvent),
    ) -> (SynthesisResult, Option<Orchestrator<G>>) {
        let mut result = None;
        for event in self.events.iter() {
            match event {
                TaskEvent::Progress(p) => on_progress(&p),
                TaskEvent::Finished(r) => result = Some(r),
            }
        }
        let orchestrator = self.join.join().ok();
        let result = result.unwrap_or_else(|| {
            SynthesisResult::failed("Synthesis worker exited without a result", 0)
        });
        (result, orchestrator)
    }

    /// Block until the task ends, discarding progress.
    pub fn wait(self) -> SynthesisResult {
        self.wait_with(|_| {}).0
    }
}
