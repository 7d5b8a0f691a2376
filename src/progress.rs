//! Progress reporting from a synthesis task to whoever is presenting it.
//!
//! Events travel over a single channel per request, in emission order. The
//! terminal [`TaskEvent::Finished`] is always the last event of a request.

use std::sync::mpsc::Sender;

use time::OffsetDateTime;

use crate::orchestrator::SynthesisResult;
use crate::sanitizer::RetryLevel;

/// Local wall-clock time, or UTC when the local offset is unknown.
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// What part of the run an event narrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Started,
    Validating,
    /// An inference call at the given level is about to run.
    Attempt(RetryLevel),
    /// The attempt at the given level produced audio.
    Synthesized(RetryLevel),
    /// The previous attempt failed and the next level will be tried.
    Retrying(RetryLevel),
    Warning,
    /// Work on one chunk of a chunked request.
    Chunk { index: usize, total: usize },
    Writing,
    Concatenating,
    Cleaning,
    Completed,
    Failed,
    Finished,
}

/// Timestamped, human-readable status line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub timestamp: OffsetDateTime,
    pub stage: Stage,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            timestamp: now_local(),
            stage,
            message: message.into(),
        }
    }

    /// `HH:MM:SS` of the event, for log-style display.
    pub fn clock(&self) -> String {
        format!(
            "{:02}:{:02}:{:02}",
            self.timestamp.hour(),
            self.timestamp.minute(),
            self.timestamp.second()
        )
    }
}

/// Everything a task sends back to the foreground.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Progress(ProgressEvent),
    Finished(SynthesisResult),
}

/// Sink for progress events.
///
/// Every event is mirrored to the `log` facade; when a channel is attached the
/// event is also forwarded to it. A disconnected receiver is not an error: the
/// run continues and only the log keeps the narration.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    tx: Option<Sender<TaskEvent>>,
    emitted: usize,
}

impl ProgressReporter {
    /// Reporter that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_channel(tx: Sender<TaskEvent>) -> Self {
        Self {
            tx: Some(tx),
            emitted: 0,
        }
    }

    pub fn emit(&mut self, stage: Stage, message: impl Into<String>) {
        let event = ProgressEvent::new(stage, message);
        match stage {
            Stage::Warning | Stage::Failed => log::warn!("{}", event.message),
            _ => log::info!("{}", event.message),
        }
        self.emitted += 1;
        if let Some(tx) = &self.tx {
            if tx.send(TaskEvent::Progress(event)).is_err() {
                log::debug!("Progress receiver dropped, continuing without it");
                self.tx = None;
            }
        }
    }

    /// Send the terminal result. Consumes the reporter so nothing can follow it.
    pub fn finish(self, result: SynthesisResult) {
        if let Some(tx) = self.tx {
            let _ = tx.send(TaskEvent::Finished(result));
        }
    }

    /// Number of progress events emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::{ProgressReporter, Stage, TaskEvent};
    use crate::orchestrator::SynthesisResult;
    use std::sync::mpsc;

    #[test]
    fn forwards_events_in_order_then_result() {
        let (tx, rx) = mpsc::channel();
        let mut reporter = ProgressReporter::with_channel(tx);
        reporter.emit(Stage::Started, "one");
        reporter.emit(Stage::Validating, "two");
        assert_eq!(reporter.emitted(), 2);
        reporter.finish(SynthesisResult::failed("boom", 0));

        let events: Vec<TaskEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        match (&events[0], &events[1], &events[2]) {
            (TaskEvent::Progress(a), TaskEvent::Progress(b), TaskEvent::Finished(r)) => {
                assert_eq!(a.message, "one");
                assert_eq!(b.message, "two");
                assert!(a.timestamp <= b.timestamp);
                assert!(!r.success);
            }
            other => panic!("unexpected event order: {other:?}"),
        }
    }

    #[test]
    fn survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut reporter = ProgressReporter::with_channel(tx);
        reporter.emit(Stage::Started, "nobody listens");
        reporter.emit(Stage::Finished, "still fine");
        assert_eq!(reporter.emitted(), 2);
    }

    #[test]
    fn clock_is_zero_padded() {
        let event = super::ProgressEvent {
            timestamp: time::macros::datetime!(2025-01-01 03:04:05 UTC),
            stage: Stage::Started,
            message: String::new(),
        };
        assert_eq!(event.clock(), "03:04:05");
    }
}
