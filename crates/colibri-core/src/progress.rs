//! Progress reporting and cancellation for long-running work.
//!
//! A [`ProgressSink`] is handed to each stage of a run and forwards events to
//! a channel owned by the run's caller. A [`CancelToken`] is shared between the
//! caller and the running work; it is checked at every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressKind {
    /// The stage started running.
    Started,
    /// A line of progress text.
    Message(String),
    /// A non-fatal diagnostic.
    Warning(String),
    /// Fraction of the stage completed, in `[0, 1]`.
    Fraction(f32),
    /// The stage stopped running, whatever the outcome.
    Finished,
}

/// A progress event emitted by a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Name of the emitting stage.
    pub stage: &'static str,
    /// Event payload.
    pub kind: ProgressKind,
}

/// Sending side of a progress channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<Sender<ProgressEvent>>,
    stage: &'static str,
}

impl ProgressSink {
    /// Creates a sink and the receiver for its events.
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Self {
                sender: Some(sender),
                stage: "",
            },
            receiver,
        )
    }

    /// A sink that discards everything.
    pub fn disconnected() -> Self {
        Self {
            sender: None,
            stage: "",
        }
    }

    /// Returns a sink that tags events with the given stage name.
    #[must_use]
    pub fn for_stage(&self, stage: &'static str) -> Self {
        Self {
            sender: self.sender.clone(),
            stage,
        }
    }

    /// Stage name attached to emitted events.
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Emits an event.
    pub fn emit(&self, kind: ProgressKind) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(ProgressEvent {
                stage: self.stage,
                kind,
            });
        }
    }

    /// Emits a line of progress text.
    pub fn message(&self, line: impl Into<String>) {
        self.emit(ProgressKind::Message(line.into()));
    }

    /// Emits a warning.
    pub fn warning(&self, line: impl Into<String>) {
        self.emit(ProgressKind::Warning(line.into()));
    }

    /// Emits a completion fraction.
    pub fn fraction(&self, fraction: f32) {
        self.emit(ProgressKind::Fraction(fraction.clamp(0.0, 1.0)));
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-canceled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag for a new run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
