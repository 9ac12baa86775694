//! Utilities to track the progression of a sync

use std::fmt::{Display, Error, Formatter};
use std::sync::Arc;

use crate::error::{BackendError, ErrorReporter};

/// An event that happens during the background sync of a remote container
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// Sync has not started
    NotStarted,
    /// Rows are being fetched from the backend
    Pulling,
    /// Local changes are being sent to the backend
    Pushing{ pending: usize },
    /// Every local change has been acknowledged by the backend
    UpToDate,
    /// The last attempt failed. It will be retried.
    Failed{ message: String },
}

impl Display for SyncEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            SyncEvent::NotStarted => write!(f, "Not started"),
            SyncEvent::Pulling => write!(f, "Fetching tasks..."),
            SyncEvent::Pushing{pending} => write!(f, "Sending {} change(s)...", pending),
            SyncEvent::UpToDate => write!(f, "Synced"),
            SyncEvent::Failed{message} => write!(f, "Sync failed ({}), retrying", message),
        }
    }
}

impl Default for SyncEvent {
    fn default() -> Self {
        Self::NotStarted
    }
}



/// See [`feedback_channel`]
pub type FeedbackSender = tokio::sync::watch::Sender<SyncEvent>;
/// See [`feedback_channel`]
pub type FeedbackReceiver = tokio::sync::watch::Receiver<SyncEvent>;

/// Create a feeback channel, that can be used to retrieve the current state of a background sync
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    tokio::sync::watch::channel(SyncEvent::default())
}



/// Logs what happens during a sync, and forwards it to the feedback channel
pub struct SyncProgress {
    user_id: String,
    reporter: Arc<ErrorReporter>,
    feedback_channel: FeedbackSender,
}
impl SyncProgress {
    pub fn new(user_id: &str, reporter: Arc<ErrorReporter>, channel: FeedbackSender) -> Self {
        Self { user_id: user_id.to_string(), reporter, feedback_channel: channel }
    }

    /// Report a backend failure. Only the first failure of a store lifetime is logged as an error
    pub fn failure(&self, context: &str, err: &BackendError) {
        self.reporter.report(context, err);
        self.feedback(SyncEvent::Failed{ message: err.to_string() });
    }
    /// Log an info
    pub fn info(&self, text: &str) {
        log::info!("[{}] {}", self.user_id, text);
    }
    /// Log a debug message
    pub fn debug(&self, text: &str) {
        log::debug!("[{}] {}", self.user_id, text);
    }
    /// Send an event as a feedback to the listeners (if any).
    pub fn feedback(&self, event: SyncEvent) {
        self.feedback_channel.send_replace(event);
    }
}
