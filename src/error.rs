//! Errors reported by sync backends, and the policy used to log them

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// An error returned by a [`TaskBackend`](crate::traits::TaskBackend).
///
/// Its fields mirror the error objects returned by the REST backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl BackendError {
    pub fn new<S: ToString>(message: S) -> Self {
        Self { message: message.to_string(), ..Self::default() }
    }

    pub fn with_code<S: ToString>(mut self, code: S) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let code = err.status().map(|status| status.as_u16().to_string());
        Self { message: err.to_string(), code, details: None, hint: None }
    }
}

impl From<url::ParseError> for BackendError {
    fn from(err: url::ParseError) -> Self {
        Self::new(format!("Invalid URL: {}", err))
    }
}


/// Logs sync errors. Only the first error of a store lifetime makes it to the `error` log level.
///
/// One instance is shared by a [`TaskStore`](crate::store::TaskStore) and every remote container it builds.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    has_logged: AtomicBool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an error has been logged already
    pub fn has_logged(&self) -> bool {
        self.has_logged.load(Ordering::SeqCst)
    }

    /// Report an error. Returns `true` in case it has been logged at the `error` level
    pub fn report(&self, context: &str, err: &BackendError) -> bool {
        if self.has_logged.swap(true, Ordering::SeqCst) {
            log::debug!("Task sync error while {} (already reported once): {}", context, err);
            return false;
        }

        log::error!("Task sync error occurred while {}: {}", context, err);
        log::error!("Error details: message={:?}, code={:?}, details={:?}, hint={:?}",
            err.message, err.code, err.details, err.hint);
        true
    }
}
