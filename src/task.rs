//! Task status wire model for the /taskstatus endpoint
//!
//! The backend reports one audio-processing task per authenticated session.
//! Each poll tick replaces the previous `TaskStatus` wholesale; nothing here
//! is mutated in place.

use serde::Deserialize;

/// Raw status payload returned by GET /taskstatus.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskStatus {
    /// Free-form progress string ("processing", "finished", ...).
    #[serde(default)]
    pub task_status: String,
    /// Outcome marker ("Pending", "Error", ...).
    #[serde(default)]
    pub status: String,
    /// Server-supplied failure message, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// URL of the full protocol document, set once finished.
    #[serde(default)]
    pub full_protocol: Option<String>,
    /// URL of the short protocol document, set once finished.
    #[serde(default)]
    pub short_protocol: Option<String>,
}

/// Interpretation of a status payload for one poll tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskVerdict {
    /// Task still running; keep polling.
    Pending,
    /// Task finished; both result URLs (empty string when absent).
    Finished {
        full_protocol: String,
        short_protocol: String,
    },
    /// Task reported failure; carries a non-empty user-facing message.
    Failed { message: String },
}

/// Fallback when the server reports an error without a message.
const GENERIC_TASK_ERROR: &str = "The server reported an unknown error";

impl TaskStatus {
    /// Classify this payload.
    ///
    /// The error check runs strictly before the finished check: a response
    /// carrying `status == "Error"` is terminal even if `task_status`
    /// already reads "finished".
    pub fn verdict(&self) -> TaskVerdict {
        if self.status == "Error" {
            let message = match &self.error {
                Some(msg) if !msg.is_empty() => msg.clone(),
                _ => GENERIC_TASK_ERROR.to_string(),
            };
            return TaskVerdict::Failed { message };
        }

        if self.task_status == "finished" {
            return TaskVerdict::Finished {
                full_protocol: self.full_protocol.clone().unwrap_or_default(),
                short_protocol: self.short_protocol.clone().unwrap_or_default(),
            };
        }

        TaskVerdict::Pending
    }
}
