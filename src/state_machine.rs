//! State machine for the upload/streaming/polling workflow
//!
//! All transitions go through the `reduce()` function, which returns a new
//! state and a list of effects to execute. Both the poll loop and the live
//! streaming session are driven from here, so the rule that at most one poll
//! tick is ever scheduled lives in exactly one place: no arm of the reducer
//! emits more than one `SchedulePoll`.
//!
//! Events carry the task id of the workflow that produced them. Events whose
//! id does not match the current phase are dropped silently, which makes
//! responses that arrive after cancellation inert.

use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::task::{TaskStatus, TaskVerdict};

/// User-facing message when the upload itself fails.
pub const UPLOAD_ERROR_TEXT: &str =
    "Failed to upload the audio file. Check the connection to the server.";

/// User-facing message when recording could not start.
pub const CAPTURE_ERROR_TEXT: &str =
    "Could not start recording. Check microphone access and the server connection.";

/// User-facing message when the streaming connection drops.
pub const CONNECTION_ERROR_TEXT: &str = "Connection to the server was lost.";

/// User-facing message when polling exhausts its retries.
pub const STATUS_CHECK_FAILED_TEXT: &str =
    "Could not get the task status after several attempts. Check the connection to the server.";

/// Status line shown alongside the retry-exhausted error.
pub const STATUS_CHECK_FAILED_STATUS: &str = "Status check failed";

/// Status line shown alongside an upload error.
pub const UPLOAD_FAILED_STATUS: &str = "Audio upload failed";

/// Observable output of the core: exactly what a presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    pub status_text: String,
    pub error_text: String,
    pub full_protocol_url: String,
    pub short_protocol_url: String,
    pub processing: bool,
    pub recording: bool,
}

/// Poll loop knobs, frozen into the state at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_retries: 3,
        }
    }
}

/// Phase of the status poll loop.
///
/// `Polling` holding a task id means exactly one tick is pending for that
/// task (scheduled or in flight); `Idle` means none is.
#[derive(Debug, Clone, PartialEq)]
pub enum PollPhase {
    Idle,
    Uploading { task: Uuid },
    Polling { task: Uuid, retries: u32 },
}

/// Phase of the live streaming session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    Idle,
    Preparing { task: Uuid },
    Active { task: Uuid },
    Stopping { task: Uuid },
    Stopped,
}

impl SessionPhase {
    fn can_start(&self) -> bool {
        matches!(self, SessionPhase::Idle | SessionPhase::Stopped)
    }
}

/// Authoritative state of one controller instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreState {
    pub poll: PollPhase,
    pub session: SessionPhase,
    pub output: Output,
    pub settings: PollSettings,
}

impl CoreState {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            poll: PollPhase::Idle,
            session: SessionPhase::Idle,
            output: Output::default(),
            settings,
        }
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new(PollSettings::default())
    }
}

/// Events that can trigger state transitions. Entry points come from the
/// controller; the rest are completions reported by the effect runner.
#[derive(Debug, Clone)]
pub enum Event {
    /// User submitted a file for upload.
    UploadFile { path: PathBuf },
    /// User started a live recording.
    StartRecording,
    /// User stopped the live recording.
    StopRecording,
    /// Controller teardown; converges on the same cleanup as explicit stop.
    Shutdown,

    // Upload flow completions
    UploadOk { task: Uuid },
    UploadFail { task: Uuid, err: String },

    // Streaming session lifecycle
    SessionStarted { task: Uuid },
    SessionStartFail { task: Uuid, err: String },
    /// Transport error (with message) or server-initiated close (without).
    ConnectionLost { task: Uuid, err: Option<String> },
    SessionClosed { task: Uuid },

    // Poll tick results
    PollOk { task: Uuid, status: TaskStatus },
    PollFail { task: Uuid, err: String },
}

/// Effects to be executed after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch a token, then POST the file; reply UploadOk/UploadFail.
    BeginUpload { task: Uuid, path: PathBuf },
    /// Acquire token + capture device + connection; reply SessionStarted,
    /// SessionStartFail, and later ConnectionLost.
    OpenSession { task: Uuid },
    /// Tear the session's resources down; reply SessionClosed. Idempotent.
    CloseSession { task: Uuid },
    /// After `delay`, issue one status request; reply PollOk/PollFail.
    SchedulePoll { task: Uuid, delay: Duration },
    /// Cancel the pending tick of the task's poll series, if any.
    CancelPoll { task: Uuid },
    /// Publish the output snapshot; handled in the state loop, not the runner.
    EmitUi,
}

/// Abandon the current poll series, cancelling its pending tick.
fn abandon_poll(next: &mut CoreState, effects: &mut Vec<Effect>) {
    match next.poll {
        PollPhase::Uploading { task } | PollPhase::Polling { task, .. } => {
            effects.push(Effect::CancelPoll { task });
            next.poll = PollPhase::Idle;
        }
        PollPhase::Idle => {}
    }
}

fn or_fallback(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

/// Reducer: `(state, event) -> (next_state, effects)`.
pub fn reduce(state: &CoreState, event: Event) -> (CoreState, Vec<Effect>) {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        // -----------------
        // Entry points
        // -----------------
        Event::UploadFile { path } => {
            if !next.session.can_start() {
                log::warn!("Upload ignored: a recording session is active");
                return (next, effects);
            }
            let task = Uuid::new_v4();
            abandon_poll(&mut next, &mut effects);
            next.output.error_text.clear();
            next.poll = PollPhase::Uploading { task };
            effects.push(Effect::BeginUpload { task, path });
            effects.push(Effect::EmitUi);
        }

        Event::StartRecording => {
            if !next.session.can_start() {
                log::warn!("StartRecording ignored: session already running");
                return (next, effects);
            }
            let task = Uuid::new_v4();
            abandon_poll(&mut next, &mut effects);
            next.output.error_text.clear();
            next.session = SessionPhase::Preparing { task };
            effects.push(Effect::OpenSession { task });
            effects.push(Effect::EmitUi);
        }

        Event::StopRecording => match next.session {
            SessionPhase::Preparing { task } | SessionPhase::Active { task } => {
                next.session = SessionPhase::Stopping { task };
                next.output.recording = false;
                effects.push(Effect::CloseSession { task });
                effects.push(Effect::EmitUi);
            }
            _ => {}
        },

        Event::Shutdown => {
            abandon_poll(&mut next, &mut effects);
            next.output.processing = false;
            match next.session {
                SessionPhase::Preparing { task } | SessionPhase::Active { task } => {
                    next.session = SessionPhase::Stopping { task };
                    next.output.recording = false;
                    effects.push(Effect::CloseSession { task });
                }
                _ => {}
            }
            effects.push(Effect::EmitUi);
        }

        // -----------------
        // Upload flow
        // -----------------
        Event::UploadOk { task } => {
            if next.poll == (PollPhase::Uploading { task }) {
                next.poll = PollPhase::Polling { task, retries: 0 };
                next.output.processing = true;
                effects.push(Effect::SchedulePoll {
                    task,
                    delay: Duration::ZERO,
                });
                effects.push(Effect::EmitUi);
            }
        }

        Event::UploadFail { task, err } => {
            if next.poll == (PollPhase::Uploading { task }) {
                log::error!("Upload failed: {}", err);
                next.poll = PollPhase::Idle;
                next.output.status_text = UPLOAD_FAILED_STATUS.to_string();
                next.output.error_text = or_fallback(err, UPLOAD_ERROR_TEXT);
                next.output.processing = false;
                effects.push(Effect::EmitUi);
            }
        }

        // -----------------
        // Streaming session
        // -----------------
        Event::SessionStarted { task } => {
            if next.session == (SessionPhase::Preparing { task }) {
                next.session = SessionPhase::Active { task };
                next.output.recording = true;
                next.output.processing = true;
                next.poll = PollPhase::Polling { task, retries: 0 };
                effects.push(Effect::SchedulePoll {
                    task,
                    delay: Duration::ZERO,
                });
                effects.push(Effect::EmitUi);
            }
            // A start that lands while Stopping is already being torn down by
            // the pending CloseSession; nothing to do.
        }

        Event::SessionStartFail { task, err } => {
            if next.session == (SessionPhase::Preparing { task }) {
                log::error!("Failed to start recording session: {}", err);
                next.session = SessionPhase::Stopping { task };
                next.output.error_text = or_fallback(err, CAPTURE_ERROR_TEXT);
                next.output.recording = false;
                effects.push(Effect::CloseSession { task });
                effects.push(Effect::EmitUi);
            }
        }

        Event::ConnectionLost { task, err } => match next.session {
            SessionPhase::Preparing { task: current } | SessionPhase::Active { task: current }
                if current == task =>
            {
                if let Some(e) = err {
                    log::warn!("Streaming connection error: {}", e);
                    next.output.error_text = or_fallback(e, CONNECTION_ERROR_TEXT);
                } else {
                    log::info!("Streaming connection closed by server");
                }
                next.session = SessionPhase::Stopping { task };
                next.output.recording = false;
                effects.push(Effect::CloseSession { task });
                effects.push(Effect::EmitUi);
            }
            _ => {}
        },

        Event::SessionClosed { task } => {
            if next.session == (SessionPhase::Stopping { task }) {
                next.session = SessionPhase::Stopped;
                next.output.recording = false;
                effects.push(Effect::EmitUi);
            }
        }

        // -----------------
        // Poll ticks
        // -----------------
        Event::PollOk { task, status } => {
            if !matches!(next.poll, PollPhase::Polling { task: current, .. } if current == task) {
                return (next, effects);
            }

            next.output.status_text = status.task_status.clone();

            match status.verdict() {
                TaskVerdict::Failed { message } => {
                    // Terminal regardless of task_status; the session, if
                    // any, keeps running (only "finished" stops it).
                    next.poll = PollPhase::Idle;
                    next.output.error_text = message;
                    next.output.processing = false;
                    effects.push(Effect::CancelPoll { task });
                    effects.push(Effect::EmitUi);
                }
                TaskVerdict::Finished {
                    full_protocol,
                    short_protocol,
                } => {
                    next.poll = PollPhase::Idle;
                    next.output.full_protocol_url = full_protocol;
                    next.output.short_protocol_url = short_protocol;
                    next.output.processing = false;
                    effects.push(Effect::CancelPoll { task });
                    match next.session {
                        SessionPhase::Preparing { task: session_task }
                        | SessionPhase::Active { task: session_task } => {
                            next.session = SessionPhase::Stopping { task: session_task };
                            next.output.recording = false;
                            effects.push(Effect::CloseSession { task: session_task });
                        }
                        _ => {}
                    }
                    effects.push(Effect::EmitUi);
                }
                TaskVerdict::Pending => {
                    // Retry counter resets on any successful response.
                    next.poll = PollPhase::Polling { task, retries: 0 };
                    effects.push(Effect::SchedulePoll {
                        task,
                        delay: next.settings.interval,
                    });
                    effects.push(Effect::EmitUi);
                }
            }
        }

        Event::PollFail { task, err } => {
            let retries = match next.poll {
                PollPhase::Polling { task: current, retries } if current == task => retries,
                _ => return (next, effects),
            };

            let retries = retries + 1;
            log::warn!(
                "Status check failed (attempt {}/{}): {}",
                retries,
                next.settings.max_retries,
                err
            );

            if retries >= next.settings.max_retries {
                next.poll = PollPhase::Idle;
                next.output.status_text = STATUS_CHECK_FAILED_STATUS.to_string();
                next.output.error_text = STATUS_CHECK_FAILED_TEXT.to_string();
                next.output.processing = false;
                effects.push(Effect::CancelPoll { task });
                effects.push(Effect::EmitUi);
            } else {
                next.poll = PollPhase::Polling { task, retries };
                effects.push(Effect::SchedulePoll {
                    task,
                    delay: next.settings.interval,
                });
                effects.push(Effect::EmitUi);
            }
        }
    }

    (next, effects)
}
