//! Effect runner for the upload/streaming/polling workflow
//!
//! Executes the effects produced by the state machine against the real
//! backend. One runner owns the single set of session resources (capture
//! thread, WebSocket, chunker task) and the cancellation tokens of the poll
//! series; the state machine only ever sees completion events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ApiError, BackendClient};
use crate::audio::{start_capture, CaptureHandle};
use crate::config::ClientConfig;
use crate::state_machine::{Effect, Event};
use crate::streaming::{ChunkStreamer, ChunkerConfig, WsSignal};
use crate::task::TaskStatus;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Resources of one live streaming session, released together.
struct SessionHandles {
    task: Uuid,
    capture: Option<CaptureHandle>,
    chunker_task: Option<tokio::task::JoinHandle<u64>>,
    signal_task: Option<tokio::task::JoinHandle<()>>,
}

/// The session slot plus bookkeeping for the open/close race: a close that
/// lands while the session is still being opened is recorded in
/// `closed_early` and consumed by the opener, which then rolls back instead
/// of committing.
#[derive(Default)]
struct SessionSlot {
    active: Option<SessionHandles>,
    opening: HashSet<Uuid>,
    closed_early: HashSet<Uuid>,
}

/// Real effect runner: backend HTTP, CPAL capture, WebSocket streaming.
pub struct NetEffectRunner {
    api: Arc<BackendClient>,
    stream_url: String,
    chunk_interval_ms: u64,
    slot: Arc<Mutex<SessionSlot>>,
    poll_tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl NetEffectRunner {
    pub fn new(config: &ClientConfig) -> Result<Arc<Self>, ApiError> {
        let api = Arc::new(BackendClient::new(config)?);
        Ok(Arc::new(Self {
            api,
            stream_url: config.stream_url.clone(),
            chunk_interval_ms: config.chunk_interval_ms,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            poll_tokens: Arc::new(Mutex::new(HashMap::new())),
        }))
    }
}

/// Abort the session's async tasks and hand back the capture handle for the
/// blocking device release.
fn release_tasks(mut handles: SessionHandles) -> Option<CaptureHandle> {
    if let Some(task) = handles.signal_task.take() {
        task.abort();
    }
    if let Some(task) = handles.chunker_task.take() {
        // Dropping the chunker drops the WebSocket session, which aborts its
        // reader and closes the socket.
        task.abort();
    }
    handles.capture.take()
}

impl EffectRunner for NetEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::BeginUpload { task, path } => {
                let api = self.api.clone();
                tokio::spawn(async move {
                    let result = async {
                        api.fetch_token().await?;
                        api.upload_audio(&path).await
                    }
                    .await;

                    let event = match result {
                        Ok(()) => Event::UploadOk { task },
                        Err(e) => Event::UploadFail {
                            task,
                            err: e.to_string(),
                        },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::SchedulePoll { task, delay } => {
                let api = self.api.clone();
                let token = {
                    let mut tokens = self.poll_tokens.lock().unwrap();
                    tokens
                        .entry(task)
                        .or_insert_with(CancellationToken::new)
                        .clone()
                };

                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    let result = tokio::select! {
                        _ = token.cancelled() => return,
                        r = api.task_status() => r,
                    };

                    let event = match result {
                        Ok(status) => Event::PollOk { task, status },
                        Err(e) => Event::PollFail {
                            task,
                            err: e.to_string(),
                        },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::CancelPoll { task } => {
                // Synchronous: the pending tick is cut short before this
                // call returns.
                let mut tokens = self.poll_tokens.lock().unwrap();
                if let Some(token) = tokens.remove(&task) {
                    token.cancel();
                }
            }

            Effect::OpenSession { task } => {
                let api = self.api.clone();
                let stream_url = self.stream_url.clone();
                let chunk_interval_ms = self.chunk_interval_ms;
                let slot = self.slot.clone();

                slot.lock().unwrap().opening.insert(task);

                tokio::spawn(async move {
                    // Helper shared by the failure paths: clear the opening
                    // marker and report the error.
                    async fn fail(
                        slot: &Arc<Mutex<SessionSlot>>,
                        tx: &mpsc::Sender<Event>,
                        task: Uuid,
                        err: String,
                    ) {
                        {
                            let mut s = slot.lock().unwrap();
                            s.opening.remove(&task);
                            s.closed_early.remove(&task);
                        }
                        let _ = tx.send(Event::SessionStartFail { task, err }).await;
                    }

                    let token = match api.fetch_token().await {
                        Ok(t) => t,
                        Err(e) => {
                            fail(&slot, &tx, task, e.to_string()).await;
                            return;
                        }
                    };

                    let (samples_tx, samples_rx) = mpsc::channel::<Vec<i16>>(100);

                    // start_capture blocks on stream startup confirmation.
                    let capture_result =
                        tokio::task::spawn_blocking(move || start_capture(samples_tx)).await;
                    let (capture, sample_rate) = match capture_result {
                        Ok(Ok(pair)) => pair,
                        Ok(Err(e)) => {
                            fail(&slot, &tx, task, e.to_string()).await;
                            return;
                        }
                        Err(e) => {
                            fail(&slot, &tx, task, format!("Capture task failed: {}", e)).await;
                            return;
                        }
                    };

                    let mut ws = match crate::streaming::WsSession::connect(
                        &stream_url,
                        &token.token,
                    )
                    .await
                    {
                        Ok(ws) => ws,
                        Err(e) => {
                            // Release the device before reporting.
                            let mut capture = capture;
                            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
                            fail(&slot, &tx, task, e.to_string()).await;
                            return;
                        }
                    };

                    let signal_task = ws.take_signal_receiver().map(|mut rx| {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            while let Some(signal) = rx.recv().await {
                                let event = match signal {
                                    WsSignal::Closed => Event::ConnectionLost { task, err: None },
                                    WsSignal::Error(e) => Event::ConnectionLost {
                                        task,
                                        err: Some(e),
                                    },
                                };
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        })
                    });

                    let chunker = ChunkStreamer::new(
                        ws,
                        samples_rx,
                        ChunkerConfig {
                            sample_rate,
                            chunk_interval_ms,
                        },
                    );
                    let chunker_task = tokio::spawn(chunker.run());

                    let handles = SessionHandles {
                        task,
                        capture: Some(capture),
                        chunker_task: Some(chunker_task),
                        signal_task,
                    };

                    // Commit, unless a close raced the open; then roll back.
                    let rollback = {
                        let mut s = slot.lock().unwrap();
                        s.opening.remove(&task);
                        if s.closed_early.remove(&task) {
                            Some(handles)
                        } else {
                            s.active = Some(handles);
                            None
                        }
                    };

                    if let Some(handles) = rollback {
                        log::info!("Session {} closed while opening, rolling back", task);
                        if let Some(mut capture) = release_tasks(handles) {
                            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
                        }
                        return;
                    }

                    let _ = tx.send(Event::SessionStarted { task }).await;
                });
            }

            Effect::CloseSession { task } => {
                let taken = {
                    let mut s = self.slot.lock().unwrap();
                    match s.active.take() {
                        Some(handles) if handles.task == task => Some(handles),
                        Some(other) => {
                            s.active = Some(other);
                            None
                        }
                        None => {
                            if s.opening.contains(&task) {
                                // Still opening; the opener will roll back.
                                s.closed_early.insert(task);
                            }
                            None
                        }
                    }
                };

                let capture = taken.and_then(release_tasks);

                tokio::spawn(async move {
                    if let Some(mut capture) = capture {
                        let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
                    }
                    let _ = tx.send(Event::SessionClosed { task }).await;
                });
            }

            Effect::EmitUi => {
                // Handled in the state loop, not here.
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

/// Scripted effect runner for tests: no network, no devices.
///
/// Poll results are served from a queue, one per scheduled tick; upload and
/// session opening can be forced to fail.
pub struct StubEffectRunner {
    poll_results: Mutex<std::collections::VecDeque<Result<TaskStatus, String>>>,
    polls_served: std::sync::atomic::AtomicUsize,
    fail_upload: bool,
    fail_open: bool,
    drop_connection_after_open: bool,
}

impl StubEffectRunner {
    pub fn new(poll_results: Vec<Result<TaskStatus, String>>) -> Arc<Self> {
        Arc::new(Self::unwrapped(poll_results))
    }

    pub fn failing_upload() -> Arc<Self> {
        let mut stub = Self::unwrapped(Vec::new());
        stub.fail_upload = true;
        Arc::new(stub)
    }

    pub fn failing_open() -> Arc<Self> {
        let mut stub = Self::unwrapped(Vec::new());
        stub.fail_open = true;
        Arc::new(stub)
    }

    pub fn dropping_connection(poll_results: Vec<Result<TaskStatus, String>>) -> Arc<Self> {
        let mut stub = Self::unwrapped(poll_results);
        stub.drop_connection_after_open = true;
        Arc::new(stub)
    }

    fn unwrapped(poll_results: Vec<Result<TaskStatus, String>>) -> Self {
        Self {
            poll_results: Mutex::new(poll_results.into_iter().collect()),
            polls_served: std::sync::atomic::AtomicUsize::new(0),
            fail_upload: false,
            fail_open: false,
            drop_connection_after_open: false,
        }
    }

    /// Number of poll ticks that were actually scheduled.
    pub fn polls_served(&self) -> usize {
        self.polls_served.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::BeginUpload { task, .. } => {
                let fail = self.fail_upload;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let event = if fail {
                        Event::UploadFail {
                            task,
                            err: "connection refused".to_string(),
                        }
                    } else {
                        Event::UploadOk { task }
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::OpenSession { task } => {
                let fail = self.fail_open;
                let drop_connection = self.drop_connection_after_open;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if fail {
                        let _ = tx
                            .send(Event::SessionStartFail {
                                task,
                                err: "No audio input device found".to_string(),
                            })
                            .await;
                        return;
                    }
                    let _ = tx.send(Event::SessionStarted { task }).await;

                    if drop_connection {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        let _ = tx.send(Event::ConnectionLost { task, err: None }).await;
                    }
                });
            }

            Effect::CloseSession { task } => {
                tokio::spawn(async move {
                    let _ = tx.send(Event::SessionClosed { task }).await;
                });
            }

            Effect::SchedulePoll { task, delay } => {
                self.polls_served
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let next = self.poll_results.lock().unwrap().pop_front();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let event = match next {
                        Some(Ok(status)) => Event::PollOk { task, status },
                        Some(Err(err)) => Event::PollFail { task, err },
                        None => Event::PollFail {
                            task,
                            err: "script exhausted".to_string(),
                        },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::CancelPoll { .. } => {}

            Effect::EmitUi => {
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}
