//! Top-level coordinator
//!
//! Owns the event channel and the state loop task. User actions go in as
//! events, the reducer decides, effects run on the runner, and every `EmitUi`
//! publishes the output snapshot over a watch channel for the presentation
//! layer. Dropping the controller sends `Shutdown`, so teardown converges on
//! the same cleanup path as an explicit stop.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::api::ApiError;
use crate::config::ClientConfig;
use crate::effects::{EffectRunner, NetEffectRunner};
use crate::state_machine::{reduce, CoreState, Effect, Event, Output, PollSettings};

/// The controller's event loop has already shut down.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerClosed;

impl std::fmt::Display for ControllerClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Controller is shut down")
    }
}

impl std::error::Error for ControllerClosed {}

/// Orchestration controller: one instance owns one workflow at a time.
pub struct Controller {
    tx: mpsc::Sender<Event>,
    output_rx: watch::Receiver<Output>,
    loop_task: Option<tokio::task::JoinHandle<()>>,
}

impl Controller {
    /// Build a controller against the real backend.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let runner = NetEffectRunner::new(&config)?;
        Ok(Self::with_runner(&config, runner))
    }

    /// Build a controller with a custom effect runner (tests use the stub).
    pub fn with_runner(config: &ClientConfig, runner: Arc<dyn EffectRunner>) -> Self {
        let settings = PollSettings {
            interval: config.poll_interval(),
            max_retries: config.max_poll_retries,
        };

        let (tx, rx) = mpsc::channel::<Event>(32);
        let (output_tx, output_rx) = watch::channel(Output::default());

        let loop_task = tokio::spawn(run_state_loop(
            CoreState::new(settings),
            rx,
            tx.clone(),
            output_tx,
            runner,
        ));

        Self {
            tx,
            output_rx,
            loop_task: Some(loop_task),
        }
    }

    /// Submit a file for processing and start tracking the task.
    pub async fn upload_file(&self, path: PathBuf) -> Result<(), ControllerClosed> {
        self.send(Event::UploadFile { path }).await
    }

    /// Start a live capture-and-streaming session.
    pub async fn start_recording(&self) -> Result<(), ControllerClosed> {
        self.send(Event::StartRecording).await
    }

    /// Stop the live session. Safe to call when nothing is recording.
    pub async fn stop_recording(&self) -> Result<(), ControllerClosed> {
        self.send(Event::StopRecording).await
    }

    /// Current output snapshot.
    pub fn output(&self) -> Output {
        self.output_rx.borrow().clone()
    }

    /// Watch for output changes.
    pub fn watch_output(&self) -> watch::Receiver<Output> {
        self.output_rx.clone()
    }

    /// Shut down, tearing down any active session and poll series, and wait
    /// for the state loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(Event::Shutdown).await;
        if let Some(task) = self.loop_task.take() {
            let _ = task.await;
        }
    }

    async fn send(&self, event: Event) -> Result<(), ControllerClosed> {
        self.tx.send(event).await.map_err(|_| ControllerClosed)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // Same cleanup path as an explicit stop; a no-op after shutdown().
        let _ = self.tx.try_send(Event::Shutdown);
    }
}

/// Run the main state loop until shutdown.
async fn run_state_loop(
    mut state: CoreState,
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    output_tx: watch::Sender<Output>,
    runner: Arc<dyn EffectRunner>,
) {
    output_tx.send_replace(state.output.clone());
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);
        let shutting_down = matches!(event, Event::Shutdown);

        let (next, effects) = reduce(&state, event);

        if next.poll != state.poll || next.session != state.session {
            log::info!(
                "Transition: poll {:?} -> {:?}, session {:?} -> {:?}",
                state.poll,
                next.poll,
                state.session,
                next.session
            );
        }
        state = next;

        for effect in effects {
            match effect {
                Effect::EmitUi => {
                    output_tx.send_replace(state.output.clone());
                }
                other => runner.spawn(other, tx.clone()),
            }
        }

        if shutting_down {
            break;
        }
    }

    log::info!("State loop ended");
}
