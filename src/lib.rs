//! Client-side orchestration for a remote audio-to-protocol service
//!
//! The backend turns audio into a "protocol" document. This crate drives the
//! client half: submit a file (or stream live microphone audio over a
//! WebSocket), then poll the task status at a fixed cadence until the task
//! finishes or fails, with bounded retry on transient poll failures and
//! idempotent teardown of every acquired resource.
//!
//! The workflow is a pure reducer ([`state_machine::reduce`]) plus an effect
//! runner ([`effects::EffectRunner`]); [`Controller`] wires them together and
//! publishes [`Output`] snapshots for a presentation layer to render.

pub mod api;
pub mod audio;
pub mod config;
pub mod controller;
pub mod effects;
pub mod state_machine;
pub mod streaming;
pub mod task;

pub use api::{ApiError, BackendClient, SessionToken};
pub use audio::{CaptureError, CaptureHandle};
pub use config::ClientConfig;
pub use controller::{Controller, ControllerClosed};
pub use effects::{EffectRunner, NetEffectRunner, StubEffectRunner};
pub use state_machine::{
    reduce, CoreState, Effect, Event, Output, PollPhase, PollSettings, SessionPhase,
};
pub use streaming::{ChunkStreamer, ChunkerConfig, StreamingError, WsSession, WsSignal};
pub use task::{TaskStatus, TaskVerdict};
