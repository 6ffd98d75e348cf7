//! Microphone capture for live streaming
//!
//! Captures from the default input device with CPAL and forwards converted
//! i16 sample batches to the chunk streamer over a tokio channel.

pub mod capture;

pub use capture::{start_capture, CaptureError, CaptureHandle};
