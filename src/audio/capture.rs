//! CPAL capture on a dedicated audio thread
//!
//! CPAL streams are not `Send`, so the stream lives on its own thread for its
//! whole lifetime. The thread converts every batch to i16 and pushes it into
//! a tokio channel with `try_send`; a full channel drops the batch rather
//! than blocking the audio callback.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, StreamConfig};
use tokio::sync::mpsc;

/// Timeout for the capture thread to report that the stream is running.
const CAPTURE_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while acquiring the capture device.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    /// The capture thread never confirmed startup.
    StartTimeout,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::StartTimeout => write!(f, "Audio capture did not start in time"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Handle to a running capture thread.
///
/// `stop()` is idempotent; dropping the handle stops capture as well. Joining
/// the thread drops the CPAL stream, which releases the device.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        // A closed channel means the thread already exited; both are fine.
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Capture thread panicked during shutdown");
            } else {
                log::info!("Capture device released");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Acquire the default input device and start capturing.
///
/// Blocks until the stream is confirmed running (or fails); call from a
/// blocking context. Returns the handle and the device sample rate, which the
/// chunk streamer needs to size its flush interval.
pub fn start_capture(
    samples_tx: mpsc::Sender<Vec<i16>>,
) -> Result<(CaptureHandle, u32), CaptureError> {
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, CaptureError>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || run_capture_thread(samples_tx, ready_tx, stop_rx))
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    match ready_rx.recv_timeout(CAPTURE_READY_TIMEOUT) {
        Ok(Ok(sample_rate)) => Ok((
            CaptureHandle {
                stop_tx,
                thread: Some(thread),
            },
            sample_rate,
        )),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            // Thread is wedged; detach it and report the timeout.
            let _ = stop_tx.send(());
            Err(CaptureError::StartTimeout)
        }
    }
}

fn run_capture_thread(
    samples_tx: mpsc::Sender<Vec<i16>>,
    ready_tx: std_mpsc::Sender<Result<u32, CaptureError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let host = cpal::default_host();

    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(CaptureError::NoInputDevice));
            return;
        }
    };

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = match device.default_input_config() {
        Ok(c) => c,
        Err(_) => {
            let _ = ready_tx.send(Err(CaptureError::NoSupportedConfig));
            return;
        }
    };

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;

    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, samples_tx, err_fn),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, samples_tx, err_fn),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, samples_tx, err_fn),
        _ => Err(CaptureError::NoSupportedConfig),
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::StreamCreationFailed(format!(
            "Failed to start stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(sample_rate));
    log::info!("Capture started at {} Hz", sample_rate);

    // Keep the stream alive until stop is requested or the handle is gone.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples_tx: mpsc::Sender<Vec<i16>>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if data.is_empty() {
                    return;
                }
                let batch: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                if samples_tx.try_send(batch).is_err() {
                    // Receiver gone or backed up; drop the batch.
                    log::debug!("Dropping capture batch: channel unavailable");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))
}

/// Convert any sample type to i16 for the wire format.
fn sample_to_i16<T>(sample: T) -> i16
where
    f32: FromSample<T>,
{
    let f32_sample = f32::from_sample(sample);
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-1.0f32), -i16::MAX);

        // Clamping
        assert_eq!(sample_to_i16(2.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn capture_error_display() {
        assert!(CaptureError::NoInputDevice.to_string().contains("input device"));
        let err = CaptureError::StreamCreationFailed("busy".to_string());
        assert!(err.to_string().contains("busy"));
    }
}
