//! WebSocket session for live chunk streaming
//!
//! One session per recording. The connection is authenticated with a
//! query-carried token obtained from GET /token. A background task drains the
//! read half and reports transport errors and server-initiated closes over a
//! signal channel; everything else the server sends is ignored.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::StreamingError;

/// Connection timeout for the WebSocket handshake.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle signals observed on the read half.
#[derive(Debug, Clone, PartialEq)]
pub enum WsSignal {
    /// Server closed the connection (close frame or clean end of stream).
    Closed,
    /// Transport error; the connection is unusable.
    Error(String),
}

/// Handle to an open streaming connection.
pub struct WsSession {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    /// Wrapped in Option so the effect runner can take it for forwarding.
    signal_rx: Option<mpsc::Receiver<WsSignal>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl WsSession {
    /// Open the duplex connection.
    ///
    /// Single attempt: acquisition failure is terminal for the session, the
    /// caller surfaces it as a capture error and tears down.
    pub async fn connect(stream_url: &str, token: &str) -> Result<Self, StreamingError> {
        let url = format!("{}?token={}", stream_url, token);

        let request = url
            .into_client_request()
            .map_err(|e| StreamingError::ConnectionFailed(e.to_string()))?;

        log::info!("Connecting to streaming server...");

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| StreamingError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| StreamingError::ConnectionFailed(e.to_string()))?;

        log::info!("Streaming connection open");

        let (write, mut read) = ws_stream.split();

        let (signal_tx, signal_rx) = mpsc::channel(8);

        let reader_task = tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Streaming connection closed by server");
                        let _ = signal_tx.send(WsSignal::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {
                        // No application-level frames are consumed.
                    }
                    Some(Err(e)) => {
                        log::warn!("Streaming connection error: {}", e);
                        let _ = signal_tx.send(WsSignal::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            log::debug!("Streaming reader task exiting");
        });

        Ok(Self {
            write,
            signal_rx: Some(signal_rx),
            reader_task,
        })
    }

    /// Take the signal receiver for lifecycle forwarding.
    ///
    /// Returns `None` if already taken.
    pub fn take_signal_receiver(&mut self) -> Option<mpsc::Receiver<WsSignal>> {
        self.signal_rx.take()
    }

    /// Send one audio chunk as a binary frame (PCM16 little-endian).
    pub async fn send_chunk(&mut self, samples: &[i16]) -> Result<(), StreamingError> {
        let mut frame = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            frame.extend_from_slice(&sample.to_le_bytes());
        }

        self.write
            .send(Message::Binary(frame))
            .await
            .map_err(|e| StreamingError::SendFailed(e.to_string()))
    }

    /// Close the connection.
    ///
    /// Safe to call on an already-closing connection; errors from the close
    /// frame are logged and swallowed.
    pub async fn close(mut self) {
        self.reader_task.abort();
        if let Err(e) = self.write.close().await {
            log::debug!("Error closing streaming connection: {}", e);
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        // Close frame is best-effort from Drop; at minimum stop the reader.
        self.reader_task.abort();
    }
}
