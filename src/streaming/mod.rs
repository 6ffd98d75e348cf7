//! Live audio streaming over the duplex WebSocket connection
//!
//! The backend accepts raw binary chunk frames (PCM16 little-endian) on a
//! token-authenticated WebSocket. The client never consumes application-level
//! response frames; only open, error and close matter.
//!
//! Chunks produced after the connection starts closing are dropped, never
//! buffered or replayed.

mod chunker;
mod session;

pub use chunker::{ChunkStreamer, ChunkerConfig};
pub use session::{WsSession, WsSignal};

/// Errors that can occur on the streaming connection.
#[derive(Debug, Clone)]
pub enum StreamingError {
    /// Failed to establish the WebSocket connection.
    ConnectionFailed(String),
    /// Connection was closed while sending.
    SendFailed(String),
    /// Connection was closed unexpectedly.
    Disconnected(String),
}

impl std::fmt::Display for StreamingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamingError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to the streaming server: {}", e)
            }
            StreamingError::SendFailed(e) => write!(f, "Failed to send audio chunk: {}", e),
            StreamingError::Disconnected(e) => write!(f, "Streaming connection lost: {}", e),
        }
    }
}

impl std::error::Error for StreamingError {}
