//! Chunk recorder: fixed-interval flushing of captured audio
//!
//! Bridges the capture thread (sync, `try_send`) to the WebSocket (async).
//! Samples accumulate until one flush interval's worth is buffered, then go
//! out as a single binary frame. Empty batches are skipped, and once a send
//! fails the connection is treated as closing: the remainder is dropped with
//! no buffering or replay.

use tokio::sync::mpsc;

use super::session::WsSession;

/// Sizing for the chunk recorder.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Sample rate of the capture device.
    pub sample_rate: u32,
    /// Flush interval; one chunk of audio spans this long.
    pub chunk_interval_ms: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            chunk_interval_ms: 1000,
        }
    }
}

impl ChunkerConfig {
    /// Samples per emitted chunk.
    pub fn samples_per_chunk(&self) -> usize {
        (self.sample_rate as u64 * self.chunk_interval_ms / 1000) as usize
    }
}

/// Streams captured audio to the server in fixed-size chunks.
pub struct ChunkStreamer {
    rx: mpsc::Receiver<Vec<i16>>,
    session: WsSession,
    buffer: Vec<i16>,
    samples_per_chunk: usize,
    chunks_sent: u64,
}

impl ChunkStreamer {
    pub fn new(session: WsSession, rx: mpsc::Receiver<Vec<i16>>, config: ChunkerConfig) -> Self {
        let samples_per_chunk = config.samples_per_chunk();
        log::info!(
            "ChunkStreamer: {} Hz, {} ms chunks = {} samples",
            config.sample_rate,
            config.chunk_interval_ms,
            samples_per_chunk
        );

        Self {
            rx,
            session,
            buffer: Vec::with_capacity(samples_per_chunk * 2),
            samples_per_chunk,
            chunks_sent: 0,
        }
    }

    /// Run until the capture channel closes or the connection starts closing,
    /// then close the connection. Returns the number of chunks sent.
    pub async fn run(mut self) -> u64 {
        while let Some(samples) = self.rx.recv().await {
            if samples.is_empty() {
                continue;
            }
            self.buffer.extend(samples);

            while self.buffer.len() >= self.samples_per_chunk {
                let chunk: Vec<i16> = self.buffer.drain(..self.samples_per_chunk).collect();
                if let Err(e) = self.session.send_chunk(&chunk).await {
                    // Connection is closing; this chunk and everything after
                    // it is dropped.
                    log::debug!("Chunk dropped, connection closing: {}", e);
                    self.session.close().await;
                    return self.chunks_sent;
                }
                self.chunks_sent += 1;
            }
        }

        // Capture stopped. The partial tail is discarded, not replayed.
        if !self.buffer.is_empty() {
            log::debug!(
                "Discarding {} buffered samples at session end",
                self.buffer.len()
            );
        }

        self.session.close().await;
        log::info!("Streaming complete, {} chunks sent", self.chunks_sent);
        self.chunks_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_per_chunk_matches_flush_interval() {
        let config = ChunkerConfig::default();
        // 48000 Hz * 1000 ms = 48000 samples
        assert_eq!(config.samples_per_chunk(), 48000);

        let config = ChunkerConfig {
            sample_rate: 16000,
            chunk_interval_ms: 250,
        };
        assert_eq!(config.samples_per_chunk(), 4000);
    }

    #[tokio::test]
    async fn channel_close_ends_receive_loop() {
        // A closed capture channel must end the loop; the full pipeline needs
        // a live socket, so only the channel half is exercised here.
        let (tx, mut rx) = mpsc::channel::<Vec<i16>>(10);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
