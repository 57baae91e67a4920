//! The write side of a subscriber's response stream

use crate::error::SessionError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Where a session writes its frames.
///
/// Implementations may buffer in `write`; `flush` must push everything
/// written so far towards the client. Transforms such as compression wrap
/// another sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Write a chunk of the stream
    async fn write(&mut self, chunk: Bytes) -> Result<(), SessionError>;

    /// Push buffered output to the client
    async fn flush(&mut self) -> Result<(), SessionError>;

    /// Resolves once the client can no longer receive anything
    async fn closed(&self);

    /// Finish the stream after the last frame
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Sink feeding a streaming [`ResponseBody`](crate::ResponseBody).
///
/// hyper writes each chunk it pulls from the body as one chunked-encoding
/// frame and flushes it, so `write` already delivers and `flush` is a no-op.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Wrap the sender half of a body channel
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SessionError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| SessionError::write_failed("response body dropped"))
    }

    async fn flush(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
