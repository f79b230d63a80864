use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{chunk::StreamChunk, error::TransportError, relay::AbortReason};

/// Push side of a relay: the outbound connection to one client.
#[async_trait]
pub trait ClientWriter: Send {
    /// Hand one chunk to the transport. Returns once the transport accepted it.
    async fn write_chunk(&mut self, chunk: &StreamChunk) -> Result<(), TransportError>;

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Emit the success terminal marker (if the framing has one) and flush.
    async fn finish(&mut self) -> Result<(), TransportError> {
        self.flush().await
    }

    /// Best-effort failure terminal marker.
    async fn abort(&mut self, _reason: &AbortReason) -> Result<(), TransportError> {
        Ok(())
    }

    /// Resolves once the client is known to be gone. Transports without
    /// disconnect detection never resolve.
    async fn closed(&mut self) {
        futures::future::pending::<()>().await
    }
}

#[async_trait]
impl<W: ClientWriter + ?Sized> ClientWriter for Box<W> {
    async fn write_chunk(&mut self, chunk: &StreamChunk) -> Result<(), TransportError> {
        (**self).write_chunk(chunk).await
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush().await
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        (**self).finish().await
    }

    async fn abort(&mut self, reason: &AbortReason) -> Result<(), TransportError> {
        (**self).abort(reason).await
    }

    async fn closed(&mut self) {
        (**self).closed().await
    }
}

/// Writes raw chunk payloads to any tokio [`AsyncWrite`] (stdout, files, sockets).
pub struct AsyncWriteClient<W> {
    inner: W,
}

impl<W> AsyncWriteClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> ClientWriter for AsyncWriteClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, chunk: &StreamChunk) -> Result<(), TransportError> {
        self.inner.write_all(&chunk.payload).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        Ok(())
    }

    async fn abort(&mut self, _reason: &AbortReason) -> Result<(), TransportError> {
        self.inner.flush().await?;
        Ok(())
    }
}
