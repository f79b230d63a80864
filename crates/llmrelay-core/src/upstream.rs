use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::{chunk::StreamChunk, error::UpstreamError};

/// Pull side of a relay: an incremental producer owned by one session.
///
/// `pull` yields the next chunk, `Ok(None)` once the source is exhausted,
/// or an error. Dropping the value must release the underlying
/// connection; `release` does so eagerly.
#[async_trait]
pub trait Upstream: Send {
    async fn pull(&mut self) -> Result<Option<StreamChunk>, UpstreamError>;

    /// Stop producing and free the upstream handle. Further pulls return
    /// `Ok(None)`.
    async fn release(&mut self) {}
}

pub type BoxUpstream = Box<dyn Upstream>;

#[async_trait]
impl<U: Upstream + ?Sized> Upstream for Box<U> {
    async fn pull(&mut self) -> Result<Option<StreamChunk>, UpstreamError> {
        (**self).pull().await
    }

    async fn release(&mut self) {
        (**self).release().await
    }
}

/// Adapts a byte stream into an [`Upstream`], numbering chunks from 0.
pub struct StreamUpstream<S> {
    inner: Option<S>,
    next_index: u64,
}

impl<S> StreamUpstream<S>
where
    S: Stream<Item = Result<Bytes, UpstreamError>> + Send + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: Some(stream),
            next_index: 0,
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl StreamUpstream<BoxStream<'static, Result<Bytes, UpstreamError>>> {
    /// Box any `'static` byte stream into a [`BoxUpstream`].
    pub fn boxed<S>(stream: S) -> BoxUpstream
    where
        S: Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static,
    {
        Box::new(StreamUpstream::new(stream.boxed()))
    }
}

#[async_trait]
impl<S> Upstream for StreamUpstream<S>
where
    S: Stream<Item = Result<Bytes, UpstreamError>> + Send + Unpin,
{
    async fn pull(&mut self) -> Result<Option<StreamChunk>, UpstreamError> {
        let Some(stream) = self.inner.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(Ok(payload)) => {
                let chunk = StreamChunk::new(self.next_index, payload);
                self.next_index += 1;
                Ok(Some(chunk))
            }
            Some(Err(e)) => Err(e),
            None => {
                self.inner = None;
                Ok(None)
            }
        }
    }

    async fn release(&mut self) {
        self.inner = None;
    }
}
