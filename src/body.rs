use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::ready;
use futures_util::stream::{BoxStream, Stream, StreamExt, TryStreamExt};

use crate::{error::BoxError, HttpError, Result};

/// Single-use request or response body.
///
/// A body is either fully buffered or a stream of chunks. Streams can be
/// drained exactly once; buffered bodies hand out cheap [`Bytes`] views.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Full(Bytes),
    Stream(BoxStream<'static, std::result::Result<Bytes, BoxError>>),
}

impl Body {
    pub fn empty() -> Self {
        Self {
            inner: Inner::Full(Bytes::new()),
        }
    }

    /// Wraps a fallible byte stream.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            inner: Inner::Stream(stream.map_err(Into::into).boxed()),
        }
    }

    /// Wraps a stream and keeps `guard` alive until the stream ends or the body is dropped.
    pub(crate) fn from_stream_guarded<S, E, G>(stream: S, guard: G) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
        G: Send + Unpin + 'static,
    {
        Self::from_stream(Guarded {
            inner: stream.boxed(),
            guard: Some(guard),
        })
    }

    /// Returns the buffered bytes, or `None` for a body that is still a stream.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.inner {
            Inner::Full(bytes) => Some(bytes),
            Inner::Stream(_) => None,
        }
    }

    /// Drains the body into one contiguous buffer.
    pub async fn collect(self) -> Result<Bytes> {
        match self.inner {
            Inner::Full(bytes) => Ok(bytes),
            Inner::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(HttpError::transport_boxed)?;
                    buffer.extend_from_slice(&chunk);
                }
                Ok(buffer.freeze())
            }
        }
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Body {
        match self.inner {
            Inner::Full(bytes) => reqwest::Body::from(bytes),
            Inner::Stream(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

struct Guarded<S, G> {
    inner: S,
    guard: Option<G>,
}

impl<S, G> Stream for Guarded<S, G>
where
    S: Stream + Unpin,
    G: Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.poll_next_unpin(cx));
        if item.is_none() {
            self.guard = None;
        }
        Poll::Ready(item)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Full(bytes) => f.debug_tuple("Body").field(&bytes.len()).finish(),
            Inner::Stream(_) => f.write_str("Body(<stream>)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            inner: Inner::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}
