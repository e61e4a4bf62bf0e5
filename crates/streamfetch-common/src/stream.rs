//! Byte stream abstraction for response bodies, and the body-phase error type

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use n0_future::Stream;

/// Boxed error type for streaming operations
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Error raised while a response body is being transferred
///
/// Once headers have been received, every failure surfaces as a `StreamError`.
#[derive(Debug)]
pub struct StreamError {
    kind: StreamErrorKind,
    source: Option<BoxError>,
}

/// Categories of streaming errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Network or I/O error (connection dropped mid-transfer)
    Transport,
    /// Response was closed before the body was exhausted
    Closed,
    /// Body bytes could not be decoded (e.g. invalid UTF-8 in a text adapter)
    Protocol,
    /// No body data arrived within the configured read timeout
    Timeout,
}

impl StreamError {
    /// Create a new streaming error
    pub fn new(kind: StreamErrorKind, source: Option<BoxError>) -> Self {
        Self { kind, source }
    }

    /// Get the error kind
    pub fn kind(&self) -> &StreamErrorKind {
        &self.kind
    }

    /// Get the underlying error source
    pub fn source(&self) -> Option<&BoxError> {
        self.source.as_ref()
    }

    /// Create a "response closed" error
    pub fn closed() -> Self {
        Self {
            kind: StreamErrorKind::Closed,
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport(source: impl Error + Send + Sync + 'static) -> Self {
        Self {
            kind: StreamErrorKind::Transport,
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self {
            kind: StreamErrorKind::Protocol,
            source: Some(msg.into().into()),
        }
    }

    /// Create a read timeout error
    pub fn timeout() -> Self {
        Self {
            kind: StreamErrorKind::Timeout,
            source: None,
        }
    }

    /// True if the response was closed underneath the reader
    pub fn is_closed(&self) -> bool {
        self.kind == StreamErrorKind::Closed
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamErrorKind::Transport => write!(f, "Transport error"),
            StreamErrorKind::Closed => write!(f, "Stream closed"),
            StreamErrorKind::Protocol => write!(f, "Protocol error"),
            StreamErrorKind::Timeout => write!(f, "Read timed out"),
        }?;

        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }

        Ok(())
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match err.kind {
            StreamErrorKind::Transport => std::io::ErrorKind::ConnectionAborted,
            StreamErrorKind::Closed => std::io::ErrorKind::NotConnected,
            StreamErrorKind::Protocol => std::io::ErrorKind::InvalidData,
            StreamErrorKind::Timeout => std::io::ErrorKind::TimedOut,
        };
        std::io::Error::new(kind, err)
    }
}

/// Transport-agnostic response body stream.
///
/// Owning a `ByteStream` means owning the connection it reads from; dropping it
/// releases the connection.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>,
}

impl ByteStream {
    /// Create a new byte stream from any compatible stream
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A body with no bytes in it
    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}
