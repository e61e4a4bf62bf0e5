//! Streaming responses: headers up front, body pulled chunk by chunk.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use n0_future::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, HttpError};
use crate::stream::{ByteStream, StreamError};

/// Lifecycle of a [`StreamingResponse`].
///
/// `Open -> Streaming -> Closed`, with `Closed` reachable from anywhere and
/// never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Headers received, no body pulled yet
    Open,
    /// At least one pull has happened and the body is not finished
    Streaming,
    /// Connection released
    Closed,
}

/// Response whose body has not been read yet.
///
/// Holds the connection until the body is exhausted, a body error occurs,
/// [`close`](Self::close) is called, or the value is dropped. Only one owner can
/// pull at a time; use [`close_handle`](Self::close_handle) to interrupt a pull
/// from another task.
pub struct StreamingResponse {
    parts: http::response::Parts,
    body: Option<ByteStream>,
    /// Remainder of a transport frame larger than the last size hint
    pending: Bytes,
    state: ResponseState,
    /// Set when the response was closed before the body was exhausted and
    /// the next pull has not reported it yet
    close_unreported: bool,
    shutdown: CancellationToken,
    read_timeout: Option<Duration>,
}

enum Pulled {
    Cancelled,
    Frame(Option<Result<Bytes, StreamError>>),
}

impl StreamingResponse {
    /// Create a new streaming response
    pub fn new(parts: http::response::Parts, body: ByteStream) -> Self {
        Self {
            parts,
            body: Some(body),
            pending: Bytes::new(),
            state: ResponseState::Open,
            close_unreported: false,
            shutdown: CancellationToken::new(),
            read_timeout: None,
        }
    }

    /// Fail any single pull that waits longer than `timeout` for body data.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    /// Get the response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Get the response version
    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Value of `Content-Length`, if the server declared one
    pub fn content_length(&self) -> Option<u64> {
        self.parts
            .headers
            .get(http::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ResponseState {
        self.state
    }

    /// True once the connection has been released
    pub fn is_closed(&self) -> bool {
        self.state == ResponseState::Closed
    }

    /// Handle that can close this response from another task.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Release the connection now, discarding whatever body is left.
    ///
    /// Calling this more than once, or after the body was exhausted, does nothing.
    pub fn close(&mut self) {
        if self.state != ResponseState::Closed {
            self.close_unreported = true;
            self.release();
        }
    }

    /// Turn 4xx/5xx statuses into an error, releasing the connection.
    pub fn error_for_status(mut self) -> Result<Self, FetchError> {
        let status = self.status();
        if status.is_client_error() || status.is_server_error() {
            self.close();
            Err(HttpError { status }.into())
        } else {
            Ok(self)
        }
    }

    /// Pull the next chunk of at most `size_hint` bytes (`0` means no limit).
    ///
    /// Returns `None` once the body is exhausted, after a body error has been
    /// reported, or after a close has been reported. Chunks are never empty.
    pub async fn next_chunk(&mut self, size_hint: usize) -> Option<Result<Bytes, StreamError>> {
        if self.shutdown.is_cancelled() {
            self.close();
        }
        if self.state == ResponseState::Closed {
            return self.take_close_error().map(Err);
        }
        self.state = ResponseState::Streaming;

        if !self.pending.is_empty() {
            return Some(Ok(split_chunk(&mut self.pending, size_hint)));
        }

        loop {
            let pulled = {
                let body = self.body.as_mut()?;
                let shutdown = &self.shutdown;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => Pulled::Cancelled,
                    frame = next_frame(body, self.read_timeout) => Pulled::Frame(frame),
                }
            };

            match pulled {
                Pulled::Cancelled => {
                    self.close();
                    return self.take_close_error().map(Err);
                }
                Pulled::Frame(None) => {
                    self.release();
                    return None;
                }
                // keep-alive artifact
                Pulled::Frame(Some(Ok(frame))) if frame.is_empty() => continue,
                Pulled::Frame(Some(Ok(frame))) => {
                    self.pending = frame;
                    return Some(Ok(split_chunk(&mut self.pending, size_hint)));
                }
                Pulled::Frame(Some(Err(err))) => {
                    self.release();
                    return Some(Err(err));
                }
            }
        }
    }

    /// The body as a lazy stream of non-empty chunks of at most `size_hint` bytes.
    ///
    /// The stream ends when the body is exhausted, at which point the connection
    /// has been released. It yields at most one error and then ends.
    pub fn chunks(
        &mut self,
        size_hint: usize,
    ) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + '_ {
        futures::stream::unfold(self, move |resp| async move {
            let item = resp.next_chunk(size_hint).await?;
            Some((item, resp))
        })
    }

    /// Owning version of [`chunks`](Self::chunks).
    pub fn into_chunks(
        self,
        size_hint: usize,
    ) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
        futures::stream::unfold(self, move |mut resp| async move {
            let item = resp.next_chunk(size_hint).await?;
            Some((item, resp))
        })
    }

    fn take_close_error(&mut self) -> Option<StreamError> {
        std::mem::take(&mut self.close_unreported).then(StreamError::closed)
    }

    fn release(&mut self) {
        if self.body.take().is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!(status = %self.parts.status, "released response connection");
        }
        self.pending = Bytes::new();
        self.state = ResponseState::Closed;
        self.shutdown.cancel();
    }
}

impl Drop for StreamingResponse {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.parts.status)
            .field("version", &self.parts.version)
            .field("headers", &self.parts.headers)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Closes a [`StreamingResponse`] from outside the task that owns it.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    /// Ask the response to release its connection.
    ///
    /// A pull blocked on the network fails promptly with a `Closed` error.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// True once the response was closed, exhausted, failed, or dropped
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

async fn next_frame(
    body: &mut ByteStream,
    read_timeout: Option<Duration>,
) -> Option<Result<Bytes, StreamError>> {
    match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, body.next()).await {
            Ok(frame) => frame,
            Err(_) => Some(Err(StreamError::timeout())),
        },
        None => body.next().await,
    }
}

fn split_chunk(pending: &mut Bytes, size_hint: usize) -> Bytes {
    if size_hint == 0 || pending.len() <= size_hint {
        std::mem::take(pending)
    } else {
        pending.split_to(size_hint)
    }
}
