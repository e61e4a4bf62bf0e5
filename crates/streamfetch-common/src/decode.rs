//! Views over a streaming body: lines, UTF-8 text, `AsyncRead`, and a buffered collect.

use bytes::{Bytes, BytesMut};
use n0_future::Stream;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::response::StreamingResponse;
use crate::stream::StreamError;

/// Incremental UTF-8 decoder that carries split multi-byte sequences across chunks.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// New decoder with nothing carried over
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `carry + chunk` as forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, StreamError> {
        self.carry.extend_from_slice(chunk);
        match std::str::from_utf8(&self.carry) {
            Ok(text) => {
                let text = text.to_owned();
                self.carry.clear();
                Ok(text)
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let tail = self.carry.split_off(valid);
                let head = std::mem::replace(&mut self.carry, tail);
                String::from_utf8(head).map_err(|e| StreamError::protocol(e.to_string()))
            }
            Err(e) => {
                self.carry.clear();
                Err(StreamError::protocol(format!("invalid UTF-8 in body: {e}")))
            }
        }
    }

    /// Finish decoding; fails if an incomplete sequence is still carried.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            let dangling = self.carry.len();
            self.carry.clear();
            Err(StreamError::protocol(format!(
                "body ended inside a UTF-8 sequence ({dangling} dangling bytes)"
            )))
        }
    }
}

/// Longest line [`StreamingResponse::lines`] buffers before giving up
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Splits newline-delimited records out of arbitrary chunk boundaries.
#[derive(Debug)]
pub struct LineSplitter {
    buf: BytesMut,
    /// Bytes after the last newline in `buf`
    partial: usize,
    max_line: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl LineSplitter {
    /// New splitter with an empty buffer and the default line limit
    pub fn new() -> Self {
        Self::default()
    }

    /// New splitter that rejects lines longer than `max_line` bytes
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            partial: 0,
            max_line,
        }
    }

    /// Append a chunk of body bytes.
    ///
    /// Fails, dropping everything buffered, once a line outgrows the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        let (longest, partial) = match chunk.iter().position(|b| *b == b'\n') {
            Some(first) => {
                let last = chunk.iter().rposition(|b| *b == b'\n').unwrap_or(first);
                (self.partial + first, chunk.len() - last - 1)
            }
            None => (0, self.partial + chunk.len()),
        };
        if longest.max(partial) > self.max_line {
            self.buf.clear();
            self.partial = 0;
            return Err(StreamError::protocol(format!(
                "line longer than {} bytes",
                self.max_line
            )));
        }
        self.buf.extend_from_slice(chunk);
        self.partial = partial;
        Ok(())
    }

    /// Take the next complete line, without its `\n` or `\r\n` terminator.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line = self.buf.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        Some(line.freeze())
    }

    /// Take whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.partial = 0;
        if self.buf.is_empty() {
            None
        } else {
            let mut rest = self.buf.split();
            if rest.last() == Some(&b'\r') {
                rest.truncate(rest.len() - 1);
            }
            Some(rest.freeze())
        }
    }
}

fn line_to_string(line: Bytes) -> Result<String, StreamError> {
    String::from_utf8(line.to_vec())
        .map_err(|e| StreamError::protocol(format!("invalid UTF-8 in line: {e}")))
}

impl StreamingResponse {
    /// The body as newline-delimited UTF-8 lines.
    ///
    /// Empty lines are yielded as empty strings; a last line without a
    /// terminator is yielded when the body ends. Lines longer than
    /// [`MAX_LINE_LEN`] fail with a `Protocol` error.
    pub fn lines(&mut self) -> impl Stream<Item = Result<String, StreamError>> + Send + '_ {
        self.lines_with_limit(MAX_LINE_LEN)
    }

    /// [`lines`](Self::lines) with a custom maximum line length in bytes.
    ///
    /// Any error (transport, invalid UTF-8, overlong line) releases the
    /// connection and ends the stream.
    pub fn lines_with_limit(
        &mut self,
        max_line: usize,
    ) -> impl Stream<Item = Result<String, StreamError>> + Send + '_ {
        let state = (self, LineSplitter::with_max_line(max_line), false);
        futures::stream::unfold(state, |(resp, mut splitter, mut done)| async move {
            let line = loop {
                if let Some(line) = splitter.next_line() {
                    break line;
                }
                if done {
                    break splitter.finish()?;
                }
                match resp.next_chunk(0).await {
                    Some(Ok(chunk)) => {
                        if let Err(err) = splitter.push(&chunk) {
                            resp.close();
                            return Some((Err(err), (resp, LineSplitter::new(), true)));
                        }
                    }
                    // nothing buffered is delivered after a failure
                    Some(Err(err)) => return Some((Err(err), (resp, LineSplitter::new(), true))),
                    None => done = true,
                }
            };
            match line_to_string(line) {
                Ok(line) => Some((Ok(line), (resp, splitter, done))),
                Err(err) => {
                    resp.close();
                    Some((Err(err), (resp, LineSplitter::new(), true)))
                }
            }
        })
    }

    /// The body decoded as UTF-8 text, chunk by chunk.
    ///
    /// A character split across chunks is held back until it is complete, so a
    /// piece can be shorter than `size_hint` bytes, or longer by the up to three
    /// bytes carried over from the previous chunk. Pieces are never empty.
    pub fn text_chunks(
        &mut self,
        size_hint: usize,
    ) -> impl Stream<Item = Result<String, StreamError>> + Send + '_ {
        let state = (self, Utf8Decoder::new(), false);
        futures::stream::unfold(state, move |(resp, mut decoder, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match resp.next_chunk(size_hint).await {
                    Some(Ok(chunk)) => match decoder.decode(&chunk) {
                        Ok(text) if text.is_empty() => continue,
                        Ok(text) => return Some((Ok(text), (resp, decoder, false))),
                        Err(err) => {
                            resp.close();
                            return Some((Err(err), (resp, decoder, true)));
                        }
                    },
                    Some(Err(err)) => return Some((Err(err), (resp, decoder, true))),
                    None => {
                        return match decoder.finish() {
                            Ok(()) => None,
                            Err(err) => Some((Err(err), (resp, decoder, true))),
                        };
                    }
                }
            }
        })
    }

    /// The body as an [`AsyncRead`], e.g. for `tokio::io::copy` into a file.
    ///
    /// Body errors surface as `std::io::Error`s. Dropping the reader releases
    /// the connection.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin + 'static {
        StreamReader::new(Box::pin(self.into_chunks(0)))
    }

    /// Read the rest of the body into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, StreamError> {
        let mut buf = BytesMut::with_capacity(
            self.content_length()
                .and_then(|len| usize::try_from(len).ok())
                .unwrap_or(0)
                .min(1 << 20),
        );
        while let Some(chunk) = self.next_chunk(0).await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}
