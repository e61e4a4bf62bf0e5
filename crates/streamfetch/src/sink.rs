//! Writing a streaming body out as it arrives.

use std::pin::pin;

use miette::Diagnostic;
use n0_future::StreamExt;
use streamfetch_common::response::StreamingResponse;
use streamfetch_common::stream::StreamError;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// How body data is handed to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Raw bytes, chunk by chunk
    #[default]
    Chunks,
    /// Newline-delimited UTF-8 lines
    Lines,
    /// UTF-8 text, decoded incrementally
    Text,
}

/// What was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    /// Number of items (chunks, lines, or text pieces) received
    pub items: usize,
    /// Number of bytes written to the output
    pub bytes: u64,
}

/// Errors while draining a body into an output
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum SinkError {
    /// The body transfer failed
    #[error("reading response body: {0}")]
    #[diagnostic(code(streamfetch::sink::stream))]
    Stream(#[from] StreamError),
    /// Writing to the output failed
    #[error("writing output: {0}")]
    #[diagnostic(code(streamfetch::sink::io))]
    Io(#[from] std::io::Error),
}

/// Pull the whole body through `mode` and write it to `out`.
///
/// On error the response has already released its connection if the failure
/// came from the body; output errors leave that to the caller.
pub async fn drain<W>(
    response: &mut StreamingResponse,
    mode: Mode,
    chunk_size: usize,
    out: &mut W,
) -> Result<Summary, SinkError>
where
    W: AsyncWrite + Unpin,
{
    let mut summary = Summary::default();
    match mode {
        Mode::Chunks => {
            let mut chunks = pin!(response.chunks(chunk_size));
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                tracing::trace!(len = chunk.len(), "received chunk");
                out.write_all(&chunk).await?;
                summary.items += 1;
                summary.bytes += chunk.len() as u64;
            }
        }
        Mode::Lines => {
            let mut lines = pin!(response.lines());
            while let Some(line) = lines.next().await {
                let line = line?;
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                summary.items += 1;
                summary.bytes += line.len() as u64 + 1;
            }
        }
        Mode::Text => {
            let mut pieces = pin!(response.text_chunks(chunk_size));
            while let Some(piece) = pieces.next().await {
                let piece = piece?;
                out.write_all(piece.as_bytes()).await?;
                out.flush().await?;
                summary.items += 1;
                summary.bytes += piece.len() as u64;
            }
        }
    }
    out.flush().await?;
    Ok(summary)
}
