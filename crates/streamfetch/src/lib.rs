//! # streamfetch
//!
//! Send one HTTP request and consume the response body as it arrives, chunk by
//! chunk, without ever buffering the whole thing.
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> miette::Result<()> {
//! use n0_future::StreamExt;
//! use streamfetch::{ClientConfig, Json, StreamingFetchClient};
//!
//! #[derive(serde::Serialize)]
//! struct ChatMessage<'a> {
//!     message: &'a str,
//! }
//!
//! let client = StreamingFetchClient::new(ClientConfig::default())?;
//! let mut response = client
//!     .post(
//!         "https://example.com/api/chats/123",
//!         &Json(ChatMessage { message: "Explain streaming responses." }),
//!     )
//!     .await?;
//!
//! let mut chunks = std::pin::pin!(response.chunks(1024));
//! while let Some(chunk) = chunks.next().await {
//!     let chunk = chunk.map_err(|e| miette::miette!("{e}"))?;
//!     println!("received {} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Body draining for the command-line tool
pub mod sink;

pub use streamfetch_common::*;
