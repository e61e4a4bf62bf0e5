//! Core types for streamfetch: issue an HTTP request, then pull the response
//! body chunk by chunk without buffering it.
//!
//! The connection behind a [`StreamingResponse`] is released exactly once:
//! when its body is exhausted, when a body error occurs, when it is closed
//! (directly or through a [`CloseHandle`]), or when it is dropped.

#![warn(missing_docs)]
pub use bytes;
pub use url;

/// The streaming fetch client and its configuration.
pub mod client;
pub mod decode;
pub mod error;
/// HTTP transport abstraction used by the client.
pub mod http_client;
pub mod request;
pub mod response;
pub mod stream;

pub use client::{ClientConfig, StreamingFetchClient};
pub use error::{EncodeError, FetchError, HttpError, TransportError};
pub use request::{FetchRequest, Form, Json, Payload};
pub use response::{CloseHandle, ResponseState, StreamingResponse};
pub use stream::{ByteStream, StreamError, StreamErrorKind};
