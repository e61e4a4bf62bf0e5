//! Minimal HTTP transport abstraction.

use std::future::Future;
use std::sync::Arc;

use crate::error::TransportError;
use crate::stream::ByteStream;

/// HTTP transport that returns as soon as response headers are in.
///
/// The body of the returned response has not been read yet; it owns the
/// connection until it is dropped or drained.
#[trait_variant::make(Send)]
pub trait HttpClient {
    /// Error type returned by the transport
    type Error: std::error::Error + Into<TransportError> + Send + Sync + 'static;

    /// Send an HTTP request and return the response with a streaming body.
    fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<ByteStream>, Self::Error>>;
}

impl<T: HttpClient + Sync> HttpClient for Arc<T> {
    type Error = T::Error;

    fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<ByteStream>, Self::Error>> + Send
    {
        self.as_ref().send_http_streaming(request)
    }
}

#[cfg(feature = "reqwest-client")]
impl HttpClient for reqwest::Client {
    type Error = reqwest::Error;

    async fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> core::result::Result<http::Response<ByteStream>, Self::Error> {
        use crate::stream::StreamError;
        use futures::TryStreamExt;

        let (parts, body) = request.into_parts();

        let mut req = self.request(parts.method, parts.uri.to_string()).body(body);

        for (name, value) in parts.headers.iter() {
            req = req.header(name.as_str(), value.as_bytes());
        }

        // Resolves once the status line and headers are parsed
        let resp = req.send().await?;

        let mut builder = http::Response::builder()
            .status(resp.status())
            .version(resp.version());

        for (name, value) in resp.headers().iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let stream = resp.bytes_stream().map_err(StreamError::transport);

        Ok(builder
            .body(ByteStream::new(stream))
            .expect("status and headers were copied from a valid response"))
    }
}
