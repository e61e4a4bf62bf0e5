//! Outbound requests and typed payloads

use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use url::Url;

use crate::error::{EncodeError, TransportError};

/// A request body that knows how to encode itself for the wire.
///
/// Implement this for your own types when neither [`Json`] nor [`Form`]
/// matches the encoding the server expects.
pub trait Payload {
    /// MIME type sent as `Content-Type`
    const CONTENT_TYPE: &'static str;

    /// Encode the payload into request body bytes.
    fn encode_body(&self) -> Result<Vec<u8>, EncodeError>;
}

/// JSON-encoded payload (`application/json`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: Serialize> Payload for Json<T> {
    const CONTENT_TYPE: &'static str = "application/json";

    fn encode_body(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(&self.0)?)
    }
}

/// URL-encoded form payload (`application/x-www-form-urlencoded`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Form<T>(pub T);

impl<T: Serialize> Payload for Form<T> {
    const CONTENT_TYPE: &'static str = "application/x-www-form-urlencoded";

    fn encode_body(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_html_form::to_string(&self.0)?.into_bytes())
    }
}

/// A request ready to be issued.
///
/// Built up with the chaining methods below and consumed by
/// [`StreamingFetchClient::issue`](crate::client::StreamingFetchClient::issue),
/// so it cannot change after it has been sent.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// Start a request with the given method and absolute `http`/`https` URL.
    pub fn new(method: Method, url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid URL {url:?}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported URL scheme {other:?}"
                )));
            }
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(TransportError::InvalidRequest(format!(
                "URL {url} has no host"
            )));
        }

        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    /// `GET` request
    pub fn get(url: &str) -> Result<Self, TransportError> {
        Self::new(Method::GET, url)
    }

    /// `POST` request
    pub fn post(url: &str) -> Result<Self, TransportError> {
        Self::new(Method::POST, url)
    }

    /// Add a header. Repeated names append rather than replace.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Encode `payload` as the request body.
    ///
    /// Sets `Content-Type` to the payload's type unless one was set already.
    pub fn payload<P: Payload + ?Sized>(mut self, payload: &P) -> Result<Self, EncodeError> {
        self.body = Some(payload.encode_body()?);
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(P::CONTENT_TYPE));
        }
        Ok(self)
    }

    /// Use pre-encoded bytes as the body, with an explicit content type.
    pub fn raw_body(mut self, content_type: HeaderValue, body: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = Some(body.into());
        self
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers set so far
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Encoded body, if any
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Fill in headers from `defaults` that this request does not set itself.
    pub(crate) fn merge_default_headers(&mut self, defaults: &HeaderMap) {
        for name in defaults.keys() {
            if !self.headers.contains_key(name) {
                for value in defaults.get_all(name) {
                    self.headers.append(name.clone(), value.clone());
                }
            }
        }
    }

    /// Convert into an `http::Request` for a transport.
    pub fn into_http(self) -> Result<http::Request<Vec<u8>>, TransportError> {
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(self.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
        }
        builder
            .body(self.body.unwrap_or_default())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }
}
