//! The streaming fetch client and its configuration.

use std::time::Duration;

use bon::Builder;
use http::HeaderMap;

use crate::error::{FetchError, FetchResult, TransportError};
use crate::http_client::HttpClient;
use crate::request::{FetchRequest, Payload};
use crate::response::StreamingResponse;

/// Per-client configuration.
///
/// Every timeout is unset by default, in which case the corresponding phase
/// waits for as long as the server takes.
///
/// - `header_timeout`: deadline for the status line and headers, measured from
///   when the request starts. Exceeding it yields `TransportError::Timeout`.
/// - `read_timeout`: deadline for each single body pull. Exceeding it yields a
///   `Timeout` `StreamError` and releases the connection.
/// - `connect_timeout`: deadline for establishing the TCP (and TLS) connection;
///   only used when the client builds its own `reqwest` transport.
/// - `default_headers`: added to every request that does not set the same name.
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct ClientConfig {
    /// Deadline for receiving response headers
    pub header_timeout: Option<Duration>,
    /// Deadline for each body pull
    pub read_timeout: Option<Duration>,
    /// Deadline for connection establishment (reqwest transport only)
    pub connect_timeout: Option<Duration>,
    /// `User-Agent` for the built-in reqwest transport
    #[builder(into)]
    pub user_agent: Option<String>,
    /// Headers added to every request unless the request sets them itself
    #[builder(default)]
    pub default_headers: HeaderMap,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment (reqwest transport only)
    #[builder(default = true)]
    pub system_proxy: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new().build()
    }
}

/// Issues requests and hands back their bodies as pull-driven chunk streams.
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use n0_future::StreamExt;
/// use streamfetch_common::client::{ClientConfig, StreamingFetchClient};
/// use streamfetch_common::request::Json;
///
/// let client = StreamingFetchClient::new(ClientConfig::default())?;
/// let message = serde_json::json!({ "message": "hello" });
/// let mut response = client
///     .post("https://example.com/api/chats/123", &Json(message))
///     .await?;
///
/// let mut chunks = std::pin::pin!(response.chunks(1024));
/// while let Some(chunk) = chunks.next().await {
///     println!("received {} bytes", chunk?.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StreamingFetchClient<C = DefaultTransport> {
    http: C,
    config: ClientConfig,
}

/// Transport used by [`StreamingFetchClient::new`]
#[cfg(feature = "reqwest-client")]
pub type DefaultTransport = reqwest::Client;

/// Transport used when no transport feature is enabled
#[cfg(not(feature = "reqwest-client"))]
pub type DefaultTransport = ();

#[cfg(feature = "reqwest-client")]
impl StreamingFetchClient<reqwest::Client> {
    /// Build a client with its own `reqwest` transport.
    ///
    /// Idle connections are not pooled, so releasing a response closes its
    /// connection.
    pub fn new(config: ClientConfig) -> FetchResult<Self> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(0);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build().map_err(TransportError::from)?;
        Ok(Self { http, config })
    }
}

impl<C: HttpClient> StreamingFetchClient<C> {
    /// Use an existing transport.
    pub fn with_client(http: C, config: ClientConfig) -> Self {
        Self { http, config }
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &C {
        &self.http
    }

    /// Send `request` and return once the response headers are in.
    ///
    /// The body is not read; pull it from the returned response. The response
    /// holds the connection until it is exhausted, closed, or dropped.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, request), fields(method = %request.method(), url = %request.url())))]
    pub async fn issue(&self, mut request: FetchRequest) -> FetchResult<StreamingResponse> {
        request.merge_default_headers(&self.config.default_headers);
        let http_request = request.into_http()?;

        let sent = self.http.send_http_streaming(http_request);
        let result = match self.config.header_timeout {
            Some(limit) => tokio::time::timeout(limit, sent)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => sent.await,
        };
        let http_response = result.map_err(|e| FetchError::Transport(e.into()))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(status = %http_response.status(), "response headers received");

        let (parts, body) = http_response.into_parts();
        Ok(StreamingResponse::new(parts, body).with_read_timeout(self.config.read_timeout))
    }

    /// `POST` `payload` to `url` and return the streaming response.
    pub async fn post<P: Payload + ?Sized>(
        &self,
        url: &str,
        payload: &P,
    ) -> FetchResult<StreamingResponse> {
        let request = FetchRequest::post(url)?.payload(payload)?;
        self.issue(request).await
    }

    /// `GET` `url` and return the streaming response.
    pub async fn get(&self, url: &str) -> FetchResult<StreamingResponse> {
        self.issue(FetchRequest::get(url)?).await
    }
}
