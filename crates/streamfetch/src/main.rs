use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use http::{HeaderName, HeaderValue, Method};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;
use streamfetch::sink::{self, Mode, Summary};
use streamfetch::{ClientConfig, FetchRequest, Json, StreamingFetchClient, StreamingResponse};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "streamfetch - send one request and stream the response body")]
struct Args {
    /// Target URL (e.g., https://example.com/api/chats/123)
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "POST")]
    method: Method,

    /// Send `{"message": <TEXT>}` as the JSON request body
    #[arg(short, long)]
    message: Option<String>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Largest chunk handed out at once, in bytes (0 = as received)
    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,

    /// How to consume the body
    #[arg(long, value_enum, default_value_t = Mode::Chunks)]
    mode: Mode,

    /// Write the body to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds to wait for response headers
    #[arg(long)]
    header_timeout: Option<u64>,

    /// Seconds to wait for each piece of body data
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Seconds to wait for the connection to be established
    #[arg(long)]
    connect_timeout: Option<u64>,
}

#[derive(Serialize)]
struct ChatMessage {
    message: String,
}

fn parse_header(raw: &str) -> std::result::Result<(HeaderName, HeaderValue), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = HeaderName::try_from(name.trim()).map_err(|e| e.to_string())?;
    let value = HeaderValue::try_from(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(EnvFilter::from_env("STREAMFETCH_LOG"))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = ClientConfig::new()
        .maybe_header_timeout(args.header_timeout.map(Duration::from_secs))
        .maybe_read_timeout(args.read_timeout.map(Duration::from_secs))
        .maybe_connect_timeout(args.connect_timeout.map(Duration::from_secs))
        .user_agent(concat!("streamfetch/", env!("CARGO_PKG_VERSION")))
        .build();
    let client = StreamingFetchClient::new(config)?;

    let mut request = FetchRequest::new(args.method, &args.url)?;
    for (name, value) in args.headers {
        request = request.header(name, value);
    }
    if let Some(message) = args.message {
        request = request.payload(&Json(ChatMessage { message }))?;
    }

    let response = client.issue(request).await?;
    if response.status().is_success() {
        info!(status = %response.status(), "streaming response body");
    } else {
        warn!(status = %response.status(), "server returned an error status");
    }

    let handle = response.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, closing the response");
            handle.close();
        }
    });

    let summary = match &args.output {
        Some(path) => {
            let mut file = create(path).await?;
            drain_and_close(response, args.mode, args.chunk_size, &mut file).await?
        }
        None => {
            let mut stdout = tokio::io::stdout();
            drain_and_close(response, args.mode, args.chunk_size, &mut stdout).await?
        }
    };

    info!(items = summary.items, bytes = summary.bytes, "done");
    Ok(())
}

async fn create(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::create(path)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("creating {}", path.display()))
}

async fn drain_and_close<W>(
    mut response: StreamingResponse,
    mode: Mode,
    chunk_size: usize,
    out: &mut W,
) -> Result<Summary>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let result = sink::drain(&mut response, mode, chunk_size, out).await;
    response.close();
    Ok(result?)
}
