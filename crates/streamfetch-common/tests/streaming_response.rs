use std::collections::VecDeque;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use n0_future::{Stream, StreamExt};
use streamfetch_common::client::{ClientConfig, StreamingFetchClient};
use streamfetch_common::error::TransportError;
use streamfetch_common::http_client::HttpClient;
use streamfetch_common::request::{FetchRequest, Json};
use streamfetch_common::response::ResponseState;
use streamfetch_common::stream::{ByteStream, StreamError, StreamErrorKind};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

/// One step of a scripted response body
enum Step {
    Data(Bytes),
    Reset,
    Hang,
}

enum Reply {
    Respond {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        steps: Vec<Step>,
    },
    Refuse,
    Stall,
}

/// Flips `released` when the body stream holding it is dropped
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct TrackedBody {
    inner: ByteStream,
    _guard: ReleaseGuard,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn scripted_body(steps: Vec<Step>, released: Arc<AtomicBool>) -> ByteStream {
    let inner = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
        match steps.next()? {
            Step::Data(bytes) => Some((Ok(bytes), steps)),
            Step::Reset => {
                let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
                Some((Err(StreamError::transport(err)), steps))
            }
            Step::Hang => {
                futures::future::pending::<()>().await;
                None
            }
        }
    });
    ByteStream::new(TrackedBody {
        inner: ByteStream::new(inner),
        _guard: ReleaseGuard(released),
    })
}

#[derive(Clone, Default)]
struct MockTransport {
    // Queue of replies to pop for each request
    queue: Arc<Mutex<VecDeque<Reply>>>,
    // Capture requests for assertions
    log: Arc<Mutex<Vec<http::Request<Vec<u8>>>>>,
    // Connection release flag of the most recent response
    released: Arc<std::sync::Mutex<Arc<AtomicBool>>>,
}

impl MockTransport {
    async fn push(&self, reply: Reply) {
        self.queue.lock().await.push_back(reply);
    }

    async fn respond(&self, steps: Vec<Step>) {
        self.push(Reply::Respond {
            status: StatusCode::OK,
            headers: vec![],
            steps,
        })
        .await;
    }

    fn released(&self) -> bool {
        self.released.lock().unwrap().load(Ordering::SeqCst)
    }

    async fn take_log(&self) -> Vec<http::Request<Vec<u8>>> {
        std::mem::take(&mut *self.log.lock().await)
    }
}

impl HttpClient for MockTransport {
    type Error = TransportError;

    fn send_http_streaming(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl core::future::Future<
        Output = core::result::Result<http::Response<ByteStream>, Self::Error>,
    > + Send {
        let log = self.log.clone();
        let queue = self.queue.clone();
        let released = self.released.clone();
        async move {
            log.lock().await.push(request);
            let reply = queue.lock().await.pop_front().expect("no queued reply");
            match reply {
                Reply::Respond {
                    status,
                    headers,
                    steps,
                } => {
                    let flag = Arc::new(AtomicBool::new(false));
                    *released.lock().unwrap() = flag.clone();
                    let mut builder = http::Response::builder().status(status);
                    for (name, value) in headers {
                        builder = builder.header(name, value);
                    }
                    Ok(builder.body(scripted_body(steps, flag)).unwrap())
                }
                Reply::Refuse => Err(TransportError::Connect("connection refused".into())),
                Reply::Stall => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }
}

fn data(len: usize, fill: u8) -> Step {
    Step::Data(Bytes::from(vec![fill; len]))
}

fn client(transport: &MockTransport) -> StreamingFetchClient<MockTransport> {
    StreamingFetchClient::with_client(transport.clone(), ClientConfig::default())
}

#[tokio::test]
async fn three_chunk_body_arrives_intact() {
    let transport = MockTransport::default();
    transport
        .respond(vec![data(1024, b'a'), data(1024, b'b'), data(37, b'c')])
        .await;

    let mut resp = client(&transport)
        .get("https://chat.example/api/chats/123")
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.state(), ResponseState::Open);

    let chunks: Vec<_> = resp.chunks(1024).collect().await;
    let chunks: Vec<Bytes> = chunks.into_iter().map(Result::unwrap).collect();

    let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
    assert_eq!(sizes, vec![1024, 1024, 37]);
    assert_eq!(sizes.iter().sum::<usize>(), 2085);
    assert_eq!(chunks[2][..], [b'c'; 37][..]);
    assert!(transport.released());
    assert_eq!(resp.state(), ResponseState::Closed);
}

#[tokio::test]
async fn oversized_frames_are_split_to_the_hint() {
    let transport = MockTransport::default();
    let body: Vec<u8> = (0..2085u32).map(|i| (i % 251) as u8).collect();
    transport
        .respond(vec![Step::Data(Bytes::from(body.clone()))])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let mut joined = Vec::new();
    let mut sizes = Vec::new();
    let mut chunks = pin!(resp.chunks(1024));
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.unwrap();
        sizes.push(chunk.len());
        joined.extend_from_slice(&chunk);
    }

    assert_eq!(sizes, vec![1024, 1024, 37]);
    assert_eq!(joined, body);
}

#[tokio::test]
async fn connection_held_until_the_body_ends() {
    let transport = MockTransport::default();
    transport.respond(vec![data(10, 1), data(10, 2)]).await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    assert!(!transport.released());

    resp.next_chunk(64).await.unwrap().unwrap();
    resp.next_chunk(64).await.unwrap().unwrap();
    assert!(!transport.released());

    assert!(resp.next_chunk(64).await.is_none());
    assert!(transport.released());
}

#[tokio::test]
async fn keep_alive_frames_never_surface() {
    let transport = MockTransport::default();
    transport
        .respond(vec![
            Step::Data(Bytes::new()),
            data(3, b'x'),
            Step::Data(Bytes::new()),
            Step::Data(Bytes::new()),
            data(2, b'y'),
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let chunks: Vec<_> = resp.chunks(1024).collect().await;

    assert_eq!(chunks.len(), 2);
    for chunk in chunks {
        assert!(!chunk.unwrap().is_empty());
    }
}

#[tokio::test]
async fn reset_mid_body_yields_partial_then_error() {
    let transport = MockTransport::default();
    transport
        .push(Reply::Respond {
            status: StatusCode::OK,
            headers: vec![("content-length", "2000")],
            steps: vec![data(500, b'z'), Step::Reset, data(1500, b'z')],
        })
        .await;

    let mut resp = client(&transport).get("http://localhost/big").await.unwrap();
    assert_eq!(resp.content_length(), Some(2000));

    let items: Vec<_> = resp.chunks(1024).collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().len(), 500);
    let err = items[1].as_ref().unwrap_err();
    assert_eq!(err.kind(), &StreamErrorKind::Transport);

    assert!(transport.released());
    assert!(resp.next_chunk(1024).await.is_none());
}

#[tokio::test]
async fn unreachable_address_fails_before_a_response() {
    let transport = MockTransport::default();
    transport.push(Reply::Refuse).await;

    let err = client(&transport)
        .get("http://10.255.255.1/")
        .await
        .unwrap_err();
    assert!(err.is_connect());
}

#[tokio::test]
async fn header_deadline_turns_into_timeout() {
    let transport = MockTransport::default();
    transport.push(Reply::Stall).await;

    let config = ClientConfig::new()
        .header_timeout(Duration::from_millis(50))
        .build();
    let client = StreamingFetchClient::with_client(transport.clone(), config);

    let err = client.get("http://localhost/slow").await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn read_deadline_fails_the_pull_and_releases() {
    let transport = MockTransport::default();
    transport.respond(vec![data(8, b'q'), Step::Hang]).await;

    let config = ClientConfig::new()
        .read_timeout(Duration::from_millis(50))
        .build();
    let client = StreamingFetchClient::with_client(transport.clone(), config);

    let mut resp = client.get("http://localhost/").await.unwrap();
    assert_eq!(resp.next_chunk(64).await.unwrap().unwrap().len(), 8);

    let err = resp.next_chunk(64).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), &StreamErrorKind::Timeout);
    assert!(transport.released());
    assert!(resp.next_chunk(64).await.is_none());
}

#[tokio::test]
async fn close_is_idempotent_in_every_state() {
    let transport = MockTransport::default();

    // never started
    transport.respond(vec![data(4, 1)]).await;
    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    resp.close();
    assert!(transport.released());
    resp.close();
    resp.close();
    assert_eq!(resp.state(), ResponseState::Closed);

    // partially consumed
    transport.respond(vec![data(4, 1), data(4, 2)]).await;
    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    resp.next_chunk(4).await.unwrap().unwrap();
    resp.close();
    resp.close();
    assert!(transport.released());

    // fully consumed
    transport.respond(vec![data(4, 1)]).await;
    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    while resp.next_chunk(4).await.is_some() {}
    resp.close();
    resp.close();
    assert!(transport.released());
    assert!(resp.next_chunk(4).await.is_none());
}

#[tokio::test]
async fn close_mid_iteration_stops_without_blocking() {
    let transport = MockTransport::default();
    transport.respond(vec![data(16, 1), Step::Hang]).await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    resp.next_chunk(8).await.unwrap().unwrap();
    resp.close();

    let next = tokio::time::timeout(Duration::from_secs(1), resp.next_chunk(8))
        .await
        .expect("pull after close must not block");
    assert!(next.unwrap().unwrap_err().is_closed());
    assert!(resp.next_chunk(8).await.is_none());
    assert!(transport.released());
}

#[tokio::test(flavor = "multi_thread")]
async fn close_handle_interrupts_a_blocked_pull() {
    let transport = MockTransport::default();
    transport.respond(vec![data(5, b'h'), Step::Hang]).await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let handle = resp.close_handle();
    assert!(!handle.is_closed());
    resp.next_chunk(64).await.unwrap().unwrap();

    let reader = tokio::spawn(async move {
        let pulled = resp.next_chunk(64).await;
        (pulled, resp)
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.close();

    let (pulled, resp) = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("blocked pull must wake up on close")
        .unwrap();
    assert!(pulled.unwrap().unwrap_err().is_closed());
    assert!(resp.is_closed());
    assert!(handle.is_closed());
    assert!(transport.released());
}

#[tokio::test]
async fn dropping_the_response_releases() {
    let transport = MockTransport::default();
    transport.respond(vec![data(4, 1), Step::Hang]).await;

    let resp = client(&transport).get("http://localhost/").await.unwrap();
    let handle = resp.close_handle();
    drop(resp);

    assert!(transport.released());
    assert!(handle.is_closed());
}

#[tokio::test]
async fn post_sends_json_payload_and_default_headers() {
    let transport = MockTransport::default();
    transport.respond(vec![data(2, b'o')]).await;

    let mut defaults = http::HeaderMap::new();
    defaults.insert(
        http::header::ACCEPT,
        HeaderValue::from_static("text/event-stream"),
    );
    let config = ClientConfig::new().default_headers(defaults).build();
    let client = StreamingFetchClient::with_client(transport.clone(), config);

    let payload = Json(serde_json::json!({
        "message": "Explain to me in great detail how to stream a response.",
    }));
    let resp = client
        .post("https://chat.example/api/chats/123", &payload)
        .await
        .unwrap();
    assert_eq!(&resp.bytes().await.unwrap()[..], b"oo");

    let log = transport.take_log().await;
    assert_eq!(log.len(), 1);
    let sent = &log[0];
    assert_eq!(sent.method(), Method::POST);
    assert_eq!(sent.uri(), "https://chat.example/api/chats/123");
    assert_eq!(sent.headers()[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(sent.headers()[http::header::ACCEPT], "text/event-stream");

    let body: serde_json::Value = serde_json::from_slice(sent.body()).unwrap();
    assert_eq!(
        body["message"],
        "Explain to me in great detail how to stream a response."
    );
}

#[tokio::test]
async fn request_headers_win_over_defaults() {
    let transport = MockTransport::default();
    transport.respond(vec![]).await;

    let mut defaults = http::HeaderMap::new();
    defaults.insert(http::header::ACCEPT, HeaderValue::from_static("*/*"));
    let config = ClientConfig::new().default_headers(defaults).build();
    let client = StreamingFetchClient::with_client(transport.clone(), config);

    let request = FetchRequest::get("http://localhost/")
        .unwrap()
        .header(http::header::ACCEPT, HeaderValue::from_static("application/x-ndjson"));
    client.issue(request).await.unwrap();

    let log = transport.take_log().await;
    assert_eq!(log[0].headers()[http::header::ACCEPT], "application/x-ndjson");
}

#[tokio::test]
async fn lines_survive_chunk_boundaries() {
    let transport = MockTransport::default();
    transport
        .respond(vec![
            Step::Data(Bytes::from_static(b"data: a\r\nda")),
            Step::Data(Bytes::from_static(b"ta: b\n\nla")),
            Step::Data(Bytes::from_static(b"st")),
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let lines: Vec<String> = resp
        .lines()
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(lines, vec!["data: a", "data: b", "", "last"]);
    assert!(transport.released());
}

#[tokio::test]
async fn lines_stop_after_a_failure() {
    let transport = MockTransport::default();
    transport
        .respond(vec![
            Step::Data(Bytes::from_static(b"one\ntw")),
            Step::Reset,
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let items: Vec<_> = resp.lines().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "one");
    assert_eq!(items[1].as_ref().unwrap_err().kind(), &StreamErrorKind::Transport);
}

#[tokio::test]
async fn invalid_utf8_line_releases_and_ends() {
    let transport = MockTransport::default();
    transport
        .respond(vec![
            Step::Data(Bytes::from_static(b"ok\n\xff\xfe\n")),
            Step::Data(Bytes::from_static(b"after\n")),
            Step::Data(Bytes::from_static(b"more\n")),
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let items: Vec<_> = resp.lines().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "ok");
    assert_eq!(items[1].as_ref().unwrap_err().kind(), &StreamErrorKind::Protocol);
    assert!(transport.released());
    assert!(resp.is_closed());
}

#[tokio::test]
async fn overlong_line_releases_and_ends() {
    let transport = MockTransport::default();
    transport
        .respond(vec![
            Step::Data(Bytes::from_static(b"short\nno new")),
            Step::Data(Bytes::from_static(b"line in sight")),
            Step::Hang,
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let items: Vec<_> = resp.lines_with_limit(8).collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "short");
    assert_eq!(items[1].as_ref().unwrap_err().kind(), &StreamErrorKind::Protocol);
    assert!(transport.released());
}

#[tokio::test]
async fn invalid_text_releases_and_ends() {
    let transport = MockTransport::default();
    transport
        .respond(vec![
            Step::Data(Bytes::from_static(b"fine ")),
            Step::Data(Bytes::from_static(b"\xff\xfe")),
            Step::Data(Bytes::from_static(b"more")),
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let items: Vec<_> = resp.text_chunks(1024).collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "fine ");
    assert_eq!(items[1].as_ref().unwrap_err().kind(), &StreamErrorKind::Protocol);
    assert!(transport.released());
    assert!(resp.is_closed());
}

#[tokio::test]
async fn text_chunks_reassemble_split_characters() {
    let transport = MockTransport::default();
    let text = "streamed: ü€ done";
    let bytes = text.as_bytes();
    // cut inside the three-byte euro sign
    let cut = text.find('€').unwrap() + 1;
    transport
        .respond(vec![
            Step::Data(Bytes::copy_from_slice(&bytes[..cut])),
            Step::Data(Bytes::copy_from_slice(&bytes[cut..])),
        ])
        .await;

    let mut resp = client(&transport).get("http://localhost/").await.unwrap();
    let pieces: Vec<_> = resp.text_chunks(1024).collect().await;
    let joined: String = pieces.into_iter().map(Result::unwrap).collect();

    assert_eq!(joined, text);
}

#[tokio::test]
async fn reader_copies_the_whole_body() {
    let transport = MockTransport::default();
    transport
        .respond(vec![data(700, b'r'), data(0, 0), data(300, b's')])
        .await;

    let resp = client(&transport).get("http://localhost/").await.unwrap();
    let mut reader = resp.into_reader();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();

    assert_eq!(out.len(), 1000);
    assert!(out[..700].iter().all(|b| *b == b'r'));
    assert!(out[700..].iter().all(|b| *b == b's'));
    drop(reader);
    assert!(transport.released());
}

#[tokio::test]
async fn error_status_becomes_http_error() {
    let transport = MockTransport::default();
    transport
        .push(Reply::Respond {
            status: StatusCode::NOT_FOUND,
            headers: vec![],
            steps: vec![data(9, b'n')],
        })
        .await;

    let resp = client(&transport).get("http://localhost/missing").await.unwrap();
    let err = resp.error_for_status().unwrap_err();

    assert_eq!(err.to_string(), "HTTP 404 Not Found");
    assert!(transport.released());
}
