use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use pollguard::{
    ChannelRequest, ErrorReason, Event, EventKind, Headers, HttpChannel, Payload, RequestConfig,
    RequestController, RequestDescriptor, TransportChannel,
};
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: String,
    headers: Vec<(&'static str, &'static str)>,
    delay: Duration,
}

impl MockResponse {
    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
            delay: Duration::from_millis(0),
        }
    }

    fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self::text(status, body.to_string()).with_header("content-type", "application/json")
    }

    fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct Received {
    method: Method,
    headers: HeaderMap,
    body: String,
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    received: Arc<Mutex<Vec<Received>>>,
    hits: Arc<AtomicUsize>,
}

async fn poll_handler(
    State(state): State<MockState>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .received
        .lock()
        .expect("received mutex must not be poisoned")
        .push(Received {
            method,
            headers,
            body,
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "no mock response available")
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers {
        headers.insert(name, HeaderValue::from_static(value));
    }
    (response.status, headers, response.body)
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Received>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn poll_url(&self) -> String {
        format!("{}/poll", self.base_url)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn received(&self) -> Vec<Received> {
        self.received
            .lock()
            .expect("received mutex must not be poisoned")
            .clone()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        received: Arc::new(Mutex::new(Vec::new())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/poll", any(poll_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        received: state.received,
        task,
    }
}

async fn unused_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind probe listener");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    format!("http://{address}/poll")
}

fn collect_events(controller: &RequestController) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    let finished = tx.clone();
    controller.on(EventKind::Finished, move |_, event| {
        let _ = finished.send(event.clone());
    });
    controller.on(EventKind::Error, move |_, event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event must arrive in time")
        .expect("event channel must stay open")
}

#[tokio::test]
async fn success_delivers_json_and_response_headers() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, json!({"events": [1, 2]})).with_header("x-poll-seq", "7"),
    ])
    .await;
    let poller = RequestController::new(RequestConfig::default()).expect("controller must build");
    let mut events = collect_events(&poller);

    poller
        .start(RequestDescriptor::get(server.poll_url()))
        .expect("start must be accepted");

    match next_event(&mut events).await {
        Event::Finished {
            code,
            result,
            headers,
        } => {
            assert_eq!(code, 200);
            assert_eq!(result, Payload::Json(json!({"events": [1, 2]})));
            assert_eq!(headers.get("x-poll-seq").map(String::as_str), Some("7"));
        }
        other => panic!("expected finished, got {other:?}"),
    }
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn retryable_status_is_retried_after_backoff() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::SERVICE_UNAVAILABLE, "busy"),
        MockResponse::json(StatusCode::OK, json!({"ok": true})),
    ])
    .await;
    let config = RequestConfig::default()
        .with_max_tries(2)
        .with_max_delay_ms(1);
    let poller = RequestController::new(config).expect("controller must build");
    let mut events = collect_events(&poller);

    let began = std::time::Instant::now();
    poller
        .start(RequestDescriptor::get(server.poll_url()))
        .expect("start must be accepted");

    match next_event(&mut events).await {
        Event::Finished { code, result, .. } => {
            assert_eq!(code, 200);
            assert_eq!(result, Payload::Json(json!({"ok": true})));
        }
        other => panic!("expected finished, got {other:?}"),
    }
    assert!(began.elapsed() >= Duration::from_secs(1));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn terminal_status_is_delivered_as_finished() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::NOT_FOUND, "gone")]).await;
    let poller = RequestController::new(RequestConfig::default().with_max_tries(3))
        .expect("controller must build");
    let mut events = collect_events(&poller);

    poller
        .start(RequestDescriptor::get(server.poll_url()))
        .expect("start must be accepted");

    match next_event(&mut events).await {
        Event::Finished { code, result, .. } => {
            assert_eq!(code, 404);
            assert_eq!(result, Payload::Text("gone".to_owned()));
        }
        other => panic!("expected finished, got {other:?}"),
    }
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    let url = unused_address().await;
    let poller = RequestController::new(RequestConfig::default()).expect("controller must build");
    let mut events = collect_events(&poller);

    poller
        .start(RequestDescriptor::get(url))
        .expect("start must be accepted");

    assert_eq!(
        next_event(&mut events).await,
        Event::Error {
            reason: ErrorReason::Transport
        }
    );
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, json!({})).with_delay(Duration::from_secs(2))
    ])
    .await;
    let poller = RequestController::new(RequestConfig::default().with_timeout_ms(100))
        .expect("controller must build");
    let mut events = collect_events(&poller);

    poller
        .start(RequestDescriptor::get(server.poll_url()))
        .expect("start must be accepted");

    assert_eq!(
        next_event(&mut events).await,
        Event::Error {
            reason: ErrorReason::Timeout
        }
    );
}

#[tokio::test]
async fn method_headers_and_body_reach_the_server() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!({}))]).await;
    let channel = HttpChannel::new();

    let mut headers = Headers::new();
    headers.insert("X-Poll-Cursor".to_owned(), "abc".to_owned());
    let response = channel
        .open(ChannelRequest {
            method: "PUT".to_owned(),
            url: server.poll_url(),
            headers,
            body: Some(r#"{"since":3}"#.to_owned()),
            credentialed: false,
        })
        .await;

    assert_eq!(response.code, 200);
    assert_eq!(response.reason.as_deref(), Some("OK"));
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].method, Method::PUT);
    assert_eq!(
        received[0]
            .headers
            .get("x-poll-cursor")
            .and_then(|value| value.to_str().ok()),
        Some("abc")
    );
    assert_eq!(received[0].body, r#"{"since":3}"#);
}

#[tokio::test]
async fn invalid_method_fails_without_contacting_server() {
    let server = spawn_server(Vec::new()).await;
    let response = HttpChannel::new()
        .open(ChannelRequest {
            method: "NOT A METHOD".to_owned(),
            url: server.poll_url(),
            headers: Headers::new(),
            body: None,
            credentialed: false,
        })
        .await;

    assert_eq!(response.code, 0);
    assert_eq!(server.hits(), 0);
}
