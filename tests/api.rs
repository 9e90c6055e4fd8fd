mod common;

use std::net::TcpListener as StdListener;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use sales_api::expvar::Expvar;
use sales_api::middleware::{Errors, Logger, Metrics, Panics, Timeout};
use sales_api::{
    App, Context, Error, ErrorResponse, HandlerError, Request, Response, ServerConfig,
    ShutdownSignal, SignalWatcher, TRACE_ID_HEADER, debug,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use common::{TestServer, spawn};

async fn slow_server(delay: Duration, config: ServerConfig) -> (TestServer, SignalWatcher) {
    let watcher = SignalWatcher::new();
    let mut app = App::new(watcher.handle()).layer(Errors);
    app.handle(Method::GET, "/slow", move |_ctx: Context, _req: Request| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, HandlerError>(Response::text("done"))
    })
    .unwrap();
    (spawn(app, config).await, watcher)
}

#[tokio::test]
async fn hack_returns_status_document() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), ServerConfig::default()).await;

    let resp = reqwest::get(server.url("/hack")).await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let trace_id = resp.headers()[TRACE_ID_HEADER].to_str().unwrap().to_owned();
    assert!(uuid::Uuid::parse_str(&trace_id).is_ok());
    assert_eq!(resp.text().await.unwrap(), r#"{"Status":"HACK"}"#);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), ServerConfig::default()).await;

    let resp = reqwest::get(server.url("/nope")).await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(body, ErrorResponse::new("Not Found"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn wrong_method_is_not_allowed() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), ServerConfig::default()).await;

    let resp = reqwest::Client::new().post(server.url("/hack")).send().await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()["allow"], "GET");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn duplicate_route_is_rejected() {
    let watcher = SignalWatcher::new();
    let mut app = common::api(&watcher);

    let err = app.handle(Method::GET, "/hack", sales_api::handlers::hack).unwrap_err();

    match err {
        Error::Route { method, path, .. } => {
            assert_eq!(method, Method::GET);
            assert_eq!(path, "/hack");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn debug_port_collision_keeps_api_serving() {
    let taken = StdListener::bind("127.0.0.1:0").unwrap();
    let debug_addr = taken.local_addr().unwrap();

    let watcher = SignalWatcher::new();
    let debug_app = debug::mux(debug::DebugMuxConfig {
        build: Arc::from("test"),
        shutdown: watcher.handle(),
        vars: Arc::new(Expvar::new()),
        prometheus: None,
        write_timeout: Duration::from_secs(10),
    })
    .unwrap();
    let token = CancellationToken::new();
    let debug_task = debug::spawn(debug_addr, debug_app, ServerConfig::default(), token.clone());

    // The bind failure ends the debug task on its own.
    tokio::time::timeout(Duration::from_secs(2), debug_task).await.unwrap().unwrap();

    let server = spawn(common::api(&watcher), ServerConfig::default()).await;
    let resp = reqwest::get(server.url("/hack")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn debug_routes_report_process_state() {
    let watcher = SignalWatcher::new();
    let vars = Arc::new(Expvar::new());
    vars.add_request();
    let app = debug::mux(debug::DebugMuxConfig {
        build: Arc::from("test"),
        shutdown: watcher.handle(),
        vars,
        prometheus: None,
        write_timeout: Duration::from_secs(10),
    })
    .unwrap();
    let server = spawn(app, ServerConfig::default()).await;

    let body: serde_json::Value = reqwest::get(server.url("/debug/vars")).await.unwrap().json().await.unwrap();
    assert_eq!(body["build"], "test");
    assert_eq!(body["requests"], 1);

    let body: serde_json::Value = reqwest::get(server.url("/debug/liveness")).await.unwrap().json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "status": "up", "build": "test" }));

    let body: serde_json::Value = reqwest::get(server.url("/debug/readiness")).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = reqwest::get(server.url("/debug/metrics")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn drain_lets_in_flight_request_finish() {
    let (server, _watcher) = slow_server(Duration::from_millis(300), ServerConfig::default()).await;

    let url = server.url("/slow");
    let request = tokio::spawn(async move { reqwest::get(url).await?.text().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.stop().await.unwrap();

    let body = request.await.unwrap().unwrap();
    assert_eq!(body, "done");
}

#[tokio::test]
async fn drain_gives_up_after_shutdown_timeout() {
    let config = ServerConfig { shutdown_timeout: Duration::from_millis(100), ..ServerConfig::default() };
    let (server, _watcher) = slow_server(Duration::from_secs(5), config).await;

    let url = server.url("/slow");
    let _request = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    match server.stop().await {
        Err(Error::DrainTimeout { remaining, .. }) => assert_eq!(remaining, 1),
        other => panic!("expected drain timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_handler_is_failed_inside_the_middleware() {
    let watcher = SignalWatcher::new();
    let vars = Arc::new(Expvar::new());
    let mut app = App::new(watcher.handle())
        .layer(Logger)
        .layer(Errors)
        .layer(Metrics::new(Arc::clone(&vars)))
        .layer(Timeout::new(Duration::from_millis(50)))
        .layer(Panics);
    app.handle(Method::GET, "/slow", |_ctx: Context, _req: Request| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok::<_, HandlerError>(Response::text("done"))
    })
    .unwrap();
    let server = spawn(app, ServerConfig::default()).await;

    let resp = reqwest::get(server.url("/slow")).await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.error, "request timed out");

    let vars = vars.snapshot();
    assert_eq!(vars.requests, 1);
    assert_eq!(vars.errors, 1);
    assert_eq!(vars.in_flight, 0);

    server.stop().await.unwrap();
}

// ── Connection timeouts, on raw sockets ──────────────────────────────────────

const GET_HACK: &[u8] = b"GET /hack HTTP/1.1\r\nhost: localhost\r\n\r\n";

/// One read, bounded; `None` means the peer closed the connection.
async fn read_some(stream: &mut TcpStream) -> Option<String> {
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("no answer from server")
        .unwrap_or(0);
    (n > 0).then(|| String::from_utf8_lossy(&buf[..n]).into_owned())
}

fn timeouts(read: u64, idle: u64) -> ServerConfig {
    ServerConfig {
        read_timeout: Duration::from_millis(read),
        idle_timeout: Duration::from_millis(idle),
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn keep_alive_outlives_read_timeout() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), timeouts(300, 10_000)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(GET_HACK).await.unwrap();
    assert!(read_some(&mut stream).await.unwrap().contains(r#"{"Status":"HACK"}"#));

    tokio::time::sleep(Duration::from_secs(1)).await;

    stream.write_all(GET_HACK).await.unwrap();
    let second = read_some(&mut stream).await.expect("connection closed before idle timeout");
    assert!(second.starts_with("HTTP/1.1 200"));

    drop(stream);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn idle_keep_alive_is_closed() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), timeouts(5_000, 300)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(GET_HACK).await.unwrap();
    assert!(read_some(&mut stream).await.is_some());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(read_some(&mut stream).await, None);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn stalled_request_head_is_dropped() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), timeouts(200, 10_000)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(b"GET /hack HTTP/1.1\r\nhost: local").await.unwrap();
    assert_eq!(read_some(&mut stream).await, None);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn slow_body_is_request_timeout() {
    let watcher = SignalWatcher::new();
    let server = spawn(common::api(&watcher), timeouts(200, 10_000)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream
        .write_all(b"GET /hack HTTP/1.1\r\nhost: localhost\r\ncontent-length: 100\r\n\r\nabc")
        .await
        .unwrap();
    let resp = read_some(&mut stream).await.expect("no response");
    assert!(resp.starts_with("HTTP/1.1 408"), "{resp}");
    assert!(resp.contains("timed out reading request body"));

    drop(stream);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_failure_reaches_the_watcher() {
    let mut watcher = SignalWatcher::new();
    let mut app = App::new(watcher.handle()).layer(Errors).layer(Panics);
    app.handle(Method::GET, "/fatal", |_ctx: Context, _req: Request| async {
        Err::<Response, _>(HandlerError::shutdown("integrity check failed"))
    })
    .unwrap();
    let server = spawn(app, ServerConfig::default()).await;

    let resp = reqwest::get(server.url("/fatal")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let signal = tokio::time::timeout(Duration::from_secs(1), watcher.recv()).await.unwrap();
    assert_eq!(signal, ShutdownSignal::Requested);

    server.stop().await.unwrap();
}
