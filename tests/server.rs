//! End-to-end tests: real listeners on loopback, real backends behind them.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use hyper::body::Frame;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use rproxy::config::model::{Defaults, RuleConfig};
use rproxy::proxy::routing::RuleTable;
use rproxy::proxy::ForwardOptions;
use rproxy::server::{self, AppState, RelayState};

struct Proxy {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<Result<(), rproxy::error::RproxyError>>,
}

fn app_state(rules: &[RuleConfig], defaults: &Defaults) -> Arc<AppState> {
    Arc::new(AppState::new(
        RuleTable::compile(rules).unwrap(),
        ForwardOptions::from(defaults),
        server::build_http_client(),
    ))
}

async fn start_proxy(rules: Vec<RuleConfig>, defaults: Defaults) -> Proxy {
    let state = app_state(&rules, &defaults);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(server::serve_plain(
        listener,
        server::build_router(state.clone()),
        rx,
    ));
    Proxy {
        addr,
        state,
        shutdown,
        handle,
    }
}

async fn serve_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

fn header(req: &Request, name: &str) -> Value {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map_or(Value::Null, |v| Value::String(v.to_string()))
}

async fn echo(req: Request) -> Json<Value> {
    let mut summary = json!({
        "method": req.method().as_str(),
        "uri": req.uri().to_string(),
        "host": header(&req, "host"),
        "xff": header(&req, "x-forwarded-for"),
        "proto": header(&req, "x-forwarded-proto"),
        "port": header(&req, "x-forwarded-port"),
        "connection": header(&req, "connection"),
    });
    let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
    summary["body"] = Value::String(String::from_utf8_lossy(&body).into_owned());
    Json(summary)
}

async fn echo_backend() -> SocketAddr {
    serve_backend(Router::new().fallback(echo)).await
}

fn rule(path: &str, rewrite: Option<&str>, backend: SocketAddr) -> RuleConfig {
    RuleConfig::new(path, rewrite, &format!("http://{backend}"))
}

async fn get_json(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn forwards_and_rewrites_through_first_matching_rule() {
    let backend = echo_backend().await;
    let proxy = start_proxy(
        vec![
            rule("^/cms(/|$)", None, backend),
            rule("^/site(/|$)", None, backend),
            rule("^", Some("/site"), backend),
        ],
        Defaults::default(),
    )
    .await;

    let (status, body) = get_json(&format!("http://{}/cms/page", proxy.addr)).await;
    assert_eq!(status, 200);
    assert_eq!(body["uri"], "/cms/page");

    let (_, body) = get_json(&format!("http://{}/other?x=1&y=2", proxy.addr)).await;
    assert_eq!(body["uri"], "/site/other?x=1&y=2");

    let (_, body) = get_json(&format!("http://{}/", proxy.addr)).await;
    assert_eq!(body["uri"], "/site/");
}

#[tokio::test]
async fn request_body_and_method_reach_backend() {
    let backend = echo_backend().await;
    let proxy = start_proxy(vec![rule("^/", None, backend)], Defaults::default()).await;

    let resp = reqwest::Client::new()
        .put(format!("http://{}/items/7", proxy.addr))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["body"], "payload");
}

#[tokio::test]
async fn host_header_preserved_unless_change_origin() {
    let backend = echo_backend().await;
    let proxy = start_proxy(vec![rule("^/", None, backend)], Defaults::default()).await;
    let (_, body) = get_json(&format!("http://{}/", proxy.addr)).await;
    assert_eq!(body["host"], proxy.addr.to_string());

    let proxy = start_proxy(
        vec![rule("^/", None, backend)],
        Defaults {
            change_origin: true,
            ..Defaults::default()
        },
    )
    .await;
    let (_, body) = get_json(&format!("http://{}/", proxy.addr)).await;
    assert_eq!(body["host"], backend.to_string());
}

#[tokio::test]
async fn forwarding_headers_are_added() {
    let backend = echo_backend().await;
    let proxy = start_proxy(vec![rule("^/", None, backend)], Defaults::default()).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/", proxy.addr))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["xff"], "203.0.113.9, 127.0.0.1");
    assert_eq!(body["proto"], "http");
    assert_eq!(body["port"], proxy.addr.port().to_string());
    assert_eq!(body["connection"], Value::Null);
}

#[tokio::test]
async fn local_client_cannot_pose_as_tls_relay() {
    let backend = serve_backend(Router::new().fallback(|req: Request| async move {
        Json(json!({
            "proto": header(&req, "x-forwarded-proto"),
            "port": header(&req, "x-forwarded-port"),
            "relay": header(&req, "x-rproxy-relay"),
        }))
    }))
    .await;
    let proxy = start_proxy(vec![rule("^/", None, backend)], Defaults::default()).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/", proxy.addr))
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-port", "443")
        .header("x-rproxy-relay", "guessed")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["proto"], "http");
    assert_eq!(body["port"], proxy.addr.port().to_string());
    assert_eq!(body["relay"], Value::Null);
}

#[tokio::test]
async fn target_base_path_is_prepended() {
    let backend = echo_backend().await;
    let proxy = start_proxy(
        vec![RuleConfig::new(
            "^/",
            None,
            &format!("http://{backend}/mount/"),
        )],
        Defaults::default(),
    )
    .await;
    let (_, body) = get_json(&format!("http://{}/a/b", proxy.addr)).await;
    assert_eq!(body["uri"], "/mount/a/b");
}

#[tokio::test]
async fn unmatched_request_is_404_without_backend_contact() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while backend.accept().await.is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let proxy = start_proxy(
        vec![rule("^/", None, backend_addr).with_host("only.example.com")],
        Defaults::default(),
    )
    .await;

    let resp = reqwest::get(format!("http://{}/anything", proxy.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().contains_key("x-correlation-id"));
    assert!(resp.bytes().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_backend_is_502() {
    let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gone_addr = gone.local_addr().unwrap();
    drop(gone);

    let proxy = start_proxy(vec![rule("^/", None, gone_addr)], Defaults::default()).await;
    let resp = reqwest::get(format!("http://{}/", proxy.addr)).await.unwrap();
    assert_eq!(resp.status(), 502);
}

async fn slow(_: Request) -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "late"
}

#[tokio::test]
async fn slow_backend_is_504() {
    let backend = serve_backend(Router::new().fallback(slow)).await;
    let proxy = start_proxy(
        vec![rule("^/", None, backend)],
        Defaults {
            timeout: 200,
            ..Defaults::default()
        },
    )
    .await;

    let resp = reqwest::get(format!("http://{}/", proxy.addr)).await.unwrap();
    assert_eq!(resp.status(), 504);
}

#[tokio::test]
async fn slow_backend_does_not_delay_other_requests() {
    let slow_backend = serve_backend(Router::new().fallback(slow)).await;
    let fast_backend = echo_backend().await;
    let proxy = start_proxy(
        vec![
            rule("^/slow", None, slow_backend),
            rule("^/", None, fast_backend),
        ],
        Defaults::default(),
    )
    .await;

    let slow_url = format!("http://{}/slow", proxy.addr);
    let pending = tokio::spawn(async move { reqwest::get(slow_url).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fast = tokio::time::timeout(
        Duration::from_secs(1),
        get_json(&format!("http://{}/fast", proxy.addr)),
    )
    .await
    .expect("fast request should not wait for the slow one");
    assert_eq!(fast.0, 200);
    assert_eq!(fast.1["uri"], "/fast");

    pending.abort();
}

/// Response body fed chunk by chunk from the test.
struct ChannelBody(mpsc::Receiver<Bytes>);

impl hyper::body::Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.0.poll_recv(cx).map(|chunk| chunk.map(|b| Ok(Frame::data(b))))
    }
}

#[tokio::test]
async fn response_body_streams_before_backend_finishes() {
    let (chunks_tx, chunks_rx) = mpsc::channel::<mpsc::Receiver<Bytes>>(1);
    let chunks_rx = Arc::new(tokio::sync::Mutex::new(chunks_rx));
    let backend = serve_backend(Router::new().fallback(move || {
        let chunks_rx = chunks_rx.clone();
        async move {
            let rx = chunks_rx.lock().await.recv().await.unwrap();
            Response::new(Body::new(ChannelBody(rx))).into_response()
        }
    }))
    .await;
    let proxy = start_proxy(vec![rule("^/", None, backend)], Defaults::default()).await;

    let (body_tx, body_rx) = mpsc::channel(4);
    chunks_tx.send(body_rx).await.unwrap();
    body_tx.send(Bytes::from_static(b"first")).await.unwrap();

    let mut resp = reqwest::get(format!("http://{}/stream", proxy.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let first = tokio::time::timeout(Duration::from_secs(2), resp.chunk())
        .await
        .expect("first chunk should arrive while the backend is still sending")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"first");

    body_tx.send(Bytes::from_static(b"second")).await.unwrap();
    drop(body_tx);

    let mut rest = Vec::new();
    while let Some(chunk) = resp.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"second");
}

#[tokio::test]
async fn slow_upload_is_not_cut_off_by_timeout() {
    let backend = echo_backend().await;
    let proxy = start_proxy(
        vec![rule("^/", None, backend)],
        Defaults {
            timeout: 300,
            ..Defaults::default()
        },
    )
    .await;

    let mut stream = tokio::net::TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(
            b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    // 10 bytes over ~800ms, well past the 300ms timeout in total.
    for byte in b"0123456789" {
        tokio::time::sleep(Duration::from_millis(80)).await;
        stream.write_all(&[*byte]).await.unwrap();
    }

    let mut raw = Vec::new();
    let _ = stream.read_to_end(&mut raw).await;
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200"), "unexpected response: {text}");
    let (_, body) = text.split_once("\r\n\r\n").unwrap();
    let body: Value = serde_json::from_str(body).unwrap();
    assert_eq!(body["body"], "0123456789");
}

#[tokio::test]
async fn client_disconnect_closes_backend_connection() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let (received_tx, received_rx) = tokio::sync::oneshot::channel();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut conn, _) = backend.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = conn.read(&mut buf).await;
        let _ = received_tx.send(());
        // Never answer; wait for the proxy to hang up.
        while matches!(conn.read(&mut buf).await, Ok(n) if n > 0) {}
        let _ = closed_tx.send(());
    });

    let proxy = start_proxy(vec![rule("^/", None, backend_addr)], Defaults::default()).await;
    let mut client = tokio::net::TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"GET /long HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), received_rx)
        .await
        .expect("backend should receive the request")
        .unwrap();
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("backend connection should close after the client leaves")
        .unwrap();
}

#[tokio::test]
async fn graceful_shutdown_stops_listener() {
    let backend = echo_backend().await;
    let proxy = start_proxy(vec![rule("^/", None, backend)], Defaults::default()).await;
    assert!(reqwest::get(format!("http://{}/", proxy.addr)).await.is_ok());

    proxy.shutdown.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), proxy.handle)
        .await
        .expect("server should stop after shutdown");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn tls_traffic_is_relayed_through_plaintext_rules() {
    let backend = echo_backend().await;
    let primary = start_proxy(
        vec![rule("^/cms(/|$)", None, backend), rule("^", Some("/site"), backend)],
        Defaults::default(),
    )
    .await;

    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let acceptor =
        rproxy::tls::build_acceptor(key_pair.serialize_pem().as_bytes(), cert.pem().as_bytes())
            .unwrap();

    let tls_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tls_addr = tls_listener.local_addr().unwrap();
    let relay = Arc::new(RelayState::new(
        primary.addr,
        &primary.state,
        Duration::from_secs(5),
    ));
    let (_tls_shutdown, rx) = watch::channel(false);
    tokio::spawn(server::serve_tls(
        tls_listener,
        acceptor,
        server::build_relay_router(relay),
        rx,
    ));

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    let tcp = tokio::net::TcpStream::connect(tls_addr).await.unwrap();
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(server_name, tcp).await.unwrap();
    stream
        .write_all(b"GET /about?lang=en HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut raw = Vec::new();
    // A peer that skips close_notify surfaces as an error after the data.
    let _ = stream.read_to_end(&mut raw).await;
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200"), "unexpected response: {text}");

    let (_, body) = text.split_once("\r\n\r\n").unwrap();
    let body: Value = serde_json::from_str(body).unwrap();
    assert_eq!(body["uri"], "/site/about?lang=en");
    assert_eq!(body["host"], "localhost");
    assert_eq!(body["proto"], "https");
    assert_eq!(body["port"], "443");
}

#[tokio::test]
async fn tls_handshake_failure_does_not_stop_listener() {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let acceptor =
        rproxy::tls::build_acceptor(key_pair.serialize_pem().as_bytes(), cert.pem().as_bytes())
            .unwrap();
    let tls_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tls_addr = tls_listener.local_addr().unwrap();
    let app = app_state(
        &[RuleConfig::new("^", None, "http://127.0.0.1:9")],
        &Defaults::default(),
    );
    let relay = Arc::new(RelayState::new(
        "127.0.0.1:9".parse().unwrap(),
        &app,
        Duration::from_secs(1),
    ));
    let (_tls_shutdown, rx) = watch::channel(false);
    tokio::spawn(server::serve_tls(
        tls_listener,
        acceptor,
        server::build_relay_router(relay),
        rx,
    ));

    // Plaintext garbage on the TLS port.
    let mut junk = tokio::net::TcpStream::connect(tls_addr).await.unwrap();
    junk.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut sink = Vec::new();
    let _ = junk.read_to_end(&mut sink).await;

    // The listener still accepts.
    assert!(tokio::net::TcpStream::connect(tls_addr).await.is_ok());
}
