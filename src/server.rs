//! Listener setup, shared state, and shutdown.
//!
//! Contains [`AppState`] (the immutable rule table, forwarding options
//! and pooled HTTP client shared by every plaintext connection),
//! [`RelayState`] for the TLS listener, router builders, the two serve
//! loops and [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::trace::TraceLayer;

use crate::error::RproxyError;
use crate::proxy::routing::{RuleTable, Target};
use crate::proxy::{self, ForwardOptions};

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, axum::body::Body>;

pub struct AppState {
    pub rules: RuleTable,
    pub options: ForwardOptions,
    pub http_client: HttpClient,
    /// Marks requests relayed by our own TLS listener.
    pub relay_token: String,
}

impl AppState {
    #[must_use]
    pub fn new(rules: RuleTable, options: ForwardOptions, http_client: HttpClient) -> Self {
        Self {
            rules,
            options,
            http_client,
            relay_token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

pub struct RelayState {
    /// The plaintext listener.
    pub upstream: Target,
    pub options: ForwardOptions,
    pub http_client: HttpClient,
    pub relay_token: String,
}

impl RelayState {
    /// Relay to the plaintext listener at `primary`, served by `app`.
    #[must_use]
    pub fn new(primary: SocketAddr, app: &AppState, timeout: Duration) -> Self {
        Self {
            upstream: Target::local(primary),
            options: ForwardOptions {
                timeout,
                forward_headers: true,
                change_origin: false,
            },
            http_client: app.http_client.clone(),
            relay_token: app.relay_token.clone(),
        }
    }
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // When multiple rustls crypto providers are compiled in, rustls cannot
    // auto-detect which one to use. Explicitly install `ring` as the default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy::dispatch)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub fn build_relay_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .fallback(proxy::relay)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RproxyError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RproxyError::Bind { addr, source })
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // Sender dropped counts as shutdown too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Serve plaintext HTTP until `shutdown` flips.
pub async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RproxyError> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown))
    .await?;
    Ok(())
}

/// Accept TLS connections until `shutdown` flips, serving HTTP/1.1 over
/// each with `router`. Handshake and connection errors stay local to the
/// connection.
pub async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: watch::Receiver<bool>,
) {
    let stop = wait_for_shutdown(shutdown);
    tokio::pin!(stop);

    loop {
        let accepted = tokio::select! {
            () = &mut stop => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept TLS connection");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(client = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service =
                hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
                    req.extensions_mut().insert(ConnectInfo(peer));
                    router.clone().oneshot(req)
                });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                tracing::debug!(client = %peer, error = %e, "TLS connection closed with error");
            }
        });
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
