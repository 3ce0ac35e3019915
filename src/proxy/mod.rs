//! Request dispatch: match, rewrite, forward.
//!
//! [`dispatch`] is the Axum fallback for the plaintext listener. It looks
//! the request up in the [`RuleTable`](routing::RuleTable), rewrites the
//! path if the rule says so and streams the exchange through
//! [`forward`](forward::forward). [`relay`] is the TLS listener's handler:
//! every decrypted request goes to the plaintext listener on loopback, so
//! TLS traffic takes the same matching path as plain traffic.
//!
//! Matching and rewriting are synchronous; the only await point is the
//! backend exchange.

pub mod forward;
pub mod headers;
pub mod rewrite;
pub mod routing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::model::Defaults;
use crate::server::{AppState, RelayState};
use forward::{Forward, ForwardError};
use headers::{is_relayed, ForwardContext, X_CORRELATION_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOptions {
    pub timeout: Duration,
    pub forward_headers: bool,
    pub change_origin: bool,
}

impl From<&Defaults> for ForwardOptions {
    fn from(defaults: &Defaults) -> Self {
        Self {
            timeout: Duration::from_millis(defaults.timeout),
            forward_headers: defaults.forward_headers,
            change_origin: defaults.change_origin,
        }
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(&X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from)
}

/// `Host` header, falling back to the URI authority. Empty when neither is set.
fn request_host(req: &Request) -> &str {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
}

fn with_correlation_id(mut response: Response, correlation_id: &str) -> Response {
    if let Ok(val) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(X_CORRELATION_ID, val);
    }
    response
}

fn failure_response(err: &ForwardError, correlation_id: &str) -> Response {
    with_correlation_id(err.status().into_response(), correlation_id)
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let correlation_id = correlation_id(req.headers());
    let relayed = is_relayed(req.headers(), &state.relay_token);
    let method = req.method().clone();
    let host = request_host(&req).to_string();
    let path = req.uri().path().to_string();

    let Some(rule) = state.rules.find(&host, &path) else {
        tracing::warn!(
            correlation_id = %correlation_id,
            method = %method,
            host = %host,
            path = %path,
            "no mapping found"
        );
        return with_correlation_id(StatusCode::NOT_FOUND.into_response(), &correlation_id);
    };

    let forwarded_path = rewrite::rewrite(rule, &path);
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{forwarded_path}?{query}"),
        None => forwarded_path.into_owned(),
    };

    tracing::info!(
        correlation_id = %correlation_id,
        method = %method,
        host = %host,
        path = %path,
        forwarded_path = %path_and_query,
        target = %rule.target,
        "request mapped"
    );

    let request = Forward {
        client: &state.http_client,
        target: &rule.target,
        path_and_query: &path_and_query,
        options: &state.options,
        context: ForwardContext {
            client_addr: addr,
            proto: "http",
            correlation_id: &correlation_id,
            relayed,
            relay_token: None,
        },
    };

    match forward::forward(req, request).await {
        Ok(response) => with_correlation_id(response, &correlation_id),
        Err(e) => {
            tracing::error!(
                correlation_id = %correlation_id,
                target = %rule.target,
                path = %path_and_query,
                error = %e,
                "backend request failed"
            );
            failure_response(&e, &correlation_id)
        }
    }
}

pub async fn relay(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let correlation_id = correlation_id(req.headers());
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());

    tracing::debug!(
        correlation_id = %correlation_id,
        client = %addr,
        path = %path_and_query,
        "relaying TLS request"
    );

    let request = Forward {
        client: &state.http_client,
        target: &state.upstream,
        path_and_query: &path_and_query,
        options: &state.options,
        context: ForwardContext {
            client_addr: addr,
            proto: "https",
            correlation_id: &correlation_id,
            relayed: false,
            relay_token: Some(&state.relay_token),
        },
    };

    match forward::forward(req, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                correlation_id = %correlation_id,
                upstream = %state.upstream,
                error = %e,
                "TLS relay failed"
            );
            failure_response(&e, &correlation_id)
        }
    }
}
