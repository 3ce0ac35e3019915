//! Header construction, forwarding, and hop-by-hop stripping.
//!
//! [`build_forwarded_headers`] clones the original client headers, strips
//! hop-by-hop headers, optionally rewrites `Host`, adds the
//! `X-Forwarded-*` family and the correlation id.
//!
//! The TLS listener marks its relayed requests with [`X_RPROXY_RELAY`]
//! carrying a per-process token. Only a request bearing that token may keep
//! its incoming `X-Forwarded-Proto/Host/Port`; the marker never leaves the
//! proxy.

use std::net::SocketAddr;
use std::sync::LazyLock;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use super::routing::Target;
use super::ForwardOptions;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
pub const X_RPROXY_RELAY: HeaderName = HeaderName::from_static("x-rproxy-relay");

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Inbound side of one forwarded exchange.
#[derive(Debug, Clone, Copy)]
pub struct ForwardContext<'a> {
    pub client_addr: SocketAddr,
    /// Scheme the client used to reach this listener.
    pub proto: &'static str,
    pub correlation_id: &'a str,
    /// The request arrived from our own TLS listener.
    pub relayed: bool,
    /// Set on the TLS hop: mark the outbound request as relayed.
    pub relay_token: Option<&'a str>,
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Port the client addressed: explicit in `Host`, else the scheme default.
fn forwarded_port(host: Option<&HeaderValue>, proto: &str) -> String {
    host.and_then(|v| v.to_str().ok())
        .and_then(|h| h.rsplit_once(':'))
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        .map_or_else(
            || if proto == "https" { "443" } else { "80" }.to_string(),
            String::from,
        )
}

#[must_use]
pub fn build_forwarded_headers(
    original: &HeaderMap,
    ctx: &ForwardContext<'_>,
    target: &Target,
    options: &ForwardOptions,
) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(&X_RPROXY_RELAY);

    if options.change_origin {
        if let Ok(val) = HeaderValue::from_str(target.authority()) {
            headers.insert(header::HOST, val);
        }
    }

    if options.forward_headers {
        let client_ip = ctx.client_addr.ip().to_string();

        // X-Forwarded-For: append to chain, folding repeated lines
        let mut chain: Vec<&str> = original
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        chain.push(&client_ip);
        if let Ok(val) = HeaderValue::from_str(&chain.join(", ")) {
            headers.insert(X_FORWARDED_FOR, val);
        }

        // On a relayed request these describe the real client connection
        // and win over this hop's.
        let mut set = |name: HeaderName, value: Option<HeaderValue>| {
            if ctx.relayed && original.contains_key(&name) {
                return;
            }
            match value {
                Some(val) => {
                    headers.insert(name, val);
                }
                None => {
                    headers.remove(name);
                }
            }
        };

        set(X_FORWARDED_PROTO, Some(HeaderValue::from_static(ctx.proto)));
        set(X_FORWARDED_HOST, original.get(header::HOST).cloned());
        set(
            X_FORWARDED_PORT,
            HeaderValue::from_str(&forwarded_port(original.get(header::HOST), ctx.proto)).ok(),
        );
    }

    if let Ok(val) = HeaderValue::from_str(ctx.correlation_id) {
        headers.insert(X_CORRELATION_ID, val);
    }

    if let Some(token) = ctx.relay_token.and_then(|t| HeaderValue::from_str(t).ok()) {
        headers.insert(X_RPROXY_RELAY, token);
    }

    headers
}

/// Whether `headers` carry the relay marker for `token`.
#[must_use]
pub fn is_relayed(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(&X_RPROXY_RELAY)
        .is_some_and(|v| v.as_bytes() == token.as_bytes())
}
