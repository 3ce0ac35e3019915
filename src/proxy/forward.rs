//! Streaming request forwarding to a single backend.
//!
//! [`forward`] rewrites the request's URI and headers for the chosen
//! [`Target`], sends it through the shared pooled client and hands the
//! backend's response back with its body still streaming. Neither body
//! is buffered. Dropping the returned future (client went away) drops
//! the in-flight backend exchange with it.
//!
//! The timeout bounds how long the backend may go without progress: the
//! connect, each accepted request-body frame and the response head. Time
//! spent waiting for the client to send more of its body is not counted,
//! so slow uploads are not cut off.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{StatusCode, Version};
use axum::response::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::watch;

use super::headers::{build_forwarded_headers, strip_hop_by_hop, ForwardContext};
use super::routing::Target;
use super::ForwardOptions;
use crate::server::HttpClient;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid backend URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: axum::http::uri::InvalidUri,
    },

    #[error("backend unreachable: {0}")]
    Unreachable(#[source] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ForwardError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidUri { .. } | Self::Unreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub struct Forward<'a> {
    pub client: &'a HttpClient,
    pub target: &'a Target,
    pub path_and_query: &'a str,
    pub options: &'a ForwardOptions,
    pub context: ForwardContext<'a>,
}

pub async fn forward(req: Request, fwd: Forward<'_>) -> Result<Response, ForwardError> {
    let uri = fwd
        .target
        .uri(fwd.path_and_query)
        .map_err(|source| ForwardError::InvalidUri {
            uri: format!("{}{}", fwd.target, fwd.path_and_query),
            source,
        })?;

    let (mut parts, body) = req.into_parts();
    parts.headers = build_forwarded_headers(&parts.headers, &fwd.context, fwd.target, fwd.options);
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    let (awaiting_client, mut progress) = watch::channel(false);
    let body = Body::new(UploadBody {
        inner: body,
        awaiting_client,
    });
    let exchange = fwd.client.request(Request::from_parts(parts, body));
    tokio::pin!(exchange);

    let timeout = fwd.options.timeout;
    let mut uploading = true;
    let response = loop {
        let awaiting_client = uploading && *progress.borrow_and_update();
        let deadline = async {
            if awaiting_client {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(timeout).await;
            }
        };

        tokio::select! {
            result = &mut exchange => break result.map_err(ForwardError::Unreachable)?,
            changed = progress.changed(), if uploading => {
                // Sender gone: the request body is finished or dropped.
                if changed.is_err() {
                    uploading = false;
                }
            }
            () = deadline => return Err(ForwardError::Timeout(timeout)),
        }
    };

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Outbound request body that reports whether the backend is currently
/// waiting on the client for more data.
struct UploadBody {
    inner: Body,
    awaiting_client: watch::Sender<bool>,
}

impl HttpBody for UploadBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let poll = Pin::new(&mut self.inner).poll_frame(cx);
        self.awaiting_client.send_replace(poll.is_pending());
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
