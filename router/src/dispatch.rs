//! Single-call dispatch and the response type shared with the HTTP layer.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::{forward::Forwarder, routes::RouteTable, rpc::Call};

#[derive(Debug, Clone)]
/// HTTP response returned to the original caller.
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    /// Plain text response (no content-type is set).
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(body.into()),
        }
    }

    /// `200 OK` with `Content-Type: application/json`.
    pub fn json(body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }
}

impl axum::response::IntoResponse for ProxyResponse {
    fn into_response(self) -> axum::response::Response {
        let mut res = axum::response::Response::new(axum::body::Body::from(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

#[derive(Debug)]
pub enum DispatchError {
    /// The upstream could not be reached or did not produce a response.
    Forward(anyhow::Error),
}

/// Forward one call, byte-for-byte, to its resolved destination and relay the reply.
pub async fn dispatch_single(
    table: &RouteTable,
    forwarder: &dyn Forwarder,
    call: Call,
) -> Result<ProxyResponse, DispatchError> {
    let destination = table.resolve(call.method());
    tracing::info!(
        event = "proxy_single",
        method = %call.method(),
        destination = %destination,
        "forwarding call"
    );

    let upstream = forwarder
        .forward(destination, call.raw)
        .await
        .map_err(DispatchError::Forward)?;

    let mut headers = HeaderMap::with_capacity(upstream.headers.len());
    for (name, value) in upstream.headers.iter() {
        if is_hop_by_hop_header(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    Ok(ProxyResponse {
        status: upstream.status,
        headers,
        body: upstream.body,
    })
}

fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    // https://datatracker.ietf.org/doc/html/rfc2616#section-13.5.1
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
