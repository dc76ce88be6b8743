use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};

use crate::routes::Endpoint;

const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, Clone)]
/// Raw upstream HTTP response.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Delivers a JSON payload to an upstream endpoint.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, destination: &Endpoint, payload: Bytes)
        -> anyhow::Result<UpstreamResponse>;
}

/// `reqwest`-backed forwarder. Connection pooling is whatever `reqwest::Client` provides.
#[derive(Clone)]
pub struct HttpForwarder {
    http: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        destination: &Endpoint,
        payload: Bytes,
    ) -> anyhow::Result<UpstreamResponse> {
        let resp = self
            .http
            .post(destination.as_str())
            .header(header::CONTENT_TYPE, APPLICATION_JSON)
            .header(header::ACCEPT, APPLICATION_JSON)
            .body(payload)
            .send()
            .await?;

        let status = StatusCode::from_u16(resp.status().as_u16())?;
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
