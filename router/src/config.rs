//! Proxy configuration loaded from YAML.
//!
//! The document names a default upstream plus an ordered list of per-method overrides:
//!
//! ```yaml
//! default_url: "https://mainnet.example/v3/${API_KEY}"
//! routes:
//!   - method: eth_chainId
//!     url: "https://polygon.example"
//! ```

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::template::{render_env_template, render_env_template_with};

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
/// What a batch response contains for calls whose destination group failed.
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// Failed groups contribute nothing to the merged array.
    #[default]
    Omit,
    /// Each call with an `id` in a failed group gets a JSON-RPC error record.
    ErrorRecords,
}

#[derive(Debug, Clone, Deserialize)]
/// One `method -> url` entry.
pub struct RouteConfig {
    /// JSON-RPC method name, matched exactly.
    pub method: String,
    /// Upstream endpoint receiving calls for `method`.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
/// Top-level proxy configuration.
pub struct ProxyConfig {
    /// Upstream used for any method without an explicit route.
    pub default_url: String,

    #[serde(default)]
    /// Method-specific routes. Later duplicates override earlier ones.
    pub routes: Vec<RouteConfig>,

    #[serde(default = "default_max_body_bytes")]
    /// Maximum accepted inbound request body size.
    pub max_body_bytes: usize,

    #[serde(default)]
    /// Optional overall timeout for one upstream forward.
    pub upstream_timeout_ms: Option<u64>,

    #[serde(default)]
    pub batch_failure_policy: BatchFailurePolicy,
}

impl ProxyConfig {
    /// Render `${VAR}` placeholders from the process environment, then parse and validate.
    pub fn from_yaml_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let rendered = render_env_template(utf8(bytes)?).context("render config template")?;
        Self::from_rendered(&rendered)
    }

    pub fn from_yaml_bytes_with_env(
        bytes: &[u8],
        lookup: impl FnMut(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let rendered =
            render_env_template_with(utf8(bytes)?, lookup).context("render config template")?;
        Self::from_rendered(&rendered)
    }

    fn from_rendered(rendered: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_str(rendered).context("parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a config file.
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read config file {path}"))?;
        Self::from_yaml_bytes(&bytes)
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.default_url.trim().is_empty() {
            anyhow::bail!("default_url is required in configuration");
        }
        validate_url(&self.default_url).context("default_url")?;

        for (idx, route) in self.routes.iter().enumerate() {
            if route.method.is_empty() {
                anyhow::bail!("routes[{idx}]: method must not be empty");
            }
            validate_url(&route.url)
                .with_context(|| format!("routes[{idx}] ({}): url", route.method))?;
        }

        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be > 0");
        }
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> anyhow::Result<&str> {
    std::str::from_utf8(bytes).context("config is not valid UTF-8")
}

fn validate_url(raw: &str) -> anyhow::Result<()> {
    let url = url::Url::parse(raw).with_context(|| format!("invalid url: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("unsupported url scheme {other:?}: {raw}"),
    }
}
