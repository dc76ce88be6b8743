//! Method-name route table.
//!
//! Built once at startup and shared read-only (behind an `Arc`) by every request task.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::config::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Upstream endpoint URL. Cheap to clone.
pub struct Endpoint(Arc<str>);

impl Endpoint {
    pub fn new(url: impl Into<Arc<str>>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
/// A single `method -> destination` mapping.
pub struct Route {
    pub method: String,
    pub destination: Endpoint,
}

#[derive(Debug, Clone)]
/// Method routes plus the default destination.
pub struct RouteTable {
    default: Endpoint,
    by_method: HashMap<String, Endpoint>,
}

impl RouteTable {
    /// Build a table from routes in order. Duplicate methods: the last entry wins.
    pub fn build(
        routes: impl IntoIterator<Item = Route>,
        default: Endpoint,
    ) -> anyhow::Result<Self> {
        if default.as_str().trim().is_empty() {
            anyhow::bail!("default destination must not be empty");
        }

        let mut by_method = HashMap::new();
        for route in routes {
            by_method.insert(route.method, route.destination);
        }
        Ok(Self { default, by_method })
    }

    pub fn from_config(cfg: &ProxyConfig) -> anyhow::Result<Self> {
        let routes = cfg.routes.iter().map(|r| Route {
            method: r.method.clone(),
            destination: Endpoint::new(r.url.as_str()),
        });
        Self::build(routes, Endpoint::new(cfg.default_url.as_str()))
    }

    /// Destination for `method`. Exact, case-sensitive match; falls back to the default.
    pub fn resolve(&self, method: &str) -> &Endpoint {
        self.by_method.get(method).unwrap_or(&self.default)
    }

    pub fn default_destination(&self) -> &Endpoint {
        &self.default
    }

    /// Number of distinct method routes.
    pub fn len(&self) -> usize {
        self.by_method.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty()
    }
}
