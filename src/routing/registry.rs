//! Service label → downstream base URL.

use std::collections::BTreeMap;

use crate::config::ServicesConfig;

/// Label used for paths outside `/api/{service}`.
pub const UNKNOWN_SERVICE: &str = "unknown";

const API_PREFIX: &str = "/api";

/// Derive the service label from a request path.
///
/// `/api/products/1` → `products`; anything not under `/api/{service}` is
/// `unknown`.
pub fn service_label(path: &str) -> &str {
    path.strip_prefix(API_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.split('/').next())
        .filter(|segment| !segment.is_empty())
        .unwrap_or(UNKNOWN_SERVICE)
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, String>,
}

impl ServiceRegistry {
    pub fn new(config: &ServicesConfig) -> Self {
        let services = config
            .0
            .iter()
            .map(|(name, url)| (name.clone(), url.trim_end_matches('/').to_string()))
            .collect();
        Self { services }
    }

    pub fn base_url(&self, service: &str) -> Option<&str> {
        self.services.get(service).map(String::as_str)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Downstream URI for a gateway path, with the `/api` prefix removed.
    ///
    /// Returns `None` when the path does not name a registered service.
    pub fn upstream_uri(&self, path: &str, query: Option<&str>) -> Option<String> {
        let base = self.base_url(service_label(path))?;
        let forwarded = path.strip_prefix(API_PREFIX)?;
        Some(match query {
            Some(q) if !q.is_empty() => format!("{base}{forwarded}?{q}"),
            _ => format!("{base}{forwarded}"),
        })
    }
}
