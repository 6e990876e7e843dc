//! Declarative gateway configuration: registered services and the ordered
//! routing table.

use std::time::Duration;

/// One backend service endpoint.
#[derive(Clone, Debug)]
pub struct ServiceEndpoint {
    pub name: String,
    pub base_url: String,
    pub health_path: String,
    pub timeout: Duration,
    pub retry_count: u32,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_path: "/health".to_string(),
            timeout: Duration::from_secs(30),
            retry_count: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }
}

/// One routing rule; longest matching prefix wins.
#[derive(Clone, Debug)]
pub struct RouteRule {
    pub path_prefix: String,
    pub service_name: String,
    pub strip_prefix: bool,
    pub require_auth: bool,
}

impl RouteRule {
    pub fn new(path_prefix: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            service_name: service_name.into(),
            strip_prefix: true,
            require_auth: true,
        }
    }

    pub fn keep_prefix(mut self) -> Self {
        self.strip_prefix = false;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub services: Vec<ServiceEndpoint>,
    pub routes: Vec<RouteRule>,
}

impl GatewayConfig {
    /// Default topology: the control plane behind a root catch-all.
    pub fn for_control_plane(control_plane_url: &str, proxy_timeout: Duration) -> Self {
        Self {
            services: vec![ServiceEndpoint::new("control-plane", control_plane_url)
                .with_timeout(proxy_timeout)],
            routes: vec![RouteRule::new("/", "control-plane").keep_prefix()],
        }
    }
}

/// Longest-prefix route match. A rule matches when the path equals its
/// prefix or continues it at a `/` boundary; the root rule matches all.
pub fn match_route<'a>(routes: &'a [RouteRule], path: &str) -> Option<&'a RouteRule> {
    routes
        .iter()
        .filter(|rule| {
            if rule.path_prefix == "/" {
                return true;
            }
            path == rule.path_prefix
                || path.starts_with(&format!("{}/", rule.path_prefix))
        })
        .max_by_key(|rule| rule.path_prefix.len())
}

/// Target path after applying the rule's `strip_prefix` policy.
pub fn rewrite_path(rule: &RouteRule, path: &str) -> String {
    if !rule.strip_prefix || rule.path_prefix == "/" {
        return path.to_string();
    }
    let remainder = path.strip_prefix(&rule.path_prefix).unwrap_or(path);
    if remainder.is_empty() {
        "/".to_string()
    } else {
        remainder.to_string()
    }
}
