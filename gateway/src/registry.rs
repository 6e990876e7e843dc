//! Service registry: static registration plus cached health state fed by a
//! periodic probe task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::ServiceEndpoint;

/// Cached health for one service.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    /// RFC 3339 timestamp of the last probe.
    pub last_check: String,
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ServiceRegistry {
    services: HashMap<String, ServiceEndpoint>,
    health: DashMap<String, ServiceHealth>,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceEndpoint>) -> Self {
        Self {
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
            health: DashMap::new(),
            http: reqwest::Client::new(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn get_service(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.services.get(name)
    }

    pub fn list_services(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.services.values()
    }

    pub fn get_health(&self, name: &str) -> Option<ServiceHealth> {
        self.health.get(name).map(|h| h.clone())
    }

    /// Probes one service's health endpoint and caches the result.
    pub async fn check_health(&self, name: &str) -> ServiceHealth {
        let Some(service) = self.services.get(name) else {
            return ServiceHealth {
                healthy: false,
                last_check: now(),
                response_time_ms: None,
                error: Some(format!("service '{name}' not found in registry")),
            };
        };

        let url = format!("{}{}", service.base_url, service.health_path);
        let started = std::time::Instant::now();
        let health = match self
            .http
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(_) => ServiceHealth {
                healthy: true,
                last_check: now(),
                response_time_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => {
                tracing::warn!(service = name, error = %e, "health probe failed");
                ServiceHealth {
                    healthy: false,
                    last_check: now(),
                    response_time_ms: None,
                    error: Some(e.to_string()),
                }
            }
        };
        self.health.insert(name.to_string(), health.clone());
        health
    }

    pub async fn check_all_health(&self) -> HashMap<String, ServiceHealth> {
        let mut results = HashMap::new();
        for name in self.services.keys() {
            results.insert(name.clone(), self.check_health(name).await);
        }
        results
    }

    /// Background probe loop (default: every 30 s).
    pub fn spawn_probe_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let _ = self.check_all_health().await;
                tokio::time::sleep(interval).await;
            }
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
