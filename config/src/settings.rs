//! Typed settings for the control plane, read once at process start and
//! passed explicitly to every component (no process-wide singletons).

use crate::ConfigError;

/// Deployment environment. Gates the WS `token` query-parameter fallback:
/// production and staging only accept the subprotocol credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    /// True when the legacy query-parameter credential path is disabled.
    pub fn query_token_forbidden(self) -> bool {
        matches!(self, Environment::Production | Environment::Staging)
    }
}

/// Control-plane settings; every field has a default and is overridable by env.
#[derive(Clone, Debug)]
pub struct Settings {
    pub environment: Environment,
    /// Secret for token signatures. Required outside development.
    pub secret_key: String,
    /// Model credential; missions cannot start without one.
    pub model_api_key: Option<String>,
    pub database_path: String,
    pub bind_addr: String,
    pub gateway_bind_addr: String,
    /// Base URL mission dispatchers proxy to (the single brain).
    pub control_plane_url: String,

    pub outbox_interval_secs: u64,
    pub outbox_batch_size: usize,
    pub outbox_retry_cap: i64,

    pub max_iterations: u32,
    pub approval_threshold: f64,
    pub recursion_limit: usize,

    pub bus_queue_capacity: usize,

    pub llm_timeout_secs: u64,
    pub proxy_timeout_secs: u64,
    pub health_probe_interval_secs: u64,

    pub idempotency_processing_ttl_secs: u64,
    pub idempotency_cached_ttl_secs: u64,
}

impl Settings {
    /// Builds settings from the process environment.
    ///
    /// Fails fast when production is missing its secret; the model key is
    /// optional here and enforced at mission start (§4.1) so read-only
    /// deployments still boot.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::parse(&var_or("HELM_ENVIRONMENT", "development"));
        let secret_key = match std::env::var("HELM_SECRET_KEY") {
            Ok(v) if !v.trim().is_empty() => v,
            _ if environment == Environment::Development => "helm-dev-secret".to_string(),
            _ => return Err(ConfigError::Missing("HELM_SECRET_KEY")),
        };
        let model_api_key = std::env::var("HELM_MODEL_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            environment,
            secret_key,
            model_api_key,
            database_path: var_or("HELM_DATABASE_PATH", "helm.db"),
            bind_addr: var_or("HELM_BIND_ADDR", "127.0.0.1:8006"),
            gateway_bind_addr: var_or("HELM_GATEWAY_BIND_ADDR", "127.0.0.1:8000"),
            control_plane_url: var_or("HELM_CONTROL_PLANE_URL", "http://127.0.0.1:8006"),
            outbox_interval_secs: parse_var("HELM_OUTBOX_INTERVAL_SECS", 5)?,
            outbox_batch_size: parse_var("HELM_OUTBOX_BATCH_SIZE", 10)?,
            outbox_retry_cap: parse_var("HELM_OUTBOX_RETRY_CAP", 5)?,
            max_iterations: clamp_iterations(parse_var("HELM_MAX_ITERATIONS", 3)?),
            approval_threshold: parse_var("HELM_APPROVAL_THRESHOLD", 7.0)?,
            recursion_limit: parse_var("HELM_RECURSION_LIMIT", 100)?,
            bus_queue_capacity: parse_var("HELM_BUS_QUEUE_CAPACITY", 1024)?,
            llm_timeout_secs: parse_var("HELM_LLM_TIMEOUT_SECS", 300)?,
            proxy_timeout_secs: parse_var("HELM_PROXY_TIMEOUT_SECS", 30)?,
            health_probe_interval_secs: parse_var("HELM_HEALTH_PROBE_INTERVAL_SECS", 30)?,
            idempotency_processing_ttl_secs: parse_var("HELM_IDEMPOTENCY_PROCESSING_TTL_SECS", 60)?,
            idempotency_cached_ttl_secs: parse_var("HELM_IDEMPOTENCY_CACHED_TTL_SECS", 86_400)?,
        })
    }

    /// Development defaults without touching the environment; used by tests.
    pub fn for_tests() -> Self {
        Self {
            environment: Environment::Development,
            secret_key: "helm-test-secret".to_string(),
            model_api_key: Some("test-key".to_string()),
            database_path: ":memory:".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            gateway_bind_addr: "127.0.0.1:0".to_string(),
            control_plane_url: "http://127.0.0.1:8006".to_string(),
            outbox_interval_secs: 5,
            outbox_batch_size: 10,
            outbox_retry_cap: 5,
            max_iterations: 3,
            approval_threshold: 7.0,
            recursion_limit: 100,
            bus_queue_capacity: 1024,
            llm_timeout_secs: 300,
            proxy_timeout_secs: 30,
            health_probe_interval_secs: 30,
            idempotency_processing_ttl_secs: 60,
            idempotency_cached_ttl_secs: 86_400,
        }
    }
}

/// Iteration cap policy: at least 1, hard cap 5.
fn clamp_iterations(requested: u32) -> u32 {
    requested.clamp(1, 5)
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: defaults match the documented policy constants.
    #[test]
    fn defaults_match_policy_constants() {
        let s = Settings::for_tests();
        assert_eq!(s.outbox_interval_secs, 5);
        assert_eq!(s.outbox_batch_size, 10);
        assert_eq!(s.max_iterations, 3);
        assert!((s.approval_threshold - 7.0).abs() < f64::EPSILON);
        assert_eq!(s.recursion_limit, 100);
        assert_eq!(s.bus_queue_capacity, 1024);
    }

    /// **Scenario**: max_iterations is clamped to the 1..=5 hard cap.
    #[test]
    fn iteration_cap_clamped() {
        assert_eq!(clamp_iterations(0), 1);
        assert_eq!(clamp_iterations(3), 3);
        assert_eq!(clamp_iterations(12), 5);
    }

    /// **Scenario**: only production/staging forbid the query-token fallback.
    #[test]
    fn query_token_gate_by_environment() {
        assert!(Environment::Production.query_token_forbidden());
        assert!(Environment::Staging.query_token_forbidden());
        assert!(!Environment::Development.query_token_forbidden());
    }

    #[test]
    fn environment_parse_aliases() {
        assert_eq!(Environment::parse("prod"), Environment::Production);
        assert_eq!(Environment::parse("STAGING"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
    }
}
