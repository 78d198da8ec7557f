//! Environment-based configuration.
//!
//! The worker is configured entirely through environment variables (it runs
//! as a container next to the services it talks to). `Config::from_env`
//! reads and validates everything once at startup; nothing else in the
//! crate touches the environment.

use crate::error::ConfigError;

/// Default number of characters when the publisher omits it.
pub const DEFAULT_USERS_COUNT: u32 = 10;
/// Default number of posts when the publisher omits it.
pub const DEFAULT_POSTS_COUNT: u32 = 50;
/// Default per-world LLM call budget.
pub const DEFAULT_LLM_CALL_LIMIT: i64 = 100;
/// Default per-world image call budget.
pub const DEFAULT_IMAGE_CALL_LIMIT: i64 = 50;

/// MongoDB connection settings.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string (`MONGODB_URI`).
    pub uri: String,
    /// Database name (`MONGODB_DATABASE`).
    pub database: String,
}

/// External provider credentials and endpoints.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Bearer token for the LLM API (`OPENROUTER_API_KEY`). Required.
    pub openrouter_api_key: String,
    /// API key for the image API (`RUNWARE_API_KEY`). Required.
    pub runware_api_key: String,
    /// Model used when a workflow does not pick one (`DEFAULT_LLM_MODEL`).
    pub default_llm_model: String,
    /// Base URL of the chat-completions endpoint (`OPENROUTER_BASE_URL`).
    pub llm_base_url: String,
    /// Base URL of the image task endpoint (`RUNWARE_BASE_URL`).
    pub image_base_url: String,
}

/// Per-process concurrency permits and scheduler caps.
#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    /// In-flight LLM requests (`MAX_CONCURRENT_LLM_REQUESTS`).
    pub max_concurrent_llm_requests: usize,
    /// In-flight image requests (`MAX_CONCURRENT_IMAGE_REQUESTS`).
    pub max_concurrent_image_requests: usize,
    /// In-flight gRPC calls (`MAX_CONCURRENT_GRPC_CALLS`).
    pub max_concurrent_grpc_calls: usize,
    /// In-flight document-store operations (`MAX_CONCURRENT_DB_OPERATIONS`).
    pub max_concurrent_db_operations: usize,
    /// Workflow tasks a single worker runs at once (`MAX_WORKFLOW_TASKS_PER_WORKER`).
    pub max_workflow_tasks_per_worker: usize,
    /// Activities a single worker runs at once (`MAX_ACTIVITIES_PER_WORKER`).
    pub max_activities_per_worker: usize,
}

/// Service-registry location.
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Registry host (`CONSUL_HOST`).
    pub host: String,
    /// Registry HTTP port (`CONSUL_PORT`).
    pub port: u16,
}

/// Fully resolved worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mongo: MongoConfig,
    pub providers: ProviderConfig,
    pub limits: LimitsConfig,
    pub consul: ConsulConfig,
    /// Structured-logging threshold (`LOG_LEVEL`), an `EnvFilter` directive.
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// Exists so tests can feed variables without mutating process state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let config = Config {
            mongo: MongoConfig {
                uri: get("MONGODB_URI")
                    .unwrap_or_else(|| "mongodb://localhost:27017".to_string()),
                database: get("MONGODB_DATABASE")
                    .unwrap_or_else(|| "worldforge".to_string()),
            },
            providers: ProviderConfig {
                openrouter_api_key: get("OPENROUTER_API_KEY").unwrap_or_default(),
                runware_api_key: get("RUNWARE_API_KEY").unwrap_or_default(),
                default_llm_model: get("DEFAULT_LLM_MODEL")
                    .unwrap_or_else(|| "google/gemini-flash-1.5-8b".to_string()),
                llm_base_url: get("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
                image_base_url: get("RUNWARE_BASE_URL")
                    .unwrap_or_else(|| "https://api.runware.ai/v1".to_string()),
            },
            limits: LimitsConfig {
                max_concurrent_llm_requests: parse_var(
                    &get,
                    "MAX_CONCURRENT_LLM_REQUESTS",
                    50,
                )?,
                max_concurrent_image_requests: parse_var(
                    &get,
                    "MAX_CONCURRENT_IMAGE_REQUESTS",
                    30,
                )?,
                max_concurrent_grpc_calls: parse_var(&get, "MAX_CONCURRENT_GRPC_CALLS", 100)?,
                max_concurrent_db_operations: parse_var(
                    &get,
                    "MAX_CONCURRENT_DB_OPERATIONS",
                    20,
                )?,
                max_workflow_tasks_per_worker: parse_var(
                    &get,
                    "MAX_WORKFLOW_TASKS_PER_WORKER",
                    100,
                )?,
                max_activities_per_worker: parse_var(&get, "MAX_ACTIVITIES_PER_WORKER", 200)?,
            },
            consul: ConsulConfig {
                host: get("CONSUL_HOST").unwrap_or_else(|| "consul".to_string()),
                port: parse_var(&get, "CONSUL_PORT", 8500u16)?,
            },
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        Ok(config)
    }

    /// Check that everything a live worker needs is present.
    ///
    /// Both provider credentials are required; the worker refuses to start
    /// without them rather than failing on the first generation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.openrouter_api_key.is_empty() {
            return Err(ConfigError::MissingVar {
                name: "OPENROUTER_API_KEY",
            });
        }
        if self.providers.runware_api_key.is_empty() {
            return Err(ConfigError::MissingVar {
                name: "RUNWARE_API_KEY",
            });
        }
        for (name, value) in [
            (
                "MAX_CONCURRENT_LLM_REQUESTS",
                self.limits.max_concurrent_llm_requests,
            ),
            (
                "MAX_CONCURRENT_IMAGE_REQUESTS",
                self.limits.max_concurrent_image_requests,
            ),
            (
                "MAX_CONCURRENT_GRPC_CALLS",
                self.limits.max_concurrent_grpc_calls,
            ),
            (
                "MAX_CONCURRENT_DB_OPERATIONS",
                self.limits.max_concurrent_db_operations,
            ),
            (
                "MAX_WORKFLOW_TASKS_PER_WORKER",
                self.limits.max_workflow_tasks_per_worker,
            ),
            (
                "MAX_ACTIVITIES_PER_WORKER",
                self.limits.max_activities_per_worker,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    message: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            message: format!("could not parse '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| map.get(name).map(|v| (*v).to_string())
    }

    #[test]
    fn defaults_applied_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.mongo.uri, "mongodb://localhost:27017");
        assert_eq!(config.mongo.database, "worldforge");
        assert_eq!(config.providers.default_llm_model, "google/gemini-flash-1.5-8b");
        assert_eq!(config.limits.max_concurrent_llm_requests, 50);
        assert_eq!(config.limits.max_concurrent_db_operations, 20);
        assert_eq!(config.consul.host, "consul");
        assert_eq!(config.consul.port, 8500);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://db:27017"),
            ("MONGODB_DATABASE", "worlds"),
            ("MAX_CONCURRENT_LLM_REQUESTS", "5"),
            ("CONSUL_HOST", "registry"),
            ("CONSUL_PORT", "9500"),
            ("LOG_LEVEL", "debug"),
        ]))
        .expect("config");
        assert_eq!(config.mongo.uri, "mongodb://db:27017");
        assert_eq!(config.mongo.database, "worlds");
        assert_eq!(config.limits.max_concurrent_llm_requests, 5);
        assert_eq!(config.consul.host, "registry");
        assert_eq!(config.consul.port, 9500);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn unparseable_limit_is_rejected() {
        let err = Config::from_lookup(lookup(&[("MAX_CONCURRENT_GRPC_CALLS", "lots")]))
            .expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "invalid value for MAX_CONCURRENT_GRPC_CALLS: could not parse 'lots'"
        );
    }

    #[test]
    fn empty_value_falls_back_to_default() {
        let config = Config::from_lookup(lookup(&[("MONGODB_DATABASE", "")])).expect("config");
        assert_eq!(config.mongo.database, "worldforge");
    }

    #[test]
    fn validate_requires_both_api_keys() {
        let mut config = Config::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("RUNWARE_API_KEY", "rw-test"),
        ]))
        .expect("config");
        assert!(config.validate().is_ok());

        config.providers.runware_api_key.clear();
        let err = config.validate().expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "missing required environment variable: RUNWARE_API_KEY"
        );
    }

    #[test]
    fn validate_rejects_zero_permits() {
        let mut config = Config::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("RUNWARE_API_KEY", "rw-test"),
        ]))
        .expect("config");
        config.limits.max_concurrent_db_operations = 0;
        let err = config.validate().expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "invalid value for MAX_CONCURRENT_DB_OPERATIONS: must be at least 1"
        );
    }
}
