//! Server-level configuration: the shape deserialized from `--config`'s YAML
//! file, or assembled from flat CLI flags for the single-model case
//! (`SPEC_FULL.md` §3, §6).
use serde::Deserialize;

use embedserve::EngineArgs;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// One entry per model to load and serve.
    pub models: Vec<EngineArgs>,

    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional bearer token required on every route except `/health`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `tracing_subscriber` configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` env-filter directive, e.g. `info` or `embedserve=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_multi_model_config() {
        let yaml = r#"
models:
  - model: sentence-transformers/all-MiniLM-L6-v2
  - model: BAAI/bge-small-en-v1.5
    served_model_name: bge-small
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.api_key.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn deserializes_full_config() {
        let yaml = r#"
host: 127.0.0.1
port: 9000
api_key: secret
logging:
  level: debug
  format: json
models:
  - model: sentence-transformers/all-MiniLM-L6-v2
    workers: 4
    batch_size: 16
    embedding_dtype: binary
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.models[0].workers, 4);
        assert_eq!(config.models[0].batch_size, 16);
    }
}
