//! Command-line argument parsing: a multi-model `--config` path and a flat
//! single-model path, mutually exclusive (`SPEC_FULL.md` §4.6).
use clap::Parser;

use embedserve::{Dtype, EngineArgs};

use crate::config::{LoggingConfig, ServerConfig};
use crate::error::ApiError;

/// HTTP server and CLI entrypoint for embedserve.
#[derive(Debug, Parser)]
#[command(name = "embedserve", version, about)]
pub struct Cli {
    /// Path to a YAML file describing one or more models and server
    /// settings. Mutually exclusive with the flat `--model` flags.
    #[arg(long)]
    pub config: Option<String>,

    /// Hugging Face Hub repo id or local path of the single model to serve.
    /// Mutually exclusive with `--config`.
    #[arg(long)]
    pub model: Option<String>,

    /// Externally visible model name. Defaults to `--model`.
    #[arg(long)]
    pub served_model_name: Option<String>,

    /// Worker task count. Defaults to the number of logical CPUs.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum batch size.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Output vector encoding.
    #[arg(long, value_enum)]
    pub dtype: Option<CliDtype>,

    /// Whether to trust and execute remote code shipped with the model.
    #[arg(long)]
    pub trust_remote_code: Option<bool>,

    /// Bind address.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Optional bearer token required on every route except `/health`.
    #[arg(long)]
    pub api_key: Option<String>,

    /// `tracing` log level filter (also honors `RUST_LOG` when unset).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: CliLogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliDtype {
    Float32,
    Float16,
    Binary,
}

impl From<CliDtype> for Dtype {
    fn from(d: CliDtype) -> Self {
        match d {
            CliDtype::Float32 => Dtype::Float32,
            CliDtype::Float16 => Dtype::Float16,
            CliDtype::Binary => Dtype::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogFormat {
    Text,
    Json,
}

impl Cli {
    /// Resolves this invocation into a `ServerConfig`, enforcing that
    /// exactly one of `--config` or `--model` was given.
    pub fn into_server_config(self) -> Result<ServerConfig, ApiError> {
        match (&self.config, &self.model) {
            (Some(_), Some(_)) => Err(ApiError::Config(
                "--config and --model are mutually exclusive".into(),
            )),
            (None, None) => Err(ApiError::Config(
                "one of --config or --model is required".into(),
            )),
            (Some(path), None) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ApiError::Config(format!("reading {path}: {e}")))?;
                let config: ServerConfig = serde_yaml::from_str(&raw)
                    .map_err(|e| ApiError::Config(format!("parsing {path}: {e}")))?;
                Ok(config)
            }
            (None, Some(model)) => {
                let mut args = EngineArgs::new(model.clone());
                args.served_model_name = self.served_model_name.clone();
                if let Some(workers) = self.workers {
                    args.workers = workers;
                }
                if let Some(batch_size) = self.batch_size {
                    args.batch_size = batch_size;
                }
                if let Some(dtype) = self.dtype {
                    args.embedding_dtype = dtype.into();
                }
                if let Some(trust_remote_code) = self.trust_remote_code {
                    args.trust_remote_code = trust_remote_code;
                }

                Ok(ServerConfig {
                    models: vec![args],
                    host: self.host.clone(),
                    port: self.port,
                    api_key: self.api_key.clone(),
                    logging: LoggingConfig {
                        level: self.log_level.clone(),
                        format: match self.log_format {
                            CliLogFormat::Text => "text".into(),
                            CliLogFormat::Json => "json".into(),
                        },
                    },
                })
            }
        }
    }
}
