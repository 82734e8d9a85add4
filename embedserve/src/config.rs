//! Engine-argument schema: immutable, validated configuration for a single
//! model (see `SPEC_FULL.md` §3 and §6).
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Output vector encoding. `float32` and `float16` are IEEE-754 formats;
/// `binary` emits one byte per component, 1 iff the pre-cast float was
/// strictly greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// IEEE-754 single precision (the default).
    #[default]
    Float32,
    /// IEEE-754 half precision.
    Float16,
    /// One byte per component, value 0 or 1.
    Binary,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dtype::Float32 => "float32",
            Dtype::Float16 => "float16",
            Dtype::Binary => "binary",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Dtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(Dtype::Float32),
            "float16" => Ok(Dtype::Float16),
            "binary" => Ok(Dtype::Binary),
            other => Err(Error::Config(format!(
                "unknown embedding_dtype '{other}', expected one of float32, float16, binary"
            ))),
        }
    }
}

/// Immutable configuration for one model, validated once at construction.
///
/// Invariants enforced by [`EngineArgs::validate`]: `workers >= 1` and
/// `batch_size >= 1`. `served_model_name` defaults to `model` when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineArgs {
    /// Model identifier (a local path or a Hugging Face Hub repo id).
    pub model: String,

    /// Externally visible name clients address this model by. Defaults to
    /// `model` when not given.
    #[serde(default)]
    pub served_model_name: Option<String>,

    /// Whether to trust and execute remote code shipped with the model
    /// repository (tokenizer/model-specific Python, in the source project;
    /// here, a flag forwarded to the loader for parity with the contract).
    #[serde(default = "default_trust_remote_code")]
    pub trust_remote_code: bool,

    /// Worker task count for this engine's dispatcher. Defaults to the
    /// number of logical CPUs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of request items coalesced into one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Output vector encoding.
    #[serde(default)]
    pub embedding_dtype: Dtype,

    /// Optional bound on the request queue. `None` means logically
    /// unbounded, matching the source behavior; an allowed extension for
    /// operators who want `Overloaded` rejection instead of unbounded
    /// memory growth.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_trust_remote_code() -> bool {
    true
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_batch_size() -> usize {
    32
}

impl EngineArgs {
    /// Creates engine arguments for `model`, applying every other default.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            served_model_name: None,
            trust_remote_code: default_trust_remote_code(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            embedding_dtype: Dtype::default(),
            queue_capacity: None,
        }
    }

    /// The name clients address this model by.
    pub fn served_name(&self) -> &str {
        self.served_model_name.as_deref().unwrap_or(&self.model)
    }

    /// Validates the invariants from `SPEC_FULL.md` §3: `workers >= 1`,
    /// `batch_size >= 1`, and (when given) `queue_capacity >= 1`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be >= 1".into()));
        }
        if let Some(0) = self.queue_capacity {
            return Err(Error::Config("queue_capacity must be >= 1 when set".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".into()));
        }
        Ok(())
    }
}
