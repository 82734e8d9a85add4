//! Dynamic batching dispatcher for multi-model embedding inference.
//!
//! Clients submit text or pre-decoded image buffers and receive fixed-size
//! numeric vectors produced by one of several pre-loaded sentence-transformer
//! models. The core of the crate is [`dispatcher::BatchDispatcher`], a
//! per-model worker pool that coalesces concurrent submissions into batches
//! bounded by size and a short collection timeout before invoking the
//! underlying [`embedder::Embedder`] once per batch.
use thiserror::Error;
use tokio::sync::oneshot;

pub mod config;
pub mod dispatcher;
pub mod embedder;
pub mod engine;
pub mod engine_array;
pub mod metrics;

pub use config::{Dtype, EngineArgs};
pub use dispatcher::BatchDispatcher;
pub use embedder::{Embedder, EmbeddingInput, Vector};
pub use engine::Engine;
pub use engine_array::EngineArray;

/// Per-input token-count accounting. By contract, character length of a
/// string input or byte length of an image buffer — never a tokenizer's
/// true token count (see `SPEC_FULL.md` open questions).
pub type Usage = usize;

/// Result of a successful `submit`: one vector and one usage count per input,
/// in the same order as the request.
pub type EmbedOutput = (Vec<Vector>, Vec<Usage>);

/// The producer side of a one-shot result channel. Created by the submitter,
/// held exclusively by the dispatcher until signaled exactly once.
pub type CompletionHandle = oneshot::Sender<Result<EmbedOutput, Error>>;

/// The consumer side, awaited by the submitter after `submit` returns.
pub type CompletionReceiver = oneshot::Receiver<Result<EmbedOutput, Error>>;

/// Creates a fresh completion handle pair for one `submit` call.
pub fn new_completion_handle() -> (CompletionHandle, CompletionReceiver) {
    oneshot::channel()
}

/// Errors surfaced by the core dispatch pipeline.
///
/// Errors that represent programmer/operator mistakes (`Config`, `NotRunning`,
/// duplicate served names) propagate immediately and stop the relevant
/// operation. Errors from inference are localized to one batch; the
/// dispatcher survives them and continues serving subsequent batches.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Invalid engine arguments: bad dtype, a zero batch size or worker
    /// count, or a duplicate served model name. Fatal at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// Lookup miss in the [`EngineArray`]. Carries the requested name and
    /// the set of names that were actually available.
    #[error("model not found: {requested} (available: {})", available.join(", "))]
    ModelNotFound {
        /// The served name the caller asked for.
        requested: String,
        /// Served names actually registered in the array.
        available: Vec<String>,
    },

    /// `submit` or `stop` was called against an `Engine` that is not in the
    /// `Started` state.
    #[error("engine is not running")]
    NotRunning,

    /// `start` was called against an `Engine` that is already `Started`.
    #[error("engine is already running")]
    AlreadyRunning,

    /// The underlying model raised an error while processing a batch. Every
    /// item in that batch is failed with this same error.
    #[error("inference failed: {0}")]
    Inference(String),

    /// A request item was still queued when `shutdown` drained the queue.
    #[error("dispatcher shut down with requests still queued")]
    Shutdown,

    /// `submit` was called with zero inputs.
    #[error("submit requires at least one input")]
    EmptyInput,
}
