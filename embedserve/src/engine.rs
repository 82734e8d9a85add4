//! Lifecycle wrapper binding one [`Embedder`] to one [`BatchDispatcher`]
//! (`SPEC_FULL.md` §4.3).
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::EngineArgs;
use crate::dispatcher::BatchDispatcher;
use crate::embedder::sentence_transformer::SentenceTransformerEmbedder;
use crate::embedder::{Embedder, EmbeddingInput};
use crate::{new_completion_handle, EmbedOutput, Error};

/// One loaded model plus its dispatcher. Constructed idle; [`Engine::start`]
/// loads the model and spawns workers, [`Engine::stop`] drains them.
pub struct Engine {
    args: EngineArgs,
    running: AtomicBool,
    embedder: std::sync::OnceLock<Arc<dyn Embedder>>,
    dispatcher: std::sync::OnceLock<BatchDispatcher>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("args", &self.args)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Engine {
    /// Builds an idle engine from validated arguments. Does not load the
    /// model or spawn any tasks; call [`Engine::start`] for that.
    pub fn new(args: EngineArgs) -> Result<Self, Error> {
        args.validate()?;
        Ok(Self {
            args,
            running: AtomicBool::new(false),
            embedder: std::sync::OnceLock::new(),
            dispatcher: std::sync::OnceLock::new(),
        })
    }

    /// The validated arguments this engine was built from.
    pub fn args(&self) -> &EngineArgs {
        &self.args
    }

    /// The name clients address this engine by.
    pub fn served_name(&self) -> &str {
        self.args.served_name()
    }

    /// True once [`Engine::start`] has completed and [`Engine::stop`] has
    /// not yet been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Loads the model, runs one warm-up inference, and spawns the
    /// dispatcher's worker pool. Blocking model/tokenizer load happens on a
    /// blocking thread so it never stalls the tokio event loop.
    pub async fn start(&self) -> Result<(), Error> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let args = self.args.clone();
        let embedder: Arc<dyn Embedder> = Arc::new(
            tokio::task::spawn_blocking(move || SentenceTransformerEmbedder::load(&args))
                .await
                .map_err(|e| Error::Inference(format!("model load task panicked: {e}")))??,
        );

        embedder.warm_up().await?;

        let dispatcher = BatchDispatcher::spawn(
            self.served_name().to_string(),
            embedder.clone(),
            self.args.workers,
            self.args.batch_size,
            self.args.queue_capacity,
        );

        if self.embedder.set(embedder).is_err() || self.dispatcher.set(dispatcher).is_err() {
            return Err(Error::AlreadyRunning);
        }

        self.running.store(true, Ordering::SeqCst);
        info!(model = %self.args.model, served_name = self.served_name(), "engine started");
        Ok(())
    }

    /// Drains the dispatcher's queue, failing anything still waiting with
    /// [`Error::Shutdown`], and marks the engine stopped. Calling `stop` on
    /// an engine that is not running logs a warning and returns `Ok(())`.
    pub async fn stop(&self) -> Result<(), Error> {
        if !self.is_running() {
            warn!(served_name = self.served_name(), "stop called on an engine that is not running");
            return Ok(());
        }
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.shutdown().await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!(served_name = self.served_name(), "engine stopped");
        Ok(())
    }

    /// Submits one call's worth of input and awaits the result.
    ///
    /// Returns [`Error::NotRunning`] immediately, without touching the
    /// dispatcher, when the engine has not been started.
    pub async fn submit(&self, input: EmbeddingInput) -> Result<EmbedOutput, Error> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        if input.is_empty() {
            return Err(Error::EmptyInput);
        }
        let dispatcher = self.dispatcher.get().ok_or(Error::NotRunning)?;
        let (tx, rx) = new_completion_handle();
        dispatcher.submit(input, tx)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_args() {
        let mut args = EngineArgs::new("m");
        args.workers = 0;
        assert!(Engine::new(args).is_err());
    }

    #[tokio::test]
    async fn submit_before_start_is_not_running() {
        let engine = Engine::new(EngineArgs::new("unused-for-this-test")).expect("valid args");
        let result = engine.submit(EmbeddingInput::Text(vec!["hi".into()])).await;
        assert!(matches!(result, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn stop_before_start_is_idempotent() {
        let engine = Engine::new(EngineArgs::new("unused-for-this-test")).expect("valid args");
        assert!(engine.stop().await.is_ok());
        assert!(!engine.is_running());
    }
}
