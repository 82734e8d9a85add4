//! The dynamic batching dispatcher: a per-model queue plus `W` worker tasks
//! that coalesce queued request items into batches bounded by size and a
//! short collection timeout (`SPEC_FULL.md` §4.2).
//!
//! The worker loop's shape — block for one item, then greedily collect more
//! under a deadline, then hand the accumulated batch to the backend in one
//! call — mirrors the reference stack's `run_output_batch` loop for batching
//! outputs, generalized here to flow results back through per-item
//! completion handles instead of writing to a single sink.
//!
//! A supervisor task owns the worker pool's `JoinSet` for the dispatcher's
//! whole lifetime and respawns any worker that exits while the dispatcher is
//! still running, so a single panicking worker never silently shrinks the
//! pool below its configured size.
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::embedder::{EmbeddingInput, Embedder};
use crate::metrics;
use crate::CompletionHandle;
use crate::Error;

/// Fixed micro-batching window: once at least one item is queued, a worker
/// waits at most this long for more before invoking the model. Not
/// configurable — `SPEC_FULL.md` fixes it at 50ms.
const COLLECTION_TIMEOUT: Duration = Duration::from_millis(50);

struct RequestItem {
    input: EmbeddingInput,
    handle: CompletionHandle,
    enqueued_at: Instant,
}

impl RequestItem {
    fn fail(self, err: Error) {
        if self.handle.send(Err(err)).is_err() {
            debug!("completion handle dropped before shutdown signal could be delivered");
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

/// Per-model queue plus worker pool. Constructed by [`crate::Engine::start`],
/// never directly by HTTP-layer code.
pub struct BatchDispatcher {
    served_name: String,
    sender: Mutex<Option<Sender<RequestItem>>>,
    state: Arc<AtomicU8>,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BatchDispatcher {
    /// Spawns `workers` worker tasks reading from a fresh queue, bounded by
    /// `queue_capacity` when given, logically unbounded otherwise, plus a
    /// supervisor task that respawns any worker that exits unexpectedly
    /// while the dispatcher is still running (`SPEC_FULL.md` §4.2: "workers
    /// must not silently disappear"). `served_name` only labels emitted
    /// metrics.
    pub fn spawn(
        served_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        workers: usize,
        batch_size: usize,
        queue_capacity: Option<usize>,
    ) -> Self {
        let served_name = served_name.into();
        let (sender, receiver) = match queue_capacity {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };

        let state = Arc::new(AtomicU8::new(State::Running as u8));
        let next_worker_id = Arc::new(AtomicUsize::new(workers));
        let mut join_set = JoinSet::new();
        for worker_id in 0..workers {
            spawn_worker(
                &mut join_set,
                worker_id,
                served_name.clone(),
                embedder.clone(),
                receiver.clone(),
                batch_size,
                state.clone(),
            );
        }

        let supervisor = tokio::spawn(supervise(
            join_set,
            next_worker_id,
            served_name.clone(),
            embedder,
            receiver,
            batch_size,
            state.clone(),
        ));

        Self {
            served_name,
            sender: Mutex::new(Some(sender)),
            state,
            supervisor: tokio::sync::Mutex::new(Some(supervisor)),
        }
    }

    /// Pushes one request item onto the queue. Non-blocking beyond the
    /// enqueue itself; the caller awaits `handle` separately.
    pub fn submit(&self, input: EmbeddingInput, handle: CompletionHandle) -> Result<(), Error> {
        if input.is_empty() {
            let _ = handle.send(Err(Error::EmptyInput));
            return Err(Error::EmptyInput);
        }

        metrics::record_request_received(&self.served_name);
        let item = RequestItem {
            input,
            handle,
            enqueued_at: Instant::now(),
        };

        let guard = self.sender.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(sender) => match sender.send(item) {
                Ok(()) => Ok(()),
                Err(flume::SendError(item)) => {
                    metrics::record_request_failed(&self.served_name, "shutdown");
                    item.fail(Error::Shutdown);
                    Err(Error::Shutdown)
                }
            },
            None => {
                metrics::record_request_failed(&self.served_name, "not_running");
                item.fail(Error::NotRunning);
                Err(Error::NotRunning)
            }
        }
    }

    /// Signals all workers to terminate cooperatively and awaits their
    /// exit. Items already queued are drained and failed with
    /// [`Error::Shutdown`]; any batch already in flight is allowed to
    /// complete normally. Once `state` is `Draining`, the supervisor stops
    /// respawning and simply waits for the worker pool to drain to empty.
    pub async fn shutdown(&self) {
        self.state.store(State::Draining as u8, Ordering::SeqCst);
        // Dropping the sender closes the channel for new submissions while
        // leaving already-queued items available for workers to drain.
        let _ = self.sender.lock().expect("lock poisoned").take();

        if let Some(supervisor) = self.supervisor.lock().await.take() {
            if let Err(e) = supervisor.await {
                error!(error = %e, "dispatcher supervisor task panicked during shutdown");
            }
        }
        self.state.store(State::Stopped as u8, Ordering::SeqCst);
    }
}

/// Owns the worker `JoinSet` for the lifetime of the dispatcher. Awaits
/// worker exits and, while `state` is still `Running`, respawns a
/// replacement so the configured worker count never silently shrinks. Once
/// `state` moves to `Draining`/`Stopped`, exits are let through and the loop
/// ends when the last worker has drained.
async fn supervise(
    mut join_set: JoinSet<()>,
    next_worker_id: Arc<AtomicUsize>,
    served_name: String,
    embedder: Arc<dyn Embedder>,
    receiver: Receiver<RequestItem>,
    batch_size: usize,
    state: Arc<AtomicU8>,
) {
    while let Some(result) = join_set.join_next().await {
        if let Err(e) = &result {
            error!(error = %e, "dispatcher worker task panicked");
        }

        if state.load(Ordering::SeqCst) != State::Running as u8 {
            continue;
        }

        let worker_id = next_worker_id.fetch_add(1, Ordering::SeqCst);
        warn!(worker_id, "dispatcher worker exited unexpectedly, respawning");
        spawn_worker(
            &mut join_set,
            worker_id,
            served_name.clone(),
            embedder.clone(),
            receiver.clone(),
            batch_size,
            state.clone(),
        );
    }
}

fn spawn_worker(
    join_set: &mut JoinSet<()>,
    worker_id: usize,
    served_name: String,
    embedder: Arc<dyn Embedder>,
    receiver: Receiver<RequestItem>,
    batch_size: usize,
    state: Arc<AtomicU8>,
) {
    join_set.spawn(async move {
        let mut carry: Option<RequestItem> = None;
        loop {
            let first = match carry.take() {
                Some(item) => item,
                None => match receiver.recv_async().await {
                    Ok(item) => item,
                    Err(_) => {
                        debug!(worker_id, "queue closed and drained, worker exiting");
                        return;
                    }
                },
            };

            if state.load(Ordering::SeqCst) == State::Draining as u8 {
                metrics::record_request_failed(&served_name, "shutdown");
                first.fail(Error::Shutdown);
                while let Ok(item) = receiver.try_recv() {
                    metrics::record_request_failed(&served_name, "shutdown");
                    item.fail(Error::Shutdown);
                }
                continue;
            }

            let kind_is_text = matches!(first.input, EmbeddingInput::Text(_));
            let mut items = vec![first];

            while items.len() < batch_size {
                match timeout(COLLECTION_TIMEOUT, receiver.recv_async()).await {
                    Ok(Ok(item)) => {
                        let matches_kind = matches!(item.input, EmbeddingInput::Text(_)) == kind_is_text;
                        if matches_kind {
                            items.push(item);
                        } else {
                            carry = Some(item);
                            break;
                        }
                    }
                    Ok(Err(_)) => break,
                    Err(_) => break,
                }
            }

            process_batch(&served_name, &embedder, items).await;
        }
    });
}

async fn process_batch(served_name: &str, embedder: &Arc<dyn Embedder>, items: Vec<RequestItem>) {
    for item in &items {
        metrics::record_queue_wait(served_name, item.enqueued_at.elapsed());
    }

    let lengths: Vec<usize> = items.iter().map(|i| i.input.len()).collect();
    let batch_len = items.len();
    let flattened = flatten(&items);

    let started = Instant::now();
    let result = embedder.process_batch(flattened).await;
    metrics::record_batch(served_name, batch_len, started.elapsed());

    match result {
        Ok((vectors, usage)) => {
            let mut offset = 0;
            for (item, len) in items.into_iter().zip(lengths) {
                let slice_vectors = vectors[offset..offset + len].to_vec();
                let slice_usage = usage[offset..offset + len].to_vec();
                if item.handle.send(Ok((slice_vectors, slice_usage))).is_err() {
                    warn!("caller abandoned completion handle; discarding its result slice");
                } else {
                    metrics::record_request_completed(served_name);
                }
                offset += len;
            }
        }
        Err(e) => {
            for item in items {
                metrics::record_request_failed(served_name, "inference");
                item.fail(e.clone());
            }
        }
    }
}

fn flatten(items: &[RequestItem]) -> EmbeddingInput {
    let is_text = matches!(items[0].input, EmbeddingInput::Text(_));
    if is_text {
        let mut flat = Vec::new();
        for item in items {
            if let EmbeddingInput::Text(v) = &item.input {
                flat.extend(v.iter().cloned());
            }
        }
        EmbeddingInput::Text(flat)
    } else {
        let mut flat = Vec::new();
        for item in items {
            if let EmbeddingInput::Image(v) = &item.input {
                flat.extend(v.iter().cloned());
            }
        }
        EmbeddingInput::Image(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dtype;
    use crate::new_completion_handle;
    use crate::{Usage, Vector};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedder {
        calls: AtomicUsize,
        max_arity_seen: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                max_arity_seen: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn warm_up(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn process_batch(&self, batch: EmbeddingInput) -> Result<(Vec<Vector>, Vec<Usage>), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let len = batch.len();
            self.max_arity_seen.fetch_max(len, Ordering::SeqCst);
            match batch {
                EmbeddingInput::Text(inputs) => {
                    let usage = inputs.iter().map(|s| s.chars().count()).collect();
                    let vectors = inputs
                        .iter()
                        .map(|s| Vector::Float32(vec![s.len() as f32]))
                        .collect();
                    Ok((vectors, usage))
                }
                EmbeddingInput::Image(inputs) => {
                    let usage = inputs.iter().map(Vec::len).collect();
                    let vectors = inputs.iter().map(|_| Vector::Float32(vec![1.0])).collect();
                    Ok((vectors, usage))
                }
            }
        }

        fn dtype(&self) -> Dtype {
            Dtype::Float32
        }
    }

    #[tokio::test]
    async fn single_item_is_processed_and_order_preserved() {
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new());
        let dispatcher = BatchDispatcher::spawn("m", embedder, 1, 8, None);

        let (tx, rx) = new_completion_handle();
        dispatcher
            .submit(
                EmbeddingInput::Text(vec!["a".into(), "bb".into(), "ccc".into()]),
                tx,
            )
            .expect("submit succeeds");

        let (vectors, usage) = rx.await.expect("handle signaled").expect("success");
        assert_eq!(usage, vec![1, 2, 3]);
        assert_eq!(vectors.len(), 3);
        for (v, len) in vectors.iter().zip([1.0, 2.0, 3.0]) {
            assert_eq!(*v, Vector::Float32(vec![len]));
        }

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_submitters_each_get_their_own_slice() {
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new());
        let dispatcher = Arc::new(BatchDispatcher::spawn("m", embedder, 2, 8, None));

        let mut receivers = Vec::new();
        for n in 0..50 {
            let (tx, rx) = new_completion_handle();
            let marker = format!("req-{n}");
            dispatcher
                .submit(EmbeddingInput::Text(vec![marker.clone(), marker]), tx)
                .expect("submit succeeds");
            receivers.push((n, rx));
        }

        for (n, rx) in receivers {
            let (_vectors, usage) = rx.await.expect("handle signaled").expect("success");
            let expected_len = format!("req-{n}").chars().count();
            assert_eq!(usage, vec![expected_len, expected_len]);
        }

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn batch_size_bound_is_never_exceeded() {
        let embedder = Arc::new(CountingEmbedder::new());
        let dispatcher = BatchDispatcher::spawn("m", embedder.clone(), 1, 4, None);

        let mut receivers = Vec::new();
        for n in 0..20 {
            let (tx, rx) = new_completion_handle();
            dispatcher
                .submit(EmbeddingInput::Text(vec![format!("{n}")]), tx)
                .expect("submit succeeds");
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.expect("handle signaled").expect("success");
        }

        dispatcher.shutdown().await;
        assert!(embedder.max_arity_seen.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn oversized_single_item_passes_through_intact() {
        let embedder = Arc::new(CountingEmbedder::new());
        let dispatcher = BatchDispatcher::spawn("m", embedder.clone(), 1, 2, None);

        let big: Vec<String> = (0..10).map(|n| format!("item-{n}")).collect();
        let (tx, rx) = new_completion_handle();
        dispatcher
            .submit(EmbeddingInput::Text(big), tx)
            .expect("submit succeeds");

        let (vectors, _usage) = rx.await.expect("handle signaled").expect("success");
        assert_eq!(vectors.len(), 10);
        assert_eq!(embedder.max_arity_seen.load(Ordering::SeqCst), 10);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_enqueue() {
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new());
        let dispatcher = BatchDispatcher::spawn("m", embedder, 1, 8, None);

        let (tx, rx) = new_completion_handle();
        let result = dispatcher.submit(EmbeddingInput::Text(vec![]), tx);
        assert!(matches!(result, Err(Error::EmptyInput)));
        assert!(matches!(rx.await.expect("handle signaled"), Err(Error::EmptyInput)));

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn queued_items_are_failed_with_shutdown_error() {
        let embedder: Arc<dyn Embedder> = Arc::new(CountingEmbedder::new());
        let dispatcher = BatchDispatcher::spawn("m", embedder, 1, 8, None);

        dispatcher.shutdown().await;

        let (tx, rx) = new_completion_handle();
        let result = dispatcher.submit(EmbeddingInput::Text(vec!["late".into()]), tx);
        assert!(matches!(result, Err(Error::NotRunning)));
        assert!(matches!(rx.await.expect("handle signaled"), Err(Error::NotRunning)));
    }

    struct PanicsOnceEmbedder {
        has_panicked: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for PanicsOnceEmbedder {
        async fn warm_up(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn process_batch(&self, batch: EmbeddingInput) -> Result<(Vec<Vector>, Vec<Usage>), Error> {
            if self.has_panicked.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated worker crash");
            }
            let usage = vec![0usize; batch.len()];
            let vectors = vec![Vector::Float32(vec![1.0]); batch.len()];
            Ok((vectors, usage))
        }

        fn dtype(&self) -> Dtype {
            Dtype::Float32
        }
    }

    #[tokio::test]
    async fn worker_panic_is_respawned_while_running() {
        let embedder: Arc<dyn Embedder> = Arc::new(PanicsOnceEmbedder {
            has_panicked: AtomicUsize::new(0),
        });
        let dispatcher = BatchDispatcher::spawn("m", embedder, 1, 1, None);

        let (tx, rx) = new_completion_handle();
        dispatcher
            .submit(EmbeddingInput::Text(vec!["first".into()]), tx)
            .expect("submit succeeds");
        // The worker handling this item panics; its completion handle is
        // dropped without a response rather than resolved with an error.
        assert!(rx.await.is_err());

        let (tx2, rx2) = new_completion_handle();
        dispatcher
            .submit(EmbeddingInput::Text(vec!["second".into()]), tx2)
            .expect("submit succeeds after respawn");
        rx2.await.expect("handle signaled").expect("success");

        dispatcher.shutdown().await;
    }
}
