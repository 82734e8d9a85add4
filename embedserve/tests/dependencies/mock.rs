use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use embedserve::{Dtype, EmbeddingInput, Embedder, Error, Usage, Vector};

/// Deterministic embedder for integration tests: one `f32` component per
/// input, equal to that input's character or byte length. Records the size
/// of every batch it was called with so tests can assert on coalescing.
pub struct MockEmbedder {
    dtype: Dtype,
    pub batches_seen: Mutex<Vec<usize>>,
    pub calls: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dtype: Dtype) -> Self {
        Self {
            dtype,
            batches_seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Makes the next `n` `process_batch` calls fail with an inference error.
    pub fn fail_next_n(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn warm_up(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn process_batch(&self, batch: EmbeddingInput) -> Result<(Vec<Vector>, Vec<Usage>), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches_seen.lock().unwrap().push(batch.len());

        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Inference("mock embedder forced failure".into()));
        }

        match batch {
            EmbeddingInput::Text(inputs) => {
                let usage: Vec<Usage> = inputs.iter().map(|s| s.chars().count()).collect();
                let vectors = usage
                    .iter()
                    .map(|&n| Vector::from_f32(&[n as f32], self.dtype))
                    .collect();
                Ok((vectors, usage))
            }
            EmbeddingInput::Image(inputs) => {
                let usage: Vec<Usage> = inputs.iter().map(Vec::len).collect();
                let vectors = usage
                    .iter()
                    .map(|&n| Vector::from_f32(&[n as f32], self.dtype))
                    .collect();
                Ok((vectors, usage))
            }
        }
    }

    fn dtype(&self) -> Dtype {
        self.dtype
    }
}
