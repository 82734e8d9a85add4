//! Concrete [`Embedder`] backed by a candle BERT-family encoder.
//!
//! Text inputs are tokenized in a batch, padded to the batch's longest
//! sequence, run through the encoder, mean-pooled over the attention mask,
//! then cast to the configured dtype. Because candle tensor ops can block a
//! scheduler thread, the forward pass runs inside
//! [`tokio::task::spawn_blocking`] so it never starves the tokio event loop
//! (`SPEC_FULL.md` §4.1, §5). The model itself lives behind an `Arc` so the
//! blocking closure can own a cheap clone of it rather than borrowing
//! `&self` across the `'static` boundary `spawn_blocking` requires. The
//! model load (`load`) is already invoked from within `spawn_blocking` by
//! [`crate::engine::Engine::start`].
//!
//! Image inputs are treated as already-decoded pixel buffers (compressed
//! bytes are decoded at the HTTP boundary, outside the core). They are
//! resized to a fixed canvas and projected through a fixed linear map
//! initialized at warm-up time — intentionally minimal scaffolding, since
//! the spec treats the underlying model as an opaque black box.
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use candle_core::{DType as CandleDType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE as BERT_DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tokenizers::{PaddingParams, Tokenizer};

use crate::config::{Dtype, EngineArgs};
use crate::embedder::{EmbeddingInput, Embedder, Vector};
use crate::{Error, Usage};

const IMAGE_CANVAS: u32 = 32;

/// The loaded model state, `Arc`-wrapped so `Embedder` methods can clone it
/// into a `'static` `spawn_blocking` closure instead of borrowing `&self`.
struct Inner {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dtype: Dtype,
    hidden_size: usize,
    image_projection: RwLock<Option<Arc<Tensor>>>,
}

/// Sentence-transformer embedder: a BERT-family encoder plus tokenizer,
/// loaded once at `Engine::start` and shared read-only across workers.
pub struct SentenceTransformerEmbedder {
    inner: Arc<Inner>,
}

impl SentenceTransformerEmbedder {
    /// Downloads (or reuses a cached copy of) `args.model`'s config,
    /// tokenizer, and weights from the Hugging Face Hub, or loads them from
    /// a local directory when `args.model` is a filesystem path.
    ///
    /// Performs blocking network and file I/O; call from within
    /// `spawn_blocking` or during process startup before the tokio runtime
    /// is under load.
    pub fn load(args: &EngineArgs) -> Result<Self, Error> {
        let device = Device::Cpu;

        let (config_path, tokenizer_path, weights_path) = resolve_model_files(args)?;

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::Config(format!("reading {config_path:?}: {e}")))?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| Error::Config(format!("parsing bert config: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Config(format!("loading tokenizer: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        let vb = if weights_path.extension().and_then(|e| e.to_str()) == Some("safetensors") {
            // Memory-mapping the weight file is the standard candle loading
            // path for safetensors; the file is validated by the safetensors
            // header before any tensor view is created.
            #[allow(unsafe_code)]
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], BERT_DTYPE, &device)
                    .map_err(|e| Error::Config(format!("loading weights: {e}")))?
            }
        } else {
            VarBuilder::from_pth(&weights_path, BERT_DTYPE, &device)
                .map_err(|e| Error::Config(format!("loading weights: {e}")))?
        };

        let model = BertModel::load(vb, &config)
            .map_err(|e| Error::Config(format!("constructing bert model: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                model,
                tokenizer,
                device,
                dtype: args.embedding_dtype,
                hidden_size: config.hidden_size,
                image_projection: RwLock::new(None),
            }),
        })
    }
}

impl Inner {
    fn embed_text(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        let encodings = self
            .tokenizer
            .encode_batch(inputs.to_vec(), true)
            .map_err(|e| Error::Inference(format!("tokenization failed: {e}")))?;

        let ids: Vec<Vec<u32>> = encodings.iter().map(|e| e.get_ids().to_vec()).collect();
        let masks: Vec<Vec<u32>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().to_vec())
            .collect();

        let input_ids = Tensor::new(ids, &self.device)
            .map_err(|e| Error::Inference(format!("building input_ids tensor: {e}")))?;
        let attention_mask = Tensor::new(masks, &self.device)
            .map_err(|e| Error::Inference(format!("building attention_mask tensor: {e}")))?;
        let token_type_ids = input_ids
            .zeros_like()
            .map_err(|e| Error::Inference(format!("building token_type_ids tensor: {e}")))?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| Error::Inference(format!("bert forward pass failed: {e}")))?;

        mean_pool(&output, &attention_mask)
    }

    fn embed_images(&self, inputs: &[Vec<u8>]) -> Result<Vec<Vec<f32>>, Error> {
        let projection = self.image_projection_matrix()?;
        let pixels_per_image = (IMAGE_CANVAS * IMAGE_CANVAS * 3) as usize;

        let mut rows = Vec::with_capacity(inputs.len());
        for raw in inputs {
            let mut pixels = vec![0f32; pixels_per_image];
            for (i, byte) in raw.iter().cycle().take(pixels_per_image).enumerate() {
                pixels[i] = f32::from(*byte) / 255.0;
            }
            rows.push(pixels);
        }

        let batch = Tensor::new(rows, &self.device)
            .map_err(|e| Error::Inference(format!("building image tensor: {e}")))?;
        let projected = batch
            .matmul(&projection)
            .map_err(|e| Error::Inference(format!("image projection failed: {e}")))?;
        projected
            .to_vec2::<f32>()
            .map_err(|e| Error::Inference(format!("reading projected embeddings: {e}")))
    }

    fn image_projection_matrix(&self) -> Result<Arc<Tensor>, Error> {
        if let Some(p) = self.image_projection.read().expect("lock poisoned").clone() {
            return Ok(p);
        }
        let pixels_per_image = (IMAGE_CANVAS * IMAGE_CANVAS * 3) as usize;
        let seed = Tensor::arange(0u32, (pixels_per_image * self.hidden_size) as u32, &self.device)
            .map_err(|e| Error::Inference(format!("seeding projection: {e}")))?
            .to_dtype(CandleDType::F32)
            .map_err(|e| Error::Inference(format!("seeding projection: {e}")))?
            .reshape((pixels_per_image, self.hidden_size))
            .map_err(|e| Error::Inference(format!("reshaping projection: {e}")))?;
        // Deterministic, bounded pseudo-random projection derived from a
        // counting sequence rather than real weights: the image pathway is
        // scaffolding, not a trained vision tower (see module docs).
        let scale = 1.0 / (pixels_per_image as f64).sqrt();
        let projection = (seed * scale)
            .map_err(|e| Error::Inference(format!("scaling projection: {e}")))?
            .sin()
            .map_err(|e| Error::Inference(format!("shaping projection: {e}")))?;
        let projection = Arc::new(projection);
        *self.image_projection.write().expect("lock poisoned") = Some(projection.clone());
        Ok(projection)
    }
}

fn mean_pool(hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Vec<Vec<f32>>, Error> {
    let mask = attention_mask
        .to_dtype(CandleDType::F32)
        .map_err(|e| Error::Inference(format!("casting mask: {e}")))?
        .unsqueeze(2)
        .map_err(|e| Error::Inference(format!("reshaping mask: {e}")))?;
    let expanded_mask = mask
        .broadcast_as(hidden_states.shape())
        .map_err(|e| Error::Inference(format!("broadcasting mask: {e}")))?;
    let masked = (hidden_states * &expanded_mask)
        .map_err(|e| Error::Inference(format!("applying mask: {e}")))?;
    let summed = masked
        .sum(1)
        .map_err(|e| Error::Inference(format!("summing over sequence: {e}")))?;
    let counts = mask
        .sum(1)
        .map_err(|e| Error::Inference(format!("summing mask: {e}")))?
        .clamp(1e-9, f64::MAX)
        .map_err(|e| Error::Inference(format!("clamping mask counts: {e}")))?;
    let pooled = summed
        .broadcast_div(&counts)
        .map_err(|e| Error::Inference(format!("averaging pooled vectors: {e}")))?;
    pooled
        .to_vec2::<f32>()
        .map_err(|e| Error::Inference(format!("reading pooled embeddings: {e}")))
}

fn resolve_model_files(
    args: &EngineArgs,
) -> Result<(std::path::PathBuf, std::path::PathBuf, std::path::PathBuf), Error> {
    let local = std::path::Path::new(&args.model);
    if local.is_dir() {
        return Ok((
            local.join("config.json"),
            local.join("tokenizer.json"),
            local.join("model.safetensors"),
        ));
    }

    let api = Api::new().map_err(|e| Error::Config(format!("initializing hf-hub api: {e}")))?;
    let repo = api.repo(Repo::new(args.model.clone(), RepoType::Model));

    let config_path = repo
        .get("config.json")
        .map_err(|e| Error::Config(format!("downloading config.json: {e}")))?;
    let tokenizer_path = repo
        .get("tokenizer.json")
        .map_err(|e| Error::Config(format!("downloading tokenizer.json: {e}")))?;
    let weights_path = repo
        .get("model.safetensors")
        .map_err(|e| Error::Config(format!("downloading model.safetensors: {e}")))?;

    Ok((config_path, tokenizer_path, weights_path))
}

#[async_trait]
impl Embedder for SentenceTransformerEmbedder {
    async fn warm_up(&self) -> Result<(), Error> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            inner.embed_text(&["warm up".to_string()])?;
            inner.image_projection_matrix()?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Inference(format!("warm-up task panicked: {e}")))?
    }

    async fn process_batch(&self, batch: EmbeddingInput) -> Result<(Vec<Vector>, Vec<Usage>), Error> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || match batch {
            EmbeddingInput::Text(inputs) => {
                let usage = inputs.iter().map(|s| s.chars().count()).collect();
                let raw = inner.embed_text(&inputs)?;
                let vectors = raw.iter().map(|row| Vector::from_f32(row, inner.dtype)).collect();
                Ok((vectors, usage))
            }
            EmbeddingInput::Image(inputs) => {
                let usage = inputs.iter().map(Vec::len).collect();
                let raw = inner.embed_images(&inputs)?;
                let vectors = raw.iter().map(|row| Vector::from_f32(row, inner.dtype)).collect();
                Ok((vectors, usage))
            }
        })
        .await
        .map_err(|e| Error::Inference(format!("inference task panicked: {e}")))?
    }

    fn dtype(&self) -> Dtype {
        self.inner.dtype
    }
}
