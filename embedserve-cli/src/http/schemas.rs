//! OpenAI-embeddings-compatible JSON request/response shapes
//! (`SPEC_FULL.md` §4.5, §6).
use serde::{Deserialize, Serialize};

use embedserve::Vector;

/// `POST /v1/embeddings` request body.
#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: InputField,
}

/// `input` accepts either one item or an array of items.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InputField {
    One(EmbeddingItem),
    Many(Vec<EmbeddingItem>),
}

impl InputField {
    pub fn into_items(self) -> Vec<EmbeddingItem> {
        match self {
            InputField::One(item) => vec![item],
            InputField::Many(items) => items,
        }
    }
}

/// One input element: a raw string, or a base64-encoded image payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingItem {
    Text(String),
    Image {
        /// Base64-encoded pixel buffer.
        image: String,
    },
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: UsageSummary,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingData {
    pub object: &'static str,
    pub embedding: VectorJson,
    pub index: usize,
}

/// Dtype-dependent JSON shape: number arrays for `float32`/`float16`,
/// 0/1 integer arrays for `binary`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VectorJson {
    Floats(Vec<f32>),
    Ints(Vec<u8>),
}

impl From<&Vector> for VectorJson {
    fn from(v: &Vector) -> Self {
        match v {
            Vector::Float32(xs) => VectorJson::Floats(xs.clone()),
            Vector::Float16(xs) => VectorJson::Floats(xs.iter().map(|x| x.to_f32()).collect()),
            Vector::Binary(xs) => VectorJson::Ints(xs.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsageSummary {
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
}
