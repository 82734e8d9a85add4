//! The opaque inference adapter: tokenize → forward → cast to the
//! configured dtype (`SPEC_FULL.md` §4.1).
//!
//! `Embedder` is a trait rather than a base class: the concrete
//! [`sentence_transformer::SentenceTransformerEmbedder`] *holds* the
//! candle model and tokenizer as fields and forwards to them, instead of
//! inheriting from them.
use async_trait::async_trait;

use crate::config::Dtype;
use crate::{Error, Usage};

pub mod sentence_transformer;

/// One call's worth of input to an [`Embedder`]: an ordered sequence of
/// strings, or an ordered sequence of pre-decoded image buffers. Never
/// mixed within one call.
#[derive(Debug, Clone)]
pub enum EmbeddingInput {
    /// Raw text inputs. Usage is computed as character count.
    Text(Vec<String>),
    /// Pre-decoded image buffers (e.g. raw RGB8 planes produced by the HTTP
    /// boundary's `image` decode step). Usage is computed as byte length.
    Image(Vec<Vec<u8>>),
}

impl EmbeddingInput {
    /// Number of individual inputs in this call, irrespective of kind.
    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Text(items) => items.len(),
            EmbeddingInput::Image(items) => items.len(),
        }
    }

    /// True when this call carries zero inputs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One output vector, tagged with the dtype it was cast to. Callers observe
/// the exact bytes the dtype contract promises (`SPEC_FULL.md` §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    /// IEEE-754 single precision components.
    Float32(Vec<f32>),
    /// IEEE-754 half precision components.
    Float16(Vec<half::f16>),
    /// One byte per component, each 0 or 1.
    Binary(Vec<u8>),
}

impl Vector {
    /// Number of components in this vector.
    pub fn len(&self) -> usize {
        match self {
            Vector::Float32(v) => v.len(),
            Vector::Float16(v) => v.len(),
            Vector::Binary(v) => v.len(),
        }
    }

    /// True when this vector has zero components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Casts a raw `f32` row to the requested dtype. Binary casts to 1 iff
    /// the source component is strictly greater than zero.
    pub fn from_f32(raw: &[f32], dtype: Dtype) -> Vector {
        match dtype {
            Dtype::Float32 => Vector::Float32(raw.to_vec()),
            Dtype::Float16 => Vector::Float16(raw.iter().map(|&x| half::f16::from_f32(x)).collect()),
            Dtype::Binary => Vector::Binary(raw.iter().map(|&x| u8::from(x > 0.0)).collect()),
        }
    }
}

/// Public contract for an opaque embedding model: given a batch of inputs of
/// one kind, return one vector and one usage count per input, in order.
///
/// Implementations are invoked only from dispatcher worker tasks and must
/// behave as if reentrant: the dispatcher may call `process_batch`
/// concurrently from multiple workers sharing one `Arc<dyn Embedder>`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Performs one dummy inference to amortize lazy initialization (device
    /// transfer, kernel compilation, tokenizer cache fill). Idempotent after
    /// the first successful call.
    async fn warm_up(&self) -> Result<(), Error>;

    /// Embeds every input in `batch`, preserving order. Never partial: a
    /// failure fails the whole call, not a subset of the inputs.
    async fn process_batch(&self, batch: EmbeddingInput) -> Result<(Vec<Vector>, Vec<Usage>), Error>;

    /// The dtype this embedder was configured to emit.
    fn dtype(&self) -> Dtype;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_cast_is_sign_threshold() {
        let v = Vector::from_f32(&[-1.0, 0.0, 0.5, 2.0], Dtype::Binary);
        assert_eq!(v, Vector::Binary(vec![0, 0, 1, 1]));
    }

    #[test]
    fn float16_cast_preserves_representable_values() {
        let v = Vector::from_f32(&[1.0, -2.5], Dtype::Float16);
        match v {
            Vector::Float16(components) => {
                assert_eq!(components[0].to_f32(), 1.0);
                assert_eq!(components[1].to_f32(), -2.5);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn embedding_input_len_matches_kind() {
        assert_eq!(EmbeddingInput::Text(vec!["a".into(), "b".into()]).len(), 2);
        assert_eq!(EmbeddingInput::Image(vec![vec![0u8; 4]]).len(), 1);
        assert!(EmbeddingInput::Text(vec![]).is_empty());
    }
}
