//! Route handlers translating HTTP calls into `EngineArray`/`Engine`
//! submissions (`SPEC_FULL.md` §4.5).
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

use embedserve::EmbeddingInput;

use crate::error::ApiError;
use crate::http::schemas::{
    EmbeddingData, EmbeddingItem, EmbeddingsRequest, EmbeddingsResponse, ModelEntry,
    ModelsResponse, UsageSummary, VectorJson,
};
use crate::http::AppState;

/// `request.model` is resolved via `EngineArray::lookup`: a served name, or
/// (for multi-model deployments) a stringified insertion-order index; a
/// single-model deployment accepts any value in this field.
pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmbeddingsRequest>,
) -> Result<Json<EmbeddingsResponse>, ApiError> {
    let items = request.input.into_items();
    if items.is_empty() {
        return Err(ApiError::Validation("input must not be empty".into()));
    }

    let input = build_input(items)?;
    let (vectors, usage) = state.engines.submit(&request.model, input).await?;

    let total_tokens: usize = usage.iter().sum();
    let data = vectors
        .iter()
        .enumerate()
        .map(|(index, v)| EmbeddingData {
            object: "embedding",
            embedding: VectorJson::from(v),
            index,
        })
        .collect();

    Ok(Json(EmbeddingsResponse {
        object: "list",
        data,
        model: request.model,
        usage: UsageSummary {
            prompt_tokens: total_tokens,
            total_tokens,
        },
    }))
}

fn build_input(items: Vec<EmbeddingItem>) -> Result<EmbeddingInput, ApiError> {
    let is_text = matches!(items[0], EmbeddingItem::Text(_));
    let mut texts = Vec::new();
    let mut images = Vec::new();

    for item in items {
        match item {
            EmbeddingItem::Text(s) => {
                if !is_text {
                    return Err(ApiError::Validation(
                        "cannot mix text and image inputs in one call".into(),
                    ));
                }
                texts.push(s);
            }
            EmbeddingItem::Image { image } => {
                if is_text {
                    return Err(ApiError::Validation(
                        "cannot mix text and image inputs in one call".into(),
                    ));
                }
                let compressed = BASE64
                    .decode(image)
                    .map_err(|e| ApiError::Validation(format!("invalid base64 image: {e}")))?;
                let decoded = image::load_from_memory(&compressed)
                    .map_err(|e| ApiError::Validation(format!("unrecognized image format: {e}")))?;
                images.push(decoded.to_rgb8().into_raw());
            }
        }
    }

    Ok(if is_text {
        EmbeddingInput::Text(texts)
    } else {
        EmbeddingInput::Image(images)
    })
}

pub async fn models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let data = state
        .engines
        .names()
        .into_iter()
        .map(|id| ModelEntry {
            id: id.to_string(),
            object: "model",
        })
        .collect();
    Json(ModelsResponse { object: "list", data })
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let all_running = state
        .engines
        .names()
        .iter()
        .all(|name| state.engines.get(name).map(|e| e.is_running()).unwrap_or(false));

    if all_running {
        (StatusCode::OK, Json(json!({"status": "healthy"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "starting"})))
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus_handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mixed_text_and_image_inputs() {
        let items = vec![
            EmbeddingItem::Text("hello".into()),
            EmbeddingItem::Image { image: "aGk=".into() },
        ];
        assert!(matches!(build_input(items), Err(ApiError::Validation(_))));
    }

    #[test]
    fn rejects_invalid_base64() {
        let items = vec![EmbeddingItem::Image { image: "not-base64!!".into() }];
        assert!(matches!(build_input(items), Err(ApiError::Validation(_))));
    }

    #[test]
    fn rejects_base64_that_is_not_an_image() {
        // valid base64, but the decoded bytes aren't a recognizable image format.
        let items = vec![EmbeddingItem::Image { image: "aGVsbG8gd29ybGQ=".into() }];
        assert!(matches!(build_input(items), Err(ApiError::Validation(_))));
    }

    #[test]
    fn builds_text_input_from_items() {
        let items = vec![EmbeddingItem::Text("a".into()), EmbeddingItem::Text("b".into())];
        match build_input(items).expect("valid") {
            EmbeddingInput::Text(texts) => assert_eq!(texts, vec!["a".to_string(), "b".to_string()]),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
