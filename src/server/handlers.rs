use super::types::{ErrorResponse, StatusResponse};
use crate::{
    Error,
    prediction::{ClinicalFields, PredictionResult, Predictor},
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Multipart part carrying the image file; every other part is a clinical field.
pub const IMAGE_FIELD: &str = "image";

#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<Predictor>,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Eye2Heart backend running".to_string(),
    })
}

pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResult>, HandlerError> {
    let mut image: Option<Vec<u8>> = None;
    let mut fields = ClinicalFields::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Malformed multipart body: {}", e);
        reject(StatusCode::BAD_REQUEST, format!("Malformed form data: {e}"))
    })? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == IMAGE_FIELD {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| {
                    reject(StatusCode::BAD_REQUEST, format!("Failed to read image: {e}"))
                })?;
            image = Some(bytes.to_vec());
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| {
                    reject(
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read field '{name}': {e}"),
                    )
                })?;
            fields.insert(name, value);
        }
    }

    let Some(image) = image else {
        return Err(reject(StatusCode::BAD_REQUEST, "No image uploaded"));
    };

    info!(
        "Received prediction request: {} image bytes, {} clinical fields",
        image.len(),
        fields.len()
    );

    let predictor = state.predictor.clone();
    let outcome = tokio::task::spawn_blocking(move || predictor.predict(&image, &fields))
        .await
        .map_err(|e| Error::internal(format!("Prediction task failed: {e}")))
        .and_then(|result| result);

    match outcome {
        Ok(result) => Ok(Json(result)),
        Err(e) if e.is_client_error() => {
            warn!("Rejected prediction request: {}", e);
            Err(reject(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => {
            error!("Failed to process prediction request: {}", e);
            Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Processing error: {e}"),
            ))
        }
    }
}
