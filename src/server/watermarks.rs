//! Watermark inspection and reset.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use super::AppState;
use crate::persistence::{WatermarkError, WatermarkStore};
use crate::types::{
    RelationKey, ScanDirection, UnknownScanDirection, Watermark, WatermarkKey,
};

#[derive(Debug, Error)]
pub enum WatermarkApiError {
    #[error("{0}")]
    InvalidDirection(#[from] UnknownScanDirection),

    #[error("relation {0} is not registered")]
    UnknownRelation(RelationKey),

    /// The relation has not been processed in this direction yet.
    #[error("no watermark recorded for {0}")]
    NotFound(WatermarkKey),

    #[error("watermark store error: {0}")]
    Store(#[from] WatermarkError),
}

impl IntoResponse for WatermarkApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            WatermarkApiError::InvalidDirection(_) => StatusCode::BAD_REQUEST,
            WatermarkApiError::UnknownRelation(_) | WatermarkApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            WatermarkApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// JSON view of one watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkView {
    pub key: String,
    pub direction: ScanDirection,
    pub low: u64,
    pub transaction_id: String,
}

impl WatermarkView {
    fn new(key: &WatermarkKey, watermark: Watermark) -> Self {
        WatermarkView {
            key: key.to_string(),
            direction: key.direction,
            low: watermark.low,
            transaction_id: watermark.transaction_id,
        }
    }
}

/// Resolves path segments to the key of a registered relation.
fn resolve_key(
    app_state: &AppState,
    direction: &str,
    table: String,
    field: String,
) -> Result<WatermarkKey, WatermarkApiError> {
    let direction: ScanDirection = direction.parse()?;
    let relation = RelationKey::new(table, field);
    if app_state.registry().get(&relation).is_none() {
        return Err(WatermarkApiError::UnknownRelation(relation));
    }
    Ok(WatermarkKey::new(direction, relation))
}

/// `GET /api/v1/watermarks/{direction}/{table}/{field}`
///
/// Reads without creating: a relation that has never been processed in this
/// direction returns 404.
pub async fn watermark_handler(
    State(app_state): State<AppState>,
    Path((direction, table, field)): Path<(String, String, String)>,
) -> Result<Json<WatermarkView>, WatermarkApiError> {
    let key = resolve_key(&app_state, &direction, table, field)?;
    let watermark = app_state
        .store()
        .peek(&key)
        .ok_or_else(|| WatermarkApiError::NotFound(key.clone()))?;
    Ok(Json(WatermarkView::new(&key, watermark)))
}

/// `DELETE /api/v1/watermarks/{direction}/{table}/{field}`
///
/// Moves the cursor back to zero with a new token, so the next pass rescans
/// the whole table.
#[instrument(skip(app_state))]
pub async fn reset_watermark_handler(
    State(app_state): State<AppState>,
    Path((direction, table, field)): Path<(String, String, String)>,
) -> Result<Json<WatermarkView>, WatermarkApiError> {
    let key = resolve_key(&app_state, &direction, table, field)?;
    let watermark = app_state.store().reset(&key).await?;
    info!(watermark = %key, "Reset watermark");
    Ok(Json(WatermarkView::new(&key, watermark)))
}
