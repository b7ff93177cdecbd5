//! Manual scheduling and the kill switch.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::AppState;
use crate::types::{SiloMode, UnknownSiloMode};
use crate::worker::{Job, JobQueue, QueueError};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    InvalidSilo(#[from] UnknownSiloMode),

    #[error("{0}")]
    Queue(#[from] QueueError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::InvalidSilo(_) => StatusCode::BAD_REQUEST,
            AdminError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleAccepted {
    pub silo: SiloMode,
    /// When set, the enqueued schedule will not enqueue anything.
    pub kill_switch: bool,
}

/// `POST /api/v1/schedule/{silo}`
///
/// Enqueues an immediate `ScheduleAll` for `silo`, outside the periodic
/// trigger.
#[instrument(skip(app_state))]
pub async fn schedule_handler(
    State(app_state): State<AppState>,
    Path(silo): Path<String>,
) -> Result<(StatusCode, Json<ScheduleAccepted>), AdminError> {
    let silo: SiloMode = silo.parse()?;
    app_state.queue().enqueue(Job::schedule_all(silo), None)?;

    let kill_switch = app_state.kill_switch().is_engaged();
    info!(%silo, kill_switch, "Manual schedule enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduleAccepted { silo, kill_switch }),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<bool>,
}

/// `GET /api/v1/kill-switch`
pub async fn kill_switch_status_handler(State(app_state): State<AppState>) -> Json<KillSwitchStatus> {
    Json(KillSwitchStatus {
        enabled: app_state.kill_switch().is_engaged(),
        previous: None,
    })
}

/// `PUT /api/v1/kill-switch`
pub async fn set_kill_switch_handler(
    State(app_state): State<AppState>,
    Json(request): Json<KillSwitchRequest>,
) -> Json<KillSwitchStatus> {
    let previous = app_state.kill_switch().set(request.enabled);
    if request.enabled != previous {
        warn!(enabled = request.enabled, "Kill switch toggled");
    }
    Json(KillSwitchStatus {
        enabled: request.enabled,
        previous: Some(previous),
    })
}
