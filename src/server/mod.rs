//! HTTP admin server.
//!
//! The cascade runs without any HTTP traffic; this surface exists for
//! operators to look at progress and to intervene.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if server is running
//! - `GET /api/v1/watermarks/{direction}/{table}/{field}` - Current watermark
//! - `DELETE /api/v1/watermarks/{direction}/{table}/{field}` - Reset to zero
//! - `POST /api/v1/schedule/{silo}` - Enqueue a `ScheduleAll` now (202)
//! - `GET /api/v1/kill-switch` - Kill switch state
//! - `PUT /api/v1/kill-switch` - Set the kill switch, body `{"enabled": bool}`

use std::sync::Arc;

pub mod admin;
pub mod health;
pub mod watermarks;

pub use admin::{kill_switch_status_handler, schedule_handler, set_kill_switch_handler};
pub use health::health_handler;
pub use watermarks::{reset_watermark_handler, watermark_handler};

use crate::config::KillSwitch;
use crate::persistence::FileWatermarkStore;
use crate::registry::RelationRegistry;
use crate::worker::TokioJobQueue;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<RelationRegistry>,
    store: Arc<FileWatermarkStore>,
    queue: Arc<TokioJobQueue>,
    kill_switch: KillSwitch,
}

impl AppState {
    pub fn new(
        registry: Arc<RelationRegistry>,
        store: Arc<FileWatermarkStore>,
        queue: Arc<TokioJobQueue>,
        kill_switch: KillSwitch,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                registry,
                store,
                queue,
                kill_switch,
            }),
        }
    }

    pub fn registry(&self) -> &RelationRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &FileWatermarkStore {
        &self.inner.store
    }

    pub fn queue(&self) -> &TokioJobQueue {
        &self.inner.queue
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.inner.kill_switch
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/v1/watermarks/{direction}/{table}/{field}",
            get(watermark_handler).delete(reset_watermark_handler),
        )
        .route("/api/v1/schedule/{silo}", post(schedule_handler))
        .route(
            "/api/v1/kill-switch",
            get(kill_switch_status_handler).put(set_kill_switch_handler),
        )
        .with_state(app_state)
}
