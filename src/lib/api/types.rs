use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use crate::lib::{
    containers::manager::ContainerManager,
    submissions::{store::SubmissionStore, types::StoreError},
    workspace::{Workspace, WorkspaceError},
};

/// Everything the intake handlers reach into.
pub struct ApiState {
    pub store: Arc<dyn SubmissionStore>,
    pub workspace: Arc<Workspace>,
    pub containers: Arc<ContainerManager>,
    pub max_concurrency: usize,
    pub system: Mutex<System>,
}

pub struct ApiServer {
    pub state: Arc<ApiState>,
    pub listen: SocketAddr,
}

/// Load of the host next to the runner's own slot usage.
#[derive(Debug, Clone, PartialEq)]
pub struct HostStats {
    pub hostname: String,
    pub cpu_usage: f32,
    pub used_memory_mb: u64,
    pub total_memory_mb: u64,
    pub running_containers: usize,
    pub max_concurrency: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("submission {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Workspace(_) | ApiError::Store(_) => {
                error!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
