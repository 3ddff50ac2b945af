use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Multipart, Path, State as AxumState},
    http::StatusCode,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use super::{
    stats::host_stats,
    types::{ApiError, ApiServer, ApiState, HostStats},
};
use crate::lib::submissions::types::{Language, Submission};

impl ApiServer {
    pub fn new(state: Arc<ApiState>, listen: SocketAddr) -> Self {
        Self { state, listen }
    }

    pub fn router(state: Arc<ApiState>) -> Router {
        Router::new()
            .route("/api/submissions", post(ApiServer::create_submission))
            .route("/api/submissions/{id}", get(ApiServer::get_submission))
            .route("/stats", get(ApiServer::get_stats))
            .with_state(state)
    }

    /// Accepts a multipart form with a `language` text field and a `file`
    /// field holding the source. The artifact is on disk before the
    /// submission becomes visible to the scheduler.
    async fn create_submission(
        AxumState(state): AxumState<Arc<ApiState>>,
        mut multipart: Multipart,
    ) -> Result<(StatusCode, Json<Submission>), ApiError> {
        let mut language = None;
        let mut code = None;
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("language") => {
                    let text = field.text().await?;
                    let parsed = text
                        .parse::<Language>()
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                    language = Some(parsed);
                }
                Some("file") => code = Some(field.bytes().await?),
                _ => {}
            }
        }

        let language =
            language.ok_or_else(|| ApiError::BadRequest("missing field `language`".to_string()))?;
        let code = code.ok_or_else(|| ApiError::BadRequest("missing field `file`".to_string()))?;
        if code.is_empty() {
            return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
        }

        let submission = Submission::new(language);
        state.workspace.save_artifact(submission.id, &code).await?;
        state.store.insert(&submission).await?;
        info!(submission_id = %submission.id, %language, bytes = code.len(), "submission queued");

        Ok((StatusCode::CREATED, Json(submission)))
    }

    async fn get_submission(
        AxumState(state): AxumState<Arc<ApiState>>,
        Path(id): Path<Uuid>,
    ) -> Result<Json<Submission>, ApiError> {
        state
            .store
            .get(id)
            .await?
            .map(Json)
            .ok_or(ApiError::NotFound(id))
    }

    async fn get_stats(AxumState(state): AxumState<Arc<ApiState>>) -> Json<HostStats> {
        let running = state.containers.tracked_count().await;
        let mut system = state.system.lock().await;
        system.refresh_cpu_usage();
        system.refresh_memory();
        Json(host_stats(&system, running, state.max_concurrency))
    }

    /// Serves until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.listen).await?;
        info!(address = %self.listen, "listening");
        axum::serve(listener, ApiServer::router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
    }
}
