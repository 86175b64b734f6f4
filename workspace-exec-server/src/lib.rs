use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use workspace_exec::{
    CancellationToken, ExecConfig, ProjectKind, RunRequest, RunResult, WorkspaceServer,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Execution error: {0}")]
    ExecutionError(#[from] workspace_exec::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::ExecutionError(e) if e.is_fatal() => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::ExecutionError(
                workspace_exec::Error::InvalidSnippet(_) | workspace_exec::Error::InvalidRequest(_),
            ) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::ExecutionError(_) | ServerError::ServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RunPayload {
    pub snippet: String,
    /// Seconds; the engine default applies when absent
    pub timeout: Option<u64>,
    pub raw_output: Option<bool>,
    pub kind: Option<ProjectKind>,
}

#[derive(Clone)]
pub struct AppState {
    server: Arc<WorkspaceServer>,
}

pub fn create_app(config: ExecConfig) -> Result<Router, ServerError> {
    let server = WorkspaceServer::new(config).map_err(ServerError::ExecutionError)?;

    let state = AppState {
        server: Arc::new(server),
    };

    let cors = CorsLayer::permissive();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting workspace execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn run(
    State(state): State<AppState>,
    Json(payload): Json<RunPayload>,
) -> Result<Json<RunResult>, ServerError> {
    let timeout = match payload.timeout {
        Some(0) => {
            return Err(ServerError::InvalidRequest(
                "timeout must be positive".to_string(),
            ));
        }
        Some(secs) => Duration::from_secs(secs),
        None => state.server.config().default_timeout(),
    };
    let kind = payload.kind.unwrap_or(ProjectKind::Console);

    let workspace = state.server.create_workspace(kind, "http").await?;
    let request = RunRequest::new(payload.snippet)
        .with_timeout(timeout)
        .with_raw_output(payload.raw_output.unwrap_or(false));

    let result = state
        .server
        .run_request(&workspace, &request, &CancellationToken::new())
        .await;

    if let Err(e) = workspace.teardown().await {
        warn!("Failed to tear down workspace: {}", e);
    }

    let result = result.inspect_err(|e| error!("Run failed: {}", e))?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn test_config(root: &std::path::Path) -> ExecConfig {
        ExecConfig {
            dotnet_path: PathBuf::from("/nonexistent/dotnet"),
            workspaces_root: root.to_path_buf(),
            ..ExecConfig::default()
        }
    }

    fn post_run(payload: &RunPayload) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/run")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(payload).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_config(dir.path())).expect("Failed to create app");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_config(dir.path())).expect("Failed to create app");

        let payload = RunPayload {
            snippet: "Console.WriteLine(1+1);".to_string(),
            timeout: Some(0),
            raw_output: None,
            kind: None,
        };
        let response = app.oneshot(post_run(&payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_config(dir.path())).expect("Failed to create app");

        let payload = RunPayload {
            snippet: "Console.WriteLine(1+1);".to_string(),
            timeout: Some(5),
            raw_output: None,
            kind: Some(ProjectKind::Script),
        };
        let response = app.oneshot(post_run(&payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(error["error"]
            .as_str()
            .unwrap()
            .contains("Backend unavailable"));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_app_creation() {
        let config = ExecConfig {
            max_concurrent_runs: 0,
            ..ExecConfig::default()
        };
        assert!(create_app(config).is_err());
    }

    #[tokio::test]
    async fn test_run_addition() {
        if which::which("dotnet").is_err() {
            eprintln!("Skipping test: dotnet not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let config = ExecConfig {
            workspaces_root: dir.path().to_path_buf(),
            compile_timeout_secs: 300,
            ..ExecConfig::default()
        };
        let app = create_app(config).expect("Failed to create app");

        let payload = RunPayload {
            snippet: "Console.WriteLine(1+1);".to_string(),
            timeout: Some(10),
            raw_output: None,
            kind: None,
        };
        let response = app.oneshot(post_run(&payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: RunResult = serde_json::from_slice(&body).unwrap();
        assert!(result.succeeded);
        assert_eq!(result.output, ["2"]);
    }
}
