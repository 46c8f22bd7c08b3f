use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::CommandError;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::EntityCommand;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    entities: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::UnknownEntity(_)
            | EngineError::Command(CommandError::UnknownEntity(_)) => StatusCode::NOT_FOUND,
            EngineError::Command(CommandError::NotImplemented(_))
            | EngineError::Command(CommandError::NotSupported { .. })
            | EngineError::Command(CommandError::InvalidParams(_)) => StatusCode::BAD_REQUEST,
            EngineError::Command(CommandError::Device(_)) => StatusCode::BAD_GATEWAY,
            EngineError::UnknownIntegration(_) | EngineError::IntegrationStopped(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            entities: state.engine.state_snapshot().entities.len(),
        }),
    )
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn list_entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.entities.clone())
}

/// Handler for GET /v1/entities/{entity_id}
#[tracing::instrument(skip(state))]
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let snapshot = state.engine.state_snapshot();
    snapshot
        .entities
        .get(&entity_id)
        .cloned()
        .map(Json)
        .ok_or(EngineError::UnknownEntity(entity_id))
}

/// Handler for POST /v1/entities/{entity_id}/command
///
/// Waits for the command to finish, including the settle delay before the
/// follow-up refresh.
#[tracing::instrument(skip(state))]
async fn command(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(command): Json<EntityCommand>,
) -> Result<impl IntoResponse, EngineError> {
    state.engine.command(&entity_id, command).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/:entity_id", get(get_entity))
        .route("/v1/entities/:entity_id/command", post(command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        create_router(Arc::new(AppState {
            version: "test",
            engine: Arc::new(Engine::new()),
        }))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let response = router()
            .oneshot(Request::get("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_info_counts_entities() {
        let response = router()
            .oneshot(Request::get("/v1/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["version"], "test");
        assert_eq!(json["entities"], 0);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_404() {
        let response = router()
            .oneshot(
                Request::get("/v1/entities/sensor.nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router()
            .oneshot(
                Request::post("/v1/entities/sensor.nope/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command": "turn_off"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_command_body_is_rejected() {
        let response = router()
            .oneshot(
                Request::post("/v1/entities/sensor.nope/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command": "explode"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
