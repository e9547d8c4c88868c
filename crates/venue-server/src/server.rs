use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use venue_core::SceneIndex;
use venue_settings::VenueSettings;

use crate::client::{self, ConnectionRegistry, Inbound};
use crate::dispatch::{self, VenueState};
use crate::ingest::UploadIngestor;

/// Header carrying the operator secret on `POST /scene`.
pub const OPERATOR_TOKEN_HEADER: &str = "x-operator-token";

/// Room for base64 expansion plus the JSON envelope around an upload.
const FRAME_OVERHEAD: usize = 64 * 1024;

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub max_message_bytes: usize,
    pub initial_scene: Option<SceneIndex>,
    pub operator_token: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&VenueSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &VenueSettings) -> Self {
        let max_upload = settings.uploads.max_bytes;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(settings.server.client_timeout_secs),
            max_message_bytes: max_upload
                .saturating_mul(4)
                .div_ceil(3)
                .saturating_add(FRAME_OVERHEAD),
            initial_scene: settings.scene.initial.clone(),
            operator_token: settings
                .operator
                .token
                .clone()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub venue: Arc<VenueState>,
    pub message_tx: mpsc::Sender<Inbound>,
    pub heartbeat_interval: Duration,
    pub max_message_bytes: usize,
    pub operator_token: Option<Arc<SecretString>>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/scene", get(get_scene_handler).post(set_scene_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it running.
pub async fn start(
    config: ServerConfig,
    ingestor: UploadIngestor,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let venue = Arc::new(VenueState::new(
        Arc::clone(&registry),
        config.initial_scene.clone(),
        ingestor,
    ));

    let cleanup = client::start_cleanup_task(
        Arc::clone(&registry),
        config.heartbeat_interval,
        config.client_timeout,
    );

    let (msg_tx, msg_rx) = mpsc::channel::<Inbound>(1024);
    let dispatcher = tokio::spawn(dispatch::process_messages(msg_rx, Arc::clone(&venue)));

    let app_state = AppState {
        venue: Arc::clone(&venue),
        message_tx: msg_tx,
        heartbeat_interval: config.heartbeat_interval,
        max_message_bytes: config.max_message_bytes,
        operator_token: config.operator_token.map(Arc::new),
    };

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        upload_dir = %venue.ingestor.upload_dir().display(),
        "venue server started"
    );

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state: venue,
        _server: server,
        _dispatcher: dispatcher,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub state: Arc<VenueState>,
    _server: tokio::task::JoinHandle<()>,
    _dispatcher: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .max_frame_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.venue.admit();

    client::handle_ws_connection(
        socket,
        connection_id,
        rx,
        Arc::clone(&state.venue.registry),
        state.message_tx,
        state.heartbeat_interval,
    )
    .await;
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    scene: Option<SceneIndex>,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        connections: state.venue.registry.count(),
        scene: state.venue.scene.current(),
    })
}

#[derive(Serialize)]
struct SceneResponse {
    scene: Option<SceneIndex>,
}

async fn get_scene_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(SceneResponse {
        scene: state.venue.scene.current(),
    })
}

#[derive(Deserialize)]
struct SetSceneRequest {
    scene: SceneIndex,
}

#[derive(Serialize)]
struct SetSceneResponse {
    scene: SceneIndex,
    delivered: usize,
}

/// Operator trigger: change the scene for every connected client.
async fn set_scene_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetSceneRequest>,
) -> Response {
    if let Some(expected) = &state.operator_token {
        let supplied = headers
            .get(OPERATOR_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if supplied != Some(expected.expose_secret()) {
            tracing::warn!("rejected scene change with missing or wrong operator token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "operator token required" })),
            )
                .into_response();
        }
    }

    let delivered = state.venue.scene.set_scene(request.scene.clone());
    Json(SetSceneResponse {
        scene: request.scene,
        delivered,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;
    use venue_core::events::{Ack, ServerEvent};
    use venue_store::{Database, MessageRepo};

    type ClientSocket =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn next_event(ws: &mut ClientSocket) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    fn ingestor(dir: &std::path::Path) -> UploadIngestor {
        UploadIngestor::new(dir, 1024, MessageRepo::new(Database::in_memory().unwrap()))
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn config_from_settings() {
        let mut settings = VenueSettings::default();
        settings.uploads.max_bytes = 3_000;
        settings.operator.token = Some(String::new());
        let config = ServerConfig::from_settings(&settings);
        assert_eq!(config.port, 3131);
        assert_eq!(config.max_message_bytes, 4_000 + FRAME_OVERHEAD);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.operator_token.is_none());
    }

    #[test]
    fn build_router_creates_routes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ConnectionRegistry::new(32));
        let (msg_tx, _) = mpsc::channel(32);
        let state = AppState {
            venue: Arc::new(VenueState::new(registry, None, ingestor(dir.path()))),
            message_tx: msg_tx,
            heartbeat_interval: Duration::from_secs(30),
            max_message_bytes: 1024,
            operator_token: None,
        };
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(), ingestor(dir.path())).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert!(body["scene"].is_null());
    }

    #[tokio::test]
    async fn scene_endpoint_requires_operator_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            operator_token: Some(SecretString::from("s3cret".to_string())),
            ..test_config()
        };
        let handle = start(config, ingestor(dir.path())).await.unwrap();
        let url = format!("http://127.0.0.1:{}/scene", handle.port);
        let client = reqwest::Client::new();

        let denied = client
            .post(&url)
            .json(&serde_json::json!({ "scene": 2 }))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), 401);
        assert_eq!(handle.state.scene.current(), None);

        let wrong = client
            .post(&url)
            .header(OPERATOR_TOKEN_HEADER, "guess")
            .json(&serde_json::json!({ "scene": 2 }))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);

        let accepted = client
            .post(&url)
            .header(OPERATOR_TOKEN_HEADER, "s3cret")
            .json(&serde_json::json!({ "scene": 2 }))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), 200);
        let body: serde_json::Value = accepted.json().await.unwrap();
        assert_eq!(body["scene"], 2);
        assert_eq!(body["delivered"], 0);

        let current: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(current["scene"], 2);
    }

    #[tokio::test]
    async fn websocket_client_receives_scene_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            initial_scene: Some(SceneIndex::from("intro")),
            ..test_config()
        };
        let handle = start(config, ingestor(dir.path())).await.unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", handle.port))
            .await
            .unwrap();

        assert_eq!(next_event(&mut ws).await, ServerEvent::SceneIdx(SceneIndex::from("intro")));

        handle.state.scene.set_scene(SceneIndex::Number(3));
        assert_eq!(next_event(&mut ws).await, ServerEvent::SceneIdx(SceneIndex::Number(3)));

        ws.send(Message::text(r#"{"event":"uploadText","id":11,"data":"bravo"}"#))
            .await
            .unwrap();
        let ack = next_event(&mut ws).await;
        assert_eq!(ack, ServerEvent::Ack(Ack::success(Some(11))));
        assert_eq!(handle.state.registry.count(), 1);

        ws.close(None).await.unwrap();
        for _ in 0..50 {
            if handle.state.registry.count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handle.state.registry.count(), 0);
    }
}
