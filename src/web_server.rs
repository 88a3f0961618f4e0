use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::backend::ChatBackend;
use crate::conversation::TranscriptSnapshot;
use crate::dataset::{DatasetError, TabularDataset};
use crate::session::{Session, SessionError};

// Frames pushed to WebSocket clients
#[derive(Clone, Debug, Serialize)]
struct BroadcastMessage {
    message_type: String,
    payload: serde_json::Value,
}

impl BroadcastMessage {
    fn transcript(snapshot: &TranscriptSnapshot) -> Option<Self> {
        match serde_json::to_value(snapshot) {
            Ok(payload) => Some(Self {
                message_type: "Transcript".to_string(),
                payload,
            }),
            Err(e) => {
                error!("Failed to serialize transcript snapshot: {}", e);
                None
            }
        }
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    session: Session,
    backend: Arc<dyn ChatBackend>,
}

impl AppState {
    pub fn new(session: Session, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env()),
            session,
            backend,
        }
    }
}

fn create_minijinja_env() -> AutoReloader {
    AutoReloader::new(|notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader("templates"));
        notifier.watch_path("templates", true);
        Ok(env)
    })
}

#[derive(Debug, Error)]
enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Session(SessionError::Busy) => StatusCode::CONFLICT,
            ApiError::Session(SessionError::Conversation(_)) => StatusCode::CONFLICT,
            ApiError::Session(_) => StatusCode::BAD_REQUEST,
            ApiError::Dataset(DatasetError::Read(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Dataset(_) => StatusCode::BAD_REQUEST,
        };
        debug!(%status, error = %self, "Request rejected");
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    file_name: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    question: String,
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "Business Insights Advisor",
                    backend => state.backend.name(),
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            Html(format!("Internal Server Error: {}", e))
        })
}

async fn get_dataset(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "preview": state.session.preview().await }))
}

/// Replaces the dataset and starts a new conversation with a greeting.
async fn upload_dataset(
    State(state): State<AppState>,
    Json(upload): Json<UploadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dataset = TabularDataset::from_upload(&upload.file_name, &upload.content)?;
    info!(file = %upload.file_name, rows = dataset.row_count(), "Dataset uploaded");
    let preview = dataset.preview(crate::dataset::PREVIEW_ROWS);
    state.session.init(dataset).await;
    Ok(Json(serde_json::json!({ "preview": preview })))
}

/// Accepts a question and streams the reply in the background. Progress is
/// observed through `/ws` or `/api/transcript`.
async fn post_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let turn = state.session.begin_turn(&body.question).await?;
    let message_id = turn.handle().id();

    let session = state.session.clone();
    let backend = state.backend.clone();
    tokio::spawn(async move {
        session.run_turn(turn, backend.as_ref()).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message_id": message_id })),
    ))
}

async fn post_reset(State(state): State<AppState>) -> StatusCode {
    state.session.reset().await;
    StatusCode::NO_CONTENT
}

async fn get_transcript(State(state): State<AppState>) -> Json<TranscriptSnapshot> {
    Json(state.session.snapshot())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Pushes every transcript snapshot to one client until it goes away
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut snapshots = state.session.subscribe();

    let initial = snapshots.borrow_and_update().clone();
    if !send_snapshot(&mut socket, &initial).await {
        warn!("Failed to send initial transcript to new WebSocket client");
        return;
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if !send_snapshot(&mut socket, &snapshot).await {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
            }

            Some(Ok(msg)) = socket.recv() => {
                match msg {
                    Message::Close(_) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                    Message::Text(text) => {
                        debug!("Ignoring text message from client: {}", text);
                    }
                    _ => {}
                }
            }

            else => {
                info!("WebSocket client disconnected");
                break;
            }
        }
    }
    info!("WebSocket connection closed");
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &TranscriptSnapshot) -> bool {
    let Some(frame) = BroadcastMessage::transcript(snapshot) else {
        return true;
    };
    match serde_json::to_string(&frame) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize broadcast message: {}", e);
            true
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/dataset", get(get_dataset).post(upload_dataset))
        .route("/api/chat", post(post_chat))
        .route("/api/reset", post(post_reset))
        .route("/api/transcript", get(get_transcript))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(
    port: u16,
    session: Session,
    backend: Arc<dyn ChatBackend>,
) -> Result<()> {
    let app = build_router(AppState::new(session, backend));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
