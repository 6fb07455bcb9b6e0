//! REST + WebSocket front end, an alternate surface over the same broker
//! operation set the local socket exposes (§4.4, §6).

mod ws_adapter;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::broker::Broker;
use crate::errors::DaemonError;
use openkanban_protocol::{Board, Ticket, TicketStatus};

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// Wraps [`DaemonError`] so it can be returned directly from an axum
/// handler; status code follows the taxonomy in §7 (not-found errors map
/// to 404, everything else the REST surface can produce is a 400).
pub struct ApiError(DaemonError);

impl From<DaemonError> for ApiError {
    fn from(e: DaemonError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DaemonError::TicketNotFound(_) | DaemonError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            DaemonError::PersistenceError(_) | DaemonError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DaemonError::UncommittedChanges(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = json!({
            "error": self.0.error_code(),
            "message": self.0.client_message(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router. `bind_addr` is informational only (used for the
/// startup log line); the caller owns binding via `axum::serve`.
pub fn build_router(broker: Arc<Broker>, bind_addr: SocketAddr) -> Router {
    info!(event = "daemon.http.router_built", bind = %bind_addr);
    let state = AppState { broker };
    Router::new()
        .route("/api/health", get(health))
        .route("/api/board", get(get_board))
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/api/tickets/{id}",
            get(get_ticket).patch(update_ticket).delete(delete_ticket),
        )
        .route("/api/tickets/{id}/move", post(move_ticket))
        .route("/ws", get(ws_adapter::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn get_board(State(state): State<AppState>) -> Json<Board> {
    Json(state.broker.board.snapshot().await)
}

async fn list_tickets(State(state): State<AppState>) -> Json<Vec<Ticket>> {
    let board = state.broker.board.snapshot().await;
    Json(board.tickets.into_values().collect())
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let board = state.broker.board.snapshot().await;
    board
        .tickets
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| DaemonError::TicketNotFound(id).into())
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

async fn create_ticket(
    State(state): State<AppState>,
    Json(req): Json<CreateTicketRequest>,
) -> impl IntoResponse {
    let ticket = state.broker.board.create_ticket(req.title, req.description).await;
    (StatusCode::CREATED, Json(ticket))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state
        .broker
        .board
        .update_ticket(&id, req.title, req.description)
        .await?;
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
pub struct DeleteTicketQuery {
    #[serde(default)]
    pub force: bool,
}

async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteTicketQuery>,
) -> Result<StatusCode, ApiError> {
    state.broker.board.delete_ticket(&id, query.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MoveTicketRequest {
    pub status: TicketStatus,
}

async fn move_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MoveTicketRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.broker.board.move_ticket(&id, req.status).await?;
    Ok(Json(ticket))
}
