use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::RoomError;
use crate::hub::Hub;
use crate::logging::log_requests;
use crate::protocol::{
    CreateRoomRequest, JoinRoomRequest, JoinTicket, PlayRequest, PlayerView, RemoveSeatRequest,
    RoomSnapshot, RoomStatusView,
};
use crate::room::GameId;
use crate::rooms::RoomManager;
use crate::session::SessionToken;
use crate::supervisor::Supervisor;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RoomManager>,
    pub hub: Arc<Hub>,
    pub supervisor: Supervisor,
}

impl AppState {
    /// Starts the timeout loop whenever a response shows a halted game.
    pub fn supervise(&self, snapshot: &RoomSnapshot) {
        if snapshot.disconnected_seat.is_some() && !snapshot.game_over {
            self.supervisor.watch(snapshot.game_id);
        }
    }
}

pub fn router(state: AppState) -> Router {
    let games = Router::new()
        .route("/start", post(start_game))
        .route("/remove", post(remove_seat))
        .route("/state", get(player_view))
        .route("/play", post(play_card))
        .route("/pass", post(pass_turn))
        .route("/reconnect", post(reconnect))
        .route("/heartbeat", post(heartbeat));

    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/join", post(join_room))
        .route("/rooms/:code/status", get(room_status))
        .nest("/games/:game_id", games)
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<JoinTicket>), RoomError> {
    let ticket = state.manager.create_room(&req.host_name, req.capacity)?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn join_room(
    State(state): State<AppState>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<JoinTicket>, RoomError> {
    Ok(Json(state.manager.join_room(&req.room_code, &req.name)?))
}

async fn room_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
    token: Option<SessionToken>,
) -> Json<RoomStatusView> {
    Json(state.manager.room_status(&code, token.map(|t| t.0)))
}

async fn start_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
) -> Result<Json<RoomSnapshot>, RoomError> {
    Ok(Json(state.manager.start_game(token.for_game(game_id))?))
}

async fn remove_seat(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
    Json(req): Json<RemoveSeatRequest>,
) -> Result<Json<RoomSnapshot>, RoomError> {
    let snapshot = state
        .manager
        .remove_seat(token.for_game(game_id), req.seat)?;
    Ok(Json(snapshot))
}

async fn player_view(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
) -> Result<Json<PlayerView>, RoomError> {
    let view = state.manager.player_view(token.for_game(game_id))?;
    state.supervise(&view.room);
    Ok(Json(view))
}

async fn play_card(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
    Json(req): Json<PlayRequest>,
) -> Result<Json<PlayerView>, RoomError> {
    let card = req.card.id()?;
    Ok(Json(state.manager.play_card(token.for_game(game_id), card)?))
}

async fn pass_turn(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
) -> Result<Json<PlayerView>, RoomError> {
    Ok(Json(state.manager.pass_turn(token.for_game(game_id))?))
}

async fn reconnect(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
) -> Result<Json<PlayerView>, RoomError> {
    Ok(Json(state.manager.reconnect(token.for_game(game_id))?))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    token: SessionToken,
) -> Result<StatusCode, RoomError> {
    state.manager.heartbeat(token.for_game(game_id))?;
    Ok(StatusCode::NO_CONTENT)
}
