use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use game_core::GameError;
use serde_json::json;
use tracing::error;

const LOG_TARGET: &str = "server::error";

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ForbiddenReason {
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("only the host can do that")]
    HostOnly,
    #[error("the host cannot remove themselves")]
    CannotRemoveSelf,
    #[error("you are not the disconnected player")]
    NotDisconnectedSeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateReason {
    #[error("the room invitation has expired")]
    Expired,
    #[error("the game has already started")]
    AlreadyStarted,
    #[error("the game has not started")]
    NotStarted,
    #[error("the room is full")]
    Full,
    #[error("not all players have joined yet")]
    NotFull,
    #[error("the game is halted while a player is disconnected")]
    Halted,
    #[error("the game is over")]
    GameOver,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("{0}")]
    Forbidden(ForbiddenReason),
    #[error("{0}")]
    InvalidState(StateReason),
    #[error("invalid move")]
    InvalidMove,
    #[error("session expired, please rejoin")]
    SessionExpired,
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RoomError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        RoomError::BadRequest(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RoomError::NotFound => "not_found",
            RoomError::Forbidden(_) => "forbidden",
            RoomError::InvalidState(_) => "invalid_state",
            RoomError::InvalidMove => "invalid_move",
            RoomError::SessionExpired => "session_expired",
            RoomError::BadRequest(_) => "bad_request",
            RoomError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RoomError::NotFound => StatusCode::NOT_FOUND,
            RoomError::Forbidden(_) => StatusCode::FORBIDDEN,
            RoomError::InvalidState(StateReason::Expired) => StatusCode::GONE,
            RoomError::InvalidState(_) => StatusCode::CONFLICT,
            RoomError::InvalidMove => StatusCode::UNPROCESSABLE_ENTITY,
            RoomError::SessionExpired => StatusCode::UNAUTHORIZED,
            RoomError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show a client. Internal details stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Internal(_) => "An unexpected error occurred.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<GameError> for RoomError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::NotYourTurn => RoomError::Forbidden(ForbiddenReason::NotYourTurn),
            GameError::CardNotHeld | GameError::IllegalMove => RoomError::InvalidMove,
            GameError::GameOver => RoomError::InvalidState(StateReason::GameOver),
            GameError::UnknownSeat => RoomError::SessionExpired,
        }
    }
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        if let RoomError::Internal(message) = &self {
            error!(target: LOG_TARGET, %message, "internal server error");
        }
        let body = Json(json!({
            "success": false,
            "kind": self.kind(),
            "message": self.client_message(),
        }));
        (self.status_code(), body).into_response()
    }
}
