use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RoomError;
use crate::room::GameId;

pub const SESSION_HEADER: &str = "x-session-token";

/// The identity a client presents: which game, and the seat token it was issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub game_id: GameId,
    pub token: Uuid,
}

impl Session {
    pub fn new(game_id: GameId, token: Uuid) -> Self {
        Self { game_id, token }
    }
}

/// Seat token taken from the `x-session-token` header.
#[derive(Clone, Copy, Debug)]
pub struct SessionToken(pub Uuid);

impl SessionToken {
    pub fn for_game(self, game_id: GameId) -> Session {
        Session::new(game_id, self.0)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionToken {
    type Rejection = RoomError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SESSION_HEADER)
            .ok_or(RoomError::SessionExpired)?
            .to_str()
            .map_err(|_| RoomError::SessionExpired)?;
        let token = Uuid::parse_str(raw.trim()).map_err(|_| RoomError::SessionExpired)?;
        Ok(SessionToken(token))
    }
}
