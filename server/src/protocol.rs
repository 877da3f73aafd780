use game_core::Card;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::RoomError;
use crate::room::RoomStatus;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    Play { card: CardRef },
    Pass,
    Reconnect,
    GetState,
    /// Doubles as the heartbeat.
    Ping,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    Welcome {
        game_id: Uuid,
        seat: u8,
        name: String,
    },
    RoomState(RoomSnapshot),
    YourView(PlayerView),
    PlayerDisconnected {
        seat: u8,
        reconnect_time_left: u64,
    },
    PlayerReconnected {
        seat: u8,
    },
    ReconnectTimer {
        seat: u8,
        time_remaining: u64,
    },
    SeatRemoved {
        seat: u8,
        name: String,
    },
    GameOver {
        winner: Option<u8>,
        terminated_by_disconnect: bool,
    },
    Error {
        kind: String,
        message: String,
    },
    Pong,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardView {
    pub id: u8,
    pub code: String,
}

impl From<Card> for CardView {
    fn from(card: Card) -> Self {
        CardView {
            id: card.id(),
            code: card.code(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSummary {
    pub seat: u8,
    pub name: String,
    pub hand_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub seat: u8,
    pub name: String,
    pub score: u32,
    pub remaining_cards: usize,
}

/// Everything every seat may see. Hands appear only as sizes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_code: String,
    pub game_id: Uuid,
    pub capacity: u8,
    pub status: RoomStatus,
    pub seats: Vec<SeatSummary>,
    pub current_turn: u8,
    /// Keyed by suit letter (`H`, `D`, `C`, `S`), each lane ascending by rank.
    pub layout: BTreeMap<String, Vec<CardView>>,
    pub started: bool,
    pub game_over: bool,
    pub winner: Option<u8>,
    pub disconnected_seat: Option<u8>,
    pub terminated_by_disconnect: bool,
    pub reconnect_time_left: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<ScoreEntry>>,
}

/// The snapshot plus what only the requesting seat may see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    #[serde(flatten)]
    pub room: RoomSnapshot,
    pub your_seat: u8,
    pub your_hand: Vec<CardView>,
    pub valid_moves: Vec<u8>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub host_name: String,
    pub capacity: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub room_code: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayRequest {
    pub card: CardRef,
}

/// A card named either by id (`7`) or by code (`"7H"`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardRef {
    Id(u8),
    Code(String),
}

impl CardRef {
    pub fn id(&self) -> Result<u8, RoomError> {
        match self {
            CardRef::Id(id) => Ok(*id),
            CardRef::Code(code) => Card::from_code(&code.trim().to_uppercase())
                .map(|card| card.id())
                .ok_or(RoomError::InvalidMove),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoveSeatRequest {
    pub seat: u8,
}

/// Returned by create and join. `token` is the caller's session credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTicket {
    pub room_code: String,
    pub game_id: Uuid,
    pub seat: u8,
    pub name: String,
    pub token: Uuid,
    pub rejoined: bool,
    pub started: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoomStatusView {
    Waiting {
        game_id: Uuid,
        seats: Vec<SeatSummary>,
        capacity: u8,
        time_left_seconds: u64,
    },
    Started {
        game_id: Uuid,
    },
    Removed,
    Expired,
}
