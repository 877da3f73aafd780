use chrono::{DateTime, Utc};
use game_core::{Card, GameState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::clock::elapsed_secs;
use crate::error::{ForbiddenReason, RoomError, StateReason};
use crate::protocol::{CardView, PlayerView, RoomSnapshot, ScoreEntry, SeatSummary};

pub type GameId = Uuid;

pub const MIN_PLAYERS: u8 = 2;
pub const MAX_PLAYERS: u8 = 8;
pub const HOST_SEAT: u8 = 1;

/// Wall-clock limits, all in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub lobby_ttl_secs: u64,
    pub reconnect_window_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub termination_tick_secs: u64,
    pub finished_retention_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            lobby_ttl_secs: 300,
            reconnect_window_secs: 120,
            heartbeat_timeout_secs: 20,
            termination_tick_secs: 5,
            finished_retention_secs: 3600,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    InProgress,
    Halted,
    Finished,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub number: u8,
    pub name: String,
    pub token: Uuid,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    pub seat: u8,
    pub since: DateTime<Utc>,
}

/// What a reconnect-timeout check did to the room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationCheck {
    /// Nobody is disconnected.
    Idle,
    /// The round is over; nothing left to supervise.
    Finished,
    /// Still inside the reconnect window.
    Pending { seat: u8, time_remaining: u64 },
    /// The seat was dropped and play resumes with the others.
    Removed { seat: u8, name: String },
    /// The seat was dropped and too few players remain.
    Terminated { seat: u8, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed { seat: u8, name: String },
    Terminated { seat: u8, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub code: String,
    pub game_id: GameId,
    pub capacity: u8,
    pub seats: Vec<Seat>,
    pub created_at: DateTime<Utc>,
    pub game: Option<GameState>,
    pub game_over: bool,
    pub winner: Option<u8>,
    pub disconnect: Option<Disconnect>,
    pub terminated_by_disconnect: bool,
    pub scores: Option<Vec<ScoreEntry>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn new(code: String, host_name: &str, capacity: u8, now: DateTime<Utc>) -> Self {
        Room {
            code,
            game_id: Uuid::new_v4(),
            capacity,
            seats: vec![Seat {
                number: HOST_SEAT,
                name: host_name.to_string(),
                token: Uuid::new_v4(),
                last_heartbeat: now,
            }],
            created_at: now,
            game: None,
            game_over: false,
            winner: None,
            disconnect: None,
            terminated_by_disconnect: false,
            scores: None,
            finished_at: None,
        }
    }

    pub fn started(&self) -> bool {
        self.game.is_some()
    }

    pub fn status(&self) -> RoomStatus {
        if self.game_over {
            RoomStatus::Finished
        } else if !self.started() {
            RoomStatus::Waiting
        } else if self.disconnect.is_some() {
            RoomStatus::Halted
        } else {
            RoomStatus::InProgress
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeouts: &Timeouts) -> bool {
        self.status() == RoomStatus::Waiting
            && elapsed_secs(self.created_at, now) > timeouts.lobby_ttl_secs as f64
    }

    pub fn lobby_time_left(&self, now: DateTime<Utc>, timeouts: &Timeouts) -> u64 {
        let left = timeouts.lobby_ttl_secs as f64 - elapsed_secs(self.created_at, now);
        left.max(0.0) as u64
    }

    pub fn current_turn(&self) -> u8 {
        self.game.as_ref().map_or(HOST_SEAT, |game| game.turn)
    }

    pub fn seat(&self, number: u8) -> Option<&Seat> {
        self.seats.iter().find(|seat| seat.number == number)
    }

    pub fn seat_by_token(&self, token: Uuid) -> Option<&Seat> {
        self.seats.iter().find(|seat| seat.token == token)
    }

    pub fn seat_by_name(&self, name: &str) -> Option<&Seat> {
        let wanted = name.to_lowercase();
        self.seats
            .iter()
            .find(|seat| seat.name.to_lowercase() == wanted)
    }

    /// Resolves a session token to the seat number it holds right now.
    pub fn resolve(&self, token: Uuid) -> Result<u8, RoomError> {
        self.seat_by_token(token)
            .map(|seat| seat.number)
            .ok_or(RoomError::SessionExpired)
    }

    fn seat_mut(&mut self, number: u8) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|seat| seat.number == number)
    }

    fn renumber(&mut self) {
        for (idx, seat) in self.seats.iter_mut().enumerate() {
            seat.number = idx as u8 + 1;
        }
    }

    /// Seats a player by name, or hands back the existing seat when the name
    /// (ignoring case) is already taken. Returns the seat and whether it was a
    /// rejoin.
    pub fn admit(&mut self, name: &str, now: DateTime<Utc>) -> Result<(Seat, bool), RoomError> {
        if let Some(number) = self.seat_by_name(name).map(|seat| seat.number) {
            if self.disconnect.map(|d| d.seat) == Some(number) {
                self.disconnect = None;
            }
            let seat = self
                .seat_mut(number)
                .ok_or_else(|| RoomError::Internal("seat vanished during rejoin".to_string()))?;
            seat.last_heartbeat = now;
            return Ok((seat.clone(), true));
        }
        if self.started() {
            return Err(RoomError::InvalidState(StateReason::AlreadyStarted));
        }
        if self.seats.len() >= usize::from(self.capacity) {
            return Err(RoomError::InvalidState(StateReason::Full));
        }
        let seat = Seat {
            number: self.seats.len() as u8 + 1,
            name: name.to_string(),
            token: Uuid::new_v4(),
            last_heartbeat: now,
        };
        self.seats.push(seat.clone());
        Ok((seat, false))
    }

    pub fn start(&mut self, requester: u8, seed: u64, now: DateTime<Utc>) -> Result<(), RoomError> {
        if requester != HOST_SEAT {
            return Err(RoomError::Forbidden(ForbiddenReason::HostOnly));
        }
        if self.started() {
            return Err(RoomError::InvalidState(StateReason::AlreadyStarted));
        }
        if self.seats.len() < usize::from(self.capacity) {
            return Err(RoomError::InvalidState(StateReason::NotFull));
        }
        self.game = Some(GameState::new(self.seats.len(), seed));
        for seat in self.seats.iter_mut() {
            seat.last_heartbeat = now;
        }
        Ok(())
    }

    fn ensure_playing(&self) -> Result<(), RoomError> {
        if self.game_over {
            return Err(RoomError::InvalidState(StateReason::GameOver));
        }
        if !self.started() {
            return Err(RoomError::InvalidState(StateReason::NotStarted));
        }
        if self.disconnect.is_some() {
            return Err(RoomError::InvalidState(StateReason::Halted));
        }
        Ok(())
    }

    fn game_mut(&mut self) -> Result<&mut GameState, RoomError> {
        self.game
            .as_mut()
            .ok_or(RoomError::InvalidState(StateReason::NotStarted))
    }

    /// Plays a card for `seat`. Returns the winner when the play empties the hand.
    pub fn play(
        &mut self,
        seat: u8,
        card_id: u8,
        now: DateTime<Utc>,
    ) -> Result<Option<u8>, RoomError> {
        self.ensure_playing()?;
        let card = Card::from_id(card_id).ok_or(RoomError::InvalidMove)?;
        let outcome = self.game_mut()?.apply_move(seat, card)?;
        if let Some(winner) = outcome.winner {
            self.winner = Some(winner);
            self.finish(now);
        }
        Ok(outcome.winner)
    }

    pub fn pass(&mut self, seat: u8) -> Result<u8, RoomError> {
        self.ensure_playing()?;
        Ok(self.game_mut()?.pass(seat)?)
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.game_over = true;
        self.disconnect = None;
        self.finished_at = Some(now);
        if self.scores.is_none() {
            self.scores = Some(self.compute_scores());
        }
    }

    fn compute_scores(&self) -> Vec<ScoreEntry> {
        let Some(game) = self.game.as_ref() else {
            return Vec::new();
        };
        game.scores()
            .into_iter()
            .map(|s| ScoreEntry {
                seat: s.seat,
                name: self
                    .seat(s.seat)
                    .map(|seat| seat.name.clone())
                    .unwrap_or_default(),
                score: s.score,
                remaining_cards: s.remaining_cards,
            })
            .collect()
    }

    /// Marks `seat` disconnected and starts its reconnect timer. Only one seat
    /// is tracked at a time and only while a round is being played.
    pub fn mark_disconnected(&mut self, seat: u8, now: DateTime<Utc>) -> bool {
        if self.disconnect.is_some() || self.game_over || !self.started() {
            return false;
        }
        if self.seat(seat).is_none() {
            return false;
        }
        self.disconnect = Some(Disconnect { seat, since: now });
        true
    }

    pub fn reconnect(&mut self, seat: u8, now: DateTime<Utc>) -> Result<(), RoomError> {
        match self.disconnect {
            Some(d) if d.seat == seat => {
                self.disconnect = None;
                if let Some(s) = self.seat_mut(seat) {
                    s.last_heartbeat = now;
                }
                Ok(())
            }
            _ => Err(RoomError::Forbidden(ForbiddenReason::NotDisconnectedSeat)),
        }
    }

    /// Refreshes the seat's heartbeat. A heartbeat from the disconnected seat
    /// resumes play; returns true in that case.
    pub fn heartbeat(&mut self, seat: u8, now: DateTime<Utc>) -> bool {
        if let Some(s) = self.seat_mut(seat) {
            s.last_heartbeat = now;
        }
        match self.disconnect {
            Some(d) if d.seat == seat => {
                self.disconnect = None;
                true
            }
            _ => false,
        }
    }

    pub fn reconnect_time_left(&self, now: DateTime<Utc>, timeouts: &Timeouts) -> u64 {
        match self.disconnect {
            Some(d) if !self.game_over => {
                let left = timeouts.reconnect_window_secs as f64 - elapsed_secs(d.since, now);
                left.max(0.0) as u64
            }
            _ => 0,
        }
    }

    pub fn check_termination(
        &mut self,
        now: DateTime<Utc>,
        timeouts: &Timeouts,
    ) -> TerminationCheck {
        if self.game_over {
            return TerminationCheck::Finished;
        }
        let Some(disconnect) = self.disconnect else {
            return TerminationCheck::Idle;
        };
        if elapsed_secs(disconnect.since, now) < timeouts.reconnect_window_secs as f64 {
            return TerminationCheck::Pending {
                seat: disconnect.seat,
                time_remaining: self.reconnect_time_left(now, timeouts),
            };
        }
        match self.drop_seat(disconnect.seat, now) {
            Ok(RemovalOutcome::Removed { seat, name }) => TerminationCheck::Removed { seat, name },
            Ok(RemovalOutcome::Terminated { seat, name }) => {
                self.terminated_by_disconnect = true;
                TerminationCheck::Terminated { seat, name }
            }
            Err(_) => {
                self.disconnect = None;
                TerminationCheck::Idle
            }
        }
    }

    /// Flags the first seat whose heartbeat is older than the timeout.
    pub fn check_inactivity(&mut self, now: DateTime<Utc>, timeouts: &Timeouts) -> Option<u8> {
        if self.status() != RoomStatus::InProgress {
            return None;
        }
        let stale = self
            .seats
            .iter()
            .find(|seat| {
                elapsed_secs(seat.last_heartbeat, now) > timeouts.heartbeat_timeout_secs as f64
            })
            .map(|seat| seat.number)?;
        self.mark_disconnected(stale, now).then_some(stale)
    }

    /// Host-initiated removal. Before the start this only frees the seat;
    /// during a round it drops the seat's hand as well.
    pub fn remove_seat(
        &mut self,
        requester: u8,
        target: u8,
        now: DateTime<Utc>,
    ) -> Result<RemovalOutcome, RoomError> {
        if requester != HOST_SEAT {
            return Err(RoomError::Forbidden(ForbiddenReason::HostOnly));
        }
        if target == HOST_SEAT {
            return Err(RoomError::Forbidden(ForbiddenReason::CannotRemoveSelf));
        }
        if self.game_over {
            return Err(RoomError::InvalidState(StateReason::GameOver));
        }
        if self.seat(target).is_none() {
            return Err(RoomError::NotFound);
        }
        self.drop_seat(target, now)
    }

    fn drop_seat(&mut self, target: u8, now: DateTime<Utc>) -> Result<RemovalOutcome, RoomError> {
        let idx = self
            .seats
            .iter()
            .position(|seat| seat.number == target)
            .ok_or(RoomError::NotFound)?;
        if let Some(game) = self.game.as_mut() {
            game.remove_seat(target)?;
        }
        let removed = self.seats.remove(idx);
        self.renumber();

        self.disconnect = match self.disconnect {
            Some(d) if d.seat == target => None,
            Some(d) if d.seat > target => Some(Disconnect {
                seat: d.seat - 1,
                since: d.since,
            }),
            other => other,
        };

        if !self.started() {
            return Ok(RemovalOutcome::Removed {
                seat: target,
                name: removed.name,
            });
        }

        self.capacity = self.seats.len() as u8;
        if self.seats.len() < usize::from(MIN_PLAYERS) {
            self.winner = None;
            self.finish(now);
            return Ok(RemovalOutcome::Terminated {
                seat: target,
                name: removed.name,
            });
        }
        Ok(RemovalOutcome::Removed {
            seat: target,
            name: removed.name,
        })
    }

    pub fn snapshot(&self, now: DateTime<Utc>, timeouts: &Timeouts) -> RoomSnapshot {
        let seats = self
            .seats
            .iter()
            .map(|seat| SeatSummary {
                seat: seat.number,
                name: seat.name.clone(),
                hand_size: self
                    .game
                    .as_ref()
                    .and_then(|game| game.hand(seat.number))
                    .map_or(0, |hand| hand.len()),
            })
            .collect();
        let layout: BTreeMap<String, Vec<CardView>> = self
            .game
            .as_ref()
            .map(|game| {
                game.layout
                    .lanes()
                    .map(|(suit, lane)| {
                        (
                            suit.to_char().to_string(),
                            lane.iter().copied().map(CardView::from).collect(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        RoomSnapshot {
            room_code: self.code.clone(),
            game_id: self.game_id,
            capacity: self.capacity,
            status: self.status(),
            seats,
            current_turn: self.current_turn(),
            layout,
            started: self.started(),
            game_over: self.game_over,
            winner: self.winner,
            disconnected_seat: self.disconnect.map(|d| d.seat),
            terminated_by_disconnect: self.terminated_by_disconnect,
            reconnect_time_left: self.reconnect_time_left(now, timeouts),
            scores: if self.game_over {
                self.scores.clone()
            } else {
                None
            },
        }
    }

    pub fn view_for(&self, seat: u8, now: DateTime<Utc>, timeouts: &Timeouts) -> PlayerView {
        let (your_hand, valid_moves) = match self.game.as_ref() {
            Some(game) => (
                game.hand(seat)
                    .map(|hand| hand.iter().copied().map(CardView::from).collect())
                    .unwrap_or_default(),
                if self.status() == RoomStatus::InProgress {
                    game.valid_moves_for(seat).into_iter().map(u8::from).collect()
                } else {
                    Vec::new()
                },
            ),
            None => (Vec::new(), Vec::new()),
        };
        PlayerView {
            room: self.snapshot(now, timeouts),
            your_seat: seat,
            your_hand,
            valid_moves,
            message: self.status_message(),
        }
    }

    fn status_message(&self) -> String {
        if self.terminated_by_disconnect {
            return "Game terminated as a player did not reconnect in time.".to_string();
        }
        if let Some(winner) = self.winner {
            let name = self
                .seat(winner)
                .map_or_else(|| format!("Player {winner}"), |seat| seat.name.clone());
            return format!("Game over! The winner is {name}.");
        }
        if self.game_over {
            return "Game over: not enough players left.".to_string();
        }
        if let Some(d) = self.disconnect {
            return format!("Player {} disconnected. Game halted.", d.seat);
        }
        String::new()
    }
}
