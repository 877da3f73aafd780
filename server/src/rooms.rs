use crate::clock::Clock;
use crate::error::{RoomError, StateReason};
use crate::hub::Notifier;
use crate::protocol::{
    JoinTicket, PlayerView, RoomSnapshot, RoomStatusView, SeatSummary, ServerMessage,
};
use crate::room::{
    GameId, RemovalOutcome, Room, TerminationCheck, Timeouts, MAX_PLAYERS, MIN_PLAYERS,
};
use crate::session::Session;
use crate::store::{RoomStore, SharedRoom};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOG_TARGET: &str = "server::rooms";
const ROOM_CODE_LEN: usize = 6;

/// Room lifecycle and every seat-scoped action. Each call locks only the
/// room it touches and publishes the resulting events after releasing it.
pub struct RoomManager {
    store: Arc<dyn RoomStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
    rng: Mutex<StdRng>,
}

impl RoomManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        timeouts: Timeouts,
    ) -> Self {
        Self::with_seed(store, notifier, clock, timeouts, rand::random())
    }

    pub fn with_seed(
        store: Arc<dyn RoomStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        timeouts: Timeouts,
        seed: u64,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            timeouts,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn create_room(&self, host_name: &str, capacity: u8) -> Result<JoinTicket, RoomError> {
        let host_name = validate_name(host_name)?;
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&capacity) {
            return Err(RoomError::bad_request(format!(
                "capacity must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
            )));
        }
        let now = self.clock.now();
        let shared = loop {
            let room = Room::new(self.new_room_code(), host_name, capacity, now);
            if let Some(shared) = self.store.insert_if_absent(room) {
                break shared;
            }
            debug!(target: LOG_TARGET, "room code clash, retrying");
        };
        let room = shared.lock();
        let host = room.seats[0].clone();
        info!(
            target: LOG_TARGET,
            room_code = %room.code,
            game_id = %room.game_id,
            capacity,
            "room created"
        );
        Ok(JoinTicket {
            room_code: room.code.clone(),
            game_id: room.game_id,
            seat: host.number,
            name: host.name,
            token: host.token,
            rejoined: false,
            started: false,
        })
    }

    pub fn join_room(&self, code: &str, name: &str) -> Result<JoinTicket, RoomError> {
        let name = validate_name(name)?;
        let code = normalize_code(code);
        let shared = self.store.get_by_code(&code).ok_or(RoomError::NotFound)?;
        let now = self.clock.now();
        let (ticket, snapshot) = {
            let mut room = shared.lock();
            if room.is_expired(now, &self.timeouts) {
                let game_id = room.game_id;
                drop(room);
                self.expire(game_id, &code);
                return Err(RoomError::InvalidState(StateReason::Expired));
            }
            let (seat, rejoined) = room.admit(name, now)?;
            let ticket = JoinTicket {
                room_code: room.code.clone(),
                game_id: room.game_id,
                seat: seat.number,
                name: seat.name,
                token: seat.token,
                rejoined,
                started: room.started(),
            };
            (ticket, room.snapshot(now, &self.timeouts))
        };
        info!(
            target: LOG_TARGET,
            room_code = %ticket.room_code,
            seat = ticket.seat,
            rejoined = ticket.rejoined,
            "player joined"
        );
        self.publish_state(snapshot);
        Ok(ticket)
    }

    /// Lobby poll. Deletes a waiting room whose invitation has run out.
    pub fn room_status(&self, code: &str, token: Option<Uuid>) -> RoomStatusView {
        let code = normalize_code(code);
        let Some(shared) = self.store.get_by_code(&code) else {
            return RoomStatusView::Expired;
        };
        let now = self.clock.now();
        let room = shared.lock();
        if room.is_expired(now, &self.timeouts) {
            let game_id = room.game_id;
            drop(room);
            self.expire(game_id, &code);
            return RoomStatusView::Expired;
        }
        if let Some(token) = token {
            if room.seat_by_token(token).is_none() {
                return RoomStatusView::Removed;
            }
        }
        if room.started() {
            return RoomStatusView::Started {
                game_id: room.game_id,
            };
        }
        RoomStatusView::Waiting {
            game_id: room.game_id,
            seats: room
                .seats
                .iter()
                .map(|seat| SeatSummary {
                    seat: seat.number,
                    name: seat.name.clone(),
                    hand_size: 0,
                })
                .collect(),
            capacity: room.capacity,
            time_left_seconds: room.lobby_time_left(now, &self.timeouts),
        }
    }

    pub fn start_game(&self, session: Session) -> Result<RoomSnapshot, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let seed = self.rng.lock().gen::<u64>();
        let snapshot = {
            let mut room = shared.lock();
            if room.is_expired(now, &self.timeouts) {
                let (game_id, code) = (room.game_id, room.code.clone());
                drop(room);
                self.expire(game_id, &code);
                return Err(RoomError::InvalidState(StateReason::Expired));
            }
            let seat = room.resolve(session.token)?;
            room.start(seat, seed, now)?;
            info!(
                target: LOG_TARGET,
                game_id = %room.game_id,
                players = room.seats.len(),
                first_turn = room.current_turn(),
                deck_seed = room.game.as_ref().map_or(seed, |game| game.deck_seed),
                "game started"
            );
            room.snapshot(now, &self.timeouts)
        };
        self.publish_state(snapshot.clone());
        Ok(snapshot)
    }

    pub fn remove_seat(&self, session: Session, target: u8) -> Result<RoomSnapshot, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let (outcome, snapshot) = {
            let mut room = shared.lock();
            let requester = room.resolve(session.token)?;
            let outcome = room.remove_seat(requester, target, now)?;
            (outcome, room.snapshot(now, &self.timeouts))
        };
        self.publish_removal(session.game_id, outcome, &snapshot);
        self.publish_state(snapshot.clone());
        Ok(snapshot)
    }

    pub fn play_card(&self, session: Session, card_id: u8) -> Result<PlayerView, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let (winner, view) = {
            let mut room = shared.lock();
            let seat = room.resolve(session.token)?;
            let winner = room.play(seat, card_id, now)?;
            (winner, room.view_for(seat, now, &self.timeouts))
        };
        debug!(
            target: LOG_TARGET,
            game_id = %session.game_id,
            seat = view.your_seat,
            card = card_id,
            "card played"
        );
        self.publish_state(view.room.clone());
        if let Some(winner) = winner {
            info!(target: LOG_TARGET, game_id = %session.game_id, winner, "game won");
            self.notifier.publish(
                session.game_id,
                ServerMessage::GameOver {
                    winner: Some(winner),
                    terminated_by_disconnect: false,
                },
            );
        }
        Ok(view)
    }

    pub fn pass_turn(&self, session: Session) -> Result<PlayerView, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let view = {
            let mut room = shared.lock();
            let seat = room.resolve(session.token)?;
            room.pass(seat)?;
            room.view_for(seat, now, &self.timeouts)
        };
        self.publish_state(view.room.clone());
        Ok(view)
    }

    /// Starts the reconnect timer for the caller's seat. Returns false when
    /// nothing changed (another seat is already out, or no round is running).
    pub fn on_disconnect(&self, session: Session) -> Result<bool, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let (seat, marked, snapshot) = {
            let mut room = shared.lock();
            let seat = room.resolve(session.token)?;
            let marked = room.mark_disconnected(seat, now);
            (seat, marked, room.snapshot(now, &self.timeouts))
        };
        if marked {
            self.announce_disconnect(session.game_id, seat, snapshot);
        }
        Ok(marked)
    }

    pub fn reconnect(&self, session: Session) -> Result<PlayerView, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let view = {
            let mut room = shared.lock();
            let seat = room.resolve(session.token)?;
            room.reconnect(seat, now)?;
            room.view_for(seat, now, &self.timeouts)
        };
        self.announce_reconnect(session.game_id, view.your_seat, view.room.clone());
        Ok(view)
    }

    pub fn heartbeat(&self, session: Session) -> Result<(), RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let resumed = {
            let mut room = shared.lock();
            let seat = room.resolve(session.token)?;
            room.heartbeat(seat, now)
                .then(|| (seat, room.snapshot(now, &self.timeouts)))
        };
        if let Some((seat, snapshot)) = resumed {
            self.announce_reconnect(session.game_id, seat, snapshot);
        }
        Ok(())
    }

    /// The caller's view of the game. Runs the reconnect-timeout and
    /// inactivity checks first, the way a polling client drives them.
    pub fn player_view(&self, session: Session) -> Result<PlayerView, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let (check, inactive, view) = {
            let mut room = shared.lock();
            let check = room.check_termination(now, &self.timeouts);
            let inactive = room.check_inactivity(now, &self.timeouts);
            let snapshot = room.snapshot(now, &self.timeouts);
            let view = room
                .resolve(session.token)
                .map(|seat| room.view_for(seat, now, &self.timeouts));
            (check, inactive.map(|seat| (seat, snapshot)), view)
        };
        self.publish_check(session.game_id, check, view.as_ref().ok().map(|v| &v.room));
        if let Some((seat, snapshot)) = inactive {
            self.announce_disconnect(session.game_id, seat, snapshot);
        }
        view
    }

    /// The caller's view without running any checks.
    pub fn seat_view(&self, session: Session) -> Result<PlayerView, RoomError> {
        let shared = self.room(session.game_id)?;
        let now = self.clock.now();
        let room = shared.lock();
        let seat = room.resolve(session.token)?;
        Ok(room.view_for(seat, now, &self.timeouts))
    }

    pub fn snapshot(&self, game_id: GameId) -> Result<RoomSnapshot, RoomError> {
        let shared = self.room(game_id)?;
        let now = self.clock.now();
        let snapshot = shared.lock().snapshot(now, &self.timeouts);
        Ok(snapshot)
    }

    /// One reconnect-timeout check for a room. `NotFound` means the room is
    /// gone and the caller should stop checking.
    pub fn check_termination(&self, game_id: GameId) -> Result<TerminationCheck, RoomError> {
        let shared = self.room(game_id)?;
        let now = self.clock.now();
        let (check, snapshot) = {
            let mut room = shared.lock();
            let check = room.check_termination(now, &self.timeouts);
            (check, room.snapshot(now, &self.timeouts))
        };
        self.publish_check(game_id, check.clone(), Some(&snapshot));
        Ok(check)
    }

    /// Flags at most one stale seat as disconnected.
    pub fn check_inactivity(&self, game_id: GameId) -> Result<Option<u8>, RoomError> {
        let shared = self.room(game_id)?;
        let now = self.clock.now();
        let flagged = {
            let mut room = shared.lock();
            room.check_inactivity(now, &self.timeouts)
                .map(|seat| (seat, room.snapshot(now, &self.timeouts)))
        };
        Ok(flagged.map(|(seat, snapshot)| {
            self.announce_disconnect(game_id, seat, snapshot);
            seat
        }))
    }

    /// Deletes expired lobbies and finished rooms past their retention.
    /// Returns the ids of the rooms removed.
    pub fn purge_stale(&self) -> Vec<GameId> {
        let now = self.clock.now();
        let retention = self.timeouts.finished_retention_secs as f64;
        let mut purged = Vec::new();
        for game_id in self.store.game_ids() {
            let Some(shared) = self.store.get(game_id) else {
                continue;
            };
            let stale = {
                let room = shared.lock();
                room.is_expired(now, &self.timeouts)
                    || room.finished_at.map_or(false, |at| {
                        crate::clock::elapsed_secs(at, now) > retention
                    })
            };
            if stale && self.store.remove(game_id) {
                self.notifier.close(game_id);
                purged.push(game_id);
            }
        }
        if !purged.is_empty() {
            info!(target: LOG_TARGET, purged = purged.len(), "stale rooms purged");
        }
        purged
    }

    fn room(&self, game_id: GameId) -> Result<SharedRoom, RoomError> {
        self.store.get(game_id).ok_or(RoomError::NotFound)
    }

    fn expire(&self, game_id: GameId, code: &str) {
        if self.store.remove(game_id) {
            self.notifier.close(game_id);
            info!(target: LOG_TARGET, room_code = %code, %game_id, "room expired before start");
        }
    }

    fn new_room_code(&self) -> String {
        let mut rng = self.rng.lock();
        (0..ROOM_CODE_LEN)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect::<String>()
            .to_uppercase()
    }

    fn publish_state(&self, snapshot: RoomSnapshot) {
        self.notifier
            .publish(snapshot.game_id, ServerMessage::RoomState(snapshot));
    }

    fn announce_disconnect(&self, game_id: GameId, seat: u8, snapshot: RoomSnapshot) {
        info!(target: LOG_TARGET, %game_id, seat, "player disconnected, game halted");
        self.notifier.publish(
            game_id,
            ServerMessage::PlayerDisconnected {
                seat,
                reconnect_time_left: snapshot.reconnect_time_left,
            },
        );
        self.publish_state(snapshot);
    }

    fn announce_reconnect(&self, game_id: GameId, seat: u8, snapshot: RoomSnapshot) {
        info!(target: LOG_TARGET, %game_id, seat, "player reconnected, game resumed");
        self.notifier
            .publish(game_id, ServerMessage::PlayerReconnected { seat });
        self.publish_state(snapshot);
    }

    fn publish_removal(&self, game_id: GameId, outcome: RemovalOutcome, snapshot: &RoomSnapshot) {
        let (seat, name, terminated) = match outcome {
            RemovalOutcome::Removed { seat, name } => (seat, name, false),
            RemovalOutcome::Terminated { seat, name } => (seat, name, true),
        };
        info!(target: LOG_TARGET, %game_id, seat, %name, terminated, "seat removed");
        self.notifier
            .publish(game_id, ServerMessage::SeatRemoved { seat, name });
        if terminated {
            self.notifier.publish(
                game_id,
                ServerMessage::GameOver {
                    winner: None,
                    terminated_by_disconnect: snapshot.terminated_by_disconnect,
                },
            );
        }
    }

    fn publish_check(
        &self,
        game_id: GameId,
        check: TerminationCheck,
        snapshot: Option<&RoomSnapshot>,
    ) {
        let outcome = match check {
            TerminationCheck::Removed { seat, name } => RemovalOutcome::Removed { seat, name },
            TerminationCheck::Terminated { seat, name } => {
                warn!(
                    target: LOG_TARGET,
                    %game_id,
                    seat,
                    "game terminated after reconnect timeout"
                );
                RemovalOutcome::Terminated { seat, name }
            }
            _ => return,
        };
        let Some(snapshot) = snapshot else {
            // the caller was the removed seat; everyone else still needs the news
            if let Ok(snapshot) = self.snapshot(game_id) {
                self.publish_removal(game_id, outcome, &snapshot);
                self.publish_state(snapshot);
            }
            return;
        };
        self.publish_removal(game_id, outcome, snapshot);
        self.publish_state(snapshot.clone());
    }
}

fn validate_name(name: &str) -> Result<&str, RoomError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RoomError::bad_request("player name is required"));
    }
    Ok(name)
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
