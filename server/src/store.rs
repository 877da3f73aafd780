use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::room::{GameId, Room};

/// A room behind its own lock; every mutation of one room goes through it.
pub type SharedRoom = Arc<Mutex<Room>>;

/// Keyed room storage, addressable by game id and by room code.
pub trait RoomStore: Send + Sync {
    /// Stores `room` unless its code is taken. Returns `None` on a clash.
    fn insert_if_absent(&self, room: Room) -> Option<SharedRoom>;

    fn get(&self, game_id: GameId) -> Option<SharedRoom>;

    fn get_by_code(&self, code: &str) -> Option<SharedRoom>;

    fn remove(&self, game_id: GameId) -> bool;

    fn game_ids(&self) -> Vec<GameId>;
}

#[derive(Default)]
pub struct InMemoryRoomStore {
    rooms: DashMap<GameId, SharedRoom>,
    codes: DashMap<String, GameId>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for InMemoryRoomStore {
    fn insert_if_absent(&self, room: Room) -> Option<SharedRoom> {
        match self.codes.entry(room.code.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let game_id = room.game_id;
                let shared = Arc::new(Mutex::new(room));
                self.rooms.insert(game_id, Arc::clone(&shared));
                slot.insert(game_id);
                Some(shared)
            }
        }
    }

    fn get(&self, game_id: GameId) -> Option<SharedRoom> {
        self.rooms.get(&game_id).map(|entry| Arc::clone(entry.value()))
    }

    fn get_by_code(&self, code: &str) -> Option<SharedRoom> {
        let game_id = *self.codes.get(code)?.value();
        self.get(game_id)
    }

    fn remove(&self, game_id: GameId) -> bool {
        let Some((_, room)) = self.rooms.remove(&game_id) else {
            return false;
        };
        let code = room.lock().code.clone();
        self.codes.remove_if(&code, |_, id| *id == game_id);
        true
    }

    fn game_ids(&self) -> Vec<GameId> {
        self.rooms.iter().map(|entry| *entry.key()).collect()
    }
}
