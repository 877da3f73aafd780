use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::protocol::ServerMessage;
use crate::room::GameId;

/// Outbound channel for room events.
pub trait Notifier: Send + Sync {
    fn publish(&self, game_id: GameId, message: ServerMessage);

    /// Called once a room is deleted.
    fn close(&self, _game_id: GameId) {}
}

/// Socket group broadcast: one channel per game, one receiver per socket.
pub struct Hub {
    channels: DashMap<GameId, broadcast::Sender<ServerMessage>>,
    capacity: usize,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    pub fn subscribe(&self, game_id: GameId) -> broadcast::Receiver<ServerMessage> {
        self.channels
            .entry(game_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for Hub {
    fn publish(&self, game_id: GameId, message: ServerMessage) {
        if let Some(tx) = self.channels.get(&game_id) {
            // no receivers just means nobody has a socket open
            let _ = tx.send(message);
        }
    }

    fn close(&self, game_id: GameId) {
        self.channels.remove(&game_id);
    }
}
