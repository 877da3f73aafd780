use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RoomError;
use crate::hub::Notifier;
use crate::protocol::ServerMessage;
use crate::room::{GameId, TerminationCheck};
use crate::rooms::RoomManager;

const LOG_TARGET: &str = "server::supervisor";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// Drives the reconnect-timeout check for halted games, one task per game.
#[derive(Clone)]
pub struct Supervisor {
    manager: Arc<RoomManager>,
    notifier: Arc<dyn Notifier>,
    tasks: Arc<DashMap<GameId, JoinHandle<()>>>,
    period: Duration,
}

impl Supervisor {
    pub fn new(manager: Arc<RoomManager>, notifier: Arc<dyn Notifier>) -> Self {
        let period = Duration::from_secs(manager.timeouts().termination_tick_secs.max(1));
        Self {
            manager,
            notifier,
            tasks: Arc::new(DashMap::new()),
            period,
        }
    }

    /// Spawns the check loop for `game_id` unless one is already running.
    /// Returns true when a new loop was started.
    pub fn watch(&self, game_id: GameId) -> bool {
        match self.tasks.entry(game_id) {
            Entry::Occupied(mut running) => {
                if !running.get().is_finished() {
                    return false;
                }
                running.insert(self.spawn(game_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(self.spawn(game_id));
            }
        }
        debug!(target: LOG_TARGET, %game_id, "supervising disconnect");
        true
    }

    pub fn is_watching(&self, game_id: GameId) -> bool {
        self.tasks
            .get(&game_id)
            .map_or(false, |task| !task.is_finished())
    }

    pub fn cancel(&self, game_id: GameId) {
        if let Some((_, task)) = self.tasks.remove(&game_id) {
            task.abort();
        }
    }

    /// Forgets loops that have ended. Returns how many were dropped.
    pub fn reap(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.is_finished());
        before.saturating_sub(self.tasks.len())
    }

    /// A single check. Broadcasts the countdown while the window is open.
    pub fn tick(&self, game_id: GameId) -> TickOutcome {
        match self.manager.check_termination(game_id) {
            Ok(TerminationCheck::Pending {
                seat,
                time_remaining,
            }) => {
                self.notifier.publish(
                    game_id,
                    ServerMessage::ReconnectTimer {
                        seat,
                        time_remaining,
                    },
                );
                TickOutcome::Continue
            }
            Ok(_) | Err(RoomError::NotFound) => TickOutcome::Stop,
            Err(err) => {
                warn!(target: LOG_TARGET, %game_id, error = %err, "termination check failed");
                TickOutcome::Stop
            }
        }
    }

    fn spawn(&self, game_id: GameId) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.period);
            loop {
                interval.tick().await;
                if supervisor.tick(game_id) == TickOutcome::Stop {
                    break;
                }
            }
            debug!(target: LOG_TARGET, %game_id, "supervision ended");
        })
    }
}
