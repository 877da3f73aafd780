use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::room::Timeouts;

pub const DEFAULT_BIND: &str = "0.0.0.0:33030";

#[derive(Clone, Debug, Parser)]
#[command(name = "badam-server")]
#[command(about = "Badam Satti game rooms over HTTP and WebSocket", long_about = None)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "BADAM_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Tracing filter used when RUST_LOG is unset
    #[arg(long, env = "BADAM_LOG", default_value = "info")]
    pub log_filter: String,

    /// Emit JSON log lines
    #[arg(long, env = "BADAM_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Seconds an unstarted room stays joinable
    #[arg(long, env = "BADAM_LOBBY_TTL_SECS", default_value_t = 300)]
    pub lobby_ttl_secs: u64,

    /// Seconds a disconnected player has to come back
    #[arg(long, env = "BADAM_RECONNECT_WINDOW_SECS", default_value_t = 120)]
    pub reconnect_window_secs: u64,

    /// Seconds without a heartbeat before a player counts as disconnected
    #[arg(long, env = "BADAM_HEARTBEAT_TIMEOUT_SECS", default_value_t = 20)]
    pub heartbeat_timeout_secs: u64,

    #[arg(long, env = "BADAM_TERMINATION_TICK_SECS", default_value_t = 5)]
    pub termination_tick_secs: u64,

    /// Seconds a finished room is kept for late viewers
    #[arg(long, env = "BADAM_FINISHED_RETENTION_SECS", default_value_t = 3600)]
    pub finished_retention_secs: u64,

    #[arg(long, env = "BADAM_JANITOR_PERIOD_SECS", default_value_t = 60)]
    pub janitor_period_secs: u64,

    /// Fixed seed for room codes and shuffles
    #[arg(long, env = "BADAM_RNG_SEED")]
    pub rng_seed: Option<u64>,
}

impl ServerConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            lobby_ttl_secs: self.lobby_ttl_secs,
            reconnect_window_secs: self.reconnect_window_secs,
            heartbeat_timeout_secs: self.heartbeat_timeout_secs,
            termination_tick_secs: self.termination_tick_secs,
            finished_retention_secs: self.finished_retention_secs,
        }
    }

    pub fn janitor_period(&self) -> Duration {
        Duration::from_secs(self.janitor_period_secs.max(1))
    }
}
