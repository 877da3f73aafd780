pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod room;
pub mod rooms;
pub mod routes;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod ws;
