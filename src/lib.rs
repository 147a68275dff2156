pub mod auth;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod log_entry;
pub mod manager;
pub mod observer;
pub mod peer;
pub mod rtc;
pub mod signaling;
pub mod stream;
pub mod telemetry;

pub use connection::{ConnectionInfo, Role};
pub use log_entry::{LogEntry, Severity};
pub use manager::Manager;
