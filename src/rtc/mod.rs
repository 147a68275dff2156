pub mod config;
pub mod connection;
pub mod manager;

pub use config::{ice_servers, rtc_configuration, DATA_CHANNEL_LABEL};
pub use connection::{ConnectionState, RtcConnection};
pub use manager::{ConnectionStateCallback, RtcManager};
