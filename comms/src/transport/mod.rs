/// Transport over WebSocket implementation for a client to be able to join a jam room
#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
mod common;
