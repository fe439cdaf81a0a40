pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod room_manager;
mod session;
