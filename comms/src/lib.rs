/// Frames exchanged between a jam room and its members, in both directions
pub mod message;
/// Implementation of jam message transportation over WebSockets.
/// Requires the 'client' feature and will bring in tokio and tokio-tungstenite alongside with other dependencies
pub mod transport;

/// Header the server reads the authenticated user id from, unless configured otherwise
pub const USER_ID_HEADER: &str = "x-user-id";
