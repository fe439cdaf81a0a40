use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use comms::message::JamMessage;
use serde::Serialize;
use thiserror::Error;

pub type JamResult<T> = Result<T, JamError>;

/// Everything that can go wrong between a client and a jam room.
///
/// Before the upgrade these become HTTP responses, afterwards they are
/// reported to the single offending connection as an `error` frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JamError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("missing or malformed room id")]
    MissingRoomId,

    #[error("room not found")]
    NotFound,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("track '{0}' not found")]
    TrackNotFound(String),

    #[error("catalog lookup failed: {0}")]
    CatalogLookup(String),

    #[error("room is full")]
    RoomFull,

    #[error("not a member of this room")]
    NotAMember,

    #[error("already joined this room")]
    AlreadyJoined,

    #[error("transport failure: {0}")]
    Transport(String),
}

impl JamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JamError::Unauthorized => StatusCode::UNAUTHORIZED,
            JamError::MissingRoomId | JamError::Validation(_) => StatusCode::BAD_REQUEST,
            JamError::NotFound | JamError::TrackNotFound(_) => StatusCode::NOT_FOUND,
            JamError::CatalogLookup(_) => StatusCode::BAD_GATEWAY,
            JamError::RoomFull | JamError::AlreadyJoined => StatusCode::CONFLICT,
            JamError::NotAMember => StatusCode::FORBIDDEN,
            JamError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine readable code
    pub fn code(&self) -> &'static str {
        match self {
            JamError::Unauthorized => "UNAUTHORIZED",
            JamError::MissingRoomId => "MISSING_ROOM_ID",
            JamError::NotFound => "NOT_FOUND",
            JamError::Validation(_) => "VALIDATION",
            JamError::TrackNotFound(_) => "TRACK_NOT_FOUND",
            JamError::CatalogLookup(_) => "CATALOG_LOOKUP",
            JamError::RoomFull => "ROOM_FULL",
            JamError::NotAMember => "NOT_A_MEMBER",
            JamError::AlreadyJoined => "ALREADY_JOINED",
            JamError::Transport(_) => "TRANSPORT",
        }
    }

    /// Render as the `error` frame sent to `user_id` after the upgrade
    pub fn to_message(&self, user_id: &str) -> JamMessage {
        JamMessage::error(user_id, self.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for JamError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
