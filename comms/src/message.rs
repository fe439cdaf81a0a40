use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Playback state carried by every non-error jam frame.
///
/// Fields missing on the wire fall back to their defaults, only the `type`
/// tag of the enclosing [JamMessage] is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackFrame {
    /// The track the room is playing
    #[serde(rename = "trackId")]
    pub track_id: String,
    /// Position in the track, in milliseconds
    pub position: u64,
    /// Whether playback is paused
    pub paused: bool,
    /// The user that caused the event, or the recipient for join snapshots
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// A rejected command or a failed join, reported back to a single connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFrame {
    #[serde(rename = "trackId")]
    pub track_id: String,
    pub position: u64,
    pub paused: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Human readable reason
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Frames exchanged between a jam room and its members.
///
/// The same shape serves client commands and room broadcasts, the tag decides
/// how a frame is interpreted. Frames with an unknown or missing tag do not decode.
pub enum JamMessage {
    Join(PlaybackFrame),
    Leave(PlaybackFrame),
    Play(PlaybackFrame),
    Pause(PlaybackFrame),
    Seek(PlaybackFrame),
    Error(ErrorFrame),
}

impl JamMessage {
    /// Build an error frame addressed to `user_id`
    pub fn error(user_id: impl Into<String>, error: impl Into<String>) -> Self {
        JamMessage::Error(ErrorFrame {
            user_id: user_id.into(),
            error: error.into(),
            ..ErrorFrame::default()
        })
    }

    /// The wire tag of this frame
    pub fn kind(&self) -> &'static str {
        match self {
            JamMessage::Join(_) => "join",
            JamMessage::Leave(_) => "leave",
            JamMessage::Play(_) => "play",
            JamMessage::Pause(_) => "pause",
            JamMessage::Seek(_) => "seek",
            JamMessage::Error(_) => "error",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            JamMessage::Join(frame)
            | JamMessage::Leave(frame)
            | JamMessage::Play(frame)
            | JamMessage::Pause(frame)
            | JamMessage::Seek(frame) => &frame.user_id,
            JamMessage::Error(frame) => &frame.user_id,
        }
    }

    pub fn position(&self) -> u64 {
        match self {
            JamMessage::Join(frame)
            | JamMessage::Leave(frame)
            | JamMessage::Play(frame)
            | JamMessage::Pause(frame)
            | JamMessage::Seek(frame) => frame.position,
            JamMessage::Error(frame) => frame.position,
        }
    }

    /// Serialize into a single text frame
    pub fn to_frame(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("could not serialize jam message")
    }

    /// Parse a single text frame
    pub fn from_frame(frame: &str) -> anyhow::Result<Self> {
        serde_json::from_str(frame).context("could not deserialize jam message")
    }
}
