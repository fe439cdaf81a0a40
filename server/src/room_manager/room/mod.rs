mod broadcast_hub;
mod jam_room;
mod member_handle;
mod member_registry;
mod playback;

pub use self::jam_room::{
    JamRoom, LeaveOutcome, PlaybackCommand, RoomSettings, DEFAULT_HOST_GRACE,
    DEFAULT_OUTBOX_CAPACITY,
};
pub use self::member_handle::MemberOutbox;
