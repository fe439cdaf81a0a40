pub use self::room::{
    JamRoom, LeaveOutcome, MemberOutbox, PlaybackCommand, RoomSettings, DEFAULT_HOST_GRACE,
    DEFAULT_OUTBOX_CAPACITY,
};

pub use self::room_manager::RoomManager;

mod room;
#[allow(clippy::module_inception)]
mod room_manager;
