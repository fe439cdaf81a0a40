use std::time::Duration;

use comms::message::{JamMessage, PlaybackFrame};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{JamError, JamResult};

use super::{
    broadcast_hub::{BroadcastHub, Outbox},
    member_handle::MemberOutbox,
    member_registry::MemberRegistry,
    playback::Playback,
};

/// Default number of undelivered events a member may have before it is dropped
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;
/// Default time a host has to connect to the room it created
pub const DEFAULT_HOST_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
/// Policies shared by every room of a registry
pub struct RoomSettings {
    /// Capacity of each member's output queue
    pub outbox_capacity: usize,
    /// Maximum number of members, host included. `None` means unlimited
    pub max_members: Option<usize>,
    /// Time after creation within which the host must connect
    pub host_grace: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        RoomSettings {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_members: None,
            host_grace: DEFAULT_HOST_GRACE,
        }
    }
}

/// Playback mutations a member can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Play { position: u64 },
    Pause { position: u64 },
    Seek { position: u64 },
}

/// What a [JamRoom::leave] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The member left, the room stays active
    Left,
    /// The member left and the room closed
    Closed,
    /// The user was not a member, nothing changed
    NotAMember,
}

#[derive(Debug)]
/// [JamRoom] owns the authoritative playback state and the members of one listening session.
///
/// Every mutation goes through `&mut self`, the registry keeps each room behind
/// its own mutex so mutations of one room never interleave. Events are handed
/// to the [BroadcastHub] while that lock is held, which gives every member the
/// same order of events, and the hub never waits on a member.
pub struct JamRoom {
    id: String,
    host_id: String,
    playback: Playback,
    members: MemberRegistry,
    hub: BroadcastHub,
    settings: RoomSettings,
    created_at: Instant,
    last_activity: Instant,
    host_connected: bool,
    closed: bool,
}

impl JamRoom {
    /// A paused room with `host_id` as its sole member.
    ///
    /// The host is not bound to a connection until it joins.
    pub fn new(id: &str, host_id: &str, track_id: &str, position: u64, settings: RoomSettings) -> Self {
        let mut members = MemberRegistry::new();
        members.insert(host_id);
        let now = Instant::now();

        JamRoom {
            id: String::from(id),
            host_id: String::from(host_id),
            playback: Playback::new(track_id, position),
            members,
            hub: BroadcastHub::new(id),
            settings,
            created_at: now,
            last_activity: now,
            host_connected: false,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members currently bound to a live connection
    pub fn connection_count(&self) -> usize {
        self.hub.len()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.user_ids()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// The host never connected within the grace period after creation
    pub fn host_missed_grace(&self) -> bool {
        !self.host_connected && self.created_at.elapsed() >= self.settings.host_grace
    }

    /// The current authoritative state, as seen by `user_id`
    pub fn snapshot(&self, user_id: &str) -> PlaybackFrame {
        self.frame(user_id, self.playback.position(), self.playback.is_paused())
    }

    /// Bind `user_id` to a new output queue and greet it with a snapshot
    ///
    /// The snapshot is the first event in the returned queue, the other members
    /// get the same `join` event to learn about the newcomer.
    pub fn join(&mut self, user_id: &str) -> JamResult<MemberOutbox> {
        if self.closed {
            return Err(JamError::NotFound);
        }
        if self.hub.is_attached(user_id) {
            return Err(JamError::AlreadyJoined);
        }
        if !self.members.contains(user_id) {
            if let Some(max_members) = self.settings.max_members {
                if self.members.len() >= max_members {
                    return Err(JamError::RoomFull);
                }
            }
        }

        let (outbox, rx) = Outbox::channel(self.settings.outbox_capacity);
        let abandoned = outbox.abandoned_token();
        let snapshot = JamMessage::Join(self.snapshot(user_id));

        self.members.insert(user_id);
        let lagging = self.hub.publish(snapshot.clone());
        self.hub.attach(user_id, outbox);
        // a fresh queue always has room for its first event
        self.hub.send_to(user_id, snapshot);
        if user_id == self.host_id {
            self.host_connected = true;
        }
        self.touch();

        info!(
            room_id = %self.id,
            user_id,
            members = self.members.len(),
            "member joined room"
        );

        self.evict(lagging);

        Ok(MemberOutbox::new(&self.id, user_id, rx, abandoned))
    }

    /// Remove `user_id` from the room.
    ///
    /// The host leaving closes the room. Leaving twice has no effect.
    pub fn leave(&mut self, user_id: &str) -> LeaveOutcome {
        if self.closed || !self.members.contains(user_id) {
            return LeaveOutcome::NotAMember;
        }

        if user_id == self.host_id {
            info!(room_id = %self.id, user_id, "host left room");
            self.close();
            return LeaveOutcome::Closed;
        }

        if let Some(membership) = self.members.get(user_id) {
            debug!(
                room_id = %self.id,
                user_id,
                member_for_ms = membership.joined_at.elapsed().as_millis() as u64,
                "member leaving room"
            );
        }

        self.evict(vec![String::from(user_id)]);
        self.touch();

        if self.closed {
            LeaveOutcome::Closed
        } else {
            LeaveOutcome::Left
        }
    }

    /// Apply a playback command from `user_id` and broadcast the result.
    ///
    /// A rejected command leaves the room untouched.
    pub fn handle_command(&mut self, user_id: &str, command: PlaybackCommand) -> JamResult<()> {
        if self.closed {
            return Err(JamError::NotFound);
        }
        if !self.members.contains(user_id) {
            return Err(JamError::NotAMember);
        }

        let event = match command {
            PlaybackCommand::Play { position } => {
                self.playback.play(position);
                JamMessage::Play(self.frame(user_id, position, false))
            }
            PlaybackCommand::Pause { position } => {
                self.playback.pause(position);
                JamMessage::Pause(self.frame(user_id, position, true))
            }
            PlaybackCommand::Seek { position } => {
                self.playback.seek(position);
                JamMessage::Seek(self.frame(user_id, position, self.playback.is_paused()))
            }
        };

        debug!(room_id = %self.id, user_id, command = ?command, "applied playback command");

        let lagging = self.hub.publish(event);
        self.touch();
        self.evict(lagging);

        Ok(())
    }

    /// Tell every member the room is over and release them.
    ///
    /// The terminal event is a `leave` by the host. Closing twice has no effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        let terminal = JamMessage::Leave(self.snapshot(&self.host_id));
        // members that cannot take the terminal event are released all the same
        let _ = self.hub.publish(terminal);

        self.hub.clear();
        self.members.clear();
        self.closed = true;

        info!(
            room_id = %self.id,
            lifetime_secs = self.created_at.elapsed().as_secs(),
            "room closed"
        );
    }

    /// Remove members, announcing each departure to the remaining ones.
    ///
    /// Announcing may itself find more members that cannot keep up, those are
    /// removed in the same pass. The host being removed closes the room.
    fn evict(&mut self, mut pending: Vec<String>) {
        while let Some(user_id) = pending.pop() {
            if self.closed {
                return;
            }
            if !self.members.remove(&user_id) {
                continue;
            }
            if self.hub.detach(&user_id) {
                debug!(room_id = %self.id, user_id = %user_id, "released member queue");
            }

            if user_id == self.host_id {
                warn!(room_id = %self.id, user_id = %user_id, "host dropped from room");
                self.close();
                return;
            }
            if self.members.is_empty() {
                self.closed = true;
                return;
            }

            let departure = JamMessage::Leave(self.snapshot(&user_id));
            pending.extend(self.hub.publish(departure));
        }
    }

    fn frame(&self, user_id: &str, position: u64, paused: bool) -> PlaybackFrame {
        PlaybackFrame {
            track_id: String::from(self.playback.track_id()),
            position,
            paused,
            user_id: String::from(user_id),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
