use std::{collections::HashMap, sync::Arc, time::Duration};

use comms::message::PlaybackFrame;
use nanoid::nanoid;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    collaborators::TrackResolver,
    error::{JamError, JamResult},
};

use super::room::{JamRoom, LeaveOutcome, MemberOutbox, PlaybackCommand, RoomSettings};

type SharedRoom = Arc<Mutex<JamRoom>>;

/// [RoomManager] is the directory of live jam rooms.
///
/// Rooms are inserted fully built and removed as soon as they close, so a
/// lookup never returns a half constructed room. The map lock is only held
/// for lookups and inserts/removals, never while a room is being mutated.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, SharedRoom>>,
    track_resolver: Arc<dyn TrackResolver>,
    settings: RoomSettings,
}

impl RoomManager {
    pub fn new(track_resolver: Arc<dyn TrackResolver>, settings: RoomSettings) -> Self {
        RoomManager {
            rooms: RwLock::new(HashMap::new()),
            track_resolver,
            settings,
        }
    }

    /// Creates a paused room for `track_id` with `host_id` as its sole member
    #[instrument(skip(self))]
    pub async fn create_room(
        &self,
        host_id: &str,
        track_id: &str,
        start_position: u64,
    ) -> JamResult<String> {
        if track_id.trim().is_empty() {
            return Err(JamError::Validation(String::from("trackId must not be empty")));
        }

        match self.track_resolver.exists(track_id).await {
            Ok(true) => {}
            Ok(false) => return Err(JamError::TrackNotFound(String::from(track_id))),
            Err(e) => {
                warn!(error = %e, "catalog lookup failed");
                return Err(JamError::CatalogLookup(format!("{:#}", e)));
            }
        }

        let mut rooms = self.rooms.write().await;
        let room_id = loop {
            let candidate = nanoid!();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let room = JamRoom::new(
            &room_id,
            host_id,
            track_id,
            start_position,
            self.settings.clone(),
        );
        rooms.insert(room_id.clone(), Arc::new(Mutex::new(room)));

        info!(room_id = %room_id, rooms = rooms.len(), "room created");

        Ok(room_id)
    }

    pub async fn get_room(&self, room_id: &str) -> JamResult<SharedRoom> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or(JamError::NotFound)
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Joins `user_id` to a room, the returned outbox starts with the room snapshot
    pub async fn join_room(&self, room_id: &str, user_id: &str) -> JamResult<MemberOutbox> {
        self.with_room(room_id, |room| room.join(user_id)).await?
    }

    pub async fn handle_command(
        &self,
        room_id: &str,
        user_id: &str,
        command: PlaybackCommand,
    ) -> JamResult<()> {
        self.with_room(room_id, |room| room.handle_command(user_id, command))
            .await?
    }

    /// Removes `user_id` from a room. Leaving an unknown room, or leaving
    /// twice, has no effect.
    pub async fn leave(&self, room_id: &str, user_id: &str) -> LeaveOutcome {
        self.with_room(room_id, |room| room.leave(user_id))
            .await
            .unwrap_or(LeaveOutcome::NotAMember)
    }

    /// The current playback state of a room
    pub async fn snapshot(&self, room_id: &str) -> JamResult<PlaybackFrame> {
        self.with_room(room_id, |room| {
            let host_id = String::from(room.host_id());
            room.snapshot(&host_id)
        })
        .await
    }

    pub async fn member_count(&self, room_id: &str) -> JamResult<usize> {
        self.with_room(room_id, |room| room.member_count()).await
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Members bound to a live connection, across all rooms
    pub async fn connection_count(&self) -> usize {
        let mut connections = 0;
        for room in self.all_rooms().await {
            connections += room.lock().await.connection_count();
        }
        connections
    }

    /// Closes a room and forgets it. Removing an unknown room has no effect.
    pub async fn remove_room(&self, room_id: &str) {
        let removed = self.rooms.write().await.remove(room_id);

        if let Some(room) = removed {
            room.lock().await.close();
            info!(room_id, "room removed");
        }
    }

    /// Closes every room whose last activity is older than `idle_timeout`
    pub async fn close_idle_rooms(&self, idle_timeout: Duration) -> usize {
        self.close_rooms_where(|room| room.last_activity().elapsed() >= idle_timeout)
            .await
    }

    /// Closes every room whose host did not connect within the grace period
    pub async fn close_abandoned_rooms(&self) -> usize {
        self.close_rooms_where(JamRoom::host_missed_grace).await
    }

    /// Closes every room, used when the process shuts down
    pub async fn close_all(&self) {
        let rooms: Vec<SharedRoom> = self
            .rooms
            .write()
            .await
            .drain()
            .map(|(_, room)| room)
            .collect();

        for room in rooms {
            room.lock().await.close();
        }
    }

    /// Periodically close rooms nobody will come back to until `shutdown` is cancelled.
    ///
    /// Rooms whose host never connected are always reclaimed, idle rooms only
    /// when an `idle_timeout` is given.
    pub fn spawn_reaper(
        self: Arc<Self>,
        interval: Duration,
        idle_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let abandoned = self.close_abandoned_rooms().await;
                        if abandoned > 0 {
                            info!(closed = abandoned, "closed rooms whose host never connected");
                        }

                        if let Some(idle_timeout) = idle_timeout {
                            let idle = self.close_idle_rooms(idle_timeout).await;
                            if idle > 0 {
                                info!(closed = idle, "closed idle rooms");
                            }
                        }
                    }
                }
            }
        })
    }

    async fn close_rooms_where(&self, expired: impl Fn(&JamRoom) -> bool) -> usize {
        let mut closed = 0;
        for room in self.all_rooms().await {
            let room_id = {
                let mut room = room.lock().await;
                if room.is_closed() || !expired(&*room) {
                    continue;
                }
                room.close();
                String::from(room.id())
            };

            self.forget(&room_id, &room).await;
            closed += 1;
        }

        closed
    }

    /// Run `apply` against a room under its lock, and forget the room if
    /// `apply` closed it
    async fn with_room<T>(
        &self,
        room_id: &str,
        apply: impl FnOnce(&mut JamRoom) -> T,
    ) -> JamResult<T> {
        let room = self.get_room(room_id).await?;
        let (output, closed) = {
            let mut guard = room.lock().await;
            if guard.is_closed() {
                (None, true)
            } else {
                let output = apply(&mut guard);
                (Some(output), guard.is_closed())
            }
        };

        if closed {
            self.forget(room_id, &room).await;
        }

        output.ok_or(JamError::NotFound)
    }

    /// Drop a closed room from the map, unless the id has been taken over since
    async fn forget(&self, room_id: &str, room: &SharedRoom) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(room_id)
            .is_some_and(|current| Arc::ptr_eq(current, room))
        {
            rooms.remove(room_id);
            info!(room_id, rooms = rooms.len(), "room removed");
        }
    }

    async fn all_rooms(&self) -> Vec<SharedRoom> {
        self.rooms.read().await.values().cloned().collect()
    }
}
