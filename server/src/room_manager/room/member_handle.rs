use std::sync::Arc;

use comms::message::JamMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
/// [MemberOutbox] is the receiving end of a member's output queue.
///
/// It is created when a user joins a room and is handed out to the connection
/// serving that user. The queue closes once the member leaves, is dropped for
/// being too slow, or the room closes.
pub struct MemberOutbox {
    room_id: String,
    user_id: String,
    rx: mpsc::Receiver<Arc<JamMessage>>,
    abandoned: CancellationToken,
}

impl MemberOutbox {
    pub(super) fn new(
        room_id: &str,
        user_id: &str,
        rx: mpsc::Receiver<Arc<JamMessage>>,
        abandoned: CancellationToken,
    ) -> Self {
        MemberOutbox {
            room_id: String::from(room_id),
            user_id: String::from(user_id),
            rx,
            abandoned,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Wait for the next event, `None` once the queue is closed and drained
    pub async fn recv(&mut self) -> Option<Arc<JamMessage>> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Arc<JamMessage>> {
        self.rx.try_recv().ok()
    }

    /// Cancelled once the room gave up on this member for not keeping up.
    ///
    /// Events still queued at that point will never be read.
    pub fn abandoned(&self) -> CancellationToken {
        self.abandoned.clone()
    }
}
