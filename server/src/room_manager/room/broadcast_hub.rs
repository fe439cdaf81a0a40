//! Event fan-out from a room to the output queues of its connected members.

use std::{collections::HashMap, sync::Arc};

use comms::message::JamMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sending half of a member's bounded output queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Arc<JamMessage>>,
    abandoned: CancellationToken,
}

impl Outbox {
    /// Create an output queue holding at most `capacity` undelivered events
    pub fn channel(capacity: usize) -> (Outbox, mpsc::Receiver<Arc<JamMessage>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        (
            Outbox {
                tx,
                abandoned: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Cancelled once the member is given up on for not keeping up
    pub fn abandoned_token(&self) -> CancellationToken {
        self.abandoned.clone()
    }

    /// Enqueue without waiting.
    ///
    /// Returns `false` if the queue is full or its receiver is gone.
    pub fn send(&self, message: Arc<JamMessage>) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

/// [BroadcastHub] fans room events out to every attached member.
///
/// Publishing never waits on a member: a full queue means the member is not
/// keeping up, and it is reported back so the room can drop it.
#[derive(Debug)]
pub struct BroadcastHub {
    room_id: String,
    outboxes: HashMap<String, Outbox>,
}

impl BroadcastHub {
    pub fn new(room_id: &str) -> Self {
        BroadcastHub {
            room_id: String::from(room_id),
            outboxes: HashMap::new(),
        }
    }

    /// Bind `user_id` to an output queue, replacing any previous one
    pub fn attach(&mut self, user_id: &str, outbox: Outbox) {
        self.outboxes.insert(String::from(user_id), outbox);
    }

    /// Unbind `user_id`, dropping the sender closes the member's queue
    pub fn detach(&mut self, user_id: &str) -> bool {
        self.outboxes.remove(user_id).is_some()
    }

    pub fn is_attached(&self, user_id: &str) -> bool {
        self.outboxes.contains_key(user_id)
    }

    /// Number of attached members
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    /// Detach every member
    pub fn clear(&mut self) {
        self.outboxes.clear();
    }

    /// Send `event` to a single member, returns false if it could not be enqueued
    pub fn send_to(&self, user_id: &str, event: JamMessage) -> bool {
        self.outboxes
            .get(user_id)
            .is_some_and(|outbox| outbox.send(Arc::new(event)))
    }

    /// Enqueue `event` on every attached member's queue.
    ///
    /// # Returns
    ///
    /// The user ids whose queue was full or closed. They did not receive the
    /// event and must be treated as disconnected.
    pub fn publish(&self, event: JamMessage) -> Vec<String> {
        let kind = event.kind();
        let event = Arc::new(event);
        let mut lagging = Vec::new();

        for (user_id, outbox) in &self.outboxes {
            if !outbox.send(event.clone()) {
                outbox.abandoned.cancel();
                warn!(room_id = %self.room_id, user_id = %user_id, event_type = kind, "member queue full or closed");
                lagging.push(user_id.clone());
            }
        }

        debug!(
            room_id = %self.room_id,
            event_type = kind,
            recipients = self.outboxes.len() - lagging.len(),
            "broadcast event to room"
        );

        lagging
    }
}
