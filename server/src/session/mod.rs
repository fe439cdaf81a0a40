use std::{sync::Arc, time::Duration};

use axum::extract::ws::{close_code, WebSocket};
use comms::message::JamMessage;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::JamError,
    room_manager::{MemberOutbox, PlaybackCommand, RoomManager},
};

use self::socket::{CommandStream, EventWriter};

mod socket;

/// Error frames waiting to be sent back to the member that caused them
const REPLY_CAPACITY: usize = 8;
/// How long a client gets to take its last frames before the connection is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How a member's inbound flow ended
enum InboundEnd {
    /// The member left, the connection closed or the room went away
    Finished,
    /// The client sent something that could not be decoded
    Malformed(JamError),
}

/// Bridges one upgraded WebSocket to a jam room until either side goes away.
///
/// The member joins the room, gets the room snapshot as its first frame, and
/// from then on commands flow in while room events flow out. Whichever flow
/// ends first tears the other one down, and the member leaves the room
/// exactly once after both have stopped. A client that stops reading never
/// holds the session open: pending writes give way to teardown, and the
/// closing handshake is bounded by [CLOSE_TIMEOUT].
pub async fn handle_jam_session(
    room_manager: Arc<RoomManager>,
    socket: WebSocket,
    room_id: String,
    user_id: String,
    shutdown: CancellationToken,
) {
    let (commands, mut event_writer) = socket::split_socket(socket);

    let mut outbox = match room_manager.join_room(&room_id, &user_id).await {
        Ok(outbox) => outbox,
        Err(e) => {
            info!(room_id = %room_id, user_id = %user_id, error = %e, "join rejected");
            let rejection = e.to_message(&user_id);
            finish(event_writer, Some(rejection), close_code::POLICY, e.code()).await;
            return;
        }
    };

    info!(room_id = %room_id, user_id = %user_id, "member connected");

    // the join snapshot is always the first frame of a connection
    let Some(snapshot) = outbox.recv().await else {
        room_manager.leave(&room_id, &user_id).await;
        finish(event_writer, None, close_code::NORMAL, "").await;
        return;
    };
    let abandoned = outbox.abandoned();
    let greeted = tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = abandoned.cancelled() => false,
        written = event_writer.write(&snapshot) => written.is_ok(),
    };
    if !greeted {
        room_manager.leave(&room_id, &user_id).await;
        debug!(room_id = %room_id, user_id = %user_id, "snapshot not delivered");
        return;
    }

    let teardown = shutdown.child_token();
    let (reply_tx, reply_rx) = mpsc::channel::<JamMessage>(REPLY_CAPACITY);

    let inbound = tokio::spawn(inbound_flow(
        room_manager.clone(),
        commands,
        reply_tx,
        room_id.clone(),
        user_id.clone(),
        teardown.clone(),
    ));
    let outbound = tokio::spawn(outbound_flow(
        outbox,
        reply_rx,
        event_writer,
        teardown.clone(),
    ));

    let (inbound_end, event_writer) = tokio::join!(inbound, outbound);

    let outcome = room_manager.leave(&room_id, &user_id).await;
    info!(room_id = %room_id, user_id = %user_id, outcome = ?outcome, "member disconnected");

    let event_writer = match event_writer {
        Ok(Some(event_writer)) => event_writer,
        Ok(None) => {
            debug!(room_id = %room_id, user_id = %user_id, "connection dropped without closing");
            return;
        }
        Err(_) => {
            warn!(room_id = %room_id, user_id = %user_id, "outbound flow panicked");
            return;
        }
    };

    match inbound_end {
        Ok(InboundEnd::Malformed(e)) => {
            let rejection = e.to_message(&user_id);
            finish(event_writer, Some(rejection), close_code::INVALID, e.code()).await;
        }
        _ if shutdown.is_cancelled() => {
            finish(event_writer, None, close_code::AWAY, "server shutting down").await;
        }
        _ => finish(event_writer, None, close_code::NORMAL, "").await,
    }
}

/// Send an optional last frame followed by a close frame, giving up after [CLOSE_TIMEOUT]
async fn finish(
    mut event_writer: EventWriter,
    last: Option<JamMessage>,
    code: u16,
    reason: &str,
) {
    let closing = async {
        if let Some(last) = &last {
            event_writer.write(last).await?;
        }
        event_writer.close(code, reason).await
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "could not close connection"),
        Err(_) => debug!("client did not take the close frame in time"),
    }
}

/// Apply the member's commands to the room until the member leaves, the
/// connection ends or `teardown` is cancelled
async fn inbound_flow(
    room_manager: Arc<RoomManager>,
    mut commands: CommandStream,
    replies: mpsc::Sender<JamMessage>,
    room_id: String,
    user_id: String,
    teardown: CancellationToken,
) -> InboundEnd {
    let _guard = teardown.clone().drop_guard();

    loop {
        let command = tokio::select! {
            _ = teardown.cancelled() => return InboundEnd::Finished,
            command = commands.next() => command,
        };

        let message = match command {
            None => return InboundEnd::Finished,
            Some(Err(e)) => {
                warn!(room_id = %room_id, user_id = %user_id, error = %e, "could not decode client frame");
                return InboundEnd::Malformed(e);
            }
            Some(Ok(message)) => message,
        };

        let command = match message {
            JamMessage::Play(frame) => PlaybackCommand::Play {
                position: frame.position,
            },
            JamMessage::Pause(frame) => PlaybackCommand::Pause {
                position: frame.position,
            },
            JamMessage::Seek(frame) => PlaybackCommand::Seek {
                position: frame.position,
            },
            JamMessage::Leave(_) => return InboundEnd::Finished,
            JamMessage::Join(_) | JamMessage::Error(_) => {
                let e = JamError::Validation(String::from(
                    "only play, pause, seek and leave are accepted",
                ));
                reply(&replies, &room_id, &user_id, e);
                continue;
            }
        };

        match room_manager
            .handle_command(&room_id, &user_id, command)
            .await
        {
            Ok(()) => {}
            Err(JamError::NotFound) => return InboundEnd::Finished,
            Err(e) => reply(&replies, &room_id, &user_id, e),
        }
    }
}

/// Write room events and error replies to the client until the member's
/// queue closes, a write fails or `teardown` is cancelled.
///
/// The writer is handed back for the closing handshake, or `None` when a
/// write was interrupted and the socket can no longer be used.
async fn outbound_flow(
    mut outbox: MemberOutbox,
    mut replies: mpsc::Receiver<JamMessage>,
    mut event_writer: EventWriter,
    teardown: CancellationToken,
) -> Option<EventWriter> {
    let _guard = teardown.clone().drop_guard();
    let abandoned = outbox.abandoned();

    loop {
        let event = tokio::select! {
            _ = teardown.cancelled() => break,
            _ = abandoned.cancelled() => break,
            event = outbox.recv() => match event {
                Some(event) => event,
                // room closed or the member was dropped
                None => break,
            },
            Some(reply) = replies.recv() => Arc::new(reply),
        };

        let written = tokio::select! {
            _ = teardown.cancelled() => return None,
            // the room dropped this member while the client was not reading
            _ = abandoned.cancelled() => return None,
            written = event_writer.write(&event) => written,
        };
        if let Err(e) = written {
            debug!(
                room_id = outbox.room_id(),
                user_id = outbox.user_id(),
                error = %e,
                "could not write to client"
            );
            return None;
        }
    }

    Some(event_writer)
}

fn reply(replies: &mpsc::Sender<JamMessage>, room_id: &str, user_id: &str, error: JamError) {
    debug!(room_id = %room_id, user_id = %user_id, error = %error, "command rejected");
    // a client that does not read its errors loses some of them
    let _ = replies.try_send(error.to_message(user_id));
}
