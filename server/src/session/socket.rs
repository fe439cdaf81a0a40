use std::pin::Pin;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use comms::message::JamMessage;
use futures_util::{stream::SplitSink, SinkExt};
use tokio_stream::{Stream, StreamExt};

use crate::error::{JamError, JamResult};

pub(super) type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// [CommandStream] is a stream of [comms::message::JamMessage]s sent by the client
///
/// Frames that cannot be decoded come out as [JamError::Validation]. The
/// stream ends when the client closes the connection or the socket fails.
///
/// # Cancel Safety
///
/// This stream is cancel-safe, meaning that it can be used in [tokio::select!]
/// without the risk of missing commands.
pub(super) type CommandStream = BoxedStream<JamResult<JamMessage>>;

/// [EventWriter] is a wrapper around the write half of a WebSocket which
/// writes [comms::message::JamMessage]s to the client
pub(super) struct EventWriter {
    writer: SplitSink<WebSocket, Message>,
}

impl EventWriter {
    fn new(writer: SplitSink<WebSocket, Message>) -> Self {
        Self { writer }
    }

    /// Send a [comms::message::JamMessage] as a text frame
    ///
    /// # Cancel Safety
    ///
    /// This method is not cancellation safe. If it is used as the event
    /// in a [tokio::select!] statement and some other branch completes first,
    /// the frame may or may not have been handed to the socket, and the
    /// writer must not be used again.
    pub async fn write(&mut self, event: &JamMessage) -> JamResult<()> {
        let frame = event
            .to_frame()
            .map_err(|e| JamError::Transport(format!("{:#}", e)))?;
        self.writer
            .send(Message::text(frame))
            .await
            .map_err(|e| JamError::Transport(e.to_string()))
    }

    /// Send a close frame and shut the write half down
    pub async fn close(&mut self, code: u16, reason: &str) -> JamResult<()> {
        self.writer
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_owned().into(),
            })))
            .await
            .map_err(|e| JamError::Transport(e.to_string()))?;
        self.writer
            .close()
            .await
            .map_err(|e| JamError::Transport(e.to_string()))
    }
}

/// Splits an upgraded WebSocket into a stream of decoded commands and an event writer.
///
/// # Arguments
///
/// - `socket` - An upgraded [WebSocket] to split
pub(super) fn split_socket(socket: WebSocket) -> (CommandStream, EventWriter) {
    let (writer, reader) = futures_util::StreamExt::split(socket);

    (
        Box::pin(
            reader
                .take_while(|frame| !matches!(frame, Ok(Message::Close(_)) | Err(_)))
                .filter_map(|frame| match frame {
                    Ok(Message::Text(text)) => Some(
                        JamMessage::from_frame(text.as_str())
                            .map_err(|e| JamError::Validation(format!("{:#}", e))),
                    ),
                    Ok(Message::Binary(_)) => Some(Err(JamError::Validation(String::from(
                        "binary frames are not supported",
                    )))),
                    // ping/pong are answered by the socket itself
                    _ => None,
                }),
        ),
        EventWriter::new(writer),
    )
}
