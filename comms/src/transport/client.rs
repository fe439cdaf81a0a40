use anyhow::Context;
use futures_util::{stream::SplitSink, SinkExt};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_tungstenite::{
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::message::JamMessage;

use super::common::BoxedStream;

type JamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [EventStream] is a stream of [crate::message::JamMessage]s broadcast by the jam room
///
/// The stream ends when the server closes the connection.
///
/// # Cancel Safety
///
/// This stream is cancel-safe, meaning that it can be used in [tokio::select!]
/// without the risk of missing events.
pub type EventStream = BoxedStream<anyhow::Result<JamMessage>>;

/// [CommandWriter] is a wrapper around the write half of a WebSocket which writes
/// [crate::message::JamMessage] commands to the jam room
pub struct CommandWriter {
    writer: SplitSink<JamSocket, Message>,
}

impl CommandWriter {
    fn new(writer: SplitSink<JamSocket, Message>) -> Self {
        Self { writer }
    }

    /// Send a [crate::message::JamMessage] to the jam room
    ///
    /// # Cancel Safety
    ///
    /// This method is not cancellation safe. If it is used as the event
    /// in a [tokio::select!] statement and some other branch completes first,
    /// the frame may or may not have been handed to the socket.
    pub async fn write(&mut self, message: &JamMessage) -> anyhow::Result<()> {
        self.write_raw(&message.to_frame()?).await
    }

    /// Send an arbitrary text frame, bypassing serialization
    pub async fn write_raw(&mut self, frame: &str) -> anyhow::Result<()> {
        self.writer
            .send(Message::text(frame.to_owned()))
            .await
            .context("could not write frame to the server")
    }

    /// Start the closing handshake, the server treats this as leaving the room
    pub async fn close(&mut self) -> anyhow::Result<()> {
        self.writer
            .close()
            .await
            .context("could not close the connection")
    }
}

/// Connects to a jam room as `user_id` and splits the connection into a stream of events and a command writer.
///
/// # Arguments
///
/// - `url` - The room url, e.g. `ws://localhost:8080/jam/{roomId}`
/// - `user_id` - The identity presented in the [crate::USER_ID_HEADER] header
pub async fn connect(url: &str, user_id: &str) -> anyhow::Result<(EventStream, CommandWriter)> {
    connect_with_header(url, crate::USER_ID_HEADER, user_id).await
}

/// Same as [connect] but presents the identity in a custom header
pub async fn connect_with_header(
    url: &str,
    header: &str,
    user_id: &str,
) -> anyhow::Result<(EventStream, CommandWriter)> {
    let mut request = url
        .into_client_request()
        .context("invalid jam room url")?;
    request.headers_mut().insert(
        HeaderName::from_bytes(header.as_bytes()).context("invalid identity header name")?,
        HeaderValue::from_str(user_id).context("invalid user id")?,
    );

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("could not connect to the jam room")?;
    let (writer, reader) = futures_util::StreamExt::split(socket);

    Ok((
        Box::pin(
            reader
                .take_while(|frame| !matches!(frame, Ok(Message::Close(_))))
                .filter_map(|frame| match frame {
                    Ok(Message::Text(text)) => Some(JamMessage::from_frame(text.as_str())),
                    Ok(_) => None,
                    Err(e) => {
                        Some(Err(anyhow::Error::new(e).context("could not read frame from the server")))
                    }
                }),
        ),
        CommandWriter::new(writer),
    ))
}
