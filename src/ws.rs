use crate::model::Event;

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig as Config},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, instrument};
use url::Url;

type Inner = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsStream(Inner);

impl WsStream {
    #[instrument(skip(url))]
    pub(crate) async fn connect(url: &Url) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(Config {
                max_message_size: None,
                max_frame_size: None,
                ..Default::default()
            }),
            true,
        )
        .await?;

        Ok(Self(stream))
    }

    /// Splits the stream so that one task may own each direction.
    pub(crate) fn split(self) -> (WsSink, WsReader) {
        let (tx, rx) = self.0.split();

        (WsSink(tx), WsReader(rx))
    }
}

/// Write half of a voice gateway connection.
pub struct WsSink(SplitSink<Inner, Message>);

impl WsSink {
    pub(crate) async fn send_json(&mut self, value: &Event) -> Result<()> {
        let text = serde_json::to_string(value)?;

        Ok(self.0.send(Message::Text(text)).await?)
    }

    pub(crate) async fn close(&mut self, code: CloseCode) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: "".into(),
        };

        Ok(self.0.send(Message::Close(Some(frame))).await?)
    }
}

/// Read half of a voice gateway connection.
pub struct WsReader(SplitStream<Inner>);

impl WsReader {
    /// Receives the next gateway event.
    ///
    /// `Ok(None)` is returned for frames which carry no event, including any
    /// text which fails to parse.
    pub(crate) async fn recv_json(&mut self) -> Result<Option<Event>> {
        match self.0.next().await {
            Some(Ok(msg)) => convert_ws_message(msg),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::WsClosed(None)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
#[non_exhaustive]
/// Errors encountered on the voice gateway's WebSocket.
pub enum Error {
    /// An outbound event could not be serialised.
    Json(JsonError),

    /// The voice gateway does not support or offer compression.
    /// As a result, only text messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    /// The underlying socket failed.
    Ws(TungsteniteError),

    /// The socket was closed, by a close frame if one was received.
    WsClosed(Option<CloseFrame<'static>>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "bad JSON payload ({e})"),
            Self::UnexpectedBinaryMessage(b) => write!(f, "unexpected {}B binary frame", b.len()),
            Self::Ws(e) => write!(f, "websocket error ({e})"),
            Self::WsClosed(Some(frame)) => write!(f, "websocket closed ({})", frame.code),
            Self::WsClosed(None) => write!(f, "websocket closed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Ws(e) => Some(e),
            _ => None,
        }
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        match e {
            TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed =>
                Error::WsClosed(None),
            e => Error::Ws(e),
        }
    }
}

#[inline]
pub(crate) fn convert_ws_message(message: Message) -> Result<Option<Event>> {
    Ok(match message {
        Message::Text(payload) => serde_json::from_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                e
            })
            .ok(),
        Message::Binary(bytes) => {
            return Err(Error::UnexpectedBinaryMessage(bytes));
        },
        Message::Close(frame) => {
            return Err(Error::WsClosed(frame));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::payload::HeartbeatAck;

    #[test]
    fn text_frames_parse_to_events() {
        let msg = Message::Text(r#"{"op":6,"d":1234}"#.into());

        assert!(matches!(
            convert_ws_message(msg),
            Ok(Some(Event::HeartbeatAck(HeartbeatAck { nonce: 1234 })))
        ));
    }

    #[test]
    fn malformed_text_is_dropped() {
        let msg = Message::Text("{not json".into());
        assert!(matches!(convert_ws_message(msg), Ok(None)));
    }

    #[test]
    fn close_and_binary_frames_are_errors() {
        let frame = CloseFrame {
            code: CloseCode::Library(4006),
            reason: "".into(),
        };

        assert!(matches!(
            convert_ws_message(Message::Close(Some(frame))),
            Err(Error::WsClosed(Some(f))) if f.code == CloseCode::Library(4006)
        ));
        assert!(matches!(
            convert_ws_message(Message::Binary(vec![1, 2])),
            Err(Error::UnexpectedBinaryMessage(_))
        ));
    }
}
