use crate::{
    driver::connection::error::Error as ConnectionError,
    id::{ChannelId, GuildId},
    model::CloseCode as VoiceCloseCode,
    ws::Error as WsError,
    ConnectionInfo,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Session details gathered when a voice session ends or fails.
///
/// A failed reconnection is only reported once every retry has been spent.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct DisconnectData {
    /// Where in the session's life it was terminated.
    pub kind: DisconnectKind,
    /// The cause of any failure.
    ///
    /// `None` means the user asked to leave.
    pub reason: Option<DisconnectReason>,
    /// ID of the voice channel, if it was supplied when connecting.
    pub channel_id: Option<ChannelId>,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session.
    pub session_id: String,
}

impl DisconnectData {
    pub(crate) fn new(
        kind: DisconnectKind,
        reason: Option<DisconnectReason>,
        info: &ConnectionInfo,
    ) -> Self {
        Self {
            kind,
            reason,
            channel_id: info.channel_id,
            guild_id: info.guild_id,
            session_id: info.session_id.clone(),
        }
    }
}

/// Where in a voice session's life it was terminated.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DisconnectKind {
    /// The driver failed to establish a new session.
    Connect,
    /// The driver lost a session, and could neither resume it nor start another.
    Reconnect,
    /// A live session ended, either by request or because the relay ended it.
    Runtime,
}

/// Why a voice session failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The attempt was abandoned in favour of another request.
    AttemptDiscarded,
    /// An encoder or internal task failed.
    Internal,
    /// A host I/O error, which is likely transient.
    Io,
    /// The relay and client disagreed on the protocol.
    ProtocolViolation,
    /// The session was not established, or stopped responding, within the allowed time.
    TimedOut,
    /// The relay closed the control connection, with a voice close code if one was given.
    WsClosed(Option<VoiceCloseCode>),
}

impl From<&ConnectionError> for DisconnectReason {
    fn from(e: &ConnectionError) -> Self {
        use ConnectionError::*;

        match e {
            AttemptDiscarded => Self::AttemptDiscarded,
            CryptoInvalidLength
            | CryptoModeInvalid
            | CryptoModeUnavailable
            | EndpointUrl
            | IllegalDiscoveryResponse
            | IllegalHello
            | IllegalIp => Self::ProtocolViolation,
            Io(_) => Self::Io,
            Codec(_) | InterconnectFailure(_) => Self::Internal,
            Ws(ws) => ws.into(),
            TimedOut => Self::TimedOut,
        }
    }
}

impl From<&WsError> for DisconnectReason {
    fn from(e: &WsError) -> Self {
        match e {
            WsError::Json(_) | WsError::UnexpectedBinaryMessage(_) => Self::ProtocolViolation,
            WsError::WsClosed(Some(frame)) => Self::WsClosed(match frame.code {
                CloseCode::Library(l) => VoiceCloseCode::from_u16(l),
                _ => None,
            }),
            WsError::WsClosed(None) | WsError::Ws(_) => Self::WsClosed(None),
        }
    }
}
