//! Connection errors and convenience types.

use crate::{
    driver::{
        codec::CodecError,
        tasks::{error::Recipient, message::*},
    },
    ws::Error as WsError,
};
use flume::SendError;
use std::{error::Error as StdError, fmt, io::Error as IoError};
use tokio::time::error::Elapsed;

/// Errors encountered while connecting to a voice relay over the driver.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The driver hung up an internal signaller, either due to another connection attempt
    /// or a crash.
    AttemptDiscarded,
    /// The Opus encoder could not be created with the driver's configuration.
    Codec(CodecError),
    /// The secret key sent by the relay was not a valid key.
    CryptoInvalidLength,
    /// Server did not return the expected crypto mode during negotiation.
    CryptoModeInvalid,
    /// Selected crypto mode was not offered by server.
    CryptoModeUnavailable,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
    /// The relay failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// The relay's `Hello` carried an unusable heartbeat interval.
    IllegalHello,
    /// Could not parse the relay's view of our IP.
    IllegalIp,
    /// Miscellaneous I/O error.
    Io(IoError),
    /// Failed to message other background tasks after connection establishment.
    InterconnectFailure(Recipient),
    /// Error communicating with gateway server over WebSocket.
    Ws(WsError),
    /// Connection attempt timed out.
    TimedOut,
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<SendError<WsMessage>> for Error {
    fn from(_e: SendError<WsMessage>) -> Error {
        Error::InterconnectFailure(Recipient::AuxNetwork)
    }
}

impl From<SendError<OutboundFrame>> for Error {
    fn from(_e: SendError<OutboundFrame>) -> Error {
        Error::InterconnectFailure(Recipient::Outbound)
    }
}

impl From<SendError<SenderMessage>> for Error {
    fn from(_e: SendError<SenderMessage>) -> Error {
        Error::InterconnectFailure(Recipient::Sender)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Error {
        Error::Ws(e)
    }
}

impl From<Elapsed> for Error {
    fn from(_e: Elapsed) -> Error {
        Error::TimedOut
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to voice relay: ")?;
        use Error::*;
        match self {
            AttemptDiscarded => write!(f, "connection attempt was aborted/discarded"),
            Codec(e) => e.fmt(f),
            CryptoInvalidLength => write!(f, "session key had an invalid length"),
            CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            CryptoModeUnavailable => write!(f, "server did not offer chosen encryption mode"),
            EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            IllegalDiscoveryResponse => write!(f, "IP discovery/NAT punching response was invalid"),
            IllegalHello => write!(f, "heartbeat interval was not a positive duration"),
            IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            Io(e) => e.fmt(f),
            InterconnectFailure(e) => write!(f, "failed to contact other task ({e:?})"),
            Ws(e) => write!(f, "websocket issue ({e})."),
            TimedOut => write!(f, "connection attempt timed out"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Codec(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Ws(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience type for voice relay connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
