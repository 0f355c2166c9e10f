#![allow(missing_docs)]

use crate::{
    driver::connection::error::Error,
    events::DisconnectReason,
    input::ring::RingReader,
    ConnectionInfo,
};
use audiopus::Bitrate;
use flume::Sender;

pub enum CoreMessage {
    ConnectWithResult(ConnectionInfo, Sender<Result<(), Error>>),
    Disconnect,
    SetTrack(Option<RingReader>),
    SetBitrate(Bitrate),
    Mute(bool),
    Speaking(bool),
    /// A live session was lost in a way which may be resumed.
    Reconnect(usize),
    /// A live session ended for good.
    SignalWsClosure(usize, Option<DisconnectReason>),
    /// The frame sender can no longer encode or encrypt audio.
    SenderFailed,
    Poison,
}
