#![allow(missing_docs)]

use super::WsMessage;
use crate::{driver::transport::TransportConnection, input::ring::RingReader};
use audiopus::Bitrate;
use flume::Sender;

pub enum SenderMessage {
    SetTrack(Option<RingReader>),

    SetBitrate(Bitrate),
    SetMute(bool),

    SetConn(TransportConnection),
    Ws(Option<Sender<WsMessage>>),
    DropConn,

    Poison,
}
