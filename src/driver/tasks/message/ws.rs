#![allow(missing_docs)]

use crate::model::Event;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Signals to a session's receive loop.
#[derive(Debug)]
pub enum WsMessage {
    Speaking(bool),
    HeartbeatMissed,
}

/// Frames queued for the single task owning the socket's write half.
#[derive(Debug)]
pub enum OutboundFrame {
    Json(Event),
    Close(CloseCode),
}
