//! Payloads carried in the `d` field of each voice gateway message.

#![allow(missing_docs)]

use super::SpeakingState;
use crate::id::{GuildId, UserId};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Opens a fresh session (opcode 0).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Identify {
    pub server_id: GuildId,
    pub session_id: String,
    pub token: String,
    pub user_id: UserId,
}

/// Tells the relay where to send audio, and how it is encrypted (opcode 1).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: ProtocolData,
}

/// Address, port and encryption mode chosen during protocol selection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProtocolData {
    pub address: IpAddr,
    pub mode: String,
    pub port: u16,
}

/// The relay's UDP endpoint and this client's SSRC (opcode 2).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: IpAddr,
    pub port: u16,
    /// Encryption modes offered by the relay.
    ///
    /// Older relays omit this list, in which case any mode is attempted.
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Keepalive sent by the client (opcode 3).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Heartbeat {
    pub nonce: u64,
}

/// Negotiated encryption mode and the session's secret key (opcode 4).
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

impl std::fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDescription")
            .field("mode", &self.mode)
            .field("secret_key", &"<secret>")
            .finish()
    }
}

/// Speaking state of a user, either ours or one echoed by the relay (opcode 5).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Speaking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    pub speaking: SpeakingState,
    pub ssrc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Acknowledgement of a heartbeat, echoing its nonce (opcode 6).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HeartbeatAck {
    pub nonce: u64,
}

/// Resumes a session after a dropped connection (opcode 7).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resume {
    pub server_id: GuildId,
    pub session_id: String,
    pub token: String,
}

/// First message of every connection, setting the heartbeat interval (opcode 8).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Hello {
    /// Interval between heartbeats, in milliseconds.
    pub heartbeat_interval: f64,
}

/// Another user left the call (opcode 13).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClientDisconnect {
    pub user_id: UserId,
}
