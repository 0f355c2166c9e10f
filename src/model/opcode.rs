/// Operation codes framing each voice gateway message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum OpCode {
    /// Client opens a new session.
    Identify = 0,
    /// Client selects the voice transport and encryption mode.
    SelectProtocol = 1,
    /// Relay completes the handshake with the client's SSRC and UDP endpoint.
    Ready = 2,
    /// Client keepalive.
    Heartbeat = 3,
    /// Relay describes the session's encryption.
    SessionDescription = 4,
    /// Speaking state of a user.
    Speaking = 5,
    /// Relay acknowledges a heartbeat.
    HeartbeatAck = 6,
    /// Client resumes a dropped session.
    Resume = 7,
    /// Relay greets a new connection.
    Hello = 8,
    /// Relay confirms a resumed session.
    Resumed = 9,
    /// Another user disconnected from the call.
    ClientDisconnect = 13,
}

impl OpCode {
    /// Maps a raw opcode onto a known message type.
    #[must_use]
    pub fn from_u8(op: u8) -> Option<Self> {
        use OpCode::*;
        Some(match op {
            0 => Identify,
            1 => SelectProtocol,
            2 => Ready,
            3 => Heartbeat,
            4 => SessionDescription,
            5 => Speaking,
            6 => HeartbeatAck,
            7 => Resume,
            8 => Hello,
            9 => Resumed,
            13 => ClientDisconnect,
            _ => return None,
        })
    }
}
