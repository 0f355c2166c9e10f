/// Close codes sent by the voice gateway when it terminates a connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CloseCode {
    /// An invalid opcode was sent.
    UnknownOpcode = 4001,
    /// A payload could not be decoded.
    FailedToDecodePayload = 4002,
    /// A payload was sent before identifying.
    NotAuthenticated = 4003,
    /// The token sent in `Identify` was incorrect.
    AuthenticationFailed = 4004,
    /// More than one `Identify` was sent.
    AlreadyAuthenticated = 4005,
    /// The session is no longer valid.
    SessionInvalid = 4006,
    /// The session has timed out.
    SessionTimeout = 4009,
    /// The relay for this call could not be found.
    ServerNotFound = 4011,
    /// The relay did not recognise the selected protocol.
    UnknownProtocol = 4012,
    /// This client was removed from the call (kicked, channel deleted, or similar).
    Disconnected = 4014,
    /// The relay crashed.
    VoiceServerCrash = 4015,
    /// The relay did not recognise the selected encryption mode.
    UnknownEncryptionMode = 4016,
}

impl CloseCode {
    /// Maps a raw WebSocket close code onto a known voice close code.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        use CloseCode::*;
        Some(match code {
            4001 => UnknownOpcode,
            4002 => FailedToDecodePayload,
            4003 => NotAuthenticated,
            4004 => AuthenticationFailed,
            4005 => AlreadyAuthenticated,
            4006 => SessionInvalid,
            4009 => SessionTimeout,
            4011 => ServerNotFound,
            4012 => UnknownProtocol,
            4014 => Disconnected,
            4015 => VoiceServerCrash,
            4016 => UnknownEncryptionMode,
            _ => return None,
        })
    }

    /// Indicates whether a session closed with this code may be resumed.
    ///
    /// All other codes invalidate the session, which must then be torn down.
    #[must_use]
    pub fn should_resume(self) -> bool {
        matches!(
            self,
            Self::UnknownOpcode | Self::FailedToDecodePayload | Self::VoiceServerCrash
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_transient_codes_resume() {
        assert!(CloseCode::from_u16(4015).unwrap().should_resume());
        assert!(!CloseCode::from_u16(4014).unwrap().should_resume());
        assert!(!CloseCode::from_u16(4006).unwrap().should_resume());
        assert_eq!(CloseCode::from_u16(1000), None);
    }
}
