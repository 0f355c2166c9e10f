use crate::driver::transport::SendError;
use std::io::ErrorKind as IoErrorKind;

/// Background task which a connection failed to reach.
#[derive(Debug)]
pub enum Recipient {
    AuxNetwork,
    Outbound,
    Sender,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Send(SendError),
}

impl Error {
    /// Whether this failure leaves the session unable to send any further audio.
    pub(crate) fn should_end_session(&self) -> bool {
        match self {
            Error::Send(e) => e.is_fatal(),
        }
    }

    // This prevents a `WouldBlock` from ending the session,
    // instead simply dropping the packet.
    pub(crate) fn disarm_would_block(self) -> Result<()> {
        match self {
            Self::Send(SendError::Io(i)) if i.kind() == IoErrorKind::WouldBlock => Ok(()),
            e => Err(e),
        }
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        Error::Send(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Error as IoError;

    #[test]
    fn would_block_is_disarmed() {
        let e = Error::from(SendError::Io(IoError::from(IoErrorKind::WouldBlock)));
        assert!(e.disarm_would_block().is_ok());

        let e = Error::from(SendError::SecretKeyUnavailable);
        assert!(e.disarm_would_block().is_err());
    }
}
