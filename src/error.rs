//! Driver, transport, and playback error handling.

pub use crate::{
    driver::{
        codec::CodecError,
        connection::error::{Error as ConnectionError, Result as ConnectionResult},
        transport::SendError,
    },
    input::BufferError,
    ws::Error as WsError,
};
