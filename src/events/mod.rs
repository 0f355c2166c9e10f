//! Lifecycle notifications emitted by a [`Driver`].
//!
//! Every driver owns one event channel, readable through [`Driver::events`].
//! Events are buffered until read, so a receiver which is never polled
//! will grow without bound; drop it if events are not needed.
//!
//! [`Driver`]: crate::Driver
//! [`Driver::events`]: crate::Driver::events

mod connect;
mod disconnect;

pub use self::{connect::*, disconnect::*};

/// A change in the state of a driver's voice session.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DriverEvent {
    /// A fresh session was established by [`Driver::connect`].
    ///
    /// [`Driver::connect`]: crate::Driver::connect
    Connect(ConnectData),
    /// A lost session was resumed, or replaced by a new one without user action.
    Reconnect(ConnectData),
    /// A session ended, or could not be started.
    Disconnect(DisconnectData),
}
