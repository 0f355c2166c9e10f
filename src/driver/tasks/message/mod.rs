#![allow(missing_docs)]

mod core;
mod sender;
mod ws;

pub use self::{core::*, sender::*, ws::*};

use crate::events::DriverEvent;
use flume::Sender;

#[derive(Clone, Debug)]
pub struct Interconnect {
    pub core: Sender<CoreMessage>,
    pub events: Sender<DriverEvent>,
    pub sender: Sender<SenderMessage>,
}

impl Interconnect {
    pub fn fire(&self, event: DriverEvent) {
        // Listeners are optional: nobody may be holding the receiver.
        drop(self.events.send(event));
    }

    pub fn poison_all(&self) {
        drop(self.sender.send(SenderMessage::Poison));
    }
}
