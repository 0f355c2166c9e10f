//! Message types and opcodes spoken over the voice gateway's control plane.
//!
//! Every frame is a JSON object of the form `{"op": <opcode>, "d": <payload>}`.

mod close_code;
mod opcode;
pub mod payload;
mod speaking_state;

pub use self::{close_code::CloseCode, opcode::OpCode, speaking_state::SpeakingState};

use payload::*;
use serde::{
    de::Error as DeError,
    ser::SerializeStruct,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use serde_json::Value;

/// A control-plane message, sent or received over the voice gateway.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Ready(Ready),
    Heartbeat(Heartbeat),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    HeartbeatAck(HeartbeatAck),
    Resume(Resume),
    Hello(Hello),
    Resumed,
    ClientDisconnect(ClientDisconnect),
}

impl Event {
    /// Returns the opcode used to frame this message.
    #[must_use]
    pub fn kind(&self) -> OpCode {
        use Event::*;
        match self {
            Identify(_) => OpCode::Identify,
            SelectProtocol(_) => OpCode::SelectProtocol,
            Ready(_) => OpCode::Ready,
            Heartbeat(_) => OpCode::Heartbeat,
            SessionDescription(_) => OpCode::SessionDescription,
            Speaking(_) => OpCode::Speaking,
            HeartbeatAck(_) => OpCode::HeartbeatAck,
            Resume(_) => OpCode::Resume,
            Hello(_) => OpCode::Hello,
            Resumed => OpCode::Resumed,
            ClientDisconnect(_) => OpCode::ClientDisconnect,
        }
    }
}

macro_rules! impl_from_payload {
    ($($Payload:ident),*) => {
        $(
            impl From<$Payload> for Event {
                fn from(p: $Payload) -> Self {
                    Event::$Payload(p)
                }
            }
        )*
    };
}

impl_from_payload!(
    Identify,
    SelectProtocol,
    Ready,
    Heartbeat,
    SessionDescription,
    Speaking,
    HeartbeatAck,
    Resume,
    Hello,
    ClientDisconnect
);

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Event", 2)?;
        s.serialize_field("op", &(self.kind() as u8))?;

        use Event::*;
        match self {
            Identify(d) => s.serialize_field("d", d)?,
            SelectProtocol(d) => s.serialize_field("d", d)?,
            Ready(d) => s.serialize_field("d", d)?,
            Heartbeat(d) => s.serialize_field("d", d)?,
            SessionDescription(d) => s.serialize_field("d", d)?,
            Speaking(d) => s.serialize_field("d", d)?,
            HeartbeatAck(d) => s.serialize_field("d", d)?,
            Resume(d) => s.serialize_field("d", d)?,
            Hello(d) => s.serialize_field("d", d)?,
            Resumed => s.serialize_field("d", &Value::Null)?,
            ClientDisconnect(d) => s.serialize_field("d", d)?,
        }

        s.end()
    }
}

#[derive(Deserialize)]
struct RawEvent {
    op: u8,
    #[serde(default)]
    d: Value,
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let RawEvent { op, d } = RawEvent::deserialize(deserializer)?;
        let kind = OpCode::from_u8(op)
            .ok_or_else(|| DeError::custom(format_args!("unknown voice opcode {op}")))?;

        let out = match kind {
            OpCode::Identify => serde_json::from_value(d).map(Event::Identify),
            OpCode::SelectProtocol => serde_json::from_value(d).map(Event::SelectProtocol),
            OpCode::Ready => serde_json::from_value(d).map(Event::Ready),
            OpCode::Heartbeat => serde_json::from_value(d).map(Event::Heartbeat),
            OpCode::SessionDescription =>
                serde_json::from_value(d).map(Event::SessionDescription),
            OpCode::Speaking => serde_json::from_value(d).map(Event::Speaking),
            OpCode::HeartbeatAck => serde_json::from_value(d).map(Event::HeartbeatAck),
            OpCode::Resume => serde_json::from_value(d).map(Event::Resume),
            OpCode::Hello => serde_json::from_value(d).map(Event::Hello),
            OpCode::Resumed => Ok(Event::Resumed),
            OpCode::ClientDisconnect => serde_json::from_value(d).map(Event::ClientDisconnect),
        };

        out.map_err(DeError::custom)
    }
}
