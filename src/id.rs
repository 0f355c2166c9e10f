//! Newtypes around relay IDs.
//!
//! IDs travel over the voice gateway as decimal strings, but are accepted as
//! either strings or integers when received.

use serde::{
    de::{Error as DeError, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::fmt::{Display, Formatter, Result as FmtResult};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $Id {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$Id> for u64 {
            fn from(id: $Id) -> Self {
                id.0
            }
        }

        impl Serialize for $Id {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $Id {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(IdVisitor).map(Self)
            }
        }
    };
}

/// ID of a voice/text channel.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ChannelId(u64);

/// ID of a guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct GuildId(u64);

/// ID of a user.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct UserId(u64);

impl_id! {ChannelId}
impl_id! {GuildId}
impl_id! {UserId}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("a snowflake as a string or integer")
    }

    fn visit_u64<E: DeError>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: DeError>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom("snowflake was negative"))
    }

    fn visit_str<E: DeError>(self, v: &str) -> Result<u64, E> {
        v.parse().map_err(E::custom)
    }
}
