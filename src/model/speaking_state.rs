use serde::{Deserialize, Serialize};

/// Flags describing how a user is transmitting audio.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SpeakingState(u8);

impl SpeakingState {
    /// Normal transmission of voice audio.
    pub const MICROPHONE: Self = Self(1);
    /// Transmission of context audio for video, no speaking indicator.
    pub const SOUNDSHARE: Self = Self(1 << 1);
    /// Priority speaker, lowering audio of other speakers.
    pub const PRIORITY: Self = Self(1 << 2);

    /// Returns a state with no flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns whether every flag in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets or clears all flags in `other`.
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}
