use audiopus::Channels;

use crate::constants::{MONO_FRAME_SIZE, STEREO_FRAME_SIZE};

/// Channel layout of the PCM frames read from a playback and sent as Opus.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MixMode {
    /// Sources produce, and the relay receives, a single channel.
    Mono,
    /// Sources produce interleaved left/right samples.
    Stereo,
}

impl MixMode {
    pub(crate) const fn to_opus(self) -> Channels {
        use MixMode::*;
        match self {
            Mono => Channels::Mono,
            Stereo => Channels::Stereo,
        }
    }

    /// Returns the number of interleaved samples in one 20ms frame.
    #[must_use]
    pub const fn sample_count_in_frame(self) -> usize {
        use MixMode::*;
        match self {
            Mono => MONO_FRAME_SIZE,
            Stereo => STEREO_FRAME_SIZE,
        }
    }

    /// Returns the number of interleaved channels.
    #[must_use]
    pub const fn channels(self) -> usize {
        use MixMode::*;
        match self {
            Mono => 1,
            Stereo => 2,
        }
    }
}
