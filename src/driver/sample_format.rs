use super::MixMode;

/// Encoding of the raw little-endian PCM bytes supplied by a playback's source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SampleFormat {
    /// Signed 16-bit integer samples (`s16le`).
    I16,
    /// 32-bit float samples in `[-1.0, 1.0]` (`f32le`).
    F32,
}

impl SampleFormat {
    /// Returns the size of one sample, in bytes.
    #[must_use]
    pub const fn sample_size(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }

    /// Returns the number of raw bytes making up one frame in the given layout.
    #[must_use]
    pub const fn frame_len(self, mix_mode: MixMode) -> usize {
        mix_mode.sample_count_in_frame() * self.sample_size()
    }

    /// Returns the name `ffmpeg` uses for this raw format.
    pub(crate) const fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::I16 => "s16le",
            Self::F32 => "f32le",
        }
    }
}
