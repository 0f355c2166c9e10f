use crate::{
    constants::*,
    driver::{retry::Retry, CryptoMode, MixMode, SampleFormat},
};
use audiopus::{Bitrate, Signal};
use derivative::Derivative;
use std::time::Duration;

/// Configuration for a [`Driver`], its sessions, and its playback buffers.
///
/// Encoder settings are read when the driver starts, and session settings
/// whenever a connection is attempted.
///
/// [`Driver`]: crate::Driver
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// Selected tagging mode for voice packet encryption.
    ///
    /// Defaults to [`CryptoMode::Lite`].
    ///
    /// The relay must list this mode in its `Ready` message, if it lists any.
    pub crypto_mode: CryptoMode,

    /// Whether the driver encodes and sends stereo or mono Opus data.
    ///
    /// Defaults to [`MixMode::Stereo`].
    pub mix_mode: MixMode,

    /// Layout of the raw PCM which sources supply.
    ///
    /// Defaults to [`SampleFormat::F32`], matching [`ffmpeg`].
    ///
    /// [`ffmpeg`]: crate::input::ffmpeg
    pub sample_format: SampleFormat,

    /// Target bitrate of the Opus encoder.
    ///
    /// Defaults to 128kbps.
    pub bitrate: Bitrate,

    /// Hint to the encoder about the kind of audio being sent.
    ///
    /// Defaults to [`Signal::Auto`].
    #[derivative(Debug = "ignore")]
    pub signal: Signal,

    /// Whether the encoder embeds forward error correction data in each frame.
    ///
    /// Defaults to `false`.
    pub inband_fec: bool,

    /// Expected packet loss, as a percentage, used to tune forward error correction.
    ///
    /// Defaults to `0`.
    pub packet_loss_percent: u8,

    /// Time to wait for a session to become ready, covering the handshake and
    /// IP discovery.
    ///
    /// Defaults to 10 seconds. If set to `None`, connections will never time out.
    pub driver_timeout: Option<Duration>,

    /// Time to wait for the relay to answer IP discovery.
    ///
    /// Defaults to 5 seconds.
    pub discovery_timeout: Duration,

    /// How lost sessions are resumed.
    ///
    /// Defaults to five resume attempts with exponential backoff, followed by
    /// a fresh identify.
    pub driver_retry: Retry,

    /// Size in bytes of the ring buffer created for each playback.
    ///
    /// Defaults to one second of stereo `f32` audio. Values smaller than one frame
    /// are raised to one frame.
    pub ring_buffer_capacity: usize,

    /// Number of bytes the fill loop reads from a source at a time.
    ///
    /// Defaults to one frame of stereo `f32` audio.
    pub fill_chunk_size: usize,

    /// How long the fill loop waits before checking again for space in a full buffer.
    ///
    /// Defaults to 5ms.
    pub fill_poll_interval: Duration,

    /// Number of silent frames sent after audio stops, before the speaking
    /// state is cleared.
    ///
    /// Defaults to `5`.
    pub silence_frames: u8,

    #[cfg(test)]
    /// Connects over plaintext `ws://`, for loopback relays.
    pub(crate) plaintext_ws: bool,
}

/// Bytes in one frame of stereo `f32` audio.
const DEFAULT_FRAME_BYTES: usize = STEREO_FRAME_SIZE * std::mem::size_of::<f32>();

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto_mode: CryptoMode::Lite,
            mix_mode: MixMode::Stereo,
            sample_format: SampleFormat::F32,
            bitrate: DEFAULT_BITRATE,
            signal: Signal::Auto,
            inband_fec: false,
            packet_loss_percent: 0,
            driver_timeout: Some(Duration::from_secs(10)),
            discovery_timeout: Duration::from_secs(5),
            driver_retry: Retry::default(),
            ring_buffer_capacity: RING_BUFFER_FRAMES * DEFAULT_FRAME_BYTES,
            fill_chunk_size: DEFAULT_FRAME_BYTES,
            fill_poll_interval: FILL_POLL_INTERVAL,
            silence_frames: DEFAULT_SILENCE_FRAMES,
            #[cfg(test)]
            plaintext_ws: false,
        }
    }
}

impl Config {
    /// Sets this `Config`'s chosen cryptographic tagging scheme.
    #[must_use]
    pub fn crypto_mode(mut self, crypto_mode: CryptoMode) -> Self {
        self.crypto_mode = crypto_mode;
        self
    }

    /// Sets this `Config`'s channel count.
    #[must_use]
    pub fn mix_mode(mut self, mix_mode: MixMode) -> Self {
        self.mix_mode = mix_mode;
        self
    }

    /// Sets this `Config`'s expected PCM layout.
    #[must_use]
    pub fn sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    /// Sets this `Config`'s initial encoder bitrate.
    #[must_use]
    pub fn bitrate(mut self, bitrate: Bitrate) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Sets this `Config`'s encoder signal hint.
    #[must_use]
    pub fn signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    /// Sets whether this `Config` enables in-band FEC.
    #[must_use]
    pub fn inband_fec(mut self, inband_fec: bool) -> Self {
        self.inband_fec = inband_fec;
        self
    }

    /// Sets this `Config`'s expected packet loss percentage.
    #[must_use]
    pub fn packet_loss_percent(mut self, packet_loss_percent: u8) -> Self {
        self.packet_loss_percent = packet_loss_percent;
        self
    }

    /// Sets this `Config`'s timeout for establishing a voice connection.
    #[must_use]
    pub fn driver_timeout(mut self, driver_timeout: Option<Duration>) -> Self {
        self.driver_timeout = driver_timeout;
        self
    }

    /// Sets this `Config`'s timeout for IP discovery.
    #[must_use]
    pub fn discovery_timeout(mut self, discovery_timeout: Duration) -> Self {
        self.discovery_timeout = discovery_timeout;
        self
    }

    /// Sets this `Config`'s resume policy.
    #[must_use]
    pub fn driver_retry(mut self, driver_retry: Retry) -> Self {
        self.driver_retry = driver_retry;
        self
    }

    /// Sets this `Config`'s per-playback buffer size, in bytes.
    #[must_use]
    pub fn ring_buffer_capacity(mut self, ring_buffer_capacity: usize) -> Self {
        self.ring_buffer_capacity = ring_buffer_capacity;
        self
    }

    /// Sets this `Config`'s source read size, in bytes.
    #[must_use]
    pub fn fill_chunk_size(mut self, fill_chunk_size: usize) -> Self {
        self.fill_chunk_size = fill_chunk_size;
        self
    }

    /// Sets this `Config`'s full-buffer polling interval.
    #[must_use]
    pub fn fill_poll_interval(mut self, fill_poll_interval: Duration) -> Self {
        self.fill_poll_interval = fill_poll_interval;
        self
    }

    /// Sets this `Config`'s trailing silence length, in frames.
    #[must_use]
    pub fn silence_frames(mut self, silence_frames: u8) -> Self {
        self.silence_frames = silence_frames;
        self
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub(crate) fn plaintext_ws(mut self, plaintext_ws: bool) -> Self {
        self.plaintext_ws = plaintext_ws;
        self
    }
}
