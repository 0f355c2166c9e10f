//! Constants affecting driver function and API handling.

use audiopus::{Bitrate, SampleRate};
use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Sample rate of audio to be sent to the relay.
pub const SAMPLE_RATE: SampleRate = SampleRate::Hz48000;

/// Sample rate of audio to be sent to the relay.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Default bitrate for audio.
pub const DEFAULT_BITRATE: Bitrate = Bitrate::BitsPerSecond(128_000);

/// Number of samples in one complete frame of audio per channel.
///
/// This is equally the number of stereo (joint) samples in an audio frame.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of individual samples in one complete frame of stereo audio.
pub const STEREO_FRAME_SIZE: usize = 2 * MONO_FRAME_SIZE;

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Largest Opus frame which libopus will ever produce for one packet.
pub const OPUS_MAX_FRAME_SIZE: usize = 1276;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Size of the fixed RTP header written in front of every voice packet.
pub const RTP_HEADER_LEN: usize = 12;

/// First byte of every RTP header: version 2, no padding, no extension, no CSRCs.
pub const RTP_VERSION_BYTE: u8 = 0x80;

/// Payload type used by the relay's Opus audio traffic.
pub const RTP_PROFILE_TYPE: u8 = 0x78;

/// Size of both an IP discovery request and its response.
pub const IP_DISCOVERY_LEN: usize = 70;

/// Opus silent frame, used to signal speech end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Number of silent frames sent once a source runs dry, before the sender idles.
pub const DEFAULT_SILENCE_FRAMES: u8 = 5;

/// Default capacity of a playback's ring buffer, in frames of stereo `f32` audio.
///
/// One second of audio.
pub const RING_BUFFER_FRAMES: usize = AUDIO_FRAME_RATE;

/// Default delay between polls when a fill loop finds its ring buffer full.
pub const FILL_POLL_INTERVAL: Duration = Duration::from_millis(5);
