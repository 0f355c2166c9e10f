//! Owned-handle bindings to the libopus encoder.
//!
//! [`OpusEncoder`] wraps the raw `OpusEncoder*` exposed by `audiopus_sys`, and frees it
//! exactly once when dropped. Parameters use the plain enums from `audiopus`.

use audiopus::{Application, Bitrate, Channels, SampleRate, Signal};
use audiopus_sys as ffi;
use std::{
    error::Error as StdError,
    fmt,
    os::raw::c_int,
    ptr::NonNull,
};

const OPUS_OK: c_int = 0;
const OPUS_AUTO: i32 = -1000;
const OPUS_BITRATE_MAX: i32 = -1;

const OPUS_SET_BITRATE_REQUEST: c_int = 4002;
const OPUS_SET_INBAND_FEC_REQUEST: c_int = 4012;
const OPUS_SET_PACKET_LOSS_PERC_REQUEST: c_int = 4014;
const OPUS_SET_SIGNAL_REQUEST: c_int = 4024;

/// Failure reported by libopus, or a misuse caught before calling into it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CodecError {
    /// `opus_encoder_create` refused the given configuration.
    Create(ErrorCode),
    /// A parameter change was rejected by `opus_encoder_ctl`.
    Ctl(ErrorCode),
    /// Encoding a frame failed.
    Encode(ErrorCode),
    /// The input did not hold a whole number of samples per channel.
    BadSampleCount {
        /// Number of interleaved samples supplied.
        samples: usize,
        /// Channel count of the encoder.
        channels: usize,
    },
    /// A packet loss percentage above 100 was requested.
    BadPacketLoss(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opus encoder failure: ")?;
        match self {
            Self::Create(e) => write!(f, "could not create encoder ({e})"),
            Self::Ctl(e) => write!(f, "could not set parameter ({e})"),
            Self::Encode(e) => write!(f, "could not encode frame ({e})"),
            Self::BadSampleCount { samples, channels } => write!(
                f,
                "{samples} samples cannot be split evenly over {channels} channels"
            ),
            Self::BadPacketLoss(p) => write!(f, "packet loss of {p}% is out of range"),
        }
    }
}

impl StdError for CodecError {}

/// Convenience type for encoder error handling.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Raw error codes returned by libopus.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorCode(pub i32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self.0 {
            -1 => "bad argument",
            -2 => "buffer too small",
            -3 => "internal error",
            -4 => "invalid packet",
            -5 => "unimplemented",
            -6 => "invalid state",
            -7 => "allocation failure",
            _ => "unknown error",
        };

        write!(f, "{desc}, code {}", self.0)
    }
}

/// Tunable encoder parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum EncoderParam {
    /// Target bitrate of encoded audio.
    Bitrate(Bitrate),
    /// Hint as to whether audio is speech or music.
    Signal(Signal),
    /// Whether to embed forward-error-correction data for the previous frame.
    InbandFec(bool),
    /// Expected packet loss percentage, used to tune FEC. Must lie in `0..=100`.
    PacketLossPercent(u8),
}

/// An owned libopus encoder.
///
/// This is `Send`, but not `Sync`: libopus encoders carry per-stream state and must
/// only be driven from one thread at a time.
#[derive(Debug)]
pub struct OpusEncoder {
    ptr: NonNull<ffi::OpusEncoder>,
    channels: usize,
}

// SAFETY: libopus encoder state has no thread affinity, and `&mut self` is
// required for every call which touches it.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    /// Creates a new encoder.
    pub fn new(sample_rate: SampleRate, channels: Channels, application: Application) -> Result<Self> {
        let channel_count = match channels {
            Channels::Mono => 1,
            _ => 2,
        };

        let mut err: c_int = OPUS_OK;
        // SAFETY: all arguments are plain integers and `err` outlives the call.
        let raw = unsafe {
            ffi::opus_encoder_create(
                sample_rate as i32,
                channel_count as c_int,
                application as c_int,
                &mut err,
            )
        };

        if err != OPUS_OK {
            if let Some(ptr) = NonNull::new(raw) {
                // SAFETY: a non-null handle came from `opus_encoder_create` and is not reused.
                unsafe { ffi::opus_encoder_destroy(ptr.as_ptr()) };
            }
            return Err(CodecError::Create(ErrorCode(err)));
        }

        NonNull::new(raw)
            .map(|ptr| Self {
                ptr,
                channels: channel_count,
            })
            .ok_or(CodecError::Create(ErrorCode(-7)))
    }

    /// Returns the number of interleaved channels this encoder expects.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Changes an encoder parameter.
    pub fn set(&mut self, param: EncoderParam) -> Result<()> {
        let (request, value) = match param {
            EncoderParam::Bitrate(b) => (OPUS_SET_BITRATE_REQUEST, bitrate_to_raw(b)),
            EncoderParam::Signal(s) => (OPUS_SET_SIGNAL_REQUEST, signal_to_raw(s)),
            EncoderParam::InbandFec(on) => (OPUS_SET_INBAND_FEC_REQUEST, i32::from(on)),
            EncoderParam::PacketLossPercent(p) if p <= 100 =>
                (OPUS_SET_PACKET_LOSS_PERC_REQUEST, i32::from(p)),
            EncoderParam::PacketLossPercent(p) => return Err(CodecError::BadPacketLoss(p)),
        };

        // SAFETY: each request above takes exactly one `opus_int32` argument.
        let code = unsafe { ffi::opus_encoder_ctl(self.ptr.as_ptr(), request, value) };

        if code == OPUS_OK {
            Ok(())
        } else {
            Err(CodecError::Ctl(ErrorCode(code)))
        }
    }

    /// Encodes one frame of interleaved `i16` PCM into `output`, returning the
    /// length of the Opus packet written.
    pub fn encode(&mut self, input: &[i16], output: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size(input.len())?;

        // SAFETY: `input` holds `frame_size * channels` samples and `output`
        // is valid for `output.len()` bytes.
        let len = unsafe {
            ffi::opus_encode(
                self.ptr.as_ptr(),
                input.as_ptr(),
                frame_size,
                output.as_mut_ptr(),
                output_len(output),
            )
        };

        encode_result(len)
    }

    /// Encodes one frame of interleaved `f32` PCM into `output`, returning the
    /// length of the Opus packet written.
    pub fn encode_float(&mut self, input: &[f32], output: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size(input.len())?;

        // SAFETY: as in `encode`.
        let len = unsafe {
            ffi::opus_encode_float(
                self.ptr.as_ptr(),
                input.as_ptr(),
                frame_size,
                output.as_mut_ptr(),
                output_len(output),
            )
        };

        encode_result(len)
    }

    fn frame_size(&self, samples: usize) -> Result<c_int> {
        if samples % self.channels == 0 {
            Ok((samples / self.channels) as c_int)
        } else {
            Err(CodecError::BadSampleCount {
                samples,
                channels: self.channels,
            })
        }
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        // SAFETY: the handle is owned by this value and never handed out.
        unsafe { ffi::opus_encoder_destroy(self.ptr.as_ptr()) };
    }
}

fn output_len(output: &[u8]) -> i32 {
    i32::try_from(output.len()).unwrap_or(i32::MAX)
}

fn encode_result(len: i32) -> Result<usize> {
    usize::try_from(len).map_err(|_| CodecError::Encode(ErrorCode(len)))
}

fn bitrate_to_raw(bitrate: Bitrate) -> i32 {
    match bitrate {
        Bitrate::BitsPerSecond(b) => b,
        Bitrate::Max => OPUS_BITRATE_MAX,
        Bitrate::Auto => OPUS_AUTO,
    }
}

fn signal_to_raw(signal: Signal) -> i32 {
    signal as i32
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{MONO_FRAME_SIZE, OPUS_MAX_FRAME_SIZE, SAMPLE_RATE, STEREO_FRAME_SIZE};

    fn stereo() -> OpusEncoder {
        OpusEncoder::new(SAMPLE_RATE, Channels::Stereo, Application::Audio).unwrap()
    }

    #[test]
    fn encodes_float_and_int_frames() {
        let mut enc = stereo();
        let mut out = [0u8; OPUS_MAX_FRAME_SIZE];

        let tone: Vec<f32> = (0..STEREO_FRAME_SIZE)
            .map(|i| ((i / 2) as f32 * 0.05).sin() * 0.5)
            .collect();
        let len = enc.encode_float(&tone, &mut out).unwrap();
        assert!(len > 0 && len <= OPUS_MAX_FRAME_SIZE);

        let silence = [0i16; STEREO_FRAME_SIZE];
        let len = enc.encode(&silence, &mut out).unwrap();
        assert!(len > 0 && len <= OPUS_MAX_FRAME_SIZE);
    }

    #[test]
    fn mono_encoder_takes_one_channel() {
        let mut enc = OpusEncoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip).unwrap();
        let mut out = [0u8; OPUS_MAX_FRAME_SIZE];

        assert_eq!(enc.channels(), 1);
        assert!(enc.encode(&[0i16; MONO_FRAME_SIZE], &mut out).is_ok());
    }

    #[test]
    fn odd_sample_counts_are_rejected() {
        let mut enc = stereo();
        let mut out = [0u8; OPUS_MAX_FRAME_SIZE];

        assert_eq!(
            enc.encode(&[0i16; 3], &mut out),
            Err(CodecError::BadSampleCount {
                samples: 3,
                channels: 2
            })
        );
    }

    #[test]
    fn illegal_frame_sizes_surface_opus_errors() {
        let mut enc = stereo();
        let mut out = [0u8; OPUS_MAX_FRAME_SIZE];

        // 7 samples per channel is not a legal Opus frame duration.
        assert!(matches!(
            enc.encode(&[0i16; 14], &mut out),
            Err(CodecError::Encode(_))
        ));
    }

    #[test]
    fn parameters_apply() {
        let mut enc = stereo();

        enc.set(EncoderParam::Bitrate(Bitrate::BitsPerSecond(64_000)))
            .unwrap();
        enc.set(EncoderParam::Bitrate(Bitrate::Max)).unwrap();
        enc.set(EncoderParam::Signal(Signal::Voice)).unwrap();
        enc.set(EncoderParam::InbandFec(true)).unwrap();
        enc.set(EncoderParam::PacketLossPercent(10)).unwrap();

        assert_eq!(
            enc.set(EncoderParam::PacketLossPercent(101)),
            Err(CodecError::BadPacketLoss(101))
        );
    }
}
