//! Conversion of raw PCM frames into encrypted RTP packets on the voice UDP socket.

use super::{
    codec::{CodecError, EncoderParam, OpusEncoder},
    crypto::{CryptoMode, CryptoState, TAG_SIZE},
    MixMode,
    SampleFormat,
};
use crate::{constants::*, Config};
use byteorder::{ByteOrder, LittleEndian, NetworkEndian};
use derivative::Derivative;
use rand::random;
use std::{
    error::Error as StdError,
    fmt,
    io::Error as IoError,
    net::UdpSocket,
    num::Wrapping,
};
use xsalsa20poly1305::{aead::Error as CryptoError, XSalsa20Poly1305 as Cipher};

/// Keying material and destination of an established voice session.
///
/// A transport holds at most one of these at a time, installed once the
/// relay has described its encryption.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TransportConnection {
    #[derivative(Debug = "ignore")]
    cipher: Cipher,
    mode: CryptoMode,
    ssrc: u32,
    udp: UdpSocket,
}

impl TransportConnection {
    /// Bundles a session's cipher, negotiated mode, and SSRC with a UDP socket
    /// connected to the relay.
    #[must_use]
    pub fn new(cipher: Cipher, mode: CryptoMode, ssrc: u32, udp: UdpSocket) -> Self {
        Self {
            cipher,
            mode,
            ssrc,
            udp,
        }
    }

    /// Returns the SSRC written into every packet.
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
}

/// Errors encountered while sending a single voice frame.
#[derive(Debug)]
#[non_exhaustive]
pub enum SendError {
    /// No session description has been received, so there is no key to encrypt with.
    SecretKeyUnavailable,
    /// The supplied PCM did not match the configured frame length.
    FrameLength {
        /// Number of bytes in one configured frame.
        expected: usize,
        /// Number of bytes supplied.
        got: usize,
    },
    /// An Opus frame was too large to fit in one packet.
    FrameTooLarge(usize),
    /// The encoder rejected the frame.
    Codec(CodecError),
    /// Encryption of the packet failed.
    Crypto(CryptoError),
    /// The UDP socket refused the packet.
    Io(IoError),
}

impl SendError {
    /// Indicates whether this error should end the session, rather than drop one frame.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::Crypto(_))
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send voice packet: ")?;
        match self {
            Self::SecretKeyUnavailable => write!(f, "no session key has been negotiated"),
            Self::FrameLength { expected, got } =>
                write!(f, "frame held {got} bytes, expected {expected}"),
            Self::FrameTooLarge(len) => write!(f, "opus frame of {len}B exceeds packet space"),
            Self::Codec(e) => e.fmt(f),
            Self::Crypto(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl StdError for SendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for SendError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<CryptoError> for SendError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<IoError> for SendError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

/// Convenience type for packet send error handling.
pub type Result<T> = std::result::Result<T, SendError>;

/// Encoder, encryption state, and RTP counters for one outbound audio stream.
///
/// The sequence number and timestamp start at random values each time a new
/// connection is installed, and persist for as long as that connection does.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct VoiceTransport {
    conn: Option<(TransportConnection, CryptoState)>,
    encoder: OpusEncoder,
    mix_mode: MixMode,
    sample_format: SampleFormat,
    #[derivative(Debug = "ignore")]
    packet: Box<[u8; VOICE_PACKET_MAX]>,
    #[derivative(Debug = "ignore")]
    pcm_i16: Vec<i16>,
    #[derivative(Debug = "ignore")]
    pcm_f32: Vec<f32>,
    sequence: Wrapping<u16>,
    timestamp: Wrapping<u32>,
}

impl VoiceTransport {
    /// Creates a disconnected transport, with an encoder tuned per `config`.
    pub fn new(config: &Config) -> std::result::Result<Self, CodecError> {
        let mut encoder = OpusEncoder::new(
            SAMPLE_RATE,
            config.mix_mode.to_opus(),
            audiopus::Application::Audio,
        )?;

        encoder.set(EncoderParam::Bitrate(config.bitrate))?;
        encoder.set(EncoderParam::Signal(config.signal))?;
        encoder.set(EncoderParam::InbandFec(config.inband_fec))?;
        encoder.set(EncoderParam::PacketLossPercent(config.packet_loss_percent))?;

        let samples = config.mix_mode.sample_count_in_frame();

        Ok(Self {
            conn: None,
            encoder,
            mix_mode: config.mix_mode,
            sample_format: config.sample_format,
            packet: Box::new([0u8; VOICE_PACKET_MAX]),
            pcm_i16: vec![0; samples],
            pcm_f32: vec![0.0; samples],
            sequence: Wrapping(random()),
            timestamp: Wrapping(random()),
        })
    }

    /// Installs a new session, restarting the RTP counters from random values.
    pub fn set_connection(&mut self, conn: TransportConnection) {
        self.sequence = Wrapping(random());
        self.timestamp = Wrapping(random());

        let state = CryptoState::new(conn.mode);
        self.conn = Some((conn, state));
    }

    /// Removes the active session, if any.
    pub fn drop_connection(&mut self) {
        self.conn = None;
    }

    /// Returns whether a session key and destination are installed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns the sequence number which the next packet will carry.
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence.0
    }

    /// Returns the timestamp which the next packet will carry.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp.0
    }

    /// Returns the number of raw PCM bytes expected by [`send_pcm_frame`].
    ///
    /// [`send_pcm_frame`]: Self::send_pcm_frame
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.sample_format.frame_len(self.mix_mode)
    }

    /// Changes a parameter of the underlying encoder.
    pub fn set_encoder_param(&mut self, param: EncoderParam) -> std::result::Result<(), CodecError> {
        self.encoder.set(param)
    }

    /// Encodes, encrypts, and sends one frame of raw little-endian PCM.
    ///
    /// Fails without touching the network if no session key is installed.
    pub fn send_pcm_frame(&mut self, raw: &[u8]) -> Result<()> {
        let Some((conn, _)) = &self.conn else {
            return Err(SendError::SecretKeyUnavailable);
        };

        let expected = self.frame_len();
        if raw.len() != expected {
            return Err(SendError::FrameLength {
                expected,
                got: raw.len(),
            });
        }

        let start = RTP_HEADER_LEN + TAG_SIZE;
        let end = (start + OPUS_MAX_FRAME_SIZE).min(VOICE_PACKET_MAX - conn.mode.payload_suffix_len());
        let samples = self.mix_mode.sample_count_in_frame();

        let opus_len = match self.sample_format {
            SampleFormat::I16 => {
                LittleEndian::read_i16_into(raw, &mut self.pcm_i16[..samples]);
                self.encoder
                    .encode(&self.pcm_i16[..samples], &mut self.packet[start..end])?
            },
            SampleFormat::F32 => {
                LittleEndian::read_f32_into(raw, &mut self.pcm_f32[..samples]);
                self.encoder
                    .encode_float(&self.pcm_f32[..samples], &mut self.packet[start..end])?
            },
        };

        self.finish_packet(opus_len)
    }

    /// Encrypts and sends one pre-encoded Opus frame.
    pub fn send_opus_frame(&mut self, opus: &[u8]) -> Result<()> {
        let Some((conn, _)) = &self.conn else {
            return Err(SendError::SecretKeyUnavailable);
        };

        let start = RTP_HEADER_LEN + TAG_SIZE;
        if start + opus.len() + conn.mode.payload_suffix_len() > VOICE_PACKET_MAX {
            return Err(SendError::FrameTooLarge(opus.len()));
        }

        self.packet[start..start + opus.len()].copy_from_slice(opus);

        self.finish_packet(opus.len())
    }

    /// Writes the RTP header and nonce around an encoded payload, then encrypts and
    /// transmits the packet.
    fn finish_packet(&mut self, opus_len: usize) -> Result<()> {
        let (conn, crypto_state) = self
            .conn
            .as_mut()
            .ok_or(SendError::SecretKeyUnavailable)?;
        let packet = &mut self.packet[..];

        packet[0] = RTP_VERSION_BYTE;
        packet[1] = RTP_PROFILE_TYPE;
        NetworkEndian::write_u16(&mut packet[2..4], self.sequence.0);
        NetworkEndian::write_u32(&mut packet[4..8], self.timestamp.0);
        NetworkEndian::write_u32(&mut packet[8..12], conn.ssrc);

        let payload_end = RTP_HEADER_LEN + TAG_SIZE + opus_len;
        let packet_end = crypto_state.write_packet_nonce(packet, payload_end);

        let sent = crypto_state
            .kind()
            .encrypt_in_place(&mut packet[..packet_end], &conn.cipher)
            .map_err(SendError::from)
            .and_then(|()| conn.udp.send(&packet[..packet_end]).map_err(SendError::from));

        self.sequence += Wrapping(1);
        self.timestamp += Wrapping(MONO_FRAME_SIZE as u32);

        sent.map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::crypto::KEY_SIZE;
    use std::time::Duration;
    use xsalsa20poly1305::aead::KeyInit;

    const KEY: [u8; KEY_SIZE] = [42u8; KEY_SIZE];

    fn loopback(mode: CryptoMode, ssrc: u32) -> (TransportConnection, UdpSocket) {
        let relay = UdpSocket::bind("127.0.0.1:0").unwrap();
        relay
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        udp.connect(relay.local_addr().unwrap()).unwrap();
        let cipher = Cipher::new_from_slice(&KEY).unwrap();

        (TransportConnection::new(cipher, mode, ssrc, udp), relay)
    }

    fn recv(relay: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; VOICE_PACKET_MAX];
        let len = relay.recv(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    fn seq(pkt: &[u8]) -> u16 {
        NetworkEndian::read_u16(&pkt[2..4])
    }

    fn ts(pkt: &[u8]) -> u32 {
        NetworkEndian::read_u32(&pkt[4..8])
    }

    #[test]
    fn pcm_before_session_description_is_refused() {
        let mut transport = VoiceTransport::new(&Config::default()).unwrap();
        let frame = vec![0u8; transport.frame_len()];

        assert!(matches!(
            transport.send_pcm_frame(&frame),
            Err(SendError::SecretKeyUnavailable)
        ));
        assert!(matches!(
            transport.send_opus_frame(&SILENT_FRAME),
            Err(SendError::SecretKeyUnavailable)
        ));
    }

    #[test]
    fn packets_carry_rtp_header_and_advance_counters() {
        let mut transport = VoiceTransport::new(&Config::default()).unwrap();
        let (conn, relay) = loopback(CryptoMode::Lite, 0x0102_0304);
        transport.set_connection(conn);

        let frame = vec![0u8; transport.frame_len()];
        let first_seq = transport.sequence();

        let mut pkts = vec![];
        for _ in 0..4 {
            transport.send_pcm_frame(&frame).unwrap();
            pkts.push(recv(&relay));
        }

        for pkt in &pkts {
            assert_eq!(pkt[0], 0x80);
            assert_eq!(pkt[1], 0x78);
            assert_eq!(&pkt[8..12], &[1, 2, 3, 4]);

            // Lite nonce is the sequence number at offset 2.
            assert_eq!(&pkt[pkt.len() - 4..pkt.len() - 2], &[0, 0]);
            assert_eq!(&pkt[pkt.len() - 2..], &pkt[2..4]);
        }

        assert_eq!(seq(&pkts[0]), first_seq);
        for pair in pkts.windows(2) {
            assert_eq!(seq(&pair[1]).wrapping_sub(seq(&pair[0])), 1);
            assert_eq!(
                ts(&pair[1]).wrapping_sub(ts(&pair[0])),
                MONO_FRAME_SIZE as u32
            );
        }
    }

    #[test]
    fn packets_decrypt_to_opus() {
        let config = Config::default().sample_format(SampleFormat::I16);
        let mut transport = VoiceTransport::new(&config).unwrap();

        for mode in [CryptoMode::Normal, CryptoMode::Suffix, CryptoMode::Lite] {
            let (conn, relay) = loopback(mode, 9);
            transport.set_connection(conn);

            transport.send_opus_frame(&SILENT_FRAME).unwrap();
            let mut pkt = recv(&relay);
            assert_eq!(
                pkt.len(),
                RTP_HEADER_LEN + SILENT_FRAME.len() + mode.payload_overhead()
            );

            let cipher = Cipher::new_from_slice(&KEY).unwrap();
            let range = mode.decrypt_in_place(&mut pkt, &cipher).unwrap();
            assert_eq!(&pkt[range], &SILENT_FRAME[..]);

            let frame = vec![0u8; transport.frame_len()];
            transport.send_pcm_frame(&frame).unwrap();
            let mut pkt = recv(&relay);
            assert!(mode.decrypt_in_place(&mut pkt, &cipher).is_ok());
        }
    }

    #[test]
    fn wrong_frame_length_is_rejected() {
        let mut transport = VoiceTransport::new(&Config::default()).unwrap();
        let (conn, _relay) = loopback(CryptoMode::Lite, 1);
        transport.set_connection(conn);
        let seq = transport.sequence();

        assert!(matches!(
            transport.send_pcm_frame(&[0u8; 10]),
            Err(SendError::FrameLength { got: 10, .. })
        ));
        assert_eq!(transport.sequence(), seq);
    }

    #[test]
    fn counters_wrap() {
        let mut transport = VoiceTransport::new(&Config::default()).unwrap();
        let (conn, relay) = loopback(CryptoMode::Lite, 1);
        transport.set_connection(conn);
        transport.sequence = Wrapping(u16::MAX);
        transport.timestamp = Wrapping(u32::MAX - 10);

        transport.send_opus_frame(&SILENT_FRAME).unwrap();
        transport.send_opus_frame(&SILENT_FRAME).unwrap();

        let (a, b) = (recv(&relay), recv(&relay));
        assert_eq!(seq(&a), u16::MAX);
        assert_eq!(seq(&b), 0);
        assert_eq!(ts(&b), (u32::MAX - 10).wrapping_add(MONO_FRAME_SIZE as u32));

        // The lite nonce follows the sequence number through the wrap.
        assert_eq!(&a[a.len() - 4..], &[0, 0, 0xff, 0xff]);
        assert_eq!(&b[b.len() - 4..], &[0, 0, 0, 0]);
    }
}
