//! Encryption schemes supported by the relay's secure RTP negotiation.
//!
//! Every mode uses XSalsa20-Poly1305 (libsodium's `secretbox`). Packets are laid out as
//! `RTP header ‖ tag ‖ ciphertext ‖ nonce suffix`, where the suffix is empty in
//! [`CryptoMode::Normal`].
use crate::constants::RTP_HEADER_LEN;
use rand::Rng;
use std::ops::Range;
use xsalsa20poly1305::{
    aead::{AeadInPlace, Error as CryptoError},
    Nonce,
    Tag,
    XSalsa20Poly1305 as Cipher,
};

/// Length of a Poly1305 authentication tag.
pub const TAG_SIZE: usize = 16;

/// Length of a full XSalsa20 nonce.
pub const NONCE_SIZE: usize = 24;

/// Length of the secret key handed out in `SessionDescription`.
pub const KEY_SIZE: usize = 32;

/// Length of the sequence-number suffix used by [`CryptoMode::Lite`].
pub const LITE_NONCE_SIZE: usize = 4;

/// Variants of the XSalsa20Poly1305 encryption scheme.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoMode {
    /// The RTP header is used as the source of nonce bytes for the packet.
    ///
    /// Equivalent to a nonce of at most 48b (6B) at no extra packet overhead:
    /// the RTP sequence number and timestamp are the varying quantities.
    Normal,
    /// An additional random 24B suffix is used as the source of nonce bytes for the packet.
    /// This is regenerated randomly for each packet.
    ///
    /// Full nonce width of 24B (192b), at an extra 24B per packet (~1.2 kB/s).
    Suffix,
    /// An additional 4B suffix is used as the source of nonce bytes for the packet.
    /// The suffix holds the packet's big-endian RTP sequence number in its last two
    /// bytes, with the first two zeroed.
    ///
    /// Nonce width of 4B (32b), at an extra 4B per packet (~0.2 kB/s).
    Lite,
}

impl From<CryptoState> for CryptoMode {
    fn from(val: CryptoState) -> Self {
        use CryptoState::*;
        match val {
            Normal => CryptoMode::Normal,
            Suffix => CryptoMode::Suffix,
            Lite => CryptoMode::Lite,
        }
    }
}

impl CryptoMode {
    /// Returns the name of a mode as it will appear during negotiation.
    #[must_use]
    pub fn to_request_str(self) -> &'static str {
        use CryptoMode::*;
        match self {
            Normal => "xsalsa20_poly1305",
            Suffix => "xsalsa20_poly1305_suffix",
            Lite => "xsalsa20_poly1305_lite",
        }
    }

    /// Returns the number of bytes each nonce is stored as within
    /// a packet.
    #[must_use]
    pub fn nonce_size(self) -> usize {
        use CryptoMode::*;
        match self {
            Normal => RTP_HEADER_LEN,
            Suffix => NONCE_SIZE,
            Lite => LITE_NONCE_SIZE,
        }
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall before the payload.
    #[must_use]
    pub fn payload_prefix_len(self) -> usize {
        TAG_SIZE
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall after the payload.
    #[must_use]
    pub fn payload_suffix_len(self) -> usize {
        use CryptoMode::*;
        match self {
            Normal => 0,
            Suffix | Lite => self.nonce_size(),
        }
    }

    /// Calculates the number of additional bytes required compared
    /// to an unencrypted payload.
    #[must_use]
    pub fn payload_overhead(self) -> usize {
        self.payload_prefix_len() + self.payload_suffix_len()
    }

    /// Builds the full nonce for a packet, returning it along with the
    /// mutable region holding the tag and encrypted body.
    fn split_packet(self, packet: &mut [u8]) -> Result<(Nonce, &mut [u8]), CryptoError> {
        let min_len = RTP_HEADER_LEN + self.payload_overhead();
        if packet.len() < min_len {
            return Err(CryptoError);
        }

        let (header, body) = packet.split_at_mut(RTP_HEADER_LEN);
        let body_len = body.len() - self.payload_suffix_len();
        let (body, suffix) = body.split_at_mut(body_len);

        let source: &[u8] = match self {
            CryptoMode::Normal => header,
            CryptoMode::Suffix | CryptoMode::Lite => suffix,
        };

        let mut nonce = Nonce::default();
        nonce[..source.len()].copy_from_slice(source);

        Ok((nonce, body))
    }

    /// Encrypts an RTP packet in place using the given cipher.
    ///
    /// `packet` must span from the start of the RTP header to the end of any
    /// nonce suffix, with [`TAG_SIZE`] empty bytes reserved directly after the header.
    /// Use of this requires that the nonce suffix (if any) has already been written
    /// by [`CryptoState::write_packet_nonce`].
    #[inline]
    pub fn encrypt_in_place(self, packet: &mut [u8], cipher: &Cipher) -> Result<(), CryptoError> {
        let (nonce, body) = self.split_packet(packet)?;
        let (tag_bytes, data) = body.split_at_mut(TAG_SIZE);

        let tag = cipher.encrypt_in_place_detached(&nonce, b"", data)?;
        tag_bytes.copy_from_slice(&tag[..]);

        Ok(())
    }

    /// Decrypts an RTP packet in place using the given cipher.
    ///
    /// If successful, this returns the byte range of `packet` now holding the plaintext.
    #[inline]
    pub fn decrypt_in_place(
        self,
        packet: &mut [u8],
        cipher: &Cipher,
    ) -> Result<Range<usize>, CryptoError> {
        let len = packet.len();
        let (nonce, body) = self.split_packet(packet)?;
        let (tag_bytes, data) = body.split_at_mut(TAG_SIZE);
        let tag = Tag::clone_from_slice(tag_bytes);

        cipher.decrypt_in_place_detached(&nonce, b"", data, &tag)?;

        Ok(RTP_HEADER_LEN + TAG_SIZE..len - self.payload_suffix_len())
    }
}

/// Per-connection state of an encryption scheme.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoState {
    Normal,
    Suffix,
    Lite,
}

impl CryptoState {
    /// Creates the state for a mode.
    #[must_use]
    pub fn new(mode: CryptoMode) -> Self {
        use CryptoMode::*;
        match mode {
            Normal => CryptoState::Normal,
            Suffix => CryptoState::Suffix,
            Lite => CryptoState::Lite,
        }
    }

    /// Writes the packet nonce after the payload, if required, returning the new
    /// end of the packet.
    ///
    /// `packet` must already hold its RTP header. `payload_end` is the offset into
    /// `packet` directly after the last payload byte.
    pub fn write_packet_nonce(&mut self, packet: &mut [u8], payload_end: usize) -> usize {
        let endpoint = payload_end + self.kind().payload_suffix_len();

        match self {
            CryptoState::Suffix => {
                rand::thread_rng().fill(&mut packet[payload_end..endpoint]);
            },
            CryptoState::Lite => {
                let (header, rest) = packet.split_at_mut(payload_end);
                let suffix = &mut rest[..LITE_NONCE_SIZE];
                suffix[..2].fill(0);
                suffix[2..].copy_from_slice(&header[2..4]);
            },
            CryptoState::Normal => {},
        }

        endpoint
    }

    /// Returns the underlying (stateless) type of the active crypto mode.
    #[must_use]
    pub fn kind(&self) -> CryptoMode {
        CryptoMode::from(*self)
    }
}
