//! Companion frame header codec
//!
//! Every frame on the wire is `type(1) | length(3, big-endian) | payload`.
//! The length field counts on-wire payload bytes, which includes the
//! 16-byte AEAD tag once the connection is encrypted.

use byteorder::{BigEndian, ByteOrder};

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 4;

/// Largest on-wire payload the 24-bit length field can describe
pub const MAX_PAYLOAD: usize = 0xFF_FFFF;

/// First byte of every Companion frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Catch-all for bytes outside the table
    Unknown = 0,
    /// Keep-alive
    NoOp = 1,
    /// Pair-setup, first message
    PsStart = 3,
    /// Pair-setup, continuation
    PsNext = 4,
    /// Pair-verify, first message
    PvStart = 5,
    /// Pair-verify, continuation
    PvNext = 6,
    /// OPACK message, unauthenticated channel
    UOpack = 7,
    /// OPACK message, encrypted channel
    EOpack = 8,
    /// OPACK message, plaintext channel
    POpack = 9,
    /// Pairing association request
    PaReq = 10,
    /// Pairing association response
    PaRsp = 11,
    /// Session start request
    SessionStartRequest = 16,
    /// Session start response
    SessionStartResponse = 17,
    /// Session payload
    SessionData = 18,
    /// Family identity request
    FamilyIdentityRequest = 32,
    /// Family identity response
    FamilyIdentityResponse = 33,
    /// Family identity update
    FamilyIdentityUpdate = 34,
}

impl FrameType {
    /// Map a wire byte to a frame type; unlisted bytes become `Unknown`
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::NoOp,
            3 => Self::PsStart,
            4 => Self::PsNext,
            5 => Self::PvStart,
            6 => Self::PvNext,
            7 => Self::UOpack,
            8 => Self::EOpack,
            9 => Self::POpack,
            10 => Self::PaReq,
            11 => Self::PaRsp,
            16 => Self::SessionStartRequest,
            17 => Self::SessionStartResponse,
            18 => Self::SessionData,
            32 => Self::FamilyIdentityRequest,
            33 => Self::FamilyIdentityResponse,
            34 => Self::FamilyIdentityUpdate,
            _ => Self::Unknown,
        }
    }

    /// The frame type the peer answers a pairing frame with
    ///
    /// A `*_Start` request is replied with `*_Next`, and each `*_Next`
    /// with another `*_Next`.
    #[must_use]
    pub fn auth_reply(self) -> Option<Self> {
        match self {
            Self::PsStart | Self::PsNext => Some(Self::PsNext),
            Self::PvStart | Self::PvNext => Some(Self::PvNext),
            _ => None,
        }
    }

    /// Whether frames of this type carry an OPACK message envelope
    #[must_use]
    pub fn is_opack(self) -> bool {
        matches!(self, Self::UOpack | Self::EOpack | Self::POpack)
    }
}

/// Encode a frame header
#[must_use]
pub fn encode_header(frame_type: FrameType, payload_len: usize) -> [u8; HEADER_LEN] {
    debug_assert!(payload_len <= MAX_PAYLOAD);
    let mut header = [0u8; HEADER_LEN];
    header[0] = frame_type as u8;
    #[allow(clippy::cast_possible_truncation)]
    BigEndian::write_u24(&mut header[1..4], payload_len as u32);
    header
}

/// Decode a frame header into `(type byte, payload length)`
#[must_use]
pub fn decode_header(header: &[u8; HEADER_LEN]) -> (u8, usize) {
    (header[0], BigEndian::read_u24(&header[1..4]) as usize)
}
