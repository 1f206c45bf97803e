//! Core types for the APDU trace decoder library
//!
//! This module defines the fundamental types produced by the decoder: raw frames as
//! received from a trace, ISO 7816-4 command and response APDUs, and the error
//! types raised while decoding them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the decoder
pub type Timestamp = DateTime<Utc>;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Result type for the pure decoding functions, which can only fail with a [`FormatError`]
pub type DecodeResult<T> = std::result::Result<T, FormatError>;

/// Raw APDU frame as delivered by the trace feed
///
/// This is the sole source of truth for one side of a transaction. Decoded
/// fields are always derived from it and never the other way around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    /// Wrap a byte sequence received from the feed
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the frame
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the frame carries no bytes at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render the frame as uppercase hex groups separated by single spaces
    pub fn to_hex(&self) -> String {
        crate::transaction::to_hex(&self.0)
    }

    /// Consume the frame and return its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for RawFrame {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The seven command shapes defined by ISO 7816-4
///
/// Short cases use 1-byte length fields, extended cases use 2-byte length
/// fields introduced by a `0x00` marker byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsoCase {
    /// Header only: no data, no expected length
    Case1,
    /// Short Le only
    Case2Short,
    /// Short Lc + data
    Case3Short,
    /// Short Lc + data + short Le
    Case4Short,
    /// Extended Le only
    Case2Extended,
    /// Extended Lc + data
    Case3Extended,
    /// Extended Lc + data + extended Le
    Case4Extended,
}

impl IsoCase {
    /// True for the cases using 2-byte length fields
    pub fn is_extended(&self) -> bool {
        matches!(
            self,
            IsoCase::Case2Extended | IsoCase::Case3Extended | IsoCase::Case4Extended
        )
    }

    /// True if a command of this case carries a data field
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            IsoCase::Case3Short
                | IsoCase::Case4Short
                | IsoCase::Case3Extended
                | IsoCase::Case4Extended
        )
    }

    /// True if a command of this case carries an Le field
    pub fn has_le(&self) -> bool {
        matches!(
            self,
            IsoCase::Case2Short
                | IsoCase::Case4Short
                | IsoCase::Case2Extended
                | IsoCase::Case4Extended
        )
    }

    /// Width in bytes of the Lc/Le fields for this case
    pub fn length_field_width(&self) -> usize {
        if self.is_extended() {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for IsoCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsoCase::Case1 => write!(f, "Case1"),
            IsoCase::Case2Short => write!(f, "Case2Short"),
            IsoCase::Case3Short => write!(f, "Case3Short"),
            IsoCase::Case4Short => write!(f, "Case4Short"),
            IsoCase::Case2Extended => write!(f, "Case2Extended"),
            IsoCase::Case3Extended => write!(f, "Case3Extended"),
            IsoCase::Case4Extended => write!(f, "Case4Extended"),
        }
    }
}

/// Decoded command APDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandApdu {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (1..=65535 bytes when present)
    pub data: Option<Vec<u8>>,
    /// Expected response length, with an encoded zero already mapped to the
    /// maximum (256 short, 65536 extended)
    pub le: Option<u32>,
    /// Encoding the command was decoded from
    pub case: IsoCase,
}

impl CommandApdu {
    /// The four header bytes (CLA, INS, P1, P2)
    pub fn header(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Length of the data field (0 if absent)
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Re-encode the command using its own ISO case
    ///
    /// For a decoded command this reproduces the input frame byte for byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header().to_vec();
        let data = self.data.as_deref().unwrap_or_default();
        let extended = self.case.is_extended();

        if self.case.has_data() {
            if extended {
                out.push(0x00);
                out.extend_from_slice(&(data.len() as u16).to_be_bytes());
            } else {
                out.push(data.len() as u8);
            }
            out.extend_from_slice(data);
        }

        if let Some(le) = self.le {
            if extended {
                // Case 2E carries the marker byte in front of Le; Case 4E already has it before Lc
                if !self.case.has_data() {
                    out.push(0x00);
                }
                out.extend_from_slice(&((le % 65536) as u16).to_be_bytes());
            } else {
                out.push((le % 256) as u8);
            }
        }

        out
    }
}

/// Decoded response APDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseApdu {
    /// Response data (absent when the response is only a status word)
    pub data: Option<Vec<u8>>,
    /// Status byte 1
    pub sw1: u8,
    /// Status byte 2
    pub sw2: u8,
    /// ISO case of the command this response answers (provenance only)
    pub case: Option<IsoCase>,
}

impl ResponseApdu {
    /// True if the response carries data in front of the status word
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// SW1 and SW2 combined into a single big-endian value
    pub fn status_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    /// Attach the ISO case of the paired command
    pub fn with_case(mut self, case: IsoCase) -> Self {
        self.case = Some(case);
        self
    }

    /// Re-encode the response (data followed by SW1 SW2)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone().unwrap_or_default();
        out.push(self.sw1);
        out.push(self.sw2);
        out
    }
}

/// A decoded APDU of either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Apdu {
    /// Reader to card
    Command(CommandApdu),
    /// Card to reader
    Response(ResponseApdu),
}

impl Apdu {
    /// ISO case of the command (or of the command a response answers)
    pub fn case(&self) -> Option<IsoCase> {
        match self {
            Apdu::Command(command) => Some(command.case),
            Apdu::Response(response) => response.case,
        }
    }

    /// Re-encode the APDU
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Apdu::Command(command) => command.to_bytes(),
            Apdu::Response(response) => response.to_bytes(),
        }
    }
}

impl From<CommandApdu> for Apdu {
    fn from(command: CommandApdu) -> Self {
        Apdu::Command(command)
    }
}

impl From<ResponseApdu> for Apdu {
    fn from(response: ResponseApdu) -> Self {
        Apdu::Response(response)
    }
}

/// Width family of a length field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthForm {
    /// 1-byte Lc/Le
    Short,
    /// 2-byte Lc/Le after a `0x00` marker
    Extended,
}

impl fmt::Display for LengthForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthForm::Short => write!(f, "short"),
            LengthForm::Extended => write!(f, "extended"),
        }
    }
}

/// A malformed byte sequence, naming the violated constraint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("APDU too short: need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("{form} Lc must be non-zero when present")]
    ZeroLength { form: LengthForm },

    #[error("APDU truncated: {form} Lc announces {expected} data bytes, only {available} present")]
    TruncatedData {
        form: LengthForm,
        expected: usize,
        available: usize,
    },

    #[error("unexpected trailing bytes: {count} bytes after {form} data do not form an Le field")]
    TrailingBytes { form: LengthForm, count: usize },

    #[error("extended form truncated: need 2 bytes after the 0x00 marker, got {available}")]
    ExtendedTruncated { available: usize },

    #[error("unsupported length field width: {0} bytes")]
    UnsupportedLengthWidth(usize),
}

/// Errors that can occur in the library
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Malformed APDU: {0}")]
    Format(#[from] FormatError),

    #[error("Invalid trace line: {0}")]
    InvalidTrace(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
