//! APDU decoding engine
//!
//! Classifies a raw byte sequence into one of the seven ISO 7816-4 command
//! encodings and extracts its fields, or splits a response into data and status
//! word. Everything here is pure: no state, no I/O, safe to call from any thread.
//!
//! ## Command layout
//!
//! ```text
//! CLA INS P1 P2                         Case 1
//! CLA INS P1 P2 Le                      Case 2S
//! CLA INS P1 P2 Lc Data                 Case 3S
//! CLA INS P1 P2 Lc Data Le              Case 4S
//! CLA INS P1 P2 00 Le1 Le2              Case 2E
//! CLA INS P1 P2 00 Lc1 Lc2 Data         Case 3E
//! CLA INS P1 P2 00 Lc1 Lc2 Data Le1 Le2 Case 4E
//! ```

use crate::types::{CommandApdu, DecodeResult, FormatError, IsoCase, LengthForm, ResponseApdu};
use byteorder::{BigEndian, ByteOrder};

/// Number of header bytes (CLA, INS, P1, P2)
pub const HEADER_LEN: usize = 4;

/// Number of status bytes terminating every response
pub const STATUS_LEN: usize = 2;

/// First body byte announcing 2-byte length fields
const EXTENDED_MARKER: u8 = 0x00;

/// Decoded command body (everything after the header)
struct Body {
    case: IsoCase,
    data: Option<Vec<u8>>,
    le: Option<u32>,
}

impl Body {
    fn new(case: IsoCase, data: Option<&[u8]>, le: Option<u32>) -> Self {
        Self {
            case,
            data: data.map(<[u8]>::to_vec),
            le,
        }
    }
}

/// APDU decoder - turns raw frames into typed APDUs
pub struct ApduDecoder;

impl ApduDecoder {
    /// Decode a command APDU
    ///
    /// The body is classified by lookahead on its first byte: empty means Case 1,
    /// a non-zero first byte selects the short family and a zero first byte the
    /// extended family. A lone trailing `0x00` is a short Le of zero, not an
    /// extended marker.
    ///
    /// # Errors
    /// Returns the [`FormatError`] naming the first violated constraint.
    pub fn decode_command(bytes: &[u8]) -> DecodeResult<CommandApdu> {
        if bytes.len() < HEADER_LEN {
            return Err(FormatError::TooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let (header, body) = bytes.split_at(HEADER_LEN);

        let body = match body.first() {
            None => Body::new(IsoCase::Case1, None, None),
            Some(&first) if first != EXTENDED_MARKER => Self::decode_short_body(body)?,
            Some(_) => Self::decode_extended_body(&body[1..])?,
        };

        log::trace!(
            "Decoded {} command {:02X} {:02X} {:02X} {:02X}",
            body.case,
            header[0],
            header[1],
            header[2],
            header[3]
        );

        Ok(CommandApdu {
            cla: header[0],
            ins: header[1],
            p1: header[2],
            p2: header[3],
            data: body.data,
            le: body.le,
            case: body.case,
        })
    }

    /// Decode a response APDU
    ///
    /// The last two bytes are SW1 SW2, anything before them is data. The
    /// response shape does not depend on the command it answers, so no ISO case
    /// is attached here (see [`ResponseApdu::with_case`]).
    ///
    /// # Errors
    /// [`FormatError::TooShort`] if fewer than two bytes are given.
    pub fn decode_response(bytes: &[u8]) -> DecodeResult<ResponseApdu> {
        if bytes.len() < STATUS_LEN {
            return Err(FormatError::TooShort {
                expected: STATUS_LEN,
                actual: bytes.len(),
            });
        }

        let (data, status) = bytes.split_at(bytes.len() - STATUS_LEN);

        Ok(ResponseApdu {
            data: (!data.is_empty()).then(|| data.to_vec()),
            sw1: status[0],
            sw2: status[1],
            case: None,
        })
    }

    /// Decode a body whose first byte is non-zero (Case 2S, 3S, 4S)
    fn decode_short_body(body: &[u8]) -> DecodeResult<Body> {
        if body.len() == 1 {
            let le = Self::expected_length(body)?;
            return Ok(Body::new(IsoCase::Case2Short, None, Some(le)));
        }

        let (lc_field, after_lc) = body.split_at(1);
        let (data, rest) = Self::split_data(lc_field, after_lc, LengthForm::Short)?;

        match rest.len() {
            0 => Ok(Body::new(IsoCase::Case3Short, Some(data), None)),
            1 => Ok(Body::new(
                IsoCase::Case4Short,
                Some(data),
                Some(Self::expected_length(rest)?),
            )),
            count => Err(FormatError::TrailingBytes {
                form: LengthForm::Short,
                count,
            }),
        }
    }

    /// Decode the bytes following a leading `0x00` (Case 2S with Le=0, 2E, 3E, 4E)
    fn decode_extended_body(after_marker: &[u8]) -> DecodeResult<Body> {
        if after_marker.is_empty() {
            // The zero byte was a short Le on its own
            let le = Self::expected_length(&[EXTENDED_MARKER])?;
            return Ok(Body::new(IsoCase::Case2Short, None, Some(le)));
        }

        if after_marker.len() < 2 {
            return Err(FormatError::ExtendedTruncated {
                available: after_marker.len(),
            });
        }

        if after_marker.len() == 2 {
            let le = Self::expected_length(after_marker)?;
            return Ok(Body::new(IsoCase::Case2Extended, None, Some(le)));
        }

        let (lc_field, after_lc) = after_marker.split_at(2);
        let (data, rest) = Self::split_data(lc_field, after_lc, LengthForm::Extended)?;

        match rest.len() {
            0 => Ok(Body::new(IsoCase::Case3Extended, Some(data), None)),
            2 => Ok(Body::new(
                IsoCase::Case4Extended,
                Some(data),
                Some(Self::expected_length(rest)?),
            )),
            count => Err(FormatError::TrailingBytes {
                form: LengthForm::Extended,
                count,
            }),
        }
    }

    /// Read Lc and split the remaining bytes into (data, rest)
    fn split_data<'a>(
        lc_field: &[u8],
        after_lc: &'a [u8],
        form: LengthForm,
    ) -> DecodeResult<(&'a [u8], &'a [u8])> {
        let lc = Self::read_length(lc_field)?;
        if lc == 0 {
            return Err(FormatError::ZeroLength { form });
        }

        if after_lc.len() < lc {
            return Err(FormatError::TruncatedData {
                form,
                expected: lc,
                available: after_lc.len(),
            });
        }

        Ok(after_lc.split_at(lc))
    }

    /// Read a 1- or 2-byte big-endian length field
    fn read_length(field: &[u8]) -> DecodeResult<usize> {
        match field.len() {
            1 => Ok(field[0] as usize),
            2 => Ok(BigEndian::read_u16(field) as usize),
            width => Err(FormatError::UnsupportedLengthWidth(width)),
        }
    }

    /// Read an Le field, mapping an encoded zero to the maximum for its width
    fn expected_length(field: &[u8]) -> DecodeResult<u32> {
        let le = Self::read_length(field)? as u32;
        if le != 0 {
            return Ok(le);
        }

        Ok(match field.len() {
            1 => 256,
            _ => 65536,
        })
    }
}

/// Decode a command APDU (see [`ApduDecoder::decode_command`])
pub fn decode_command(bytes: &[u8]) -> DecodeResult<CommandApdu> {
    ApduDecoder::decode_command(bytes)
}

/// Decode a response APDU (see [`ApduDecoder::decode_response`])
pub fn decode_response(bytes: &[u8]) -> DecodeResult<ResponseApdu> {
    ApduDecoder::decode_response(bytes)
}
