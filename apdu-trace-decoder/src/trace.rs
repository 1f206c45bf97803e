//! Text trace envelope parser
//!
//! Smart-card traces carry APDUs as text lines of the form
//!
//! ```text
//! APDU: 00 A4 04 00 07 A0 00 00 00 03 10 10
//! APDU: 90 00
//! APDU: Reset
//! ```
//!
//! This module strips that envelope and yields [`FeedFrame`]s for the
//! correlator. Lines that are not APDU records are skipped.

use crate::correlator::FeedFrame;
use crate::types::{DecoderError, RawFrame, Result};
use std::io::BufRead;

/// Tag in front of every APDU record
pub const APDU_TAG: &str = "APDU";

/// Payload of the reset control record
pub const RESET_PAYLOAD: &str = "Reset";

/// Classification of one trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLine {
    /// An APDU record carrying a payload or the reset marker
    Frame(FeedFrame),
    /// Not an APDU record (other trace output)
    NotApdu,
    /// Tagged as APDU but the payload is not valid hex
    Invalid(String),
}

/// Classify a single trace line
pub fn parse_line(line: &str) -> TraceLine {
    let Some((tag, payload)) = line.split_once(':') else {
        return TraceLine::NotApdu;
    };

    if tag.trim() != APDU_TAG {
        return TraceLine::NotApdu;
    }

    match parse_payload(payload) {
        Ok(frame) => TraceLine::Frame(frame),
        Err(e) => TraceLine::Invalid(e.to_string()),
    }
}

/// Parse the part after `APDU:` into a feed frame
///
/// Bytes are whitespace-separated hex tokens. A token may also hold several
/// packed bytes (`00A40400`); a single digit is read as one byte (`5` = `05`).
pub fn parse_payload(payload: &str) -> Result<FeedFrame> {
    let payload = payload.trim();

    if payload == RESET_PAYLOAD {
        return Ok(FeedFrame::Reset);
    }

    if payload.is_empty() {
        return Err(DecoderError::InvalidTrace("empty APDU payload".to_string()));
    }

    let mut bytes = Vec::new();
    for token in payload.split_whitespace() {
        let decoded = if token.len() == 1 {
            hex::decode(format!("0{}", token))
        } else {
            hex::decode(token)
        };

        match decoded {
            Ok(decoded) => bytes.extend(decoded),
            Err(e) => {
                return Err(DecoderError::InvalidTrace(format!(
                    "bad hex token '{}': {}",
                    token, e
                )));
            }
        }
    }

    Ok(FeedFrame::Payload(RawFrame::new(bytes)))
}

/// Iterator over the feed frames of a text trace
///
/// Non-APDU and invalid lines are logged and skipped; only read errors are
/// reported to the caller.
pub struct TraceReader<R: BufRead> {
    lines: std::io::Lines<R>,
    line_number: usize,
    skipped: usize,
}

impl<R: BufRead> TraceReader<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Number of lines consumed so far
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Number of lines skipped because they were not valid APDU records
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<FeedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(DecoderError::IoError(e))),
            };
            self.line_number += 1;

            match parse_line(&line) {
                TraceLine::Frame(frame) => return Some(Ok(frame)),
                TraceLine::NotApdu => {
                    if !line.trim().is_empty() {
                        log::trace!("Line {}: not an APDU record", self.line_number);
                        self.skipped += 1;
                    }
                }
                TraceLine::Invalid(reason) => {
                    log::warn!("Line {}: skipping invalid APDU record: {}", self.line_number, reason);
                    self.skipped += 1;
                }
            }
        }
    }
}
