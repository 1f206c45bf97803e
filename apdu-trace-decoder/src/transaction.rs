//! Command/response transactions and their text renderings

use crate::types::{Apdu, CommandApdu, IsoCase, RawFrame, ResponseApdu, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Glyph substituted for control characters in readable renderings
pub const CONTROL_PLACEHOLDER: char = '\u{0FFD}';

/// How a transaction side is rendered for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Raw frame bytes as spaced uppercase hex
    #[default]
    Hex,
    /// Header/status bytes in hex, data decoded as text
    Readable,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Hex => write!(f, "hex"),
            RenderMode::Readable => write!(f, "readable"),
        }
    }
}

/// A command waiting for its response
///
/// This type can only become a [`Transaction`] by consuming it in
/// [`PendingTransaction::complete`], so an incomplete transaction never
/// reaches the history.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    command: CommandApdu,
    command_frame: RawFrame,
    started_at: Timestamp,
}

impl PendingTransaction {
    /// Start a transaction from a decoded command and its raw frame
    pub fn new(command: CommandApdu, command_frame: RawFrame) -> Self {
        Self {
            command,
            command_frame,
            started_at: Utc::now(),
        }
    }

    /// The decoded command
    pub fn command(&self) -> &CommandApdu {
        &self.command
    }

    /// The raw command frame
    pub fn command_frame(&self) -> &RawFrame {
        &self.command_frame
    }

    /// ISO case of the pending command
    pub fn case(&self) -> IsoCase {
        self.command.case
    }

    /// Attach the response and freeze the transaction
    pub fn complete(self, response: ResponseApdu, response_frame: RawFrame) -> Transaction {
        Transaction {
            response: response.with_case(self.command.case),
            command: self.command,
            command_frame: self.command_frame,
            response_frame,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

/// One command paired with its response
///
/// Fields are private: a completed transaction is immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    command: CommandApdu,
    command_frame: RawFrame,
    response: ResponseApdu,
    response_frame: RawFrame,
    started_at: Timestamp,
    completed_at: Timestamp,
}

impl Transaction {
    /// The decoded command
    pub fn command(&self) -> &CommandApdu {
        &self.command
    }

    /// The raw command frame
    pub fn command_frame(&self) -> &RawFrame {
        &self.command_frame
    }

    /// The decoded response
    pub fn response(&self) -> &ResponseApdu {
        &self.response
    }

    /// The raw response frame
    pub fn response_frame(&self) -> &RawFrame {
        &self.response_frame
    }

    /// When the command frame was decoded
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// When the response frame was decoded
    pub fn completed_at(&self) -> Timestamp {
        self.completed_at
    }

    /// ISO case of the command
    pub fn case(&self) -> IsoCase {
        self.command.case
    }

    /// Render the command side
    pub fn command_string(&self, mode: RenderMode) -> String {
        match mode {
            RenderMode::Hex => self.command_frame.to_hex(),
            RenderMode::Readable => readable_command(&self.command),
        }
    }

    /// Render the response side
    pub fn response_string(&self, mode: RenderMode) -> String {
        match mode {
            RenderMode::Hex => self.response_frame.to_hex(),
            RenderMode::Readable => readable_response(&self.response),
        }
    }

    /// Render both sides, command first, separated by a newline
    pub fn render(&self, mode: RenderMode) -> String {
        format!(
            "{}\n{}",
            self.command_string(mode),
            self.response_string(mode)
        )
    }
}

/// Render bytes as uppercase two-digit hex groups separated by single spaces
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode bytes as text, replacing control characters with [`CONTROL_PLACEHOLDER`]
pub fn readable_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .map(|c| if c.is_control() { CONTROL_PLACEHOLDER } else { c })
        .collect()
}

/// `CLA INS P1 P2 <data>`
pub fn readable_command(command: &CommandApdu) -> String {
    let data = command.data.as_deref().map(readable_text).unwrap_or_default();
    format!(
        "{:02X} {:02X} {:02X} {:02X} {}",
        command.cla, command.ins, command.p1, command.p2, data
    )
    .trim()
    .to_string()
}

/// `<data> SW1 SW2`
pub fn readable_response(response: &ResponseApdu) -> String {
    let data = response.data.as_deref().map(readable_text).unwrap_or_default();
    format!("{} {:02X} {:02X}", data, response.sw1, response.sw2)
        .trim()
        .to_string()
}

/// Readable rendering of either APDU direction
pub fn readable_apdu(apdu: &Apdu) -> String {
    match apdu {
        Apdu::Command(command) => readable_command(command),
        Apdu::Response(response) => readable_response(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_command, decode_response};

    fn transaction(command: &[u8], response: &[u8]) -> Transaction {
        let pending = PendingTransaction::new(
            decode_command(command).unwrap(),
            RawFrame::from(command),
        );
        pending.complete(decode_response(response).unwrap(), RawFrame::from(response))
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(to_hex(&[0x00, 0xA4, 0x04, 0x0F]), "00 A4 04 0F");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_hex_rendering_reproduces_frames() {
        let tx = transaction(&[0x00, 0xB0, 0x00, 0x00, 0x00, 0x01, 0x00], &[0xDE, 0xAD, 0x90, 0x00]);
        assert_eq!(tx.command_string(RenderMode::Hex), "00 B0 00 00 00 01 00");
        assert_eq!(tx.response_string(RenderMode::Hex), "DE AD 90 00");
        assert_eq!(tx.command().to_bytes(), tx.command_frame().as_bytes());
        assert_eq!(tx.response().to_bytes(), tx.response_frame().as_bytes());
    }

    #[test]
    fn test_readable_command_without_data_has_no_trailing_space() {
        let tx = transaction(&[0x00, 0xA4, 0x04, 0x00], &[0x90, 0x00]);
        assert_eq!(tx.command_string(RenderMode::Readable), "00 A4 04 00");
        assert_eq!(tx.response_string(RenderMode::Readable), "90 00");
    }

    #[test]
    fn test_readable_data_as_text() {
        let tx = transaction(
            &[0x80, 0xCA, 0x00, 0x00, 0x03, b'a', b'b', b'c'],
            &[b'o', b'k', 0x90, 0x00],
        );
        assert_eq!(tx.command_string(RenderMode::Readable), "80 CA 00 00 abc");
        assert_eq!(tx.response_string(RenderMode::Readable), "ok 90 00");
        assert_eq!(tx.render(RenderMode::Readable), "80 CA 00 00 abc\nok 90 00");
    }

    #[test]
    fn test_readable_replaces_control_characters() {
        assert_eq!(readable_text(&[b'A', 0x01, b'B', 0x0A]), "A\u{0FFD}B\u{0FFD}");
    }

    #[test]
    fn test_completion_attaches_command_case() {
        let tx = transaction(&[0x00, 0xA4, 0x04, 0x00, 0x02, 0x3F, 0x00], &[0x90, 0x00]);
        assert_eq!(tx.case(), IsoCase::Case3Short);
        assert_eq!(tx.response().case, Some(IsoCase::Case3Short));
        assert!(tx.completed_at() >= tx.started_at());
    }

    #[test]
    fn test_readable_apdu_matches_direction() {
        let command = Apdu::from(decode_command(&[0x00, 0x84, 0x00, 0x00, 0x08]).unwrap());
        let response = Apdu::from(decode_response(&[0x6D, 0x00]).unwrap());
        assert_eq!(readable_apdu(&command), "00 84 00 00");
        assert_eq!(readable_apdu(&response), "6D 00");
    }
}
