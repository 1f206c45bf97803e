//! APDU Trace Decoder Library
//!
//! Decodes raw frames captured from a smart-card communication trace into
//! ISO 7816-4 APDUs and pairs consecutive command/response frames into
//! transactions.
//!
//! # Architecture
//!
//! - [`decoder`]: pure functions classifying a byte sequence into one of the
//!   seven ISO 7816-4 command cases, or splitting a response into data + status word
//! - [`correlator`]: two-state pairing machine building the ordered transaction history
//! - [`store`]: thread-safe wrapper with snapshots and change notifications
//! - [`trace`]: parser for `APDU: <hex>` text trace lines
//!
//! The library does NOT:
//! - Capture frames from a reader or OS tracing session
//! - Interpret command meaning or status word dictionaries
//! - Persist anything beyond the in-memory history
//!
//! # Example Usage
//!
//! ```
//! use apdu_trace_decoder::{Correlator, CorrelatorConfig, RenderMode};
//!
//! let mut correlator = Correlator::new(CorrelatorConfig::new());
//! correlator.submit_bytes(vec![0x00, 0xA4, 0x04, 0x00]);
//! correlator.submit_bytes(vec![0x90, 0x00]);
//!
//! for transaction in correlator.snapshot() {
//!     println!("{}", transaction.render(RenderMode::Hex));
//! }
//! ```

// Public modules
pub mod config;
pub mod correlator;
pub mod decoder;
pub mod store;
pub mod trace;
pub mod transaction;
pub mod types;

// Re-export main types for convenience
pub use config::{CorrelatorConfig, MarkerSet, DEFAULT_NO_RESPONSE_MARKER};
pub use correlator::{Correlator, CorrelatorStats, FeedFrame, PairingState, Step, SubmitOutcome};
pub use decoder::{decode_command, decode_response, ApduDecoder};
pub use store::{SharedStore, StoreEvent, StoreEventReceiver};
pub use trace::{parse_line, TraceLine, TraceReader};
pub use transaction::{PendingTransaction, RenderMode, Transaction};
pub use types::{
    Apdu, CommandApdu, DecodeResult, DecoderError, FormatError, IsoCase, LengthForm,
    RawFrame, ResponseApdu, Result, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
