//! Command/response pairing
//!
//! The correlator consumes raw frames in feed order and pairs each decoded
//! command with the next decoded response. It is a two-state machine:
//!
//! ```text
//!            command ok                      response ok / error
//! AwaitingCommand ───────► AwaitingResponse ─────────────────────► AwaitingCommand
//!       ▲  │ command error
//!       └──┘
//! ```
//!
//! A frame that fails to decode is logged and dropped. A broken response also
//! drops the pending command, so one corrupt frame costs at most one
//! transaction and never desynchronizes the rest of the session.

use crate::config::{CorrelatorConfig, MarkerSet};
use crate::decoder::{decode_command, decode_response};
use crate::transaction::{PendingTransaction, Transaction};
use crate::types::{FormatError, RawFrame};
use serde::Serialize;
use std::sync::Arc;

/// One unit delivered by the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// An APDU payload; command or response depending on the current state
    Payload(RawFrame),
    /// Reset control marker
    Reset,
}

impl FeedFrame {
    /// Wrap raw bytes as a payload frame
    pub fn payload(bytes: impl Into<Vec<u8>>) -> Self {
        FeedFrame::Payload(RawFrame::new(bytes))
    }
}

/// Pairing state, owned by the [`Correlator`]
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PairingState {
    /// No command pending
    #[default]
    AwaitingCommand,
    /// A decoded command waits for its response
    AwaitingResponse(PendingTransaction),
}

/// What a single state transition produced
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A command was decoded and is now pending
    CommandPending,
    /// A response completed the pending command
    Completed(Transaction),
    /// The frame did not decode as a command; state unchanged
    CommandDropped(FormatError),
    /// The frame did not decode as a response; the pending command is lost
    ResponseDropped(FormatError),
}

impl PairingState {
    /// True while a command waits for its response
    pub fn is_awaiting_response(&self) -> bool {
        matches!(self, PairingState::AwaitingResponse(_))
    }

    /// Advance the machine by one payload frame
    pub fn advance(self, frame: RawFrame) -> (PairingState, Step) {
        match self {
            PairingState::AwaitingCommand => match decode_command(frame.as_bytes()) {
                Ok(command) => {
                    log::debug!("Command pending ({}): {}", command.case, frame);
                    let pending = PendingTransaction::new(command, frame);
                    (PairingState::AwaitingResponse(pending), Step::CommandPending)
                }
                Err(e) => {
                    log::warn!("Dropping command frame [{}]: {}", frame, e);
                    (PairingState::AwaitingCommand, Step::CommandDropped(e))
                }
            },
            PairingState::AwaitingResponse(pending) => match decode_response(frame.as_bytes()) {
                Ok(response) => {
                    log::debug!(
                        "Response {:02X} {:02X} completes command: {}",
                        response.sw1,
                        response.sw2,
                        pending.command_frame()
                    );
                    let transaction = pending.complete(response, frame);
                    (PairingState::AwaitingCommand, Step::Completed(transaction))
                }
                Err(e) => {
                    log::warn!(
                        "Dropping response frame [{}] and pending command [{}]: {}",
                        frame,
                        pending.command_frame(),
                        e
                    );
                    (PairingState::AwaitingCommand, Step::ResponseDropped(e))
                }
            },
        }
    }
}

/// Result of submitting one feed frame
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Known no-response payload, discarded without touching state
    Filtered,
    /// Reset marker; pending command and history cleared
    Reset,
    /// Command decoded, waiting for its response
    CommandPending,
    /// Transaction completed and appended to the history
    Completed {
        /// The appended transaction
        transaction: Arc<Transaction>,
        /// Number of oldest transactions evicted to respect `max_history`
        evicted: usize,
    },
    /// Command frame failed to decode
    CommandDropped(FormatError),
    /// Response frame failed to decode, pending command discarded
    ResponseDropped(FormatError),
}

/// Session counters, kept across clear/reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelatorStats {
    /// Frames submitted (including control frames)
    pub frames: usize,
    /// Frames discarded by the no-response filter
    pub filtered: usize,
    /// Reset control frames and `reset()` calls
    pub resets: usize,
    /// Command frames that failed to decode
    pub commands_dropped: usize,
    /// Response frames that failed to decode
    pub responses_dropped: usize,
    /// Transactions completed
    pub completed: usize,
    /// Transactions evicted by `max_history`
    pub evicted: usize,
}

/// Pairs raw frames into transactions and keeps the ordered history
///
/// All mutation goes through `&mut self`; wrap it in
/// [`SharedStore`](crate::store::SharedStore) to share it between threads.
#[derive(Debug)]
pub struct Correlator {
    config: CorrelatorConfig,
    markers: MarkerSet,
    state: PairingState,
    history: Vec<Arc<Transaction>>,
    stats: CorrelatorStats,
}

impl Correlator {
    /// Create a correlator in the `AwaitingCommand` state with an empty history
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            markers: config.marker_set(),
            config,
            state: PairingState::AwaitingCommand,
            history: Vec::new(),
            stats: CorrelatorStats::default(),
        }
    }

    /// Submit one feed frame
    ///
    /// Never fails: decode errors are logged, counted and reported in the
    /// outcome, and the machine always ends in a consistent state.
    pub fn submit(&mut self, frame: FeedFrame) -> SubmitOutcome {
        self.stats.frames += 1;

        let payload = match frame {
            FeedFrame::Reset => {
                self.reset();
                return SubmitOutcome::Reset;
            }
            FeedFrame::Payload(payload) => payload,
        };

        if self.markers.contains(&payload) {
            log::trace!("Ignoring no-response payload: {}", payload);
            self.stats.filtered += 1;
            return SubmitOutcome::Filtered;
        }

        let (next, step) = std::mem::take(&mut self.state).advance(payload);
        self.state = next;

        match step {
            Step::CommandPending => SubmitOutcome::CommandPending,
            Step::Completed(transaction) => {
                let transaction = Arc::new(transaction);
                let evicted = self.append(Arc::clone(&transaction));
                SubmitOutcome::Completed {
                    transaction,
                    evicted,
                }
            }
            Step::CommandDropped(e) => {
                self.stats.commands_dropped += 1;
                SubmitOutcome::CommandDropped(e)
            }
            Step::ResponseDropped(e) => {
                self.stats.responses_dropped += 1;
                SubmitOutcome::ResponseDropped(e)
            }
        }
    }

    /// Submit raw bytes as a payload frame
    pub fn submit_bytes(&mut self, bytes: impl Into<Vec<u8>>) -> SubmitOutcome {
        self.submit(FeedFrame::payload(bytes))
    }

    /// Handle a reset signal: drop the pending command and the whole history
    pub fn reset(&mut self) {
        log::info!(
            "Reset: discarding {} transactions{}",
            self.history.len(),
            if self.state.is_awaiting_response() {
                " and a pending command"
            } else {
                ""
            }
        );
        self.stats.resets += 1;
        self.discard_all();
    }

    /// Drop the pending command and empty the history
    pub fn clear(&mut self) {
        log::info!("Clearing {} transactions", self.history.len());
        self.discard_all();
    }

    /// Completed transactions in submission order
    pub fn snapshot(&self) -> Vec<Arc<Transaction>> {
        self.history.clone()
    }

    /// Borrow the completed transactions in submission order
    pub fn transactions(&self) -> &[Arc<Transaction>] {
        &self.history
    }

    /// Number of completed transactions
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True if no transaction has been completed since the last clear/reset
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// True while a command waits for its response
    pub fn is_awaiting_response(&self) -> bool {
        self.state.is_awaiting_response()
    }

    /// Session counters
    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    fn discard_all(&mut self) {
        self.state = PairingState::AwaitingCommand;
        self.history.clear();
    }

    /// Append a completed transaction and evict the oldest beyond `max_history`
    fn append(&mut self, transaction: Arc<Transaction>) -> usize {
        self.history.push(transaction);
        self.stats.completed += 1;

        let excess = match self.config.max_history {
            Some(max) => self.history.len().saturating_sub(max.get()),
            None => 0,
        };
        if excess > 0 {
            self.history.drain(..excess);
            self.stats.evicted += excess;
        }
        excess
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(CorrelatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IsoCase, LengthForm};
    use std::num::NonZeroUsize;

    const SELECT: [u8; 4] = [0x00, 0xA4, 0x04, 0x00];
    const OK: [u8; 2] = [0x90, 0x00];

    #[test]
    fn test_pairs_in_submission_order() {
        let mut correlator = Correlator::default();

        assert_eq!(correlator.submit_bytes(SELECT), SubmitOutcome::CommandPending);
        assert!(correlator.is_awaiting_response());
        assert!(matches!(correlator.submit_bytes(OK), SubmitOutcome::Completed { evicted: 0, .. }));
        correlator.submit_bytes(vec![0x00, 0xB0, 0x00, 0x00, 0x10]);
        correlator.submit_bytes(vec![0x01, 0x02, 0x90, 0x00]);

        let history = correlator.snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].command().ins, 0xA4);
        assert_eq!(history[1].command().ins, 0xB0);
        assert_eq!(history[1].response().data, Some(vec![0x01, 0x02]));
        assert!(!correlator.is_awaiting_response());
    }

    #[test]
    fn test_end_to_end_case1() {
        let mut correlator = Correlator::default();
        correlator.submit_bytes(SELECT);
        correlator.submit_bytes(OK);

        let history = correlator.snapshot();
        assert_eq!(history.len(), 1);
        let tx = &history[0];
        assert_eq!(tx.command().header(), SELECT);
        assert_eq!(tx.case(), IsoCase::Case1);
        assert_eq!(tx.response().sw1, 0x90);
        assert_eq!(tx.response().sw2, 0x00);
        assert!(!tx.response().has_data());
    }

    #[test]
    fn test_pending_command_is_never_visible() {
        let mut correlator = Correlator::default();
        correlator.submit_bytes(SELECT);
        assert!(correlator.snapshot().is_empty());
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_sentinel_is_filtered_in_both_states() {
        let mut correlator = Correlator::default();
        let sentinel = vec![0x80, 0x14, 0x05, 0x00, 0x00];

        assert_eq!(correlator.submit_bytes(sentinel.clone()), SubmitOutcome::Filtered);
        assert!(!correlator.is_awaiting_response());

        correlator.submit_bytes(SELECT);
        assert_eq!(correlator.submit_bytes(sentinel), SubmitOutcome::Filtered);
        assert!(correlator.is_awaiting_response());
        assert_eq!(correlator.len(), 0);

        correlator.submit_bytes(OK);
        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.stats().filtered, 2);
    }

    #[test]
    fn test_reset_frame_clears_pending_and_history() {
        let mut correlator = Correlator::default();
        correlator.submit_bytes(SELECT);
        correlator.submit_bytes(OK);
        correlator.submit_bytes(SELECT);

        assert_eq!(correlator.submit(FeedFrame::Reset), SubmitOutcome::Reset);
        assert!(!correlator.is_awaiting_response());
        assert_eq!(correlator.snapshot().len(), 0);

        // The next frame is a command again
        assert_eq!(correlator.submit_bytes(SELECT), SubmitOutcome::CommandPending);
        assert_eq!(correlator.stats().resets, 1);
    }

    #[test]
    fn test_clear_matches_reset_without_counting_it() {
        let mut correlator = Correlator::default();
        correlator.submit_bytes(SELECT);
        correlator.submit_bytes(OK);
        correlator.submit_bytes(SELECT);

        correlator.clear();
        assert!(correlator.is_empty());
        assert!(!correlator.is_awaiting_response());
        assert_eq!(correlator.stats().resets, 0);
        assert_eq!(correlator.stats().completed, 1);
    }

    #[test]
    fn test_bad_command_keeps_awaiting_command() {
        let mut correlator = Correlator::default();
        let outcome = correlator.submit_bytes(vec![0x00, 0xA4, 0x04, 0x00, 0x03, 0xAA]);
        assert_eq!(
            outcome,
            SubmitOutcome::CommandDropped(FormatError::TruncatedData {
                form: LengthForm::Short,
                expected: 3,
                available: 1
            })
        );
        assert!(!correlator.is_awaiting_response());

        correlator.submit_bytes(SELECT);
        correlator.submit_bytes(OK);
        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.stats().commands_dropped, 1);
    }

    #[test]
    fn test_bad_response_drops_pending_and_recovers() {
        let mut correlator = Correlator::default();
        correlator.submit_bytes(SELECT);
        assert!(matches!(
            correlator.submit_bytes(vec![0x90]),
            SubmitOutcome::ResponseDropped(FormatError::TooShort { .. })
        ));
        assert!(!correlator.is_awaiting_response());
        assert!(correlator.is_empty());

        correlator.submit_bytes(vec![0x00, 0xCA, 0x9F, 0x7F, 0x00]);
        correlator.submit_bytes(OK);
        let history = correlator.snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].command().ins, 0xCA);
        assert_eq!(correlator.stats().responses_dropped, 1);
    }

    #[test]
    fn test_max_history_evicts_oldest() {
        let config = CorrelatorConfig::new().with_max_history(NonZeroUsize::new(2).unwrap());
        let mut correlator = Correlator::new(config);
        for ins in [0x01, 0x02, 0x03] {
            correlator.submit_bytes(vec![0x00, ins, 0x00, 0x00]);
            correlator.submit_bytes(OK);
        }

        let history = correlator.snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].command().ins, 0x02);
        assert_eq!(history[1].command().ins, 0x03);
        assert_eq!(correlator.stats().evicted, 1);
    }

    #[test]
    fn test_max_history_of_one_keeps_latest() {
        let config = CorrelatorConfig::new().with_max_history(NonZeroUsize::MIN);
        let mut correlator = Correlator::new(config);
        correlator.submit_bytes(SELECT);
        assert!(matches!(correlator.submit_bytes(OK), SubmitOutcome::Completed { evicted: 0, .. }));
        correlator.submit_bytes(vec![0x00, 0xB0, 0x00, 0x00]);
        assert!(matches!(correlator.submit_bytes(OK), SubmitOutcome::Completed { evicted: 1, .. }));

        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.transactions()[0].command().ins, 0xB0);
    }

    #[test]
    fn test_custom_markers_filter_by_bytes() {
        let config = CorrelatorConfig::new().without_markers().with_marker("80ca9f7f");
        let mut correlator = Correlator::new(config);

        assert_eq!(correlator.submit_bytes(vec![0x80, 0xCA, 0x9F, 0x7F]), SubmitOutcome::Filtered);
        assert_eq!(
            correlator.submit_bytes(vec![0x80, 0x14, 0x05, 0x00, 0x00]),
            SubmitOutcome::CommandPending
        );
        assert_eq!(correlator.stats().filtered, 1);
    }

    #[test]
    fn test_state_machine_without_correlator() {
        let (state, step) = PairingState::AwaitingCommand.advance(RawFrame::new(SELECT.to_vec()));
        assert_eq!(step, Step::CommandPending);
        assert!(state.is_awaiting_response());

        let (state, step) = state.advance(RawFrame::new(OK.to_vec()));
        assert_eq!(state, PairingState::AwaitingCommand);
        match step {
            Step::Completed(tx) => assert_eq!(tx.response().status_word(), 0x9000),
            other => panic!("expected completed transaction, got {:?}", other),
        }
    }
}
