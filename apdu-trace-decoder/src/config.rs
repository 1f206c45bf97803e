//! Correlator configuration types
//!
//! The correlator needs very little configuration: which payloads are known to
//! never receive a response, and optionally how much history to keep.

use crate::types::RawFrame;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Vendor command observed in traces that never gets a paired response
pub const DEFAULT_NO_RESPONSE_MARKER: &str = "80 14 05 00 00";

/// Configuration for the correlator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Payloads (spaced hex) discarded before pairing
    #[serde(default = "default_markers")]
    pub no_response_markers: Vec<String>,

    /// Optional: keep at most this many completed transactions (oldest evicted first).
    /// Zero is rejected when the configuration is loaded.
    #[serde(default)]
    pub max_history: Option<NonZeroUsize>,
}

fn default_markers() -> Vec<String> {
    vec![DEFAULT_NO_RESPONSE_MARKER.to_string()]
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            no_response_markers: default_markers(),
            max_history: None,
        }
    }
}

impl CorrelatorConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a no-response marker (spaced or packed hex)
    pub fn with_marker(mut self, marker: impl AsRef<str>) -> Self {
        self.no_response_markers.push(normalize_hex(marker.as_ref()));
        self
    }

    /// Builder method: add several no-response markers
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for marker in markers {
            self = self.with_marker(marker);
        }
        self
    }

    /// Builder method: drop every no-response marker, including the default one
    pub fn without_markers(mut self) -> Self {
        self.no_response_markers.clear();
        self
    }

    /// Builder method: bound the completed history
    pub fn with_max_history(mut self, max: NonZeroUsize) -> Self {
        self.max_history = Some(max);
        self
    }

    /// Parse the configured markers into the byte form used for filtering
    pub fn marker_set(&self) -> MarkerSet {
        let markers = self
            .no_response_markers
            .iter()
            .filter_map(|marker| match parse_hex(marker) {
                Some(bytes) if !bytes.is_empty() => Some(bytes),
                _ => {
                    log::warn!("Ignoring invalid no-response marker: {:?}", marker);
                    None
                }
            })
            .collect();
        MarkerSet { markers }
    }
}

/// No-response payloads in byte form, compared directly against frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerSet {
    markers: Vec<Vec<u8>>,
}

impl MarkerSet {
    /// Check if a frame is one of the no-response payloads
    pub fn contains(&self, frame: &RawFrame) -> bool {
        self.markers
            .iter()
            .any(|marker| marker.as_slice() == frame.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Decode spaced (`80 14 05`) or packed (`801405`) hex in any case
pub fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let packed: String = input.split_whitespace().collect();
    hex::decode(packed).ok()
}

/// Bring a hex string to the canonical `AA BB CC` form
///
/// Invalid input is returned uppercased and is skipped by [`MarkerSet`].
pub fn normalize_hex(input: &str) -> String {
    match parse_hex(input) {
        Some(bytes) => crate::transaction::to_hex(&bytes),
        None => input.trim().to_uppercase(),
    }
}
