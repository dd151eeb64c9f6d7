//! Schema normalization for the two raw table kinds
//!
//! Raw acquisition-device CSVs arrive with device-specific column spellings.
//! The normalizers here rename them to the canonical schema, fill defaults,
//! and drop rows the device marked as unrecorded. Which rename/validation
//! table applies is selected by an explicit [`TableKind`] tag rather than by
//! sniffing the table shape.

pub mod eventlog;
pub mod metadata;

pub use eventlog::{normalize_eventlog, EventLogTable};
pub use metadata::{normalize_metadata, MetadataTable};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two raw table kinds an experiment is loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Metadata,
    EventLog,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Metadata => "metadata",
            TableKind::EventLog => "event log",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-device column spellings and sentinels
pub(crate) mod source_col {
    /// Metadata: subject-local integer ID
    pub const ID: &str = "ID";
    pub const GENOTYPE: &str = "Genotype";
    pub const TEMPERATURE: &str = "Temperature";
    pub const SEX: &str = "Sex";
    /// Chamber occupancy; optional, defaults to 1
    pub const FLY_COUNT: &str = "#Flies";
    /// Prefix of the choice/tube label columns ("Food 1", "Food 2", ...)
    pub const FOOD_PREFIX: &str = "Food ";
    /// Already-canonical tube prefix, accepted on re-ingestion
    pub const TUBE_PREFIX: &str = "Tube";

    /// Event log: subject-local integer ID (0-based, offset from metadata)
    pub const FLY_ID: &str = "FlyID";
    pub const CHOICE_IDX: &str = "ChoiceIdx";
    pub const RELATIVE_TIME: &str = "RelativeTime-s";
    pub const DURATION: &str = "Duration-ms";
    pub const VOLUME: &str = "Volume-mm3";
    /// Source-device tag; the sentinel below marks unrecorded rows
    pub const AVI_FILE: &str = "AviFile";
    pub const VALID: &str = "Valid";
    /// Optional free-text state tag column
    pub const FEED_STATE: &str = "FeedState";

    /// Device tag value meaning "no recording"; such rows are dropped
    pub const NO_RECORDING: &str = "Null";
}

/// Parse a CSV field into an optional float; empty and N/A fields are `None`
pub(crate) fn parse_optional_f64(field: &str) -> Option<f64> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("n/a")
    {
        return None;
    }
    trimmed.parse().ok()
}

/// Parse a CSV field as a boolean flag; empty fields are false
pub(crate) fn parse_bool(field: &str) -> bool {
    let trimmed = field.trim();
    trimmed.eq_ignore_ascii_case("true") || trimmed == "1"
}
