//! Event-log table normalization
//!
//! One row per recorded feeding event. Rows the device tagged as unrecorded
//! and rows with a negative elapsed time are dropped at ingestion. Event-log
//! local IDs are offset to match the metadata IDs before the composite
//! subject identifier is formed.

use crate::config::AssayConfig;
use crate::error::{AssayError, Result};
use crate::schema::metadata::compose_subject_id;
use crate::schema::{parse_bool, parse_optional_f64, source_col, TableKind};
use crate::types::{FeedEvent, DEFAULT_EVENT_STATE};
use log::{debug, warn};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A normalized event-log table for one source file
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogTable {
    /// Label of the source file pair, used to compose subject identifiers
    pub source: String,
    pub rows: Vec<FeedEvent>,
}

impl EventLogTable {
    /// Distinct 0-based choice indices observed in this log, ascending
    pub fn observed_choices(&self) -> Vec<u32> {
        let mut choices: Vec<u32> = self.rows.iter().map(|row| row.choice).collect();
        choices.sort_unstable();
        choices.dedup();
        choices
    }
}

/// Normalize an event-log CSV from a file on disk
pub fn from_path(path: &Path, source_label: &str, config: &AssayConfig) -> Result<EventLogTable> {
    let file = File::open(path)?;
    normalize_eventlog(file, source_label, config)
}

/// Normalize a raw event-log table read from `reader`
pub fn normalize_eventlog<R: Read>(
    reader: R,
    source_label: &str,
    config: &AssayConfig,
) -> Result<EventLogTable> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let find = |name: &str| headers.iter().position(|h| h.trim() == name);
    let require = |name: &str| {
        find(name).ok_or_else(|| AssayError::Schema {
            kind: TableKind::EventLog,
            column: name.to_string(),
        })
    };

    let fly_id_idx = require(source_col::FLY_ID)?;
    let choice_idx_idx = require(source_col::CHOICE_IDX)?;
    let time_idx = require(source_col::RELATIVE_TIME)?;
    let duration_idx = require(source_col::DURATION)?;
    let volume_idx = require(source_col::VOLUME)?;
    let avi_idx = require(source_col::AVI_FILE)?;
    let valid_idx = require(source_col::VALID)?;
    let state_idx = find(source_col::FEED_STATE);

    let mut rows = Vec::new();
    let mut loaded = 0usize;
    for record in csv_reader.records() {
        let record = record?;
        loaded += 1;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        // Drop rows the device flagged as unrecorded.
        if field(avi_idx) == source_col::NO_RECORDING {
            continue;
        }

        let time_s = match parse_optional_f64(field(time_idx)) {
            Some(time) => time,
            None => {
                warn!(
                    "event log {}: dropping row with unreadable elapsed time `{}`",
                    source_label,
                    field(time_idx)
                );
                continue;
            }
        };
        // Negative elapsed times are invalid by contract.
        if time_s < 0.0 {
            continue;
        }

        let local_id: u32 = field(fly_id_idx).parse().map_err(|_| {
            AssayError::Validation(format!(
                "event log {}: subject ID `{}` is not an integer",
                source_label,
                field(fly_id_idx)
            ))
        })?;
        let choice: u32 = field(choice_idx_idx).parse().map_err(|_| {
            AssayError::Validation(format!(
                "event log {}: choice index `{}` is not an integer",
                source_label,
                field(choice_idx_idx)
            ))
        })?;

        let state = state_idx
            .map(|idx| field(idx))
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_EVENT_STATE)
            .to_string();

        rows.push(FeedEvent {
            subject: compose_subject_id(source_label, local_id + config.subject_id_offset),
            choice,
            time_s,
            duration_ms: parse_optional_f64(field(duration_idx)),
            volume_ul: parse_optional_f64(field(volume_idx)),
            valid: parse_bool(field(valid_idx)),
            state,
        });
    }

    if loaded == 0 {
        return Err(AssayError::Validation(format!(
            "event log {} has 0 rows",
            source_label
        )));
    }
    debug!(
        "event log {}: kept {} of {} rows",
        source_label,
        rows.len(),
        loaded
    );

    Ok(EventLogTable {
        source: source_label.to_string(),
        rows,
    })
}
