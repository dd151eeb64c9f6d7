//! Synthetic boundary rows
//!
//! Every (subject, choice) pair receives exactly two pad rows: one just
//! after window start and one just past the nominal duration. This
//! guarantees that every subject's series spans the full experiment window,
//! so time-windowed aggregation returns a defined, zero-filled value for
//! every subject even when it produced no real events.

use crate::config::AssayConfig;
use crate::schema::{EventLogTable, MetadataTable};
use crate::types::{FeedEvent, PAD_STATE};
use log::debug;

/// Append two pad rows per (subject, choice) pair to the event log.
///
/// The choice set is the set of choice indices observed in the log; a log
/// whose rows were all dropped at ingestion falls back to choice 0 so that
/// every subject still gets a series.
pub fn add_pad_rows(metadata: &MetadataTable, events: &mut EventLogTable, config: &AssayConfig) {
    let mut choices = events.observed_choices();
    if choices.is_empty() {
        choices.push(0);
    }

    let start_s = config.pad.start_offset_s;
    let end_s = config.pad.end_time_s(config.expt_duration_s);

    let mut added = 0usize;
    for subject in &metadata.rows {
        for &choice in &choices {
            for time_s in [start_s, end_s] {
                events.rows.push(pad_row(&subject.id, choice, time_s));
                added += 1;
            }
        }
    }
    debug!(
        "padded {} with {} synthetic rows ({} subjects x {} choices)",
        events.source,
        added,
        metadata.rows.len(),
        choices.len()
    );
}

fn pad_row(subject: &str, choice: u32, time_s: f64) -> FeedEvent {
    FeedEvent {
        subject: subject.to_string(),
        choice,
        time_s,
        duration_ms: None,
        volume_ul: None,
        valid: false,
        state: PAD_STATE.to_string(),
    }
}
