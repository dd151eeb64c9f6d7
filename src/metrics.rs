//! Derived per-event metrics
//!
//! Pure functions of an event and its subject's chamber occupancy, applied
//! after the metadata join. Recomputing them is idempotent. A zero duration
//! makes the speed metrics undefined (`None`), never a NaN; summing
//! aggregations treat undefined metrics as zero contribution, while minima
//! and ratio recomputation exclude them.

use crate::types::{Feed, FeedEvent, FeedMetrics};

/// Microliters to nanoliters
pub const UL_TO_NL: f64 = 1000.0;

/// Milliseconds to seconds
pub const MS_TO_S: f64 = 1000.0;

/// Compute all derived metrics for one event given its chamber occupancy.
///
/// Occupancy is coerced to float before any division.
pub fn compute(event: &FeedEvent, occupancy: u32) -> FeedMetrics {
    let occupancy = f64::from(occupancy.max(1));

    let volume_nl = event.volume_ul.map(|volume| volume * UL_TO_NL);
    let duration_s = event.duration_ms.map(|duration| duration / MS_TO_S);

    let speed_nl_per_s = ratio(volume_nl, duration_s);
    let volume_per_subject_ul = event.volume_ul.map(|volume| volume / occupancy);
    let count_per_subject = if event.is_pad() {
        None
    } else {
        Some(f64::from(u8::from(event.valid)) / occupancy)
    };
    let speed_per_subject_ul_s =
        ratio(event.volume_ul, duration_s).map(|speed| speed / occupancy);

    FeedMetrics {
        volume_nl,
        duration_s,
        speed_nl_per_s,
        volume_per_subject_ul,
        count_per_subject,
        speed_per_subject_ul_s,
    }
}

/// Annotate a merged feed row in place
pub fn annotate(feed: &mut Feed) {
    feed.metrics = compute(&feed.event, feed.occupancy);
}

/// `numerator / denominator`, undefined when either side is missing or the
/// denominator is zero
fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(numerator), Some(denominator)) if denominator > 0.0 => {
            Some(numerator / denominator)
        }
        _ => None,
    }
}
