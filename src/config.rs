//! Pipeline configuration
//!
//! All acquisition-device quirks that used to live as scattered literals are
//! collected here as named, overridable fields: the pad-row offsets, the
//! metadata/event-log subject-ID offset, the control-genotype token, and the
//! default resampling bin width.

use serde::{Deserialize, Serialize};

/// Seconds after window start at which the leading pad row is placed
pub const DEFAULT_PAD_START_OFFSET_S: f64 = 0.5;

/// Seconds past the nominal duration at which the trailing pad row is placed.
/// 4 min 49 s matches the acquisition device's trailing record and keeps the
/// pad clear of the next bin edge.
pub const DEFAULT_PAD_END_OVERSHOOT_S: f64 = 289.0;

/// Event logs index subjects from 0 while metadata indexes from 1
pub const DEFAULT_SUBJECT_ID_OFFSET: u32 = 1;

/// Genotypes containing this token (case-insensitive) are control siblings
pub const DEFAULT_CONTROL_GENOTYPE_TOKEN: &str = "w1118";

/// Default bin width for time-windowed aggregation (10 minutes)
pub const DEFAULT_RESAMPLE_BIN_S: f64 = 600.0;

/// Default experiment duration (6 hours)
pub const DEFAULT_EXPT_DURATION_S: f64 = 21_600.0;

/// Placement of the synthetic boundary rows inserted for every
/// (subject, choice) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PadPolicy {
    /// Offset of the leading pad row, in seconds after window start
    pub start_offset_s: f64,
    /// Offset of the trailing pad row, in seconds past the nominal duration
    pub end_overshoot_s: f64,
}

impl Default for PadPolicy {
    fn default() -> Self {
        Self {
            start_offset_s: DEFAULT_PAD_START_OFFSET_S,
            end_overshoot_s: DEFAULT_PAD_END_OVERSHOOT_S,
        }
    }
}

impl PadPolicy {
    /// Elapsed time of the trailing pad row for a given nominal duration
    pub fn end_time_s(&self, expt_duration_s: f64) -> f64 {
        expt_duration_s + self.end_overshoot_s
    }
}

/// Experiment-level configuration threaded through loading and aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssayConfig {
    /// Declared experiment duration, in seconds
    pub expt_duration_s: f64,
    /// Pad-row placement
    pub pad: PadPolicy,
    /// Offset added to event-log local IDs to match metadata local IDs
    pub subject_id_offset: u32,
    /// Substring marking a genotype as the control strain
    pub control_genotype_token: String,
    /// Default bin width for time-windowed aggregation, in seconds
    pub resample_bin_s: f64,
}

impl Default for AssayConfig {
    fn default() -> Self {
        Self {
            expt_duration_s: DEFAULT_EXPT_DURATION_S,
            pad: PadPolicy::default(),
            subject_id_offset: DEFAULT_SUBJECT_ID_OFFSET,
            control_genotype_token: DEFAULT_CONTROL_GENOTYPE_TOKEN.to_string(),
            resample_bin_s: DEFAULT_RESAMPLE_BIN_S,
        }
    }
}

impl AssayConfig {
    /// Configuration for an experiment of the given duration in seconds
    pub fn with_duration_s(expt_duration_s: f64) -> Self {
        Self {
            expt_duration_s,
            ..Self::default()
        }
    }

    /// Configuration for an experiment of the given duration in minutes
    pub fn with_duration_minutes(minutes: f64) -> Self {
        Self::with_duration_s(minutes * 60.0)
    }

    /// The default full-experiment window, in seconds
    pub fn full_window(&self) -> (f64, f64) {
        (0.0, self.expt_duration_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pad_policy() {
        let policy = PadPolicy::default();
        assert_eq!(policy.start_offset_s, 0.5);
        assert_eq!(policy.end_time_s(21_600.0), 21_889.0);
    }

    #[test]
    fn test_duration_constructors() {
        let config = AssayConfig::with_duration_minutes(360.0);
        assert_eq!(config.expt_duration_s, 21_600.0);
        assert_eq!(config.full_window(), (0.0, 21_600.0));
        assert_eq!(config.subject_id_offset, 1);
    }

    #[test]
    fn test_config_round_trips_as_json() {
        let config = AssayConfig::with_duration_s(7_200.0);
        let json = serde_json::to_string(&config).unwrap();
        let back: AssayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
