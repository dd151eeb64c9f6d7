//! Core types for the feedkit pipeline
//!
//! This module defines the rows that flow through each stage: normalized
//! subject records, feed events (real and synthetic), and merged feeds with
//! their derived metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State tag carried by synthetic boundary rows
pub const PAD_STATE: &str = "PAD";

/// State tag given to real events whose source log carries no state column
pub const DEFAULT_EVENT_STATE: &str = "FEED";

/// Canonical names of the factor columns used as grouping keys
pub mod col {
    pub const GENOTYPE: &str = "Genotype";
    pub const STATUS: &str = "Status";
    pub const TEMPERATURE: &str = "Temperature";
    pub const SEX: &str = "Sex";
    pub const FOOD_CHOICE: &str = "FoodChoice";

    /// The canonical factor columns every merged table carries
    pub const CANONICAL: [&str; 5] = [GENOTYPE, STATUS, TEMPERATURE, SEX, FOOD_CHOICE];
}

/// Binary status derived from genotype: control-strain carriers are
/// siblings, everything else is offspring of the cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Sibling,
    Offspring,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Sibling => "Sibling",
            Status::Offspring => "Offspring",
        }
    }

    /// Derive status from a genotype string and the control-strain token
    pub fn from_genotype(genotype: &str, control_token: &str) -> Self {
        if genotype.to_lowercase().contains(&control_token.to_lowercase()) {
            Status::Sibling
        } else {
            Status::Offspring
        }
    }
}

/// One experimental subject (an animal or chamber) from a metadata table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    /// Composite identifier: source-file label plus local ID
    pub id: String,
    /// Local integer ID within the source file
    pub local_id: u32,
    /// Label of the source file pair this subject came from
    pub source: String,
    pub genotype: String,
    pub status: Status,
    pub temperature: String,
    pub sex: String,
    /// Number of subjects sharing the chamber; at least 1
    pub occupancy: u32,
    /// Tube labels keyed by 1-based tube index
    pub tubes: BTreeMap<u32, String>,
    /// Whether at least one complete real event was observed for this subject
    pub ever_fed: bool,
    /// User-attached per-subject tags
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl SubjectRecord {
    /// Tube label for a 0-based choice index
    pub fn tube_for_choice(&self, choice: u32) -> Option<&str> {
        self.tubes.get(&(choice + 1)).map(String::as_str)
    }
}

/// One recorded or synthetic feeding event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    /// Composite subject identifier (foreign key into the subject table)
    pub subject: String,
    /// 0-based choice index identifying the tube
    pub choice: u32,
    /// Elapsed time since experiment start, in seconds
    pub time_s: f64,
    /// Event duration in milliseconds; null on pad rows
    pub duration_ms: Option<f64>,
    /// Raw feed volume in microliters; null on pad rows
    pub volume_ul: Option<f64>,
    /// Device validity flag; false on pad rows
    pub valid: bool,
    /// Free-text state tag; [`PAD_STATE`] on synthetic rows
    pub state: String,
}

impl FeedEvent {
    /// Whether this is a synthetic boundary row
    pub fn is_pad(&self) -> bool {
        self.state == PAD_STATE
    }

    /// Whether this is a real row with all measured fields present
    pub fn is_complete(&self) -> bool {
        !self.is_pad() && self.volume_ul.is_some() && self.duration_ms.is_some()
    }
}

/// Derived per-event quantities; pure functions of the event and the
/// subject's occupancy, recomputable idempotently
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMetrics {
    /// Feed volume in nanoliters
    pub volume_nl: Option<f64>,
    /// Event duration in seconds
    pub duration_s: Option<f64>,
    /// Feed speed in nl/s; `None` when the duration is zero (undefined,
    /// never a NaN)
    pub speed_nl_per_s: Option<f64>,
    /// Feed volume per subject in the chamber, in microliters
    pub volume_per_subject_ul: Option<f64>,
    /// Valid-event count (1 or 0) per subject in the chamber
    pub count_per_subject: Option<f64>,
    /// Feed speed per subject in the chamber, in µl/s
    pub speed_per_subject_ul_s: Option<f64>,
}

/// One row of the merged table: a feed event joined with its subject's
/// metadata and annotated with derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub event: FeedEvent,
    /// Tube label resolved from the subject's tube map and the choice index
    pub food_choice: String,
    pub genotype: String,
    pub status: Status,
    pub temperature: String,
    pub sex: String,
    pub occupancy: u32,
    /// User-attached per-subject tags, mirrored from the subject record
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub metrics: FeedMetrics,
}

impl Feed {
    /// Value of a factor column on this row, by canonical or label name
    pub fn factor(&self, column: &str) -> Option<&str> {
        match column {
            col::GENOTYPE => Some(&self.genotype),
            col::STATUS => Some(self.status.as_str()),
            col::TEMPERATURE => Some(&self.temperature),
            col::SEX => Some(&self.sex),
            col::FOOD_CHOICE => Some(&self.food_choice),
            other => self.labels.get(other).map(String::as_str),
        }
    }

    /// Whether the event falls inside a half-open `[start, end)` window
    pub fn in_window(&self, window: (f64, f64)) -> bool {
        self.event.time_s >= window.0 && self.event.time_s < window.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_genotype() {
        assert_eq!(Status::from_genotype("w1118", "w1118"), Status::Sibling);
        assert_eq!(Status::from_genotype("W1118-x", "w1118"), Status::Sibling);
        assert_eq!(Status::from_genotype("trpA1>Chr", "w1118"), Status::Offspring);
    }

    #[test]
    fn test_tube_lookup_uses_one_based_index() {
        let mut tubes = BTreeMap::new();
        tubes.insert(1, "5% sucrose".to_string());
        tubes.insert(2, "5% yeast extract".to_string());
        let subject = SubjectRecord {
            id: "2017-09-06_1000_Fly1".to_string(),
            local_id: 1,
            source: "2017-09-06_1000".to_string(),
            genotype: "w1118".to_string(),
            status: Status::Sibling,
            temperature: "22".to_string(),
            sex: "F".to_string(),
            occupancy: 1,
            tubes,
            ever_fed: true,
            labels: BTreeMap::new(),
        };

        assert_eq!(subject.tube_for_choice(0), Some("5% sucrose"));
        assert_eq!(subject.tube_for_choice(1), Some("5% yeast extract"));
        assert_eq!(subject.tube_for_choice(2), None);
    }

    #[test]
    fn test_pad_rows_are_never_complete() {
        let pad = FeedEvent {
            subject: "s".to_string(),
            choice: 0,
            time_s: 0.5,
            duration_ms: None,
            volume_ul: None,
            valid: false,
            state: PAD_STATE.to_string(),
        };
        assert!(pad.is_pad());
        assert!(!pad.is_complete());

        let real = FeedEvent {
            subject: "s".to_string(),
            choice: 0,
            time_s: 10.0,
            duration_ms: Some(1000.0),
            volume_ul: Some(0.01),
            valid: true,
            state: DEFAULT_EVENT_STATE.to_string(),
        };
        assert!(!real.is_pad());
        assert!(real.is_complete());
    }
}
