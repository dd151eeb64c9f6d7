//! Feedkit - reconciliation and metric-derivation engine for feeding-assay
//! event logs
//!
//! Feedkit turns raw per-event logs and per-subject metadata from a
//! behavioral assay into a single validated time-series dataset per subject
//! through a deterministic pipeline: schema normalization → subject
//! reconciliation → boundary padding → metadata join + metric derivation →
//! categorical registration. The merged table then feeds time-windowed,
//! cumulative, and contrast-ready aggregations consumed by downstream
//! plotting and statistics tooling.
//!
//! ## Modules
//!
//! - **schema**: normalize raw metadata/event-log CSVs to the canonical schema
//! - **reconcile**: detect subjects that never produced a valid event
//! - **padding**: synthetic boundary rows spanning the experiment window
//! - **metrics**: derived per-event quantities (volumes, speeds, normalized)
//! - **categories**: stable, ordered categorical encodings for grouping
//! - **timecourse** / **contrast**: comparison-ready aggregation tables
//! - **experiment**: load/merge orchestration and snapshot persistence

pub mod categories;
pub mod config;
pub mod contrast;
pub mod error;
pub mod experiment;
pub mod metrics;
pub mod padding;
pub mod reconcile;
pub mod schema;
pub mod timecourse;
pub mod types;

pub use categories::CategoryRegistry;
pub use config::{AssayConfig, PadPolicy};
pub use contrast::{ConsumptionTable, ContrastRequest, LatencyTable, PercentFeedingRow};
pub use error::{AssayError, Result};
pub use experiment::Experiment;
pub use schema::TableKind;
pub use timecourse::{CumulativeTable, TimecourseTable, WindowRequest};
pub use types::{Feed, FeedEvent, FeedMetrics, Status, SubjectRecord};

/// Feedkit version recorded in experiment snapshots
pub const FEEDKIT_VERSION: &str = env!("CARGO_PKG_VERSION");
