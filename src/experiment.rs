//! Experiment loading and orchestration
//!
//! Ties the pipeline together: normalize each metadata/event-log file pair,
//! reconcile subjects, pad, assign food choices, join metadata onto events,
//! derive metrics, and build the category registry. Also owns user-attached
//! labels, experiment merging, and snapshot persistence.
//!
//! Concatenation across source files is deterministic: file pairs are
//! processed in event-log file-name order and merged feeds are sorted by
//! subject identifier, then elapsed time.

use crate::categories::CategoryRegistry;
use crate::config::AssayConfig;
use crate::contrast::{
    self, ConsumptionTable, ContrastRequest, LatencyTable, PercentFeedingRow,
};
use crate::error::{AssayError, Result};
use crate::metrics;
use crate::padding::add_pad_rows;
use crate::reconcile::never_fed_subjects;
use crate::schema::{eventlog, metadata, EventLogTable, MetadataTable};
use crate::timecourse::{self, CumulativeTable, TimecourseTable, WindowRequest};
use crate::types::{col, Feed, FeedMetrics, SubjectRecord};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Event-log file-name prefix used for discovery
pub const FEEDLOG_PREFIX: &str = "FeedLog";

/// A metadata file name is the event-log name with this prefix instead
pub const METADATA_PREFIX: &str = "MetaData";

/// Snapshot format version understood by this build
const SNAPSHOT_FORMAT: u32 = 1;

/// One normalized, reconciled, padded source file pair
struct SourceBatch {
    metadata: MetadataTable,
    events: EventLogTable,
    never_fed: BTreeSet<String>,
}

/// A loaded experiment: the merged, metric-annotated feed table, its subject
/// table, and the category registry built from them
#[derive(Debug, Clone)]
pub struct Experiment {
    config: AssayConfig,
    subjects: Vec<SubjectRecord>,
    feeds: Vec<Feed>,
    registry: CategoryRegistry,
    sources: Vec<String>,
    added_labels: Vec<String>,
}

impl Experiment {
    /// Load every `FeedLog*.csv` in `folder` along with its corresponding
    /// `MetaData*.csv`, derived by the file-naming convention.
    pub fn from_folder(folder: &Path, config: AssayConfig) -> Result<Self> {
        let mut names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(FEEDLOG_PREFIX) && name.ends_with(".csv") {
                names.push(name);
            }
        }
        names.sort();
        if names.is_empty() {
            return Err(AssayError::Validation(format!(
                "no {}*.csv files found in {}",
                FEEDLOG_PREFIX,
                folder.display()
            )));
        }

        let mut pairs = Vec::with_capacity(names.len());
        for name in names {
            let metadata_name = name.replace(FEEDLOG_PREFIX, METADATA_PREFIX);
            let metadata_path = folder.join(&metadata_name);
            if !metadata_path.exists() {
                return Err(AssayError::Validation(format!(
                    "no {} file found for {}",
                    metadata_name, name
                )));
            }
            pairs.push((metadata_path, folder.join(name)));
        }
        Self::from_pairs(&pairs, config)
    }

    /// Load explicit (metadata, event log) file pairs
    pub fn from_pairs(pairs: &[(PathBuf, PathBuf)], config: AssayConfig) -> Result<Self> {
        let mut pairs: Vec<&(PathBuf, PathBuf)> = pairs.iter().collect();
        pairs.sort_by_key(|(_, eventlog_path)| eventlog_path.clone());

        let mut batches = Vec::with_capacity(pairs.len());
        for (metadata_path, eventlog_path) in pairs {
            let file_name = eventlog_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let label = source_label(&file_name);
            debug!("loading source pair {} as `{}`", file_name, label);

            let metadata = metadata::from_path(metadata_path, &label, &config)?;
            let mut events = eventlog::from_path(eventlog_path, &label, &config)?;
            // Reconciliation must see the log before padding, or every
            // subject would appear to have events.
            let never_fed = never_fed_subjects(&metadata, &events);
            add_pad_rows(&metadata, &mut events, &config);
            batches.push(SourceBatch {
                metadata,
                events,
                never_fed,
            });
        }
        Self::assemble(batches, config)
    }

    /// Concatenate normalized batches, assign food choices, join metadata
    /// onto events, derive metrics, and build the registry
    fn assemble(batches: Vec<SourceBatch>, config: AssayConfig) -> Result<Self> {
        let mut subjects: Vec<SubjectRecord> = Vec::new();
        let mut subject_index: BTreeMap<String, usize> = BTreeMap::new();
        let mut feeds: Vec<Feed> = Vec::new();
        let mut sources = Vec::new();
        let mut never_fed_all: BTreeSet<String> = BTreeSet::new();

        for batch in batches {
            sources.push(batch.events.source.clone());
            never_fed_all.extend(batch.never_fed);

            for subject in batch.metadata.rows {
                if subject_index.contains_key(&subject.id) {
                    return Err(AssayError::Validation(format!(
                        "duplicate subject identifier {}",
                        subject.id
                    )));
                }
                subject_index.insert(subject.id.clone(), subjects.len());
                subjects.push(subject);
            }

            for event in batch.events.rows {
                let Some(&index) = subject_index.get(&event.subject) else {
                    warn!(
                        "dropping event for subject {} absent from metadata",
                        event.subject
                    );
                    continue;
                };
                let subject = &subjects[index];
                let food_choice = match subject.tube_for_choice(event.choice) {
                    Some(label) => label.to_string(),
                    None => {
                        let reason = AssayError::ChoiceLookup {
                            subject: event.subject.clone(),
                            choice: event.choice,
                        };
                        warn!("{}; row dropped", reason);
                        continue;
                    }
                };
                let mut feed = Feed {
                    event,
                    food_choice,
                    genotype: subject.genotype.clone(),
                    status: subject.status,
                    temperature: subject.temperature.clone(),
                    sex: subject.sex.clone(),
                    occupancy: subject.occupancy,
                    labels: subject.labels.clone(),
                    metrics: FeedMetrics::default(),
                };
                metrics::annotate(&mut feed);
                feeds.push(feed);
            }
        }

        for subject in &mut subjects {
            subject.ever_fed = !never_fed_all.contains(&subject.id);
        }
        sort_feeds(&mut feeds);

        let registry = CategoryRegistry::from_merged(&subjects, &feeds);
        Ok(Self {
            config,
            subjects,
            feeds,
            registry,
            sources,
            added_labels: Vec::new(),
        })
    }

    pub fn config(&self) -> &AssayConfig {
        &self.config
    }

    pub fn subjects(&self) -> &[SubjectRecord] {
        &self.subjects
    }

    /// The merged, padded, metric-annotated feed table
    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    /// The category registry built once after the merge
    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    /// Labels of the loaded source file pairs
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Names of user-attached labels
    pub fn added_labels(&self) -> &[String] {
        &self.added_labels
    }

    pub fn genotypes(&self) -> Vec<String> {
        self.category_values(col::GENOTYPE)
    }

    pub fn temperatures(&self) -> Vec<String> {
        self.category_values(col::TEMPERATURE)
    }

    pub fn sexes(&self) -> Vec<String> {
        self.category_values(col::SEX)
    }

    pub fn food_choices(&self) -> Vec<String> {
        self.category_values(col::FOOD_CHOICE)
    }

    /// Distinct chamber occupancies, ascending
    pub fn occupancies(&self) -> Vec<u32> {
        let mut occupancies: Vec<u32> =
            self.subjects.iter().map(|subject| subject.occupancy).collect();
        occupancies.sort_unstable();
        occupancies.dedup();
        occupancies
    }

    fn category_values(&self, column: &str) -> Vec<String> {
        self.registry
            .categories(column)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Attach a constant-valued label to every subject
    pub fn attach_label_value(&mut self, name: &str, value: &str) -> Result<()> {
        self.check_label_name(name)?;
        let value = value.to_string();
        self.set_label(name, |_| Some(value.clone()));
        Ok(())
    }

    /// Attach a label built by joining existing subject-level factor columns
    pub fn attach_label_from_columns(
        &mut self,
        name: &str,
        columns: &[&str],
        sep: &str,
    ) -> Result<()> {
        self.check_label_name(name)?;
        if columns.is_empty() {
            return Err(AssayError::Configuration(
                "at least one source column is required".to_string(),
            ));
        }
        for column in columns {
            let known = col::CANONICAL.contains(column) && *column != col::FOOD_CHOICE;
            if !known && !self.added_labels.iter().any(|label| label == column) {
                return Err(AssayError::Configuration(format!(
                    "`{}` is not a subject-level column",
                    column
                )));
            }
        }

        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let sep = sep.to_string();
        self.set_label(name, move |subject| {
            let parts: Vec<&str> = columns
                .iter()
                .filter_map(|column| subject_factor(subject, column))
                .collect();
            Some(parts.join(&sep))
        });
        Ok(())
    }

    /// Remove a previously attached label
    pub fn remove_label(&mut self, name: &str) -> Result<()> {
        let Some(position) = self.added_labels.iter().position(|label| label == name) else {
            return Err(AssayError::Configuration(format!(
                "`{}` is not an attached label",
                name
            )));
        };
        self.added_labels.remove(position);
        for subject in &mut self.subjects {
            subject.labels.remove(name);
        }
        for feed in &mut self.feeds {
            feed.labels.remove(name);
        }
        self.rebuild_registry();
        Ok(())
    }

    fn check_label_name(&self, name: &str) -> Result<()> {
        if col::CANONICAL.contains(&name) {
            return Err(AssayError::Configuration(format!(
                "`{}` is a canonical column and cannot be used as a label name",
                name
            )));
        }
        Ok(())
    }

    fn set_label(&mut self, name: &str, value_for: impl Fn(&SubjectRecord) -> Option<String>) {
        let values: Vec<Option<String>> = self.subjects.iter().map(&value_for).collect();
        let by_id: BTreeMap<&str, &Option<String>> = self
            .subjects
            .iter()
            .zip(&values)
            .map(|(subject, value)| (subject.id.as_str(), value))
            .collect();

        for feed in &mut self.feeds {
            if let Some(Some(value)) = by_id.get(feed.event.subject.as_str()) {
                feed.labels.insert(name.to_string(), value.clone());
            }
        }
        for (subject, value) in self.subjects.iter_mut().zip(values) {
            if let Some(value) = value {
                subject.labels.insert(name.to_string(), value);
            }
        }
        if !self.added_labels.iter().any(|label| label == name) {
            self.added_labels.push(name.to_string());
        }
        self.rebuild_registry();
    }

    /// Registry is rebuilt, not mutated, whenever the merged tables change
    fn rebuild_registry(&mut self) {
        self.registry = CategoryRegistry::from_merged(&self.subjects, &self.feeds);
    }

    /// Combine two experiments into one, rebuilding the registry.
    ///
    /// The resulting duration is the longer of the two, so the combined
    /// window covers both assays.
    pub fn merge(mut self, other: Experiment) -> Result<Experiment> {
        let known: BTreeSet<&str> =
            self.subjects.iter().map(|subject| subject.id.as_str()).collect();
        if let Some(duplicate) = other
            .subjects
            .iter()
            .find(|subject| known.contains(subject.id.as_str()))
        {
            return Err(AssayError::Validation(format!(
                "duplicate subject identifier {} across experiments",
                duplicate.id
            )));
        }

        self.config.expt_duration_s = self.config.expt_duration_s.max(other.config.expt_duration_s);
        self.subjects.extend(other.subjects);
        self.feeds.extend(other.feeds);
        self.sources.extend(other.sources);
        self.sources.sort();
        self.sources.dedup();
        for label in other.added_labels {
            if !self.added_labels.contains(&label) {
                self.added_labels.push(label);
            }
        }
        sort_feeds(&mut self.feeds);
        self.rebuild_registry();
        Ok(self)
    }

    /// Windowed timecourse aggregation over this experiment's feeds
    pub fn windowed(&self, request: &WindowRequest<'_>) -> Result<TimecourseTable> {
        timecourse::windowed(&self.feeds, &self.registry, request)
    }

    /// Cumulative aggregation over this experiment's feeds
    pub fn cumulative(&self, request: &WindowRequest<'_>) -> Result<CumulativeTable> {
        timecourse::cumulative(&self.feeds, &self.registry, request)
    }

    /// Per-subject volume/duration contrast table
    pub fn consumption_contrast(&self, request: &ContrastRequest<'_>) -> Result<ConsumptionTable> {
        contrast::consumption(&self.feeds, &self.registry, request)
    }

    /// Per-subject latency contrast table
    pub fn latency_contrast(&self, request: &ContrastRequest<'_>) -> Result<LatencyTable> {
        contrast::latency(&self.feeds, &self.registry, request)
    }

    /// Percent-feeding summary per facet group
    pub fn percent_feeding(
        &self,
        facets: &[&str],
        window: (f64, f64),
    ) -> Result<Vec<PercentFeedingRow>> {
        contrast::percent_feeding(&self.feeds, &self.registry, facets, window)
    }

    /// Serialize the whole experiment to a JSON snapshot file
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            version: crate::FEEDKIT_VERSION.to_string(),
            instance_id: Uuid::new_v4(),
            saved_at: Utc::now(),
            config: self.config.clone(),
            sources: self.sources.clone(),
            added_labels: self.added_labels.clone(),
            subjects: self.subjects.clone(),
            feeds: self.feeds.clone(),
            registry: self.registry.clone(),
        };
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), &snapshot)?;
        Ok(())
    }

    /// Reload an experiment from a snapshot file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(AssayError::Validation(format!(
                "snapshot format {} is not supported (expected {})",
                snapshot.format, SNAPSHOT_FORMAT
            )));
        }
        Ok(Self {
            config: snapshot.config,
            subjects: snapshot.subjects,
            feeds: snapshot.feeds,
            registry: snapshot.registry,
            sources: snapshot.sources,
            added_labels: snapshot.added_labels,
        })
    }
}

/// On-disk representation of a saved experiment
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    version: String,
    instance_id: Uuid,
    saved_at: DateTime<Utc>,
    config: AssayConfig,
    sources: Vec<String>,
    added_labels: Vec<String>,
    subjects: Vec<SubjectRecord>,
    feeds: Vec<Feed>,
    registry: CategoryRegistry,
}

/// Subject-level factor value, for label construction
fn subject_factor<'a>(subject: &'a SubjectRecord, column: &str) -> Option<&'a str> {
    match column {
        col::GENOTYPE => Some(&subject.genotype),
        col::STATUS => Some(subject.status.as_str()),
        col::TEMPERATURE => Some(&subject.temperature),
        col::SEX => Some(&subject.sex),
        other => subject.labels.get(other).map(String::as_str),
    }
}

/// Deterministic feed order: subject identifier, then elapsed time, then choice
fn sort_feeds(feeds: &mut [Feed]) {
    feeds.sort_by(|a, b| {
        a.event
            .subject
            .cmp(&b.event.subject)
            .then_with(|| {
                a.event
                    .time_s
                    .partial_cmp(&b.event.time_s)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.event.choice.cmp(&b.event.choice))
    });
}

/// The datetime/name segment of an event-log file name, used to compose
/// subject identifiers. Falls back to the whole stem for names that do not
/// follow the device convention.
fn source_label(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() >= 3 {
        parts[1..3].join("_")
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::col;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    const METADATA_CSV: &str = "ID,Genotype,Temperature,Sex,#Flies,Food 1\n\
                                1,w1118,22,F,1,5% sucrose\n\
                                2,trpA1,22,F,1,5% sucrose\n";

    // FlyID 0 maps onto metadata subject 1; subject 2 never feeds.
    const FEEDLOG_CSV: &str =
        "FlyID,ChoiceIdx,AviFile,Valid,Volume-mm3,Duration-ms,RelativeTime-s\n\
         0,0,v.avi,True,10,1000,100\n\
         0,0,v.avi,True,20,1000,700\n\
         0,0,v.avi,True,30,1000,800\n";

    fn write_experiment_folder() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("FeedLog_2017-09-06_1000.csv"), FEEDLOG_CSV).unwrap();
        fs::write(dir.path().join("MetaData_2017-09-06_1000.csv"), METADATA_CSV).unwrap();
        dir
    }

    fn load_experiment() -> Experiment {
        let dir = write_experiment_folder();
        Experiment::from_folder(dir.path(), AssayConfig::with_duration_minutes(360.0)).unwrap()
    }

    #[test]
    fn test_source_label_from_file_name() {
        assert_eq!(source_label("FeedLog_2017-09-06_1000.csv"), "2017-09-06_1000");
        assert_eq!(source_label("FeedLog_2017-09-06_1000_Exp2.csv"), "2017-09-06_1000");
        assert_eq!(source_label("events.csv"), "events");
    }

    #[test]
    fn test_load_merges_and_flags_never_fed() {
        let experiment = load_experiment();

        assert_eq!(experiment.subjects().len(), 2);
        assert_eq!(experiment.sources().len(), 1);

        let fly1 = &experiment.subjects()[0];
        let fly2 = &experiment.subjects()[1];
        assert_eq!(fly1.id, "2017-09-06_1000_Fly1");
        assert!(fly1.ever_fed);
        assert!(!fly2.ever_fed);

        // 3 real rows + 2 pads per subject.
        assert_eq!(experiment.feeds().len(), 3 + 4);
        let fly2_rows: Vec<_> = experiment
            .feeds()
            .iter()
            .filter(|feed| feed.event.subject == fly2.id)
            .collect();
        assert!(fly2_rows.iter().all(|feed| feed.event.is_pad()));
    }

    #[test]
    fn test_worked_example_contrast_tables() {
        let experiment = load_experiment();
        let request = ContrastRequest {
            compare_by: col::GENOTYPE,
            group_by: &[col::TEMPERATURE],
            color_by: None,
            window: experiment.config().full_window(),
        };

        let consumption = experiment.consumption_contrast(&request).unwrap();
        assert_eq!(consumption.rows.len(), 2);
        let fly1 = &consumption.rows[0];
        assert_eq!(fly1.subject, "2017-09-06_1000_Fly1");
        assert_eq!(fly1.total_volume_per_subject_ul, 60.0);
        let fly2 = &consumption.rows[1];
        assert_eq!(fly2.total_volume_per_subject_ul, 0.0);

        let latency = experiment.latency_contrast(&request).unwrap();
        assert_eq!(latency.rows.len(), 1);
        assert_eq!(latency.rows[0].subject, "2017-09-06_1000_Fly1");
        assert_eq!(latency.rows[0].latency_s, 100.0);
    }

    #[test]
    fn test_missing_metadata_file_fails_loading() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("FeedLog_2017-09-06_1000.csv"), FEEDLOG_CSV).unwrap();

        let err = Experiment::from_folder(dir.path(), AssayConfig::default()).unwrap_err();
        assert!(matches!(err, AssayError::Validation(_)));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let experiment = load_experiment();
        let dir = tempdir().unwrap();
        let path = dir.path().join("experiment.json");

        experiment.save(&path).unwrap();
        let reloaded = Experiment::load(&path).unwrap();

        assert_eq!(reloaded.subjects(), experiment.subjects());
        assert_eq!(reloaded.feeds(), experiment.feeds());
        assert_eq!(reloaded.registry(), experiment.registry());
        assert_eq!(reloaded.config(), experiment.config());
    }

    #[test]
    fn test_attach_and_remove_label() {
        let mut experiment = load_experiment();
        experiment.attach_label_value("Batch", "pilot").unwrap();

        assert_eq!(experiment.added_labels().to_vec(), vec!["Batch".to_string()]);
        assert!(experiment.registry().has_column("Batch"));
        assert!(experiment
            .feeds()
            .iter()
            .all(|feed| feed.labels.get("Batch").map(String::as_str) == Some("pilot")));

        // The label is a usable grouping column.
        let table = experiment
            .windowed(&WindowRequest {
                group_by: &["Batch"],
                color_by: None,
                bin_width_s: 600.0,
                window: experiment.config().full_window(),
            })
            .unwrap();
        assert!(!table.series.is_empty());

        experiment.remove_label("Batch").unwrap();
        assert!(experiment.added_labels().is_empty());
        assert!(!experiment.registry().has_column("Batch"));
    }

    #[test]
    fn test_label_from_columns() {
        let mut experiment = load_experiment();
        experiment
            .attach_label_from_columns("GenotypeSex", &[col::GENOTYPE, col::SEX], ",")
            .unwrap();

        let fly1 = &experiment.subjects()[0];
        assert_eq!(
            fly1.labels.get("GenotypeSex").map(String::as_str),
            Some("w1118,F")
        );
    }

    #[test]
    fn test_canonical_name_rejected_as_label() {
        let mut experiment = load_experiment();
        let err = experiment.attach_label_value(col::GENOTYPE, "x").unwrap_err();
        assert!(matches!(err, AssayError::Configuration(_)));
    }

    #[test]
    fn test_merge_experiments() {
        let first = load_experiment();

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("FeedLog_2017-09-07_1100.csv"), FEEDLOG_CSV).unwrap();
        fs::write(dir.path().join("MetaData_2017-09-07_1100.csv"), METADATA_CSV).unwrap();
        let second =
            Experiment::from_folder(dir.path(), AssayConfig::with_duration_minutes(360.0)).unwrap();

        let merged = first.merge(second).unwrap();
        assert_eq!(merged.subjects().len(), 4);
        assert_eq!(merged.sources().len(), 2);
        assert_eq!(merged.genotypes(), vec!["w1118".to_string(), "trpA1".to_string()]);
    }

    #[test]
    fn test_merge_rejects_duplicate_subjects() {
        let first = load_experiment();
        let second = load_experiment();
        let err = first.merge(second).unwrap_err();
        assert!(matches!(err, AssayError::Validation(_)));
    }
}
