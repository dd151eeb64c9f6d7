//! Time-windowed aggregation
//!
//! Resamples the merged, padded, metric-annotated table into fixed time bins
//! per grouping key. Windowed mode produces per-bin sums (timecourse views);
//! cumulative mode produces running totals per subject plus an
//! across-subject mean and standard-error band per bin (cumulative views).
//!
//! Undefined metrics (pad rows, zero-duration speeds) contribute zero to
//! every bin sum. Bins with no events are exactly 0.0, never missing: series
//! membership is taken from the whole merged table, where padding guarantees
//! every (subject, choice) pair appears.

use crate::categories::CategoryRegistry;
use crate::error::{AssayError, Result};
use crate::metrics::UL_TO_NL;
use crate::types::Feed;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Multiplier for a 95% confidence band around a mean
pub const CI95_Z: f64 = 1.96;

/// Parameters for a windowed or cumulative aggregation
#[derive(Debug, Clone)]
pub struct WindowRequest<'a> {
    /// Grouping-key columns (panel/facet roles)
    pub group_by: &'a [&'a str],
    /// Additional grouping role, used for series coloring downstream
    pub color_by: Option<&'a str>,
    /// Bin width in seconds
    pub bin_width_s: f64,
    /// Half-open `[start, end)` window in seconds
    pub window: (f64, f64),
}

/// One fixed-width bin of summed metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBin {
    pub start_s: f64,
    pub volume_per_subject_ul: f64,
    pub count_per_subject: f64,
    pub speed_per_subject_ul_s: f64,
}

/// Binned sums for one (grouping key, subject) series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSeries {
    /// Values of the grouping-key columns, aligned with `group_columns`
    pub group: Vec<String>,
    pub subject: String,
    /// Bins in ascending time order, zero-filled
    pub bins: Vec<TimeBin>,
}

/// Output of windowed aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimecourseTable {
    pub group_columns: Vec<String>,
    pub bin_width_s: f64,
    pub window: (f64, f64),
    pub series: Vec<SubjectSeries>,
}

/// One bin of a per-subject running total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeBin {
    pub start_s: f64,
    /// Cumulative per-subject volume, in nanoliters
    pub volume_nl: f64,
    /// Cumulative per-subject feed count
    pub count: f64,
}

/// Running totals for one (grouping key, subject) series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeSeries {
    pub group: Vec<String>,
    pub subject: String,
    pub bins: Vec<CumulativeBin>,
}

/// Across-subject summary for one bin of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandBin {
    pub start_s: f64,
    pub subjects: usize,
    pub mean_volume_nl: f64,
    /// Standard error of the mean; undefined with fewer than two subjects
    pub sem_volume_nl: Option<f64>,
    /// 95% band (mean ± 1.96·SEM)
    pub ci95_volume_nl: Option<(f64, f64)>,
    pub mean_count: f64,
    pub sem_count: Option<f64>,
    pub ci95_count: Option<(f64, f64)>,
}

/// Presentation-ready band for one grouping key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBand {
    pub group: Vec<String>,
    pub bins: Vec<BandBin>,
}

/// Output of cumulative aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeTable {
    pub group_columns: Vec<String>,
    pub bin_width_s: f64,
    pub window: (f64, f64),
    pub series: Vec<CumulativeSeries>,
    pub bands: Vec<GroupBand>,
}

/// Windowed aggregation: per-bin sums for every (grouping key, subject)
pub fn windowed(
    feeds: &[Feed],
    registry: &CategoryRegistry,
    request: &WindowRequest<'_>,
) -> Result<TimecourseTable> {
    let keys = effective_keys(request, registry)?;
    let (start_s, end_s) = request.window;
    let bin_width_s = request.bin_width_s;
    let bin_count = ((end_s - start_s) / bin_width_s).ceil() as usize;

    let mut series = Vec::new();
    for ((group, subject), rows) in collect_series(feeds, &keys) {
        let mut bins: Vec<TimeBin> = (0..bin_count)
            .map(|index| TimeBin {
                start_s: start_s + index as f64 * bin_width_s,
                volume_per_subject_ul: 0.0,
                count_per_subject: 0.0,
                speed_per_subject_ul_s: 0.0,
            })
            .collect();

        for feed in rows {
            if !feed.in_window(request.window) {
                continue;
            }
            let index =
                (((feed.event.time_s - start_s) / bin_width_s) as usize).min(bin_count - 1);
            let bin = &mut bins[index];
            bin.volume_per_subject_ul += feed.metrics.volume_per_subject_ul.unwrap_or(0.0);
            bin.count_per_subject += feed.metrics.count_per_subject.unwrap_or(0.0);
            bin.speed_per_subject_ul_s += feed.metrics.speed_per_subject_ul_s.unwrap_or(0.0);
        }

        series.push(SubjectSeries {
            group,
            subject,
            bins,
        });
    }
    sort_series(&mut series, &keys, registry);

    Ok(TimecourseTable {
        group_columns: keys.iter().map(|key| key.to_string()).collect(),
        bin_width_s,
        window: request.window,
        series,
    })
}

/// Cumulative aggregation: running totals per subject plus per-bin
/// across-subject mean and standard-error band
pub fn cumulative(
    feeds: &[Feed],
    registry: &CategoryRegistry,
    request: &WindowRequest<'_>,
) -> Result<CumulativeTable> {
    let windowed_table = windowed(feeds, registry, request)?;

    let mut series = Vec::new();
    for subject_series in &windowed_table.series {
        let mut running_volume_nl = 0.0;
        let mut running_count = 0.0;
        let bins = subject_series
            .bins
            .iter()
            .map(|bin| {
                running_volume_nl += bin.volume_per_subject_ul * UL_TO_NL;
                running_count += bin.count_per_subject;
                CumulativeBin {
                    start_s: bin.start_s,
                    volume_nl: running_volume_nl,
                    count: running_count,
                }
            })
            .collect();
        series.push(CumulativeSeries {
            group: subject_series.group.clone(),
            subject: subject_series.subject.clone(),
            bins,
        });
    }

    let bands = summarize_groups(&series);

    Ok(CumulativeTable {
        group_columns: windowed_table.group_columns,
        bin_width_s: windowed_table.bin_width_s,
        window: windowed_table.window,
        series,
        bands,
    })
}

/// Across-subject mean and SEM per bin, per group. Series are already
/// sorted by group, so one linear pass suffices.
fn summarize_groups(series: &[CumulativeSeries]) -> Vec<GroupBand> {
    let mut bands: Vec<GroupBand> = Vec::new();
    let mut chunk: Vec<&CumulativeSeries> = Vec::new();

    let mut flush = |chunk: &mut Vec<&CumulativeSeries>, bands: &mut Vec<GroupBand>| {
        if chunk.is_empty() {
            return;
        }
        let bin_count = chunk[0].bins.len();
        let mut bins = Vec::with_capacity(bin_count);
        for index in 0..bin_count {
            let volumes: Vec<f64> = chunk.iter().map(|s| s.bins[index].volume_nl).collect();
            let counts: Vec<f64> = chunk.iter().map(|s| s.bins[index].count).collect();
            let (mean_volume_nl, sem_volume_nl) = mean_sem(&volumes);
            let (mean_count, sem_count) = mean_sem(&counts);
            bins.push(BandBin {
                start_s: chunk[0].bins[index].start_s,
                subjects: chunk.len(),
                mean_volume_nl,
                sem_volume_nl,
                ci95_volume_nl: band(mean_volume_nl, sem_volume_nl),
                mean_count,
                sem_count,
                ci95_count: band(mean_count, sem_count),
            });
        }
        bands.push(GroupBand {
            group: chunk[0].group.clone(),
            bins,
        });
        chunk.clear();
    };

    for subject_series in series {
        if let Some(first) = chunk.first() {
            if first.group != subject_series.group {
                flush(&mut chunk, &mut bands);
            }
        }
        chunk.push(subject_series);
    }
    flush(&mut chunk, &mut bands);
    bands
}

/// Mean and standard error of the mean; SEM is undefined for n < 2
fn mean_sem(values: &[f64]) -> (f64, Option<f64>) {
    let n = values.len();
    if n == 0 {
        return (0.0, None);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, None);
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n as f64 - 1.0);
    (mean, Some(variance.sqrt() / (n as f64).sqrt()))
}

fn band(mean: f64, sem: Option<f64>) -> Option<(f64, f64)> {
    sem.map(|sem| (mean - CI95_Z * sem, mean + CI95_Z * sem))
}

/// Resolve and validate the effective grouping-key columns for a request
fn effective_keys<'a>(
    request: &WindowRequest<'a>,
    registry: &CategoryRegistry,
) -> Result<Vec<&'a str>> {
    let mut keys: Vec<&str> = request.group_by.to_vec();
    if let Some(color) = request.color_by {
        keys.push(color);
    }
    if keys.is_empty() {
        return Err(AssayError::Configuration(
            "at least one grouping column is required".to_string(),
        ));
    }
    for (index, key) in keys.iter().enumerate() {
        if keys[index + 1..].contains(key) {
            return Err(AssayError::Configuration(format!(
                "column `{}` was supplied for two distinct grouping roles",
                key
            )));
        }
        if !registry.has_column(key) {
            return Err(AssayError::Configuration(format!(
                "`{}` is not a known grouping column",
                key
            )));
        }
    }
    if request.bin_width_s <= 0.0 {
        return Err(AssayError::Configuration(format!(
            "bin width must be positive, got {}",
            request.bin_width_s
        )));
    }
    if request.window.1 <= request.window.0 {
        return Err(AssayError::Configuration(format!(
            "window end {} is not after window start {}",
            request.window.1, request.window.0
        )));
    }
    Ok(keys)
}

/// Group feeds by (grouping-key values, subject).
///
/// Rows outside the requested window still establish series membership, so
/// padded subjects with no in-window events keep a zero-filled series.
fn collect_series<'f>(
    feeds: &'f [Feed],
    keys: &[&str],
) -> BTreeMap<(Vec<String>, String), Vec<&'f Feed>> {
    let mut grouped: BTreeMap<(Vec<String>, String), Vec<&Feed>> = BTreeMap::new();
    for feed in feeds {
        let values: Option<Vec<String>> = keys
            .iter()
            .map(|key| feed.factor(key).map(str::to_string))
            .collect();
        // A row whose subject lacks a value for some key (e.g. a label
        // attached to a subset) cannot be grouped and is skipped.
        let Some(values) = values else { continue };
        grouped
            .entry((values, feed.event.subject.clone()))
            .or_default()
            .push(feed);
    }
    grouped
}

/// Sort series by registry category order of each key column, then subject
fn sort_series(series: &mut [SubjectSeries], keys: &[&str], registry: &CategoryRegistry) {
    series.sort_by(|a, b| {
        for (index, key) in keys.iter().enumerate() {
            let ordering = registry
                .position(key, &a.group[index])
                .cmp(&registry.position(key, &b.group[index]))
                .then_with(|| a.group[index].cmp(&b.group[index]));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.subject.cmp(&b.subject)
    });
}
