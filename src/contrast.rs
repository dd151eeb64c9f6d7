//! Contrast-ready per-subject tables
//!
//! For a chosen time window, aggregates the merged table to one row per
//! (factor values, subject): summed totals for volume/duration-type metrics
//! (zero-filled, so a subject with no events still appears) and
//! minimum-elapsed-time latency (where a subject with no real feed is
//! omitted rather than given a fake latency). Also synthesizes the composite
//! categorical plot-group keys consumed by downstream comparison plots.

use crate::categories::CategoryRegistry;
use crate::error::{AssayError, Result};
use crate::metrics::UL_TO_NL;
use crate::types::Feed;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Separator used when string-joining factor columns into plot-group keys
pub const PLOT_GROUP_SEP: &str = "; ";

/// Parameters for the contrast tables
#[derive(Debug, Clone)]
pub struct ContrastRequest<'a> {
    /// Column whose categories are compared; needs at least two observed values
    pub compare_by: &'a str,
    /// Optional facet columns, joined into the plot-group key in order
    pub group_by: &'a [&'a str],
    /// Optional coloring column; participates in grouping when supplied
    pub color_by: Option<&'a str>,
    /// Half-open `[start, end)` window in seconds
    pub window: (f64, f64),
}

/// Summed per-subject totals for one (factor values, subject) group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRow {
    pub subject: String,
    /// (column, value) pairs for every factor role, in request order
    pub factors: Vec<(String, String)>,
    pub plot_group: String,
    pub plot_group_with_contrast: String,
    pub total_count_per_subject: f64,
    pub total_volume_per_subject_ul: f64,
    pub total_volume_per_subject_nl: f64,
    /// Occupancy-normalized total feeding time, in seconds
    pub total_feeding_time_per_subject_s: f64,
    /// Per-subject feed speed over the window; undefined without feeding time
    pub speed_per_subject_nl_s: Option<f64>,
}

/// Latency to first feed for one (factor values, subject) group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRow {
    pub subject: String,
    pub factors: Vec<(String, String)>,
    pub plot_group: String,
    pub plot_group_with_contrast: String,
    /// Elapsed time of the first real, valid feed in the window
    pub latency_s: f64,
}

/// Volume/duration-type contrast table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionTable {
    pub rows: Vec<ConsumptionRow>,
    /// Stable plot-group category order (first seen in sorted-key order)
    pub plot_groups: Vec<String>,
    pub plot_groups_with_contrast: Vec<String>,
}

/// Latency-type contrast table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyTable {
    pub rows: Vec<LatencyRow>,
    pub plot_groups: Vec<String>,
    pub plot_groups_with_contrast: Vec<String>,
}

/// Share of subjects with at least one real, valid feed in the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentFeedingRow {
    /// Values of the facet columns
    pub group: Vec<String>,
    pub subjects: usize,
    pub subjects_fed: usize,
    pub percent_feeding: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// Build the volume/duration contrast table
pub fn consumption(
    feeds: &[Feed],
    registry: &CategoryRegistry,
    request: &ContrastRequest<'_>,
) -> Result<ConsumptionTable> {
    let columns = factor_columns(request, registry)?;
    check_compare_categories(feeds, request.compare_by)?;

    let mut rows = Vec::new();
    for ((values, subject), group_feeds) in group_by_factors(feeds, &columns) {
        let mut total_count = 0.0;
        let mut total_volume_ul = 0.0;
        let mut total_time_s = 0.0;
        let mut raw_time_s = 0.0;
        for feed in group_feeds.iter().filter(|feed| feed.in_window(request.window)) {
            let occupancy = f64::from(feed.occupancy.max(1));
            total_count += feed.metrics.count_per_subject.unwrap_or(0.0);
            total_volume_ul += feed.metrics.volume_per_subject_ul.unwrap_or(0.0);
            total_time_s += feed.metrics.duration_s.unwrap_or(0.0) / occupancy;
            raw_time_s += feed.metrics.duration_s.unwrap_or(0.0);
        }

        let total_volume_nl = total_volume_ul * UL_TO_NL;
        // Ratio of totals; a subject with no feeding time has no speed.
        let speed_nl_s = if raw_time_s > 0.0 {
            Some(total_volume_nl / raw_time_s)
        } else {
            None
        };

        let (plot_group, plot_group_with_contrast) = plot_group_keys(request, &values);
        rows.push(ConsumptionRow {
            subject,
            factors: named_factors(&columns, &values),
            plot_group,
            plot_group_with_contrast,
            total_count_per_subject: total_count,
            total_volume_per_subject_ul: total_volume_ul,
            total_volume_per_subject_nl: total_volume_nl,
            total_feeding_time_per_subject_s: total_time_s,
            speed_per_subject_nl_s: speed_nl_s,
        });
    }

    sort_rows(&mut rows, &columns, registry, |row| {
        (&row.factors, &row.subject)
    });
    let plot_groups = first_seen(rows.iter().map(|row| row.plot_group.as_str()));
    let plot_groups_with_contrast =
        first_seen(rows.iter().map(|row| row.plot_group_with_contrast.as_str()));

    Ok(ConsumptionTable {
        rows,
        plot_groups,
        plot_groups_with_contrast,
    })
}

/// Build the latency-to-first-feed contrast table
pub fn latency(
    feeds: &[Feed],
    registry: &CategoryRegistry,
    request: &ContrastRequest<'_>,
) -> Result<LatencyTable> {
    let columns = factor_columns(request, registry)?;
    check_compare_categories(feeds, request.compare_by)?;

    let mut rows = Vec::new();
    for ((values, subject), group_feeds) in group_by_factors(feeds, &columns) {
        // Pad rows must not masquerade as a first feed, and a subject with
        // no real feed has an undefined latency rather than zero.
        let latency_s = group_feeds
            .iter()
            .filter(|feed| {
                !feed.event.is_pad() && feed.event.valid && feed.in_window(request.window)
            })
            .map(|feed| feed.event.time_s)
            .fold(f64::INFINITY, f64::min);
        if !latency_s.is_finite() {
            continue;
        }

        let (plot_group, plot_group_with_contrast) = plot_group_keys(request, &values);
        rows.push(LatencyRow {
            subject,
            factors: named_factors(&columns, &values),
            plot_group,
            plot_group_with_contrast,
            latency_s,
        });
    }

    sort_rows(&mut rows, &columns, registry, |row| {
        (&row.factors, &row.subject)
    });
    let plot_groups = first_seen(rows.iter().map(|row| row.plot_group.as_str()));
    let plot_groups_with_contrast =
        first_seen(rows.iter().map(|row| row.plot_group_with_contrast.as_str()));

    Ok(LatencyTable {
        rows,
        plot_groups,
        plot_groups_with_contrast,
    })
}

/// Percentage of subjects per facet group that fed at least once in the
/// window, with a normal-approximation 95% half-interval
pub fn percent_feeding(
    feeds: &[Feed],
    registry: &CategoryRegistry,
    facets: &[&str],
    window: (f64, f64),
) -> Result<Vec<PercentFeedingRow>> {
    if facets.is_empty() {
        return Err(AssayError::Configuration(
            "at least one facet column is required".to_string(),
        ));
    }
    for (index, facet) in facets.iter().enumerate() {
        if facets[index + 1..].contains(facet) {
            return Err(AssayError::Configuration(format!(
                "column `{}` was supplied for two distinct grouping roles",
                facet
            )));
        }
        if !registry.has_column(facet) {
            return Err(AssayError::Configuration(format!(
                "`{}` is not a known grouping column",
                facet
            )));
        }
    }

    let mut subjects_by_group: BTreeMap<Vec<String>, BTreeSet<&str>> = BTreeMap::new();
    let mut fed_by_group: BTreeMap<Vec<String>, BTreeSet<&str>> = BTreeMap::new();
    for feed in feeds {
        let values: Option<Vec<String>> = facets
            .iter()
            .map(|facet| feed.factor(facet).map(str::to_string))
            .collect();
        let Some(values) = values else { continue };
        subjects_by_group
            .entry(values.clone())
            .or_default()
            .insert(feed.event.subject.as_str());
        if feed.event.is_complete() && feed.event.valid && feed.in_window(window) {
            fed_by_group
                .entry(values)
                .or_default()
                .insert(feed.event.subject.as_str());
        }
    }

    let mut rows = Vec::new();
    for (group, subjects) in subjects_by_group {
        let fed = fed_by_group.get(&group).map_or(0, BTreeSet::len);
        let n = subjects.len();
        let percent = (fed as f64 / n as f64) * 100.0;
        let half_interval = (percent * (100.0 - percent) / n as f64).sqrt();
        rows.push(PercentFeedingRow {
            group,
            subjects: n,
            subjects_fed: fed,
            percent_feeding: percent,
            ci_lower: percent - half_interval,
            ci_upper: percent + half_interval,
        });
    }
    rows.sort_by(|a, b| {
        let key_a: Vec<usize> = facets
            .iter()
            .zip(&a.group)
            .map(|(facet, value)| registry.position(facet, value))
            .collect();
        let key_b: Vec<usize> = facets
            .iter()
            .zip(&b.group)
            .map(|(facet, value)| registry.position(facet, value))
            .collect();
        key_a.cmp(&key_b).then_with(|| a.group.cmp(&b.group))
    });
    Ok(rows)
}

/// Resolve and validate the factor columns for a contrast request.
///
/// Order: group-by columns, then the compare column, then the color column.
fn factor_columns<'a>(
    request: &ContrastRequest<'a>,
    registry: &CategoryRegistry,
) -> Result<Vec<&'a str>> {
    let mut columns: Vec<&str> = request.group_by.to_vec();
    columns.push(request.compare_by);
    if let Some(color) = request.color_by {
        columns.push(color);
    }
    for (index, column) in columns.iter().enumerate() {
        if columns[index + 1..].contains(column) {
            return Err(AssayError::Configuration(format!(
                "column `{}` was supplied for two distinct grouping roles",
                column
            )));
        }
        if !registry.has_column(column) {
            return Err(AssayError::Configuration(format!(
                "`{}` is not a known grouping column",
                column
            )));
        }
    }
    if request.window.1 <= request.window.0 {
        return Err(AssayError::Configuration(format!(
            "window end {} is not after window start {}",
            request.window.1, request.window.0
        )));
    }
    Ok(columns)
}

/// The compare column must discriminate at least two observed categories
fn check_compare_categories(feeds: &[Feed], compare_by: &str) -> Result<()> {
    let observed: BTreeSet<&str> = feeds
        .iter()
        .filter_map(|feed| feed.factor(compare_by))
        .collect();
    if observed.len() < 2 {
        return Err(AssayError::Configuration(format!(
            "compare column `{}` has {} distinct value(s); at least 2 are required",
            compare_by,
            observed.len()
        )));
    }
    Ok(())
}

/// Group feeds by (factor values, subject). Rows outside the window still
/// establish group membership so padded subjects appear with zero totals.
fn group_by_factors<'f>(
    feeds: &'f [Feed],
    columns: &[&str],
) -> BTreeMap<(Vec<String>, String), Vec<&'f Feed>> {
    let mut grouped: BTreeMap<(Vec<String>, String), Vec<&Feed>> = BTreeMap::new();
    for feed in feeds {
        let values: Option<Vec<String>> = columns
            .iter()
            .map(|column| feed.factor(column).map(str::to_string))
            .collect();
        let Some(values) = values else { continue };
        grouped
            .entry((values, feed.event.subject.clone()))
            .or_default()
            .push(feed);
    }
    grouped
}

/// Composite plot-group keys: group-by columns joined, then the compare value
fn plot_group_keys(request: &ContrastRequest<'_>, values: &[String]) -> (String, String) {
    let group_count = request.group_by.len();
    let plot_group = values[..group_count].join(PLOT_GROUP_SEP);
    let compare_value = &values[group_count];
    let plot_group_with_contrast = if plot_group.is_empty() {
        compare_value.clone()
    } else {
        format!("{}{}{}", plot_group, PLOT_GROUP_SEP, compare_value)
    };
    (plot_group, plot_group_with_contrast)
}

fn named_factors(columns: &[&str], values: &[String]) -> Vec<(String, String)> {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Sort rows by registry category order of each factor column, then subject
fn sort_rows<T>(
    rows: &mut [T],
    columns: &[&str],
    registry: &CategoryRegistry,
    accessor: impl for<'a> Fn(&'a T) -> (&'a Vec<(String, String)>, &'a String),
) {
    rows.sort_by(|a, b| {
        let (factors_a, subject_a) = accessor(a);
        let (factors_b, subject_b) = accessor(b);
        for (index, column) in columns.iter().enumerate() {
            let ordering = registry
                .position(column, &factors_a[index].1)
                .cmp(&registry.position(column, &factors_b[index].1))
                .then_with(|| factors_a[index].1.cmp(&factors_b[index].1));
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        subject_a.cmp(subject_b)
    });
}

/// Unique values in first-seen order
fn first_seen<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    for value in values {
        if seen.insert(value) {
            ordered.push(value.to_string());
        }
    }
    ordered
}
