//! Categorical factor bookkeeping
//!
//! Grouping and downstream plotting depend on every aggregation call seeing
//! the same category sets in the same order. The [`CategoryRegistry`] is
//! built once after the merge, stored on the experiment, and threaded
//! explicitly into every aggregation call.
//!
//! Orderings:
//! - `Status`: control siblings first.
//! - `Genotype`: by status, then alphabetically.
//! - every other factor column (temperature, sex, food choice, custom
//!   labels): alphabetically by unique value.

use crate::types::{col, Feed, Status, SubjectRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Deterministically ordered category sets for the grouping-key columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryRegistry {
    orders: BTreeMap<String, Vec<String>>,
}

impl CategoryRegistry {
    /// Build the registry from the merged tables
    pub fn from_merged(subjects: &[SubjectRecord], feeds: &[Feed]) -> Self {
        let mut registry = Self::default();

        registry.orders.insert(
            col::STATUS.to_string(),
            vec![
                Status::Sibling.as_str().to_string(),
                Status::Offspring.as_str().to_string(),
            ],
        );

        // BTreeSet of (status, name) pairs yields the status-then-alphabetical
        // genotype order directly.
        let genotypes: BTreeSet<(Status, &str)> = subjects
            .iter()
            .map(|subject| (subject.status, subject.genotype.as_str()))
            .collect();
        registry.orders.insert(
            col::GENOTYPE.to_string(),
            genotypes
                .into_iter()
                .map(|(_, name)| name.to_string())
                .collect(),
        );

        registry.register(
            col::TEMPERATURE,
            subjects.iter().map(|s| s.temperature.clone()).collect(),
        );
        registry.register(col::SEX, subjects.iter().map(|s| s.sex.clone()).collect());
        registry.register(
            col::FOOD_CHOICE,
            feeds.iter().map(|feed| feed.food_choice.clone()).collect(),
        );

        let label_names: BTreeSet<&str> = subjects
            .iter()
            .flat_map(|subject| subject.labels.keys().map(String::as_str))
            .collect();
        for name in label_names {
            let values = subjects
                .iter()
                .filter_map(|subject| subject.labels.get(name).cloned())
                .collect();
            registry.register(name, values);
        }

        registry
    }

    /// Register (or replace) a column with an alphabetical category order
    pub fn register(&mut self, column: &str, mut values: Vec<String>) {
        values.sort();
        values.dedup();
        self.orders.insert(column.to_string(), values);
    }

    /// Whether `column` is a known grouping column
    pub fn has_column(&self, column: &str) -> bool {
        self.orders.contains_key(column)
    }

    /// The ordered category set of a column
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.orders.get(column).map(Vec::as_slice)
    }

    /// Position of a value within its column's category order. Unknown
    /// values sort after all known categories.
    pub fn position(&self, column: &str, value: &str) -> usize {
        match self.orders.get(column) {
            Some(order) => order
                .iter()
                .position(|category| category == value)
                .unwrap_or(order.len()),
            None => usize::MAX,
        }
    }

    /// A copy of the registry with categories restricted to the values
    /// observed in `feeds`, so group-bys after a filtering step do not see
    /// spurious empty groups.
    pub fn pruned(&self, feeds: &[Feed]) -> Self {
        let mut pruned = Self::default();
        for (column, order) in &self.orders {
            let observed: BTreeSet<&str> = feeds
                .iter()
                .filter_map(|feed| feed.factor(column))
                .collect();
            let kept: Vec<String> = order
                .iter()
                .filter(|category| observed.contains(category.as_str()))
                .cloned()
                .collect();
            pruned.orders.insert(column.clone(), kept);
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedEvent, FeedMetrics, DEFAULT_EVENT_STATE};
    use pretty_assertions::assert_eq;

    fn make_subject(local_id: u32, genotype: &str, status: Status) -> SubjectRecord {
        SubjectRecord {
            id: format!("src_Fly{}", local_id),
            local_id,
            source: "src".to_string(),
            genotype: genotype.to_string(),
            status,
            temperature: "22".to_string(),
            sex: "F".to_string(),
            occupancy: 1,
            tubes: BTreeMap::new(),
            ever_fed: true,
            labels: BTreeMap::new(),
        }
    }

    fn make_feed(subject: &SubjectRecord, food_choice: &str) -> Feed {
        Feed {
            event: FeedEvent {
                subject: subject.id.clone(),
                choice: 0,
                time_s: 10.0,
                duration_ms: Some(1000.0),
                volume_ul: Some(0.01),
                valid: true,
                state: DEFAULT_EVENT_STATE.to_string(),
            },
            food_choice: food_choice.to_string(),
            genotype: subject.genotype.clone(),
            status: subject.status,
            temperature: subject.temperature.clone(),
            sex: subject.sex.clone(),
            occupancy: subject.occupancy,
            labels: subject.labels.clone(),
            metrics: FeedMetrics::default(),
        }
    }

    #[test]
    fn test_genotype_order_is_status_then_alphabetical() {
        let subjects = vec![
            make_subject(1, "trpA1>Chrimson", Status::Offspring),
            make_subject(2, "w1118", Status::Sibling),
            make_subject(3, "Gr5a>TNT", Status::Offspring),
        ];
        let feeds: Vec<Feed> = subjects.iter().map(|s| make_feed(s, "sucrose")).collect();
        let registry = CategoryRegistry::from_merged(&subjects, &feeds);

        assert_eq!(
            registry.categories(col::GENOTYPE).unwrap().to_vec(),
            vec!["w1118", "Gr5a>TNT", "trpA1>Chrimson"]
        );
        assert_eq!(
            registry.categories(col::STATUS).unwrap().to_vec(),
            vec!["Sibling", "Offspring"]
        );
    }

    #[test]
    fn test_positions_follow_registered_order() {
        let subjects = vec![
            make_subject(1, "w1118", Status::Sibling),
            make_subject(2, "trpA1", Status::Offspring),
        ];
        let feeds: Vec<Feed> = vec![
            make_feed(&subjects[0], "yeast"),
            make_feed(&subjects[1], "sucrose"),
        ];
        let registry = CategoryRegistry::from_merged(&subjects, &feeds);

        assert_eq!(registry.position(col::FOOD_CHOICE, "sucrose"), 0);
        assert_eq!(registry.position(col::FOOD_CHOICE, "yeast"), 1);
        // Unknown values sort after all known categories.
        assert_eq!(registry.position(col::FOOD_CHOICE, "agar"), 2);
    }

    #[test]
    fn test_custom_labels_are_registered() {
        let mut subject = make_subject(1, "w1118", Status::Sibling);
        subject
            .labels
            .insert("Treatment".to_string(), "fed".to_string());
        let feeds = vec![make_feed(&subject, "sucrose")];
        let registry = CategoryRegistry::from_merged(&[subject], &feeds);

        assert!(registry.has_column("Treatment"));
        assert_eq!(registry.categories("Treatment").unwrap().to_vec(), vec!["fed"]);
    }

    #[test]
    fn test_pruned_drops_unobserved_categories() {
        let subjects = vec![
            make_subject(1, "w1118", Status::Sibling),
            make_subject(2, "trpA1", Status::Offspring),
        ];
        let feeds = vec![
            make_feed(&subjects[0], "sucrose"),
            make_feed(&subjects[1], "yeast"),
        ];
        let registry = CategoryRegistry::from_merged(&subjects, &feeds);

        // Filter down to the sibling's feeds only.
        let filtered: Vec<Feed> = feeds
            .iter()
            .filter(|feed| feed.status == Status::Sibling)
            .cloned()
            .collect();
        let pruned = registry.pruned(&filtered);

        assert_eq!(pruned.categories(col::GENOTYPE).unwrap().to_vec(), vec!["w1118"]);
        assert_eq!(pruned.categories(col::FOOD_CHOICE).unwrap().to_vec(), vec!["sucrose"]);
        // The full registry is untouched.
        assert_eq!(registry.categories(col::GENOTYPE).unwrap().len(), 2);
    }
}
