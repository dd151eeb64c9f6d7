//! Metadata table normalization
//!
//! One row per subject/chamber. Source columns are renamed to the canonical
//! schema, the occupancy column is defaulted to 1 where absent, and known
//! free-text inconsistencies in the tube labels are repaired.

use crate::config::AssayConfig;
use crate::error::{AssayError, Result};
use crate::schema::{parse_optional_f64, source_col, TableKind};
use crate::types::{Status, SubjectRecord};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Known substitutions for shorthand tube labels, applied verbatim
const TUBE_LABEL_FIXUPS: [(&str, &str); 2] = [
    ("5%S", "5% sucrose "),
    ("5%YE", " 5% yeast extract"),
];

/// A normalized metadata table for one source file
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTable {
    /// Label of the source file pair, used to compose subject identifiers
    pub source: String,
    pub rows: Vec<SubjectRecord>,
}

impl MetadataTable {
    /// Subject identifiers in file order
    pub fn subject_ids(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }
}

/// Normalize a metadata CSV from a file on disk
pub fn from_path(path: &Path, source_label: &str, config: &AssayConfig) -> Result<MetadataTable> {
    let file = File::open(path)?;
    normalize_metadata(file, source_label, config)
}

/// Normalize a raw metadata table read from `reader`
pub fn normalize_metadata<R: Read>(
    reader: R,
    source_label: &str,
    config: &AssayConfig,
) -> Result<MetadataTable> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let find = |name: &str| headers.iter().position(|h| h.trim() == name);
    let require = |name: &str| {
        find(name).ok_or_else(|| AssayError::Schema {
            kind: TableKind::Metadata,
            column: name.to_string(),
        })
    };

    let id_idx = require(source_col::ID)?;
    let genotype_idx = require(source_col::GENOTYPE)?;
    let temperature_idx = require(source_col::TEMPERATURE)?;
    let sex_idx = require(source_col::SEX)?;
    let occupancy_idx = find(source_col::FLY_COUNT);

    // Choice-label columns are matched by prefix so an arbitrary number of
    // tubes is supported.
    let mut tube_columns: Vec<(u32, usize)> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        let header = header.trim();
        let suffix = header
            .strip_prefix(source_col::FOOD_PREFIX)
            .or_else(|| header.strip_prefix(source_col::TUBE_PREFIX));
        if let Some(suffix) = suffix {
            match suffix.trim().parse::<u32>() {
                Ok(tube_index) => tube_columns.push((tube_index, idx)),
                Err(_) => warn!(
                    "ignoring tube column `{}` with non-numeric suffix in {}",
                    header, source_label
                ),
            }
        }
    }

    let mut rows = Vec::new();
    let mut seen_ids = BTreeSet::new();
    for record in csv_reader.records() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let local_id: u32 = field(id_idx).parse().map_err(|_| {
            AssayError::Validation(format!(
                "metadata {}: subject ID `{}` is not an integer",
                source_label,
                field(id_idx)
            ))
        })?;
        if !seen_ids.insert(local_id) {
            return Err(AssayError::Validation(format!(
                "metadata {}: duplicate subject ID {}",
                source_label, local_id
            )));
        }

        // Assume one subject per chamber when the occupancy column is absent
        // or blank, and never let it fall below 1.
        let occupancy = occupancy_idx
            .and_then(|idx| parse_optional_f64(field(idx)))
            .map(|count| count as u32)
            .unwrap_or(1)
            .max(1);

        let genotype = normalize_genotype(field(genotype_idx));
        let status = Status::from_genotype(&genotype, &config.control_genotype_token);

        let mut tubes = BTreeMap::new();
        for &(tube_index, column_idx) in &tube_columns {
            let label = field(column_idx);
            if !label.is_empty() {
                tubes.insert(tube_index, normalize_tube_label(label));
            }
        }

        rows.push(SubjectRecord {
            id: compose_subject_id(source_label, local_id),
            local_id,
            source: source_label.to_string(),
            genotype,
            status,
            temperature: field(temperature_idx).to_string(),
            sex: field(sex_idx).to_string(),
            occupancy,
            tubes,
            ever_fed: true,
            labels: BTreeMap::new(),
        });
    }

    if rows.is_empty() {
        return Err(AssayError::Validation(format!(
            "metadata {} has 0 rows",
            source_label
        )));
    }

    Ok(MetadataTable {
        source: source_label.to_string(),
        rows,
    })
}

/// Composite subject identifier: source label plus local ID
pub fn compose_subject_id(source_label: &str, local_id: u32) -> String {
    format!("{}_Fly{}", source_label, local_id)
}

/// Repair known spelling inconsistencies in genotype strings
fn normalize_genotype(genotype: &str) -> String {
    genotype.replace('W', "w").replace("iii", "111")
}

/// Expand shorthand tube labels to their full spellings
fn normalize_tube_label(label: &str) -> String {
    let mut label = label.to_string();
    for (from, to) in TUBE_LABEL_FIXUPS {
        label = label.replace(from, to);
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "2017-09-06_1000";

    fn normalize(csv_text: &str) -> Result<MetadataTable> {
        normalize_metadata(csv_text.as_bytes(), SOURCE, &AssayConfig::default())
    }

    #[test]
    fn test_normalizes_and_composes_ids() {
        let table = normalize(
            "ID,Genotype,Temperature,Sex,#Flies,Food 1,Food 2\n\
             1,W1118,22,F,2,5% sucrose,5% sucrose\n\
             2,trpA1,22,M,,5% sucrose,5% sucrose\n",
        )
        .unwrap();

        assert_eq!(table.rows.len(), 2);
        let first = &table.rows[0];
        assert_eq!(first.id, "2017-09-06_1000_Fly1");
        assert_eq!(first.genotype, "w1118");
        assert_eq!(first.status, Status::Sibling);
        assert_eq!(first.occupancy, 2);
        assert_eq!(first.tube_for_choice(0), Some("5% sucrose"));

        // Blank occupancy defaults to 1.
        let second = &table.rows[1];
        assert_eq!(second.occupancy, 1);
        assert_eq!(second.status, Status::Offspring);
    }

    #[test]
    fn test_missing_occupancy_column_defaults_to_one() {
        let table = normalize(
            "ID,Genotype,Temperature,Sex,Food 1\n\
             1,w1118,22,F,5% sucrose\n",
        )
        .unwrap();
        assert_eq!(table.rows[0].occupancy, 1);
    }

    #[test]
    fn test_tube_label_fixups() {
        let table = normalize(
            "ID,Genotype,Temperature,Sex,Food 1\n\
             1,w1118,22,F,5%S\n",
        )
        .unwrap();
        assert_eq!(table.rows[0].tube_for_choice(0), Some("5% sucrose "));
    }

    #[test]
    fn test_arbitrary_tube_count_by_prefix() {
        let table = normalize(
            "ID,Genotype,Temperature,Sex,Food 1,Food 2,Food 3\n\
             1,w1118,22,F,a,b,c\n",
        )
        .unwrap();
        assert_eq!(table.rows[0].tubes.len(), 3);
        assert_eq!(table.rows[0].tube_for_choice(2), Some("c"));
    }

    #[test]
    fn test_empty_table_is_a_validation_error() {
        let err = normalize("ID,Genotype,Temperature,Sex,Food 1\n").unwrap_err();
        assert!(matches!(err, AssayError::Validation(_)));
    }

    #[test]
    fn test_missing_column_is_a_schema_error() {
        let err = normalize("ID,Temperature,Sex,Food 1\n1,22,F,a\n").unwrap_err();
        match err {
            AssayError::Schema { kind, column } => {
                assert_eq!(kind, TableKind::Metadata);
                assert_eq!(column, "Genotype");
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_subject_id_rejected() {
        let err = normalize(
            "ID,Genotype,Temperature,Sex,Food 1\n\
             1,w1118,22,F,a\n\
             1,w1118,22,F,a\n",
        )
        .unwrap_err();
        assert!(matches!(err, AssayError::Validation(_)));
    }
}
