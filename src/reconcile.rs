//! Subject reconciliation
//!
//! Cross-references subject identifiers between a normalized metadata table
//! and its event log, and reports the subjects that never produced a
//! complete event. This must run before padding: pad rows would otherwise
//! make every subject appear to have fed.

use crate::schema::{EventLogTable, MetadataTable};
use std::collections::BTreeSet;

/// Identifiers of subjects with zero complete real events in the log
pub fn never_fed_subjects(metadata: &MetadataTable, events: &EventLogTable) -> BTreeSet<String> {
    let fed: BTreeSet<&str> = events
        .rows
        .iter()
        .filter(|event| event.is_complete())
        .map(|event| event.subject.as_str())
        .collect();

    metadata
        .rows
        .iter()
        .filter(|subject| !fed.contains(subject.id.as_str()))
        .map(|subject| subject.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssayConfig;
    use crate::padding::add_pad_rows;
    use crate::schema::{normalize_eventlog, normalize_metadata};

    const SOURCE: &str = "2017-09-06_1000";

    fn fixture() -> (MetadataTable, EventLogTable) {
        let config = AssayConfig::default();
        let metadata = normalize_metadata(
            "ID,Genotype,Temperature,Sex,Food 1\n\
             1,w1118,22,F,5% sucrose\n\
             2,w1118,22,F,5% sucrose\n"
                .as_bytes(),
            SOURCE,
            &config,
        )
        .unwrap();
        let events = normalize_eventlog(
            "FlyID,ChoiceIdx,AviFile,Valid,Volume-mm3,Duration-ms,RelativeTime-s\n\
             0,0,v.avi,True,0.01,1000,12.5\n"
                .as_bytes(),
            SOURCE,
            &config,
        )
        .unwrap();
        (metadata, events)
    }

    #[test]
    fn test_detects_subjects_absent_from_the_log() {
        let (metadata, events) = fixture();
        let never_fed = never_fed_subjects(&metadata, &events);
        assert_eq!(never_fed.len(), 1);
        assert!(never_fed.contains("2017-09-06_1000_Fly2"));
    }

    #[test]
    fn test_runs_before_padding_sees_pad_rows() {
        let (metadata, mut events) = fixture();
        let before = never_fed_subjects(&metadata, &events);

        // Pad rows must not change the outcome: they are incomplete by
        // construction.
        add_pad_rows(&metadata, &mut events, &AssayConfig::default());
        let after = never_fed_subjects(&metadata, &events);
        assert_eq!(before, after);
    }

    #[test]
    fn test_incomplete_rows_do_not_count_as_feeding() {
        let config = AssayConfig::default();
        let (metadata, _) = fixture();
        let events = normalize_eventlog(
            "FlyID,ChoiceIdx,AviFile,Valid,Volume-mm3,Duration-ms,RelativeTime-s\n\
             1,0,v.avi,False,,,30.0\n"
                .as_bytes(),
            SOURCE,
            &config,
        )
        .unwrap();

        let never_fed = never_fed_subjects(&metadata, &events);
        assert!(never_fed.contains("2017-09-06_1000_Fly2"));
    }
}
