//! Rebuilding a log's id/version map from its record store.
//!
//! # Recovery Process
//!
//! 1. List committed indexes in ascending order
//! 2. For each, read only the patch header to get `id` and `previous`
//! 3. Link the record if its `previous` is the current head. The first
//!    linked record starts the log (no `previous`) or follows the retired
//!    boundary recorded by the store
//! 4. Log and exclude records with an unreadable header, no id, a duplicate
//!    id, or a predecessor that is not the head
//!
//! Excluded records are not deleted; they stay on disk for inspection.

use std::collections::{BTreeMap, HashMap};
use std::io::BufReader;

use crate::codec;
use crate::storage::io::{RecordStore, StoreError};
use crate::types::{Id, Version};

/// Why a record was left out of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnreadableHeader(String),
    MissingId,
    DuplicateId(Id),
    MissingPredecessor { previous: Option<Id>, head: Option<Id> },
}

/// Result of scanning a record store.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of records examined.
    pub records_scanned: usize,
    /// Version to id, for linked records.
    pub versions: BTreeMap<Version, Id>,
    /// Id to version, the inverse of `versions`.
    pub ids: HashMap<Id, Version>,
    /// Records left out, by index.
    pub skipped: Vec<(u64, SkipReason)>,
}

impl RecoveryResult {
    /// Lowest linked version, `INIT` if none.
    #[must_use]
    pub fn earliest(&self) -> Version {
        self.versions.keys().next().copied().unwrap_or(Version::INIT)
    }

    /// Last linked version, `INIT` if none.
    #[must_use]
    pub fn current(&self) -> Version {
        self.versions.keys().next_back().copied().unwrap_or(Version::INIT)
    }

    /// Id of the last linked version.
    #[must_use]
    pub fn head(&self) -> Option<&Id> {
        self.versions.values().next_back()
    }
}

/// Scan `store` and rebuild the id/version map.
///
/// # Errors
///
/// Returns `StoreError` if the store cannot be listed or a record cannot be
/// opened. Malformed records are skipped, not reported as errors.
pub fn recover(store: &dyn RecordStore) -> Result<RecoveryResult, StoreError> {
    let mut result = RecoveryResult::default();
    let mut head: Option<Id> = None;
    let boundary = store.retired_boundary()?;

    for index in store.indexes()? {
        result.records_scanned += 1;
        let reader = match store.open(index) {
            Ok(reader) => reader,
            // Retired between listing and opening.
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        let header = match codec::text::read_header(BufReader::new(reader)) {
            Ok(header) => header,
            Err(e) => {
                tracing::error!("record {index}: unreadable header: {e}");
                result
                    .skipped
                    .push((index, SkipReason::UnreadableHeader(e.to_string())));
                continue;
            }
        };

        let Some(id) = header.id() else {
            tracing::error!("record {index}: no id in header");
            result.skipped.push((index, SkipReason::MissingId));
            continue;
        };

        if result.ids.contains_key(&id) {
            tracing::error!("record {index}: duplicate patch id {id}");
            result.skipped.push((index, SkipReason::DuplicateId(id)));
            continue;
        }

        let previous = header.previous();
        let linked = match &head {
            Some(_) => previous == head,
            None => previous.is_none() || previous == boundary,
        };
        if !linked {
            tracing::error!(
                "record {index}: previous {} does not match head {}",
                previous.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string),
                head.as_ref().map_or_else(|| "<none>".to_string(), ToString::to_string),
            );
            result.skipped.push((
                index,
                SkipReason::MissingPredecessor {
                    previous,
                    head: head.clone(),
                },
            ));
            continue;
        }

        let version = Version::from_index(index);
        result.versions.insert(version, id.clone());
        result.ids.insert(id.clone(), version);
        head = Some(id);
    }

    tracing::debug!(
        "recovered {} versions from {} records ({} skipped)",
        result.versions.len(),
        result.records_scanned,
        result.skipped.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PatchFormat;
    use crate::patch::{Patch, PatchHeader};
    use crate::storage::MemStore;

    fn record(id: &Id, previous: Option<&Id>) -> Vec<u8> {
        let patch = Patch::transaction(PatchHeader::with_ids(id, previous), Vec::new());
        codec::encode(PatchFormat::Text, &patch).expect("encode")
    }

    #[test]
    fn test_linked_chain() {
        let store = MemStore::new();
        let (a, b, c) = (Id::new(), Id::new(), Id::new());
        store.append(&record(&a, None)).expect("append");
        store.append(&record(&b, Some(&a))).expect("append");
        store.append(&record(&c, Some(&b))).expect("append");

        let result = recover(&store).expect("recover");
        assert_eq!(result.earliest(), Version::FIRST);
        assert_eq!(result.current(), Version::from_index(3));
        assert_eq!(result.head(), Some(&c));
        assert_eq!(result.ids.get(&b), Some(&Version::from_index(2)));
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_anomalies_are_skipped() {
        let store = MemStore::new();
        let (a, b, stray) = (Id::new(), Id::new(), Id::new());
        store.append(&record(&a, None)).expect("append");
        store.append(b"H id <broken .\n").expect("append");
        store.append(&record(&a, None)).expect("append");
        store.append(&record(&b, Some(&stray))).expect("append");
        store.append(b"TX .\nTC .\n").expect("append");

        let result = recover(&store).expect("recover");
        assert_eq!(result.current(), Version::FIRST);
        assert_eq!(result.head(), Some(&a));
        let reasons: Vec<_> = result.skipped.iter().map(|(i, _)| *i).collect();
        assert_eq!(reasons, vec![2, 3, 4, 5]);
        assert!(matches!(result.skipped[0].1, SkipReason::UnreadableHeader(_)));
        assert!(matches!(result.skipped[1].1, SkipReason::DuplicateId(_)));
        assert!(matches!(result.skipped[2].1, SkipReason::MissingPredecessor { .. }));
        assert!(matches!(result.skipped[3].1, SkipReason::MissingId));
    }

    #[test]
    fn test_first_retained_record_may_point_at_retired_one() {
        let store = MemStore::new();
        let (a, b, c) = (Id::new(), Id::new(), Id::new());
        store.append(&record(&a, None)).expect("append");
        store.append(&record(&b, Some(&a))).expect("append");
        store.append(&record(&c, Some(&b))).expect("append");
        store.set_retired_boundary(&a).expect("boundary");
        store.retire(1..=1).expect("retire");

        let result = recover(&store).expect("recover");
        assert_eq!(result.earliest(), Version::from_index(2));
        assert_eq!(result.current(), Version::from_index(3));
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_dangling_first_record_is_skipped() {
        let store = MemStore::new();
        let (lost, b, c) = (Id::new(), Id::new(), Id::new());
        store.append(&record(&Id::new(), Some(&lost))).expect("append");
        store.append(&record(&b, None)).expect("append");
        store.append(&record(&c, Some(&b))).expect("append");

        let result = recover(&store).expect("recover");
        assert_eq!(result.earliest(), Version::from_index(2));
        assert_eq!(result.head(), Some(&c));
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(
            result.skipped[0],
            (
                1,
                SkipReason::MissingPredecessor {
                    previous: Some(lost),
                    head: None,
                }
            )
        );
    }

    #[test]
    fn test_dangling_record_not_matching_boundary_is_skipped() {
        let store = MemStore::new();
        let (retired, other) = (Id::new(), Id::new());
        store.set_retired_boundary(&retired).expect("boundary");
        store.append(&record(&Id::new(), Some(&other))).expect("append");

        let result = recover(&store).expect("recover");
        assert_eq!(result.current(), Version::INIT);
        assert!(matches!(
            result.skipped[0].1,
            SkipReason::MissingPredecessor { head: None, .. }
        ));
    }

    #[test]
    fn test_empty_store() {
        let result = recover(&MemStore::new()).expect("recover");
        assert_eq!(result.current(), Version::INIT);
        assert_eq!(result.head(), None);
    }
}
