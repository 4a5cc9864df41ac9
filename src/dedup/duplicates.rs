use super::canonical::CanonicalIndex;
use crate::models::{AssetRecord, ConsolidationMode};
use std::collections::BTreeMap;
use tracing::debug;

/// Duplicate id -> canonical id for one run. Never holds a self mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMap {
    mode: ConsolidationMode,
    entries: BTreeMap<i64, i64>,
    unmatched: Vec<i64>,
}

impl DuplicateMap {
    /// Map each staged record to the canonical id of its hash. Records whose
    /// hash is missing from the index have no consolidation target and are
    /// kept aside as unmatched.
    pub fn build(mode: ConsolidationMode, staged: &[AssetRecord], index: &CanonicalIndex) -> Self {
        let mut entries = BTreeMap::new();
        let mut unmatched = Vec::new();

        for record in staged {
            match index.canonical_for(&record.content_hash) {
                Some(canonical) if canonical != record.id => {
                    entries.insert(record.id, canonical);
                }
                Some(_) => {}
                None => {
                    debug!(
                        "Asset {} ({}) has no canonical counterpart",
                        record.id, record.location
                    );
                    unmatched.push(record.id);
                }
            }
        }

        Self {
            mode,
            entries,
            unmatched,
        }
    }

    /// Build a map from explicit pairs, dropping any self mapping.
    pub fn from_pairs<I>(mode: ConsolidationMode, pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        Self {
            mode,
            entries: pairs
                .into_iter()
                .filter(|(duplicate, canonical)| duplicate != canonical)
                .collect(),
            unmatched: Vec::new(),
        }
    }

    pub fn canonical_for(&self, duplicate: i64) -> Option<i64> {
        self.entries.get(&duplicate).copied()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Entries in ascending duplicate id order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.entries.iter().map(|(d, c)| (*d, *c))
    }

    pub fn mode(&self) -> ConsolidationMode {
        self.mode
    }

    /// Staged ids whose hash had no entry in the canonical index.
    pub fn unmatched(&self) -> &[i64] {
        &self.unmatched
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
