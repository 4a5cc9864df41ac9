use crate::models::{AssetRecord, AssetScope};
use std::collections::HashMap;

/// Content hash -> lowest record id sharing that hash, over one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalIndex {
    scope: AssetScope,
    by_hash: HashMap<String, i64>,
}

impl CanonicalIndex {
    /// Build the index in a single pass. Input is normally ascending by id,
    /// but the smaller id wins regardless of order.
    pub fn build<'a, I>(scope: AssetScope, pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, &'a str)>,
    {
        let mut by_hash: HashMap<String, i64> = HashMap::new();

        for (id, hash) in pairs {
            match by_hash.get_mut(hash) {
                Some(current) => {
                    if id < *current {
                        *current = id;
                    }
                }
                None => {
                    by_hash.insert(hash.to_string(), id);
                }
            }
        }

        Self { scope, by_hash }
    }

    pub fn from_records(scope: AssetScope, records: &[AssetRecord]) -> Self {
        Self::build(
            scope,
            records
                .iter()
                .map(|record| (record.id, record.content_hash.as_str())),
        )
    }

    pub fn canonical_for(&self, content_hash: &str) -> Option<i64> {
        self.by_hash.get(content_hash).copied()
    }

    pub fn scope(&self) -> AssetScope {
        self.scope
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_input_gives_empty_index() {
        let index = CanonicalIndex::build(AssetScope::Outside, Vec::<(i64, &str)>::new());
        assert!(index.is_empty());
        assert_eq!(index.canonical_for("abc"), None);
        assert_eq!(index.scope(), AssetScope::Outside);
    }

    #[test]
    fn test_lowest_id_wins_in_any_order() {
        let pairs = vec![(7, "aa"), (3, "bb"), (2, "aa"), (9, "bb"), (5, "cc")];
        let index = CanonicalIndex::build(AssetScope::Staged, pairs);

        assert_eq!(index.len(), 3);
        assert_eq!(index.canonical_for("aa"), Some(2));
        assert_eq!(index.canonical_for("bb"), Some(3));
        assert_eq!(index.canonical_for("cc"), Some(5));
    }

    proptest! {
        #[test]
        fn test_canonical_is_group_minimum(
            entries in proptest::collection::vec((1i64..500, 0u8..6), 0..80)
        ) {
            let hashes: Vec<(i64, String)> = entries
                .iter()
                .map(|(id, h)| (*id, format!("hash{h}")))
                .collect();

            let index = CanonicalIndex::build(
                AssetScope::Outside,
                hashes.iter().map(|(id, h)| (*id, h.as_str())),
            );

            let mut expected: HashMap<&str, i64> = HashMap::new();
            for (id, h) in &hashes {
                let entry = expected.entry(h.as_str()).or_insert(*id);
                *entry = (*entry).min(*id);
            }

            prop_assert_eq!(index.len(), expected.len());
            for (hash, min_id) in expected {
                prop_assert_eq!(index.canonical_for(hash), Some(min_id));
            }
        }
    }
}
