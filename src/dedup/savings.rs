use crate::models::AssetRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Bytes held by redundant copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WastedSpace {
    /// Hash groups contributing at least one redundant copy
    pub groups: usize,
    /// Redundant records across those groups
    pub records: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SavingsReport {
    pub assets: usize,
    pub staged_assets: usize,
    /// Every copy except the lowest id of each hash group
    pub total: WastedSpace,
    /// Staged copies that are not the lowest id of their group
    pub staged: WastedSpace,
}

impl SavingsReport {
    /// Compute both views over the full asset population.
    pub fn compute(records: &[AssetRecord]) -> Self {
        let mut groups: BTreeMap<&str, Vec<&AssetRecord>> = BTreeMap::new();
        for record in records {
            groups
                .entry(record.content_hash.as_str())
                .or_default()
                .push(record);
        }

        let mut report = SavingsReport {
            assets: records.len(),
            staged_assets: records.iter().filter(|r| r.in_staging).count(),
            ..Default::default()
        };

        for members in groups.values_mut() {
            if members.len() < 2 {
                continue;
            }
            members.sort_by_key(|r| r.id);
            let redundant = &members[1..];

            report.total.groups += 1;
            report.total.records += redundant.len();
            report.total.bytes += redundant.iter().map(|r| size_of(r)).sum::<u64>();

            let staged: Vec<_> = redundant.iter().filter(|r| r.in_staging).collect();
            if !staged.is_empty() {
                report.staged.groups += 1;
                report.staged.records += staged.len();
                report.staged.bytes += staged.iter().map(|r| size_of(r)).sum::<u64>();
            }
        }

        report
    }
}

fn size_of(record: &AssetRecord) -> u64 {
    record.size_bytes.max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn asset(id: i64, hash: &str, size: i64, staged: bool) -> AssetRecord {
        AssetRecord {
            id,
            content_hash: hash.to_string(),
            size_bytes: size,
            location: if staged {
                format!("_migrated/{id}")
            } else {
                format!("files/{id}")
            },
            in_staging: staged,
        }
    }

    #[test]
    fn test_staged_canonical_never_counts() {
        let records = vec![
            asset(1, "a", 100, true),
            asset(2, "a", 100, false),
            asset(3, "a", 100, true),
            asset(4, "b", 50, false),
            asset(5, "c", 10, true),
            asset(6, "c", 10, true),
        ];
        let report = SavingsReport::compute(&records);

        assert_eq!(report.assets, 6);
        assert_eq!(report.staged_assets, 4);
        assert_eq!(report.total, WastedSpace { groups: 2, records: 3, bytes: 210 });
        assert_eq!(report.staged, WastedSpace { groups: 2, records: 2, bytes: 110 });
    }

    #[test]
    fn test_empty_population() {
        assert_eq!(SavingsReport::compute(&[]), SavingsReport::default());
    }

    proptest! {
        #[test]
        fn prop_uniform_group_wastes_all_but_one(n in 1usize..40, size in 0i64..1_000_000) {
            let records: Vec<_> = (0..n as i64)
                .map(|id| asset(id + 1, "same", size, id % 2 == 0))
                .collect();
            let report = SavingsReport::compute(&records);
            prop_assert_eq!(report.total.bytes, size as u64 * (n as u64 - 1));
            prop_assert_eq!(report.total.records, n - 1);
        }
    }
}
