use std::collections::HashMap;

use time::OffsetDateTime;

use crate::model::{Dataset, PriceRecord, RecordKey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub retained: usize,
}

/// Merges a run's records into the existing dataset by identity key.
///
/// Existing keys are replaced in place, new keys are appended in arrival order,
/// and untouched records are kept as they are. Within `incoming` the last record
/// for a key wins. `generated_at` is carried over; the store stamps it on write.
pub fn reconcile(existing: Dataset, incoming: Vec<PriceRecord>) -> (Dataset, ReconcileSummary) {
    let Dataset {
        generated_at,
        records,
    } = existing;

    let mut merged = dedupe(records);
    let mut index: HashMap<RecordKey, usize> = merged
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.key(), idx))
        .collect();

    let existing_len = merged.len();
    let mut touched = vec![false; existing_len];
    let mut inserted = 0usize;

    for record in incoming {
        let key = record.key();
        match index.get(&key) {
            Some(&idx) => {
                if idx < existing_len {
                    touched[idx] = true;
                }
                merged[idx] = record;
            }
            None => {
                index.insert(key, merged.len());
                merged.push(record);
                inserted += 1;
            }
        }
    }

    let replaced = touched.iter().filter(|t| **t).count();
    let summary = ReconcileSummary {
        inserted,
        replaced,
        retained: existing_len - replaced,
    };

    (
        Dataset {
            generated_at,
            records: merged,
        },
        summary,
    )
}

/// Collapses duplicate keys, keeping the last occurrence at the first one's position.
fn dedupe(records: Vec<PriceRecord>) -> Vec<PriceRecord> {
    let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<PriceRecord> = Vec::with_capacity(records.len());
    for record in records {
        let key = record.key();
        match index.get(&key) {
            Some(&idx) => out[idx] = record,
            None => {
                index.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Explicit pruning: drops records last written before `cutoff`. Returns how
/// many were removed.
pub fn prune_stale(dataset: &mut Dataset, cutoff: OffsetDateTime) -> usize {
    let before = dataset.records.len();
    dataset.records.retain(|r| r.last_updated >= cutoff);
    before - dataset.records.len()
}
