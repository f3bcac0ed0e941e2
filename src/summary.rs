//! Per-bucket pair counts for the quality-control readout of a run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use fxhash::FxHashMap;
use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};

use crate::classify::{BucketKey, Rejection, RoutingDecision};
use crate::registry::{CellId, Registry};

/// Running counts, updated once per classified pair.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    cells: FxHashMap<CellId, u64>,
    rejected: [u64; 2],
    total: u64,
}

impl RunSummary {
    /// Start from zero for every cell in the registry, so cells that never
    /// receive a pair still show up in the report.
    pub fn new(registry: &Registry) -> RunSummary {
        RunSummary {
            cells: registry.cells().iter().map(|c| (c.clone(), 0)).collect(),
            rejected: [0; 2],
            total: 0,
        }
    }

    pub fn record(&mut self, decision: &RoutingDecision) {
        self.total += 1;
        match decision {
            RoutingDecision::Assigned(cell) => match self.cells.get_mut(*cell) {
                Some(n) => *n += 1,
                None => {
                    self.cells.insert((*cell).clone(), 1);
                }
            },
            RoutingDecision::UnknownPair => self.rejected[Rejection::UnknownPair as usize] += 1,
            RoutingDecision::MalformedTag => self.rejected[Rejection::MalformedTag as usize] += 1,
        }
    }

    /// Pairs recorded so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn rejected(&self, rejection: Rejection) -> u64 {
        self.rejected[rejection as usize]
    }

    /// Fold in the counts of another summary, e.g. from a separate shard of
    /// the same run.
    pub fn merge(&mut self, other: RunSummary) {
        for (cell, n) in other.cells {
            *self.cells.entry(cell).or_insert(0) += n;
        }
        for (mine, theirs) in self.rejected.iter_mut().zip(other.rejected) {
            *mine += theirs;
        }
        self.total += other.total;
    }

    pub fn report(&self) -> Summary {
        let cell_counts = self
            .cells
            .iter()
            .map(|(cell, &pairs)| BucketCount {
                bucket: BucketKey::Cell(cell.clone()),
                pairs,
            });
        let rejected_counts = Rejection::all().into_iter().map(|r| BucketCount {
            bucket: BucketKey::Rejected(r),
            pairs: self.rejected(r),
        });

        let buckets: Vec<BucketCount> = cell_counts
            .chain(rejected_counts)
            .sorted_by(|a, b| b.pairs.cmp(&a.pairs).then_with(|| a.bucket.cmp(&b.bucket)))
            .collect();

        let empty_cells = self
            .cells
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(cell, _)| cell.clone())
            .sorted()
            .collect();

        Summary {
            total_pairs: self.total,
            assigned_pairs: self.cells.values().sum(),
            unknown_pair: self.rejected(Rejection::UnknownPair),
            malformed_tag: self.rejected(Rejection::MalformedTag),
            buckets,
            empty_cells,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketCount {
    pub bucket: BucketKey,
    pub pairs: u64,
}

/// Final counts of a run. `buckets` lists every cell of the registry and
/// both rejection categories, by descending count and then by key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub total_pairs: u64,
    pub assigned_pairs: u64,
    pub unknown_pair: u64,
    pub malformed_tag: u64,
    pub buckets: Vec<BucketCount>,
    /// Cells of the registry that received no pairs.
    pub empty_cells: Vec<CellId>,
}

impl Summary {
    pub fn count(&self, bucket: &BucketKey) -> u64 {
        self.buckets
            .iter()
            .find(|b| &b.bucket == bucket)
            .map_or(0, |b| b.pairs)
    }

    pub fn cell_count(&self, cell: &str) -> u64 {
        self.count(&BucketKey::Cell(cell.into()))
    }

    /// Counts of the cell buckets only, in report order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellId, u64)> {
        self.buckets.iter().filter_map(|b| match b.bucket {
            BucketKey::Cell(ref cell) => Some((cell, b.pairs)),
            BucketKey::Rejected(_) => None,
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        writeln!(w)?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TagPairRecord;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::load(vec![
            TagPairRecord::new("T1", "T2", "CellA"),
            TagPairRecord::new("T3", "T4", "CellB"),
            TagPairRecord::new("T5", "T6", "CellC"),
        ])
        .unwrap()
    }

    #[test]
    fn counts_and_order() {
        let reg = registry();
        let a = CellId::from("CellA");
        let b = CellId::from("CellB");

        let mut summary = RunSummary::new(&reg);
        for d in [
            RoutingDecision::Assigned(&b),
            RoutingDecision::UnknownPair,
            RoutingDecision::Assigned(&b),
            RoutingDecision::Assigned(&a),
            RoutingDecision::MalformedTag,
            RoutingDecision::UnknownPair,
        ] {
            summary.record(&d);
        }

        let report = summary.report();
        assert_eq!(report.total_pairs, 6);
        assert_eq!(report.assigned_pairs, 3);
        assert_eq!(report.unknown_pair, 2);
        assert_eq!(report.malformed_tag, 1);
        assert_eq!(report.empty_cells, vec![CellId::from("CellC")]);

        let order: Vec<(String, u64)> = report
            .buckets
            .iter()
            .map(|b| (b.bucket.to_string(), b.pairs))
            .collect();
        assert_eq!(
            order,
            vec![
                ("CellB".to_string(), 2),
                ("unknown_pair".to_string(), 2),
                ("CellA".to_string(), 1),
                ("malformed_tag".to_string(), 1),
                ("CellC".to_string(), 0),
            ]
        );
        assert_eq!(report.cell_count("CellC"), 0);
        assert_eq!(report.cells().count(), 3);
    }

    #[test]
    fn buckets_add_up_to_total() {
        let reg = registry();
        let a = CellId::from("CellA");
        let mut summary = RunSummary::new(&reg);
        for i in 0..50u64 {
            let d = match i % 3 {
                0 => RoutingDecision::Assigned(&a),
                1 => RoutingDecision::UnknownPair,
                _ => RoutingDecision::MalformedTag,
            };
            summary.record(&d);
            let report = summary.report();
            let sum: u64 = report.buckets.iter().map(|b| b.pairs).sum();
            assert_eq!(sum, i + 1);
        }
    }

    #[test]
    fn merge_shards() {
        let reg = registry();
        let a = CellId::from("CellA");

        let mut s1 = RunSummary::new(&reg);
        s1.record(&RoutingDecision::Assigned(&a));
        let mut s2 = RunSummary::new(&reg);
        s2.record(&RoutingDecision::Assigned(&a));
        s2.record(&RoutingDecision::MalformedTag);

        s1.merge(s2);
        let report = s1.report();
        assert_eq!(report.total_pairs, 3);
        assert_eq!(report.cell_count("CellA"), 2);
        assert_eq!(report.malformed_tag, 1);
    }

    #[test]
    fn json_report() -> anyhow::Result<()> {
        let reg = registry();
        let a = CellId::from("CellA");
        let mut summary = RunSummary::new(&reg);
        summary.record(&RoutingDecision::Assigned(&a));

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("summary.json");
        summary.report().write_json(&path)?;

        let back: Summary = serde_json::from_reader(File::open(&path)?)?;
        assert_eq!(back, summary.report());
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["buckets"][0]["bucket"]["cell"], "CellA");
        Ok(())
    }
}
