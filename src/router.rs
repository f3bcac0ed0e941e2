//! Route classified read pairs into per-bucket R1/R2 FASTQ files.
//!
//! Output layout under the destination directory:
//!
//! ```text
//! cells/<cell>/R1.fastq        cells/<cell>/R2.fastq
//! unassigned/unknown_pair/R1.fastq ...
//! unassigned/malformed_tag/R1.fastq ...
//! ```
//!
//! A bucket's directory and files are created the first time a pair is
//! routed to it and stay open until the router is finished. Each bucket has
//! a single writer, so records keep their input order.

use std::fs;
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{BucketKey, Rejection, RoutingDecision};
use crate::read_pair::{ReadPair, WhichRead};
use crate::read_pair_writer::{ReadPairWriter, WriteError};
use crate::registry::CellId;
use crate::utils;

/// Descriptors kept back from the budget for stdio, the input FASTQs,
/// the reference table and the reports.
pub const RESERVED_DESCRIPTORS: usize = 16;

const FILES_PER_BUCKET: usize = 2;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("demultiplexing needs {required} open files but only {limit} are available; raise the open file limit (ulimit -n)")]
    TooManyOpenFiles { required: usize, limit: usize },

    #[error("unable to create output directory {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Write `.fastq.gz` instead of `.fastq`.
    #[serde(default)]
    pub compress: bool,
    /// Cap on descriptors used by buckets. Defaults to the process limit
    /// minus `RESERVED_DESCRIPTORS`.
    #[serde(default)]
    pub max_open_files: Option<usize>,
}

/// The files written for one bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketFiles {
    pub bucket: BucketKey,
    pub r1: PathBuf,
    pub r2: PathBuf,
    pub pairs: u64,
}

/// Directory of a bucket, relative to the destination.
pub fn bucket_dir(key: &BucketKey) -> PathBuf {
    match key {
        BucketKey::Cell(cell) => Path::new("cells").join(cell.as_str()),
        BucketKey::Rejected(r) => Path::new("unassigned").join(r.name()),
    }
}

/// Descriptors available to buckets, or `None` when the process has no limit.
pub fn descriptor_budget(options: &OutputOptions) -> Option<usize> {
    options.max_open_files.or_else(|| {
        utils::open_file_limit().map(|limit| limit.saturating_sub(RESERVED_DESCRIPTORS))
    })
}

/// Check up front that one bucket per cell, plus the rejection buckets,
/// can be open at the same time.
pub fn check_descriptor_budget(num_cells: usize, options: &OutputOptions) -> Result<(), RouterError> {
    let required = (num_cells + Rejection::all().len()) * FILES_PER_BUCKET;
    match descriptor_budget(options) {
        Some(limit) if required > limit => Err(RouterError::TooManyOpenFiles { required, limit }),
        _ => Ok(()),
    }
}

pub struct OutputRouter {
    root: PathBuf,
    compress: bool,
    fd_limit: Option<usize>,
    // open buckets; indices into this vector are stable for the whole run
    buckets: Vec<(BucketKey, ReadPairWriter)>,
    cell_index: FxHashMap<CellId, usize>,
    rejected_index: [Option<usize>; 2],
}

impl OutputRouter {
    pub fn new(root: impl Into<PathBuf>, options: &OutputOptions) -> OutputRouter {
        OutputRouter {
            root: root.into(),
            compress: options.compress,
            fd_limit: descriptor_budget(options),
            buckets: Vec::new(),
            cell_index: FxHashMap::default(),
            rejected_index: [None, None],
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of buckets opened so far.
    pub fn open_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Append the pair to its bucket, opening the bucket on first use.
    pub fn route(&mut self, decision: &RoutingDecision, pair: &ReadPair) -> Result<(), RouterError> {
        let idx = match decision {
            RoutingDecision::Assigned(cell) => self.cell_bucket(cell)?,
            RoutingDecision::UnknownPair => self.rejected_bucket(Rejection::UnknownPair)?,
            RoutingDecision::MalformedTag => self.rejected_bucket(Rejection::MalformedTag)?,
        };
        self.buckets[idx].1.write(pair)?;
        Ok(())
    }

    fn cell_bucket(&mut self, cell: &CellId) -> Result<usize, RouterError> {
        if let Some(&idx) = self.cell_index.get(cell) {
            return Ok(idx);
        }
        let idx = self.open_bucket(BucketKey::Cell(cell.clone()))?;
        self.cell_index.insert(cell.clone(), idx);
        Ok(idx)
    }

    fn rejected_bucket(&mut self, rejection: Rejection) -> Result<usize, RouterError> {
        let slot = rejection as usize;
        if let Some(idx) = self.rejected_index[slot] {
            return Ok(idx);
        }
        let idx = self.open_bucket(BucketKey::Rejected(rejection))?;
        self.rejected_index[slot] = Some(idx);
        Ok(idx)
    }

    fn open_bucket(&mut self, key: BucketKey) -> Result<usize, RouterError> {
        let required = (self.buckets.len() + 1) * FILES_PER_BUCKET;
        if let Some(limit) = self.fd_limit {
            if required > limit {
                return Err(RouterError::TooManyOpenFiles { required, limit });
            }
        }

        let dir = self.root.join(bucket_dir(&key));
        fs::create_dir_all(&dir).map_err(|source| RouterError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let ext = if self.compress { "fastq.gz" } else { "fastq" };
        let r1 = dir.join(format!("R1.{}", ext));
        let r2 = dir.join(format!("R2.{}", ext));
        let writer = ReadPairWriter::new(r1, r2).map_err(|e| {
            if utils::is_descriptor_exhaustion(&e.source) {
                RouterError::TooManyOpenFiles {
                    required,
                    limit: self.buckets.len() * FILES_PER_BUCKET,
                }
            } else {
                RouterError::Write(e)
            }
        })?;

        debug!("opened bucket {} in {:?}", key, dir);
        self.buckets.push((key, writer));
        Ok(self.buckets.len() - 1)
    }

    /// Flush and close every open bucket, in bucket order. Every bucket is
    /// closed even if an earlier one fails; the first error is returned.
    fn close_all(&mut self) -> Result<Vec<BucketFiles>, RouterError> {
        self.cell_index.clear();
        self.rejected_index = [None, None];

        let mut buckets = std::mem::take(&mut self.buckets);
        buckets.sort_by(|a, b| a.0.cmp(&b.0));

        let mut files = Vec::with_capacity(buckets.len());
        let mut first_err = None;
        for (bucket, writer) in buckets {
            let r1 = writer.path(WhichRead::R1).to_path_buf();
            let r2 = writer.path(WhichRead::R2).to_path_buf();
            match writer.finish() {
                Ok(pairs) => files.push(BucketFiles {
                    bucket,
                    r1,
                    r2,
                    pairs,
                }),
                Err(e) => {
                    first_err.get_or_insert(RouterError::Write(e));
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(files),
        }
    }

    /// Flush and close all buckets, returning what was written to each.
    pub fn finish(mut self) -> Result<Vec<BucketFiles>, RouterError> {
        self.close_all()
    }
}

impl Drop for OutputRouter {
    fn drop(&mut self) {
        if self.buckets.is_empty() {
            return;
        }
        warn!(
            "output router dropped with {} open buckets; closing them",
            self.buckets.len()
        );
        if let Err(e) = self.close_all() {
            warn!("error closing output buckets: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_pair::ReadRecord;
    use pretty_assertions::assert_eq;

    fn pair(n: u64, tag: &str) -> ReadPair {
        ReadPair::new(
            n,
            ReadRecord::new(format!("r{} {}", n, tag).as_bytes(), b"AC", b"II"),
            ReadRecord::new(format!("r{} {}", n, tag).as_bytes(), b"GT", b"##"),
        )
    }

    #[test]
    fn lazily_opens_and_appends() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cell_a = CellId::from("1A01");
        let mut router = OutputRouter::new(dir.path(), &OutputOptions::default());

        assert_eq!(router.open_buckets(), 0);
        assert!(!dir.path().join("cells").exists());

        router.route(&RoutingDecision::Assigned(&cell_a), &pair(0, "a"))?;
        router.route(&RoutingDecision::UnknownPair, &pair(1, "u"))?;
        router.route(&RoutingDecision::Assigned(&cell_a), &pair(2, "b"))?;
        assert_eq!(router.open_buckets(), 2);

        let files = router.finish()?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].bucket, BucketKey::Cell(cell_a));
        assert_eq!(files[0].pairs, 2);
        assert_eq!(files[1].bucket, BucketKey::Rejected(Rejection::UnknownPair));
        assert_eq!(files[1].pairs, 1);

        let r1 = std::fs::read_to_string(dir.path().join("cells/1A01/R1.fastq"))?;
        assert_eq!(r1, "@r0 a\nAC\n+\nII\n@r2 b\nAC\n+\nII\n");
        let r2 = std::fs::read_to_string(dir.path().join("cells/1A01/R2.fastq"))?;
        assert_eq!(r2, "@r0 a\nGT\n+\n##\n@r2 b\nGT\n+\n##\n");
        assert!(dir.path().join("unassigned/unknown_pair/R2.fastq").exists());
        assert!(!dir.path().join("unassigned/malformed_tag").exists());
        Ok(())
    }

    #[test]
    fn compressed_buckets() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = OutputOptions {
            compress: true,
            max_open_files: None,
        };
        let mut router = OutputRouter::new(dir.path(), &options);
        router.route(&RoutingDecision::MalformedTag, &pair(0, ""))?;
        let files = router.finish()?;
        assert_eq!(
            files[0].r1,
            dir.path().join("unassigned/malformed_tag/R1.fastq.gz")
        );
        Ok(())
    }

    #[test]
    fn descriptor_cap_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = OutputOptions {
            compress: false,
            max_open_files: Some(4),
        };
        let cells: Vec<CellId> = ["1A01", "1A02", "1A03"].iter().map(|&c| c.into()).collect();
        let mut router = OutputRouter::new(dir.path(), &options);
        router.route(&RoutingDecision::Assigned(&cells[0]), &pair(0, "a"))?;
        router.route(&RoutingDecision::Assigned(&cells[1]), &pair(1, "b"))?;

        let err = router
            .route(&RoutingDecision::Assigned(&cells[2]), &pair(2, "c"))
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::TooManyOpenFiles {
                required: 6,
                limit: 4
            }
        ));

        // buckets opened before the failure are still closed cleanly
        let files = router.finish()?;
        assert_eq!(files.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cells/1A02/R1.fastq"))?,
            "@r1 b\nAC\n+\nII\n"
        );
        Ok(())
    }

    #[test]
    fn budget_precondition() {
        let options = OutputOptions {
            compress: false,
            max_open_files: Some(10),
        };
        assert!(check_descriptor_budget(3, &options).is_ok());
        assert!(matches!(
            check_descriptor_budget(4, &options),
            Err(RouterError::TooManyOpenFiles {
                required: 12,
                limit: 10
            })
        ));
    }

    #[test]
    fn dropping_the_router_flushes_buckets() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut router = OutputRouter::new(dir.path(), &OutputOptions::default());
            router.route(&RoutingDecision::UnknownPair, &pair(0, "x"))?;
        }
        assert_eq!(
            std::fs::read_to_string(dir.path().join("unassigned/unknown_pair/R1.fastq"))?,
            "@r0 x\nAC\n+\nII\n"
        );
        Ok(())
    }
}
