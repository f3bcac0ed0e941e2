//! Write `ReadPair` objects to a pair of R1/R2 FASTQ files.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::read_pair::{ReadPair, WhichRead};
use crate::utils::{self, WriteSink};

#[derive(Error, Debug)]
#[error("error writing fastq records to file: {path:?}")]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Writes the R1 mate of each pair to one file and the R2 mate to another,
/// so the n-th record of both files always belongs to the same fragment.
/// Files ending in `.gz` are gzip compressed.
pub struct ReadPairWriter {
    writers: [WriteSink; 2],
    paths: [PathBuf; 2],
    n_pairs: u64,
}

impl ReadPairWriter {
    /// Create (or truncate) both output files.
    pub fn new<P: AsRef<Path>>(r1: P, r2: P) -> Result<ReadPairWriter, WriteError> {
        let open = |p: &Path| {
            utils::write_with_gz(p).map_err(|source| WriteError {
                path: p.to_path_buf(),
                source,
            })
        };

        let r1 = r1.as_ref();
        let r2 = r2.as_ref();
        Ok(ReadPairWriter {
            writers: [open(r1)?, open(r2)?],
            paths: [r1.to_path_buf(), r2.to_path_buf()],
            n_pairs: 0,
        })
    }

    pub fn write(&mut self, rec: &ReadPair) -> Result<(), WriteError> {
        for which in WhichRead::read_types() {
            let idx = which as usize;
            rec.write_fastq(which, &mut self.writers[idx])
                .map_err(|source| WriteError {
                    path: self.paths[idx].clone(),
                    source,
                })?;
        }
        self.n_pairs += 1;
        Ok(())
    }

    pub fn path(&self, which: WhichRead) -> &Path {
        &self.paths[which as usize]
    }

    /// Number of pairs written so far.
    pub fn pairs_written(&self) -> u64 {
        self.n_pairs
    }

    /// Flush and close both files. Both are closed even if the first fails;
    /// the first error is returned.
    pub fn finish(self) -> Result<u64, WriteError> {
        let ReadPairWriter {
            writers,
            paths,
            n_pairs,
        } = self;

        let mut first_err = None;
        for (writer, path) in writers.into_iter().zip(paths) {
            if let Err(source) = writer.finish() {
                first_err.get_or_insert(WriteError { path, source });
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(n_pairs),
        }
    }
}
