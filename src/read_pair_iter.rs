//! Read a pair of synchronized FASTQ files as an Iterator over ReadPairs.
//!
//! The two files are consumed in lock-step: the n-th R1 record and the n-th
//! R2 record form the n-th pair. Read names are not compared.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::info;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::fastq_read::{FastqReader, FramingError};
use crate::read_pair::{MalformedRecord, ReadPair, ReadRecord, WhichRead};
use crate::utils;

/// The R1 and R2 FASTQ files of one paired-end library.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputFastqs {
    pub r1: PathBuf,
    pub r2: PathBuf,
}

impl InputFastqs {
    pub fn new(r1: impl Into<PathBuf>, r2: impl Into<PathBuf>) -> InputFastqs {
        InputFastqs {
            r1: r1.into(),
            r2: r2.into(),
        }
    }

    pub fn path(&self, which: WhichRead) -> &Path {
        match which {
            WhichRead::R1 => &self.r1,
            WhichRead::R2 => &self.r2,
        }
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    /// One mate file ran out of records before the other.
    #[error("R1 and R2 FASTQs are out of sync: {r1_records} R1 records vs {r2_records} R2 records")]
    LengthMismatch { r1_records: u64, r2_records: u64 },

    /// Raised only when malformed records are treated as fatal; normally the
    /// defect travels with the `ReadPair`.
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecord),

    #[error("unable to open {which} FASTQ {path:?}")]
    Open {
        which: WhichRead,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse {which} FASTQ{}", .path.as_ref().map(|p| format!(" {:?}", p)).unwrap_or_default())]
    Framing {
        which: WhichRead,
        path: Option<PathBuf>,
        #[source]
        source: FramingError,
    },
}

/// Read from a synchronized pair of FASTQ readers.
pub struct ReadPairIter<R> {
    readers: [FastqReader<R>; 2],
    paths: [Option<PathBuf>; 2],
    first_ordinal: u64,
    n_pairs: u64,
    done: bool,
}

impl ReadPairIter<Box<dyn BufRead>> {
    /// Open a `ReadPairIter` over a pair of (possibly compressed) FASTQ files.
    pub fn from_fastq_files(input: &InputFastqs) -> Result<Self, StreamError> {
        let open = |which: WhichRead| {
            let path = input.path(which);
            utils::open_with_gz(path).map_err(|source| StreamError::Open {
                which,
                path: path.to_path_buf(),
                source,
            })
        };

        let mut iter = ReadPairIter::new(open(WhichRead::R1)?, open(WhichRead::R2)?);
        iter.paths = [Some(input.r1.clone()), Some(input.r2.clone())];
        Ok(iter)
    }

    /// Iterate over several pairs of FASTQ files in order, as one run.
    /// Files are opened as they are reached.
    pub fn from_input_pairs(inputs: Vec<InputFastqs>) -> InputPairsIter {
        InputPairsIter {
            inputs: inputs.into_iter(),
            current: None,
            n_pairs: 0,
            done: false,
        }
    }
}

impl<R: BufRead> ReadPairIter<R> {
    pub fn new(r1: R, r2: R) -> ReadPairIter<R> {
        ReadPairIter {
            readers: [FastqReader::new(r1), FastqReader::new(r2)],
            paths: [None, None],
            first_ordinal: 0,
            n_pairs: 0,
            done: false,
        }
    }

    /// Number pairs starting from `ordinal` instead of 0.
    pub fn with_first_ordinal(mut self, ordinal: u64) -> Self {
        self.first_ordinal = ordinal;
        self
    }

    /// Number of pairs yielded so far.
    pub fn pairs_read(&self) -> u64 {
        self.n_pairs
    }

    fn next_record(&mut self, which: WhichRead) -> Result<Option<ReadRecord>, StreamError> {
        self.readers[which as usize]
            .next_record()
            .map_err(|source| StreamError::Framing {
                which,
                path: self.paths[which as usize].clone(),
                source,
            })
    }

    /// Count what remains of the longer file so the error reports both totals.
    /// A framing error while counting just ends the count.
    fn length_mismatch(&mut self, longer: WhichRead) -> StreamError {
        let reader = &mut self.readers[longer as usize];
        let mut longer_records = reader.records_read();
        while let Ok(Some(_)) = reader.next_record() {
            longer_records += 1;
        }

        let shorter_records = self.n_pairs;
        match longer {
            WhichRead::R1 => StreamError::LengthMismatch {
                r1_records: longer_records,
                r2_records: shorter_records,
            },
            WhichRead::R2 => StreamError::LengthMismatch {
                r1_records: shorter_records,
                r2_records: longer_records,
            },
        }
    }

    fn get_next(&mut self) -> Result<Option<ReadPair>, StreamError> {
        let r1 = self.next_record(WhichRead::R1)?;
        let r2 = self.next_record(WhichRead::R2)?;

        match (r1, r2) {
            (Some(r1), Some(r2)) => {
                let rp = ReadPair::new(self.first_ordinal + self.n_pairs, r1, r2);
                self.n_pairs += 1;
                Ok(Some(rp))
            }
            (None, None) => Ok(None),
            (Some(_), None) => Err(self.length_mismatch(WhichRead::R1)),
            (None, Some(_)) => Err(self.length_mismatch(WhichRead::R2)),
        }
    }
}

impl<R: BufRead> Iterator for ReadPairIter<R> {
    type Item = Result<ReadPair, StreamError>;

    /// Iterate over ReadPair objects. The iterator is fused after the first error.
    fn next(&mut self) -> Option<Result<ReadPair, StreamError>> {
        if self.done {
            return None;
        }

        match self.get_next() {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Chain of `ReadPairIter`s over several pairs of input files, numbering
/// pairs across the whole run.
pub struct InputPairsIter {
    inputs: std::vec::IntoIter<InputFastqs>,
    current: Option<ReadPairIter<Box<dyn BufRead>>>,
    n_pairs: u64,
    done: bool,
}

impl Iterator for InputPairsIter {
    type Item = Result<ReadPair, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if let Some(ref mut iter) = self.current {
                match iter.next() {
                    Some(Ok(rp)) => {
                        self.n_pairs += 1;
                        return Some(Ok(rp));
                    }
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => {
                        info!("finished input pair: {} read pairs", iter.pairs_read());
                        self.current = None;
                    }
                }
            }

            match self.inputs.next() {
                Some(input) => {
                    info!("start processing: {:?} / {:?}", input.r1, input.r2);
                    match ReadPairIter::from_fastq_files(&input) {
                        Ok(iter) => self.current = Some(iter.with_first_ordinal(self.n_pairs)),
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                None => self.done = true,
            }
        }
        None
    }
}
