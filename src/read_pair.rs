//! Container for the FASTQ data of one sequenced fragment: the forward 'R1'
//! and reverse 'R2' mates, read at the same position of their two files.

use std::fmt;
use std::io::{self, Write};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// The two mates of a paired-end read. R1 carries the forward tag,
/// R2 the reverse tag.
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum WhichRead {
    R1 = 0,
    R2 = 1,
}

impl WhichRead {
    pub fn read_types() -> [WhichRead; 2] {
        [WhichRead::R1, WhichRead::R2]
    }
}

impl fmt::Display for WhichRead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WhichRead::R1 => write!(f, "R1"),
            WhichRead::R2 => write!(f, "R2"),
        }
    }
}

/// Components of a FASTQ record.
#[derive(Debug, Copy, Clone)]
pub enum ReadPart {
    Header,
    Seq,
    Qual,
}

/// A record whose sequence and quality lines have different lengths.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{which} record of pair {ordinal} has {seq_len} bases but {qual_len} quality values")]
pub struct MalformedRecord {
    pub which: WhichRead,
    pub ordinal: u64,
    pub seq_len: usize,
    pub qual_len: usize,
}

/// One FASTQ record. The header (without the leading `@`), sequence and
/// quality are kept in a single buffer: header at `data[..head]`, sequence
/// at `data[head..seq]` and quality at `data[seq..]`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReadRecord {
    data: Vec<u8>,
    head: usize,
    seq: usize,
}

impl ReadRecord {
    // Make space for a typical record in one allocation
    pub(crate) const CAPACITY: usize = 512;

    pub fn new(header: &[u8], seq: &[u8], qual: &[u8]) -> ReadRecord {
        let mut data = Vec::with_capacity(header.len() + seq.len() + qual.len());
        data.extend_from_slice(header);
        let head = data.len();
        data.extend_from_slice(seq);
        let seq = data.len();
        data.extend_from_slice(qual);
        ReadRecord { data, head, seq }
    }

    /// Wrap a buffer laid out as header, sequence, quality.
    pub(crate) fn from_buffer(data: Vec<u8>, head: usize, seq: usize) -> ReadRecord {
        debug_assert!(head <= seq && seq <= data.len());
        ReadRecord { data, head, seq }
    }

    #[inline]
    pub fn get(&self, part: ReadPart) -> &[u8] {
        match part {
            ReadPart::Header => &self.data[..self.head],
            ReadPart::Seq => &self.data[self.head..self.seq],
            ReadPart::Qual => &self.data[self.seq..],
        }
    }

    /// The full header line, without the leading `@`.
    pub fn header(&self) -> &[u8] {
        self.get(ReadPart::Header)
    }

    pub fn seq(&self) -> &[u8] {
        self.get(ReadPart::Seq)
    }

    pub fn qual(&self) -> &[u8] {
        self.get(ReadPart::Qual)
    }

    /// The read name: the header up to the first space.
    pub fn id(&self) -> &[u8] {
        let header = self.header();
        match header.iter().position(|&c| c == b' ') {
            Some(end) => &header[..end],
            None => header,
        }
    }

    pub fn len(&self) -> usize {
        self.seq - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence and quality have the same length.
    pub fn is_well_formed(&self) -> bool {
        self.seq - self.head == self.data.len() - self.seq
    }

    /// Write the record as 4-line FASTQ, reproducing the header verbatim.
    pub fn write_fastq<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(b"@")?;
        w.write_all(self.header())?;
        w.write_all(b"\n")?;
        w.write_all(self.seq())?;
        w.write_all(b"\n+\n")?;
        w.write_all(self.qual())?;
        w.write_all(b"\n")
    }
}

/// The two mates of one fragment. `ordinal` is the 0-based position of the
/// pair in the run's input. A pair whose records break the
/// sequence/quality invariant carries the defect instead of failing the stream.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReadPair {
    ordinal: u64,
    reads: [ReadRecord; 2],
    defect: Option<MalformedRecord>,
}

impl ReadPair {
    pub fn new(ordinal: u64, r1: ReadRecord, r2: ReadRecord) -> ReadPair {
        let reads = [r1, r2];
        let defect = WhichRead::read_types()
            .iter()
            .zip(reads.iter())
            .find(|(_, rec)| !rec.is_well_formed())
            .map(|(&which, rec)| MalformedRecord {
                which,
                ordinal,
                seq_len: rec.seq().len(),
                qual_len: rec.qual().len(),
            });

        ReadPair {
            ordinal,
            reads,
            defect,
        }
    }

    #[inline]
    pub fn get(&self, which: WhichRead) -> &ReadRecord {
        &self.reads[which as usize]
    }

    pub fn r1(&self) -> &ReadRecord {
        self.get(WhichRead::R1)
    }

    pub fn r2(&self) -> &ReadRecord {
        self.get(WhichRead::R2)
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// The first mate violating the sequence/quality invariant, if any.
    pub fn defect(&self) -> Option<&MalformedRecord> {
        self.defect.as_ref()
    }

    pub fn check(&self) -> Result<(), MalformedRecord> {
        match self.defect {
            Some(ref d) => Err(d.clone()),
            None => Ok(()),
        }
    }

    pub fn write_fastq<W: Write>(&self, which: WhichRead, w: &mut W) -> io::Result<()> {
        self.get(which).write_fastq(w)
    }
}
