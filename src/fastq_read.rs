//! Parse 4-line FASTQ records from a buffered reader.
//!
//! Record framing (the `@` header, the `+` separator, a complete set of four
//! lines) is enforced here and failures are fatal to the stream. Whether the
//! sequence and quality lines agree in length is left to the caller, so a
//! single bad record can be set aside without losing the rest of the file.
//! Blank lines between records are skipped.

use std::io::{self, BufRead};

use thiserror::Error;

use crate::read_pair::ReadRecord;

/// A FASTQ stream that can no longer be read record by record.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("read failed")]
    Io(#[from] io::Error),

    #[error("expected a header starting with '@' at line {line}")]
    MissingAt { line: u64 },

    #[error("expected a '+' separator at line {line}")]
    MissingSeparator { line: u64 },

    #[error("record starting at line {line} is truncated")]
    Truncated { line: u64 },
}

pub struct FastqReader<R> {
    reader: R,
    line: Vec<u8>,
    lines_read: u64,
    records_read: u64,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> FastqReader<R> {
        FastqReader {
            reader,
            line: Vec::with_capacity(256),
            lines_read: 0,
            records_read: 0,
        }
    }

    /// Number of complete records returned so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read one line into `self.line` without its line terminator.
    /// Returns false at end of input.
    fn read_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(false);
        }
        self.lines_read += 1;
        while matches!(self.line.last(), Some(&b'\n') | Some(&b'\r')) {
            self.line.pop();
        }
        Ok(true)
    }

    fn expect_line(&mut self, record_start: u64) -> Result<(), FramingError> {
        if self.read_line()? {
            Ok(())
        } else {
            Err(FramingError::Truncated { line: record_start })
        }
    }

    /// The next record, or `None` once the input is exhausted.
    pub fn next_record(&mut self) -> Result<Option<ReadRecord>, FramingError> {
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            if !self.line.is_empty() {
                break;
            }
        }

        let record_start = self.lines_read;
        if self.line[0] != b'@' {
            return Err(FramingError::MissingAt { line: record_start });
        }

        let mut data = Vec::with_capacity(ReadRecord::CAPACITY);
        data.extend_from_slice(&self.line[1..]);
        let head = data.len();

        self.expect_line(record_start)?;
        data.extend_from_slice(&self.line);
        let seq = data.len();

        self.expect_line(record_start)?;
        if self.line.first() != Some(&b'+') {
            return Err(FramingError::MissingSeparator {
                line: self.lines_read,
            });
        }

        self.expect_line(record_start)?;
        data.extend_from_slice(&self.line);

        self.records_read += 1;
        Ok(Some(ReadRecord::from_buffer(data, head, seq)))
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<ReadRecord, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &[u8]) -> Result<Vec<ReadRecord>, FramingError> {
        FastqReader::new(input).collect()
    }

    #[test]
    fn reads_records() -> Result<(), FramingError> {
        let recs = parse(b"@r1 tagF1\nACGT\n+\nIIII\n@r2 tagF2\nGG\n+r2\n##\n")?;
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].header(), b"r1 tagF1");
        assert_eq!(recs[0].seq(), b"ACGT");
        assert_eq!(recs[1].qual(), b"##");
        Ok(())
    }

    #[test]
    fn trailing_blank_line_and_crlf() -> Result<(), FramingError> {
        let recs = parse(b"@r1 t\r\nAC\r\n+\r\nII\r\n\n")?;
        assert_eq!(recs, vec![ReadRecord::new(b"r1 t", b"AC", b"II")]);
        Ok(())
    }

    #[test]
    fn missing_final_newline() -> Result<(), FramingError> {
        let recs = parse(b"@r1 t\nAC\n+\nII")?;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].qual(), b"II");
        Ok(())
    }

    #[test]
    fn length_mismatch_is_not_a_framing_error() -> Result<(), FramingError> {
        let recs = parse(b"@r1 t\nACGT\n+\nII\n")?;
        assert!(!recs[0].is_well_formed());
        Ok(())
    }

    #[test]
    fn framing_errors() {
        assert!(matches!(
            parse(b"r1\nAC\n+\nII\n"),
            Err(FramingError::MissingAt { line: 1 })
        ));
        assert!(matches!(
            parse(b"@r1\nAC\n-\nII\n"),
            Err(FramingError::MissingSeparator { line: 3 })
        ));
        assert!(matches!(
            parse(b"@r1\nAC\n+\nII\n@r2\nAC\n"),
            Err(FramingError::Truncated { line: 5 })
        ));
    }

    #[test]
    fn empty_input() -> Result<(), FramingError> {
        assert!(parse(b"")?.is_empty());
        assert!(parse(b"\n\n")?.is_empty());
        Ok(())
    }
}
