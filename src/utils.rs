//! Utility methods.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

const GZ_BUF_SIZE: usize = 1 << 22;
const WRITE_BUF_SIZE: usize = 1 << 16;

/// Open a (possibly gzipped or lz4-compressed) file into a BufReader.
/// The compression is detected from the filename extension.
pub fn open_with_gz<P: AsRef<Path>>(p: P) -> io::Result<Box<dyn BufRead>> {
    let path = p.as_ref();
    let r = File::open(path)?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => {
            let gz = MultiGzDecoder::new(r);
            Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, gz)))
        }
        Some("lz4") => {
            let lz = lz4::Decoder::new(r)?;
            Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, lz)))
        }
        _ => Ok(Box::new(BufReader::with_capacity(32 * 1024, r))),
    }
}

/// An output file, optionally gzip compressed. Unlike a boxed `Write`,
/// `finish` reports errors from flushing buffers and writing the gzip trailer.
pub enum WriteSink {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl WriteSink {
    /// Flush all buffered data and close the file.
    pub fn finish(self) -> io::Result<()> {
        match self {
            WriteSink::Plain(mut w) => w.flush(),
            WriteSink::Gz(gz) => gz.finish()?.flush(),
        }
    }
}

impl Write for WriteSink {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriteSink::Plain(w) => w.write(buf),
            WriteSink::Gz(w) => w.write(buf),
        }
    }

    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            WriteSink::Plain(w) => w.write_all(buf),
            WriteSink::Gz(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WriteSink::Plain(w) => w.flush(),
            WriteSink::Gz(w) => w.flush(),
        }
    }
}

/// Create (or truncate) a file for writing. Files ending in `.gz` are
/// gzip compressed.
pub fn write_with_gz<P: AsRef<Path>>(p: P) -> io::Result<WriteSink> {
    let path = p.as_ref();
    let w = BufWriter::with_capacity(WRITE_BUF_SIZE, File::create(path)?);

    if path.extension().map_or(false, |ext| ext == "gz") {
        Ok(WriteSink::Gz(GzEncoder::new(w, Compression::default())))
    } else {
        Ok(WriteSink::Plain(w))
    }
}

/// The soft limit on open file descriptors for this process, if there is one.
#[cfg(unix)]
pub fn open_file_limit() -> Option<usize> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we hand it.
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) };
    if ret != 0 || rlim.rlim_cur == libc::RLIM_INFINITY {
        return None;
    }
    usize::try_from(rlim.rlim_cur).ok()
}

#[cfg(not(unix))]
pub fn open_file_limit() -> Option<usize> {
    None
}

/// True if an I/O error means the process or system ran out of file descriptors.
pub fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}
