//! Demultiplex tag-annotated amplicon FASTQs into per-cell read files.
//!
//! Upstream tag trimming appends the name of the matched forward or reverse
//! tag to each read header. This crate re-pairs the R1 and R2 files in
//! lock-step, looks up each (forward, reverse) tag pair in a reference table
//! and writes the pair to the files of its cell, or to a rejection bucket
//! when the pair is unknown or its annotation is malformed.
//!
//! ```no_run
//! use tag_demux::{DemuxConfig, Demultiplexer, InputFastqs};
//!
//! let inputs = vec![InputFastqs::new("trimmed_R1.fastq.gz", "trimmed_R2.fastq.gz")];
//! let config = DemuxConfig::new(inputs, "cells.json", "demux_out");
//! let summary = Demultiplexer::new(config).run()?;
//! println!("{} of {} pairs assigned", summary.assigned_pairs, summary.total_pairs);
//! # Ok::<(), tag_demux::DemuxError>(())
//! ```

pub mod background_iterator;
pub mod classify;
pub mod demux;
pub mod fastq_read;
pub mod plate;
pub mod read_pair;
pub mod read_pair_iter;
pub mod read_pair_writer;
pub mod registry;
pub mod router;
pub mod summary;
pub mod utils;

pub use crate::classify::{classify, BucketKey, Rejection, RoutingDecision};
pub use crate::demux::{CancelToken, DemuxConfig, DemuxError, Demultiplexer, MalformedPolicy, StageState};
pub use crate::read_pair::{ReadPair, ReadRecord, WhichRead};
pub use crate::read_pair_iter::{InputFastqs, ReadPairIter, StreamError};
pub use crate::registry::{CellId, LoadError, Registry, TagName, TagPairKey, TagPairRecord};
pub use crate::router::{OutputOptions, OutputRouter, RouterError};
pub use crate::summary::{RunSummary, Summary};
