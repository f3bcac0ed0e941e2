//! The demultiplexing stage: read the paired FASTQs once, classify every
//! pair and route it to its bucket, then close all buckets and write the
//! run reports.
//!
//! A run moves through `Initializing -> Processing -> Finalizing` and ends
//! in `Completed` or `Failed`. Buckets are flushed and closed whenever the
//! router was set up, including when processing fails or is cancelled.

use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::background_iterator::BackgroundIterator;
use crate::classify::{classify, RoutingDecision};
use crate::plate::PlateLayout;
use crate::read_pair::ReadPair;
use crate::read_pair_iter::{InputFastqs, ReadPairIter, StreamError};
use crate::registry::{LoadError, Registry};
use crate::router::{self, OutputOptions, OutputRouter, RouterError};
use crate::summary::{RunSummary, Summary};

pub const SUMMARY_FILE: &str = "summary.json";
pub const PLATES_FILE: &str = "plates.tsv";

const PROGRESS_INTERVAL: u64 = 1_000_000;

/// What to do with a pair classified as `MalformedTag`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Route it to the `malformed_tag` bucket and carry on.
    #[default]
    Bucket,
    /// Fail the run.
    Abort,
}

/// Inputs and settings of one run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DemuxConfig {
    /// R1/R2 file pairs, processed in order as a single stream.
    pub inputs: Vec<InputFastqs>,
    /// Reference table mapping tag pairs to cells.
    pub cells_json: PathBuf,
    pub destination: PathBuf,
    #[serde(default)]
    pub compress_output: bool,
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,
    /// Pairs to read ahead on a background thread; 0 reads inline.
    #[serde(default)]
    pub read_ahead: usize,
    #[serde(default)]
    pub max_open_files: Option<usize>,
}

impl DemuxConfig {
    pub fn new(
        inputs: Vec<InputFastqs>,
        cells_json: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> DemuxConfig {
        DemuxConfig {
            inputs,
            cells_json: cells_json.into(),
            destination: destination.into(),
            compress_output: false,
            malformed_policy: MalformedPolicy::default(),
            read_ahead: 0,
            max_open_files: None,
        }
    }

    pub fn from_json(path: impl AsRef<Path>) -> Result<DemuxConfig, DemuxError> {
        let path = path.as_ref();
        let parse = || -> Result<DemuxConfig, serde_json::Error> {
            let f = File::open(path).map_err(serde_json::Error::io)?;
            serde_json::from_reader(BufReader::new(f))
        };
        parse().map_err(|source| DemuxError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check that the run has inputs and that every input file exists.
    pub fn validate(&self) -> Result<(), DemuxError> {
        if self.inputs.is_empty() {
            return Err(DemuxError::Config("no input FASTQ pairs given".to_string()));
        }
        let files = self
            .inputs
            .iter()
            .flat_map(|i| [&i.r1, &i.r2])
            .chain(std::iter::once(&self.cells_json));
        for path in files {
            if !path.is_file() {
                return Err(DemuxError::Config(format!("input file not found: {:?}", path)));
            }
        }
        if self.destination.is_file() {
            return Err(DemuxError::Config(format!(
                "destination {:?} is a file",
                self.destination
            )));
        }
        Ok(())
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            compress: self.compress_output,
            max_open_files: self.max_open_files,
        }
    }
}

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unable to read configuration {path:?}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("read pair {ordinal} has a malformed tag annotation")]
    MalformedTag { ordinal: u64 },

    #[error("cancelled after {pairs} read pairs")]
    Cancelled { pairs: u64 },

    #[error("unable to write {path:?}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageState {
    Initializing,
    Processing,
    Finalizing,
    Completed,
    Failed(String),
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Completed | StageState::Failed(_))
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StageState::Initializing => f.write_str("initializing"),
            StageState::Processing => f.write_str("processing"),
            StageState::Finalizing => f.write_str("finalizing"),
            StageState::Completed => f.write_str("completed"),
            StageState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Shared flag asking a running stage to stop between two pairs.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type PairStream = Box<dyn Iterator<Item = Result<ReadPair, StreamError>>>;

pub struct Demultiplexer {
    config: DemuxConfig,
    cancel: CancelToken,
    state: StageState,
}

impl Demultiplexer {
    pub fn new(config: DemuxConfig) -> Demultiplexer {
        Demultiplexer {
            config,
            cancel: CancelToken::new(),
            state: StageState::Initializing,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Demultiplexer {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn state(&self) -> &StageState {
        &self.state
    }

    /// Run the stage to completion. The final state is `Completed` if this
    /// returns `Ok`, `Failed` otherwise.
    pub fn run(&mut self) -> Result<Summary, DemuxError> {
        self.transition(StageState::Initializing);
        let result = self.run_stages();
        match result {
            Ok(_) => self.transition(StageState::Completed),
            Err(ref e) => self.transition(StageState::Failed(e.to_string())),
        }
        result
    }

    fn transition(&mut self, next: StageState) {
        match next {
            StageState::Failed(ref reason) => error!("demultiplexing failed: {}", reason),
            ref s => info!("demultiplexing stage: {}", s),
        }
        self.state = next;
    }

    fn run_stages(&mut self) -> Result<Summary, DemuxError> {
        self.config.validate()?;

        let registry = Registry::from_json(&self.config.cells_json)?;
        info!(
            "loaded {} tag pairs for {} cells from {:?}",
            registry.len(),
            registry.num_cells(),
            self.config.cells_json
        );

        let options = self.config.output_options();
        router::check_descriptor_budget(registry.num_cells(), &options)?;

        let destination = self.config.destination.clone();
        fs::create_dir_all(&destination).map_err(|source| DemuxError::Output {
            path: destination.clone(),
            source,
        })?;

        let mut router = OutputRouter::new(&destination, &options);
        let mut summary = RunSummary::new(&registry);

        self.transition(StageState::Processing);
        let processed = self.process(self.pair_stream(), &registry, &mut router, &mut summary);

        self.transition(StageState::Finalizing);
        let closed = router.finish();

        if let Err(e) = processed {
            if let Err(close_err) = closed {
                warn!("error closing output buckets after failure: {}", close_err);
            }
            return Err(e);
        }
        for files in closed? {
            debug!("{}: {} pairs in {:?}", files.bucket, files.pairs, files.r1.parent());
        }

        let report = summary.report();
        self.write_reports(&report)?;
        Ok(report)
    }

    fn pair_stream(&self) -> PairStream {
        let inputs = self.config.inputs.clone();
        if self.config.read_ahead > 0 {
            Box::new(BackgroundIterator::spawn(
                move || ReadPairIter::from_input_pairs(inputs),
                self.config.read_ahead,
            ))
        } else {
            Box::new(ReadPairIter::from_input_pairs(inputs))
        }
    }

    fn process(
        &self,
        pairs: PairStream,
        registry: &Registry,
        router: &mut OutputRouter,
        summary: &mut RunSummary,
    ) -> Result<(), DemuxError> {
        for item in pairs {
            if self.cancel.is_cancelled() {
                return Err(DemuxError::Cancelled {
                    pairs: summary.total(),
                });
            }

            let pair = item?;
            let decision = classify(&pair, registry);

            if decision == RoutingDecision::MalformedTag
                && self.config.malformed_policy == MalformedPolicy::Abort
            {
                pair.check().map_err(StreamError::from)?;
                return Err(DemuxError::MalformedTag {
                    ordinal: pair.ordinal(),
                });
            }

            router.route(&decision, &pair)?;
            summary.record(&decision);

            if summary.total() % PROGRESS_INTERVAL == 0 {
                info!("processed {} read pairs", summary.total());
            }
        }

        // a cancellation that arrives after the last pair still counts
        if self.cancel.is_cancelled() {
            return Err(DemuxError::Cancelled {
                pairs: summary.total(),
            });
        }
        Ok(())
    }

    fn write_reports(&self, report: &Summary) -> Result<(), DemuxError> {
        info!(
            "{} read pairs: {} assigned, {} unknown pair, {} malformed tag",
            report.total_pairs, report.assigned_pairs, report.unknown_pair, report.malformed_tag
        );
        if !report.empty_cells.is_empty() {
            warn!(
                "empty cells: {} out of {}: {}",
                report.empty_cells.len(),
                report.cells().count(),
                report
                    .empty_cells
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let output_err = |path: PathBuf| move |source: std::io::Error| DemuxError::Output { path, source };

        let summary_path = self.config.destination.join(SUMMARY_FILE);
        report
            .write_json(&summary_path)
            .map_err(output_err(summary_path.clone()))?;

        let plates_path = self.config.destination.join(PLATES_FILE);
        PlateLayout::from_summary(report)
            .write(&plates_path)
            .map_err(output_err(plates_path.clone()))?;
        Ok(())
    }
}
