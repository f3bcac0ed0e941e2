use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};

use tag_demux::plate::PlateLayout;
use tag_demux::{CancelToken, DemuxConfig, Demultiplexer, InputFastqs, MalformedPolicy};

#[derive(Parser, Debug)]
#[command(name = "demux_tags")]
#[command(about = "Split tag-annotated paired FASTQs into per-cell files", long_about = None)]
#[command(version)]
struct Args {
    /// Trimmed R1 FASTQ; repeat for several libraries, paired with --r2 by position
    #[arg(short = '1', long = "r1", value_name = "FASTQ")]
    r1: Vec<PathBuf>,

    /// Trimmed R2 FASTQ
    #[arg(short = '2', long = "r2", value_name = "FASTQ")]
    r2: Vec<PathBuf>,

    /// Reference table of tag pairs per cell
    #[arg(short = 'c', long, value_name = "JSON")]
    cells: Option<PathBuf>,

    /// Destination directory
    #[arg(short = 'o', long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Write gzip compressed FASTQs
    #[arg(long)]
    gzip: bool,

    /// Fail on the first pair with a malformed tag annotation
    #[arg(long)]
    strict: bool,

    /// Read pairs ahead on a background thread
    #[arg(long, value_name = "PAIRS", default_value_t = 0)]
    read_ahead: usize,

    /// Run configuration as JSON; replaces the other run options
    #[arg(
        long,
        value_name = "JSON",
        conflicts_with_all = ["r1", "r2", "cells", "output", "gzip", "strict", "read_ahead"]
    )]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn demux_config(&self) -> Result<DemuxConfig> {
        if let Some(ref path) = self.config {
            return DemuxConfig::from_json(path)
                .with_context(|| format!("loading run configuration {:?}", path));
        }

        if self.r1.len() != self.r2.len() {
            bail!(
                "got {} R1 files but {} R2 files; pass one --r2 for each --r1",
                self.r1.len(),
                self.r2.len()
            );
        }
        let inputs = self
            .r1
            .iter()
            .zip(&self.r2)
            .map(|(r1, r2)| InputFastqs::new(r1, r2))
            .collect();
        let cells = self.cells.clone().context("--cells is required")?;
        let output = self.output.clone().context("--output is required")?;

        let mut config = DemuxConfig::new(inputs, cells, output);
        config.compress_output = self.gzip;
        config.read_ahead = self.read_ahead;
        if self.strict {
            config.malformed_policy = MalformedPolicy::Abort;
        }
        Ok(config)
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_signal(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn set_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(not(unix))]
fn set_signal_handlers() {}

/// Cancel the run on SIGINT or SIGTERM. The signal handler only sets a flag;
/// a watcher thread forwards it to the token.
fn install_signal_handlers(cancel: CancelToken) {
    set_signal_handlers();

    thread::spawn(move || loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            warn!("interrupted; stopping after the current read pair");
            cancel.cancel();
            return;
        }
        thread::sleep(Duration::from_millis(100));
    });
}

fn run(args: &Args) -> Result<()> {
    let config = args.demux_config()?;
    let destination = config.destination.clone();

    let cancel = CancelToken::new();
    install_signal_handlers(cancel.clone());

    let mut demux = Demultiplexer::new(config).with_cancel_token(cancel);
    let summary = demux
        .run()
        .with_context(|| format!("demultiplexing into {:?}", destination))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write!(out, "{}", PlateLayout::from_summary(&summary).render())?;
    writeln!(
        out,
        "total: {}\tassigned: {}\tunknown_pair: {}\tmalformed_tag: {}",
        summary.total_pairs, summary.assigned_pairs, summary.unknown_pair, summary.malformed_tag
    )?;
    info!("reports written to {:?}", destination);
    Ok(())
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn config_replaces_run_flags() {
        let run_flags: [&[&str]; 4] = [&["--gzip"], &["--strict"], &["--read-ahead", "8"], &["-o", "out"]];
        for flag in run_flags {
            let argv = ["demux_tags", "--config", "run.json"]
                .iter()
                .chain(flag.iter())
                .copied();
            assert!(Args::try_parse_from(argv).is_err(), "{:?} accepted with --config", flag);
        }

        let args = Args::try_parse_from(["demux_tags", "--config", "run.json", "-v"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("run.json")));
        assert_eq!(args.read_ahead, 0);
    }

    #[test]
    fn flags_build_a_config() {
        let args = Args::try_parse_from([
            "demux_tags", "-1", "a_R1.fq", "-2", "a_R2.fq", "-1", "b_R1.fq", "-2", "b_R2.fq",
            "-c", "cells.json", "-o", "out", "--gzip", "--strict",
        ])
        .unwrap();
        let config = args.demux_config().unwrap();
        assert_eq!(
            config.inputs,
            vec![
                InputFastqs::new("a_R1.fq", "a_R2.fq"),
                InputFastqs::new("b_R1.fq", "b_R2.fq")
            ]
        );
        assert!(config.compress_output);
        assert_eq!(config.malformed_policy, MalformedPolicy::Abort);

        let unpaired =
            Args::try_parse_from(["demux_tags", "-1", "a_R1.fq", "-c", "cells.json", "-o", "out"])
                .unwrap();
        assert!(unpaired.demux_config().is_err());
    }
}
