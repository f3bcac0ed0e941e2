use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use tag_demux::read_pair_iter::{InputFastqs, ReadPairIter};
use tag_demux::{classify, DemuxConfig, Demultiplexer, Registry, TagPairRecord};

const N_PAIRS: usize = 20_000;
const N_TAGS: usize = 16;

fn tag(prefix: char, i: usize) -> String {
    format!("{}{:02}", prefix, i)
}

/// One well-named cell per forward/reverse combination.
fn registry_records() -> Vec<TagPairRecord> {
    let mut records = Vec::new();
    for f in 0..N_TAGS {
        for r in 0..N_TAGS {
            let n = f * N_TAGS + r;
            let cell = format!("{}{}{:02}", 1 + n / 96, (b'A' + (n % 96 / 12) as u8) as char, n % 12 + 1);
            records.push(TagPairRecord::new(&tag('F', f), &tag('R', r), &cell));
        }
    }
    records
}

fn write_fastq(path: &Path, tags: &[String]) {
    let mut rng = XorShiftRng::seed_from_u64(0);
    let mut w = BufWriter::new(File::create(path).unwrap());
    for (i, t) in tags.iter().enumerate() {
        let seq: String = (0..150).map(|_| b"ACGT"[rng.gen_range(0..4)] as char).collect();
        write!(w, "@M0:1:1101:{}:{} 1:N:0:1 {}\n{}\n+\n{}\n", i, rng.gen::<u16>(), t, seq, "I".repeat(150)).unwrap();
    }
}

/// Synthetic run; one pair in 20 carries an unknown reverse tag.
fn setup(dir: &Path) -> DemuxConfig {
    let mut rng = XorShiftRng::seed_from_u64(42);
    let mut fwd = Vec::with_capacity(N_PAIRS);
    let mut rev = Vec::with_capacity(N_PAIRS);
    for _ in 0..N_PAIRS {
        fwd.push(tag('F', rng.gen_range(0..N_TAGS)));
        if rng.gen_range(0..20) == 0 {
            rev.push(tag('X', 0));
        } else {
            rev.push(tag('R', rng.gen_range(0..N_TAGS)));
        }
    }
    write_fastq(&dir.join("R1.fastq"), &fwd);
    write_fastq(&dir.join("R2.fastq"), &rev);

    let cells = dir.join("cells.json");
    serde_json::to_writer(File::create(&cells).unwrap(), &registry_records()).unwrap();

    DemuxConfig::new(
        vec![InputFastqs::new(dir.join("R1.fastq"), dir.join("R2.fastq"))],
        cells,
        dir.join("out"),
    )
}

fn run_read_pair_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let input = config.inputs[0].clone();

    c.bench_function("bench-read-pair-iter-count", |b| {
        b.iter(|| {
            let n = ReadPairIter::from_fastq_files(&input).unwrap().count();
            assert_eq!(n, N_PAIRS);
        })
    });

    let registry = Registry::load(registry_records()).unwrap();
    c.bench_function("bench-classify", |b| {
        b.iter(|| {
            let assigned = ReadPairIter::from_fastq_files(&input)
                .unwrap()
                .map(|rp| classify(&rp.unwrap(), &registry).rejection().is_none())
                .filter(|&a| a)
                .count();
            assert!(assigned > 0);
        })
    });
}

fn run_demux_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());

    c.bench_function("bench-demux-run", |b| {
        b.iter(|| {
            let summary = Demultiplexer::new(config.clone()).run().unwrap();
            assert_eq!(summary.total_pairs, N_PAIRS as u64);
        })
    });

    let mut read_ahead = config.clone();
    read_ahead.read_ahead = 1024;
    c.bench_function("bench-demux-run-read-ahead", |b| {
        b.iter(|| {
            let summary = Demultiplexer::new(read_ahead.clone()).run().unwrap();
            assert_eq!(summary.total_pairs, N_PAIRS as u64);
        })
    });
}

criterion_group!(benches, run_read_pair_benchmark, run_demux_benchmark);
criterion_main!(benches);
