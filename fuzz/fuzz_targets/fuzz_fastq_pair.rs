#![no_main]
use libfuzzer_sys::fuzz_target;

use tag_demux::classify::tag_annotation;
use tag_demux::read_pair_iter::ReadPairIter;

// Split the input into an R1 and an R2 stream and make sure neither the
// pairing nor the annotation parser panics on arbitrary bytes.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let split = data[0] as usize % data.len();
    let (r1, r2) = data[1..].split_at(split.min(data.len() - 1));

    for item in ReadPairIter::new(r1, r2) {
        let pair = match item {
            Ok(pair) => pair,
            Err(_) => break,
        };
        for read in [pair.r1(), pair.r2()] {
            if let Some(tag) = tag_annotation(read.header()) {
                assert!(!tag.is_empty());
                assert!(!tag.contains(char::is_whitespace));
            }
        }
        assert_eq!(pair.defect().is_none(), pair.check().is_ok());
    }
});
