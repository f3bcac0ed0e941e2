//! Decide where a read pair goes, based on the tag names the tag-trimming
//! step appended to each mate's header.
//!
//! The trimmer writes the name of the matched tag as the last
//! space-separated token of the header (`@M0:12:1101:… 1:N:0:1 F03`).
//! That suffix is an informal contract, so any deviation from it is a
//! `MalformedTag` outcome rather than an error.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::read_pair::{ReadPair, WhichRead};
use crate::registry::{CellId, Registry};

lazy_static! {
    static ref TAG_TOKEN: Regex = Regex::new(r"^[\x21-\x7E]+$").unwrap();
    // Illumina (CASAVA 1.8) read comment, e.g. `1:N:0:ATCACG`; present when
    // the trimmer did not append a tag name.
    static ref CASAVA_COMMENT: Regex = Regex::new(r"^[12]:[YN]:[0-9]+:").unwrap();
}

/// Why a pair was not assigned to a cell.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Both tags were read, but the registry has no cell for the pair.
    UnknownPair,
    /// A tag annotation is missing or unparseable, or a record is malformed.
    MalformedTag,
}

impl Rejection {
    pub fn all() -> [Rejection; 2] {
        [Rejection::UnknownPair, Rejection::MalformedTag]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rejection::UnknownPair => "unknown_pair",
            Rejection::MalformedTag => "malformed_tag",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output destination of a read pair.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(rename_all = "snake_case")]
pub enum BucketKey {
    Cell(CellId),
    Rejected(Rejection),
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BucketKey::Cell(cell) => write!(f, "{}", cell),
            BucketKey::Rejected(r) => write!(f, "{}", r),
        }
    }
}

/// Outcome of classifying one read pair.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoutingDecision<'a> {
    Assigned(&'a CellId),
    UnknownPair,
    MalformedTag,
}

impl<'a> RoutingDecision<'a> {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            RoutingDecision::Assigned(_) => None,
            RoutingDecision::UnknownPair => Some(Rejection::UnknownPair),
            RoutingDecision::MalformedTag => Some(Rejection::MalformedTag),
        }
    }

    pub fn bucket_key(&self) -> BucketKey {
        match self {
            RoutingDecision::Assigned(cell) => BucketKey::Cell((*cell).clone()),
            RoutingDecision::UnknownPair => BucketKey::Rejected(Rejection::UnknownPair),
            RoutingDecision::MalformedTag => BucketKey::Rejected(Rejection::MalformedTag),
        }
    }
}

/// Extract the tag name from a FASTQ header (without the `@`): the last
/// space-separated token, provided the header also has a read name before
/// it and the token is printable, non-blank ASCII that is not an Illumina
/// read comment.
pub fn tag_annotation(header: &[u8]) -> Option<&str> {
    let header = std::str::from_utf8(header).ok()?;
    let (name, tag) = header.rsplit_once(' ')?;

    if name.trim().is_empty() || !TAG_TOKEN.is_match(tag) || CASAVA_COMMENT.is_match(tag) {
        return None;
    }
    Some(tag)
}

/// Route a read pair. Pure: looks only at the pair and the registry.
pub fn classify<'a>(pair: &ReadPair, registry: &'a Registry) -> RoutingDecision<'a> {
    if pair.defect().is_some() {
        return RoutingDecision::MalformedTag;
    }

    let forward = tag_annotation(pair.get(WhichRead::R1).header());
    let reverse = tag_annotation(pair.get(WhichRead::R2).header());

    match (forward, reverse) {
        (Some(f), Some(r)) => match registry.resolve(f, r) {
            Some(cell) => RoutingDecision::Assigned(cell),
            None => RoutingDecision::UnknownPair,
        },
        _ => RoutingDecision::MalformedTag,
    }
}
