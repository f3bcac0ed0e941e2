//! The reference table mapping a (forward tag, reverse tag) pair to the
//! cell it was assigned to during library preparation.

use std::borrow::Borrow;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use fxhash::{FxHashMap, FxHashSet};
use serde::de::{MapAccess, Visitor};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Name of a 5' tag, as reported by the tag-trimming step.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(transparent)]
pub struct TagName(String);

/// Name of a cell (a sample well), e.g. `1A01`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(transparent)]
pub struct CellId(String);

macro_rules! string_newtype {
    ($name:ident) => {
        impl $name {
            pub fn new(name: impl Into<String>) -> $name {
                $name(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> $name {
                $name(name.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(TagName);
string_newtype!(CellId);

/// Lookup key of the registry: the forward (R1) and reverse (R2) tag.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TagPairKey {
    pub forward: TagName,
    pub reverse: TagName,
}

impl fmt::Display for TagPairKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.forward, self.reverse)
    }
}

/// One row of the reference table.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TagPairRecord {
    pub forward_tag: TagName,
    pub reverse_tag: TagName,
    pub cell_id: CellId,
}

impl TagPairRecord {
    pub fn new(forward: &str, reverse: &str, cell: &str) -> TagPairRecord {
        TagPairRecord {
            forward_tag: forward.into(),
            reverse_tag: reverse.into(),
            cell_id: cell.into(),
        }
    }
}

/// The reference table as stored on disk. Either a list of records, or an
/// object keyed by cell listing that cell's `[forward, reverse]` tag pairs:
///
/// ```json
/// {"1A01": [["F1", "R1"]], "1A02": [["F1", "R2"], ["F2", "R2"]]}
/// ```
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(untagged)]
pub enum ReferenceTable {
    Records(Vec<TagPairRecord>),
    ByCell(CellTable),
}

/// The by-cell layout, in file order. A cell key that appears more than
/// once keeps every entry, so repeated tag pairs still reach the duplicate
/// check of `Registry::load`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellTable(pub Vec<(CellId, Vec<(TagName, TagName)>)>);

impl serde::Serialize for CellTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(cell, pairs)| (cell, pairs)))
    }
}

impl<'de> serde::Deserialize<'de> for CellTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<CellTable, D::Error> {
        struct CellTableVisitor;

        impl<'de> Visitor<'de> for CellTableVisitor {
            type Value = CellTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping cell names to lists of [forward, reverse] tags")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<CellTable, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(CellTable(entries))
            }
        }

        deserializer.deserialize_map(CellTableVisitor)
    }
}

impl ReferenceTable {
    pub fn into_records(self) -> Vec<TagPairRecord> {
        match self {
            ReferenceTable::Records(records) => records,
            ReferenceTable::ByCell(CellTable(cells)) => cells
                .into_iter()
                .flat_map(|(cell_id, pairs)| {
                    pairs
                        .into_iter()
                        .map(move |(forward_tag, reverse_tag)| TagPairRecord {
                            forward_tag,
                            reverse_tag,
                            cell_id: cell_id.clone(),
                        })
                })
                .collect(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("tag pair {key} is listed more than once (cells {first} and {second})")]
    DuplicateKey {
        key: TagPairKey,
        first: CellId,
        second: CellId,
    },

    #[error("the reference table has no entries")]
    EmptyTable,

    #[error("entry {index} of the reference table has an empty tag or cell name")]
    EmptyName { index: usize },

    #[error("cell name {0:?} cannot be used as an output directory name")]
    InvalidCellId(CellId),

    /// Two cells would share an output directory on a case-insensitive
    /// filesystem.
    #[error("cell names {first:?} and {second:?} differ only in case")]
    CellIdCaseCollision { first: CellId, second: CellId },

    #[error("unable to read reference table {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse reference table {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn valid_cell_dir_name(cell: &str) -> bool {
    cell != "." && cell != ".." && !cell.contains(&['/', '\\', '\0'][..])
}

/// Exact-match lookup from tag pair to cell. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Registry {
    // forward tag -> reverse tag -> cell, so lookups can borrow the read's tags
    lookup: FxHashMap<TagName, FxHashMap<TagName, CellId>>,
    // every cell once, in the order the table declares them
    cells: Vec<CellId>,
    n_keys: usize,
}

impl Registry {
    /// Build a registry from table records. Every tag pair must appear once.
    pub fn load<I>(table: I) -> Result<Registry, LoadError>
    where
        I: IntoIterator<Item = TagPairRecord>,
    {
        let mut lookup: FxHashMap<TagName, FxHashMap<TagName, CellId>> = FxHashMap::default();
        let mut cells = Vec::new();
        let mut seen_cells = FxHashSet::default();
        let mut folded_cells: FxHashMap<String, CellId> = FxHashMap::default();
        let mut n_keys = 0;

        for (index, rec) in table.into_iter().enumerate() {
            if rec.forward_tag.as_str().is_empty()
                || rec.reverse_tag.as_str().is_empty()
                || rec.cell_id.as_str().is_empty()
            {
                return Err(LoadError::EmptyName { index });
            }
            if !valid_cell_dir_name(rec.cell_id.as_str()) {
                return Err(LoadError::InvalidCellId(rec.cell_id));
            }

            let by_reverse = lookup.entry(rec.forward_tag.clone()).or_default();
            if let Some(first) = by_reverse.get(&rec.reverse_tag) {
                return Err(LoadError::DuplicateKey {
                    key: TagPairKey {
                        forward: rec.forward_tag,
                        reverse: rec.reverse_tag,
                    },
                    first: first.clone(),
                    second: rec.cell_id,
                });
            }

            if seen_cells.insert(rec.cell_id.clone()) {
                let folded = rec.cell_id.as_str().to_lowercase();
                if let Some(first) = folded_cells.get(&folded) {
                    return Err(LoadError::CellIdCaseCollision {
                        first: first.clone(),
                        second: rec.cell_id,
                    });
                }
                folded_cells.insert(folded, rec.cell_id.clone());
                cells.push(rec.cell_id.clone());
            }
            by_reverse.insert(rec.reverse_tag, rec.cell_id);
            n_keys += 1;
        }

        if n_keys == 0 {
            return Err(LoadError::EmptyTable);
        }

        Ok(Registry {
            lookup,
            cells,
            n_keys,
        })
    }

    /// Load the reference table from a JSON file.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Registry, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table: ReferenceTable =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| LoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Registry::load(table.into_records())
    }

    /// The cell assigned to a tag pair. Tags are compared exactly.
    #[inline]
    pub fn resolve(&self, forward: &str, reverse: &str) -> Option<&CellId> {
        self.lookup.get(forward)?.get(reverse)
    }

    /// Every cell in the table, once, in declaration order.
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of tag pairs.
    pub fn len(&self) -> usize {
        self.n_keys
    }

    pub fn is_empty(&self) -> bool {
        self.n_keys == 0
    }

    /// Iterate over all (key, cell) entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (TagPairKey, &CellId)> + '_ {
        self.lookup.iter().flat_map(|(forward, by_reverse)| {
            by_reverse.iter().map(move |(reverse, cell)| {
                (
                    TagPairKey {
                        forward: forward.clone(),
                        reverse: reverse.clone(),
                    },
                    cell,
                )
            })
        })
    }
}
