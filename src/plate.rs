//! Plate-shaped readout of per-cell counts.
//!
//! Cells named `<plate><row><column>` (`1A01` .. `6H12`) are laid out on
//! 96-well plates, one 8×12 grid per plate. Wells with no declared cell are
//! shown as `.`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::registry::CellId;
use crate::summary::Summary;

pub const ROWS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];
pub const COLUMNS: usize = 12;

lazy_static! {
    static ref WELL_NAME: Regex = Regex::new(r"^([0-9]+)([A-H])(0[1-9]|1[0-2])$").unwrap();
}

/// Position of a cell on a plate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Well {
    pub plate: u32,
    /// 0-based row, `A` is 0.
    pub row: usize,
    /// 0-based column, `01` is 0.
    pub column: usize,
}

impl Well {
    pub fn parse(cell: &str) -> Option<Well> {
        let caps = WELL_NAME.captures(cell)?;
        let plate = caps[1].parse().ok()?;
        let row = caps[2].as_bytes()[0] - b'A';
        let column: usize = caps[3].parse().ok()?;
        Some(Well {
            plate,
            row: row as usize,
            column: column - 1,
        })
    }
}

type Grid = [[Option<u64>; COLUMNS]; 8];

#[derive(Clone, Debug, Default)]
pub struct PlateLayout {
    plates: BTreeMap<u32, Grid>,
    /// Cells whose names are not well positions, with their counts.
    other: Vec<(CellId, u64)>,
}

impl PlateLayout {
    pub fn from_summary(summary: &Summary) -> PlateLayout {
        let mut layout = PlateLayout::default();
        for (cell, pairs) in summary.cells() {
            match Well::parse(cell.as_str()) {
                Some(well) => {
                    let grid = layout.plates.entry(well.plate).or_insert([[None; COLUMNS]; 8]);
                    grid[well.row][well.column] = Some(pairs);
                }
                None => layout.other.push((cell.clone(), pairs)),
            }
        }
        layout.other.sort();
        layout
    }

    pub fn num_plates(&self) -> usize {
        self.plates.len()
    }

    pub fn get(&self, well: Well) -> Option<u64> {
        self.plates.get(&well.plate)?[well.row][well.column]
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (plate, grid) in &self.plates {
            let _ = writeln!(out, "# plate {}", plate);
            out.push_str("row");
            for col in 1..=COLUMNS {
                let _ = write!(out, "\t{:02}", col);
            }
            out.push('\n');

            for (row, counts) in ROWS.iter().zip(grid.iter()) {
                out.push(*row);
                for count in counts {
                    match count {
                        Some(n) => {
                            let _ = write!(out, "\t{}", n);
                        }
                        None => out.push_str("\t."),
                    }
                }
                out.push('\n');
            }
            out.push('\n');
        }

        if !self.other.is_empty() {
            out.push_str("# other cells\n");
            for (cell, n) in &self.other {
                let _ = writeln!(out, "{}\t{}", cell, n);
            }
        }
        out
    }

    pub fn write(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RoutingDecision;
    use crate::registry::{Registry, TagPairRecord};
    use crate::summary::RunSummary;
    use pretty_assertions::assert_eq;

    #[test]
    fn well_names() {
        assert_eq!(
            Well::parse("1A01"),
            Some(Well {
                plate: 1,
                row: 0,
                column: 0
            })
        );
        assert_eq!(
            Well::parse("6H12"),
            Some(Well {
                plate: 6,
                row: 7,
                column: 11
            })
        );
        assert_eq!(Well::parse("1A13"), None);
        assert_eq!(Well::parse("1A00"), None);
        assert_eq!(Well::parse("1I01"), None);
        assert_eq!(Well::parse("CellA"), None);
    }

    #[test]
    fn grid_from_summary() {
        let reg = Registry::load(vec![
            TagPairRecord::new("F1", "R1", "1A01"),
            TagPairRecord::new("F2", "R1", "1B12"),
            TagPairRecord::new("F1", "R2", "2H03"),
            TagPairRecord::new("F2", "R2", "blank"),
        ])
        .unwrap();

        let a01 = CellId::from("1A01");
        let blank = CellId::from("blank");
        let mut summary = RunSummary::new(&reg);
        summary.record(&RoutingDecision::Assigned(&a01));
        summary.record(&RoutingDecision::Assigned(&a01));
        summary.record(&RoutingDecision::Assigned(&blank));
        summary.record(&RoutingDecision::UnknownPair);

        let layout = PlateLayout::from_summary(&summary.report());
        assert_eq!(layout.num_plates(), 2);
        assert_eq!(layout.get(Well::parse("1A01").unwrap()), Some(2));
        assert_eq!(layout.get(Well::parse("1B12").unwrap()), Some(0));
        assert_eq!(layout.get(Well::parse("1C01").unwrap()), None);
        assert_eq!(layout.get(Well::parse("3A01").unwrap()), None);

        let text = layout.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# plate 1");
        assert_eq!(lines[1], "row\t01\t02\t03\t04\t05\t06\t07\t08\t09\t10\t11\t12");
        assert_eq!(lines[2], "A\t2\t.\t.\t.\t.\t.\t.\t.\t.\t.\t.\t.");
        assert_eq!(lines[3], "B\t.\t.\t.\t.\t.\t.\t.\t.\t.\t.\t.\t0");
        assert_eq!(lines[11], "# plate 2");
        assert!(text.ends_with("# other cells\nblank\t1\n"));
    }
}
