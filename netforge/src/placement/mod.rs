//! Grid placement generator
//!
//! Lays out one or more component classes on a row-major grid. Every class
//! places a fixed number of parts per cell at per-cell offsets. Coordinates
//! are rounded to a micrometre and checked against the nominal formula;
//! parts closer than the clearance epsilon are reported, never moved.
//!
//! Rows locked in a previous placement table keep their coordinates.

pub mod table;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Position, ROOT_SCOPE};
use crate::rules::{Finding, FindingKind, Location, Severity};
use crate::value::{format_mm, natural_cmp};

pub use table::{PlacementRow, PlacementTable};

/// Largest allowed distance between a rounded coordinate and its nominal value (mm).
pub const NOMINAL_TOLERANCE_MM: f64 = 0.01;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("{reference}: coordinate ({x}, {y}) is more than 0.01 mm from its nominal position")]
    ToleranceExceeded { reference: String, x: f64, y: f64 },
    #[error("duplicate reference designator: {0}")]
    DuplicateReference(String),
    #[error("unknown reference designator: {0}")]
    UnknownReference(String),
    #[error("placement class '{prefix}' has no per-cell offsets")]
    EmptyClass { prefix: String },
    #[error("placement class '{prefix}': reference index overflows starting at {start_index}")]
    IndexOverflow { prefix: String, start_index: u32 },
    #[error("placement table line {line}: {message}")]
    InvalidRow { line: u64, message: String },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Grid geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridSpec {
    pub rows: u32,
    pub cols: u32,
    pub spacing_x_mm: f64,
    pub spacing_y_mm: f64,
    pub origin: Position,
    pub clearance_epsilon_mm: f64,
}

pub fn default_clearance_epsilon() -> f64 {
    0.01
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 8,
            cols: 8,
            spacing_x_mm: 20.0,
            spacing_y_mm: 20.0,
            origin: Position::default(),
            clearance_epsilon_mm: default_clearance_epsilon(),
        }
    }
}

impl GridSpec {
    pub fn cells(&self) -> u32 {
        self.rows.saturating_mul(self.cols)
    }

    /// Nominal origin of a cell.
    pub fn cell_origin(&self, row: u32, col: u32) -> Position {
        Position::new(
            self.origin.x + col as f64 * self.spacing_x_mm,
            self.origin.y + row as f64 * self.spacing_y_mm,
        )
    }
}

/// A kind of part placed in every cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementClass {
    pub prefix: String,
    pub footprint: String,
    #[serde(default)]
    pub rotation_deg: f64,
    /// One entry per part in a cell, relative to the cell origin.
    #[serde(default = "default_offsets")]
    pub offsets: Vec<Position>,
    #[serde(default = "default_start_index")]
    pub start_index: u32,
}

fn default_offsets() -> Vec<Position> {
    vec![Position::default()]
}

fn default_start_index() -> u32 {
    1
}

impl PlacementClass {
    pub fn new(prefix: impl Into<String>, footprint: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            footprint: footprint.into(),
            rotation_deg: 0.0,
            offsets: default_offsets(),
            start_index: default_start_index(),
        }
    }

    pub fn with_offsets(mut self, offsets: Vec<Position>) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn per_cell(&self) -> u32 {
        self.offsets.len() as u32
    }

    fn overflow(&self) -> PlacementError {
        PlacementError::IndexOverflow {
            prefix: self.prefix.clone(),
            start_index: self.start_index,
        }
    }

    /// Number of parts this class places on `grid`.
    pub fn count(&self, grid: &GridSpec) -> Result<u32, PlacementError> {
        grid.rows
            .checked_mul(grid.cols)
            .and_then(|cells| cells.checked_mul(self.per_cell()))
            .ok_or_else(|| self.overflow())
    }

    /// Index of part `i` in placement order.
    pub fn index(&self, i: u32) -> Result<u32, PlacementError> {
        self.start_index.checked_add(i).ok_or_else(|| self.overflow())
    }

    /// Index of the last part this class places on `grid`.
    pub fn last_index(&self, grid: &GridSpec) -> Result<u32, PlacementError> {
        match self.count(grid)?.checked_sub(1) {
            Some(last) => self.index(last),
            None => Ok(self.start_index.saturating_sub(1)),
        }
    }

    /// Zero-padding width: the digit count of the largest index.
    pub fn index_width(&self, grid: &GridSpec) -> Result<usize, PlacementError> {
        Ok(self.last_index(grid)?.max(1).to_string().len())
    }

    pub fn reference(&self, index: u32, width: usize) -> String {
        format!("{}{:0width$}", self.prefix, index, width = width)
    }

    /// Every reference this class produces, in placement order.
    pub fn references(&self, grid: &GridSpec) -> Result<Vec<String>, PlacementError> {
        let width = self.index_width(grid)?;
        (0..self.count(grid)?)
            .map(|i| Ok(self.reference(self.index(i)?, width)))
            .collect()
    }
}

/// A placed part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub reference: String,
    pub footprint: String,
    pub x_mm: f64,
    pub y_mm: f64,
    pub rotation_deg: f64,
    pub locked: bool,
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementStats {
    pub placed: usize,
    pub locked: usize,
    pub conflicts: usize,
}

/// Generated placements and the conflicts found among them
#[derive(Debug, Clone, Default)]
pub struct PlacementPlan {
    placements: Vec<Placement>,
    conflicts: Vec<Finding>,
    epsilon: f64,
}

fn round_um(v: f64) -> f64 {
    let r = (v * 1000.0).round() / 1000.0;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Generate placements for every class on the grid.
///
/// Locked rows of `previous` override the generated coordinates and rotation.
pub fn generate(
    grid: &GridSpec,
    classes: &[PlacementClass],
    previous: Option<&PlacementTable>,
) -> Result<PlacementPlan, PlacementError> {
    let locked: HashMap<&str, &PlacementRow> = previous
        .map(|t| {
            t.rows()
                .iter()
                .filter(|r| r.locked)
                .map(|r| (r.reference.as_str(), r))
                .collect()
        })
        .unwrap_or_default();

    let mut placements = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for class in classes {
        if class.offsets.is_empty() {
            return Err(PlacementError::EmptyClass {
                prefix: class.prefix.clone(),
            });
        }
        let width = class.index_width(grid)?;
        let per_cell = class.per_cell();

        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let cell = row * grid.cols + col;
                let base = grid.cell_origin(row, col);
                for (k, offset) in class.offsets.iter().enumerate() {
                    let index = class.index(cell * per_cell + k as u32)?;
                    let reference = class.reference(index, width);
                    if !seen.insert(reference.clone()) {
                        return Err(PlacementError::DuplicateReference(reference));
                    }

                    let nominal_x = base.x + offset.x;
                    let nominal_y = base.y + offset.y;
                    let x = round_um(nominal_x);
                    let y = round_um(nominal_y);
                    if !x.is_finite()
                        || !y.is_finite()
                        || (x - nominal_x).abs() > NOMINAL_TOLERANCE_MM
                        || (y - nominal_y).abs() > NOMINAL_TOLERANCE_MM
                    {
                        return Err(PlacementError::ToleranceExceeded { reference, x, y });
                    }

                    let placement = match locked.get(reference.as_str()) {
                        Some(row_lock) => Placement {
                            reference: reference.clone(),
                            footprint: class.footprint.clone(),
                            x_mm: row_lock.x_mm,
                            y_mm: row_lock.y_mm,
                            rotation_deg: row_lock.rotation_deg,
                            locked: true,
                            row,
                            col,
                        },
                        None => Placement {
                            reference: reference.clone(),
                            footprint: class.footprint.clone(),
                            x_mm: x,
                            y_mm: y,
                            rotation_deg: class.rotation_deg,
                            locked: false,
                            row,
                            col,
                        },
                    };
                    placements.push(placement);
                }
            }
        }
    }

    for reference in locked.keys() {
        if !seen.contains(*reference) {
            warn!(reference = %reference, "locked row no longer generated; dropped");
        }
    }

    let mut plan = PlacementPlan {
        placements,
        conflicts: Vec::new(),
        epsilon: grid.clearance_epsilon_mm,
    };
    plan.conflicts = find_conflicts(&plan.placements, plan.epsilon);
    debug!(
        placed = plan.placements.len(),
        conflicts = plan.conflicts.len(),
        "placement generated"
    );
    Ok(plan)
}

/// Pairs of parts closer than `epsilon`, found with a sort-and-sweep on x.
pub fn find_conflicts(placements: &[Placement], epsilon: f64) -> Vec<Finding> {
    let mut order: Vec<&Placement> = placements.iter().collect();
    order.sort_by(|a, b| {
        a.x_mm
            .total_cmp(&b.x_mm)
            .then_with(|| a.y_mm.total_cmp(&b.y_mm))
            .then_with(|| natural_cmp(&a.reference, &b.reference))
    });

    let mut pairs: Vec<(&Placement, &Placement)> = Vec::new();
    for (i, a) in order.iter().enumerate() {
        for b in order[i + 1..].iter() {
            if b.x_mm - a.x_mm > epsilon {
                break;
            }
            let d = Position::new(a.x_mm, a.y_mm).distance_to(&Position::new(b.x_mm, b.y_mm));
            if d <= epsilon {
                if natural_cmp(&a.reference, &b.reference).is_le() {
                    pairs.push((a, b));
                } else {
                    pairs.push((b, a));
                }
            }
        }
    }
    pairs.sort_by(|x, y| {
        natural_cmp(&x.0.reference, &y.0.reference).then_with(|| natural_cmp(&x.1.reference, &y.1.reference))
    });

    pairs
        .into_iter()
        .map(|(a, b)| {
            Finding::new(
                "placement",
                FindingKind::PlacementConflict,
                Severity::Warning,
                format!(
                    "{} at ({}, {}) and {} at ({}, {}) are within {} mm",
                    a.reference,
                    format_mm(a.x_mm),
                    format_mm(a.y_mm),
                    b.reference,
                    format_mm(b.x_mm),
                    format_mm(b.y_mm),
                    format_mm(epsilon)
                ),
            )
            .at(Location::in_sheet(ROOT_SCOPE).with_pin(format!("{}/{}", a.reference, b.reference)))
            .with_suggestion("Adjust the grid spacing or per-cell offsets")
        })
        .collect()
}

impl PlacementPlan {
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn conflicts(&self) -> &[Finding] {
        &self.conflicts
    }

    pub fn get(&self, reference: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.reference == reference)
    }

    /// Lock every row.
    pub fn accept(&mut self) {
        for p in &mut self.placements {
            p.locked = true;
        }
    }

    pub fn unlock(&mut self, reference: &str) -> Result<(), PlacementError> {
        let placement = self
            .placements
            .iter_mut()
            .find(|p| p.reference == reference)
            .ok_or_else(|| PlacementError::UnknownReference(reference.to_string()))?;
        placement.locked = false;
        Ok(())
    }

    pub fn stats(&self) -> PlacementStats {
        PlacementStats {
            placed: self.placements.len(),
            locked: self.placements.iter().filter(|p| p.locked).count(),
            conflicts: self.conflicts.len(),
        }
    }

    pub fn to_table(&self) -> PlacementTable {
        PlacementTable::from_placements(&self.placements)
    }
}
