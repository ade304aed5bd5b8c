//! Placement table: `reference,x_mm,y_mm,rotation_deg,locked`

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

use super::{Placement, PlacementError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRow {
    pub reference: String,
    pub x_mm: f64,
    pub y_mm: f64,
    pub rotation_deg: f64,
    pub locked: bool,
}

impl From<&Placement> for PlacementRow {
    fn from(p: &Placement) -> Self {
        Self {
            reference: p.reference.clone(),
            x_mm: p.x_mm,
            y_mm: p.y_mm,
            rotation_deg: p.rotation_deg,
            locked: p.locked,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementTable {
    rows: Vec<PlacementRow>,
}

impl PlacementTable {
    pub fn from_placements(placements: &[Placement]) -> Self {
        Self {
            rows: placements.iter().map(PlacementRow::from).collect(),
        }
    }

    pub fn rows(&self) -> &[PlacementRow] {
        &self.rows
    }

    pub fn get(&self, reference: &str) -> Option<&PlacementRow> {
        self.rows.iter().find(|r| r.reference == reference)
    }

    /// Move a row by hand and lock it.
    pub fn set_position(&mut self, reference: &str, x_mm: f64, y_mm: f64) -> Result<(), PlacementError> {
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.reference == reference)
            .ok_or_else(|| PlacementError::UnknownReference(reference.to_string()))?;
        row.x_mm = x_mm;
        row.y_mm = y_mm;
        row.locked = true;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PlacementError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        for (i, record) in csv_reader.deserialize::<PlacementRow>().enumerate() {
            // header is line 1
            let line = i as u64 + 2;
            let row = record.map_err(|e| PlacementError::InvalidRow {
                line,
                message: e.to_string(),
            })?;
            if row.reference.trim().is_empty() {
                return Err(PlacementError::InvalidRow {
                    line,
                    message: "empty reference".to_string(),
                });
            }
            if !row.x_mm.is_finite() || !row.y_mm.is_finite() || !row.rotation_deg.is_finite() {
                return Err(PlacementError::InvalidRow {
                    line,
                    message: format!("{}: non-finite coordinate", row.reference),
                });
            }
            if !seen.insert(row.reference.clone()) {
                return Err(PlacementError::DuplicateReference(row.reference));
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn read(path: &Path) -> Result<Self, PlacementError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), PlacementError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, PlacementError> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf)?;
        Ok(buf)
    }

    pub fn write(&self, path: &Path) -> Result<(), PlacementError> {
        std::fs::write(path, self.to_csv()?)?;
        Ok(())
    }
}
