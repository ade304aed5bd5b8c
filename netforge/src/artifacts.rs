//! Run artifacts: provenance stamp, summary, bill of materials and staged
//! publication of output files.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::validate::is_contained_path;
use crate::model::{HierarchicalSchematic, PinDirection};
use crate::placement::PlacementStats;
use crate::rules::{Finding, SeverityCounts};
use crate::value::natural_cmp;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to write {0} outside the output directory")]
    UnsafePath(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Who produced an artifact and from which source revision.
///
/// Passed into the pipeline so that identical inputs give identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub generator_version: String,
    pub source_revision: String,
    pub timestamp: DateTime<Utc>,
}

impl Provenance {
    pub fn new(
        generator_version: impl Into<String>,
        source_revision: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            generator_version: generator_version.into(),
            source_revision: source_revision.into(),
            timestamp,
        }
    }

    /// Stamp with an RFC 3339 timestamp; an unreadable timestamp falls back to the Unix epoch.
    pub fn fixed(generator_version: &str, source_revision: &str, rfc3339: &str) -> Self {
        let timestamp = DateTime::parse_from_rfc3339(rfc3339)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_default();
        Self::new(generator_version, source_revision, timestamp)
    }

    /// Stamp for this crate version, the revision of `dir` and the current time.
    pub fn current(dir: &Path) -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION"),
            source_revision(dir).unwrap_or_else(|| "unknown".to_string()),
            Utc::now(),
        )
    }

    pub fn date(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    pub fn iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Short commit hash of the git checkout containing `dir`, if any.
pub fn source_revision(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetPinSummary {
    pub name: String,
    pub direction: PinDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetSummary {
    pub scope: String,
    pub file: String,
    pub pins: Vec<SheetPinSummary>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Written,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentStatus {
    pub scope: String,
    pub path: String,
    pub status: DocumentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Contents of `<title>.summary.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub title: String,
    pub generator: String,
    pub generator_version: String,
    pub source_revision: String,
    pub timestamp: String,
    pub accepted: bool,
    pub counts: SeverityCounts,
    pub references: Vec<String>,
    pub nets: BTreeMap<String, Vec<String>>,
    pub hierarchy: Vec<SheetSummary>,
    pub findings: Vec<Finding>,
    pub documents: Vec<DocumentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementStats>,
    #[serde(default)]
    pub plugin_failures: usize,
    /// Error that stopped the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
}

impl RunSummary {
    /// Summary of a run that has produced nothing yet.
    pub fn new(title: &str, generator: &str, stamp: &Provenance) -> Self {
        Self {
            title: title.to_string(),
            generator: generator.to_string(),
            generator_version: stamp.generator_version.clone(),
            source_revision: stamp.source_revision.clone(),
            timestamp: stamp.iso(),
            accepted: false,
            counts: SeverityCounts::default(),
            references: Vec::new(),
            nets: BTreeMap::new(),
            hierarchy: Vec::new(),
            findings: Vec::new(),
            documents: Vec::new(),
            placement: None,
            plugin_failures: 0,
            fatal: None,
        }
    }

    pub fn file_name(title: &str) -> String {
        format!("{}.summary.json", title)
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let path = dir.join(Self::file_name(&self.title));
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        fs::write(&path, text).map_err(io_err(&path))?;
        debug!(path = %path.display(), "summary written");
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self, ArtifactError> {
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Every sheet of the design with its backing file and pins.
pub fn hierarchy_summary(design: &HierarchicalSchematic) -> Vec<SheetSummary> {
    design
        .scopes()
        .into_iter()
        .filter_map(|scope| {
            let sheet = scope.sheet?;
            Some(SheetSummary {
                scope: scope.path.clone(),
                file: sheet.file.clone(),
                pins: sheet
                    .pins
                    .iter()
                    .map(|p| SheetPinSummary {
                        name: p.name.clone(),
                        direction: p.direction,
                    })
                    .collect(),
            })
        })
        .collect()
}

/// Design-wide references. A reference used in more than one scope is
/// qualified with its scope path (`/power/C1`).
pub fn design_references(design: &HierarchicalSchematic) -> Vec<String> {
    let scopes = design.scopes();
    let mut uses: HashMap<&str, usize> = HashMap::new();
    for scope in &scopes {
        for symbol in &scope.schematic.symbols {
            *uses.entry(symbol.reference.as_str()).or_default() += 1;
        }
    }
    let mut refs: Vec<String> = scopes
        .iter()
        .flat_map(|scope| {
            let uses = &uses;
            scope.schematic.symbols.iter().map(move |symbol| {
                if uses.get(symbol.reference.as_str()).copied().unwrap_or(0) > 1 {
                    crate::model::child_scope(&scope.path, &symbol.reference)
                } else {
                    symbol.reference.clone()
                }
            })
        })
        .collect();
    refs.sort_by(|a, b| natural_cmp(a, b));
    refs
}

/// One bill-of-materials line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BomRow {
    pub value: String,
    pub footprint: String,
    pub quantity: usize,
    pub references: String,
}

/// Group symbols by value and footprint.
pub fn bom_rows(design: &HierarchicalSchematic) -> Vec<BomRow> {
    let scopes = design.scopes();
    let mut uses: HashMap<&str, usize> = HashMap::new();
    for scope in &scopes {
        for symbol in &scope.schematic.symbols {
            *uses.entry(symbol.reference.as_str()).or_default() += 1;
        }
    }

    let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for scope in &scopes {
        for symbol in &scope.schematic.symbols {
            let reference = if uses.get(symbol.reference.as_str()).copied().unwrap_or(0) > 1 {
                crate::model::child_scope(&scope.path, &symbol.reference)
            } else {
                symbol.reference.clone()
            };
            groups
                .entry((
                    symbol.value.clone(),
                    symbol.footprint.clone().unwrap_or_default(),
                ))
                .or_default()
                .push(reference);
        }
    }

    let mut rows: Vec<BomRow> = groups
        .into_iter()
        .map(|((value, footprint), mut refs)| {
            refs.sort_by(|a, b| natural_cmp(a, b));
            BomRow {
                value,
                footprint,
                quantity: refs.len(),
                references: refs.join(" "),
            }
        })
        .collect();
    rows.sort_by(|a, b| natural_cmp(&a.references, &b.references));
    rows
}

pub fn bom_file_name(title: &str) -> String {
    format!("{}.bom.csv", title)
}

/// Render BOM rows as CSV text.
pub fn bom_csv(rows: &[BomRow]) -> Result<String, ArtifactError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ArtifactError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Files written into a temporary directory inside the target directory,
/// moved into place only by [`StagedOutput::commit`].
///
/// Dropping an uncommitted stage removes everything written to it.
pub struct StagedOutput {
    staging: TempDir,
    target: PathBuf,
    files: Vec<PathBuf>,
}

impl StagedOutput {
    pub fn new(target: &Path) -> Result<Self, ArtifactError> {
        fs::create_dir_all(target).map_err(io_err(target))?;
        let staging = tempfile::Builder::new()
            .prefix(".netforge-stage-")
            .tempdir_in(target)
            .map_err(io_err(target))?;
        Ok(Self {
            staging,
            target: target.to_path_buf(),
            files: Vec::new(),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Write `contents` to `relative` inside the stage.
    pub fn write(&mut self, relative: &str, contents: &[u8]) -> Result<(), ArtifactError> {
        if !is_contained_path(relative) {
            return Err(ArtifactError::UnsafePath(relative.to_string()));
        }
        let path = self.staging.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = File::create(&path).map_err(io_err(&path))?;
        file.write_all(contents).map_err(io_err(&path))?;
        file.sync_all().map_err(io_err(&path))?;
        self.files.push(PathBuf::from(relative));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Move every staged file into the target directory.
    pub fn commit(self) -> Result<Vec<PathBuf>, ArtifactError> {
        let mut published = Vec::with_capacity(self.files.len());
        for relative in &self.files {
            let from = self.staging.path().join(relative);
            let to = self.target.join(relative);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            fs::rename(&from, &to).map_err(io_err(&to))?;
            published.push(to);
        }
        info!(files = published.len(), target = %self.target.display(), "published");
        Ok(published)
    }
}
