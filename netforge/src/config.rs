//! Run configuration
//!
//! One JSON document describes a run. Unknown keys are rejected. Component
//! values are strings in engineering notation and are parsed when the rule
//! configuration is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::model::{NetClass, Position};
use crate::placement::{GridSpec, PlacementClass};
use crate::rules::{RuleConfig, Waiver};
use crate::value::parse_si_value;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{field}: invalid value '{value}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    #[error("{field} is required")]
    Missing { field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    /// Registered generator to run.
    pub generator: String,
    /// Plugin manifest, relative to the configuration file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// Declarative design read by the `design_file` generator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design: Option<PathBuf>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "led_touch_grid".to_string(),
            generator: "touch_grid".to_string(),
            manifest: None,
            design: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecouplingConfig {
    pub target: String,
    /// Relative tolerance, 0.2 = ±20 %.
    pub tolerance: f64,
}

impl Default for DecouplingConfig {
    fn default() -> Self {
        Self {
            target: "100nF".to_string(),
            tolerance: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PullupConfig {
    pub min: String,
    pub max: String,
    pub classes: Vec<NetClass>,
}

impl Default for PullupConfig {
    fn default() -> Self {
        Self {
            min: "1k".to_string(),
            max: "10k".to_string(),
            classes: vec![NetClass::OpenDrain],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkConfig {
    pub min: String,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            min: "100uF".to_string(),
        }
    }
}

/// External EDA command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalConfig {
    pub kicad_cli: String,
    pub timeout_secs: u64,
    /// Run ERC on the root document after publication.
    pub erc: bool,
    pub export_pdf: bool,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            kicad_cli: "kicad-cli".to_string(),
            timeout_secs: 120,
            erc: false,
            export_pdf: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub project: ProjectConfig,
    pub grid: GridSpec,
    pub placement_classes: Vec<PlacementClass>,
    /// Net-class overrides by exact name or `PREFIX*` pattern.
    pub net_classes: BTreeMap<String, NetClass>,
    pub decoupling: DecouplingConfig,
    pub pullup: PullupConfig,
    pub bulk: BulkConfig,
    pub waivers: Vec<Waiver>,
    pub external: ExternalConfig,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Touch pads and four LEDs around each pad.
pub fn default_placement_classes() -> Vec<PlacementClass> {
    let leds = PlacementClass::new("LED", "LED_SMD:LED_APA102-2020").with_offsets(vec![
        Position::new(-5.0, -5.0),
        Position::new(5.0, -5.0),
        Position::new(-5.0, 5.0),
        Position::new(5.0, 5.0),
    ]);
    vec![PlacementClass::new("TP", "Custom:Touch_Pad_19x19mm"), leds]
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            grid: GridSpec::default(),
            placement_classes: default_placement_classes(),
            net_classes: BTreeMap::new(),
            decoupling: DecouplingConfig::default(),
            pullup: PullupConfig::default(),
            bulk: BulkConfig::default(),
            waivers: Vec::new(),
            external: ExternalConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

/// Largest first reference index of a placement class.
pub const MAX_START_INDEX: u32 = 1_000_000;

/// A name usable as the stem of an output file: one normal path component.
fn is_file_stem(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        })
    }
}

fn parse_value(field: &str, value: &str) -> Result<f64, ConfigError> {
    match parse_si_value(value) {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(_) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be positive".to_string(),
        }),
        None => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "not a number in engineering notation".to_string(),
        }),
    }
}

impl GeneratorConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: GeneratorConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "project.name".to_string(),
            });
        }
        if !is_file_stem(&self.project.name) {
            return Err(ConfigError::InvalidValue {
                field: "project.name".to_string(),
                value: self.project.name.clone(),
                reason: "must be a plain file name without separators or '..'".to_string(),
            });
        }
        if self.project.generator.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "project.generator".to_string(),
            });
        }
        if self.project.generator == "design_file" && self.project.design.is_none() {
            return Err(ConfigError::Missing {
                field: "project.design".to_string(),
            });
        }

        let grid = &self.grid;
        check_range("grid.rows", grid.rows as f64, 1.0, 64.0)?;
        check_range("grid.cols", grid.cols as f64, 1.0, 64.0)?;
        check_range("grid.spacing_x_mm", grid.spacing_x_mm, 0.1, 1000.0)?;
        check_range("grid.spacing_y_mm", grid.spacing_y_mm, 0.1, 1000.0)?;
        check_range("grid.origin.x", grid.origin.x, -10_000.0, 10_000.0)?;
        check_range("grid.origin.y", grid.origin.y, -10_000.0, 10_000.0)?;
        check_range("grid.clearance_epsilon_mm", grid.clearance_epsilon_mm, 0.0, 10.0)?;

        for (i, class) in self.placement_classes.iter().enumerate() {
            let field = format!("placement_classes[{}]", i);
            if class.prefix.is_empty() || !class.prefix.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.prefix", field),
                    value: class.prefix.clone(),
                    reason: "must be one or more ASCII letters".to_string(),
                });
            }
            if class.footprint.trim().is_empty() {
                return Err(ConfigError::Missing {
                    field: format!("{}.footprint", field),
                });
            }
            check_range(&format!("{}.offsets", field), class.offsets.len() as f64, 1.0, 16.0)?;
            for (k, offset) in class.offsets.iter().enumerate() {
                check_range(&format!("{}.offsets[{}].x", field, k), offset.x, -1000.0, 1000.0)?;
                check_range(&format!("{}.offsets[{}].y", field, k), offset.y, -1000.0, 1000.0)?;
            }
            check_range(&format!("{}.rotation_deg", field), class.rotation_deg, -360.0, 360.0)?;
            check_range(
                &format!("{}.start_index", field),
                class.start_index as f64,
                0.0,
                MAX_START_INDEX as f64,
            )?;
        }

        check_range("decoupling.tolerance", self.decoupling.tolerance, 0.0, 1.0)?;
        check_range("external.timeout_secs", self.external.timeout_secs as f64, 1.0, 3600.0)?;

        // Surfaces unparsable values and an inverted pull-up range.
        self.to_rule_config().map(|_| ())
    }

    /// Numeric rule parameters parsed from the engineering-notation strings.
    pub fn to_rule_config(&self) -> Result<RuleConfig, ConfigError> {
        let pullup_min = parse_value("pullup.min", &self.pullup.min)?;
        let pullup_max = parse_value("pullup.max", &self.pullup.max)?;
        if pullup_min > pullup_max {
            return Err(ConfigError::InvalidValue {
                field: "pullup.min".to_string(),
                value: self.pullup.min.clone(),
                reason: format!("greater than pullup.max ({})", self.pullup.max),
            });
        }
        Ok(RuleConfig {
            decoupling_target: parse_value("decoupling.target", &self.decoupling.target)?,
            decoupling_tolerance: self.decoupling.tolerance,
            pullup_min,
            pullup_max,
            pullup_classes: self.pullup.classes.clone(),
            bulk_min: parse_value("bulk.min", &self.bulk.min)?,
            waivers: self.waivers.clone(),
        })
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.project.manifest.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn design_path(&self) -> Option<PathBuf> {
        self.project.design.as_deref().map(|p| self.resolve_path(p))
    }
}
