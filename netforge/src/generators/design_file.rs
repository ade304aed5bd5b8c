//! Declarative design read from JSON

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::model::HierarchicalSchematic;

use super::{GenerateError, Generator};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DesignFileOptions {
    /// Overrides `project.design`; relative to the configuration file.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DesignFileGenerator {
    name: String,
    options: DesignFileOptions,
}

impl Default for DesignFileGenerator {
    fn default() -> Self {
        Self::new("design_file", DesignFileOptions::default())
    }
}

impl DesignFileGenerator {
    pub fn new(name: impl Into<String>, options: DesignFileOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Read a design document.
pub fn load_design(path: &std::path::Path) -> Result<HierarchicalSchematic, GenerateError> {
    let text = std::fs::read_to_string(path).map_err(|source| GenerateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| GenerateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Generator for DesignFileGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Hierarchical design declared in a JSON file"
    }

    fn generate(&self, config: &GeneratorConfig) -> Result<HierarchicalSchematic, GenerateError> {
        let path = match &self.options.path {
            Some(p) => config.resolve_path(p),
            None => config.design_path().ok_or_else(|| GenerateError::Missing {
                generator: self.name.clone(),
                field: "project.design".to_string(),
            })?,
        };
        let design = load_design(&path)?;
        debug!(path = %path.display(), title = %design.title, "design loaded");
        Ok(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Net, Pin, PinType, Symbol};
    use tempfile::TempDir;

    #[test]
    fn test_loads_relative_to_config() {
        let dir = TempDir::new().unwrap();
        let mut design = HierarchicalSchematic::new("board");
        design.root.add_symbol(
            Symbol::new("R1", "Device:R", "10k")
                .with_footprint("Resistor_SMD:R_0402_1005Metric")
                .with_pin(Pin::new("1", "~", PinType::Passive)),
        );
        design.root.add_net(Net::new("N1").connect("R1", "1"));
        std::fs::write(dir.path().join("board.json"), serde_json::to_string(&design).unwrap()).unwrap();

        let mut config = GeneratorConfig::default();
        config.base_dir = dir.path().to_path_buf();
        config.project.design = Some(PathBuf::from("board.json"));

        let loaded = DesignFileGenerator::default().generate(&config).unwrap();
        assert_eq!(loaded, design);
    }

    #[test]
    fn test_missing_design_path() {
        let err = DesignFileGenerator::default()
            .generate(&GeneratorConfig::default())
            .unwrap_err();
        assert!(matches!(err, GenerateError::Missing { .. }));
    }

    #[test]
    fn test_malformed_design() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ \"title\": 3 }").unwrap();
        let generator = DesignFileGenerator::new(
            "bad",
            DesignFileOptions {
                path: Some(dir.path().join("bad.json")),
            },
        );
        let err = generator.generate(&GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, GenerateError::Parse { .. }));
    }
}
