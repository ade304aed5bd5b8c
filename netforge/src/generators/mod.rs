//! Design generators
//!
//! A generator turns the run configuration into an in-memory hierarchical
//! design. Generators are looked up by name in a per-run registry.

pub mod design_file;
pub mod touch_grid;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::GeneratorConfig;
use crate::model::{HierarchicalSchematic, Pin, PinType, Symbol};
use crate::placement::PlacementError;
use crate::registry::{Registry, RegistryError};

pub use design_file::{DesignFileGenerator, DesignFileOptions};
pub use touch_grid::{TouchGridGenerator, TouchGridOptions};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generator '{generator}' needs a placement class with prefix '{prefix}'")]
    MissingPlacementClass { generator: String, prefix: String },
    #[error("generator '{generator}': {field} is required")]
    Missing { generator: String, field: String },
    #[error("cannot read design {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid design {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("generator '{generator}': invalid options: {source}")]
    Options {
        generator: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn generate(&self, config: &GeneratorConfig) -> Result<HierarchicalSchematic, GenerateError>;
}

/// Registry holding the built-in generators under their default names.
pub fn builtin_generators() -> Result<Registry<Arc<dyn Generator>>, RegistryError> {
    let mut registry: Registry<Arc<dyn Generator>> = Registry::new("generator");
    register_generator(&mut registry, Arc::new(TouchGridGenerator::default()))?;
    register_generator(&mut registry, Arc::new(DesignFileGenerator::default()))?;
    Ok(registry)
}

pub fn register_generator(
    registry: &mut Registry<Arc<dyn Generator>>,
    generator: Arc<dyn Generator>,
) -> Result<(), RegistryError> {
    let name = generator.name().to_string();
    registry.register(name, generator)
}

pub(crate) const CAPACITOR_FOOTPRINT: &str = "Capacitor_SMD:C_0402_1005Metric";
pub(crate) const BULK_FOOTPRINT: &str = "Capacitor_SMD:CP_Elec_8x10";
pub(crate) const RESISTOR_FOOTPRINT: &str = "Resistor_SMD:R_0402_1005Metric";

/// Two-pin capacitor.
pub(crate) fn capacitor(reference: &str, value: &str, footprint: &str) -> Symbol {
    Symbol::new(reference, "Device:C", value)
        .with_footprint(footprint)
        .with_pin(Pin::new("1", "~", PinType::Passive))
        .with_pin(Pin::new("2", "~", PinType::Passive))
}

/// Two-pin resistor.
pub(crate) fn resistor(reference: &str, value: &str) -> Symbol {
    Symbol::new(reference, "Device:R", value)
        .with_footprint(RESISTOR_FOOTPRINT)
        .with_pin(Pin::new("1", "~", PinType::Passive))
        .with_pin(Pin::new("2", "~", PinType::Passive))
}

/// Schematic coordinates of the `index`th item of a sheet, `per_row` to a row.
pub(crate) fn layout(index: usize, per_row: usize) -> (f64, f64) {
    let per_row = per_row.max(1);
    (
        25.4 + (index % per_row) as f64 * 15.24,
        25.4 + (index / per_row) as f64 * 15.24,
    )
}
