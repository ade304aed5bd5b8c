//! Netforge - hierarchical schematic generation and electrical rule checking
//!
//! Builds a hierarchical schematic in memory, resolves its nets across sheet
//! boundaries, checks the result against electrical rules and, when no
//! error-level finding remains, writes deterministic KiCad schematic documents
//! together with a BOM, a placement table and a run summary.
//!
//! # Quick Start
//!
//! ```no_run
//! use netforge::{GeneratorConfig, NetforgeCore, Provenance, RunOptions};
//! use std::path::Path;
//!
//! let config = GeneratorConfig::load(Path::new("netforge.json")).unwrap();
//! let options = RunOptions::new("out", Provenance::current(Path::new(".")));
//! let outcome = NetforgeCore::generate(&config, &options).unwrap();
//!
//! for finding in &outcome.summary.findings {
//!     println!("{:?}: {}", finding.severity, finding.message);
//! }
//! ```
//!
//! # Features
//!
//! - **Net resolution**: union-find across labels, sheet pins and global power nets
//! - **Rules**: decoupling, pull-ups, floating inputs, hierarchy and bulk capacitance
//! - **Serialization**: byte-stable S-expression output with stable UUIDs
//! - **Placement**: grid footprint placement with locked rows and conflict checks

pub mod artifacts;
pub mod config;
pub mod core;
pub mod external;
pub mod generators;
pub mod model;
pub mod placement;
pub mod plugins;
pub mod registry;
pub mod resolve;
pub mod rules;
pub mod serialize;
pub mod value;

// Re-export main types
pub use crate::core::{
    placement_file_name, CheckReport, ExternalRun, NetforgeCore, NetforgeError, Registries, RunOptions,
    RunOutcome,
};
pub use artifacts::{Provenance, RunSummary};
pub use config::{ConfigError, GeneratorConfig};
pub use generators::{Generator, GenerateError};
pub use model::{HierarchicalSchematic, Net, NetClass, Pin, PinDirection, PinType, Schematic, Sheet, Symbol};
pub use placement::{GridSpec, PlacementClass, PlacementPlan, PlacementTable};
pub use resolve::{resolve, Connectivity};
pub use rules::{Finding, FindingKind, Rule, RuleConfig, RuleContext, RuleEngine, Severity};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Finding, GeneratorConfig, HierarchicalSchematic, NetforgeCore, NetforgeError, Provenance, RunOptions,
        RunOutcome, Severity,
    };
}
