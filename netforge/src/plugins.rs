//! Plugin manifest loading
//!
//! A manifest is a JSON document listing extra rules and generators:
//!
//! ```json
//! { "plugins": [
//!     { "name": "decoupling_10u", "kind": "rule", "factory": "decoupling",
//!       "config": { "decoupling": { "target": "10uF", "tolerance": 0.2 } } },
//!     { "name": "touch_only", "kind": "generator", "factory": "touch_grid",
//!       "config": { "leds": false } }
//! ] }
//! ```
//!
//! Each entry is resolved against the built-in factory catalog and fully
//! constructed before it is registered. Entries that fail are collected and
//! written to `plugin_diagnostics.json`; they are never partially registered.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactError, Provenance};
use crate::config::{BulkConfig, DecouplingConfig, GeneratorConfig, PullupConfig};
use crate::generators::{
    register_generator, DesignFileGenerator, DesignFileOptions, Generator, TouchGridGenerator,
    TouchGridOptions,
};
use crate::registry::Registry;
use crate::rules::{
    BulkCapacitanceRule, DecouplingRule, Finding, FloatingInputRule, HierarchyRule, PullupRule, Rule,
    RuleConfig, RuleContext, Severity, Waiver,
};

pub const DIAGNOSTICS_FILE: &str = "plugin_diagnostics.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Rule,
    Generator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginEntry {
    pub name: String,
    pub kind: PluginKind,
    pub factory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestDocument {
    #[serde(default)]
    plugins: Vec<Value>,
}

/// One manifest entry that could not be loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginFailure {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Names registered, in manifest order.
    pub loaded: Vec<String>,
    pub failures: Vec<PluginFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub const RULE_FACTORIES: &[&str] = &[
    "bulk_capacitance",
    "decoupling",
    "floating_input",
    "hierarchy",
    "pullup",
];

pub const GENERATOR_FACTORIES: &[&str] = &["design_file", "touch_grid"];

fn rule_factory(factory: &str) -> Option<Arc<dyn Rule>> {
    let rule: Arc<dyn Rule> = match factory {
        "decoupling" => Arc::new(DecouplingRule),
        "pullup" => Arc::new(PullupRule),
        "floating_input" => Arc::new(FloatingInputRule),
        "hierarchy" => Arc::new(HierarchyRule),
        "bulk_capacitance" => Arc::new(BulkCapacitanceRule),
        _ => return None,
    };
    Some(rule)
}

/// Rule parameters a manifest entry may override
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleOverrides {
    pub decoupling: Option<DecouplingConfig>,
    pub pullup: Option<PullupConfig>,
    pub bulk: Option<BulkConfig>,
    pub waivers: Option<Vec<Waiver>>,
}

/// A built-in rule registered under another name with its own parameters.
pub struct ConfiguredRule {
    name: String,
    inner: Arc<dyn Rule>,
    overrides: RuleOverrides,
    parsed: RuleConfig,
}

impl ConfiguredRule {
    /// Parse the overrides now so a bad value fails the manifest entry.
    pub fn new(name: impl Into<String>, inner: Arc<dyn Rule>, overrides: RuleOverrides) -> Result<Self, String> {
        let mut scratch = GeneratorConfig::default();
        if let Some(d) = &overrides.decoupling {
            scratch.decoupling = d.clone();
        }
        if let Some(p) = &overrides.pullup {
            scratch.pullup = p.clone();
        }
        if let Some(b) = &overrides.bulk {
            scratch.bulk = b.clone();
        }
        let parsed = scratch.to_rule_config().map_err(|e| e.to_string())?;
        Ok(Self {
            name: name.into(),
            inner,
            overrides,
            parsed,
        })
    }

    fn effective(&self, base: &RuleConfig) -> RuleConfig {
        let mut config = base.clone();
        if self.overrides.decoupling.is_some() {
            config.decoupling_target = self.parsed.decoupling_target;
            config.decoupling_tolerance = self.parsed.decoupling_tolerance;
        }
        if self.overrides.pullup.is_some() {
            config.pullup_min = self.parsed.pullup_min;
            config.pullup_max = self.parsed.pullup_max;
            config.pullup_classes = self.parsed.pullup_classes.clone();
        }
        if self.overrides.bulk.is_some() {
            config.bulk_min = self.parsed.bulk_min;
        }
        if let Some(waivers) = &self.overrides.waivers {
            config.waivers = waivers.clone();
        }
        config
    }
}

impl Rule for ConfiguredRule {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn severity(&self) -> Severity {
        self.inner.severity()
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let config = self.effective(ctx.config);
        let scoped = RuleContext {
            design: ctx.design,
            connectivity: ctx.connectivity,
            config: &config,
        };
        self.inner
            .check(&scoped)
            .into_iter()
            .map(|mut f| {
                f.rule_id = self.name.clone();
                f
            })
            .collect()
    }
}

fn build_generator(entry: &PluginEntry) -> Result<Option<Arc<dyn Generator>>, String> {
    let config = entry.config.clone().unwrap_or(Value::Object(Default::default()));
    let generator: Arc<dyn Generator> = match entry.factory.as_str() {
        "touch_grid" => {
            let options: TouchGridOptions = serde_json::from_value(config).map_err(|e| e.to_string())?;
            Arc::new(TouchGridGenerator::new(entry.name.clone(), options))
        }
        "design_file" => {
            let options: DesignFileOptions = serde_json::from_value(config).map_err(|e| e.to_string())?;
            Arc::new(DesignFileGenerator::new(entry.name.clone(), options))
        }
        _ => return Ok(None),
    };
    Ok(Some(generator))
}

fn build_rule(entry: &PluginEntry) -> Result<Option<Arc<dyn Rule>>, String> {
    let Some(inner) = rule_factory(&entry.factory) else {
        return Ok(None);
    };
    let config = entry.config.clone().unwrap_or(Value::Object(Default::default()));
    let overrides: RuleOverrides = serde_json::from_value(config).map_err(|e| e.to_string())?;
    let rule = ConfiguredRule::new(entry.name.clone(), inner, overrides)?;
    Ok(Some(Arc::new(rule)))
}

/// Load a manifest into the given registries.
///
/// Never fails as a whole: an unreadable manifest is itself a collected failure.
pub fn load_manifest(
    path: &Path,
    rules: &mut Registry<Arc<dyn Rule>>,
    generators: &mut Registry<Arc<dyn Generator>>,
    stamp: &Provenance,
) -> LoadReport {
    let mut report = LoadReport::default();
    let timestamp = stamp.iso();
    let manifest = path.display().to_string();
    let fail = |report: &mut LoadReport, at: String, kind: &str, message: String| {
        warn!(path = %at, kind, %message, "plugin entry rejected");
        report.failures.push(PluginFailure {
            path: at,
            kind: kind.to_string(),
            message,
            timestamp: timestamp.clone(),
        });
    };

    let document: ManifestDocument = match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(doc) => doc,
        Err(message) => {
            fail(&mut report, manifest, "manifest", message);
            return report;
        }
    };

    for (i, raw) in document.plugins.into_iter().enumerate() {
        let at = format!("{}#plugins[{}]", manifest, i);
        let entry: PluginEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                fail(&mut report, at, "entry", e.to_string());
                continue;
            }
        };

        let registered = match entry.kind {
            PluginKind::Rule => match build_rule(&entry) {
                Ok(Some(rule)) => rules.register(entry.name.clone(), rule).map_err(|e| ("register", e.to_string())),
                Ok(None) => Err((
                    "unknown_factory",
                    format!("no rule factory '{}' (available: {})", entry.factory, RULE_FACTORIES.join(", ")),
                )),
                Err(message) => Err(("config", format!("{}: {}", entry.name, message))),
            },
            PluginKind::Generator => match build_generator(&entry) {
                Ok(Some(generator)) => {
                    register_generator(generators, generator).map_err(|e| ("register", e.to_string()))
                }
                Ok(None) => Err((
                    "unknown_factory",
                    format!(
                        "no generator factory '{}' (available: {})",
                        entry.factory,
                        GENERATOR_FACTORIES.join(", ")
                    ),
                )),
                Err(message) => Err(("config", format!("{}: {}", entry.name, message))),
            },
        };

        match registered {
            Ok(()) => {
                debug!(name = %entry.name, kind = ?entry.kind, factory = %entry.factory, "plugin registered");
                report.loaded.push(entry.name);
            }
            Err((kind, message)) => fail(&mut report, at, kind, message),
        }
    }

    info!(
        manifest = %manifest,
        loaded = report.loaded.len(),
        failed = report.failures.len(),
        "plugin manifest loaded"
    );
    report
}

/// Write `plugin_diagnostics.json` into `dir` when there are failures.
pub fn write_diagnostics(dir: &Path, failures: &[PluginFailure]) -> Result<Option<PathBuf>, ArtifactError> {
    if failures.is_empty() {
        return Ok(None);
    }
    let path = dir.join(DIAGNOSTICS_FILE);
    let mut json = serde_json::to_string_pretty(failures)?;
    json.push('\n');
    std::fs::write(&path, json).map_err(|source| ArtifactError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(Some(path))
}

/// Every diagnostics file below `root`, sorted.
pub fn find_diagnostics(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, &mut found, 0)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>, depth: usize) -> std::io::Result<()> {
    if depth > 20 {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name == "target" || name == ".git" {
                continue;
            }
            walk(&path, found, depth + 1)?;
        } else if path.file_name().and_then(|n| n.to_str()) == Some(DIAGNOSTICS_FILE) {
            found.push(path);
        }
    }
    Ok(())
}

/// Failure counts per type for one diagnostics file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSummary {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn summarize_diagnostics(path: &Path) -> DiagnosticsSummary {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<Vec<Value>>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(items) => {
            let mut failures = BTreeMap::new();
            for item in items {
                let kind = item
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                *failures.entry(kind).or_insert(0) += 1;
            }
            DiagnosticsSummary {
                path: path.to_path_buf(),
                failures,
                error: None,
            }
        }
        Err(e) => DiagnosticsSummary {
            path: path.to_path_buf(),
            failures: BTreeMap::new(),
            error: Some(format!("read_error: {}", e)),
        },
    }
}
