//! Generation pipeline shared by the library API and the CLI.
//!
//! configuration → generator → integrity validation → net resolution →
//! rules and placement conflicts → serialization (only with zero errors) →
//! staged publication → optional external ERC. A summary is written for
//! every run, including runs stopped by a fatal error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::artifacts::{
    bom_csv, bom_file_name, bom_rows, design_references, hierarchy_summary, ArtifactError, DocumentState,
    DocumentStatus, Provenance, RunSummary, StagedOutput,
};
use crate::config::{ConfigError, GeneratorConfig};
use crate::external::{erc_report_path, ExternalTool, ExternalToolError, ToolOutput};
use crate::generators::{builtin_generators, GenerateError, Generator};
use crate::model::{HierarchicalSchematic, ModelIntegrityError};
use crate::placement::{self, PlacementError, PlacementPlan, PlacementTable};
use crate::plugins::{load_manifest, write_diagnostics, LoadReport, PluginFailure};
use crate::registry::{Registry, RegistryError};
use crate::resolve::{resolve, Connectivity};
use crate::rules::{builtin_rules, sort_findings, Finding, Rule, RuleContext, RuleEngine, SeverityCounts};
use crate::serialize::{serialize_design, SerializationError};

#[derive(Debug, thiserror::Error)]
pub enum NetforgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelIntegrityError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    External(#[from] ExternalToolError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-run registries and the manifest load report
pub struct Registries {
    pub rules: Registry<Arc<dyn Rule>>,
    pub generators: Registry<Arc<dyn Generator>>,
    pub plugins: LoadReport,
}

impl Registries {
    /// Built-ins plus the configured manifest, if any.
    pub fn build(config: &GeneratorConfig, stamp: &Provenance) -> Result<Self, NetforgeError> {
        let mut rules = builtin_rules()?;
        let mut generators = builtin_generators()?;
        let plugins = match config.manifest_path() {
            Some(path) => load_manifest(&path, &mut rules, &mut generators, stamp),
            None => LoadReport::default(),
        };
        Ok(Self {
            rules,
            generators,
            plugins,
        })
    }
}

/// Options for a generation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub out_dir: PathBuf,
    pub stamp: Provenance,
    /// Previous placement table. Defaults to the table of the last run in
    /// `out_dir` when one exists.
    pub previous_placement: Option<PathBuf>,
    /// Lock every placement row in the written table.
    pub accept_placement: bool,
    /// Run the external tool steps enabled in the configuration.
    pub external: bool,
}

impl RunOptions {
    pub fn new(out_dir: impl Into<PathBuf>, stamp: Provenance) -> Self {
        Self {
            out_dir: out_dir.into(),
            stamp,
            previous_placement: None,
            accept_placement: false,
            external: true,
        }
    }
}

/// Result of everything up to, but excluding, serialization.
pub struct CheckReport {
    pub generator: String,
    pub design: HierarchicalSchematic,
    pub connectivity: Connectivity,
    pub findings: Vec<Finding>,
    pub counts: SeverityCounts,
    pub placement: Option<PlacementPlan>,
}

impl CheckReport {
    pub fn accepted(&self) -> bool {
        self.counts.error == 0
    }
}

/// One external tool step and how it went
#[derive(Debug)]
pub struct ExternalRun {
    pub action: &'static str,
    pub result: Result<ToolOutput, ExternalToolError>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub summary_path: PathBuf,
    pub published: Vec<PathBuf>,
    pub plugin_failures: Vec<PluginFailure>,
    pub diagnostics_path: Option<PathBuf>,
    pub external: Vec<ExternalRun>,
}

impl RunOutcome {
    pub fn accepted(&self) -> bool {
        self.summary.accepted
    }

    pub fn external_failed(&self) -> bool {
        self.external.iter().any(|r| r.result.is_err())
    }
}

pub fn placement_file_name(title: &str) -> String {
    format!("{}.placement.csv", title)
}

/// Core pipeline API used by the CLI.
pub struct NetforgeCore;

impl NetforgeCore {
    /// Build, validate, resolve and check a design without writing anything.
    pub fn check(
        config: &GeneratorConfig,
        registries: &Registries,
        previous: Option<&PlacementTable>,
    ) -> Result<CheckReport, NetforgeError> {
        let generator = registries.generators.require(&config.project.generator)?;
        info!(generator = generator.name(), "generating design");
        let design = generator.generate(config)?;

        design.validate()?;
        let connectivity = resolve(&design, &config.net_classes)?;
        info!(
            nets = connectivity.nets().len(),
            components = connectivity.graph().component_count(),
            "nets resolved"
        );

        let rule_config = config.to_rule_config()?;
        let ctx = RuleContext {
            design: &design,
            connectivity: &connectivity,
            config: &rule_config,
        };
        let mut findings = RuleEngine::from_registry(&registries.rules).analyze(&ctx);

        let placement = if config.placement_classes.is_empty() {
            None
        } else {
            let plan = placement::generate(&config.grid, &config.placement_classes, previous)?;
            findings.extend(plan.conflicts().iter().cloned());
            sort_findings(&mut findings);
            Some(plan)
        };

        let counts = SeverityCounts::from_findings(&findings);
        info!(
            errors = counts.error,
            warnings = counts.warning,
            info = counts.info,
            "design checked"
        );

        Ok(CheckReport {
            generator: generator.name().to_string(),
            design,
            connectivity,
            findings,
            counts,
            placement,
        })
    }

    /// Placement only: generate the grid, honouring locked rows of `previous`.
    pub fn place(
        config: &GeneratorConfig,
        previous: Option<&Path>,
        accept: bool,
    ) -> Result<PlacementPlan, NetforgeError> {
        let table = previous.map(PlacementTable::read).transpose()?;
        let mut plan = placement::generate(&config.grid, &config.placement_classes, table.as_ref())?;
        if accept {
            plan.accept();
        }
        Ok(plan)
    }

    /// Full run: check, publish documents and artifacts, write the summary.
    pub fn generate(config: &GeneratorConfig, options: &RunOptions) -> Result<RunOutcome, NetforgeError> {
        let out_dir = options.out_dir.as_path();
        std::fs::create_dir_all(out_dir)?;
        let mut summary = RunSummary::new(&config.project.name, &config.project.generator, &options.stamp);

        let registries = match Registries::build(config, &options.stamp) {
            Ok(r) => r,
            Err(e) => return Err(fail(out_dir, summary, e)),
        };
        summary.plugin_failures = registries.plugins.failures.len();
        let diagnostics_path = write_diagnostics(out_dir, &registries.plugins.failures)?;

        let previous_path = options.previous_placement.clone().or_else(|| {
            let candidate = out_dir.join(placement_file_name(&config.project.name));
            candidate.exists().then_some(candidate)
        });
        let previous = match previous_path.as_deref().map(PlacementTable::read).transpose() {
            Ok(t) => t,
            Err(e) => return Err(fail(out_dir, summary, e.into())),
        };

        let mut report = match Self::check(config, &registries, previous.as_ref()) {
            Ok(r) => r,
            Err(e) => return Err(fail(out_dir, summary, e)),
        };
        summary.generator = report.generator.clone();

        let design = &report.design;
        summary.references = design_references(design);
        summary.nets = report.connectivity.membership();
        summary.hierarchy = hierarchy_summary(design);
        summary.findings = report.findings.clone();
        summary.counts = report.counts;

        if let Some(plan) = report.placement.as_mut() {
            if options.accept_placement {
                plan.accept();
            }
            summary.placement = Some(plan.stats());
        }

        let mut published = Vec::new();
        if report.accepted() {
            match publish(config, &report, options, &mut summary) {
                Ok(files) => published = files,
                Err(e) => return Err(fail(out_dir, summary, e)),
            }
        } else {
            let reason = format!("not serialized: {} error finding(s)", report.counts.error);
            for (scope, path) in crate::serialize::document_paths(design) {
                summary.documents.push(DocumentStatus {
                    scope,
                    path,
                    status: DocumentState::Skipped,
                    error: Some(reason.clone()),
                });
            }
            summary.accepted = false;
            warn!(errors = report.counts.error, "design has errors; nothing published");
        }

        let summary_path = summary.write(out_dir)?;

        let mut external = Vec::new();
        if summary.accepted && options.external {
            let tool = ExternalTool::from_config(&config.external);
            let root = out_dir.join(report.design.root_file());
            if config.external.erc {
                let result = tool.erc(&root, &erc_report_path(&root));
                if let Err(e) = &result {
                    warn!(error = %e, "ERC failed");
                }
                external.push(ExternalRun { action: "erc", result });
            }
            if config.external.export_pdf {
                let result = tool.export_pdf(&root, &root.with_extension("pdf"));
                if let Err(e) = &result {
                    warn!(error = %e, "PDF export failed");
                }
                external.push(ExternalRun {
                    action: "export_pdf",
                    result,
                });
            }
        }

        info!(
            accepted = summary.accepted,
            published = published.len(),
            summary = %summary_path.display(),
            "run complete"
        );
        Ok(RunOutcome {
            summary,
            summary_path,
            published,
            plugin_failures: registries.plugins.failures,
            diagnostics_path,
            external,
        })
    }
}

/// Serialize every document, stage documents, dumps, BOM and placement
/// table, then move them into place.
///
/// Documents that fail to serialize are left out; their siblings are published.
fn publish(
    config: &GeneratorConfig,
    report: &CheckReport,
    options: &RunOptions,
    summary: &mut RunSummary,
) -> Result<Vec<PathBuf>, NetforgeError> {
    let title = &config.project.name;
    let mut stage = StagedOutput::new(&options.out_dir)?;
    let mut all_written = true;

    for doc in serialize_design(&report.design, &report.connectivity, &options.stamp) {
        match doc.result {
            Ok(serialized) => {
                stage.write(&serialized.path, serialized.contents.as_bytes())?;
                stage.write(&serialized.dump_path(), serialized.dump.as_bytes())?;
                summary.documents.push(DocumentStatus {
                    scope: doc.scope,
                    path: doc.path,
                    status: DocumentState::Written,
                    error: None,
                });
            }
            Err(e) => {
                all_written = false;
                summary.documents.push(DocumentStatus {
                    scope: doc.scope,
                    path: doc.path,
                    status: DocumentState::Failed,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let bom = bom_csv(&bom_rows(&report.design))?;
    stage.write(&bom_file_name(title), bom.as_bytes())?;

    if let Some(plan) = &report.placement {
        let table = plan.to_table().to_csv()?;
        stage.write(&placement_file_name(title), &table)?;
    }

    summary.accepted = all_written;
    Ok(stage.commit()?)
}

/// Record a fatal error in the summary, write it, and hand the error back.
fn fail(out_dir: &Path, mut summary: RunSummary, err: NetforgeError) -> NetforgeError {
    summary.accepted = false;
    summary.fatal = Some(err.to_string());
    if let NetforgeError::Model(ModelIntegrityError::UnresolvedHierarchy { findings }) = &err {
        summary.findings = findings.clone();
        summary.counts = SeverityCounts::from_findings(findings);
    }
    if let Err(write_err) = summary.write(out_dir) {
        warn!(error = %write_err, "could not write summary");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_config() -> GeneratorConfig {
        let mut config = GeneratorConfig::default();
        config.project.name = "tiny".to_string();
        config.grid.rows = 2;
        config.grid.cols = 2;
        config
    }

    fn stamp() -> Provenance {
        Provenance::fixed("0.1.0", "abc1234", "2026-02-03T04:05:06Z")
    }

    #[test]
    fn test_default_design_checks_clean() {
        let config = small_config();
        let registries = Registries::build(&config, &stamp()).unwrap();
        let report = NetforgeCore::check(&config, &registries, None).unwrap();
        assert_eq!(report.counts.error, 0, "{:#?}", report.findings);
        assert!(report.accepted());
        assert_eq!(report.placement.as_ref().map(|p| p.stats().placed), Some(4 + 16));
    }

    #[test]
    fn test_generate_publishes_everything() {
        let dir = TempDir::new().unwrap();
        let outcome = NetforgeCore::generate(&small_config(), &RunOptions::new(dir.path(), stamp())).unwrap();
        assert!(outcome.accepted());
        for name in [
            "tiny.kicad_sch",
            "tiny.kicad_sch.txt",
            "power.kicad_sch",
            "led.kicad_sch.txt",
            "tiny.bom.csv",
            "tiny.placement.csv",
            "tiny.summary.json",
        ] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }
        assert!(outcome.diagnostics_path.is_none());
        assert_eq!(outcome.summary.documents.len(), 5);
    }

    #[test]
    fn test_unknown_generator_still_writes_summary() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config();
        config.project.generator = "missing".to_string();
        let err = NetforgeCore::generate(&config, &RunOptions::new(dir.path(), stamp())).unwrap_err();
        assert!(matches!(err, NetforgeError::Registry(RegistryError::Unknown { .. })));

        let summary = RunSummary::read(&dir.path().join("tiny.summary.json")).unwrap();
        assert!(!summary.accepted);
        assert!(summary.fatal.unwrap().contains("missing"));
    }
}
