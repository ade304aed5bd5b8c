//! Electrical rule engine
//!
//! Rules are pure checks over the design and its resolved connectivity. The
//! engine runs every registered rule once, adds the findings raised during
//! resolution, and returns them in a stable order.

pub mod bulk;
pub mod decoupling;
pub mod floating;
pub mod hierarchy;
pub mod pullup;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::model::{HierarchicalSchematic, NetClass};
use crate::registry::{Registry, RegistryError};
use crate::resolve::{Connectivity, ResolvedNet};

pub use bulk::BulkCapacitanceRule;
pub use decoupling::DecouplingRule;
pub use floating::FloatingInputRule;
pub use hierarchy::HierarchyRule;
pub use pullup::PullupRule;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FindingKind {
    MissingDecoupling,
    MissingPullup,
    MultiplePullups,
    InvalidPullupValue,
    FloatingInput,
    UnconnectedHierarchicalPin,
    MissingHierarchicalPin,
    HierarchicalPinDirection,
    ElectricalConflict,
    NetClassConflict,
    MissingBulkCapacitor,
    PlacementConflict,
}

/// Where a finding applies: the sheet scope and, when relevant, a net and pin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub sheet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

impl Location {
    pub fn in_sheet(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            net: None,
            pin: None,
        }
    }

    pub fn with_net(mut self, net: impl Into<String>) -> Self {
        self.net = Some(net.into());
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(
        rule_id: impl Into<String>,
        kind: FindingKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            kind,
            severity,
            message: message.into(),
            location: Location::default(),
            suggestion: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    fn sort_key(&self) -> (Severity, &str, &str, &str, &str, &str) {
        (
            self.severity,
            self.location.sheet.as_str(),
            self.location.net.as_deref().unwrap_or(""),
            self.rule_id.as_str(),
            self.location.pin.as_deref().unwrap_or(""),
            self.message.as_str(),
        )
    }
}

/// Sort findings by severity, sheet, net, rule, pin and message.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// A sheet and `REF.PIN` excluded from floating-input checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Waiver {
    pub sheet: String,
    pub pin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Numeric rule parameters, already parsed from engineering notation.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Decoupling capacitor target in farads.
    pub decoupling_target: f64,
    pub decoupling_tolerance: f64,
    /// Pull-up bounds in ohms, inclusive.
    pub pullup_min: f64,
    pub pullup_max: f64,
    pub pullup_classes: Vec<NetClass>,
    /// Minimum bulk capacitance in farads.
    pub bulk_min: f64,
    pub waivers: Vec<Waiver>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            decoupling_target: 100e-9,
            decoupling_tolerance: 0.2,
            pullup_min: 1_000.0,
            pullup_max: 10_000.0,
            pullup_classes: vec![NetClass::OpenDrain],
            bulk_min: 100e-6,
            waivers: Vec::new(),
        }
    }
}

impl RuleConfig {
    pub fn is_waived(&self, sheet: &str, pin: &str) -> bool {
        self.waivers.iter().any(|w| w.sheet == sheet && w.pin == pin)
    }
}

/// Everything a rule may read
pub struct RuleContext<'a> {
    pub design: &'a HierarchicalSchematic,
    pub connectivity: &'a Connectivity,
    pub config: &'a RuleConfig,
}

pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn severity(&self) -> Severity;
    fn check(&self, ctx: &RuleContext) -> Vec<Finding>;
}

/// Registry holding the built-in rules.
pub fn builtin_rules() -> Result<Registry<Arc<dyn Rule>>, RegistryError> {
    let mut registry: Registry<Arc<dyn Rule>> = Registry::new("rule");
    register_rule(&mut registry, Arc::new(DecouplingRule))?;
    register_rule(&mut registry, Arc::new(PullupRule))?;
    register_rule(&mut registry, Arc::new(FloatingInputRule))?;
    register_rule(&mut registry, Arc::new(HierarchyRule))?;
    register_rule(&mut registry, Arc::new(BulkCapacitanceRule))?;
    Ok(registry)
}

/// Register a rule under its own id.
pub fn register_rule(
    registry: &mut Registry<Arc<dyn Rule>>,
    rule: Arc<dyn Rule>,
) -> Result<(), RegistryError> {
    let id = rule.id().to_string();
    registry.register(id, rule)
}

pub struct RuleEngine {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn from_registry(registry: &Registry<Arc<dyn Rule>>) -> Self {
        Self {
            rules: registry.values().cloned().collect(),
        }
    }

    pub fn with_default_rules() -> Self {
        let mut engine = Self::new();
        engine.add_rule(Arc::new(DecouplingRule));
        engine.add_rule(Arc::new(PullupRule));
        engine.add_rule(Arc::new(FloatingInputRule));
        engine.add_rule(Arc::new(HierarchyRule));
        engine.add_rule(Arc::new(BulkCapacitanceRule));
        engine
    }

    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// Run every rule and merge in resolution findings.
    pub fn analyze(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings: Vec<Finding> = ctx.connectivity.findings().to_vec();
        for rule in &self.rules {
            let raised = rule.check(ctx);
            debug!(rule = rule.id(), count = raised.len(), "rule evaluated");
            findings.extend(raised);
        }
        sort_findings(&mut findings);
        findings
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

/// Per-severity totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for f in findings {
            match f.severity {
                Severity::Error => counts.error += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.error + self.warning + self.info
    }
}

/// Ground rails by name: `GND`, `AGND`, `GND_ISO`, `VSS`, `0V`.
pub fn is_ground_name(name: &str) -> bool {
    let bare = name.rsplit('/').next().unwrap_or(name).to_uppercase();
    let bare = bare.trim_start_matches(['+', '-']);
    bare.starts_with("GND") || bare.ends_with("GND") || bare.starts_with("VSS") || bare == "0V"
}

/// A power-class net that is not ground.
pub fn is_supply_net(net: &ResolvedNet) -> bool {
    net.class == NetClass::Power && !is_ground_name(&net.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_findings_sort_order() {
        let mut findings = vec![
            Finding::new("pullup", FindingKind::MissingPullup, Severity::Error, "b")
                .at(Location::in_sheet("/mcu").with_net("SDA")),
            Finding::new("decoupling", FindingKind::MissingDecoupling, Severity::Warning, "a")
                .at(Location::in_sheet("/").with_net("+3V3")),
            Finding::new("hierarchy", FindingKind::UnconnectedHierarchicalPin, Severity::Error, "c")
                .at(Location::in_sheet("/")),
        ];
        sort_findings(&mut findings);
        let rules: Vec<&str> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["hierarchy", "pullup", "decoupling"]);
    }

    #[test]
    fn test_ground_names() {
        assert!(is_ground_name("GND"));
        assert!(is_ground_name("AGND"));
        assert!(is_ground_name("/power/GND_ISO"));
        assert!(is_ground_name("VSS"));
        assert!(!is_ground_name("+3V3"));
        assert!(!is_ground_name("VCC_5V"));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_rules().unwrap();
        let ids: Vec<&str> = registry.names().collect();
        assert_eq!(ids, vec!["bulk_capacitance", "decoupling", "floating_input", "hierarchy", "pullup"]);

        let mut registry = registry;
        let err = register_rule(&mut registry, Arc::new(PullupRule)).unwrap_err();
        assert!(err.to_string().contains("pullup"));
    }

    #[test]
    fn test_severity_counts() {
        let findings = vec![
            Finding::new("a", FindingKind::MissingPullup, Severity::Error, "x"),
            Finding::new("b", FindingKind::FloatingInput, Severity::Warning, "y"),
            Finding::new("c", FindingKind::FloatingInput, Severity::Warning, "z"),
        ];
        let counts = SeverityCounts::from_findings(&findings);
        assert_eq!(counts, SeverityCounts { error: 1, warning: 2, info: 0 });
        assert_eq!(counts.total(), 3);
        assert_eq!("Warning".parse::<Severity>(), Ok(Severity::Warning));
    }
}
