//! Example: adding a project-specific rule next to the built-in ones.
//! Run with: cargo run --example custom_rules

use netforge::prelude::*;
use netforge::model::ComponentKind;
use netforge::rules::{register_rule, FindingKind, Location};
use netforge::value::{parse_si_value, within_tolerance};
use netforge::{Registries, Rule, RuleContext};
use std::path::Path;
use std::sync::Arc;

/// One decoupling capacitor per LED on every sheet that holds LEDs.
struct CapacitorPerLedRule;

impl Rule for CapacitorPerLedRule {
    fn id(&self) -> &str {
        "capacitor_per_led"
    }

    fn name(&self) -> &str {
        "Capacitor Per LED"
    }

    fn description(&self) -> &str {
        "Sheets with LEDs carry at least one decoupling capacitor per LED"
    }

    fn severity(&self) -> Severity {
        Severity::Info
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for scope in ctx.design.scopes() {
            let symbols = &scope.schematic.symbols;
            let leds = symbols.iter().filter(|s| s.kind() == ComponentKind::Led).count();
            let caps = symbols
                .iter()
                .filter(|s| s.kind() == ComponentKind::Capacitor)
                .filter(|s| {
                    parse_si_value(&s.value)
                        .map(|v| within_tolerance(v, ctx.config.decoupling_target, ctx.config.decoupling_tolerance))
                        .unwrap_or(false)
                })
                .count();
            if leds > caps {
                findings.push(
                    Finding::new(
                        self.id(),
                        FindingKind::MissingDecoupling,
                        self.severity(),
                        format!("{} has {} LEDs but only {} decoupling capacitors", scope.path, leds, caps),
                    )
                    .at(Location::in_sheet(&scope.path)),
                );
            }
        }
        findings
    }
}

fn main() -> Result<(), NetforgeError> {
    let config = GeneratorConfig::default();
    let stamp = Provenance::current(Path::new("."));
    let mut registries = Registries::build(&config, &stamp)?;
    register_rule(&mut registries.rules, Arc::new(CapacitorPerLedRule))?;

    let report = NetforgeCore::check(&config, &registries, None)?;
    println!(
        "{} rules, {} findings for {}",
        registries.rules.len(),
        report.findings.len(),
        report.design.title
    );
    for finding in &report.findings {
        println!("  [{:?}] {}: {}", finding.severity, finding.rule_id, finding.message);
    }

    if !report.accepted() {
        std::process::exit(1);
    }
    Ok(())
}
