use std::collections::HashMap;

use super::{is_ground_name, Finding, FindingKind, Location, Rule, RuleContext, Severity};
use crate::model::{ComponentKind, PinType};
use crate::value::{parse_si_value, within_tolerance};

/// Every `power_in` pin needs a decoupling capacitor of the target value on
/// its net, within the same sheet.
pub struct DecouplingRule;

impl Rule for DecouplingRule {
    fn id(&self) -> &str {
        "decoupling"
    }

    fn name(&self) -> &str {
        "Decoupling Capacitor Check"
    }

    fn description(&self) -> &str {
        "Power input pins share a net with a local capacitor of the target value"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let cfg = ctx.config;
        let graph = ctx.connectivity.graph();
        let mut findings = Vec::new();
        // (scope, net) -> decoupled
        let mut covered: HashMap<(String, String), bool> = HashMap::new();

        for scope in ctx.design.scopes() {
            for symbol in &scope.schematic.symbols {
                for pin in symbol.pins.iter().filter(|p| p.pin_type == PinType::PowerIn) {
                    let net = ctx
                        .connectivity
                        .net_of_pin(&scope.path, &symbol.reference, &pin.number);

                    if let Some(net) = net {
                        if is_ground_name(&net.name) {
                            continue;
                        }
                        let key = (scope.path.clone(), net.name.clone());
                        let ok = *covered.entry(key).or_insert_with(|| {
                            graph.components_on_net(&net.name).iter().any(|(comp, _)| {
                                comp.scope == scope.path
                                    && comp.kind == ComponentKind::Capacitor
                                    && parse_si_value(&comp.value)
                                        .map(|v| {
                                            within_tolerance(
                                                v,
                                                cfg.decoupling_target,
                                                cfg.decoupling_tolerance,
                                            )
                                        })
                                        .unwrap_or(false)
                            })
                        });
                        if ok {
                            continue;
                        }
                    }

                    let pin_label = format!("{}.{}", symbol.reference, pin.number);
                    let mut location = Location::in_sheet(&scope.path).with_pin(&pin_label);
                    if let Some(net) = net {
                        location = location.with_net(&net.name);
                    }
                    findings.push(
                        Finding::new(
                            self.id(),
                            FindingKind::MissingDecoupling,
                            self.severity(),
                            format!(
                                "{} ({}) power pin {} has no {} decoupling capacitor on {}",
                                symbol.reference,
                                symbol.value,
                                if pin.name.is_empty() { &pin.number } else { &pin.name },
                                format_farads(cfg.decoupling_target),
                                net.map(|n| n.name.as_str()).unwrap_or("an unconnected pin"),
                            ),
                        )
                        .at(location)
                        .with_suggestion(format!(
                            "Add a {} ceramic capacitor between the pin's net and ground in {}",
                            format_farads(cfg.decoupling_target),
                            scope.path
                        )),
                    );
                }
            }
        }

        findings
    }
}

/// `1e-7` -> `100nF`
pub(crate) fn format_farads(value: f64) -> String {
    let (scaled, unit) = if value >= 1e-3 {
        (value * 1e3, "mF")
    } else if value >= 1e-6 {
        (value * 1e6, "uF")
    } else if value >= 1e-9 {
        (value * 1e9, "nF")
    } else {
        (value * 1e12, "pF")
    };
    let rounded = (scaled * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}{}", rounded as i64, unit)
    } else {
        format!("{}{}", rounded, unit)
    }
}
