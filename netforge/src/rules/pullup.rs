use std::collections::BTreeSet;

use super::{is_supply_net, Finding, FindingKind, Location, Rule, RuleContext, Severity};
use crate::model::ComponentKind;
use crate::resolve::ComponentNode;
use crate::value::{natural_cmp, parse_si_value};

/// Open-drain nets need exactly one pull-up resistor to a supply rail, with
/// a value inside the configured range.
pub struct PullupRule;

impl PullupRule {
    /// Resistors with one pin on `net` and another pin on a supply net.
    fn pullups_on<'a>(ctx: &'a RuleContext, net: &str) -> Vec<&'a ComponentNode> {
        let graph = ctx.connectivity.graph();
        let mut seen = BTreeSet::new();
        let mut found = Vec::new();
        for (comp, edge) in graph.components_on_net(net) {
            if comp.kind != ComponentKind::Resistor {
                continue;
            }
            let to_supply = graph
                .nets_for_component(&comp.scope, &comp.reference)
                .into_iter()
                .filter(|(_, other_edge)| other_edge.pin_number != edge.pin_number)
                .filter_map(|(other, _)| ctx.connectivity.net(&other.name))
                .any(|other| other.name != net && is_supply_net(other));
            if to_supply && seen.insert((comp.scope.clone(), comp.reference.clone())) {
                found.push(comp);
            }
        }
        found.sort_by(|a, b| a.scope.cmp(&b.scope).then_with(|| natural_cmp(&a.reference, &b.reference)));
        found
    }
}

impl Rule for PullupRule {
    fn id(&self) -> &str {
        "pullup"
    }

    fn name(&self) -> &str {
        "Pull-up Resistor Check"
    }

    fn description(&self) -> &str {
        "Open-drain nets have exactly one pull-up to a supply within the allowed range"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let cfg = ctx.config;
        let mut findings = Vec::new();

        for net in ctx.connectivity.nets() {
            if !cfg.pullup_classes.contains(&net.class) {
                continue;
            }
            let location = Location::in_sheet(&net.scope).with_net(&net.name);
            let range = format!("{}-{}", format_ohms(cfg.pullup_min), format_ohms(cfg.pullup_max));
            let pullups = Self::pullups_on(ctx, &net.name);

            match pullups.as_slice() {
                [] => findings.push(
                    Finding::new(
                        self.id(),
                        FindingKind::MissingPullup,
                        self.severity(),
                        format!("{} net {} has no pull-up resistor to a supply", net.class, net.name),
                    )
                    .at(location)
                    .with_suggestion(format!("Add one {} resistor from {} to the logic supply", range, net.name)),
                ),
                [single] => {
                    let value = parse_si_value(&single.value);
                    let in_range = value
                        .map(|v| v >= cfg.pullup_min && v <= cfg.pullup_max)
                        .unwrap_or(false);
                    if !in_range {
                        let message = match value {
                            Some(_) => format!(
                                "Pull-up {} on {} is {}, outside {}",
                                single.reference, net.name, single.value, range
                            ),
                            None => format!(
                                "Pull-up {} on {} has unreadable value '{}'",
                                single.reference, net.name, single.value
                            ),
                        };
                        findings.push(
                            Finding::new(self.id(), FindingKind::InvalidPullupValue, self.severity(), message)
                                .at(location.with_pin(format!("{}:{}", single.scope, single.reference)))
                                .with_suggestion(format!("Use a value within {} (4.7k is typical)", range)),
                        );
                    }
                }
                many => {
                    let refs: Vec<String> = many
                        .iter()
                        .map(|c| format!("{}:{}", c.scope, c.reference))
                        .collect();
                    findings.push(
                        Finding::new(
                            self.id(),
                            FindingKind::MultiplePullups,
                            self.severity(),
                            format!("{} has {} pull-up resistors: {}", net.name, many.len(), refs.join(", ")),
                        )
                        .at(location)
                        .with_suggestion("Keep a single pull-up per open-drain net"),
                    );
                }
            }
        }

        findings
    }
}

/// `4700.0` -> `4.7k`
fn format_ohms(value: f64) -> String {
    let (scaled, unit) = if value >= 1e6 {
        (value / 1e6, "M")
    } else if value >= 1e3 {
        (value / 1e3, "k")
    } else {
        (value, "")
    };
    let rounded = (scaled * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}{}", rounded as i64, unit)
    } else {
        format!("{}{}", rounded, unit)
    }
}
