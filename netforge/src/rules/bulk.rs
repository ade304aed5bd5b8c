use super::decoupling::format_farads;
use super::{is_supply_net, Finding, FindingKind, Location, Rule, RuleContext, Severity};
use crate::model::{ComponentKind, PinType};
use crate::value::parse_si_value;

/// Supply nets feeding LEDs need a bulk capacitor somewhere on the net.
pub struct BulkCapacitanceRule;

impl Rule for BulkCapacitanceRule {
    fn id(&self) -> &str {
        "bulk_capacitance"
    }

    fn name(&self) -> &str {
        "Bulk Capacitor Check"
    }

    fn description(&self) -> &str {
        "Supply nets powering LEDs carry at least one bulk capacitor"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let graph = ctx.connectivity.graph();
        let bulk_min = ctx.config.bulk_min;
        let mut findings = Vec::new();

        for net in ctx.connectivity.nets().iter().filter(|n| is_supply_net(n)) {
            let on_net = graph.components_on_net(&net.name);
            let leds = on_net
                .iter()
                .filter(|(c, e)| c.kind == ComponentKind::Led && e.pin_type == PinType::PowerIn)
                .count();
            if leds == 0 {
                continue;
            }
            let has_bulk = on_net.iter().any(|(c, _)| {
                c.kind == ComponentKind::Capacitor
                    && parse_si_value(&c.value).map(|v| v >= bulk_min).unwrap_or(false)
            });
            if has_bulk {
                continue;
            }
            findings.push(
                Finding::new(
                    self.id(),
                    FindingKind::MissingBulkCapacitor,
                    self.severity(),
                    format!(
                        "Supply {} feeds {} LED(s) without a bulk capacitor of at least {}",
                        net.name,
                        leds,
                        format_farads(bulk_min)
                    ),
                )
                .at(Location::in_sheet(&net.scope).with_net(&net.name))
                .with_suggestion(format!(
                    "Add a {} or larger electrolytic capacitor near the LED supply entry",
                    format_farads(bulk_min)
                )),
            );
        }

        findings
    }
}
