use super::{Finding, FindingKind, Location, Rule, RuleContext, Severity};
use crate::model::PinType;

/// Input pins left unconnected, or alone on their net.
pub struct FloatingInputRule;

impl Rule for FloatingInputRule {
    fn id(&self) -> &str {
        "floating_input"
    }

    fn name(&self) -> &str {
        "Floating Input Check"
    }

    fn description(&self) -> &str {
        "Input pins are driven by at least one other pin"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();

        for scope in ctx.design.scopes() {
            for symbol in &scope.schematic.symbols {
                for pin in symbol.pins.iter().filter(|p| p.pin_type == PinType::Input) {
                    let pin_label = format!("{}.{}", symbol.reference, pin.number);
                    if ctx.config.is_waived(&scope.path, &pin_label) {
                        continue;
                    }
                    let net = ctx
                        .connectivity
                        .net_of_pin(&scope.path, &symbol.reference, &pin.number);
                    let message = match net {
                        None => format!(
                            "Input {} ({}) on {} is not connected",
                            pin_label, pin.name, symbol.value
                        ),
                        Some(n) if n.member_count() == 1 => format!(
                            "Input {} ({}) is the only pin on net {}",
                            pin_label, pin.name, n.name
                        ),
                        Some(_) => continue,
                    };
                    let mut location = Location::in_sheet(&scope.path).with_pin(&pin_label);
                    if let Some(n) = net {
                        location = location.with_net(&n.name);
                    }
                    findings.push(
                        Finding::new(self.id(), FindingKind::FloatingInput, self.severity(), message)
                            .at(location)
                            .with_suggestion("Tie the input to a defined level or add a waiver"),
                    );
                }
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HierarchicalSchematic, Net, Pin, Symbol};
    use crate::resolve::resolve;
    use crate::rules::{RuleConfig, Waiver};
    use std::collections::BTreeMap;

    fn design() -> HierarchicalSchematic {
        let mut d = HierarchicalSchematic::new("t");
        d.root.add_symbol(
            Symbol::new("U1", "MCU:Generic", "MCU")
                .with_pin(Pin::new("1", "EN", PinType::Input))
                .with_pin(Pin::new("2", "BOOT", PinType::Input))
                .with_pin(Pin::new("3", "RX", PinType::Input)),
        );
        d.root.add_symbol(
            Symbol::new("J1", "Connector:Conn_01x01", "UART").with_pin(Pin::new("1", "TX", PinType::Output)),
        );
        d.root.add_net(Net::new("EN").connect("U1", "1"));
        d.root.add_net(Net::new("RX").connect("U1", "3").connect("J1", "1"));
        d
    }

    #[test]
    fn test_floating_inputs() {
        let d = design();
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let cfg = RuleConfig::default();
        let findings = FloatingInputRule.check(&RuleContext { design: &d, connectivity: &conn, config: &cfg });
        let pins: Vec<&str> = findings.iter().filter_map(|f| f.location.pin.as_deref()).collect();
        assert_eq!(pins, vec!["U1.1", "U1.2"]);
    }

    #[test]
    fn test_waiver_suppresses() {
        let d = design();
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let cfg = RuleConfig {
            waivers: vec![Waiver { sheet: "/".into(), pin: "U1.2".into(), reason: None }],
            ..Default::default()
        };
        let findings = FloatingInputRule.check(&RuleContext { design: &d, connectivity: &conn, config: &cfg });
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.pin.as_deref(), Some("U1.1"));
    }
}
