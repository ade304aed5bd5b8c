use super::{Finding, FindingKind, Location, Rule, RuleContext, Severity};
use crate::model::SheetPinRef;

/// Every sheet pin is driven by exactly one net in the parent scope.
pub struct HierarchyRule;

impl Rule for HierarchyRule {
    fn id(&self) -> &str {
        "hierarchy"
    }

    fn name(&self) -> &str {
        "Hierarchical Pin Connection Check"
    }

    fn description(&self) -> &str {
        "Sheet pins are attached to exactly one parent net"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();

        for scope in ctx.design.scopes() {
            for sheet in &scope.schematic.sheets {
                for pin in &sheet.pins {
                    let attachment = SheetPinRef::new(&sheet.name, &pin.name);
                    let parents: Vec<&str> = scope
                        .schematic
                        .nets
                        .iter()
                        .filter(|n| n.sheet_pins.contains(&attachment))
                        .map(|n| n.name.as_str())
                        .collect();
                    if parents.len() == 1 {
                        continue;
                    }
                    let message = if parents.is_empty() {
                        format!("Sheet pin {} is not connected to any net in {}", attachment, scope.path)
                    } else {
                        format!(
                            "Sheet pin {} is attached to {} nets in {}: {}",
                            attachment,
                            parents.len(),
                            scope.path,
                            parents.join(", ")
                        )
                    };
                    findings.push(
                        Finding::new(
                            self.id(),
                            FindingKind::UnconnectedHierarchicalPin,
                            self.severity(),
                            message,
                        )
                        .at(Location::in_sheet(&scope.path).with_pin(attachment.to_string())),
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
    use crate::model::{HierarchicalSchematic, Net, PinDirection, Schematic, Sheet};
    use crate::resolve::resolve;
    use crate::rules::RuleConfig;
    use std::collections::BTreeMap;

    #[test]
    fn test_unattached_and_doubly_attached() {
        let mut child = Schematic::new("io");
        child.add_port("A", PinDirection::Input);
        child.add_port("B", PinDirection::Input);
        child.add_port("C", PinDirection::Input);
        let sheet = Sheet::new("io", "io.kicad_sch", child)
            .with_pin("A", PinDirection::Input)
            .with_pin("B", PinDirection::Input)
            .with_pin("C", PinDirection::Input);
        let mut d = HierarchicalSchematic::new("t");
        d.root.add_sheet(sheet);
        d.root.add_net(Net::new("N1").attach_sheet_pin("io", "A"));
        d.root.add_net(Net::new("N2").attach_sheet_pin("io", "B"));
        d.root.add_net(Net::new("N3").attach_sheet_pin("io", "B"));

        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let cfg = RuleConfig::default();
        let findings = HierarchyRule.check(&RuleContext { design: &d, connectivity: &conn, config: &cfg });
        let pins: Vec<&str> = findings.iter().filter_map(|f| f.location.pin.as_deref()).collect();
        assert_eq!(pins, vec!["io.B", "io.C"]);
        assert!(findings[0].message.contains("N2, N3"));
    }
}
