//! Plain-text rendering of a scope, written beside each document.

use std::fmt::Write;

use crate::artifacts::Provenance;
use crate::model::{HierarchicalSchematic, OwnedScope};
use crate::resolve::Connectivity;
use crate::value::{format_mm, natural_cmp};

use super::sorted_symbols;

pub fn dump_scope(
    design: &HierarchicalSchematic,
    scope: &OwnedScope,
    path: &str,
    connectivity: &Connectivity,
    provenance: &Provenance,
) -> String {
    let schematic = scope.schematic;
    let mut out = String::new();

    let _ = writeln!(out, "Schematic: {}", schematic.title);
    let _ = writeln!(out, "Design:    {}", design.title);
    let _ = writeln!(out, "Scope:     {}", scope.path);
    let _ = writeln!(out, "Document:  {}", path);
    let _ = writeln!(
        out,
        "Revision:  {} ({} {})",
        provenance.source_revision, provenance.generator_version, provenance.date()
    );

    let _ = writeln!(out, "\nSymbols ({}):", schematic.symbols.len());
    for symbol in sorted_symbols(&schematic.symbols) {
        let _ = writeln!(
            out,
            "  {:<8} {:<28} {:<12} {} @ ({}, {}) rot {}",
            symbol.reference,
            symbol.lib_id,
            symbol.value,
            symbol.footprint.as_deref().unwrap_or("-"),
            format_mm(symbol.position.x),
            format_mm(symbol.position.y),
            format_mm(symbol.rotation)
        );
        for pin in &symbol.pins {
            let net = connectivity
                .net_of_pin(&scope.path, &symbol.reference, &pin.number)
                .map(|n| n.name.as_str())
                .unwrap_or("(unconnected)");
            let _ = writeln!(
                out,
                "      pin {:<4} {:<10} {:<14} -> {}",
                pin.number,
                pin.name,
                pin.pin_type.keyword(),
                net
            );
        }
    }

    let mut nets: Vec<_> = schematic.nets.iter().collect();
    nets.sort_by(|a, b| {
        let ca = connectivity.net_for_alias(&scope.path, &a.name).map(|n| n.name.as_str()).unwrap_or(&a.name);
        let cb = connectivity.net_for_alias(&scope.path, &b.name).map(|n| n.name.as_str()).unwrap_or(&b.name);
        ca.cmp(cb)
    });
    let _ = writeln!(out, "\nNets ({}):", nets.len());
    for net in nets {
        let canonical = connectivity
            .net_for_alias(&scope.path, &net.name)
            .map(|n| n.name.as_str())
            .unwrap_or(&net.name);
        let mut members: Vec<String> = net.members.iter().map(|m| m.to_string()).collect();
        members.sort_by(|a, b| natural_cmp(a, b));
        members.extend(net.sheet_pins.iter().map(|s| format!("sheet {}", s)));
        let alias = if canonical == net.name {
            String::new()
        } else {
            format!(" (local {})", net.name)
        };
        let _ = writeln!(
            out,
            "  {}{} [{}]{}: {}",
            canonical,
            alias,
            net.class,
            if net.global { " global" } else { "" },
            if members.is_empty() { "-".to_string() } else { members.join(", ") }
        );
    }

    if !schematic.ports.is_empty() {
        let _ = writeln!(out, "\nPorts ({}):", schematic.ports.len());
        for port in &schematic.ports {
            let _ = writeln!(out, "  {:<12} {}", port.name, port.direction.keyword());
        }
    }

    if !schematic.sheets.is_empty() {
        let _ = writeln!(out, "\nSheets ({}):", schematic.sheets.len());
        for sheet in &schematic.sheets {
            let pins: Vec<String> = sheet
                .pins
                .iter()
                .map(|p| format!("{}:{}", p.name, p.direction.keyword()))
                .collect();
            let _ = writeln!(out, "  {} -> {} [{}]", sheet.name, sheet.file, pins.join(", "));
        }
    }

    if !schematic.wires.is_empty() {
        let _ = writeln!(out, "\nWires ({}):", schematic.wires.len());
        for wire in &schematic.wires {
            let _ = writeln!(out, "  {} -- {}", wire.a, wire.b);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Net, Pin, PinType, Symbol};
    use crate::resolve::resolve;
    use std::collections::BTreeMap;

    #[test]
    fn test_dump_lists_symbols_and_nets() {
        let mut d = HierarchicalSchematic::new("demo");
        d.root.add_symbol(
            Symbol::new("R1", "Device:R", "4.7k")
                .with_footprint("Resistor_SMD:R_0402_1005Metric")
                .with_pin(Pin::new("1", "~", PinType::Passive))
                .with_pin(Pin::new("2", "~", PinType::Passive)),
        );
        d.root.add_net(Net::new("SDA").connect("R1", "1"));
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let stamp = Provenance::fixed("0.1.0", "deadbee", "2026-03-04T00:00:00Z");
        let scopes = d.scopes();
        let text = dump_scope(&d, &scopes[0], "demo.kicad_sch", &conn, &stamp);

        assert!(text.contains("Scope:     /"));
        assert!(text.contains("R1"));
        assert!(text.contains("-> SDA"));
        assert!(text.contains("-> (unconnected)"));
        assert!(text.contains("SDA [default]: R1.1"));
        assert!(text.contains("deadbee"));
    }
}
