//! Structural integrity checks for a hierarchical design.
//!
//! Runs once after the generator has built the tree. The first violated
//! invariant is returned; hierarchical pin mismatches are the exception and
//! are collected so that a single run reports every broken boundary.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path};

use thiserror::Error;

use super::{child_scope, HierarchicalSchematic, Schematic, WireEnd, ROOT_SCOPE};
use crate::rules::{Finding, FindingKind, Location, Severity};

#[derive(Debug, Error)]
pub enum ModelIntegrityError {
    #[error("duplicate reference {reference} in scope {scope}")]
    DuplicateReference { scope: String, reference: String },
    #[error("empty reference designator on {lib_id} in scope {scope}")]
    EmptyReference { scope: String, lib_id: String },
    #[error("duplicate pin {pin} on {reference} in scope {scope}")]
    DuplicatePin {
        scope: String,
        reference: String,
        pin: String,
    },
    #[error("duplicate net {net} in scope {scope}")]
    DuplicateNet { scope: String, net: String },
    #[error("duplicate sheet name {sheet} in scope {scope}")]
    DuplicateSheet { scope: String, sheet: String },
    #[error("sheet file {file} is used by both {first} and {second}")]
    DuplicateSheetFile {
        file: String,
        first: String,
        second: String,
    },
    #[error("document file {file} of {owner} must be a relative path without '..'")]
    UnsafeFilePath { owner: String, file: String },
    #[error("duplicate sheet pin {pin} on sheet {sheet} in scope {scope}")]
    DuplicateSheetPin {
        scope: String,
        sheet: String,
        pin: String,
    },
    #[error("duplicate port {port} in scope {scope}")]
    DuplicatePort { scope: String, port: String },
    #[error("{owner} in scope {scope} references missing {target}")]
    DanglingReference {
        scope: String,
        owner: String,
        target: String,
    },
    #[error("pin {pin} in scope {scope} is a member of both {first} and {second}")]
    PinInMultipleNets {
        scope: String,
        pin: String,
        first: String,
        second: String,
    },
    #[error("{} unresolved hierarchical pin(s)", .findings.len())]
    UnresolvedHierarchy { findings: Vec<Finding> },
}

/// Validate every scope of the design, then its sheet boundaries.
pub fn validate_design(design: &HierarchicalSchematic) -> Result<(), ModelIntegrityError> {
    let root_file = design.root_file();
    if !is_contained_path(&root_file) {
        return Err(ModelIntegrityError::UnsafeFilePath {
            owner: ROOT_SCOPE.to_string(),
            file: root_file,
        });
    }
    let mut files: HashMap<String, String> = HashMap::new();
    files.insert(root_file, ROOT_SCOPE.to_string());

    for scope in design.scopes() {
        validate_scope(&scope.path, scope.schematic)?;
        for sheet in &scope.schematic.sheets {
            let sheet_path = child_scope(&scope.path, &sheet.name);
            if let Some(first) = files.get(&sheet.file) {
                return Err(ModelIntegrityError::DuplicateSheetFile {
                    file: sheet.file.clone(),
                    first: first.clone(),
                    second: sheet_path,
                });
            }
            files.insert(sheet.file.clone(), sheet_path);
        }
    }

    let findings = hierarchy_findings(design);
    if findings.is_empty() {
        Ok(())
    } else {
        Err(ModelIntegrityError::UnresolvedHierarchy { findings })
    }
}

/// True when `file` only names directories and a file below its base.
pub fn is_contained_path(file: &str) -> bool {
    let path = Path::new(file);
    path.components().next().is_some() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Check the invariants local to one scope.
pub fn validate_scope(scope: &str, schematic: &Schematic) -> Result<(), ModelIntegrityError> {
    // reference -> pin numbers
    let mut pins_by_ref: HashMap<&str, HashSet<&str>> = HashMap::new();
    for symbol in &schematic.symbols {
        if symbol.reference.trim().is_empty() {
            return Err(ModelIntegrityError::EmptyReference {
                scope: scope.to_string(),
                lib_id: symbol.lib_id.clone(),
            });
        }
        if pins_by_ref.contains_key(symbol.reference.as_str()) {
            return Err(ModelIntegrityError::DuplicateReference {
                scope: scope.to_string(),
                reference: symbol.reference.clone(),
            });
        }
        let mut numbers = HashSet::new();
        for pin in &symbol.pins {
            if !numbers.insert(pin.number.as_str()) {
                return Err(ModelIntegrityError::DuplicatePin {
                    scope: scope.to_string(),
                    reference: symbol.reference.clone(),
                    pin: pin.number.clone(),
                });
            }
        }
        pins_by_ref.insert(symbol.reference.as_str(), numbers);
    }

    let mut sheet_pins: HashMap<&str, HashSet<&str>> = HashMap::new();
    for sheet in &schematic.sheets {
        if !is_contained_path(&sheet.file) {
            return Err(ModelIntegrityError::UnsafeFilePath {
                owner: child_scope(scope, &sheet.name),
                file: sheet.file.clone(),
            });
        }
        if sheet_pins.contains_key(sheet.name.as_str()) {
            return Err(ModelIntegrityError::DuplicateSheet {
                scope: scope.to_string(),
                sheet: sheet.name.clone(),
            });
        }
        let mut names = HashSet::new();
        for pin in &sheet.pins {
            if !names.insert(pin.name.as_str()) {
                return Err(ModelIntegrityError::DuplicateSheetPin {
                    scope: scope.to_string(),
                    sheet: sheet.name.clone(),
                    pin: pin.name.clone(),
                });
            }
        }
        sheet_pins.insert(sheet.name.as_str(), names);
    }

    let mut ports = HashSet::new();
    for port in &schematic.ports {
        if !ports.insert(port.name.as_str()) {
            return Err(ModelIntegrityError::DuplicatePort {
                scope: scope.to_string(),
                port: port.name.clone(),
            });
        }
    }

    let pin_exists = |reference: &str, pin: &str| {
        pins_by_ref
            .get(reference)
            .map(|pins| pins.contains(pin))
            .unwrap_or(false)
    };
    let sheet_pin_exists = |sheet: &str, pin: &str| {
        sheet_pins
            .get(sheet)
            .map(|pins| pins.contains(pin))
            .unwrap_or(false)
    };

    let mut net_names = HashSet::new();
    let mut owner_of_pin: BTreeMap<(String, String), &str> = BTreeMap::new();
    for net in &schematic.nets {
        if !net_names.insert(net.name.as_str()) {
            return Err(ModelIntegrityError::DuplicateNet {
                scope: scope.to_string(),
                net: net.name.clone(),
            });
        }
        for member in &net.members {
            if !pin_exists(&member.reference, &member.pin) {
                return Err(ModelIntegrityError::DanglingReference {
                    scope: scope.to_string(),
                    owner: format!("net {}", net.name),
                    target: format!("pin {}", member),
                });
            }
            let key = (member.reference.clone(), member.pin.clone());
            if let Some(first) = owner_of_pin.get(&key) {
                return Err(ModelIntegrityError::PinInMultipleNets {
                    scope: scope.to_string(),
                    pin: member.to_string(),
                    first: first.to_string(),
                    second: net.name.clone(),
                });
            }
            owner_of_pin.insert(key, net.name.as_str());
        }
        for attachment in &net.sheet_pins {
            if !sheet_pin_exists(&attachment.sheet, &attachment.pin) {
                return Err(ModelIntegrityError::DanglingReference {
                    scope: scope.to_string(),
                    owner: format!("net {}", net.name),
                    target: format!("sheet pin {}", attachment),
                });
            }
        }
    }

    for (index, wire) in schematic.wires.iter().enumerate() {
        for end in [&wire.a, &wire.b] {
            let present = match end {
                WireEnd::Pin { reference, pin } => pin_exists(reference, pin),
                WireEnd::Label { net } => net_names.contains(net.as_str()),
                WireEnd::SheetPin { sheet, pin } => sheet_pin_exists(sheet, pin),
            };
            if !present {
                return Err(ModelIntegrityError::DanglingReference {
                    scope: scope.to_string(),
                    owner: format!("wire #{}", index),
                    target: end.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Sheet pins without a same-named, direction-compatible port in the child.
pub fn hierarchy_findings(design: &HierarchicalSchematic) -> Vec<Finding> {
    let mut findings = Vec::new();
    for scope in design.scopes() {
        for sheet in &scope.schematic.sheets {
            let child_path = child_scope(&scope.path, &sheet.name);
            let declared: BTreeSet<&str> = sheet.pins.iter().map(|p| p.name.as_str()).collect();
            for pin in &sheet.pins {
                let location = Location::in_sheet(&scope.path).with_pin(format!("{}.{}", sheet.name, pin.name));
                match sheet.schematic.port(&pin.name) {
                    None => {
                        let near: Vec<&str> = sheet
                            .schematic
                            .ports
                            .iter()
                            .map(|p| p.name.as_str())
                            .filter(|name| !declared.contains(name))
                            .collect();
                        let mut finding = Finding::new(
                            "hierarchy",
                            FindingKind::MissingHierarchicalPin,
                            Severity::Error,
                            format!(
                                "Sheet pin {} on {} has no matching port in {}",
                                pin.name, sheet.name, child_path
                            ),
                        )
                        .at(location);
                        if !near.is_empty() {
                            finding = finding.with_suggestion(format!(
                                "Unmatched ports in {}: {}",
                                child_path,
                                near.join(", ")
                            ));
                        }
                        findings.push(finding);
                    }
                    Some(port) if !pin.direction.compatible_with(port.direction) => {
                        findings.push(
                            Finding::new(
                                "hierarchy",
                                FindingKind::HierarchicalPinDirection,
                                Severity::Error,
                                format!(
                                    "Sheet pin {} on {} is {} but the port in {} is {}",
                                    pin.name,
                                    sheet.name,
                                    pin.direction.keyword(),
                                    child_path,
                                    port.direction.keyword()
                                ),
                            )
                            .at(location),
                        );
                    }
                    Some(_) => {}
                }
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Net, Pin, PinDirection, PinType, Sheet, Symbol};

    fn resistor(reference: &str) -> Symbol {
        Symbol::new(reference, "Device:R", "10k")
            .with_footprint("Resistor_SMD:R_0603_1608Metric")
            .with_pin(Pin::new("1", "~", PinType::Passive))
            .with_pin(Pin::new("2", "~", PinType::Passive))
    }

    #[test]
    fn test_duplicate_reference() {
        let mut sch = Schematic::new("t");
        sch.add_symbol(resistor("R1"));
        sch.add_symbol(resistor("R1"));
        let err = validate_scope("/", &sch).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::DuplicateReference { ref reference, .. } if reference == "R1"));
    }

    #[test]
    fn test_empty_reference() {
        let mut sch = Schematic::new("t");
        sch.add_symbol(resistor(" "));
        let err = validate_scope("/", &sch).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::EmptyReference { .. }));
    }

    #[test]
    fn test_dangling_net_member() {
        let mut sch = Schematic::new("t");
        sch.add_symbol(resistor("R1"));
        sch.add_net(Net::new("N1").connect("R1", "3"));
        let err = validate_scope("/", &sch).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::DanglingReference { .. }));
        assert!(err.to_string().contains("R1.3"));
    }

    #[test]
    fn test_pin_in_multiple_nets() {
        let mut sch = Schematic::new("t");
        sch.add_symbol(resistor("R1"));
        sch.add_net(Net::new("A").connect("R1", "1"));
        sch.add_net(Net::new("B").connect("R1", "1"));
        let err = validate_scope("/", &sch).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::PinInMultipleNets { ref first, ref second, .. } if first == "A" && second == "B"));
    }

    #[test]
    fn test_dangling_wire_label() {
        let mut sch = Schematic::new("t");
        sch.add_symbol(resistor("R1"));
        sch.add_wire(
            WireEnd::Pin { reference: "R1".into(), pin: "1".into() },
            WireEnd::Label { net: "NOPE".into() },
        );
        let err = validate_scope("/", &sch).unwrap_err();
        assert!(err.to_string().contains("[NOPE]"));
    }

    #[test]
    fn test_duplicate_sheet_file() {
        let mut design = HierarchicalSchematic::new("board");
        design.root.add_sheet(Sheet::new("a", "child.kicad_sch", Schematic::new("a")));
        design.root.add_sheet(Sheet::new("b", "child.kicad_sch", Schematic::new("b")));
        let err = validate_design(&design).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::DuplicateSheetFile { ref file, .. } if file == "child.kicad_sch"));
    }

    #[test]
    fn test_sheet_file_must_stay_below_output() {
        for file in ["../escaped.kicad_sch", "/tmp/abs.kicad_sch", "sub/../../x.kicad_sch", ""] {
            let mut design = HierarchicalSchematic::new("board");
            design.root.add_sheet(Sheet::new("a", file, Schematic::new("a")));
            let err = validate_design(&design).unwrap_err();
            assert!(
                matches!(err, ModelIntegrityError::UnsafeFilePath { ref owner, .. } if owner == "/a"),
                "{file}: {err}"
            );
        }

        let mut design = HierarchicalSchematic::new("board");
        design.root.add_sheet(Sheet::new("a", "sheets/a.kicad_sch", Schematic::new("a")));
        validate_design(&design).unwrap();
    }

    #[test]
    fn test_root_file_must_stay_below_output() {
        let design = HierarchicalSchematic::new("../board");
        let err = validate_design(&design).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::UnsafeFilePath { ref file, .. } if file == "../board.kicad_sch"));
    }

    #[test]
    fn test_missing_and_misdirected_ports_are_collected() {
        let mut child = Schematic::new("power");
        child.add_port("VOUT", PinDirection::Input);
        let sheet = Sheet::new("power", "power.kicad_sch", child)
            .with_pin("5V_IN", PinDirection::Input)
            .with_pin("VOUT", PinDirection::Output);
        let mut design = HierarchicalSchematic::new("board");
        design.root.add_sheet(sheet);

        match validate_design(&design) {
            Err(ModelIntegrityError::UnresolvedHierarchy { findings }) => {
                assert_eq!(findings.len(), 2);
                assert_eq!(findings[0].kind, FindingKind::MissingHierarchicalPin);
                assert_eq!(findings[1].kind, FindingKind::HierarchicalPinDirection);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
