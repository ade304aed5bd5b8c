//! Deterministic schematic serializer
//!
//! Writes one S-expression document per scope, plus a plain-text dump of
//! each. Output depends only on the design, its connectivity and the
//! provenance stamp: symbols are natural-sorted, nets sorted by canonical
//! name, UUIDs are derived from names, and numbers use a fixed format.

pub mod dump;
pub mod sexp;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifacts::Provenance;
use crate::model::{HierarchicalSchematic, OwnedScope, Symbol, WireEnd, ROOT_SCOPE};
use crate::resolve::Connectivity;
use crate::value::natural_cmp;

pub use sexp::{is_representable, quote, ParseError, SExp, SExpParser};

/// File format version written into every document.
pub const FORMAT_VERSION: i64 = 20231120;
pub const GENERATOR: &str = "netforge";

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("{document}: symbol {reference} is missing its {attribute}")]
    MissingSymbolAttribute {
        document: String,
        reference: String,
        attribute: &'static str,
    },
    #[error("{document}: {context} contains a control character that cannot be written")]
    Unrepresentable { document: String, context: String },
    #[error("{document}: generated text does not parse back: {source}")]
    Reparse {
        document: String,
        #[source]
        source: ParseError,
    },
}

/// A rendered document ready for publication
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedDocument {
    pub scope: String,
    /// Output path relative to the output directory.
    pub path: String,
    pub contents: String,
    pub dump: String,
}

impl SerializedDocument {
    /// Path of the plain-text dump (`<file>.txt`).
    pub fn dump_path(&self) -> String {
        format!("{}.txt", self.path)
    }
}

/// Outcome for one document
#[derive(Debug)]
pub struct DocumentResult {
    pub scope: String,
    pub path: String,
    pub result: Result<SerializedDocument, SerializationError>,
}

/// Name-based UUID for an entity inside a document.
pub fn entity_uuid(document: &str, entity: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("netforge:{}#{}", document, entity).as_bytes(),
    )
}

/// Output path of every scope, relative to the output directory.
///
/// Child files are resolved against the directory of their parent document.
pub fn document_paths(design: &HierarchicalSchematic) -> Vec<(String, String)> {
    let mut by_scope: HashMap<String, String> = HashMap::new();
    let mut out = Vec::new();
    for scope in design.scopes() {
        let path = if scope.path == ROOT_SCOPE {
            scope.file.clone()
        } else {
            let parent_scope = match scope.path.rfind('/') {
                Some(0) | None => ROOT_SCOPE.to_string(),
                Some(i) => scope.path[..i].to_string(),
            };
            let parent_path = by_scope.get(&parent_scope).cloned().unwrap_or_default();
            let dir = Path::new(&parent_path)
                .parent()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if dir.is_empty() {
                scope.file.clone()
            } else {
                format!("{}/{}", dir, scope.file)
            }
        };
        by_scope.insert(scope.path.clone(), path.clone());
        out.push((scope.path.clone(), path));
    }
    out
}

/// Serialize every scope. A failing document does not stop its siblings.
pub fn serialize_design(
    design: &HierarchicalSchematic,
    connectivity: &Connectivity,
    provenance: &Provenance,
) -> Vec<DocumentResult> {
    let paths: HashMap<String, String> = document_paths(design).into_iter().collect();
    let mut results = Vec::new();

    for scope in design.scopes() {
        let path = paths.get(&scope.path).cloned().unwrap_or_else(|| scope.file.clone());
        let result = serialize_scope(design, &scope, &path, connectivity, provenance);
        match &result {
            Ok(doc) => debug!(document = %doc.path, bytes = doc.contents.len(), "serialized"),
            Err(e) => warn!(document = %path, error = %e, "document failed"),
        }
        results.push(DocumentResult {
            scope: scope.path.clone(),
            path,
            result,
        });
    }

    results
}

/// Serialize one scope into its document.
pub fn serialize_scope(
    design: &HierarchicalSchematic,
    scope: &OwnedScope,
    path: &str,
    connectivity: &Connectivity,
    provenance: &Provenance,
) -> Result<SerializedDocument, SerializationError> {
    check_scope(scope, path)?;

    let schematic = scope.schematic;
    let mut items = vec![
        SExp::list("version", vec![SExp::int(FORMAT_VERSION)]),
        SExp::pair("generator", GENERATOR),
        SExp::pair("generator_version", provenance.generator_version.as_str()),
        SExp::pair("uuid", entity_uuid(path, "document").to_string()),
        SExp::pair("paper", "A4"),
        title_block(design, scope, provenance),
    ];

    for symbol in sorted_symbols(&schematic.symbols) {
        items.push(symbol_sexp(symbol, path, &scope.path, connectivity));
    }

    for net in connectivity.nets() {
        let Some(alias) = net.alias_in(&scope.path) else {
            continue;
        };
        let Some(local) = schematic.net(&alias.name) else {
            continue;
        };
        if local.members.is_empty() && local.sheet_pins.is_empty() {
            continue;
        }
        let mut body = vec![
            SExp::pair("name", net.name.as_str()),
            SExp::pair("local", alias.name.as_str()),
            SExp::list("class", vec![SExp::atom(net.class.keyword())]),
        ];
        if local.global {
            body.push(SExp::list("global", vec![SExp::atom("yes")]));
        }
        let mut members: Vec<_> = local.members.iter().collect();
        members.sort_by(|a, b| natural_cmp(&a.reference, &b.reference).then_with(|| natural_cmp(&a.pin, &b.pin)));
        for member in members {
            body.push(SExp::list(
                "node",
                vec![
                    SExp::pair("ref", member.reference.as_str()),
                    SExp::pair("pin", member.pin.as_str()),
                ],
            ));
        }
        for attachment in &local.sheet_pins {
            body.push(SExp::list(
                "sheet_pin",
                vec![SExp::string(attachment.sheet.as_str()), SExp::string(attachment.pin.as_str())],
            ));
        }
        items.push(SExp::list("net", body));
    }

    for (i, wire) in schematic.wires.iter().enumerate() {
        items.push(SExp::list(
            "wire",
            vec![
                SExp::list("from", vec![wire_end(&wire.a)]),
                SExp::list("to", vec![wire_end(&wire.b)]),
                SExp::pair("uuid", entity_uuid(path, &format!("wire/{}", i)).to_string()),
            ],
        ));
    }

    for port in &schematic.ports {
        items.push(SExp::list(
            "hierarchical_label",
            vec![
                SExp::string(port.name.as_str()),
                SExp::list("shape", vec![SExp::atom(port.direction.keyword())]),
                SExp::pair("uuid", entity_uuid(path, &format!("port/{}", port.name)).to_string()),
            ],
        ));
    }

    for sheet in &schematic.sheets {
        let mut body = vec![
            SExp::list("at", vec![SExp::number(sheet.position.x), SExp::number(sheet.position.y)]),
            SExp::list("size", vec![SExp::number(sheet.size.0), SExp::number(sheet.size.1)]),
            SExp::pair("uuid", entity_uuid(path, &format!("sheet/{}", sheet.name)).to_string()),
            SExp::list("property", vec![SExp::string("Sheetname"), SExp::string(sheet.name.as_str())]),
            SExp::list("property", vec![SExp::string("Sheetfile"), SExp::string(sheet.file.as_str())]),
        ];
        for pin in &sheet.pins {
            body.push(SExp::list(
                "pin",
                vec![
                    SExp::string(pin.name.as_str()),
                    SExp::atom(pin.direction.keyword()),
                    SExp::list(
                        "at",
                        vec![SExp::number(pin.position.x), SExp::number(pin.position.y), SExp::int(0)],
                    ),
                    SExp::pair(
                        "uuid",
                        entity_uuid(path, &format!("sheet/{}/pin/{}", sheet.name, pin.name)).to_string(),
                    ),
                ],
            ));
        }
        items.push(SExp::list("sheet", body));
    }

    items.push(SExp::list(
        "sheet_instances",
        vec![SExp::list(
            "path",
            vec![SExp::string(scope.path.as_str()), SExp::pair("page", (scope_page(design, &scope.path)).to_string())],
        )],
    ));

    let contents = SExp::list("kicad_sch", items).to_pretty();

    SExpParser::new(&contents)
        .parse_document()
        .map_err(|source| SerializationError::Reparse {
            document: path.to_string(),
            source,
        })?;

    let dump = dump::dump_scope(design, scope, path, connectivity, provenance);

    Ok(SerializedDocument {
        scope: scope.path.clone(),
        path: path.to_string(),
        contents,
        dump,
    })
}

/// Symbols sorted by natural reference order.
pub fn sorted_symbols(symbols: &[Symbol]) -> Vec<&Symbol> {
    let mut sorted: Vec<&Symbol> = symbols.iter().collect();
    sorted.sort_by(|a, b| natural_cmp(&a.reference, &b.reference));
    sorted
}

fn scope_page(design: &HierarchicalSchematic, path: &str) -> usize {
    design
        .scopes()
        .iter()
        .position(|s| s.path == path)
        .map(|i| i + 1)
        .unwrap_or(1)
}

fn title_block(design: &HierarchicalSchematic, scope: &OwnedScope, provenance: &Provenance) -> SExp {
    let title = if scope.path == ROOT_SCOPE {
        design.title.clone()
    } else {
        scope.schematic.title.clone()
    };
    SExp::list(
        "title_block",
        vec![
            SExp::pair("title", title),
            SExp::pair("date", provenance.date()),
            SExp::pair("rev", provenance.source_revision.as_str()),
            SExp::list(
                "comment",
                vec![
                    SExp::int(1),
                    SExp::string(format!("Generated by {} {}", GENERATOR, provenance.generator_version)),
                ],
            ),
        ],
    )
}

fn symbol_sexp(symbol: &Symbol, path: &str, scope: &str, connectivity: &Connectivity) -> SExp {
    let at = |dx: f64, dy: f64| {
        SExp::list(
            "at",
            vec![
                SExp::number(symbol.position.x + dx),
                SExp::number(symbol.position.y + dy),
                SExp::int(0),
            ],
        )
    };
    let mut body = vec![
        SExp::pair("lib_id", symbol.lib_id.as_str()),
        SExp::list(
            "at",
            vec![
                SExp::number(symbol.position.x),
                SExp::number(symbol.position.y),
                SExp::number(symbol.rotation),
            ],
        ),
        SExp::list("unit", vec![SExp::int(1)]),
        SExp::pair("uuid", entity_uuid(path, &format!("symbol/{}", symbol.reference)).to_string()),
        SExp::list(
            "property",
            vec![SExp::string("Reference"), SExp::string(symbol.reference.as_str()), at(0.0, -2.54)],
        ),
        SExp::list(
            "property",
            vec![SExp::string("Value"), SExp::string(symbol.value.as_str()), at(0.0, 2.54)],
        ),
        SExp::list(
            "property",
            vec![
                SExp::string("Footprint"),
                SExp::string(symbol.footprint.as_deref().unwrap_or("")),
                at(0.0, 0.0),
            ],
        ),
    ];
    for (key, value) in &symbol.fields {
        body.push(SExp::list(
            "property",
            vec![SExp::string(key.as_str()), SExp::string(value.as_str()), at(0.0, 0.0)],
        ));
    }
    for pin in &symbol.pins {
        let mut pin_body = vec![
            SExp::string(pin.number.as_str()),
            SExp::list("type", vec![SExp::atom(pin.pin_type.keyword())]),
        ];
        if let Some(net) = connectivity.net_of_pin(scope, &symbol.reference, &pin.number) {
            pin_body.push(SExp::pair("net", net.name.as_str()));
        }
        pin_body.push(SExp::pair(
            "uuid",
            entity_uuid(path, &format!("symbol/{}/pin/{}", symbol.reference, pin.number)).to_string(),
        ));
        body.push(SExp::list("pin", pin_body));
    }
    SExp::list("symbol", body)
}

fn wire_end(end: &WireEnd) -> SExp {
    match end {
        WireEnd::Pin { reference, pin } => SExp::list(
            "pin",
            vec![SExp::string(reference.as_str()), SExp::string(pin.as_str())],
        ),
        WireEnd::Label { net } => SExp::list("label", vec![SExp::string(net.as_str())]),
        WireEnd::SheetPin { sheet, pin } => SExp::list(
            "sheet_pin",
            vec![SExp::string(sheet.as_str()), SExp::string(pin.as_str())],
        ),
    }
}

/// Attribute and text checks that make a document unwritable.
fn check_scope(scope: &OwnedScope, path: &str) -> Result<(), SerializationError> {
    let unrepresentable = |context: String| SerializationError::Unrepresentable {
        document: path.to_string(),
        context,
    };

    if !is_representable(&scope.schematic.title) {
        return Err(unrepresentable("title".to_string()));
    }

    for symbol in &scope.schematic.symbols {
        let missing = |attribute: &'static str| SerializationError::MissingSymbolAttribute {
            document: path.to_string(),
            reference: symbol.reference.clone(),
            attribute,
        };
        if symbol.lib_id.trim().is_empty() {
            return Err(missing("lib_id"));
        }
        if symbol.value.trim().is_empty() {
            return Err(missing("value"));
        }
        match &symbol.footprint {
            Some(fp) if !fp.trim().is_empty() => {}
            _ => return Err(missing("footprint")),
        }

        let texts = [
            ("reference", symbol.reference.as_str()),
            ("lib_id", symbol.lib_id.as_str()),
            ("value", symbol.value.as_str()),
            ("footprint", symbol.footprint.as_deref().unwrap_or("")),
        ];
        for (what, text) in texts {
            if !is_representable(text) {
                return Err(unrepresentable(format!("{} of {}", what, symbol.reference)));
            }
        }
        for (key, value) in &symbol.fields {
            if !is_representable(key) || !is_representable(value) {
                return Err(unrepresentable(format!("field {} of {}", key, symbol.reference)));
            }
        }
        for pin in &symbol.pins {
            if !is_representable(&pin.number) || !is_representable(&pin.name) {
                return Err(unrepresentable(format!("pin {} of {}", pin.number, symbol.reference)));
            }
        }
    }

    for net in &scope.schematic.nets {
        if !is_representable(&net.name) {
            return Err(unrepresentable(format!("net {:?}", net.name)));
        }
    }
    for port in &scope.schematic.ports {
        if !is_representable(&port.name) {
            return Err(unrepresentable(format!("port {:?}", port.name)));
        }
    }
    for sheet in &scope.schematic.sheets {
        if !is_representable(&sheet.name) || !is_representable(&sheet.file) {
            return Err(unrepresentable(format!("sheet {:?}", sheet.name)));
        }
        for pin in &sheet.pins {
            if !is_representable(&pin.name) {
                return Err(unrepresentable(format!("sheet pin {:?}", pin.name)));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Net, NetClass, Pin, PinDirection, PinType, Schematic, Sheet};
    use crate::resolve::resolve;
    use std::collections::BTreeMap;

    fn stamp() -> Provenance {
        Provenance::fixed("0.1.0", "abc1234", "2026-01-02T03:04:05Z")
    }

    fn cap(reference: &str) -> Symbol {
        Symbol::new(reference, "Device:C", "100nF")
            .with_footprint("Capacitor_SMD:C_0402_1005Metric")
            .with_pin(Pin::new("1", "~", PinType::Passive))
            .with_pin(Pin::new("2", "~", PinType::Passive))
    }

    fn design() -> HierarchicalSchematic {
        let mut child = Schematic::new("power");
        child.add_port("VIN", PinDirection::Input);
        child.add_symbol(cap("C1"));
        child.add_net(Net::new("VIN").connect("C1", "1"));

        let mut d = HierarchicalSchematic::new("board");
        d.root.add_symbol(cap("C10"));
        d.root.add_symbol(cap("C2"));
        d.root.add_sheet(Sheet::new("power", "sub/power.kicad_sch", child).with_pin("VIN", PinDirection::Input));
        d.root.add_net(
            Net::new("+5V")
                .with_class(NetClass::Power)
                .connect("C2", "1")
                .connect("C10", "1")
                .attach_sheet_pin("power", "VIN"),
        );
        d
    }

    #[test]
    fn test_documents_are_deterministic() {
        let d = design();
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let a = serialize_design(&d, &conn, &stamp());
        let b = serialize_design(&d, &conn, &stamp());
        assert_eq!(a.len(), 2);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.result.as_ref().unwrap(), y.result.as_ref().unwrap());
        }
    }

    #[test]
    fn test_symbol_order_and_stamp() {
        let d = design();
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let docs = serialize_design(&d, &conn, &stamp());
        let root = docs[0].result.as_ref().unwrap();
        assert_eq!(root.path, "board.kicad_sch");
        let c2 = root.contents.find("\"C2\"").unwrap();
        let c10 = root.contents.find("\"C10\"").unwrap();
        assert!(c2 < c10);
        assert!(root.contents.contains("(rev \"abc1234\")"));
        assert!(root.contents.contains("(date \"2026-01-02\")"));
        assert!(root.contents.contains("(generator_version \"0.1.0\")"));
        assert!(root.contents.contains("(property \"Sheetfile\" \"sub/power.kicad_sch\")"));
    }

    #[test]
    fn test_child_document_path_and_net() {
        let d = design();
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let docs = serialize_design(&d, &conn, &stamp());
        let child = docs[1].result.as_ref().unwrap();
        assert_eq!(child.path, "sub/power.kicad_sch");
        assert_eq!(child.dump_path(), "sub/power.kicad_sch.txt");
        // canonical name of the merged supply
        assert!(child.contents.contains("(name \"+5V\")"));
        assert!(child.contents.contains("(local \"VIN\")"));
    }

    #[test]
    fn test_missing_footprint_fails_only_that_document() {
        let mut d = design();
        d.root.sheets[0].schematic.symbols[0].footprint = None;
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let docs = serialize_design(&d, &conn, &stamp());
        assert!(docs[0].result.is_ok());
        match &docs[1].result {
            Err(SerializationError::MissingSymbolAttribute { reference, attribute, .. }) => {
                assert_eq!(reference, "C1");
                assert_eq!(*attribute, "footprint");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_control_character_is_unrepresentable() {
        let mut d = design();
        d.root.symbols[0].value = "100nF\u{1b}".to_string();
        let conn = resolve(&d, &BTreeMap::new()).unwrap();
        let docs = serialize_design(&d, &conn, &stamp());
        assert!(matches!(docs[0].result, Err(SerializationError::Unrepresentable { .. })));
        assert!(docs[1].result.is_ok());
    }

    #[test]
    fn test_uuid_is_name_based() {
        assert_eq!(entity_uuid("a.kicad_sch", "symbol/R1"), entity_uuid("a.kicad_sch", "symbol/R1"));
        assert_ne!(entity_uuid("a.kicad_sch", "symbol/R1"), entity_uuid("b.kicad_sch", "symbol/R1"));
    }
}
