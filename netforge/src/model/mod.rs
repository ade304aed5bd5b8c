//! Hierarchical schematic model
//!
//! Plain data types describing a design before resolution: symbols with
//! their pins, locally named nets, wires, and sheets that nest child
//! schematics. A child schematic is owned by exactly one sheet, so the sheet
//! tree cannot share or cycle.
//!
//! Every type derives serde so that a design can be declared in JSON and
//! loaded by the `design_file` generator.

pub mod validate;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use validate::ModelIntegrityError;

/// Scope path of the root schematic.
pub const ROOT_SCOPE: &str = "/";

/// Build the scope path of a child sheet.
pub fn child_scope(parent: &str, sheet_name: &str) -> String {
    if parent == ROOT_SCOPE {
        format!("/{}", sheet_name)
    } else {
        format!("{}/{}", parent, sheet_name)
    }
}

/// Position in the schematic (in mm)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Electrical type of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinType {
    PowerIn,
    PowerOut,
    Input,
    Output,
    Bidirectional,
    Passive,
}

impl PinType {
    /// Pins that actively drive a net.
    pub fn is_driver(self) -> bool {
        matches!(self, PinType::Output | PinType::PowerOut)
    }

    /// Token used by the schematic grammar.
    pub fn keyword(self) -> &'static str {
        match self {
            PinType::PowerIn => "power_in",
            PinType::PowerOut => "power_out",
            PinType::Input => "input",
            PinType::Output => "output",
            PinType::Bidirectional => "bidirectional",
            PinType::Passive => "passive",
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinType::PowerIn => write!(f, "Power Input"),
            PinType::PowerOut => write!(f, "Power Output"),
            PinType::Input => write!(f, "Input"),
            PinType::Output => write!(f, "Output"),
            PinType::Bidirectional => write!(f, "Bidirectional"),
            PinType::Passive => write!(f, "Passive"),
        }
    }
}

/// A pin on a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    /// Pin number (e.g., "1", "A1")
    pub number: String,
    /// Pin name (e.g., "VDD", "SDA")
    #[serde(default)]
    pub name: String,
    pub pin_type: PinType,
    /// Position relative to the symbol origin
    #[serde(default)]
    pub position: Position,
}

impl Pin {
    pub fn new(number: impl Into<String>, name: impl Into<String>, pin_type: PinType) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            pin_type,
            position: Position::default(),
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }
}

/// A placed library symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Reference designator (e.g., "U1", "R1", "C10")
    pub reference: String,
    /// Library identifier (e.g., "Device:C")
    pub lib_id: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint: Option<String>,
    #[serde(default)]
    pub position: Position,
    /// Rotation angle in degrees
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub pins: Vec<Pin>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Symbol {
    pub fn new(
        reference: impl Into<String>,
        lib_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            lib_id: lib_id.into(),
            value: value.into(),
            footprint: None,
            position: Position::default(),
            rotation: 0.0,
            pins: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_footprint(mut self, footprint: impl Into<String>) -> Self {
        self.footprint = Some(footprint.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_pin(mut self, pin: Pin) -> Self {
        self.pins.push(pin);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn pin(&self, number: &str) -> Option<&Pin> {
        self.pins.iter().find(|p| p.number == number)
    }

    /// Broad component category, from the reference prefix and library id.
    pub fn kind(&self) -> ComponentKind {
        ComponentKind::classify(&self.reference, &self.lib_id)
    }
}

/// Broad component category used by the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Capacitor,
    Resistor,
    Led,
    Other,
}

impl ComponentKind {
    pub fn classify(reference: &str, lib_id: &str) -> Self {
        let prefix: String = reference
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        let lib_upper = lib_id.to_uppercase();
        let lib_name = lib_upper.rsplit(':').next().unwrap_or("");

        if prefix == "LED" || (prefix == "D" && lib_upper.contains("LED")) {
            return ComponentKind::Led;
        }
        if prefix == "C" || lib_name == "C" || lib_name.starts_with("C_") || lib_name == "CP" {
            return ComponentKind::Capacitor;
        }
        if prefix == "R" || lib_name == "R" || lib_name.starts_with("R_") {
            return ComponentKind::Resistor;
        }
        ComponentKind::Other
    }
}

/// Net class tag grouping nets that share electrical constraints
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NetClass {
    #[default]
    Default,
    Power,
    Logic,
    Drive,
    #[serde(alias = "bus", alias = "i2c")]
    OpenDrain,
}

impl NetClass {
    pub fn keyword(self) -> &'static str {
        match self {
            NetClass::Default => "default",
            NetClass::Power => "power",
            NetClass::Logic => "logic",
            NetClass::Drive => "drive",
            NetClass::OpenDrain => "open_drain",
        }
    }
}

impl fmt::Display for NetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A (reference, pin number) pair within one scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub reference: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(reference: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pin: pin.into(),
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.reference, self.pin)
    }
}

/// A pin on a sheet instance, seen from the parent scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetPinRef {
    pub sheet: String,
    pub pin: String,
}

impl SheetPinRef {
    pub fn new(sheet: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            pin: pin.into(),
        }
    }
}

impl fmt::Display for SheetPinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sheet, self.pin)
    }
}

/// A locally named net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    #[serde(default)]
    pub class: NetClass,
    /// Global labels join every same-named global net in the design.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub members: BTreeSet<PinRef>,
    /// Sheet pins of child sheets in this scope that this net drives.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sheet_pins: BTreeSet<SheetPinRef>,
}

impl Net {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: NetClass::Default,
            global: false,
            members: BTreeSet::new(),
            sheet_pins: BTreeSet::new(),
        }
    }

    pub fn with_class(mut self, class: NetClass) -> Self {
        self.class = class;
        self
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn connect(mut self, reference: &str, pin: &str) -> Self {
        self.members.insert(PinRef::new(reference, pin));
        self
    }

    pub fn attach_sheet_pin(mut self, sheet: &str, pin: &str) -> Self {
        self.sheet_pins.insert(SheetPinRef::new(sheet, pin));
        self
    }
}

/// Wire endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireEnd {
    Pin { reference: String, pin: String },
    Label { net: String },
    SheetPin { sheet: String, pin: String },
}

impl fmt::Display for WireEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireEnd::Pin { reference, pin } => write!(f, "{}.{}", reference, pin),
            WireEnd::Label { net } => write!(f, "[{}]", net),
            WireEnd::SheetPin { sheet, pin } => write!(f, "{}:{}", sheet, pin),
        }
    }
}

/// A wire between two endpoints; a drawing hint, not an electrical entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    pub a: WireEnd,
    pub b: WireEnd,
}

/// Direction of a hierarchical pin or port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    Input,
    Output,
    Bidirectional,
    Passive,
}

impl PinDirection {
    /// Whether a sheet pin with this direction may bind to a child port with `other`.
    pub fn compatible_with(self, other: PinDirection) -> bool {
        self == other
            || matches!(self, PinDirection::Bidirectional | PinDirection::Passive)
            || matches!(other, PinDirection::Bidirectional | PinDirection::Passive)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            PinDirection::Input => "input",
            PinDirection::Output => "output",
            PinDirection::Bidirectional => "bidirectional",
            PinDirection::Passive => "passive",
        }
    }
}

/// A hierarchical pin declared on a sheet instance (parent side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalPin {
    pub name: String,
    pub direction: PinDirection,
    /// Name of the owning sheet instance; filled in by `Sheet::add_pin`.
    #[serde(default)]
    pub sheet: String,
    #[serde(default)]
    pub position: Position,
}

/// A boundary port declared inside a child schematic (child side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub direction: PinDirection,
}

/// Sheet instance embedding a child schematic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    /// Backing document, relative to the parent document.
    pub file: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_sheet_size")]
    pub size: (f64, f64),
    #[serde(default)]
    pub pins: Vec<HierarchicalPin>,
    pub schematic: Schematic,
}

fn default_sheet_size() -> (f64, f64) {
    (30.0, 20.0)
}

impl Sheet {
    pub fn new(name: impl Into<String>, file: impl Into<String>, schematic: Schematic) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            position: Position::default(),
            size: default_sheet_size(),
            pins: Vec::new(),
            schematic,
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn add_pin(&mut self, name: impl Into<String>, direction: PinDirection) {
        let offset = self.pins.len() as f64 * 2.54;
        self.pins.push(HierarchicalPin {
            name: name.into(),
            direction,
            sheet: self.name.clone(),
            position: Position::new(self.position.x, self.position.y + 2.54 + offset),
        });
    }

    pub fn with_pin(mut self, name: impl Into<String>, direction: PinDirection) -> Self {
        self.add_pin(name, direction);
        self
    }

    pub fn pin(&self, name: &str) -> Option<&HierarchicalPin> {
        self.pins.iter().find(|p| p.name == name)
    }
}

/// One schematic scope: its symbols, nets, wires, ports and child sheets
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schematic {
    pub title: String,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub nets: Vec<Net>,
    #[serde(default)]
    pub wires: Vec<Wire>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

impl Schematic {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    pub fn add_net(&mut self, net: Net) {
        self.nets.push(net);
    }

    pub fn add_wire(&mut self, a: WireEnd, b: WireEnd) {
        self.wires.push(Wire { a, b });
    }

    pub fn add_port(&mut self, name: impl Into<String>, direction: PinDirection) {
        self.ports.push(Port {
            name: name.into(),
            direction,
        });
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn symbol(&self, reference: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.reference == reference)
    }

    pub fn net(&self, name: &str) -> Option<&Net> {
        self.nets.iter().find(|n| n.name == name)
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Root of a design: a title and the root scope owning the sheet tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalSchematic {
    pub title: String,
    pub root: Schematic,
    /// Root document file name; derived from the title when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_file: Option<String>,
}

impl HierarchicalSchematic {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            root: Schematic::new(title.clone()),
            title,
            root_file: None,
        }
    }

    pub fn root_file(&self) -> String {
        self.root_file
            .clone()
            .unwrap_or_else(|| format!("{}.kicad_sch", self.title))
    }

    /// Every scope in depth-first declaration order, root first.
    pub fn scopes(&self) -> Vec<OwnedScope<'_>> {
        let mut out = Vec::new();
        out.push(OwnedScope {
            path: ROOT_SCOPE.to_string(),
            depth: 0,
            schematic: &self.root,
            sheet: None,
            file: self.root_file(),
        });
        collect_scopes(&self.root, ROOT_SCOPE, 1, &mut out);
        out
    }

    /// Find a scope's schematic by path.
    pub fn scope(&self, path: &str) -> Option<&Schematic> {
        if path == ROOT_SCOPE {
            return Some(&self.root);
        }
        let mut current = &self.root;
        for segment in path.trim_start_matches('/').split('/') {
            current = &current.sheet(segment)?.schematic;
        }
        Some(current)
    }

    /// Run every structural invariant check.
    pub fn validate(&self) -> Result<(), ModelIntegrityError> {
        validate::validate_design(self)
    }
}

/// A scope visited during a depth-first walk of the sheet tree
#[derive(Debug, Clone)]
pub struct OwnedScope<'a> {
    /// `/` for the root, `/power`, `/power/ldo` below it.
    pub path: String,
    pub depth: usize,
    pub schematic: &'a Schematic,
    /// Sheet instance embedding this scope (None for the root).
    pub sheet: Option<&'a Sheet>,
    /// Document file this scope is written to.
    pub file: String,
}

fn collect_scopes<'a>(
    schematic: &'a Schematic,
    parent: &str,
    depth: usize,
    out: &mut Vec<OwnedScope<'a>>,
) {
    for sheet in &schematic.sheets {
        let path = child_scope(parent, &sheet.name);
        out.push(OwnedScope {
            path: path.clone(),
            depth,
            schematic: &sheet.schematic,
            sheet: Some(sheet),
            file: sheet.file.clone(),
        });
        collect_scopes(&sheet.schematic, &path, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_design() -> HierarchicalSchematic {
        let mut design = HierarchicalSchematic::new("board");
        let mut child = Schematic::new("power");
        child.add_port("5V_IN", PinDirection::Input);
        let mut grandchild = Schematic::new("ldo");
        grandchild.add_port("VIN", PinDirection::Input);
        child.add_sheet(Sheet::new("ldo", "ldo.kicad_sch", grandchild).with_pin("VIN", PinDirection::Input));
        design
            .root
            .add_sheet(Sheet::new("power", "power.kicad_sch", child).with_pin("5V_IN", PinDirection::Input));
        design
    }

    #[test]
    fn test_child_scope_paths() {
        assert_eq!(child_scope("/", "power"), "/power");
        assert_eq!(child_scope("/power", "ldo"), "/power/ldo");
    }

    #[test]
    fn test_scopes_depth_first() {
        let design = two_level_design();
        let paths: Vec<String> = design.scopes().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec!["/", "/power", "/power/ldo"]);
        assert_eq!(design.root_file(), "board.kicad_sch");
    }

    #[test]
    fn test_scope_lookup() {
        let design = two_level_design();
        assert_eq!(design.scope("/power/ldo").map(|s| s.title.as_str()), Some("ldo"));
        assert!(design.scope("/missing").is_none());
    }

    #[test]
    fn test_component_kind() {
        assert_eq!(ComponentKind::classify("C12", "Device:C"), ComponentKind::Capacitor);
        assert_eq!(ComponentKind::classify("R3", "Device:R_Small"), ComponentKind::Resistor);
        assert_eq!(ComponentKind::classify("LED7", "LED:APA102"), ComponentKind::Led);
        assert_eq!(ComponentKind::classify("D1", "Device:LED"), ComponentKind::Led);
        assert_eq!(ComponentKind::classify("D2", "Diode:BAT54C"), ComponentKind::Other);
        assert_eq!(ComponentKind::classify("U1", "MCU:RP2040"), ComponentKind::Other);
    }

    #[test]
    fn test_direction_compatibility() {
        assert!(PinDirection::Input.compatible_with(PinDirection::Input));
        assert!(PinDirection::Input.compatible_with(PinDirection::Bidirectional));
        assert!(PinDirection::Passive.compatible_with(PinDirection::Output));
        assert!(!PinDirection::Input.compatible_with(PinDirection::Output));
    }

    #[test]
    fn test_net_class_aliases() {
        let class: NetClass = serde_json::from_str("\"i2c\"").unwrap();
        assert_eq!(class, NetClass::OpenDrain);
        let class: NetClass = serde_json::from_str("\"bus\"").unwrap();
        assert_eq!(class, NetClass::OpenDrain);
    }
}
