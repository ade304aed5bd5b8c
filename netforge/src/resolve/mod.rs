//! Hierarchical net resolution
//!
//! Flattens every scope of a [`HierarchicalSchematic`] into one set of
//! canonical nets. Locally named nets are joined across sheet boundaries
//! through hierarchical pins and across the whole design through global
//! labels, using a disjoint set. The model is not mutated; the result is a
//! separate [`Connectivity`] value.

pub mod disjoint_set;
pub mod graph;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::model::validate::{hierarchy_findings, ModelIntegrityError};
use crate::model::{
    child_scope, HierarchicalSchematic, NetClass, PinRef, PinType, Schematic, SheetPinRef,
    ROOT_SCOPE,
};
use crate::rules::{Finding, FindingKind, Location, Severity};
use crate::value::natural_cmp;

pub use disjoint_set::DisjointSet;
pub use graph::{ComponentNode, ConnectivityGraph, GraphNode, NetNode, PinEdge};

/// A local net name that was merged into a canonical net
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetAlias {
    pub scope: String,
    pub name: String,
    /// Created for a child port that had no same-named net.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub implicit: bool,
}

/// A pin belonging to a resolved net
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetMember {
    pub scope: String,
    pub reference: String,
    pub pin: String,
    pub pin_name: String,
    pub pin_type: PinType,
}

impl fmt::Display for NetMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.scope, self.reference, self.pin)
    }
}

/// A canonical net after hierarchical merging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedNet {
    pub name: String,
    pub class: NetClass,
    pub global: bool,
    /// Scope of the alias the canonical name was taken from.
    pub scope: String,
    /// Every merged local name, in `(scope, name)` order.
    pub aliases: Vec<NetAlias>,
    pub members: Vec<NetMember>,
    /// Scopes this net appears in.
    pub sheets: BTreeSet<String>,
}

impl ResolvedNet {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn alias_in(&self, scope: &str) -> Option<&NetAlias> {
        self.aliases.iter().find(|a| a.scope == scope)
    }

    pub fn members_in<'a>(&'a self, scope: &'a str) -> impl Iterator<Item = &'a NetMember> + 'a {
        self.members.iter().filter(move |m| m.scope == scope)
    }

    pub fn has_member(&self, scope: &str, reference: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.scope == scope && m.reference == reference)
    }
}

/// Result of net resolution
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    nets: Vec<ResolvedNet>,
    by_name: HashMap<String, usize>,
    pin_to_net: BTreeMap<(String, String, String), usize>,
    alias_to_net: BTreeMap<(String, String), usize>,
    graph: ConnectivityGraph,
    findings: Vec<Finding>,
}

impl Connectivity {
    /// Canonical nets sorted by name.
    pub fn nets(&self) -> &[ResolvedNet] {
        &self.nets
    }

    pub fn net(&self, name: &str) -> Option<&ResolvedNet> {
        self.by_name.get(name).map(|&i| &self.nets[i])
    }

    pub fn net_of_pin(&self, scope: &str, reference: &str, pin: &str) -> Option<&ResolvedNet> {
        self.pin_to_net
            .get(&(scope.to_string(), reference.to_string(), pin.to_string()))
            .map(|&i| &self.nets[i])
    }

    /// Canonical net for a local net name in a scope.
    pub fn net_for_alias(&self, scope: &str, local: &str) -> Option<&ResolvedNet> {
        self.alias_to_net
            .get(&(scope.to_string(), local.to_string()))
            .map(|&i| &self.nets[i])
    }

    pub fn graph(&self) -> &ConnectivityGraph {
        &self.graph
    }

    /// Non-fatal findings raised while resolving.
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Net name to member list (`scope:REF.PIN`), for reporting.
    pub fn membership(&self) -> BTreeMap<String, Vec<String>> {
        self.nets
            .iter()
            .map(|n| (n.name.clone(), n.members.iter().map(|m| m.to_string()).collect()))
            .collect()
    }
}

struct SeedNode<'a> {
    scope: &'a str,
    depth: usize,
    name: &'a str,
    class: NetClass,
    global: bool,
    members: Vec<&'a PinRef>,
    implicit: bool,
}

/// Resolve the design into canonical nets.
///
/// `overrides` maps exact net names or `PREFIX*` patterns to a net class and
/// is applied after alias classes.
pub fn resolve(
    design: &HierarchicalSchematic,
    overrides: &BTreeMap<String, NetClass>,
) -> Result<Connectivity, ModelIntegrityError> {
    let unresolved = hierarchy_findings(design);
    if !unresolved.is_empty() {
        return Err(ModelIntegrityError::UnresolvedHierarchy {
            findings: unresolved,
        });
    }

    let scopes = design.scopes();
    let schematics: HashMap<&str, &Schematic> = scopes
        .iter()
        .map(|s| (s.path.as_str(), s.schematic))
        .collect();

    // Step 1: one node per local net, plus one per port with no net behind it
    let mut nodes: Vec<SeedNode> = Vec::new();
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    for scope in &scopes {
        for net in &scope.schematic.nets {
            index.insert((scope.path.as_str(), net.name.as_str()), nodes.len());
            nodes.push(SeedNode {
                scope: &scope.path,
                depth: scope.depth,
                name: &net.name,
                class: net.class,
                global: net.global,
                members: net.members.iter().collect(),
                implicit: false,
            });
        }
        for port in &scope.schematic.ports {
            let key = (scope.path.as_str(), port.name.as_str());
            if !index.contains_key(&key) {
                index.insert(key, nodes.len());
                nodes.push(SeedNode {
                    scope: &scope.path,
                    depth: scope.depth,
                    name: &port.name,
                    class: NetClass::Default,
                    global: false,
                    members: Vec::new(),
                    implicit: true,
                });
            }
        }
    }

    let mut sets = DisjointSet::new(nodes.len());

    // Step 2: join parent nets to child ports through sheet pins
    for scope in &scopes {
        for sheet in &scope.schematic.sheets {
            let child_path = child_scope(&scope.path, &sheet.name);
            for pin in &sheet.pins {
                let Some(&child) = index.get(&(child_path.as_str(), pin.name.as_str())) else {
                    continue;
                };
                let attachment = SheetPinRef::new(&sheet.name, &pin.name);
                for net in &scope.schematic.nets {
                    if !net.sheet_pins.contains(&attachment) {
                        continue;
                    }
                    if let Some(&parent) = index.get(&(scope.path.as_str(), net.name.as_str())) {
                        sets.union(parent, child);
                    }
                }
            }
        }
    }

    // Step 3: same-named global labels are one net
    let mut globals: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if node.global {
            globals.entry(node.name).or_default().push(i);
        }
    }
    for group in globals.values() {
        for pair in group.windows(2) {
            sets.union(pair[0], pair[1]);
        }
    }

    // Step 4: canonical names
    let groups: Vec<Vec<usize>> = sets.groups().into_values().collect();
    let chosen: Vec<usize> = groups
        .iter()
        .map(|group| choose_canonical(&nodes, group))
        .collect();

    let mut by_bare: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (g, &c) in chosen.iter().enumerate() {
        by_bare.entry(nodes[c].name).or_default().push(g);
    }
    let mut names: Vec<String> = chosen.iter().map(|&c| nodes[c].name.to_string()).collect();
    for (bare, colliding) in &by_bare {
        if colliding.len() < 2 {
            continue;
        }
        let owner = colliding
            .iter()
            .copied()
            .find(|&g| nodes[chosen[g]].global)
            .or_else(|| {
                colliding
                    .iter()
                    .copied()
                    .find(|&g| nodes[chosen[g]].scope == ROOT_SCOPE)
            });
        for &g in colliding {
            if Some(g) != owner {
                names[g] = child_scope(nodes[chosen[g]].scope, bare);
            }
        }
    }

    // Step 5: assemble resolved nets
    let mut findings = Vec::new();
    let mut nets: Vec<ResolvedNet> = Vec::with_capacity(groups.len());
    for (g, group) in groups.iter().enumerate() {
        let canonical = &nodes[chosen[g]];
        let mut aliases: Vec<NetAlias> = group
            .iter()
            .map(|&i| NetAlias {
                scope: nodes[i].scope.to_string(),
                name: nodes[i].name.to_string(),
                implicit: nodes[i].implicit,
            })
            .collect();
        aliases.sort();

        let mut members = Vec::new();
        for &i in group {
            let node = &nodes[i];
            let Some(schematic) = schematics.get(node.scope) else {
                continue;
            };
            for pin_ref in &node.members {
                let Some(pin) = schematic
                    .symbol(&pin_ref.reference)
                    .and_then(|s| s.pin(&pin_ref.pin))
                else {
                    continue;
                };
                members.push(NetMember {
                    scope: node.scope.to_string(),
                    reference: pin_ref.reference.clone(),
                    pin: pin.number.clone(),
                    pin_name: pin.name.clone(),
                    pin_type: pin.pin_type,
                });
            }
        }
        members.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then_with(|| natural_cmp(&a.reference, &b.reference))
                .then_with(|| natural_cmp(&a.pin, &b.pin))
        });

        let name = names[g].clone();
        let class = resolve_class(&name, canonical.class, group, &nodes, overrides);

        let distinct: BTreeSet<NetClass> = group
            .iter()
            .map(|&i| nodes[i].class)
            .filter(|c| *c != NetClass::Default)
            .collect();
        if distinct.len() > 1 {
            let listed: Vec<&str> = distinct.iter().map(|c| c.keyword()).collect();
            findings.push(
                Finding::new(
                    "resolver",
                    FindingKind::NetClassConflict,
                    Severity::Warning,
                    format!(
                        "Net {} merges aliases with different classes ({}); using {}",
                        name,
                        listed.join(", "),
                        class
                    ),
                )
                .at(Location::in_sheet(canonical.scope).with_net(&name)),
            );
        }

        let drivers = members.iter().filter(|m| m.pin_type.is_driver()).count();
        let has_passive = members.iter().any(|m| m.pin_type == PinType::Passive);
        if drivers >= 2 && !has_passive {
            let driving: Vec<String> = members
                .iter()
                .filter(|m| m.pin_type.is_driver())
                .map(|m| m.to_string())
                .collect();
            findings.push(
                Finding::new(
                    "resolver",
                    FindingKind::ElectricalConflict,
                    Severity::Error,
                    format!("Net {} is driven by {} outputs: {}", name, drivers, driving.join(", ")),
                )
                .at(Location::in_sheet(canonical.scope).with_net(&name))
                .with_suggestion("Keep one driver per net or isolate the outputs"),
            );
        }

        let sheets = group.iter().map(|&i| nodes[i].scope.to_string()).collect();
        nets.push(ResolvedNet {
            name,
            class,
            global: group.iter().any(|&i| nodes[i].global),
            scope: canonical.scope.to_string(),
            aliases,
            members,
            sheets,
        });
    }
    nets.sort_by(|a, b| a.name.cmp(&b.name));

    // Step 6: lookup tables and the component/net graph
    let mut connectivity = Connectivity {
        findings,
        ..Default::default()
    };
    for (i, net) in nets.iter().enumerate() {
        connectivity.by_name.insert(net.name.clone(), i);
        for alias in &net.aliases {
            connectivity
                .alias_to_net
                .insert((alias.scope.clone(), alias.name.clone()), i);
        }
        for member in &net.members {
            connectivity.pin_to_net.insert(
                (member.scope.clone(), member.reference.clone(), member.pin.clone()),
                i,
            );
        }
    }

    let mut graph = ConnectivityGraph::new();
    for scope in &scopes {
        for symbol in &scope.schematic.symbols {
            graph.add_component(&scope.path, symbol);
        }
    }
    for net in &nets {
        let net_idx = graph.add_net(&net.name, net.class);
        for member in &net.members {
            let Some(schematic) = schematics.get(member.scope.as_str()) else {
                continue;
            };
            if let Some(symbol) = schematic.symbol(&member.reference) {
                let comp_idx = graph.add_component(&member.scope, symbol);
                graph.connect(
                    comp_idx,
                    net_idx,
                    PinEdge {
                        pin_number: member.pin.clone(),
                        pin_name: member.pin_name.clone(),
                        pin_type: member.pin_type,
                    },
                );
            }
        }
    }
    connectivity.graph = graph;
    connectivity.nets = nets;

    debug!(
        nets = connectivity.nets.len(),
        seeds = sets.len(),
        components = connectivity.graph.component_count(),
        "resolved connectivity"
    );

    Ok(connectivity)
}

/// Smallest global name, else smallest local name (ties: shallower scope, then path).
fn choose_canonical(nodes: &[SeedNode], group: &[usize]) -> usize {
    let rank = |&a: &usize, &b: &usize| {
        nodes[a]
            .name
            .cmp(nodes[b].name)
            .then_with(|| nodes[a].depth.cmp(&nodes[b].depth))
            .then_with(|| nodes[a].scope.cmp(nodes[b].scope))
    };
    group
        .iter()
        .copied()
        .filter(|&i| nodes[i].global)
        .min_by(rank)
        .or_else(|| group.iter().copied().min_by(rank))
        .unwrap_or(group[0])
}

fn resolve_class(
    name: &str,
    canonical_class: NetClass,
    group: &[usize],
    nodes: &[SeedNode],
    overrides: &BTreeMap<String, NetClass>,
) -> NetClass {
    let mut class = canonical_class;
    if class == NetClass::Default {
        let mut ordered: Vec<usize> = group.to_vec();
        ordered.sort_by(|&a, &b| (nodes[a].scope, nodes[a].name).cmp(&(nodes[b].scope, nodes[b].name)));
        if let Some(first) = ordered
            .iter()
            .map(|&i| nodes[i].class)
            .find(|c| *c != NetClass::Default)
        {
            class = first;
        }
    }
    override_class(name, overrides).unwrap_or(class)
}

/// Look up a net-class override by exact name, then by the longest matching `PREFIX*` pattern.
pub fn override_class(name: &str, overrides: &BTreeMap<String, NetClass>) -> Option<NetClass> {
    let bare = name.rsplit('/').next().unwrap_or(name);
    if let Some(class) = overrides.get(name).or_else(|| overrides.get(bare)) {
        return Some(*class);
    }
    overrides
        .iter()
        .filter_map(|(pattern, class)| {
            let prefix = pattern.strip_suffix('*')?;
            (name.starts_with(prefix) || bare.starts_with(prefix)).then_some((prefix.len(), *class))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, class)| class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Net, Pin, PinDirection, Sheet, Symbol};

    fn two_pin(reference: &str, lib_id: &str, a: PinType, b: PinType) -> Symbol {
        Symbol::new(reference, lib_id, "x")
            .with_pin(Pin::new("1", "A", a))
            .with_pin(Pin::new("2", "B", b))
    }

    /// Root net VCC_5V drives sheet pin 5V_IN; the child has a net 5V_IN.
    fn power_design(child_net: &str) -> HierarchicalSchematic {
        let mut child = Schematic::new("power");
        child.add_port("5V_IN", PinDirection::Input);
        child.add_symbol(two_pin("U1", "Regulator:LDO", PinType::PowerIn, PinType::PowerOut));
        child.add_net(Net::new(child_net).connect("U1", "1"));

        let mut design = HierarchicalSchematic::new("board");
        design.root.add_symbol(two_pin("J1", "Connector:USB", PinType::PowerOut, PinType::Passive));
        design.root.add_sheet(
            Sheet::new("power", "power.kicad_sch", child).with_pin("5V_IN", PinDirection::Input),
        );
        design.root.add_net(
            Net::new("VCC_5V")
                .with_class(NetClass::Power)
                .connect("J1", "1")
                .attach_sheet_pin("power", "5V_IN"),
        );
        design
    }

    #[test]
    fn test_sheet_pin_merges_parent_and_child() {
        let design = power_design("5V_IN");
        let conn = resolve(&design, &BTreeMap::new()).unwrap();

        let net = conn.net_for_alias("/power", "5V_IN").unwrap();
        assert_eq!(net.name, "5V_IN");
        assert_eq!(net.class, NetClass::Power);
        assert_eq!(net.member_count(), 2);
        assert!(net.has_member("/", "J1"));
        assert!(net.has_member("/power", "U1"));
        assert_eq!(
            conn.net_for_alias("/", "VCC_5V").map(|n| n.name.as_str()),
            Some("5V_IN")
        );
    }

    #[test]
    fn test_port_without_net_is_implicit() {
        let design = power_design("VIN_LOCAL");
        let conn = resolve(&design, &BTreeMap::new()).unwrap();
        let net = conn.net_for_alias("/", "VCC_5V").unwrap();
        assert_eq!(net.member_count(), 1);
        assert!(net.aliases.iter().any(|a| a.implicit && a.name == "5V_IN"));
    }

    #[test]
    fn test_renamed_port_is_unresolved() {
        let mut design = power_design("5V_IN");
        design.root.sheets[0].schematic.ports[0].name = "5V".into();
        match resolve(&design, &BTreeMap::new()) {
            Err(ModelIntegrityError::UnresolvedHierarchy { findings }) => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].kind, FindingKind::MissingHierarchicalPin);
            }
            other => panic!("unexpected: {:?}", other.map(|c| c.nets().len())),
        }
    }

    #[test]
    fn test_globals_merge_across_sheets() {
        let mut a = Schematic::new("a");
        a.add_symbol(two_pin("C1", "Device:C", PinType::Passive, PinType::Passive));
        a.add_net(Net::new("GND").global().connect("C1", "2"));
        let mut b = Schematic::new("b");
        b.add_symbol(two_pin("C1", "Device:C", PinType::Passive, PinType::Passive));
        b.add_net(Net::new("GND").global().connect("C1", "2"));

        let mut design = HierarchicalSchematic::new("board");
        design.root.add_sheet(Sheet::new("a", "a.kicad_sch", a));
        design.root.add_sheet(Sheet::new("b", "b.kicad_sch", b));

        let conn = resolve(&design, &BTreeMap::new()).unwrap();
        assert_eq!(conn.nets().len(), 1);
        assert_eq!(conn.nets()[0].name, "GND");
        assert!(conn.nets()[0].global);
        assert_eq!(conn.nets()[0].member_count(), 2);
    }

    #[test]
    fn test_colliding_local_names_are_qualified() {
        let mut a = Schematic::new("a");
        a.add_symbol(two_pin("R1", "Device:R", PinType::Passive, PinType::Passive));
        a.add_net(Net::new("SIG").connect("R1", "1"));
        let mut b = Schematic::new("b");
        b.add_symbol(two_pin("R1", "Device:R", PinType::Passive, PinType::Passive));
        b.add_net(Net::new("SIG").connect("R1", "1"));

        let mut design = HierarchicalSchematic::new("board");
        design.root.add_symbol(two_pin("R9", "Device:R", PinType::Passive, PinType::Passive));
        design.root.add_net(Net::new("SIG").connect("R9", "1"));
        design.root.add_sheet(Sheet::new("a", "a.kicad_sch", a));
        design.root.add_sheet(Sheet::new("b", "b.kicad_sch", b));

        let conn = resolve(&design, &BTreeMap::new()).unwrap();
        let names: Vec<&str> = conn.nets().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["/a/SIG", "/b/SIG", "SIG"]);
        assert!(conn.net_of_pin("/", "R9", "1").map(|n| n.name == "SIG").unwrap_or(false));
    }

    #[test]
    fn test_canonical_name_independent_of_declaration_order() {
        let build = |reverse: bool| {
            let mut child = Schematic::new("c");
            child.add_port("ALPHA", PinDirection::Bidirectional);
            let mut design = HierarchicalSchematic::new("board");
            design.root.add_sheet(
                Sheet::new("c", "c.kicad_sch", child).with_pin("ALPHA", PinDirection::Bidirectional),
            );
            let mut nets = vec![
                Net::new("ZETA").attach_sheet_pin("c", "ALPHA"),
                Net::new("MID").attach_sheet_pin("c", "ALPHA"),
            ];
            if reverse {
                nets.reverse();
            }
            for n in nets {
                design.root.add_net(n);
            }
            design
        };
        let a = resolve(&build(false), &BTreeMap::new()).unwrap();
        let b = resolve(&build(true), &BTreeMap::new()).unwrap();
        assert_eq!(a.nets().len(), 1);
        assert_eq!(a.nets()[0].name, "ALPHA");
        assert_eq!(a.nets()[0].name, b.nets()[0].name);
        assert_eq!(a.nets()[0].aliases, b.nets()[0].aliases);
    }

    #[test]
    fn test_electrical_conflict() {
        let mut design = HierarchicalSchematic::new("board");
        design.root.add_symbol(two_pin("U1", "Logic:Buf", PinType::Output, PinType::Input));
        design.root.add_symbol(two_pin("U2", "Logic:Buf", PinType::Output, PinType::Input));
        design.root.add_net(Net::new("CLK").connect("U1", "1").connect("U2", "1"));
        let conn = resolve(&design, &BTreeMap::new()).unwrap();
        assert_eq!(conn.findings().len(), 1);
        assert_eq!(conn.findings()[0].kind, FindingKind::ElectricalConflict);
        assert_eq!(conn.findings()[0].severity, Severity::Error);
    }

    #[test]
    fn test_class_conflict_and_override() {
        let mut child = Schematic::new("c");
        child.add_port("BUS", PinDirection::Bidirectional);
        child.add_net(Net::new("BUS").with_class(NetClass::Logic));
        let mut design = HierarchicalSchematic::new("board");
        design.root.add_sheet(Sheet::new("c", "c.kicad_sch", child).with_pin("BUS", PinDirection::Bidirectional));
        design.root.add_net(
            Net::new("I2C_SDA")
                .with_class(NetClass::OpenDrain)
                .attach_sheet_pin("c", "BUS"),
        );

        let conn = resolve(&design, &BTreeMap::new()).unwrap();
        let net = conn.net_for_alias("/", "I2C_SDA").unwrap();
        assert_eq!(net.name, "BUS");
        // canonical alias (child "BUS") carries logic
        assert_eq!(net.class, NetClass::Logic);
        assert_eq!(conn.findings()[0].kind, FindingKind::NetClassConflict);

        let mut overrides = BTreeMap::new();
        overrides.insert("BU*".to_string(), NetClass::Drive);
        let conn = resolve(&design, &overrides).unwrap();
        assert_eq!(conn.net("BUS").map(|n| n.class), Some(NetClass::Drive));
    }

    #[test]
    fn test_override_lookup() {
        let mut overrides = BTreeMap::new();
        overrides.insert("LED*".to_string(), NetClass::Drive);
        overrides.insert("LED_DATA*".to_string(), NetClass::Logic);
        overrides.insert("+5V".to_string(), NetClass::Power);
        assert_eq!(override_class("LED_DATA_IN", &overrides), Some(NetClass::Logic));
        assert_eq!(override_class("LED_CLK", &overrides), Some(NetClass::Drive));
        assert_eq!(override_class("/power/+5V", &overrides), Some(NetClass::Power));
        assert_eq!(override_class("SDA", &overrides), None);
    }
}
