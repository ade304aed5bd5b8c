//! Connectivity graph
//!
//! Component and net nodes joined by pin edges, built from the resolved
//! nets. Components are keyed by `(scope, reference)` since references are
//! only unique within one scope.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{ComponentKind, NetClass, PinType, Symbol};

/// A placed symbol seen through its scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentNode {
    pub scope: String,
    pub reference: String,
    pub lib_id: String,
    pub value: String,
    pub kind: ComponentKind,
}

/// A canonical net
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetNode {
    pub name: String,
    pub class: NetClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphNode {
    Component(ComponentNode),
    Net(NetNode),
}

impl GraphNode {
    pub fn as_component(&self) -> Option<&ComponentNode> {
        match self {
            GraphNode::Component(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_net(&self) -> Option<&NetNode> {
        match self {
            GraphNode::Net(n) => Some(n),
            _ => None,
        }
    }
}

/// Pin connection from a component to a net
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinEdge {
    pub pin_number: String,
    pub pin_name: String,
    pub pin_type: PinType,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    graph: DiGraph<GraphNode, PinEdge>,
    component_indices: HashMap<(String, String), NodeIndex>,
    net_indices: HashMap<String, NodeIndex>,
}

impl ConnectivityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, scope: &str, symbol: &Symbol) -> NodeIndex {
        let key = (scope.to_string(), symbol.reference.clone());
        if let Some(&idx) = self.component_indices.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode::Component(ComponentNode {
            scope: scope.to_string(),
            reference: symbol.reference.clone(),
            lib_id: symbol.lib_id.clone(),
            value: symbol.value.clone(),
            kind: symbol.kind(),
        }));
        self.component_indices.insert(key, idx);
        idx
    }

    pub fn add_net(&mut self, name: &str, class: NetClass) -> NodeIndex {
        if let Some(&idx) = self.net_indices.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode::Net(NetNode {
            name: name.to_string(),
            class,
        }));
        self.net_indices.insert(name.to_string(), idx);
        idx
    }

    pub fn connect(&mut self, component: NodeIndex, net: NodeIndex, edge: PinEdge) {
        self.graph.add_edge(component, net, edge);
    }

    pub fn component(&self, scope: &str, reference: &str) -> Option<&ComponentNode> {
        self.component_indices
            .get(&(scope.to_string(), reference.to_string()))
            .and_then(|&idx| self.graph.node_weight(idx))
            .and_then(|n| n.as_component())
    }

    pub fn net(&self, name: &str) -> Option<&NetNode> {
        self.net_indices
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
            .and_then(|n| n.as_net())
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentNode> {
        self.graph.node_weights().filter_map(|n| n.as_component())
    }

    pub fn nets(&self) -> impl Iterator<Item = &NetNode> {
        self.graph.node_weights().filter_map(|n| n.as_net())
    }

    pub fn component_count(&self) -> usize {
        self.component_indices.len()
    }

    pub fn net_count(&self) -> usize {
        self.net_indices.len()
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nets a component touches, with the pin making each connection.
    pub fn nets_for_component(&self, scope: &str, reference: &str) -> Vec<(&NetNode, &PinEdge)> {
        let Some(&idx) = self
            .component_indices
            .get(&(scope.to_string(), reference.to_string()))
        else {
            return Vec::new();
        };

        let mut out: Vec<(&NetNode, &PinEdge)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|edge| {
                self.graph
                    .node_weight(edge.target())
                    .and_then(|n| n.as_net())
                    .map(|n| (n, edge.weight()))
            })
            .collect();
        out.sort_by(|a, b| a.1.pin_number.cmp(&b.1.pin_number));
        out
    }

    /// Components connected to a net, with the connecting pin.
    pub fn components_on_net(&self, net_name: &str) -> Vec<(&ComponentNode, &PinEdge)> {
        let Some(&idx) = self.net_indices.get(net_name) else {
            return Vec::new();
        };

        let mut out: Vec<(&ComponentNode, &PinEdge)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|edge| {
                self.graph
                    .node_weight(edge.source())
                    .and_then(|n| n.as_component())
                    .map(|c| (c, edge.weight()))
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.0.scope, &a.0.reference, &a.1.pin_number).cmp(&(&b.0.scope, &b.0.reference, &b.1.pin_number))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pin;

    #[test]
    fn test_graph_queries() {
        let mut graph = ConnectivityGraph::new();
        let r1 = Symbol::new("R1", "Device:R", "4.7k")
            .with_pin(Pin::new("1", "~", PinType::Passive))
            .with_pin(Pin::new("2", "~", PinType::Passive));
        let c = graph.add_component("/mcu", &r1);
        let sda = graph.add_net("I2C_SDA", NetClass::OpenDrain);
        let vcc = graph.add_net("+3V3", NetClass::Power);
        graph.connect(c, vcc, PinEdge { pin_number: "2".into(), pin_name: "~".into(), pin_type: PinType::Passive });
        graph.connect(c, sda, PinEdge { pin_number: "1".into(), pin_name: "~".into(), pin_type: PinType::Passive });

        assert_eq!(graph.component_count(), 1);
        assert_eq!(graph.net_count(), 2);
        assert_eq!(graph.connection_count(), 2);
        assert_eq!(graph.component("/mcu", "R1").map(|c| c.kind), Some(ComponentKind::Resistor));
        assert!(graph.component("/", "R1").is_none());

        let nets = graph.nets_for_component("/mcu", "R1");
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].0.name, "I2C_SDA");

        let on_sda = graph.components_on_net("I2C_SDA");
        assert_eq!(on_sda.len(), 1);
        assert_eq!(on_sda[0].0.reference, "R1");
        assert_eq!(graph.components_on_net("+3V3")[0].1.pin_type, PinType::Passive);
    }
}
