use std::collections::HashMap;

use smallvec::SmallVec;
use thiserror::Error;

use crate::registry::{num_outputs_for_node, OpRegistry};
use crate::spec::{parse_input, Graph, Node, CONTROL_PORT};

/// Stable identifier of a node, equal to its position in the graph's node
/// list. Appending nodes never invalidates existing ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Producer-side endpoint of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputPort {
    pub node: NodeId,
    pub port: i32,
}

/// Consumer-side endpoint of an edge; `port` is the position in the
/// consumer's input list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputPort {
    pub node: NodeId,
    pub port: i32,
}

/// Directed edge between two ports. Control edges carry
/// [`CONTROL_PORT`] on both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub src: OutputPort,
    pub tgt: InputPort,
}

impl Edge {
    pub fn is_control(&self) -> bool {
        self.tgt.port == CONTROL_PORT
    }
}

/// Errors surfaced while indexing a graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphViewError {
    #[error("duplicate node name '{name}'")]
    DuplicateNodeName { name: String },
    #[error("node '{node}' references unknown node in input '{input}'")]
    UnknownInputNode { node: String, input: String },
    #[error("node '{node}' input '{input}' addresses port {port} but the producer has {num_outputs} outputs")]
    PortOutOfRange {
        node: String,
        input: String,
        port: i32,
        num_outputs: i32,
    },
    #[error("node '{node}' has data input '{input}' after a control input")]
    DataInputAfterControl { node: String, input: String },
}

/// Immutable structural index over a graph.
///
/// Node-level fanin/fanout sets cover regular edges only and are
/// deduplicated, so a consumer taking two ports of one producer still counts
/// that producer once; port-level queries retain every edge. Control edges
/// are excluded everywhere except [`GraphView::fanout_edges`] with
/// `include_controlled = true`.
#[derive(Debug)]
pub struct GraphView<'a> {
    graph: &'a Graph,
    name_index: HashMap<&'a str, NodeId>,
    fanins: Vec<SmallVec<[NodeId; 4]>>,
    fanouts: Vec<SmallVec<[NodeId; 4]>>,
    regular_fanins: Vec<SmallVec<[OutputPort; 2]>>,
    fanout_edges: Vec<Vec<Edge>>,
}

impl<'a> GraphView<'a> {
    pub fn new(graph: &'a Graph) -> Result<GraphView<'a>, GraphViewError> {
        let num_nodes = graph.nodes.len();
        let mut name_index: HashMap<&str, NodeId> = HashMap::with_capacity(num_nodes);
        for (index, node) in graph.nodes.iter().enumerate() {
            if name_index
                .insert(node.name.as_str(), NodeId(index as u32))
                .is_some()
            {
                return Err(GraphViewError::DuplicateNodeName {
                    name: node.name.clone(),
                });
            }
        }

        let mut view = GraphView {
            graph,
            name_index,
            fanins: vec![SmallVec::new(); num_nodes],
            fanouts: vec![SmallVec::new(); num_nodes],
            regular_fanins: vec![SmallVec::new(); num_nodes],
            fanout_edges: vec![Vec::new(); num_nodes],
        };

        let registry = OpRegistry::global();
        for (index, node) in graph.nodes.iter().enumerate() {
            let consumer = NodeId(index as u32);
            let mut seen_control = false;
            for input in &node.input {
                let input_ref = parse_input(input);
                let Some(&producer) = view.name_index.get(input_ref.node) else {
                    return Err(GraphViewError::UnknownInputNode {
                        node: node.name.clone(),
                        input: input.clone(),
                    });
                };

                if input_ref.is_control() {
                    seen_control = true;
                    view.fanout_edges[producer.index()].push(Edge {
                        src: OutputPort {
                            node: producer,
                            port: CONTROL_PORT,
                        },
                        tgt: InputPort {
                            node: consumer,
                            port: CONTROL_PORT,
                        },
                    });
                    continue;
                }
                if seen_control {
                    return Err(GraphViewError::DataInputAfterControl {
                        node: node.name.clone(),
                        input: input.clone(),
                    });
                }

                let producer_node = &graph.nodes[producer.index()];
                if let Some(op_def) = registry.lookup(&producer_node.op) {
                    // Arity of unregistered or unresolvable producers cannot
                    // be validated; those ports are left unchecked.
                    if let Ok(num_outputs) = num_outputs_for_node(producer_node, &op_def) {
                        if input_ref.port >= num_outputs {
                            return Err(GraphViewError::PortOutOfRange {
                                node: node.name.clone(),
                                input: input.clone(),
                                port: input_ref.port,
                                num_outputs,
                            });
                        }
                    }
                }

                let slot = view.regular_fanins[consumer.index()].len() as i32;
                view.regular_fanins[consumer.index()].push(OutputPort {
                    node: producer,
                    port: input_ref.port,
                });
                push_unique(&mut view.fanins[consumer.index()], producer);
                push_unique(&mut view.fanouts[producer.index()], consumer);
                view.fanout_edges[producer.index()].push(Edge {
                    src: OutputPort {
                        node: producer,
                        port: input_ref.port,
                    },
                    tgt: InputPort {
                        node: consumer,
                        port: slot,
                    },
                });
            }
        }

        Ok(view)
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &'a Node {
        &self.graph.nodes[id.index()]
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.name_index.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&'a Node> {
        self.node_id(name).map(|id| self.node(id))
    }

    /// Ordered, deduplicated regular producers of `id`.
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.fanins[id.index()]
    }

    /// Deduplicated regular consumers of `id`.
    pub fn outputs(&self, id: NodeId) -> &[NodeId] {
        &self.fanouts[id.index()]
    }

    /// Resolves the producer port feeding a data input slot.
    pub fn regular_fanin(&self, input: InputPort) -> Option<OutputPort> {
        if input.port < 0 {
            return None;
        }
        self.regular_fanins[input.node.index()]
            .get(input.port as usize)
            .copied()
    }

    /// Edges leaving `id`, ordered by consumer position in the graph and
    /// input slot within each consumer.
    pub fn fanout_edges(&self, id: NodeId, include_controlled: bool) -> Vec<Edge> {
        self.fanout_edges[id.index()]
            .iter()
            .filter(|edge| include_controlled || !edge.is_control())
            .copied()
            .collect()
    }
}

fn push_unique<A: smallvec::Array<Item = NodeId>>(list: &mut SmallVec<A>, id: NodeId) {
    if !list.contains(&id) {
        list.push(id);
    }
}
