#![allow(dead_code)]

use std::collections::BTreeMap;

use ebb::device::{Cluster, DeviceProperties, DeviceTable};
use ebb::partition::PartitionMap;
use ebb::spec::{AttrValue, DataType, Graph, Node};
use ebb::view::NodeId;

pub const GPU0: &str = "/job:localhost/replica:0/task:0/device:GPU:0";
pub const GPU1: &str = "/job:localhost/replica:0/task:0/device:GPU:1";
pub const CPU0: &str = "/job:localhost/replica:0/task:0/device:CPU:0";

/// Node of an op whose ports are typed through the `T` attribute.
pub fn op_node(name: &str, op: &str, device: &str, inputs: &[&str]) -> Node {
    let mut node = Node::new(name, op, device).with_attr("T", AttrValue::Type(DataType::F32));
    for input in inputs {
        node = node.with_input(*input);
    }
    node
}

pub fn source(name: &str, device: &str) -> Node {
    Node::new(name, "Placeholder", device).with_attr("dtype", AttrValue::Type(DataType::F32))
}

pub fn bool_source(name: &str, device: &str) -> Node {
    Node::new(name, "Placeholder", device).with_attr("dtype", AttrValue::Type(DataType::Bool))
}

pub fn variable(name: &str, device: &str) -> Node {
    Node::new(name, "Variable", device).with_attr("dtype", AttrValue::Type(DataType::F32))
}

pub fn constant(name: &str, device: &str, dtype: DataType) -> Node {
    Node::new(name, "Const", device).with_attr("dtype", AttrValue::Type(dtype))
}

pub fn merge(name: &str, device: &str, inputs: &[&str]) -> Node {
    let mut node = Node::new(name, "Merge", device)
        .with_attr("T", AttrValue::Type(DataType::F32))
        .with_attr("N", AttrValue::I64(inputs.len() as i64));
    for input in inputs {
        node = node.with_input(*input);
    }
    node
}

pub fn graph(nodes: Vec<Node>) -> Graph {
    Graph::new(nodes)
}

pub fn single_gpu() -> DeviceTable {
    BTreeMap::from([(GPU0.to_string(), DeviceProperties::gpu(1 << 30))])
}

pub fn two_gpus() -> DeviceTable {
    BTreeMap::from([
        (GPU0.to_string(), DeviceProperties::gpu(1 << 30)),
        (GPU1.to_string(), DeviceProperties::gpu(1 << 30)),
    ])
}

pub fn gpu_cluster() -> Cluster {
    Cluster::new(single_gpu())
}

pub fn find_node<'a>(graph: &'a Graph, name: &str) -> &'a Node {
    graph
        .nodes
        .iter()
        .find(|node| node.name == name)
        .unwrap_or_else(|| panic!("node '{name}' not found"))
}

pub fn partition_of(graph: &Graph, name: &str) -> i32 {
    find_node(graph, name).partition
}

/// Rebuilds a partition map from the `partition` fields already present on
/// the graph's nodes, in node order.
pub fn partitions_from_fields(graph: &Graph) -> PartitionMap {
    let mut partitions = PartitionMap::new();
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.partition > 0 {
            partitions
                .entry(node.partition)
                .or_default()
                .push(NodeId(index as u32));
        }
    }
    partitions
}
