//! Round-robin co-scheduling of graph nodes into partitions.

use std::collections::{BTreeMap, HashMap};

use crate::device::DeviceTable;
use crate::spec::Graph;
use crate::view::{GraphView, GraphViewError, NodeId};

/// Partition id to the insertion-ordered nodes assigned to it.
pub type PartitionMap = BTreeMap<i32, Vec<NodeId>>;

fn is_merge(op: &str) -> bool {
    matches!(op, "Merge" | "RefMerge")
}

fn is_next_iteration(op: &str) -> bool {
    matches!(op, "NextIteration" | "RefNextIteration")
}

/// Assigns every reachable node a partition id by walking per-device ready
/// stacks round-robin, opening a fresh partition whenever any device has
/// taken `quantum` nodes in the current one.
///
/// Devices are enumerated in sorted table order; device strings that appear
/// on nodes but not in the table are appended behind the table's devices, in
/// sorted order, so every node has a queue and the walk stays deterministic.
/// The LIFO stacks extend schedules depth-first, which keeps most
/// producer/consumer pairs in nearby partitions.
///
/// Nodes never reached (isolated cycles without a `Merge` entry point) keep
/// partition 0 and are absent from the returned map.
pub fn partition_graph(
    graph: &mut Graph,
    devices: &DeviceTable,
    quantum: usize,
) -> Result<PartitionMap, GraphViewError> {
    let (partition_of, partitions) = {
        let view = GraphView::new(graph)?;
        co_schedule(&view, devices, quantum)
    };

    for (index, partition) in partition_of.iter().enumerate() {
        graph.nodes[index].partition = *partition;
    }
    Ok(partitions)
}

fn co_schedule(
    view: &GraphView<'_>,
    devices: &DeviceTable,
    quantum: usize,
) -> (Vec<i32>, PartitionMap) {
    let num_nodes = view.num_nodes();

    let mut device_index: HashMap<&str, usize> = HashMap::with_capacity(devices.len());
    for name in devices.keys() {
        let next = device_index.len();
        device_index.insert(name.as_str(), next);
    }
    let mut extra: Vec<&str> = (0..num_nodes)
        .map(|i| view.node(NodeId(i as u32)).device.as_str())
        .filter(|device| !device_index.contains_key(device))
        .collect();
    extra.sort_unstable();
    extra.dedup();
    for name in extra {
        let next = device_index.len();
        device_index.insert(name, next);
    }

    let num_queues = device_index.len();
    let mut ready: Vec<Vec<NodeId>> = vec![Vec::new(); num_queues];
    let mut num_ready_inputs = vec![0usize; num_nodes];
    let queue_of = |id: NodeId| device_index[view.node(id).device.as_str()];

    for i in 0..num_nodes {
        let id = NodeId(i as u32);
        if view.inputs(id).is_empty() {
            ready[queue_of(id)].push(id);
        }

        // Loop back-edges count as satisfied at start, otherwise the
        // Merge/NextIteration handshake would deadlock the walk.
        if is_merge(&view.node(id).op) {
            for &input in view.inputs(id) {
                if is_next_iteration(&view.node(input).op) {
                    num_ready_inputs[i] += 1;
                }
            }
        }
    }

    let mut partition_of = vec![0i32; num_nodes];
    let mut partitions = PartitionMap::new();
    let mut partition_id = 1i32;
    let mut per_device_count = vec![0usize; num_queues];

    loop {
        let mut executed_any = false;
        for queue in 0..num_queues {
            if per_device_count[queue] == quantum {
                partition_id += 1;
                per_device_count.fill(0);
            }
            let Some(node) = ready[queue].pop() else {
                continue;
            };
            executed_any = true;
            partition_of[node.index()] = partition_id;
            partitions.entry(partition_id).or_default().push(node);
            per_device_count[queue] += 1;

            for &fanout in view.outputs(node) {
                num_ready_inputs[fanout.index()] += 1;
                if num_ready_inputs[fanout.index()] == view.inputs(fanout).len() {
                    ready[queue_of(fanout)].push(fanout);
                }
            }
        }
        if !executed_any {
            break;
        }
    }

    (partition_of, partitions)
}
