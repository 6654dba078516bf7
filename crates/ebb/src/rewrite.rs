//! Insertion of swap-out/swap-in copy pairs for long-lived tensors.
//!
//! The rewrite runs in two phases so the structural view is never invalidated
//! mid-iteration: descriptors for every tensor to swap are collected from an
//! immutable [`GraphView`], then the graph is mutated in a second pass that
//! only appends nodes and rewrites the recorded input slots.

use std::collections::BTreeMap;

use crate::device::DeviceName;
use crate::partition::PartitionMap;
use crate::registry::{output_type_for_node, OpRegistry};
use crate::spec::{
    AttrValue, DataType, Graph, Node, COPY_TO_DEVICE_OP, COPY_TO_HOST_OP, TYPE_ATTR,
};
use crate::swappable::is_swappable_output;
use crate::view::{GraphView, GraphViewError, NodeId, OutputPort};

/// Default threshold on `consumer_partition - generator_partition` beyond
/// which a tensor is considered long-lived enough to offload.
pub const DEFAULT_PARTITION_DISTANCE: i32 = 2;

/// Accounting for one rewriter run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapStats {
    /// Distinct `(generator, port)` tensors offloaded.
    pub tensors_swapped: usize,
    pub swap_outs: usize,
    pub swap_ins: usize,
    pub rewired_inputs: usize,
}

#[derive(Debug, Clone, Copy)]
struct SwapTarget {
    node: NodeId,
    input_index: usize,
    partition: i32,
}

struct TensorSwap {
    generator: NodeId,
    port: i32,
    dtype: DataType,
    targets: Vec<SwapTarget>,
}

/// Offloads tensors whose consumers run more than `partition_distance`
/// partitions after their generator, rewiring those consumers to the
/// swapped-in copy.
pub fn swap_tensors(
    graph: &mut Graph,
    partitions: &PartitionMap,
    partition_distance: i32,
) -> Result<SwapStats, GraphViewError> {
    let plans = {
        let view = GraphView::new(graph)?;
        collect_tensor_swaps(&view, partitions, partition_distance)
    };

    let mut stats = SwapStats::default();
    for plan in &plans {
        apply_tensor_swap(graph, plan, &mut stats);
    }
    Ok(stats)
}

fn collect_tensor_swaps(
    view: &GraphView<'_>,
    partitions: &PartitionMap,
    partition_distance: i32,
) -> Vec<TensorSwap> {
    let mut plans = Vec::new();

    for (&partition_id, members) in partitions {
        for &generator in members {
            let node = view.node(generator);
            if node.op == COPY_TO_HOST_OP || node.op == COPY_TO_DEVICE_OP {
                continue;
            }
            let Ok(device) = DeviceName::parse(&node.device) else {
                continue;
            };
            if !device.is_gpu() {
                continue;
            }

            let mut uses_after_swap: BTreeMap<i32, Vec<SwapTarget>> = BTreeMap::new();
            for edge in view.fanout_edges(generator, false) {
                let consumer = view.node(edge.tgt.node);
                if consumer.device != node.device {
                    continue;
                }
                if consumer.partition - partition_id > partition_distance {
                    uses_after_swap
                        .entry(edge.src.port)
                        .or_default()
                        .push(SwapTarget {
                            node: edge.tgt.node,
                            input_index: edge.tgt.port as usize,
                            partition: consumer.partition,
                        });
                }
            }

            uses_after_swap.retain(|&port, _| {
                is_swappable_output(view, OutputPort {
                    node: generator,
                    port,
                })
            });

            for (port, targets) in uses_after_swap {
                let op_def = OpRegistry::global()
                    .lookup(&node.op)
                    .expect("swappable generator must be registered");
                let port_type = output_type_for_node(node, &op_def, port)
                    .expect("swappable output must resolve to a dtype");
                assert!(
                    !port_type.is_ref,
                    "reference tensor selected for swapping: node = {}",
                    node.name
                );
                plans.push(TensorSwap {
                    generator,
                    port,
                    dtype: port_type.dtype,
                    targets,
                });
            }
        }
    }

    plans
}

fn apply_tensor_swap(graph: &mut Graph, swap: &TensorSwap, stats: &mut SwapStats) {
    let generator = &graph.nodes[swap.generator.index()];
    let generator_name = generator.name.clone();
    let generator_device = generator.device.clone();
    let generator_partition = generator.partition;

    let tensor_to_swap = format!("{}_{}", generator_name, swap.port);
    let coloc_group = format!("loc@{tensor_to_swap}");
    let swap_out_name = format!("swap_out_{tensor_to_swap}");
    let swap_in_name_base = format!("swap_in_{tensor_to_swap}");

    // The generator and its swap-out stay co-resident for local DMA.
    graph.nodes[swap.generator.index()].add_colocation_group(coloc_group.clone());

    let mut swap_out = Node::new(swap_out_name.clone(), COPY_TO_HOST_OP, generator_device.clone())
        .with_input(format!("{}:{}", generator_name, swap.port))
        .with_attr(TYPE_ATTR, AttrValue::Type(swap.dtype));
    swap_out.partition = generator_partition;
    swap_out.add_colocation_group(coloc_group.clone());
    graph.add_node(swap_out);
    stats.tensors_swapped += 1;
    stats.swap_outs += 1;

    let mut targets = swap.targets.clone();
    targets.sort_by_key(|target| target.partition);

    let mut prev_consumer: Option<(String, i32)> = None;
    let mut prev_swap_in_name: Option<String> = None;
    for target in &targets {
        let consumer_name = graph.nodes[target.node.index()].name.clone();

        let start_new_swap_in = match &prev_consumer {
            None => true,
            Some((_, prev_partition)) => prev_partition + 1 < target.partition,
        };
        if start_new_swap_in {
            let swap_in_name = format!(
                "{}_{}_{}",
                swap_in_name_base, consumer_name, target.input_index
            );
            let mut swap_in =
                Node::new(swap_in_name.clone(), COPY_TO_DEVICE_OP, generator_device.clone())
                    .with_input(swap_out_name.clone())
                    .with_attr(TYPE_ATTR, AttrValue::Type(swap.dtype));
            swap_in.partition = (target.partition - 1).max(0);
            // Serialize back-to-back swap-ins of the same tensor so the
            // host-to-device traffic for it never overlaps itself.
            if let Some((prev_name, _)) = &prev_consumer {
                swap_in.input.push(format!("^{prev_name}"));
            }
            swap_in.add_colocation_group(coloc_group.clone());
            graph.add_node(swap_in);
            prev_swap_in_name = Some(swap_in_name);
            stats.swap_ins += 1;
        } else {
            let (_, prev_partition) = prev_consumer
                .as_ref()
                .expect("reuse requires a previous consumer");
            assert!(
                *prev_partition == target.partition || prev_partition + 1 == target.partition,
                "partition gap while reusing swap-in for '{tensor_to_swap}': {prev_partition} -> {}",
                target.partition
            );
        }

        let swap_in_name = prev_swap_in_name
            .as_ref()
            .expect("swap-in must exist before rewiring");
        graph.nodes[target.node.index()].input[target.input_index] = swap_in_name.clone();
        stats.rewired_inputs += 1;
        prev_consumer = Some((consumer_name, target.partition));
    }
}
