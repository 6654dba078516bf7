//! Structural statistics used to judge how much locality the partitioner
//! has to work with.

use std::collections::VecDeque;
use std::fmt;

use crate::view::{GraphView, NodeId};

/// Summary record over one graph snapshot.
///
/// `depth` is the longest source-to-sink path length; rank differences
/// measure how far apart producers and consumers sit in the level structure.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GraphStats {
    pub depth: usize,
    pub num_nodes: usize,
    pub avg_indegree: f64,
    pub avg_outdegree: f64,
    pub avg_input_rank_diff: f64,
    pub avg_output_rank_diff: f64,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depth = {} num_nodes = {} avg_indegree = {:.3} avg_outdegree = {:.3} \
             avg_input_rank_diff = {:.3} avg_output_rank_diff = {:.3}",
            self.depth,
            self.num_nodes,
            self.avg_indegree,
            self.avg_outdegree,
            self.avg_input_rank_diff,
            self.avg_output_rank_diff
        )
    }
}

/// Kahn topological order over regular edges, with `Merge` loop back-edges
/// from `NextIteration` counted as satisfied up front. Nodes on cycles the
/// relaxation does not break are omitted.
pub fn topological_order(view: &GraphView<'_>) -> Vec<NodeId> {
    let num_nodes = view.num_nodes();
    let mut num_ready_inputs = vec![0usize; num_nodes];
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    for i in 0..num_nodes {
        let id = NodeId(i as u32);
        if view.inputs(id).is_empty() {
            queue.push_back(id);
        }
        if matches!(view.node(id).op.as_str(), "Merge" | "RefMerge") {
            for &input in view.inputs(id) {
                if matches!(
                    view.node(input).op.as_str(),
                    "NextIteration" | "RefNextIteration"
                ) {
                    num_ready_inputs[i] += 1;
                }
            }
        }
    }

    let mut order = Vec::with_capacity(num_nodes);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &fanout in view.outputs(node) {
            num_ready_inputs[fanout.index()] += 1;
            if num_ready_inputs[fanout.index()] == view.inputs(fanout).len() {
                queue.push_back(fanout);
            }
        }
    }
    order
}

/// Computes depth, average degrees, and average rank differences across
/// edges for the ordered portion of the graph.
pub fn graph_stats(view: &GraphView<'_>) -> GraphStats {
    let order = topological_order(view);
    let mut rank = vec![0usize; view.num_nodes()];
    let mut max_rank = 0usize;
    let mut total_inputs = 0usize;
    let mut total_outputs = 0usize;

    for &node in &order {
        let node_rank = rank[node.index()];
        total_inputs += view.inputs(node).len();
        total_outputs += view.outputs(node).len();
        for &output in view.outputs(node) {
            rank[output.index()] = rank[output.index()].max(node_rank + 1);
            max_rank = max_rank.max(rank[output.index()]);
        }
    }

    let mut total_rank_diff_input = 0usize;
    let mut total_rank_diff_output = 0usize;
    for &node in &order {
        let node_rank = rank[node.index()];
        for &input in view.inputs(node) {
            total_rank_diff_input += node_rank.saturating_sub(rank[input.index()]);
        }
        for &output in view.outputs(node) {
            total_rank_diff_output += rank[output.index()].saturating_sub(node_rank);
        }
    }

    let ratio = |numerator: usize, denominator: usize| {
        if denominator == 0 {
            0.0
        } else {
            numerator as f64 / denominator as f64
        }
    };

    GraphStats {
        depth: max_rank,
        num_nodes: order.len(),
        avg_indegree: ratio(total_inputs, order.len()),
        avg_outdegree: ratio(total_outputs, order.len()),
        avg_input_rank_diff: ratio(total_rank_diff_input, total_inputs),
        avg_output_rank_diff: ratio(total_rank_diff_output, total_outputs),
    }
}
