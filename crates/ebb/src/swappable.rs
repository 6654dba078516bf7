//! Static predicate deciding whether a tensor may be offloaded to the host.

use crate::registry::{input_type_for_node, output_type_for_node, OpRegistry};
use crate::view::{GraphView, InputPort, OutputPort};

/// Whether the tensor produced at `output` may be swapped out.
///
/// Persistent producers keep their storage alive regardless, reference
/// ports alias persistent memory, and unknown ops or dtypes are treated
/// conservatively as not swappable. `Identity` and `Reshape` forward their
/// input when placed on the producing device, so swappability follows the
/// forwarded tensor in that case.
pub fn is_swappable_output(view: &GraphView<'_>, output: OutputPort) -> bool {
    let node = view.node(output.node);

    let Some(op_def) = OpRegistry::global().lookup(&node.op) else {
        return false;
    };
    if op_def.persistent {
        return false;
    }
    let Ok(port_type) = output_type_for_node(node, &op_def, output.port) else {
        return false;
    };
    if port_type.is_ref {
        return false;
    }

    if node.op == "Identity" || node.op == "Reshape" {
        let input = InputPort {
            node: output.node,
            port: 0,
        };
        let fanin = view
            .regular_fanin(input)
            .expect("forwarding op must have a regular fanin");
        if view.node(fanin.node).device == node.device {
            return is_swappable_output(view, fanin);
        }
    }
    true
}

/// Whether the tensor consumed at `input` may arrive from host memory.
/// False only for unknown ops and reference-typed input slots.
pub fn is_swappable_input(view: &GraphView<'_>, input: InputPort) -> bool {
    let node = view.node(input.node);

    let Some(op_def) = OpRegistry::global().lookup(&node.op) else {
        return false;
    };
    let Ok(port_type) = input_type_for_node(node, &op_def, input.port) else {
        return false;
    };
    !port_type.is_ref
}
