mod support;

use ebb::partition::partition_graph;
use ebb::rewrite::{swap_tensors, DEFAULT_PARTITION_DISTANCE};
use ebb::spec::{AttrValue, DataType, Graph};
use support::{
    constant, find_node, graph, op_node, partition_of, partitions_from_fields, single_gpu, source,
    two_gpus, variable, CPU0, GPU0, GPU1,
};

fn swap_node_count(graph: &Graph) -> usize {
    graph
        .nodes
        .iter()
        .filter(|node| node.op == "_CopyFromGpuToHost" || node.op == "_CopyFromHostToGpu")
        .count()
}

#[test]
fn long_distance_same_device_consumer_is_swapped() {
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("b", "Relu", GPU0, &["a"]),
        op_node("c", "Relu", GPU0, &["b"]),
        op_node("d", "Relu", GPU0, &["c"]),
        op_node("e", "Add", GPU0, &["a", "d"]),
    ]);
    let partitions = partition_graph(&mut g, &single_gpu(), 1).unwrap();
    assert_eq!(partition_of(&g, "e"), 5);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 1);
    assert_eq!(stats.swap_outs, 1);
    assert_eq!(stats.swap_ins, 1);
    assert_eq!(stats.rewired_inputs, 1);

    let swap_out = find_node(&g, "swap_out_a_0");
    assert_eq!(swap_out.op, "_CopyFromGpuToHost");
    assert_eq!(swap_out.device, GPU0);
    assert_eq!(swap_out.partition, partition_of(&g, "a"));
    assert_eq!(swap_out.input, vec!["a:0"]);
    assert_eq!(swap_out.attr.get("T"), Some(&AttrValue::Type(DataType::F32)));
    assert_eq!(swap_out.colocation_groups(), ["loc@a_0"]);
    assert_eq!(find_node(&g, "a").colocation_groups(), ["loc@a_0"]);

    let swap_in = find_node(&g, "swap_in_a_0_e_0");
    assert_eq!(swap_in.op, "_CopyFromHostToGpu");
    assert_eq!(swap_in.device, GPU0);
    assert_eq!(swap_in.partition, 4);
    assert_eq!(swap_in.input, vec!["swap_out_a_0"]);
    assert_eq!(swap_in.attr.get("T"), Some(&AttrValue::Type(DataType::F32)));
    assert_eq!(swap_in.colocation_groups(), ["loc@a_0"]);

    let e = find_node(&g, "e");
    assert_eq!(e.input, vec!["swap_in_a_0_e_0", "d"]);
}

#[test]
fn cross_device_consumers_are_left_alone() {
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("b", "Relu", GPU0, &["a"]),
        op_node("c", "Relu", GPU0, &["b"]),
        op_node("d", "Relu", GPU0, &["c"]),
        op_node("e", "Add", GPU1, &["a", "d"]),
    ]);
    let partitions = partition_graph(&mut g, &two_gpus(), 1).unwrap();
    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();

    assert_eq!(stats.tensors_swapped, 0);
    assert_eq!(swap_node_count(&g), 0);
    assert_eq!(find_node(&g, "e").input[0], "a");
}

#[test]
fn nearby_consumers_are_not_swapped() {
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("b", "Relu", GPU0, &["a"]),
    ]);
    let partitions = partition_graph(&mut g, &single_gpu(), 1).unwrap();
    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();

    assert_eq!(stats.tensors_swapped, 0);
    assert_eq!(swap_node_count(&g), 0);
}

#[test]
fn adjacent_distant_consumers_share_one_swap_in() {
    // Partitions hand-placed to the literal scenario: a=1, d1=5, d2=6.
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("d1", "Relu", GPU0, &["a"]),
        op_node("d2", "Relu", GPU0, &["a"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 5;
    g.nodes[2].partition = 6;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.swap_outs, 1);
    assert_eq!(stats.swap_ins, 1);
    assert_eq!(stats.rewired_inputs, 2);

    let swap_in = find_node(&g, "swap_in_a_0_d1_0");
    assert_eq!(swap_in.partition, 4);
    assert_eq!(swap_in.input, vec!["swap_out_a_0"]);
    assert_eq!(find_node(&g, "d1").input, vec!["swap_in_a_0_d1_0"]);
    assert_eq!(find_node(&g, "d2").input, vec!["swap_in_a_0_d1_0"]);
}

#[test]
fn separated_distant_consumers_chain_swap_ins_with_control_edges() {
    // Consumers at partitions 5 and 9 are far enough apart for two separate
    // swap-ins; the second one must wait for the first consumer to run.
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("e1", "Relu", GPU0, &["a"]),
        op_node("e2", "Relu", GPU0, &["a"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 5;
    g.nodes[2].partition = 9;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.swap_outs, 1);
    assert_eq!(stats.swap_ins, 2);
    assert_eq!(stats.rewired_inputs, 2);

    let first = find_node(&g, "swap_in_a_0_e1_0");
    assert_eq!(first.partition, 4);
    assert_eq!(first.input, vec!["swap_out_a_0"]);

    let second = find_node(&g, "swap_in_a_0_e2_0");
    assert_eq!(second.partition, 8);
    assert_eq!(second.input, vec!["swap_out_a_0", "^e1"]);

    assert_eq!(find_node(&g, "e1").input, vec!["swap_in_a_0_e1_0"]);
    assert_eq!(find_node(&g, "e2").input, vec!["swap_in_a_0_e2_0"]);
}

#[test]
fn multiple_output_ports_swap_independently() {
    let mut g = graph(vec![
        source("a", GPU0),
        support::bool_source("p", GPU0),
        op_node("sw", "Switch", GPU0, &["a", "p"]),
        op_node("t0", "Relu", GPU0, &["sw"]),
        op_node("t1", "Relu", GPU0, &["sw:1"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 1;
    g.nodes[2].partition = 2;
    g.nodes[3].partition = 6;
    g.nodes[4].partition = 7;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 2);
    assert_eq!(stats.swap_outs, 2);

    assert_eq!(find_node(&g, "swap_out_sw_0").input, vec!["sw:0"]);
    assert_eq!(find_node(&g, "swap_out_sw_1").input, vec!["sw:1"]);
    assert_eq!(find_node(&g, "t0").input, vec!["swap_in_sw_0_t0_0"]);
    assert_eq!(find_node(&g, "t1").input, vec!["swap_in_sw_1_t1_0"]);
    let groups = find_node(&g, "sw").colocation_groups();
    assert_eq!(groups, ["loc@sw_0", "loc@sw_1"]);
}

#[test]
fn persistent_producers_are_never_swapped() {
    let mut g = graph(vec![
        variable("v", GPU0),
        constant("k", GPU0, DataType::F32),
        op_node("u", "Add", GPU0, &["v", "k"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 1;
    g.nodes[2].partition = 9;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 0);
    assert_eq!(swap_node_count(&g), 0);
    assert_eq!(find_node(&g, "u").input, vec!["v", "k"]);
}

#[test]
fn reshape_forwards_swappability_to_its_producer() {
    let mut g = graph(vec![
        source("a", GPU0),
        constant("shp", GPU0, DataType::I32),
        op_node("r", "Reshape", GPU0, &["a", "shp"]),
        op_node("x", "Relu", GPU0, &["r"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 1;
    g.nodes[2].partition = 2;
    g.nodes[3].partition = 7;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 1);
    assert_eq!(find_node(&g, "swap_out_r_0").input, vec!["r:0"]);
    assert_eq!(find_node(&g, "x").input, vec!["swap_in_r_0_x_0"]);
}

#[test]
fn identity_chain_over_persistent_producer_is_not_swapped() {
    let mut g = graph(vec![
        variable("v", GPU0),
        op_node("i", "Identity", GPU0, &["v"]),
        op_node("x", "Relu", GPU0, &["i"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 2;
    g.nodes[2].partition = 8;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 0);
    assert_eq!(swap_node_count(&g), 0);
}

#[test]
fn identity_forwarding_stops_at_device_boundaries() {
    // The identity forwards a variable that lives on another device, so the
    // identity's own output is a fresh device-local tensor and may swap.
    let mut g = graph(vec![
        variable("v", GPU1),
        op_node("i", "Identity", GPU0, &["v"]),
        op_node("x", "Relu", GPU0, &["i"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 2;
    g.nodes[2].partition = 8;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 1);
    assert_eq!(find_node(&g, "x").input, vec!["swap_in_i_0_x_0"]);
}

#[test]
fn non_gpu_generators_are_skipped() {
    let mut g = graph(vec![
        source("a", CPU0),
        op_node("b", "Relu", CPU0, &["a"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 9;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 0);
}

#[test]
fn copy_nodes_are_never_generators() {
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("so", "_CopyFromGpuToHost", GPU0, &["a"]),
        op_node("si", "_CopyFromHostToGpu", GPU0, &["so"]),
        op_node("x", "Relu", GPU0, &["si"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 1;
    g.nodes[2].partition = 2;
    g.nodes[3].partition = 9;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 0);
    assert_eq!(find_node(&g, "x").input, vec!["si"]);
}

#[test]
fn partition_distance_is_configurable() {
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("b", "Relu", GPU0, &["a"]),
    ]);
    g.nodes[0].partition = 1;
    g.nodes[1].partition = 3;
    let partitions = partitions_from_fields(&g);

    // Distance 2 leaves the edge alone; distance 1 swaps it.
    let mut strict = g.clone();
    let stats = swap_tensors(&mut strict, &partitions, 2).unwrap();
    assert_eq!(stats.tensors_swapped, 0);

    let stats = swap_tensors(&mut g, &partitions, 1).unwrap();
    assert_eq!(stats.tensors_swapped, 1);
    assert_eq!(find_node(&g, "b").input, vec!["swap_in_a_0_b_0"]);
}

#[test]
fn unpartitioned_consumers_are_ignored() {
    // A consumer the partitioner never reached sits at partition 0; its
    // distance to any generator is negative and no swap may be created.
    let mut g = graph(vec![
        source("a", GPU0),
        op_node("b", "Relu", GPU0, &["a"]),
    ]);
    g.nodes[0].partition = 5;
    let partitions = partitions_from_fields(&g);

    let stats = swap_tensors(&mut g, &partitions, DEFAULT_PARTITION_DISTANCE).unwrap();
    assert_eq!(stats.tensors_swapped, 0);
}
