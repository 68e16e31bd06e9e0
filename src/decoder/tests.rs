/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::HashSet;

use super::*;
use crate::graph::{EdgeKind, PortType};
use crate::mux::{identify_muxes, resolve_activation};

fn node(graph: &mut Graph, ntype: NodeType, path: &str) -> NodeId {
    let port_type = match ntype {
        NodeType::Sink => PortType::Input,
        _ => PortType::Output,
    };
    graph.add_node(ntype, port_type, path.to_string())
}

fn edge(graph: &mut Graph, src: NodeId, dst: NodeId, features: &[&str]) {
    let kind = if features.is_empty() {
        EdgeKind::Direct
    } else {
        EdgeKind::MuxInput
    };
    graph.add_edge(
        src,
        dst,
        kind,
        "ic",
        features.iter().map(|f| f.to_string()).collect(),
    );
}

fn decoder(graph: Graph) -> Decoder {
    Decoder::new(graph, Arc::new(Mutex::new(NetPool::new())))
}

fn bind(pairs: &[(NodeId, &str)]) -> BTreeMap<NodeId, Net> {
    pairs.iter()
        .map(|(id, name)| (*id, Net::Bound(name.to_string())))
        .collect()
}

#[test]
fn unconfigured_mux_conducts_through_default_edge() {
    let mut graph = Graph::new();
    let a = node(&mut graph, NodeType::Source, "top[0].a[0]");
    let b = node(&mut graph, NodeType::Source, "top[0].b[0]");
    let m = node(&mut graph, NodeType::Sink, "top[0][default].leaf[0].in[0]");
    edge(&mut graph, a, m, &["SEL[0]"]);
    edge(&mut graph, b, m, &[]);
    graph.rebuild_index();

    let muxes = identify_muxes(&graph).unwrap();
    let state = resolve_activation(&graph, &muxes, &HashSet::new()).unwrap();
    assert!(state.is_active((b, m)));
    assert!(state.is_inactive((a, m)));

    let mut dec = decoder(graph);
    dec.propagate_nets(&bind(&[(b, "sig")]), &state).unwrap();

    let graph = dec.graph();
    assert_eq!(graph.node(m).net, Some(Net::Bound("sig".into())));
    /* The deselected input keeps its own identity */
    assert_eq!(graph.node(a).net, None);
}

#[test]
fn bound_net_absorbs_pool_net() {
    let mut graph = Graph::new();
    let p1 = node(&mut graph, NodeType::Source, "top[0].clk[0]");
    let port = node(&mut graph, NodeType::Port, "top[0][default].sub[0].clk[0]");
    let n7 = node(&mut graph, NodeType::Sink, "top[0][default].sub[0].ff[0].C[0]");
    edge(&mut graph, p1, port, &[]);
    edge(&mut graph, port, n7, &[]);
    graph.rebuild_index();

    let mut dec = decoder(graph);
    dec.propagate_nets(&bind(&[(p1, "clk")]), &EdgeState::default()).unwrap();

    let clk = Some(Net::Bound("clk".into()));
    let graph = dec.graph();
    assert_eq!(graph.node(p1).net, clk);
    assert_eq!(graph.node(port).net, clk);
    assert_eq!(graph.node(n7).net, clk);
}

#[test]
fn two_bound_nets_refuse_to_merge() {
    let mut graph = Graph::new();
    let a = node(&mut graph, NodeType::Source, "top[0].a[0]");
    let b = node(&mut graph, NodeType::Sink, "top[0].b[0]");
    edge(&mut graph, a, b, &[]);
    graph.rebuild_index();

    let mut dec = decoder(graph);
    let result = dec.propagate_nets(
        &bind(&[(a, "x"), (b, "y")]),
        &EdgeState::default(),
    );
    assert!(matches!(
        result,
        Err(ConsistencyError::FrozenMergeConflict { .. })
    ));
}

#[test]
fn propagation_does_not_claim_unbound_external_pins() {
    let mut graph = Graph::new();
    let src = node(&mut graph, NodeType::Source, "top[0][default].leaf[0].out[0]");
    let pin = node(&mut graph, NodeType::Sink, "top[0].out[0]");
    edge(&mut graph, src, pin, &[]);
    graph.rebuild_index();

    let mut dec = decoder(graph);
    dec.propagate_nets(&BTreeMap::new(), &EdgeState::default()).unwrap();

    assert!(dec.graph().node(src).net.is_some());
    assert_eq!(dec.graph().node(pin).net, None);
}

#[test]
fn boundary_protection_handles_dotted_instance_paths() {
    let mut graph = Graph::new();
    let src = node(
        &mut graph,
        NodeType::Source,
        "grid.x0y1[0][default].leaf[0].out[0]",
    );
    let pin = node(&mut graph, NodeType::Sink, "grid.x0y1[0].out[0]");
    edge(&mut graph, src, pin, &[]);
    graph.rebuild_index();

    let mut dec = decoder(graph);
    dec.propagate_nets(&BTreeMap::new(), &EdgeState::default()).unwrap();

    /* The external pin is still external when the placement path has
     * several segments */
    assert!(dec.graph().node(src).net.is_some());
    assert_eq!(dec.graph().node(pin).net, None);
}

#[test]
fn propagation_is_deterministic() {
    let build = || {
        let mut graph = Graph::new();
        let i0 = node(&mut graph, NodeType::Source, "top[0].in[0]");
        let i1 = node(&mut graph, NodeType::Source, "top[0].in[1]");
        let a = node(&mut graph, NodeType::Sink, "top[0][default].l[0].in[0]");
        let b = node(&mut graph, NodeType::Source, "top[0][default].l[0].out[0]");
        let c = node(&mut graph, NodeType::Sink, "top[0][default].m[0].in[0]");
        edge(&mut graph, i0, a, &["S[0]"]);
        edge(&mut graph, i1, a, &[]);
        edge(&mut graph, b, c, &[]);
        graph.rebuild_index();
        graph
    };

    let run = || {
        let graph = build();
        let muxes = identify_muxes(&graph).unwrap();
        let enabled: HashSet<String> = ["S[0]".to_string()].into_iter().collect();
        let state = resolve_activation(&graph, &muxes, &enabled).unwrap();
        let mut dec = decoder(graph);
        dec.propagate_nets(&bind(&[(NodeId(0), "d0")]), &state).unwrap();
        dec.prune();
        dec.into_graph()
            .nodes()
            .map(|node| (node.path.clone(), node.net.clone()))
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

#[test]
fn pruning_cascades_through_orphaned_instances() {
    /* leaf1 drives leaf2, but leaf2's own output goes nowhere: pruning
     * leaf2's output net must take leaf2, then leaf1, with it */
    let mut graph = Graph::new();
    let in1 = node(&mut graph, NodeType::Sink, "top[0][default].leaf1[0].in[0]");
    let out1 = node(&mut graph, NodeType::Source, "top[0][default].leaf1[0].out[0]");
    let in2 = node(&mut graph, NodeType::Sink, "top[0][default].leaf2[0].in[0]");
    let out2 = node(&mut graph, NodeType::Source, "top[0][default].leaf2[0].out[0]");
    edge(&mut graph, out1, in2, &[]);
    graph.rebuild_index();

    let mut dec = decoder(graph);
    dec.propagate_nets(&BTreeMap::new(), &EdgeState::default()).unwrap();
    assert!(dec.graph().node(in2).net.is_some());

    let report = dec.prune();
    assert!(report.removed_nets >= 2);
    assert_eq!(report.removed_instances, 2);
    assert!(dec.graph().nodes().all(|node| node.net.is_none()));

    /* Fixed point: a second run finds nothing left to remove */
    assert_eq!(dec.prune(), PruneReport::default());
    let _ = (in1, out2);
}

#[test]
fn surviving_nets_have_drivers_and_sinks() {
    let mut graph = Graph::new();
    let out1 = node(&mut graph, NodeType::Source, "top[0][default].leaf1[0].out[0]");
    let in1 = node(&mut graph, NodeType::Sink, "top[0][default].leaf1[0].in[0]");
    let out2 = node(&mut graph, NodeType::Source, "top[0][default].leaf2[0].out[0]");
    let in2 = node(&mut graph, NodeType::Sink, "top[0][default].leaf2[0].in[0]");
    /* A feedback pair: each leaf drives the other */
    edge(&mut graph, out1, in2, &[]);
    edge(&mut graph, out2, in1, &[]);
    graph.rebuild_index();

    let mut dec = decoder(graph);
    dec.propagate_nets(&BTreeMap::new(), &EdgeState::default()).unwrap();
    dec.prune();

    for id in [out1, in1, out2, in2] {
        assert!(dec.graph().node(id).net.is_some());
    }

    let mut seen = std::collections::BTreeSet::new();
    for node in dec.graph().nodes() {
        let net = node.net.clone().unwrap();
        if !seen.insert(net.clone()) {
            continue;
        }
        let members: Vec<_> = dec.graph()
            .nodes()
            .filter(|n| n.net.as_ref() == Some(&net))
            .collect();
        assert!(members.iter().any(|n| n.ntype == NodeType::Source));
        assert!(members.iter().any(|n| n.ntype == NodeType::Sink));
    }
}

#[test]
fn multi_driver_net_survives_pruning() {
    let mut graph = Graph::new();
    let out1 = node(&mut graph, NodeType::Source, "top[0][default].leaf1[0].out[0]");
    let out2 = node(&mut graph, NodeType::Source, "top[0][default].leaf2[0].out[0]");
    let in1 = node(&mut graph, NodeType::Sink, "top[0][default].leaf1[0].in[0]");
    let in2 = node(&mut graph, NodeType::Sink, "top[0][default].leaf2[0].in[0]");
    edge(&mut graph, out1, in2, &["A[0]"]);
    edge(&mut graph, out2, in2, &["A[1]"]);
    edge(&mut graph, out2, in1, &[]);
    graph.rebuild_index();

    /* A broken feature set enabling both inputs of the in2 mux */
    let mut state = EdgeState::default();
    state.active.insert((out1, in2));
    state.active.insert((out2, in2));

    let mut dec = decoder(graph);
    dec.propagate_nets(&BTreeMap::new(), &state).unwrap();
    let report = dec.prune();

    /* Contention is warned about, never auto-repaired */
    assert_eq!(report.removed_instances, 0);
    assert!(dec.graph().node(in2).net.is_some());
}

#[test]
fn decodes_a_configured_lut_end_to_end() {
    let arch: crate::arch::Arch = serde_json::from_value(serde_json::json!({
        "name": "test",
        "blocks": [{
            "name": "clb",
            "ports": [
                { "name": "in", "width": 2, "kind": "input" },
                { "name": "out", "width": 1, "kind": "output" }
            ],
            "blocks": [{
                "name": "lut4",
                "class": "lut",
                "ports": [
                    { "name": "in", "width": 2, "kind": "input" },
                    { "name": "out", "width": 1, "kind": "output" }
                ]
            }],
            "interconnect": [
                {
                    "kind": "mux",
                    "name": "imux0",
                    "inputs": ["clb.in[0]", "clb.in[1]"],
                    "output": "lut4.in[0]",
                    "features": {
                        "clb.in[0]": ["IMUX0[0]"],
                        "clb.in[1]": ["IMUX0[1]"]
                    }
                },
                {
                    "kind": "direct",
                    "name": "din1",
                    "input": "clb.in[1]",
                    "output": "lut4.in[1]"
                },
                {
                    "kind": "direct",
                    "name": "dout",
                    "input": "lut4.out[0]",
                    "output": "clb.out[0]"
                }
            ]
        }]
    })).unwrap();

    let mut graph =
        crate::graph::builder::GraphBuilder::build(&arch, "clb", None).unwrap();
    graph.prune_modes(&[]);

    let enabled: HashSet<String> = ["IMUX0[0]".to_string()].into_iter().collect();
    let muxes = identify_muxes(&graph).unwrap();
    let state = resolve_activation(&graph, &muxes, &enabled).unwrap();

    let pins: BTreeMap<String, String> = [
        ("in[0]".to_string(), "a".to_string()),
        ("in[1]".to_string(), "b".to_string()),
        ("out[0]".to_string(), "y".to_string()),
    ].into_iter().collect();
    let boundary = boundary_from_pins(&graph, "clb[0]", &pins).unwrap();

    let mut dec = decoder(graph);
    dec.propagate_nets(&boundary, &state).unwrap();
    dec.prune();

    let netlist = crate::netlist::instantiate(dec.graph(), &arch, "clb").unwrap();
    assert_eq!(netlist.len(), 1);

    let cell = &netlist.cells["clb_0.lut4_0.lut_0"];
    assert_eq!(cell.ctype, "lut4");
    assert_eq!(cell.ports["in[0]"], Some(Net::Bound("a".into())));
    assert_eq!(cell.ports["in[1]"], Some(Net::Bound("b".into())));
    assert_eq!(cell.ports["out[0]"], Some(Net::Bound("y".into())));
}

#[test]
fn resolves_boundary_bindings_by_pin_name() {
    let mut graph = Graph::new();
    let clk = node(&mut graph, NodeType::Source, "clb[0].clk[0]");
    node(&mut graph, NodeType::Sink, "clb[0].out[0]");
    graph.rebuild_index();

    let pins: BTreeMap<String, String> =
        [("clk[0]".to_string(), "top_clk".to_string())].into_iter().collect();
    let bound = boundary_from_pins(&graph, "clb[0]", &pins).unwrap();
    assert_eq!(bound.get(&clk), Some(&Net::Bound("top_clk".into())));

    let bad: BTreeMap<String, String> =
        [("nope[0]".to_string(), "x".to_string())].into_iter().collect();
    assert!(matches!(
        boundary_from_pins(&graph, "clb[0]", &bad),
        Err(StructureError::UnresolvedPin { .. })
    ));
}
