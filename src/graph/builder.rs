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

use std::collections::{BTreeMap, BTreeSet};

#[allow(unused)]
use crate::log::*;
use crate::arch::{Arch, BlockDef, ConnDef, PortKind};
use crate::errors::StructureError;
use crate::paths::PathNode;
use super::{EdgeKind, Graph, NodeId, NodeType, PortType};

/// Where a block sits in the hierarchy. Decides the node type its pins get:
/// the external interface of the top block inverts the leaf convention (an
/// external input drives internal consumers, so it becomes a `Source`).
#[derive(Copy, Clone, PartialEq, Eq)]
enum Level {
    Top,
    Intermediate,
    Leaf,
}

/// Immutable per-level context threaded down the recursion. Carries the
/// mode-qualified path built so far, the accumulated FASM prefix and the
/// node map of the enclosing level, instead of any shared mutable state.
struct LevelCtx<'a> {
    /// Path of the block being processed, without its own mode tag.
    path: &'a str,
    /// Dot-joined FASM prefixes of this block and its ancestors.
    fasm_prefix: &'a str,
    /// Pin path -> node id map of the enclosing interconnect level.
    up_nodes: &'a BTreeMap<String, NodeId>,
}

/// A single-pin or ranged index suffix of a pin reference part.
enum IndexSpec {
    All,
    Single(u32),
    Range(u32, u32),
}

impl IndexSpec {
    /// Expands against the declared width or instance count. Ranges are
    /// inclusive on both ends; `[3:0]` yields 3, 2, 1, 0.
    fn expand(&self, count: u32) -> Vec<u32> {
        match *self {
            IndexSpec::All => (0 .. count).collect(),
            IndexSpec::Single(i) => vec![i],
            IndexSpec::Range(a, b) if a >= b => (b ..= a).rev().collect(),
            IndexSpec::Range(a, b) => (a ..= b).collect(),
        }
    }
}

fn parse_spec(spec: &str) -> Result<(&str, IndexSpec), StructureError> {
    let malformed = || StructureError::MalformedPinRef(spec.to_string());

    let open = match spec.find('[') {
        None => return Ok((spec, IndexSpec::All)),
        Some(open) => open,
    };
    if !spec.ends_with(']') || open == 0 {
        return Err(malformed());
    }

    let name = &spec[.. open];
    let inner = &spec[open + 1 .. spec.len() - 1];

    let index = match inner.split_once(':') {
        None => IndexSpec::Single(inner.parse().map_err(|_| malformed())?),
        Some((a, b)) => IndexSpec::Range(
            a.parse().map_err(|_| malformed())?,
            b.parse().map_err(|_| malformed())?,
        ),
    };
    Ok((name, index))
}

pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    /// Builds the routing graph of one composite block, covering every
    /// operating mode. `instance` overrides the top-level path segment
    /// (defaults to `<block>[0]`); it is what ties the graph to a placed
    /// grid location.
    pub fn build(arch: &Arch, block_type: &str, instance: Option<&str>)
        -> Result<Graph, StructureError>
    {
        let def = arch.find_block(block_type)?;
        if def.is_leaf() {
            return Err(StructureError::ParseError(format!(
                "top-level block `{}` is a leaf primitive", def.name
            )));
        }

        let top_path = match instance {
            Some(path) => path.to_string(),
            None => format!("{}[0]", def.name),
        };

        let mut builder = Self { graph: Graph::new() };

        let up_nodes = builder.build_nodes(def, &top_path, Level::Top);
        builder.process_block(def, LevelCtx {
            path: &top_path,
            fasm_prefix: def.fasm_prefix.as_deref().unwrap_or(""),
            up_nodes: &up_nodes,
        })?;

        let mut graph = builder.graph;
        graph.rebuild_index();

        dbg_log!(
            DBG_EXTRA,
            "Built graph for `{}`: {} nodes, {} edges",
            block_type,
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Adds one node per pin bit of the given block. Returns a pin path to
    /// node id map for edge resolution.
    fn build_nodes(&mut self, def: &BlockDef, prefix: &str, level: Level)
        -> BTreeMap<String, NodeId>
    {
        let mut node_map = BTreeMap::new();

        for port in def.ports.iter() {
            let ntype = match (level, port.kind) {
                (Level::Top, PortKind::Input | PortKind::Clock) => NodeType::Source,
                (Level::Top, PortKind::Output) => NodeType::Sink,
                (Level::Leaf, PortKind::Input | PortKind::Clock) => NodeType::Sink,
                (Level::Leaf, PortKind::Output) => NodeType::Source,
                (Level::Intermediate, _) => NodeType::Port,
            };

            for bit in 0 .. port.width {
                let path = format!("{}.{}[{}]", prefix, port.name, bit);
                let id = self.graph.add_node(ntype, port.kind.into(), path.clone());
                node_map.insert(path, id);
            }
        }
        node_map
    }

    /// Recursively processes one composite block: for every operating mode,
    /// builds child pin nodes, interconnect edges and descends into the
    /// non-leaf children.
    fn process_block(&mut self, def: &BlockDef, ctx: LevelCtx)
        -> Result<(), StructureError>
    {
        for mode in def.modes() {
            let curr_path = format!("{}[{}]", ctx.path, mode.name);

            /* Enumerate children and build their pin nodes */
            let mut children = Vec::new();
            for child in mode.blocks.iter() {
                for index in 0 .. child.num_pb {
                    children.push((
                        child,
                        format!("{}.{}[{}]", curr_path, child.name, index),
                    ));
                }
            }

            let mut dn_nodes = BTreeMap::new();
            for (child, child_path) in children.iter() {
                let level = if child.is_leaf() {
                    Level::Leaf
                } else {
                    Level::Intermediate
                };
                let nodes = self.build_nodes(child, child_path, level);

                if child.is_leaf() && child.is_lut_class() {
                    self.synthesize_lut_level(child, &nodes, child_path);
                }
                dn_nodes.extend(nodes);
            }

            self.build_edges(
                def,
                mode.blocks,
                mode.interconnect,
                &curr_path,
                ctx.up_nodes,
                &dn_nodes,
                ctx.fasm_prefix,
            )?;

            /* Recurse. Children see the whole level's node map so they can
             * resolve references to their own ports. */
            for (child, child_path) in children.iter() {
                if child.is_leaf() {
                    continue;
                }
                let child_prefix = match child.fasm_prefix {
                    Some(ref pfx) if ctx.fasm_prefix.is_empty() => pfx.clone(),
                    Some(ref pfx) => format!("{}.{}", ctx.fasm_prefix, pfx),
                    None => ctx.fasm_prefix.to_string(),
                };
                self.process_block(child, LevelCtx {
                    path: child_path,
                    fasm_prefix: &child_prefix,
                    up_nodes: &dn_nodes,
                })?;
            }
        }
        Ok(())
    }

    /// LUT-class leaves get an extra hierarchy level with 1:1 direct edges
    /// to mirror how such primitives are named in the packed netlist. The
    /// synthesized segment carries a mode tag equal to the leaf's own name
    /// and the leaf's original pins become pass-through ports.
    fn synthesize_lut_level(
        &mut self,
        def: &BlockDef,
        leaf_nodes: &BTreeMap<String, NodeId>,
        leaf_path: &str
    ) {
        let lut_path = format!("{}[{}].lut[0]", leaf_path, def.name);
        let ic = format!("direct:{}", def.name);

        for (path, leaf_id) in leaf_nodes.iter() {
            let pin = path.rsplit('.').next().unwrap();
            let leaf = self.graph.node(*leaf_id);
            let (ntype, port_type) = (leaf.ntype, leaf.port_type);

            let id = self.graph.add_node(
                ntype,
                port_type,
                format!("{}.{}", lut_path, pin),
            );

            match port_type {
                PortType::Input | PortType::Clock => {
                    self.graph.add_edge(*leaf_id, id, EdgeKind::Direct, &ic, BTreeSet::new());
                }
                PortType::Output => {
                    self.graph.add_edge(id, *leaf_id, EdgeKind::Direct, &ic, BTreeSet::new());
                }
            }
        }

        for leaf_id in leaf_nodes.values() {
            self.graph.node_mut(*leaf_id).ntype = NodeType::Port;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_edges(
        &mut self,
        parent: &BlockDef,
        children: &[BlockDef],
        interconnect: &[ConnDef],
        curr_path: &str,
        up_nodes: &BTreeMap<String, NodeId>,
        dn_nodes: &BTreeMap<String, NodeId>,
        fasm_prefix: &str
    ) -> Result<(), StructureError> {
        let prefixed = |features: &[String]| -> BTreeSet<String> {
            features.iter()
                .map(|f| {
                    if fasm_prefix.is_empty() {
                        f.clone()
                    } else {
                        format!("{}.{}", fasm_prefix, f)
                    }
                })
                .collect()
        };

        let resolve = |reference: &str| -> Result<Vec<NodeId>, StructureError> {
            Self::resolve_pins(reference, parent, children, curr_path, up_nodes, dn_nodes)
        };

        for conn in interconnect.iter() {
            match conn {
                ConnDef::Direct { name, input, output, features } => {
                    let inps = resolve(input)?;
                    let outs = resolve(output)?;
                    if inps.len() != outs.len() {
                        return Err(StructureError::WidthMismatch {
                            conn: name.clone(),
                            inputs: inps.len(),
                            outputs: outs.len(),
                        });
                    }
                    let features = prefixed(features);
                    for (inp, out) in inps.into_iter().zip(outs) {
                        self.graph.add_edge(
                            inp, out, EdgeKind::Direct, name, features.clone(),
                        );
                    }
                }

                ConnDef::Mux { name, inputs, output, features } => {
                    let outs = resolve(output)?;
                    if outs.len() != 1 {
                        return Err(StructureError::WidthMismatch {
                            conn: name.clone(),
                            inputs: 1,
                            outputs: outs.len(),
                        });
                    }
                    let out = outs[0];

                    for input in inputs.iter() {
                        let inps = resolve(input)?;
                        if inps.len() != 1 {
                            return Err(StructureError::WidthMismatch {
                                conn: name.clone(),
                                inputs: inps.len(),
                                outputs: 1,
                            });
                        }
                        let features = features.get(input)
                            .map(|f| prefixed(f))
                            .unwrap_or_default();
                        self.graph.add_edge(
                            inps[0], out, EdgeKind::MuxInput, name, features,
                        );
                    }
                }

                ConnDef::Complete { name, inputs, outputs } => {
                    let mut inps = Vec::new();
                    for input in inputs.iter() {
                        inps.extend(resolve(input)?);
                    }
                    let mut outs = Vec::new();
                    for output in outputs.iter() {
                        outs.extend(resolve(output)?);
                    }
                    for inp in inps.iter() {
                        for out in outs.iter() {
                            self.graph.add_edge(
                                *inp, *out, EdgeKind::Complete, name,
                                BTreeSet::new(),
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves a `<block>.<port>` reference against the current level,
    /// expanding instance and bit ranges to individual pin nodes. A block
    /// part naming the parent resolves one level up, with the parent's own
    /// mode tag dropped.
    #[allow(clippy::too_many_arguments)]
    fn resolve_pins(
        reference: &str,
        parent: &BlockDef,
        children: &[BlockDef],
        curr_path: &str,
        up_nodes: &BTreeMap<String, NodeId>,
        dn_nodes: &BTreeMap<String, NodeId>
    ) -> Result<Vec<NodeId>, StructureError> {
        let (block_spec, port_spec) = reference.split_once('.')
            .ok_or_else(|| StructureError::MalformedPinRef(reference.to_string()))?;
        let (block_name, block_index) = parse_spec(block_spec)?;
        let (port_name, port_index) = parse_spec(port_spec)?;

        let unresolved = || StructureError::UnresolvedPin {
            reference: reference.to_string(),
            context: curr_path.to_string(),
        };

        /* Pin paths of a parent reference are rooted one level up, with the
         * parent's own mode tag stripped from its segment. */
        let (def, prefixes) = if block_name == parent.name {
            let mut parts: Vec<&str> = curr_path.split('.').collect();
            let last = PathNode::from_string(parts.pop().unwrap())
                .expect("level path is well-formed")
                .without_mode();
            let last = last.to_string();
            parts.push(&last);
            (parent, vec![parts.join(".")])
        } else {
            let child = children.iter()
                .find(|child| child.name == block_name)
                .ok_or_else(unresolved)?;
            let prefixes = block_index.expand(child.num_pb)
                .into_iter()
                .map(|i| format!("{}.{}[{}]", curr_path, block_name, i))
                .collect();
            (child, prefixes)
        };

        let port = def.find_port(port_name).ok_or_else(unresolved)?;
        let bits = port_index.expand(port.width);

        let mut pins = Vec::with_capacity(prefixes.len() * bits.len());
        for prefix in prefixes.iter() {
            for bit in bits.iter() {
                let path = format!("{}.{}[{}]", prefix, port_name, bit);
                let id = dn_nodes.get(&path)
                    .or_else(|| up_nodes.get(&path))
                    .ok_or_else(unresolved)?;
                pins.push(*id);
            }
        }
        Ok(pins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;

    fn test_arch() -> Arch {
        serde_json::from_value(serde_json::json!({
            "name": "test",
            "blocks": [{
                "name": "clb",
                "ports": [
                    { "name": "in", "width": 2, "kind": "input" },
                    { "name": "out", "width": 1, "kind": "output" },
                    { "name": "clk", "width": 1, "kind": "clock" }
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
        })).unwrap()
    }

    #[test]
    fn builds_top_level_nodes_with_inverted_direction() {
        let arch = test_arch();
        let graph = GraphBuilder::build(&arch, "clb", None).unwrap();

        let n = graph.find_node("clb[0].in[0]").unwrap();
        assert_eq!(n.ntype, NodeType::Source);
        let n = graph.find_node("clb[0].out[0]").unwrap();
        assert_eq!(n.ntype, NodeType::Sink);
        let n = graph.find_node("clb[0].clk[0]").unwrap();
        assert_eq!(n.ntype, NodeType::Source);
    }

    #[test]
    fn synthesizes_lut_hierarchy_level() {
        let arch = test_arch();
        let graph = GraphBuilder::build(&arch, "clb", None).unwrap();

        /* The leaf's own pins become pass-through ports... */
        let port = graph.find_node("clb[0][default].lut4[0].in[0]").unwrap();
        assert_eq!(port.ntype, NodeType::Port);

        /* ...and the synthesized level carries the terminals. */
        let sink = graph
            .find_node("clb[0][default].lut4[0][lut4].lut[0].in[0]")
            .unwrap();
        assert_eq!(sink.ntype, NodeType::Sink);
        let source = graph
            .find_node("clb[0][default].lut4[0][lut4].lut[0].out[0]")
            .unwrap();
        assert_eq!(source.ntype, NodeType::Source);

        /* 1:1 direct edges, in the right direction */
        assert!(graph.edges().any(|e| e.src == port.id && e.dst == sink.id));
        let lut_out = graph.find_node("clb[0][default].lut4[0].out[0]").unwrap();
        assert!(graph.edges().any(|e| e.src == source.id && e.dst == lut_out.id));
    }

    #[test]
    fn mux_edges_carry_per_input_features() {
        let arch = test_arch();
        let graph = GraphBuilder::build(&arch, "clb", None).unwrap();

        let dst = graph.find_node("clb[0][default].lut4[0].in[0]").unwrap();
        let edges: Vec<_> = graph.edges_to(dst.id).iter()
            .map(|idx| graph.edge(*idx))
            .collect();
        assert_eq!(edges.len(), 2);
        for edge in edges {
            assert_eq!(edge.kind, EdgeKind::MuxInput);
            assert_eq!(edge.features.len(), 1);
        }
    }

    #[test]
    fn unresolved_reference_is_fatal() {
        let mut arch = test_arch();
        match &mut arch.blocks[0].interconnect[1] {
            ConnDef::Direct { input, .. } => *input = "clb.bogus[0]".to_string(),
            _ => unreachable!(),
        }
        let err = GraphBuilder::build(&arch, "clb", None);
        assert!(matches!(err, Err(StructureError::UnresolvedPin { .. })));
    }

    #[test]
    fn instance_path_overrides_top_segment() {
        let arch = test_arch();
        let graph = GraphBuilder::build(&arch, "clb", Some("grid[5]")).unwrap();
        assert!(graph.find_node("grid[5].in[0]").is_some());
        assert!(graph.find_node("grid[5][default].lut4[0].in[0]").is_some());
    }
}
