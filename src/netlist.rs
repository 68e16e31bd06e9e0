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

use std::collections::{BTreeMap, HashMap};

#[allow(unused)]
use crate::log::*;
use crate::arch::{Arch, BlockDef};
use crate::errors::StructureError;
use crate::graph::{Graph, Net, Node};
use crate::paths::{has_mode_tag, instance_name, parse_path};

/// One emitted cell: a leaf primitive which survived pruning. Ports are
/// keyed per bit (`in[2]`); an unconnected bit maps to `None`.
#[derive(Debug, Clone, Serialize)]
pub struct Cell {
    #[serde(rename = "type")]
    pub ctype: String,
    pub name: String,
    pub ports: BTreeMap<String, Option<Net>>,
}

#[derive(Debug, Default, Serialize)]
pub struct Netlist {
    pub cells: BTreeMap<String, Cell>,
}

impl Netlist {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_cell(&mut self, cell: Cell) {
        let old = self.cells.insert(cell.name.clone(), cell);
        assert!(old.is_none(), "duplicate cell name");
    }

    /// Absorbs the cells of another netlist. Cell names start with the
    /// decoded instance's own path, so parallel decodes never collide.
    pub fn merge(&mut self, other: Netlist) {
        for (_, cell) in other.cells {
            self.add_cell(cell);
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Finds the block definition a node path prefix refers to by walking the
/// hierarchy from the top block. The synthesized `lut` level of a
/// LUT-class leaf resolves to the leaf itself.
fn leaf_def<'a>(top: &'a BlockDef, prefix: &str)
    -> Result<&'a BlockDef, StructureError>
{
    let mut def = top;
    for seg in parse_path(prefix)?.into_iter().skip(1) {
        if def.is_leaf() && def.is_lut_class() && seg.name == "lut" {
            continue;
        }
        def = def.modes()
            .into_iter()
            .flat_map(|mode| mode.blocks.iter())
            .find(|block| block.name == seg.name)
            .ok_or_else(|| StructureError::UnknownBlockType(seg.name.clone()))?;
    }
    Ok(def)
}

/// Turns the net-assigned, pruned graph of one decoded instance into cell
/// records. A cell is emitted for every sub-instance which kept at least
/// one net-carrying terminal; its type and port widths come from the block
/// description and its name from the hierarchical path.
pub fn instantiate(graph: &Graph, arch: &Arch, block_type: &str)
    -> Result<Netlist, StructureError>
{
    let top = arch.find_block(block_type)?;

    let by_path: HashMap<&str, &Node> = graph.nodes()
        .map(|node| (node.path.as_str(), node))
        .collect();

    let mut groups: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
    for node in graph.nodes() {
        if !node.is_terminal() || node.net.is_none() {
            continue;
        }
        if !has_mode_tag(&node.path)? {
            /* The top block's own pins are not a cell */
            continue;
        }
        let prefix = match node.path.rfind('.') {
            Some(pos) => &node.path[.. pos],
            None => continue,
        };
        groups.entry(prefix).or_default().push(node);
    }

    let mut netlist = Netlist::new();
    for (prefix, _) in groups {
        let def = leaf_def(top, prefix)?;

        let mut ports = BTreeMap::new();
        for port in def.ports.iter() {
            for bit in 0 .. port.width {
                let key = format!("{}[{}]", port.name, bit);
                let net = by_path.get(format!("{}.{}", prefix, key).as_str())
                    .and_then(|node| node.net.clone());
                ports.insert(key, net);
            }
        }

        let cell = Cell {
            ctype: def.name.clone(),
            name: instance_name(prefix)?,
            ports,
        };
        dbg_log!(DBG_INFO, "Emitting cell {} ({})", cell.name, cell.ctype);
        netlist.add_cell(cell);
    }
    Ok(netlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, NodeType, PortType};

    fn test_arch() -> Arch {
        serde_json::from_value(serde_json::json!({
            "name": "test",
            "blocks": [{
                "name": "clb",
                "ports": [
                    {"name": "in", "width": 2, "kind": "input"},
                    {"name": "out", "kind": "output"}
                ],
                "blocks": [{
                    "name": "lut4",
                    "class": "lut",
                    "ports": [
                        {"name": "in", "width": 2, "kind": "input"},
                        {"name": "out", "kind": "output"}
                    ]
                }],
                "interconnect": []
            }]
        })).unwrap()
    }

    fn terminal(graph: &mut Graph, ntype: NodeType, path: &str) -> NodeId {
        let port_type = match ntype {
            NodeType::Sink => PortType::Input,
            _ => PortType::Output,
        };
        graph.add_node(ntype, port_type, path.to_string())
    }

    #[test]
    fn emits_cells_for_net_carrying_instances() {
        let arch = test_arch();
        let mut graph = Graph::new();
        let i0 = terminal(
            &mut graph,
            NodeType::Sink,
            "clb[0][default].lut4[0][lut4].lut[0].in[0]",
        );
        terminal(
            &mut graph,
            NodeType::Sink,
            "clb[0][default].lut4[0][lut4].lut[0].in[1]",
        );
        let out = terminal(
            &mut graph,
            NodeType::Source,
            "clb[0][default].lut4[0][lut4].lut[0].out[0]",
        );
        graph.rebuild_index();
        graph.node_mut(i0).net = Some(Net::Bound("a".into()));
        graph.node_mut(out).net = Some(Net::Pool(7));

        let netlist = instantiate(&graph, &arch, "clb").unwrap();
        assert_eq!(netlist.len(), 1);

        let cell = netlist.cells.values().next().unwrap();
        assert_eq!(cell.ctype, "lut4");
        assert_eq!(cell.name, "clb_0.lut4_0.lut_0");
        assert_eq!(cell.ports["in[0]"], Some(Net::Bound("a".into())));
        assert_eq!(cell.ports["in[1]"], None);
        assert_eq!(cell.ports["out[0]"], Some(Net::Pool(7)));
    }

    #[test]
    fn skips_instances_with_no_assigned_nets() {
        let arch = test_arch();
        let mut graph = Graph::new();
        terminal(
            &mut graph,
            NodeType::Sink,
            "clb[0][default].lut4[0][lut4].lut[0].in[0]",
        );
        /* Top-level pins never become cells either */
        let pin = terminal(&mut graph, NodeType::Source, "clb[0].in[0]");
        graph.rebuild_index();
        graph.node_mut(pin).net = Some(Net::Bound("a".into()));

        let netlist = instantiate(&graph, &arch, "clb").unwrap();
        assert!(netlist.is_empty());
    }

    #[test]
    fn net_serialization_uses_printable_names() {
        let mut cell = Cell {
            ctype: "lut4".into(),
            name: "clb_0.lut4_0.lut_0".into(),
            ports: BTreeMap::new(),
        };
        cell.ports.insert("in[0]".into(), Some(Net::Pool(3)));
        cell.ports.insert("out[0]".into(), Some(Net::Bound("clk".into())));

        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json["type"], "lut4");
        assert_eq!(json["ports"]["in[0]"], "_3_");
        assert_eq!(json["ports"]["out[0]"], "clk");
    }

    #[test]
    fn unknown_hierarchy_segment_is_an_error() {
        let arch = test_arch();
        let mut graph = Graph::new();
        let id = terminal(&mut graph, NodeType::Sink, "clb[0][default].bogus[0].in[0]");
        graph.rebuild_index();
        graph.node_mut(id).net = Some(Net::Pool(1));

        assert!(matches!(
            instantiate(&graph, &arch, "clb"),
            Err(StructureError::UnknownBlockType(_))
        ));
    }
}
