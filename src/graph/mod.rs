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

use std::collections::BTreeSet;

use replace_with::replace_with_or_abort;
use serde::{Serialize, Serializer};

use crate::arch;
use crate::paths::PathNode;

pub mod builder;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Electrical role of a node. `Source` and `Sink` are terminal pins; the
/// direction meaning flips between the top block's external interface and
/// a leaf primitive's interface. `Port` is a pass-through pin of a nested
/// composite block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    Source,
    Sink,
    Port,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PortType {
    Input,
    Output,
    Clock,
}

impl From<arch::PortKind> for PortType {
    fn from(kind: arch::PortKind) -> Self {
        match kind {
            arch::PortKind::Input => Self::Input,
            arch::PortKind::Output => Self::Output,
            arch::PortKind::Clock => Self::Clock,
        }
    }
}

/// A net identifier. `Bound` nets carry an externally meaningful signal
/// name and are frozen: they survive every merge. `Pool` nets are synthetic
/// ids for internal connectivity and merge freely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Net {
    Bound(String),
    Pool(u32),
}

impl Net {
    pub fn is_bound(&self) -> bool {
        matches!(self, Net::Bound(_))
    }
}

impl std::fmt::Display for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Net::Bound(name) => write!(f, "{}", name),
            Net::Pool(id) => write!(f, "_{}_", id),
        }
    }
}

impl Serialize for Net {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where
        S: Serializer
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Allocator for synthetic net ids. Decode passes running in parallel
/// share one pool behind a mutex so the ids stay globally unique.
#[derive(Default)]
pub struct NetPool {
    next: u32,
}

impl NetPool {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn alloc(&mut self) -> Net {
        self.next += 1;
        Net::Pool(self.next)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub ntype: NodeType,
    pub port_type: PortType,
    /// Dot-separated mode-qualified hierarchical pin name, unique within
    /// the graph.
    pub path: String,
    /// The only field mutated after construction.
    pub net: Option<Net>,
}

impl Node {
    pub fn is_terminal(&self) -> bool {
        matches!(self.ntype, NodeType::Source | NodeType::Sink)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Direct,
    MuxInput,
    Complete,
}

/// Edge identity used for activation bookkeeping. Parallel edges between
/// the same endpoints share a key, which is what lets two muxes disagree
/// about one connection (and what the disjointness check catches).
pub type EdgeKey = (NodeId, NodeId);

#[derive(Debug, Clone)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
    /// Name of the interconnect spec this edge came from.
    pub ic: String,
    /// FASM features which must all be enabled for this edge to be active.
    /// Empty for unconditional edges.
    pub features: BTreeSet<String>,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        (self.src, self.dst)
    }
}

/// Arena-stored routing graph of one composite block. Nodes and edges are
/// addressed by dense indices; `edges_from`/`edges_to` are derived caches
/// rebuilt after mode pruning and never mutated incrementally otherwise.
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    edges_from: Vec<Vec<usize>>,
    edges_to: Vec<Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            edges_from: Vec::new(),
            edges_to: Vec::new(),
        }
    }

    pub fn add_node(&mut self, ntype: NodeType, port_type: PortType, path: String)
        -> NodeId
    {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            ntype,
            port_type,
            path,
            net: None,
        });
        id
    }

    pub fn add_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        kind: EdgeKind,
        ic: &str,
        features: BTreeSet<String>
    ) {
        assert!(src.0 < self.nodes.len(), "invalid edge source {}", src);
        assert!(dst.0 < self.nodes.len(), "invalid edge destination {}", dst);
        self.edges.push(Edge {
            src,
            dst,
            kind,
            ic: ic.to_string(),
            features,
        });
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edge(&self, idx: usize) -> &Edge {
        &self.edges[idx]
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Indices of edges leaving `id`. Valid only after `rebuild_index`.
    pub fn edges_from(&self, id: NodeId) -> &[usize] {
        &self.edges_from[id.0]
    }

    /// Indices of edges entering `id`. Valid only after `rebuild_index`.
    pub fn edges_to(&self, id: NodeId) -> &[usize] {
        &self.edges_to[id.0]
    }

    pub fn rebuild_index(&mut self) {
        self.edges_from = vec![Vec::new(); self.nodes.len()];
        self.edges_to = vec![Vec::new(); self.nodes.len()];
        for (idx, edge) in self.edges.iter().enumerate() {
            self.edges_from[edge.src.0].push(idx);
            self.edges_to[edge.dst.0].push(idx);
        }
    }

    /// Finds a node by its full hierarchical path.
    pub fn find_node(&self, path: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.path == path)
    }

    /// Removes nodes and edges of operating modes which are not physically
    /// realized. A mode tag survives when it is the implicit default, one
    /// of the modes in `keep`, or equal to its own segment's block name
    /// (the tag synthesized for LUT-class leaves). Node ids are re-densified
    /// and the edge indices rebuilt; ids are stable from here until the end
    /// of the decode pass.
    pub fn prune_modes(&mut self, keep: &[String]) {
        let mode_kept = |seg: &PathNode| match seg.mode {
            None => true,
            Some(ref mode) => {
                mode == arch::DEFAULT_MODE
                    || mode == &seg.name
                    || keep.iter().any(|k| k == mode)
            }
        };

        let keep_node = |node: &Node| {
            node.path.split('.')
                .map(|seg| {
                    PathNode::from_string(seg)
                        .expect("graph node path is well-formed")
                })
                .all(|seg| mode_kept(&seg))
        };

        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut next = 0;
        for node in self.nodes.iter() {
            if keep_node(node) {
                remap[node.id.0] = Some(NodeId(next));
                next += 1;
            }
        }

        replace_with_or_abort(&mut self.nodes, |nodes| {
            nodes.into_iter()
                .filter_map(|mut node| {
                    remap[node.id.0].map(|id| {
                        node.id = id;
                        node
                    })
                })
                .collect()
        });

        replace_with_or_abort(&mut self.edges, |edges| {
            edges.into_iter()
                .filter_map(|mut edge| {
                    match (remap[edge.src.0], remap[edge.dst.0]) {
                        (Some(src), Some(dst)) => {
                            edge.src = src;
                            edge.dst = dst;
                            Some(edge)
                        }
                        _ => None,
                    }
                })
                .collect()
        });

        self.rebuild_index();
    }
}
