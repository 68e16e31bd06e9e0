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

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[allow(unused)]
use crate::log::*;
use crate::errors::{ConsistencyError, StructureError};
use crate::graph::{Graph, Net, NetPool, NodeId, NodeType};
use crate::mux::EdgeState;
use crate::paths::has_mode_tag;

/// What one pruning run removed, for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_nets: usize,
    pub removed_instances: usize,
}

/// Resolves the external pin bindings of one placed instance against the
/// graph. Keys are bare pin names (`in[0]`), values are top-level net
/// names. A pin which does not exist on the block is a structure error.
pub fn boundary_from_pins(
    graph: &Graph,
    top_path: &str,
    pins: &BTreeMap<String, String>
) -> Result<BTreeMap<NodeId, Net>, StructureError> {
    let mut boundary = BTreeMap::new();
    for (pin, net) in pins.iter() {
        let path = format!("{}.{}", top_path, pin);
        let node = graph.find_node(&path)
            .ok_or_else(|| StructureError::UnresolvedPin {
                reference: pin.clone(),
                context: top_path.to_string(),
            })?;
        boundary.insert(node.id, Net::Bound(net.clone()));
    }
    Ok(boundary)
}

/// Runs net propagation and pruning over one routing graph. Owns the graph
/// for the duration of the decode pass; only the nodes' `net` fields are
/// mutated. The pool of synthetic net ids is shared between concurrent
/// decoders so every emitted id stays unique.
pub struct Decoder {
    graph: Graph,
    pool: Arc<Mutex<NetPool>>,
    /// External pins of the top block. Propagation never claims these;
    /// they only get a net through explicit boundary seeding.
    boundary: HashSet<NodeId>,
}

impl Decoder {
    pub fn new(graph: Graph, pool: Arc<Mutex<NetPool>>) -> Self {
        /* Top-block pins are the only nodes whose path carries no mode
         * tag; the instance path itself may be dotted. */
        let boundary = graph.nodes()
            .filter(|node| {
                node.is_terminal()
                    && !has_mode_tag(&node.path).unwrap_or(true)
            })
            .map(|node| node.id)
            .collect();
        Self { graph, pool, boundary }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Assigns a net to every electrically connected node. Bound boundary
    /// nets always survive a merge; two distinct bound nets meeting over a
    /// conducting path is a fatal inconsistency.
    pub fn propagate_nets(
        &mut self,
        bindings: &BTreeMap<NodeId, Net>,
        state: &EdgeState
    ) -> Result<(), ConsistencyError> {
        for (id, net) in bindings.iter() {
            self.graph.node_mut(*id).net = Some(net.clone());
        }

        /* Internal terminals without a binding still need a name; external
         * pins left unbound stay unconnected. */
        for idx in 0 .. self.graph.node_count() {
            let id = NodeId(idx);
            let node = self.graph.node(id);
            if node.is_terminal()
                && node.net.is_none()
                && !self.boundary.contains(&id)
            {
                let net = self.pool.lock().unwrap().alloc();
                self.graph.node_mut(id).net = Some(net);
            }
        }

        let mut queue: VecDeque<NodeId> = (0 .. self.graph.node_count())
            .map(NodeId)
            .filter(|id| self.graph.node(*id).net.is_some())
            .collect();

        while let Some(id) = queue.pop_front() {
            self.expand_node(id, state, &mut queue)?;
        }
        Ok(())
    }

    fn expand_node(
        &mut self,
        id: NodeId,
        state: &EdgeState,
        queue: &mut VecDeque<NodeId>
    ) -> Result<(), ConsistencyError> {
        let surviving = |edges: &[usize], graph: &Graph| -> Vec<usize> {
            edges.iter()
                .copied()
                .filter(|idx| !state.is_inactive(graph.edge(*idx).key()))
                .collect()
        };

        let incoming = surviving(self.graph.edges_to(id), &self.graph);
        let sole = incoming.len() == 1;
        for idx in incoming {
            let edge = self.graph.edge(idx);
            let (other, key) = (edge.src, edge.key());
            self.visit_neighbor(id, other, state.is_active(key) || sole, queue)?;
        }

        let outgoing = surviving(self.graph.edges_from(id), &self.graph);
        let sole = outgoing.len() == 1;
        for idx in outgoing {
            let edge = self.graph.edge(idx);
            let (other, key) = (edge.dst, edge.key());
            self.visit_neighbor(id, other, state.is_active(key) || sole, queue)?;
        }
        Ok(())
    }

    fn visit_neighbor(
        &mut self,
        id: NodeId,
        other: NodeId,
        may_merge: bool,
        queue: &mut VecDeque<NodeId>
    ) -> Result<(), ConsistencyError> {
        /* Re-read on every visit, a previous merge may have relabeled us */
        let net = match self.graph.node(id).net.clone() {
            Some(net) => net,
            None => return Ok(()),
        };

        match self.graph.node(other).net.clone() {
            Some(other_net) if other_net == net => Ok(()),
            Some(other_net) => {
                if may_merge {
                    self.merge_nets(net, other_net)
                } else {
                    /* Two nets meeting over an edge of unknown state:
                     * presume the branch disconnected, do not guess */
                    Ok(())
                }
            }
            None => {
                if self.boundary.contains(&other) {
                    return Ok(());
                }
                self.graph.node_mut(other).net = Some(net);
                queue.push_back(other);
                Ok(())
            }
        }
    }

    fn merge_nets(&mut self, a: Net, b: Net) -> Result<(), ConsistencyError> {
        let (winner, loser) = match (a.is_bound(), b.is_bound()) {
            (true, true) => {
                return Err(ConsistencyError::FrozenMergeConflict {
                    a: a.to_string(),
                    b: b.to_string(),
                });
            }
            (false, true) => (b, a),
            _ => (a, b),
        };

        dbg_log!(DBG_EXTRA, "Merging net {} into {}", loser, winner);
        let loser = Some(loser);
        for idx in 0 .. self.graph.node_count() {
            let node = self.graph.node_mut(NodeId(idx));
            if node.net == loser {
                node.net = Some(winner.clone());
            }
        }
        Ok(())
    }

    /// Unassigns nets which cannot carry a signal and sub-instances left
    /// without useful connectivity, repeating until a fixed point. Removing
    /// a net can orphan an instance whose removal orphans further nets.
    pub fn prune(&mut self) -> PruneReport {
        let mut report = PruneReport::default();
        let mut warned: HashSet<Net> = HashSet::new();

        loop {
            let mut changed = false;

            /* Net pruning: a net with no driver or no load is dead */
            let mut members: BTreeMap<Net, Vec<NodeId>> = BTreeMap::new();
            for node in self.graph.nodes() {
                if let Some(ref net) = node.net {
                    members.entry(net.clone()).or_default().push(node.id);
                }
            }
            for (net, ids) in members {
                let count = |ntype| {
                    ids.iter()
                        .filter(|id| self.graph.node(**id).ntype == ntype)
                        .count()
                };
                let sources = count(NodeType::Source);
                let sinks = count(NodeType::Sink);
                if sources == 0 || sinks == 0 {
                    dbg_log!(
                        DBG_INFO,
                        "Pruning net {} ({} driver(s), {} sink(s))",
                        net, sources, sinks
                    );
                    for id in ids {
                        self.graph.node_mut(id).net = None;
                    }
                    report.removed_nets += 1;
                    changed = true;
                } else if sources > 1 && !warned.contains(&net) {
                    dbg_log!(DBG_WARN, "Net {} has {} drivers", net, sources);
                    warned.insert(net);
                }
            }

            /* Instance pruning: a sub-instance whose surviving terminals
             * are all of one kind drives nothing or is driven by nothing */
            let mut instances: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
            for node in self.graph.nodes() {
                if !node.is_terminal() || node.net.is_none() {
                    continue;
                }
                if self.boundary.contains(&node.id) {
                    /* The top block's own pins are not an instance */
                    continue;
                }
                let prefix = match node.path.rfind('.') {
                    Some(pos) => &node.path[.. pos],
                    None => continue,
                };
                instances.entry(prefix.to_string()).or_default().push(node.id);
            }
            for (prefix, ids) in instances {
                let kind = self.graph.node(ids[0]).ntype;
                if ids.iter().all(|id| self.graph.node(*id).ntype == kind) {
                    dbg_log!(DBG_INFO, "Pruning unconnected instance {}", prefix);
                    for id in ids {
                        self.graph.node_mut(id).net = None;
                    }
                    report.removed_instances += 1;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests;
