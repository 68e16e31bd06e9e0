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

use std::collections::{BTreeSet, HashSet};

#[allow(unused)]
use crate::log::*;
use crate::errors::{ConsistencyError, StructureError};
use crate::graph::{EdgeKey, EdgeKind, Graph, NodeId, NodeType};
use crate::paths::feature_family;

/// A routing mux inferred from the graph: the set of edges converging on
/// one Sink/Port node, of which at most one may be active. Not stored in
/// the graph; derived after mode pruning.
pub struct RoutingMux {
    pub dst: NodeId,
    pub edges: Vec<usize>,
    /// Union of the member edges' FASM features.
    pub features: BTreeSet<String>,
}

impl RoutingMux {
    fn new(graph: &Graph, dst: NodeId, edges: Vec<usize>)
        -> Result<Self, StructureError>
    {
        let node_path = || graph.node(dst).path.clone();

        /* There can be at most one edge with no features; it models the
         * implicit default input of the mux. */
        let featureless = edges.iter()
            .filter(|idx| graph.edge(**idx).features.is_empty())
            .count();
        if featureless > 1 {
            return Err(StructureError::AmbiguousDefaultEdge(node_path()));
        }

        let mut features = BTreeSet::new();
        for idx in edges.iter() {
            features.extend(graph.edge(*idx).features.iter().cloned());
        }

        /* All features must reduce to one family once the trailing
         * selection index is stripped. */
        let mut families = BTreeSet::new();
        for feature in features.iter() {
            families.insert(feature_family(feature)?.to_string());
        }
        if families.len() != 1 {
            return Err(StructureError::InconsistentMuxFeatures {
                node: node_path(),
                families: families.into_iter().collect(),
            });
        }

        Ok(Self { dst, edges, features })
    }

    /// Splits the member edges into active and inactive ones given the
    /// enabled feature set. Selection is exact-match: an edge is active
    /// iff its required features equal the enabled subset of this mux's
    /// features, except that an empty subset selects the default
    /// (featureless) edge when one exists.
    pub fn resolve(&self, graph: &Graph, enabled: &HashSet<String>)
        -> (Vec<EdgeKey>, Vec<EdgeKey>)
    {
        let mut active = Vec::new();
        let mut inactive = Vec::new();

        let candidates: BTreeSet<String> = self.features.iter()
            .filter(|f| enabled.contains(*f))
            .cloned()
            .collect();

        for idx in self.edges.iter() {
            let edge = graph.edge(*idx);
            let is_active = if candidates.is_empty() {
                /* Unconfigured mux: only a default edge conducts */
                edge.features.is_empty()
            } else {
                edge.features == candidates
            };
            if is_active {
                active.push(edge.key());
            } else {
                inactive.push(edge.key());
            }
        }
        (active, inactive)
    }
}

/// Finds every routing mux in the graph: a Sink or Port node with at least
/// two incoming edges, at least one of them feature-gated. Unannotated
/// fan-in (complete crossbars, shared direct wiring) is not a mux and gets
/// no activation state. Fails on an inconsistent feature family.
pub fn identify_muxes(graph: &Graph) -> Result<Vec<RoutingMux>, StructureError> {
    let mut muxes = Vec::new();

    for node in graph.nodes() {
        if !matches!(node.ntype, NodeType::Sink | NodeType::Port) {
            continue;
        }
        let edges = graph.edges_to(node.id);
        if edges.len() < 2 {
            continue;
        }
        let gated = edges.iter().any(|idx| {
            let edge = graph.edge(*idx);
            edge.kind == EdgeKind::MuxInput || !edge.features.is_empty()
        });
        if !gated {
            continue;
        }
        muxes.push(RoutingMux::new(graph, node.id, edges.to_vec())?);
    }

    dbg_log!(DBG_EXTRA, "Identified {} routing muxes", muxes.len());
    Ok(muxes)
}

/// Active and inactive edge keys accumulated over all muxes. Edges outside
/// both sets (unconditional wiring) are neither known-conducting nor
/// known-disconnected.
#[derive(Default)]
pub struct EdgeState {
    pub active: HashSet<EdgeKey>,
    pub inactive: HashSet<EdgeKey>,
}

impl EdgeState {
    pub fn is_active(&self, key: EdgeKey) -> bool {
        self.active.contains(&key)
    }

    pub fn is_inactive(&self, key: EdgeKey) -> bool {
        self.inactive.contains(&key)
    }
}

/// Resolves each mux against the enabled feature set. Two muxes may share
/// an edge only through fan-in sharing; them disagreeing about its state
/// is a fatal inconsistency.
pub fn resolve_activation(
    graph: &Graph,
    muxes: &[RoutingMux],
    enabled: &HashSet<String>
) -> Result<EdgeState, ConsistencyError> {
    let mut state = EdgeState::default();

    for mux in muxes.iter() {
        let (active, inactive) = mux.resolve(graph, enabled);
        state.active.extend(active);
        state.inactive.extend(inactive);
    }

    if let Some(key) = state.active.intersection(&state.inactive).next() {
        return Err(ConsistencyError::EdgeStateConflict {
            src: key.0.0,
            dst: key.1.0,
        });
    }

    dbg_log!(
        DBG_EXTRA,
        "Edge activation: {} active, {} inactive",
        state.active.len(),
        state.inactive.len()
    );
    Ok(state)
}
