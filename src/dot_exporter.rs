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

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::graph::{Edge, Graph, Net, NodeType};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColorBy {
    Type,
    Net,
}

impl FromStr for ColorBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "type" => Ok(Self::Type),
            "net" => Ok(Self::Net),
            _ => Err(format!("unknown coloring scheme `{}`", s)),
        }
    }
}

const NEUTRAL: &'static str = "#C0C0C0";

/* colorsys-style HLS conversion, for a stable rainbow over net ids */
fn hls_to_rgb(h: f64, l: f64, s: f64) -> (f64, f64, f64) {
    fn channel(m1: f64, m2: f64, hue: f64) -> f64 {
        let hue = hue.rem_euclid(1.0);
        if hue < 1.0 / 6.0 {
            m1 + (m2 - m1) * hue * 6.0
        } else if hue < 0.5 {
            m2
        } else if hue < 2.0 / 3.0 {
            m1 + (m2 - m1) * (2.0 / 3.0 - hue) * 6.0
        } else {
            m1
        }
    }

    if s == 0.0 {
        return (l, l, l);
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    (
        channel(m1, m2, h + 1.0 / 3.0),
        channel(m1, m2, h),
        channel(m1, m2, h - 1.0 / 3.0),
    )
}

fn net_color_map(graph: &Graph) -> BTreeMap<Net, String> {
    let nets: Vec<Net> = {
        let mut nets: Vec<Net> = graph.nodes()
            .filter_map(|node| node.net.clone())
            .collect();
        nets.sort();
        nets.dedup();
        nets
    };

    nets.iter()
        .enumerate()
        .map(|(i, net)| {
            let (r, g, b) = hls_to_rgb(i as f64 / nets.len() as f64, 0.5, 1.0);
            let color = format!(
                "#{:02X}{:02X}{:02X}",
                (r * 255.0) as u8,
                (g * 255.0) as u8,
                (b * 255.0) as u8
            );
            (net.clone(), color)
        })
        .collect()
}

/// The net an edge belongs to: defined only when both endpoints settled on
/// the same one.
fn edge_net(graph: &Graph, edge: &Edge) -> Option<Net> {
    let src = graph.node(edge.src).net.clone()?;
    let dst = graph.node(edge.dst).net.clone()?;
    (src == dst).then(|| src)
}

/// Renders the graph in Graphviz DOT format. Nodes are colored by kind or
/// by assigned net; `nets_only` drops everything which did not end up on
/// a net, which keeps decoded-output dumps readable.
pub fn export_dot(graph: &Graph, color_by: ColorBy, nets_only: bool) -> String {
    let net_colors = match color_by {
        ColorBy::Net => net_color_map(graph),
        ColorBy::Type => BTreeMap::new(),
    };

    let mut dot = vec![
        "digraph g {".to_string(),
        " rankdir=LR;".to_string(),
        " ratio=0.5;".to_string(),
        " splines=false;".to_string(),
        " node [style=filled];".to_string(),
    ];

    for node in graph.nodes() {
        if nets_only && node.net.is_none() {
            continue;
        }

        let parts: Vec<&str> = node.path.split('.').collect();
        let tail = parts[parts.len().saturating_sub(2) ..].join(".");
        let label = format!("{}: {}", node.id, tail);

        let xlabel = node.net.as_ref()
            .map(|net| net.to_string())
            .unwrap_or_default();

        let color = match color_by {
            ColorBy::Type => match node.ntype {
                NodeType::Source => "#C08080",
                NodeType::Sink => "#8080C0",
                NodeType::Port => NEUTRAL,
            },
            ColorBy::Net => node.net.as_ref()
                .map(|net| net_colors[net].as_str())
                .unwrap_or(NEUTRAL),
        };

        let shape = match node.ntype {
            NodeType::Source => "diamond",
            NodeType::Sink => "octagon",
            NodeType::Port => "ellipse",
        };

        dot.push(format!(
            " node_{} [label=\"{}\",xlabel=\"{}\",fillcolor=\"{}\",shape={}];",
            node.id, label, xlabel, color, shape
        ));
    }

    for edge in graph.edges() {
        let net = edge_net(graph, edge);
        if nets_only && net.is_none() {
            continue;
        }

        let color = match color_by {
            ColorBy::Net => net
                .map(|net| net_colors[&net].clone())
                .unwrap_or_else(|| NEUTRAL.to_string()),
            ColorBy::Type => NEUTRAL.to_string(),
        };

        dot.push(format!(
            " node_{} -> node_{} [label=\"{}\",color=\"{}\"];",
            edge.src, edge.dst, edge.ic, color
        ));
    }

    dot.push("}".to_string());
    dot.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, NodeId, PortType};
    use std::collections::BTreeSet;

    fn two_node_graph() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new();
        let a = graph.add_node(
            NodeType::Source,
            PortType::Output,
            "top[0].in[0]".to_string(),
        );
        let b = graph.add_node(
            NodeType::Sink,
            PortType::Input,
            "top[0][default].leaf[0].in[0]".to_string(),
        );
        graph.add_edge(a, b, EdgeKind::Direct, "ic", BTreeSet::new());
        graph.rebuild_index();
        (graph, a, b)
    }

    #[test]
    fn renders_all_nodes_and_edges() {
        let (graph, _, _) = two_node_graph();
        let dot = export_dot(&graph, ColorBy::Type, false);
        assert!(dot.starts_with("digraph g {"));
        assert!(dot.contains("node_0 ["));
        assert!(dot.contains("node_0 -> node_1"));
        assert!(dot.contains("shape=diamond"));
        assert!(dot.contains("shape=octagon"));
    }

    #[test]
    fn nets_only_hides_unassigned_nodes() {
        let (mut graph, a, _) = two_node_graph();
        graph.node_mut(a).net = Some(Net::Bound("clk".into()));
        let dot = export_dot(&graph, ColorBy::Net, true);
        assert!(dot.contains("node_0 ["));
        assert!(!dot.contains("node_1 ["));
        /* The edge's endpoints disagree, so it has no net either */
        assert!(!dot.contains("->"));
        assert!(dot.contains("xlabel=\"clk\""));
    }

    #[test]
    fn color_scheme_parses_from_str() {
        assert_eq!("type".parse::<ColorBy>().unwrap(), ColorBy::Type);
        assert_eq!("net".parse::<ColorBy>().unwrap(), ColorBy::Net);
        assert!("rainbow".parse::<ColorBy>().is_err());
    }
}
