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

use clap::Parser;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod log;
pub mod common;
pub mod errors;
pub mod paths;
pub mod arch;
pub mod graph;
pub mod mux;
pub mod decoder;
pub mod netlist;
pub mod dot_exporter;

use crate::arch::{Arch, InstanceDef};
use crate::common::split_range_nicely;
use crate::decoder::{boundary_from_pins, Decoder, PruneReport};
use crate::dot_exporter::{export_dot, ColorBy};
use crate::errors::{DecodeError, StructureError};
use crate::graph::builder::GraphBuilder;
use crate::graph::NetPool;
#[allow(unused)]
use crate::log::*;
use crate::mux::{identify_muxes, resolve_activation};
use crate::netlist::Netlist;

#[derive(Parser, Debug)]
#[clap(
    author = "Antmicro",
    version = "0.1.0",
    about = "FND - FASM Netlist Decoder",
    long_about = None
)]
struct Args {
    #[clap(help = "Block description file (JSON/YAML, optionally gzipped)")]
    arch: String,
    #[command(subcommand)]
    command: SubCommands,
}

#[derive(Parser, Debug)]
struct DecodeCmd {
    #[arg(help = "File with enabled FASM features, one canonical feature per line")]
    features: String,
    #[arg(help = "Output netlist JSON file")]
    netlist: String,
    #[arg(
        long,
        default_value = "1",
        help = "Number of threads to be used during decoding"
    )]
    threads: usize,
    #[arg(long, help = "Operating modes to treat as physically realized")]
    keep_mode: Option<Vec<String>>,
    #[arg(
        long,
        help = "Block types to have their routing graphs exported to graphviz .dot files"
    )]
    dot: Option<Vec<String>>,
    #[arg(long, default_value = "", help = "Directory for saving .dot files")]
    dot_prefix: String,
}

#[derive(Parser, Debug)]
struct DumpGraphCmd {
    #[arg(help = "Block type")]
    block: String,
    #[arg(long, help = "Output .dot file (stdout when not given)")]
    out: Option<String>,
    #[arg(long, default_value = "type", help = "Color nodes by `type` or `net`")]
    color_by: ColorBy,
}

#[derive(Parser, Debug)]
enum SubCommands {
    Decode(DecodeCmd),
    DumpGraph(DumpGraphCmd),
}

/// Reads the enabled-feature set: one canonical feature per line, `#`
/// starts a comment.
fn load_features(path: &str) -> Result<HashSet<String>, StructureError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;

    Ok(data.lines()
        .map(|line| {
            let line = line.split('#').next().unwrap_or("");
            line.trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Selects the features belonging to one placed instance and strips its
/// prefix off them.
fn instance_features(features: &HashSet<String>, prefix: &str) -> HashSet<String> {
    features.iter()
        .filter_map(|feature| {
            feature.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
        })
        .map(str::to_string)
        .collect()
}

fn decode_instance(
    arch: &Arch,
    instance: &InstanceDef,
    features: &HashSet<String>,
    keep_modes: &[String],
    pool: &Arc<Mutex<NetPool>>
) -> Result<(Netlist, PruneReport), DecodeError> {
    dbg_log!(DBG_INFO, "Decoding instance {}", instance.path);
    let enabled = instance_features(features, instance.fasm_prefix());

    let mut graph = GraphBuilder::build(arch, &instance.block, Some(&instance.path))?;
    graph.prune_modes(keep_modes);

    let muxes = identify_muxes(&graph)?;
    let state = resolve_activation(&graph, &muxes, &enabled)?;
    let boundary = boundary_from_pins(&graph, &instance.path, &instance.pins)?;

    let mut decoder = Decoder::new(graph, Arc::clone(pool));
    decoder.propagate_nets(&boundary, &state)?;
    let report = decoder.prune();

    let netlist = netlist::instantiate(decoder.graph(), arch, &instance.block)?;
    Ok((netlist, report))
}

fn export_graphs(args: &DecodeCmd, arch: &Arch) -> Result<(), DecodeError> {
    let block_types = match &args.dot {
        Some(block_types) => block_types,
        None => return Ok(()),
    };

    for block_type in block_types {
        let mut graph = GraphBuilder::build(arch, block_type, None)?;
        graph.prune_modes(args.keep_mode.as_deref().unwrap_or(&[]));

        let path = Path::new(&args.dot_prefix).join(format!("{}.dot", block_type));
        dbg_log!(DBG_INFO, "Exporting routing graph to {:?}", path);
        let mut file = File::create(&path)
            .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;
        file.write_all(export_dot(&graph, ColorBy::Type, false).as_bytes())
            .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;
    }
    Ok(())
}

fn decode(args: DecodeCmd, arch: Arch) -> Result<(), DecodeError> {
    let features = load_features(&args.features)?;
    if arch.instances.is_empty() {
        return Err(StructureError::MissingSection("instances".into()).into());
    }

    export_graphs(&args, &arch)?;

    let keep_modes = args.keep_mode.clone().unwrap_or_default();
    let num_instances = arch.instances.len();
    let pool = Arc::new(Mutex::new(NetPool::new()));

    let mut netlist = Netlist::new();
    let mut report = PruneReport::default();
    let mut merge = |part: (Netlist, PruneReport)| {
        netlist.merge(part.0);
        report.removed_nets += part.1.removed_nets;
        report.removed_instances += part.1.removed_instances;
    };

    if args.threads == 1 {
        for instance in arch.instances.iter() {
            merge(decode_instance(&arch, instance, &features, &keep_modes, &pool)?);
        }
    } else {
        let arch = Arc::new(arch);
        let features = Arc::new(features);
        let keep_modes = Arc::new(keep_modes);

        let mut handles = Vec::new();
        for range in split_range_nicely(0 .. arch.instances.len(), args.threads) {
            let arch = Arc::clone(&arch);
            let features = Arc::clone(&features);
            let keep_modes = Arc::clone(&keep_modes);
            let pool = Arc::clone(&pool);

            handles.push(std::thread::spawn(move || {
                let mut parts = Vec::new();
                for instance in &arch.instances[range] {
                    parts.push(decode_instance(
                        &arch,
                        instance,
                        &features,
                        &keep_modes,
                        &pool,
                    )?);
                }
                Ok::<_, DecodeError>(parts)
            }));
        }
        for handle in handles {
            for part in handle.join().unwrap()? {
                merge(part);
            }
        }
    }

    println!(concat!(
        "Decoded {} instance(s):\n",
        "    No. of emitted cells:         {}\n",
        "    No. of pruned nets:           {}\n",
        "    No. of pruned sub-instances:  {}"
        ),
        num_instances,
        netlist.len(),
        report.removed_nets,
        report.removed_instances
    );

    let file = File::create(&args.netlist)
        .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;
    serde_json::to_writer_pretty(file, &netlist)
        .map_err(|e| StructureError::ParseError(format!("{}", e)))?;
    Ok(())
}

fn dump_graph(args: DumpGraphCmd, arch: Arch) -> Result<(), DecodeError> {
    let mut graph = GraphBuilder::build(&arch, &args.block, None)?;
    graph.prune_modes(&[]);

    let dot = export_dot(&graph, args.color_by, false);
    match args.out {
        Some(path) => {
            let mut file = File::create(&path)
                .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;
            file.write_all(dot.as_bytes())
                .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;
        }
        None => println!("{}", dot),
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let SubCommands::Decode(decode) = &args.command {
        assert!(decode.threads != 0);
    }

    let arch = Arch::from_file(&args.arch)
        .expect("Couldn't load the block description");

    let result = match args.command {
        SubCommands::Decode(sargs) => decode(sargs, arch),
        SubCommands::DumpGraph(sargs) => dump_graph(sargs, arch),
    };

    if let Err(e) = result {
        dbg_log!(DBG_CRITICAL, "{}", e);
        std::process::exit(1);
    }
}
