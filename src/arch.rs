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
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::errors::StructureError;
use crate::paths::instance_name;

/// Direction of a block port, leaf convention: inputs and clocks are
/// consumed by the block, outputs are driven by it. The top-level block's
/// external interface inverts this when graph nodes are created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Input,
    Output,
    Clock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortDef {
    pub name: String,
    #[serde(default = "one")]
    pub width: u32,
    pub kind: PortKind,
}

fn one() -> u32 {
    1
}

/// Special handling classes for leaf blocks. Only `lut` matters to the
/// graph builder: such leaves get an extra synthesized hierarchy level to
/// mirror how packed netlists name them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockClass {
    Lut,
    Flipflop,
    Memory,
}

/// One connection spec of an interconnect list. Pin references follow the
/// VPR convention: `<block>.<port>`, either side optionally indexed
/// (`fle[3]`) or ranged (`in[3:0]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnDef {
    Direct {
        name: String,
        input: String,
        output: String,
        /* A literal feature list; applies to every expanded pin pair. */
        #[serde(default)]
        features: Vec<String>,
    },
    Mux {
        name: String,
        inputs: Vec<String>,
        output: String,
        /* Per-input-pin feature lists, keyed by the input reference. */
        #[serde(default)]
        features: BTreeMap<String, Vec<String>>,
    },
    Complete {
        name: String,
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
}

impl ConnDef {
    pub fn name(&self) -> &str {
        match self {
            ConnDef::Direct { name, .. } => name,
            ConnDef::Mux { name, .. } => name,
            ConnDef::Complete { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeDef {
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<BlockDef>,
    #[serde(default)]
    pub interconnect: Vec<ConnDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockDef {
    pub name: String,
    /// Number of instances of this block within its parent.
    #[serde(default = "one")]
    pub num_pb: u32,
    #[serde(default)]
    pub class: Option<BlockClass>,
    /// FASM prefix contributed by this block, accumulated down the
    /// hierarchy when features are attached to edges.
    #[serde(default)]
    pub fasm_prefix: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortDef>,
    #[serde(default)]
    pub modes: Vec<ModeDef>,
    /* Blocks with no explicit modes keep their children and interconnect
     * inline; `modes()` presents them as a single implicit default mode. */
    #[serde(default)]
    pub blocks: Vec<BlockDef>,
    #[serde(default)]
    pub interconnect: Vec<ConnDef>,
}

/// A borrowed view of one operating mode, explicit or implicit.
pub struct ModeView<'a> {
    pub name: &'a str,
    pub blocks: &'a [BlockDef],
    pub interconnect: &'a [ConnDef],
}

pub const DEFAULT_MODE: &'static str = "default";

impl BlockDef {
    pub fn is_leaf(&self) -> bool {
        self.modes.is_empty() && self.blocks.is_empty()
    }

    pub fn is_lut_class(&self) -> bool {
        matches!(self.class, Some(BlockClass::Lut))
    }

    /// All operating modes of this block. A block with no declared modes
    /// has one implicit default mode.
    pub fn modes(&self) -> Vec<ModeView<'_>> {
        if self.modes.is_empty() {
            vec![ModeView {
                name: DEFAULT_MODE,
                blocks: &self.blocks,
                interconnect: &self.interconnect,
            }]
        } else {
            self.modes.iter()
                .map(|mode| ModeView {
                    name: &mode.name,
                    blocks: &mode.blocks,
                    interconnect: &mode.interconnect,
                })
                .collect()
        }
    }

    pub fn find_port(&self, name: &str) -> Option<&PortDef> {
        self.ports.iter().find(|port| port.name == name)
    }
}

/// One placed composite block to decode. Stands in for the tile grid of
/// the original flow: the FASM prefix selects this instance's features and
/// `pins` binds external pins to top-level net names.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceDef {
    pub path: String,
    pub block: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub pins: BTreeMap<String, String>,
}

impl InstanceDef {
    pub fn fasm_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Arch {
    pub name: String,
    pub blocks: Vec<BlockDef>,
    #[serde(default)]
    pub instances: Vec<InstanceDef>,
}

impl Arch {
    /// Loads a block description from a JSON or YAML file, transparently
    /// decompressing `.gz` inputs.
    pub fn from_file<P>(path: P) -> Result<Self, StructureError> where
        P: AsRef<Path>
    {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;

        let mut name = path.to_string_lossy().to_string();
        let gzipped = name.ends_with(".gz");
        if gzipped {
            name.truncate(name.len() - ".gz".len());
        }

        let mut data = String::new();
        if gzipped {
            BufReader::new(GzDecoder::new(file)).read_to_string(&mut data)
        } else {
            BufReader::new(file).read_to_string(&mut data)
        }.map_err(|e| StructureError::CantOpenFile(format!("{:?}", e)))?;

        let arch: Arch = if name.ends_with(".yaml") || name.ends_with(".yml") {
            serde_yaml::from_str(&data)
                .map_err(|e| StructureError::ParseError(format!("{}", e)))?
        } else {
            serde_json::from_str(&data)
                .map_err(|e| StructureError::ParseError(format!("{}", e)))?
        };

        if arch.blocks.is_empty() {
            return Err(StructureError::MissingSection("blocks".into()));
        }
        arch.validate()?;
        Ok(arch)
    }

    /// Rejects descriptions the decoder cannot process: block, port and
    /// mode names which would be unparseable inside node paths, and placed
    /// instances whose paths collide once normalized to cell names.
    pub fn validate(&self) -> Result<(), StructureError> {
        for block in self.blocks.iter() {
            validate_block(block)?;
        }

        let mut seen = std::collections::HashSet::new();
        for instance in self.instances.iter() {
            if !seen.insert(instance_name(&instance.path)?) {
                return Err(StructureError::DuplicateInstance(
                    instance.path.clone(),
                ));
            }
        }
        Ok(())
    }

    pub fn find_block(&self, name: &str) -> Result<&BlockDef, StructureError> {
        self.blocks.iter()
            .find(|block| block.name == name)
            .ok_or_else(|| StructureError::UnknownBlockType(name.to_string()))
    }
}

/* Names end up as path segments, so the path syntax characters are off
 * limits in them. */
fn valid_name(name: &str) -> Result<(), StructureError> {
    if name.is_empty() || name.contains(|c| matches!(c, '.' | '[' | ']')) {
        return Err(StructureError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_block(block: &BlockDef) -> Result<(), StructureError> {
    valid_name(&block.name)?;
    for port in block.ports.iter() {
        valid_name(&port.name)?;
    }
    for mode in block.modes() {
        valid_name(mode.name)?;
        for child in mode.blocks.iter() {
            validate_block(child)?;
        }
    }
    Ok(())
}
