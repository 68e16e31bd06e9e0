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

use crate::errors::StructureError;

/// One segment of a dot-separated hierarchical path: `<name>[<index>][<mode>]`.
/// Both the index and the mode bracket are optional.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
    pub name: String,
    pub index: Option<u32>,
    pub mode: Option<String>,
}

impl PathNode {
    pub fn new(name: &str, index: Option<u32>, mode: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            index,
            mode: mode.map(str::to_string),
        }
    }

    pub fn from_string(s: &str) -> Result<Self, StructureError> {
        let malformed = || StructureError::MalformedPinRef(s.to_string());

        let name_end = s.find('[').unwrap_or(s.len());
        let name = &s[.. name_end];
        if name.is_empty() {
            return Err(malformed());
        }

        let mut index = None;
        let mut mode = None;
        let mut rest = &s[name_end ..];
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(malformed());
            }
            let close = rest.find(']').ok_or_else(malformed)?;
            let inner = &rest[1 .. close];
            if inner.is_empty() {
                return Err(malformed());
            }

            /* The first bracket, if numeric, is the index. Anything else is
             * the mode tag and must come last. */
            match inner.parse::<u32>() {
                Ok(i) if index.is_none() && mode.is_none() => index = Some(i),
                _ if mode.is_none() => mode = Some(inner.to_string()),
                _ => return Err(malformed()),
            }
            rest = &rest[close + 1 ..];
        }

        Ok(Self { name: name.to_string(), index, mode })
    }

    /// The segment without its mode bracket.
    pub fn without_mode(&self) -> Self {
        Self {
            name: self.name.clone(),
            index: self.index,
            mode: None,
        }
    }
}

impl std::fmt::Display for PathNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(index) = self.index {
            write!(f, "[{}]", index)?;
        }
        if let Some(ref mode) = self.mode {
            write!(f, "[{}]", mode)?;
        }
        Ok(())
    }
}

/// Parses a full dot-separated path into segments.
pub fn parse_path(path: &str) -> Result<Vec<PathNode>, StructureError> {
    path.split('.').map(PathNode::from_string).collect()
}

/// Whether any segment of the path carries a mode tag. Every node below
/// the top block has one (the top segment gets its mode appended during
/// graph construction), while the top block's own pins never do — this is
/// what tells an external pin apart from internal ones, regardless of how
/// many segments the instance path itself has.
pub fn has_mode_tag(path: &str) -> Result<bool, StructureError> {
    Ok(parse_path(path)?.iter().any(|seg| seg.mode.is_some()))
}

/// Derives a deterministic cell instance name from a node path prefix:
/// mode tags are stripped and indices get concatenated with the segment
/// names, e.g. `clb[0][default].fle[3].lut4[0]` -> `clb_0.fle_3.lut4_0`.
pub fn instance_name(path: &str) -> Result<String, StructureError> {
    let segments = parse_path(path)?;
    let parts: Vec<String> = segments.iter()
        .map(|seg| match seg.index {
            Some(index) => format!("{}_{}", seg.name, index),
            None => seg.name.clone(),
        })
        .collect();
    Ok(parts.join("."))
}

/// Strips the trailing `[<bit>]` selection index off a FASM feature,
/// yielding its feature family. Fails on features that do not follow the
/// `<name>[<bit>]` shape.
pub fn feature_family(feature: &str) -> Result<&str, StructureError> {
    let malformed = || StructureError::MalformedFeature(feature.to_string());

    if !feature.ends_with(']') {
        return Err(malformed());
    }
    let open = feature.rfind('[').ok_or_else(malformed)?;
    let bit = &feature[open + 1 .. feature.len() - 1];
    if open == 0 || bit.is_empty() || !bit.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    Ok(&feature[.. open])
}
