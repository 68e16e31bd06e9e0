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

use thiserror::Error;

/// Malformed input description. Always fatal, no partial result is usable.
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("can't open file: {0}")]
    CantOpenFile(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("missing mandatory section `{0}`")]
    MissingSection(String),
    #[error("unknown block type `{0}`")]
    UnknownBlockType(String),
    #[error("unresolved pin reference `{reference}` in `{context}`")]
    UnresolvedPin {
        reference: String,
        context: String,
    },
    #[error("malformed pin reference `{0}`")]
    MalformedPinRef(String),
    #[error("malformed FASM feature `{0}` (expected `<name>[<bit>]`)")]
    MalformedFeature(String),
    #[error("interconnect `{conn}` connects {inputs} input pin(s) to {outputs} output pin(s)")]
    WidthMismatch {
        conn: String,
        inputs: usize,
        outputs: usize,
    },
    #[error("routing mux at `{node}` has inconsistent FASM feature families: {families:?}")]
    InconsistentMuxFeatures {
        node: String,
        families: Vec<String>,
    },
    #[error("routing mux at `{0}` has more than one edge with no FASM features")]
    AmbiguousDefaultEdge(String),
    #[error("invalid name `{0}` (names must not contain `.`, `[` or `]`)")]
    InvalidName(String),
    #[error("duplicate instance path `{0}`")]
    DuplicateInstance(String),
}

/// Internal decode inconsistency. Fatal for the affected decode pass, but
/// independent passes are not corrupted.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("edge {src} -> {dst} is resolved both active and inactive")]
    EdgeStateConflict {
        src: usize,
        dst: usize,
    },
    #[error("refusing to merge two bound nets `{a}` and `{b}`")]
    FrozenMergeConflict {
        a: String,
        b: String,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("structure error: {0}")]
    Structure(#[from] StructureError),
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
}
