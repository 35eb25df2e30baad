// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Circuit file reader/writer and netlist builder.
//!
//! The on-disk circuit description is a single BARE-encoded record
//! ([`CircuitFile`]) holding flat wire and transistor tables plus two
//! variable-length adjacency streams. [`load_netlist`] turns a record into
//! validated [`Netlist`] storage; every structural violation surfaces as
//! [`LoadError::MalformedNetlist`] rather than a later panic in the solver.

use crate::netlist::{Netlist, Pull, WireState};
use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::io::{Read, Write};

/// End-of-segment sentinel in the adjacency streams.
pub const NEXT_CTRL: u32 = 0xFFFE;

/// Null transistor sentinel in the transistor wire-index tables.
pub const NO_WIRE: u32 = 0xFFFD;

/// Wire name required for the positive supply rail.
pub const VCC_NAME: &str = "VCC";

/// Wire name required for the ground rail.
pub const VSS_NAME: &str = "VSS";

/// Per-wire adjacency scratch list; real chips average a handful of fets
/// per wire.
type FetList = SmallVec<[usize; 8]>;

/// Serialized circuit record.
///
/// The two adjacency streams consist, for each wire `i` in order, of
/// `[count, id_0, …, id_{count-1}, NEXT_CTRL]`. A transistor slot with
/// `side1 == NO_WIRE` is null and must have `side2` and `gate` null too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitFile {
    #[serde(rename = "NUM_WIRES")]
    pub num_wires: u32,
    #[serde(rename = "NUM_FETS")]
    pub num_fets: u32,
    #[serde(rename = "WIRE_PULLED")]
    pub wire_pulled: Vec<u8>,
    #[serde(rename = "WIRE_NAMES")]
    pub wire_names: Vec<String>,
    #[serde(rename = "WIRE_CTRL_FETS")]
    pub wire_ctrl_fets: Vec<u32>,
    #[serde(rename = "WIRE_GATES")]
    pub wire_gates: Vec<u32>,
    #[serde(rename = "FET_SIDE1_WIRE_INDS")]
    pub fet_side1_wire_inds: Vec<u32>,
    #[serde(rename = "FET_SIDE2_WIRE_INDS")]
    pub fet_side2_wire_inds: Vec<u32>,
    #[serde(rename = "FET_GATE_INDS")]
    pub fet_gate_inds: Vec<u32>,
}

impl CircuitFile {
    /// Read a BARE-encoded circuit record.
    pub fn read_from<R: Read>(reader: R) -> Result<Self, LoadError> {
        serde_bare::from_reader(reader)
            .map_err(|e| LoadError::MalformedNetlist(format!("bad circuit file encoding: {}", e)))
    }

    /// Write this record in BARE encoding.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), LoadError> {
        serde_bare::to_writer(writer, self).map_err(|e| LoadError::Io(e.to_string()))
    }

    /// Assemble a record from a wire table and a transistor list.
    ///
    /// `fets` entries are `(gate, side1, side2)` wire indices; a null slot
    /// is written as `(NO_WIRE, NO_WIRE, NO_WIRE)`. The adjacency streams
    /// are derived: each non-null fet is listed in the control segment of
    /// both its channel wires (once, if they coincide) and in the gate
    /// segment of its gate wire.
    pub fn from_components(names: &[&str], pulled: &[u8], fets: &[(u32, u32, u32)]) -> Self {
        let num_wires = names.len();
        let mut ctrl: Vec<Vec<u32>> = vec![Vec::new(); num_wires];
        let mut gates: Vec<Vec<u32>> = vec![Vec::new(); num_wires];
        for (t, &(gate, side1, side2)) in fets.iter().enumerate() {
            if side1 == NO_WIRE {
                continue;
            }
            ctrl[side1 as usize].push(t as u32);
            if side2 != side1 {
                ctrl[side2 as usize].push(t as u32);
            }
            gates[gate as usize].push(t as u32);
        }

        let encode = |lists: &[Vec<u32>]| {
            let mut stream = Vec::new();
            for list in lists {
                stream.push(list.len() as u32);
                stream.extend_from_slice(list);
                stream.push(NEXT_CTRL);
            }
            stream
        };

        CircuitFile {
            num_wires: num_wires as u32,
            num_fets: fets.len() as u32,
            wire_pulled: pulled.to_vec(),
            wire_names: names.iter().map(|n| n.to_string()).collect(),
            wire_ctrl_fets: encode(&ctrl),
            wire_gates: encode(&gates),
            fet_side1_wire_inds: fets.iter().map(|f| f.1).collect(),
            fet_side2_wire_inds: fets.iter().map(|f| f.2).collect(),
            fet_gate_inds: fets.iter().map(|f| f.0).collect(),
        }
    }
}

/// Circuit loading failure.
#[derive(Debug)]
pub enum LoadError {
    /// Structural violation in the circuit record.
    MalformedNetlist(String),
    /// Underlying reader/writer failure.
    Io(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::MalformedNetlist(msg) => write!(f, "malformed netlist: {}", msg),
            LoadError::Io(msg) => write!(f, "circuit file I/O error: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

fn malformed<T>(msg: String) -> Result<T, LoadError> {
    Err(LoadError::MalformedNetlist(msg))
}

/// Decode one adjacency stream into per-wire fet lists.
fn parse_adjacency(
    stream: &[u32],
    num_wires: usize,
    num_fets: usize,
    what: &str,
) -> Result<Vec<FetList>, LoadError> {
    let mut lists = Vec::with_capacity(num_wires);
    let mut pos = 0usize;
    for wire in 0..num_wires {
        let Some(&count) = stream.get(pos) else {
            return malformed(format!("{} stream truncated at wire {}", what, wire));
        };
        pos += 1;
        let count = count as usize;
        let mut list = FetList::new();
        for k in 0..count {
            let Some(&id) = stream.get(pos) else {
                return malformed(format!("{} stream truncated in wire {} segment", what, wire));
            };
            pos += 1;
            if id as usize >= num_fets {
                return malformed(format!(
                    "{} entry {} of wire {} references fet {} out of {}",
                    what, k, wire, id, num_fets
                ));
            }
            list.push(id as usize);
        }
        match stream.get(pos) {
            Some(&NEXT_CTRL) => pos += 1,
            Some(&other) => {
                return malformed(format!(
                    "{} segment of wire {} ends with {:#06x} instead of NEXT_CTRL",
                    what, wire, other
                ))
            }
            None => return malformed(format!("{} stream missing sentinel for wire {}", what, wire)),
        }
        lists.push(list);
    }
    if pos != stream.len() {
        return malformed(format!(
            "{} stream has {} trailing words after the last segment",
            what,
            stream.len() - pos
        ));
    }
    Ok(lists)
}

/// Build validated netlist storage from a circuit record.
pub fn load_netlist(file: &CircuitFile) -> Result<Netlist, LoadError> {
    let num_wires = file.num_wires as usize;
    let num_fets = file.num_fets as usize;

    if num_wires >= NO_WIRE as usize {
        return malformed(format!(
            "wire count {} collides with the sentinel space",
            num_wires
        ));
    }
    if file.wire_names.len() != num_wires || file.wire_pulled.len() != num_wires {
        return malformed(format!(
            "wire table sizes ({} names, {} pulled) do not match NUM_WIRES = {}",
            file.wire_names.len(),
            file.wire_pulled.len(),
            num_wires
        ));
    }
    if file.fet_side1_wire_inds.len() != num_fets
        || file.fet_side2_wire_inds.len() != num_fets
        || file.fet_gate_inds.len() != num_fets
    {
        return malformed(format!(
            "fet table sizes ({}, {}, {}) do not match NUM_FETS = {}",
            file.fet_side1_wire_inds.len(),
            file.fet_side2_wire_inds.len(),
            file.fet_gate_inds.len(),
            num_fets
        ));
    }

    let ctrl = parse_adjacency(&file.wire_ctrl_fets, num_wires, num_fets, "WIRE_CTRL_FETS")?;
    let gates = parse_adjacency(&file.wire_gates, num_wires, num_fets, "WIRE_GATES")?;

    let mut pulled = Vec::with_capacity(num_wires);
    for (i, &code) in file.wire_pulled.iter().enumerate() {
        pulled.push(match code {
            0 => Pull::None,
            1 => Pull::High,
            2 => Pull::Low,
            other => {
                return malformed(format!("wire {} has unknown pulled code {}", i, other));
            }
        });
    }

    let mut names = Vec::with_capacity(num_wires);
    let mut name_to_wire = IndexMap::new();
    let mut present = Vec::with_capacity(num_wires);
    for i in 0..num_wires {
        let name = CompactString::from(file.wire_names[i].as_str());
        if !name.is_empty() {
            name_to_wire.insert(name.clone(), i);
        }
        present.push(!name.is_empty() || !ctrl[i].is_empty() || !gates[i].is_empty());
        names.push(name);
    }

    let Some(&vcc) = name_to_wire.get(VCC_NAME) else {
        return malformed(format!("required wire \"{}\" is missing", VCC_NAME));
    };
    let Some(&gnd) = name_to_wire.get(VSS_NAME) else {
        return malformed(format!("required wire \"{}\" is missing", VSS_NAME));
    };

    let mut fet_gate = Vec::with_capacity(num_fets);
    let mut fet_side1 = Vec::with_capacity(num_fets);
    let mut fet_side2 = Vec::with_capacity(num_fets);
    let mut fet_present = Vec::with_capacity(num_fets);
    for t in 0..num_fets {
        let s1 = file.fet_side1_wire_inds[t];
        let s2 = file.fet_side2_wire_inds[t];
        let g = file.fet_gate_inds[t];
        if s1 == NO_WIRE {
            if s2 != NO_WIRE || g != NO_WIRE {
                return malformed(format!(
                    "null fet {} has side2 {:#06x} / gate {:#06x} instead of NO_WIRE",
                    t, s2, g
                ));
            }
            fet_gate.push(0);
            fet_side1.push(0);
            fet_side2.push(0);
            fet_present.push(false);
            continue;
        }
        for (label, ind) in [("side1", s1), ("side2", s2), ("gate", g)] {
            if ind as usize >= num_wires {
                return malformed(format!(
                    "fet {} {} references wire {} out of {}",
                    t, label, ind, num_wires
                ));
            }
        }
        fet_gate.push(g as usize);
        fet_side1.push(s1 as usize);
        fet_side2.push(s2 as usize);
        fet_present.push(true);
    }

    // Cross-check both directions of the two adjacency relations: the
    // solver indexes them unchecked on the hot path.
    for (i, list) in ctrl.iter().enumerate() {
        for &t in list {
            if !fet_present[t] || (fet_side1[t] != i && fet_side2[t] != i) {
                return malformed(format!(
                    "wire {} lists fet {} as channel member but the fet does not touch it",
                    i, t
                ));
            }
        }
    }
    for (i, list) in gates.iter().enumerate() {
        for &t in list {
            if !fet_present[t] || fet_gate[t] != i {
                return malformed(format!(
                    "wire {} lists fet {} as gated but the fet gate is elsewhere",
                    i, t
                ));
            }
        }
    }
    for t in 0..num_fets {
        if !fet_present[t] {
            continue;
        }
        for side in [fet_side1[t], fet_side2[t]] {
            if !ctrl[side].contains(&t) {
                return malformed(format!(
                    "fet {} side wire {} does not list it in its control set",
                    t, side
                ));
            }
        }
        if !gates[fet_gate[t]].contains(&t) {
            return malformed(format!(
                "fet {} gate wire {} does not list it in its gate set",
                t,
                fet_gate[t]
            ));
        }
    }

    let build_csr = |lists: &[FetList]| {
        let mut start = Vec::with_capacity(num_wires + 1);
        let mut ids = Vec::with_capacity(lists.iter().map(|l| l.len()).sum());
        start.push(0);
        for list in lists {
            ids.extend_from_slice(list);
            start.push(ids.len());
        }
        (start, ids)
    };
    let (ctrl_start, ctrl_ids) = build_csr(&ctrl);
    let (gate_start, gate_ids) = build_csr(&gates);

    let mut states = vec![WireState::Floating; num_wires];
    states[vcc] = WireState::High;
    states[gnd] = WireState::Grounded;

    // Fets whose gate sits on the supply rail conduct from the start.
    let fet_on = (0..num_fets)
        .map(|t| fet_present[t] && fet_gate[t] == vcc)
        .collect::<Vec<_>>();

    let num_null_wires = present.iter().filter(|&&p| !p).count();
    let num_null_fets = fet_present.iter().filter(|&&p| !p).count();
    clilog::info!(
        "loaded circuit: {} wires ({} null), {} fets ({} null)",
        num_wires,
        num_null_wires,
        num_fets,
        num_null_fets
    );

    Ok(Netlist {
        names,
        name_to_wire,
        present,
        states,
        pulled,
        ctrl_start,
        ctrl_ids,
        gate_start,
        gate_ids,
        fet_gate,
        fet_side1,
        fet_side2,
        fet_on,
        fet_present,
        vcc,
        gnd,
    })
}

/// Read and build a netlist in one step.
pub fn load_netlist_from<R: Read>(reader: R) -> Result<Netlist, LoadError> {
    load_netlist(&CircuitFile::read_from(reader)?)
}
