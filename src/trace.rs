// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! State trace capture for cross-run comparison.
//!
//! A [`TraceLog`] records one frame per half-clock: the full wire-state
//! and transistor-conduction snapshots of a [`Simulator`]. Two captured
//! logs can be diffed to locate the first half-clock and slot where two
//! runs (e.g. two solver revisions on the same circuit) disagree, and
//! exported in BARE encoding for offline inspection.

use crate::netlist::WireState;
use crate::sim::Simulator;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One captured snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    /// Half-clock count at capture time.
    pub half_clock: u64,
    /// Wire states, null slots included.
    pub wire_states: Vec<WireState>,
    /// Transistor conduction bits, null slots included.
    pub fet_states: Vec<bool>,
}

/// First point where two trace logs disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceDivergence {
    /// Index of the first mismatching frame.
    pub frame: usize,
    /// Half-clock count of that frame.
    pub half_clock: u64,
    /// First mismatching wire slot, if the wire snapshots differ.
    pub wire: Option<usize>,
    /// First mismatching transistor slot, if the fet snapshots differ.
    pub fet: Option<usize>,
}

/// Trace capture error.
#[derive(Debug)]
pub enum TraceError {
    /// Underlying reader/writer failure.
    Io(String),
    /// The byte stream is not a valid trace log.
    Format(String),
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::Io(msg) => write!(f, "trace I/O error: {}", msg),
            TraceError::Format(msg) => write!(f, "bad trace log: {}", msg),
        }
    }
}

impl std::error::Error for TraceError {}

/// An append-only sequence of [`TraceFrame`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceLog {
    frames: Vec<TraceFrame>,
}

impl TraceLog {
    pub fn new() -> Self {
        TraceLog::default()
    }

    /// Capture the simulator's current state as one frame.
    pub fn record(&mut self, sim: &Simulator) {
        self.frames.push(TraceFrame {
            half_clock: sim.half_clock_count(),
            wire_states: sim.wires_state(),
            fet_states: sim.fets_state(),
        });
    }

    /// Captured frames, in record order.
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// Write the log in BARE encoding.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), TraceError> {
        serde_bare::to_writer(writer, self).map_err(|e| TraceError::Io(e.to_string()))
    }

    /// Read a BARE-encoded log.
    pub fn read_from<R: Read>(reader: R) -> Result<Self, TraceError> {
        serde_bare::from_reader(reader).map_err(|e| TraceError::Format(e.to_string()))
    }

    /// Locate the first frame where two logs disagree.
    ///
    /// Returns `None` when both logs are identical. A length mismatch
    /// with an otherwise equal prefix reports the first unmatched frame
    /// with no wire/fet detail.
    pub fn diff(&self, other: &TraceLog) -> Option<TraceDivergence> {
        let shared = self.frames.len().min(other.frames.len());
        for i in 0..shared {
            let (a, b) = (&self.frames[i], &other.frames[i]);
            if a == b {
                continue;
            }
            let wire = a
                .wire_states
                .iter()
                .zip(&b.wire_states)
                .position(|(x, y)| x != y);
            let fet = a
                .fet_states
                .iter()
                .zip(&b.fet_states)
                .position(|(x, y)| x != y);
            return Some(TraceDivergence { frame: i, half_clock: a.half_clock, wire, fet });
        }
        if self.frames.len() != other.frames.len() {
            let longer = if self.frames.len() > shared { self } else { other };
            return Some(TraceDivergence {
                frame: shared,
                half_clock: longer.frames[shared].half_clock,
                wire: None,
                fet: None,
            });
        }
        None
    }
}
