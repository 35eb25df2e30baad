// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Netlist data model: wire states and flat wire/transistor storage.
//!
//! A netlist is stored struct-of-arrays: one slot per wire, one per
//! transistor, plus CSR adjacency for the two wire→transistor relations
//! (channel membership and gate drive). All arrays are sized once at load
//! and never grow; only wire states, pull pins and transistor conduction
//! bits mutate afterwards.

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Mask of states that read as logical high.
pub const ANY_HIGH: u8 =
    WireState::High as u8 | WireState::PulledHigh as u8 | WireState::FloatingHigh as u8;

/// Mask of states that read as logical low.
pub const ANY_LOW: u8 =
    WireState::Grounded as u8 | WireState::PulledLow as u8 | WireState::FloatingLow as u8;

/// The logical state of a wire.
///
/// Discriminants are single bits; membership in [`ANY_HIGH`]/[`ANY_LOW`]
/// is a mask test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WireState {
    /// Pinned high by an external pad or pullup.
    PulledHigh = 1,
    /// Pinned low by an external pad or pulldown.
    PulledLow = 2,
    /// Driven low through a conducting path to VSS.
    Grounded = 4,
    /// Driven high through a conducting path to VCC.
    High = 8,
    /// Isolated, last driven high; retains charge.
    FloatingHigh = 16,
    /// Isolated, last driven low; retains charge.
    FloatingLow = 32,
    /// Indeterminate initial state.
    Floating = 64,
}

impl WireState {
    /// The raw mask bit of this state.
    #[inline]
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// True for `High`, `PulledHigh` and `FloatingHigh`.
    #[inline]
    pub fn is_any_high(self) -> bool {
        self as u8 & ANY_HIGH != 0
    }

    /// True for `Grounded`, `PulledLow` and `FloatingLow`.
    #[inline]
    pub fn is_any_low(self) -> bool {
        self as u8 & ANY_LOW != 0
    }
}

/// External pin drive applied to a wire by a pad or pullup/pulldown.
///
/// Persists across recalc passes; it is the only external driving signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pull {
    #[default]
    None,
    High,
    Low,
}

/// Flat wire/transistor storage with CSR adjacency.
///
/// Wire slot `i` may be null (`present[i] == false`): an input that never
/// appears in the netlist. Null slots keep placeholder state and are
/// skipped by every operation. Two distinguished slots `vcc` and `gnd`
/// hold [`WireState::High`] and [`WireState::Grounded`] permanently.
#[derive(Debug, Clone)]
pub struct Netlist {
    pub(crate) names: Vec<CompactString>,
    pub(crate) name_to_wire: IndexMap<CompactString, usize>,
    pub(crate) present: Vec<bool>,
    pub(crate) states: Vec<WireState>,
    pub(crate) pulled: Vec<Pull>,

    /// CSR: transistors whose channel (side1/side2) wire `i` belongs to.
    pub(crate) ctrl_start: Vec<usize>,
    pub(crate) ctrl_ids: Vec<usize>,
    /// CSR: transistors whose gate wire `i` drives.
    pub(crate) gate_start: Vec<usize>,
    pub(crate) gate_ids: Vec<usize>,

    pub(crate) fet_gate: Vec<usize>,
    pub(crate) fet_side1: Vec<usize>,
    pub(crate) fet_side2: Vec<usize>,
    pub(crate) fet_on: Vec<bool>,
    pub(crate) fet_present: Vec<bool>,

    pub(crate) vcc: usize,
    pub(crate) gnd: usize,
}

impl Netlist {
    /// Number of wire slots, including null ones.
    pub fn num_wires(&self) -> usize {
        self.states.len()
    }

    /// Number of transistor slots, including null ones.
    pub fn num_fets(&self) -> usize {
        self.fet_gate.len()
    }

    /// Index of the VCC rail wire.
    #[inline]
    pub fn vcc(&self) -> usize {
        self.vcc
    }

    /// Index of the VSS rail wire.
    #[inline]
    pub fn gnd(&self) -> usize {
        self.gnd
    }

    /// Resolve a wire name to its slot index.
    pub fn wire_index(&self, name: &str) -> Option<usize> {
        self.name_to_wire.get(name).copied()
    }

    /// The name of wire `i` (empty for unnamed wires).
    pub fn wire_name(&self, i: usize) -> &str {
        &self.names[i]
    }

    /// Whether slot `i` holds a real wire.
    #[inline]
    pub fn is_present(&self, i: usize) -> bool {
        self.present[i]
    }

    /// Current logical state of wire `i`.
    #[inline]
    pub fn state(&self, i: usize) -> WireState {
        self.states[i]
    }

    /// External pin drive on wire `i`.
    #[inline]
    pub fn pulled(&self, i: usize) -> Pull {
        self.pulled[i]
    }

    /// Whether transistor `t` currently conducts between its channel wires.
    #[inline]
    pub fn fet_on(&self, t: usize) -> bool {
        self.fet_on[t]
    }

    /// Whether slot `t` holds a real transistor.
    #[inline]
    pub fn fet_is_present(&self, t: usize) -> bool {
        self.fet_present[t]
    }

    /// Gate wire index of transistor `t`.
    #[inline]
    pub fn fet_gate(&self, t: usize) -> usize {
        self.fet_gate[t]
    }

    /// First channel wire index of transistor `t`.
    #[inline]
    pub fn fet_side1(&self, t: usize) -> usize {
        self.fet_side1[t]
    }

    /// Second channel wire index of transistor `t`.
    #[inline]
    pub fn fet_side2(&self, t: usize) -> usize {
        self.fet_side2[t]
    }

    /// Transistors whose channel wire `i` participates in.
    #[inline]
    pub fn ctrl_fets(&self, i: usize) -> &[usize] {
        &self.ctrl_ids[self.ctrl_start[i]..self.ctrl_start[i + 1]]
    }

    /// Transistors gated by wire `i`.
    #[inline]
    pub fn gate_fets(&self, i: usize) -> &[usize] {
        &self.gate_ids[self.gate_start[i]..self.gate_start[i + 1]]
    }

    /// Combined adjacency degree of wire `i`, the capacitance proxy used
    /// for floating-region tie-breaks. A transistor listed in both
    /// relations of one wire is counted twice.
    #[inline]
    pub fn capacitance_proxy(&self, i: usize) -> usize {
        (self.ctrl_start[i + 1] - self.ctrl_start[i]) + (self.gate_start[i + 1] - self.gate_start[i])
    }

    /// Snapshot of every wire state, null slots included.
    pub fn wires_state(&self) -> Vec<WireState> {
        self.states.clone()
    }

    /// Snapshot of every transistor conduction bit, null slots included.
    pub fn fets_state(&self) -> Vec<bool> {
        self.fet_on.clone()
    }
}
