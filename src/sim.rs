// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Simulator facade: the public surface a chip driver talks to.
//!
//! [`Simulator`] bundles the netlist storage with a [`WireCalculator`] and
//! exposes pin control, recalc entry points and state probes. Pinning a
//! wire never triggers a recalc by itself; the driver batches its pin
//! writes and then invokes one of the `recalc_*` operations. The driver
//! also owns forward progress: it calls [`Simulator::advance_half_clock`]
//! once per clock transition, which arms the non-convergence error for
//! every later recalc.

use crate::loader::{load_netlist, CircuitFile, LoadError};
use crate::netlist::{Netlist, Pull, WireState};
use crate::solver::{SolveCounters, SolveError, WireCalculator};

/// Facade-level failure.
#[derive(Debug)]
pub enum SimError {
    /// A name-keyed operation referenced a wire that does not exist.
    UnknownWire(String),
    /// The solver hit its step limit after the first half-clock.
    DidNotConverge {
        /// Number of passes executed before giving up.
        passes: usize,
    },
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::UnknownWire(name) => write!(f, "unknown wire \"{}\"", name),
            SimError::DidNotConverge { passes } => {
                write!(f, "wire recalculation did not converge after {} passes", passes)
            }
        }
    }
}

impl std::error::Error for SimError {}

impl From<SolveError> for SimError {
    fn from(e: SolveError) -> Self {
        match e {
            SolveError::DidNotConverge { passes } => SimError::DidNotConverge { passes },
        }
    }
}

/// A loaded circuit ready for simulation.
pub struct Simulator {
    netlist: Netlist,
    calc: WireCalculator,
    half_clock_count: u64,
}

impl Simulator {
    /// Wrap already-built netlist storage.
    pub fn new(netlist: Netlist) -> Self {
        let calc = WireCalculator::new(&netlist);
        Simulator { netlist, calc, half_clock_count: 0 }
    }

    /// Build a simulator from a circuit record.
    pub fn from_circuit_file(file: &CircuitFile) -> Result<Self, LoadError> {
        Ok(Simulator::new(load_netlist(file)?))
    }

    /// Read-only access to the netlist storage.
    pub fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    /// Count of completed clock transitions, as reported by the driver.
    pub fn half_clock_count(&self) -> u64 {
        self.half_clock_count
    }

    /// Record one clock transition. After the first call, recalcs that
    /// hit the step limit return [`SimError::DidNotConverge`] instead of
    /// keeping quiet.
    pub fn advance_half_clock(&mut self) -> u64 {
        self.half_clock_count += 1;
        self.half_clock_count
    }

    /// Resolve a wire name.
    pub fn wire_index(&self, name: &str) -> Result<usize, SimError> {
        self.netlist
            .wire_index(name)
            .ok_or_else(|| SimError::UnknownWire(name.to_string()))
    }

    /// Pin wire `i` high or low. Null slots are skipped; no recalc runs.
    pub fn set_pulled(&mut self, wire: usize, high: bool) {
        if !self.netlist.present[wire] {
            return;
        }
        if high {
            self.netlist.pulled[wire] = Pull::High;
            self.netlist.states[wire] = WireState::PulledHigh;
        } else {
            self.netlist.pulled[wire] = Pull::Low;
            self.netlist.states[wire] = WireState::PulledLow;
        }
    }

    /// Pin wire `i` high.
    pub fn set_high(&mut self, wire: usize) {
        self.set_pulled(wire, true);
    }

    /// Pin wire `i` low.
    pub fn set_low(&mut self, wire: usize) {
        self.set_pulled(wire, false);
    }

    /// Pin a wire high by name.
    pub fn set_high_by_name(&mut self, name: &str) -> Result<(), SimError> {
        let wire = self.wire_index(name)?;
        self.set_high(wire);
        Ok(())
    }

    /// Pin a wire low by name.
    pub fn set_low_by_name(&mut self, name: &str) -> Result<(), SimError> {
        let wire = self.wire_index(name)?;
        self.set_low(wire);
        Ok(())
    }

    /// Whether wire `i` currently reads high.
    pub fn is_high(&self, wire: usize) -> bool {
        self.netlist.states[wire].is_any_high()
    }

    /// Whether wire `i` currently reads low.
    pub fn is_low(&self, wire: usize) -> bool {
        self.netlist.states[wire].is_any_low()
    }

    /// MSB-first probe of a wire list, e.g. an address or data bus.
    pub fn read_wires(&self, wires: &[usize]) -> u16 {
        let mut value = 0u16;
        for &w in wires {
            value <<= 1;
            value |= self.is_high(w) as u16;
        }
        value
    }

    /// Settle the whole netlist from its initial (or current) state.
    ///
    /// Runs at the initial-settle convergence policy: a step-limit hit is
    /// logged and swallowed, because fresh netlists commonly need one
    /// dirty pass before any input is applied.
    pub fn recalc_all(&mut self) -> Result<(), SimError> {
        self.calc.recalc_all(&mut self.netlist)?;
        Ok(())
    }

    /// Propagate from an explicit list of possibly-changed wires.
    pub fn recalc_wire_list(&mut self, wires: &[usize]) -> Result<(), SimError> {
        self.calc
            .recalc_wires(&mut self.netlist, wires, self.half_clock_count)?;
        Ok(())
    }

    /// Propagate from a single named wire.
    pub fn recalc_named_wire(&mut self, name: &str) -> Result<(), SimError> {
        let wire = self.wire_index(name)?;
        self.recalc_wire_list(&[wire])
    }

    /// Snapshot of every wire state.
    pub fn wires_state(&self) -> Vec<WireState> {
        self.netlist.wires_state()
    }

    /// Snapshot of every transistor conduction bit.
    pub fn fets_state(&self) -> Vec<bool> {
        self.netlist.fets_state()
    }

    /// Diagnostic solver counters.
    pub fn counters(&self) -> SolveCounters {
        self.calc.counters
    }
}
