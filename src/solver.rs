// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Switch-network wire-value solver.
//!
//! [`WireCalculator`] settles a netlist after stimuli: for each dirty wire
//! it floods the connected region through conducting transistors, resolves
//! the region's single logical value, writes it back, and re-queues the
//! channel wires of every transistor whose gate just flipped. Two
//! work-lists alternate until no transistor flips, so all state writes of
//! one pass are visible before the flips they caused are processed.
//!
//! The solver is strictly single-threaded and allocates nothing per
//! recalc: group storage, the DFS stack and both work-lists are reused
//! across calls.

use crate::netlist::{Netlist, Pull, WireState};

/// Maximum work-list passes per solve before declaring non-convergence.
pub const STEP_LIMIT: usize = 400;

/// Solve failure.
#[derive(Debug)]
pub enum SolveError {
    /// The step limit was reached with work still pending. Only raised
    /// after the first half-clock; the initial settle merely logs.
    DidNotConverge {
        /// Number of passes executed before giving up.
        passes: usize,
    },
}

impl std::fmt::Display for SolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveError::DidNotConverge { passes } => {
                write!(f, "wire recalculation did not converge after {} passes", passes)
            }
        }
    }
}

impl std::error::Error for SolveError {}

/// Diagnostic counters, monotonically increasing over a calculator's life.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SolveCounters {
    /// Wires admitted into connected groups.
    pub num_add_wire_to_group: u64,
    /// Channel transistors examined during group floods.
    pub num_add_wire_transistor: u64,
    /// Group recalculations performed.
    pub num_wires_recalculated: u64,
}

/// Dense one-bit-per-wire marker, cleared entry-by-entry by its users.
#[derive(Debug, Clone)]
struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    fn new(size: usize) -> Self {
        Bitmap { words: vec![0; size.div_ceil(64)] }
    }

    #[inline]
    fn get(&self, i: usize) -> bool {
        self.words[i >> 6] & (1u64 << (i & 63)) != 0
    }

    #[inline]
    fn set(&mut self, i: usize) {
        self.words[i >> 6] |= 1u64 << (i & 63);
    }

    #[inline]
    fn clear(&mut self, i: usize) {
        self.words[i >> 6] &= !(1u64 << (i & 63));
    }
}

/// The iterative wire-value solver.
///
/// Holds exclusive access to the netlist for the duration of each
/// `recalc_*` call. Mutates wire states and transistor conduction bits
/// only; pull pins, topology and the rail states are never written.
pub struct WireCalculator {
    /// Members of the group being resolved, in discovery order.
    group: Vec<usize>,
    in_group: Bitmap,
    dfs_stack: Vec<usize>,

    /// Wires to recalculate this pass.
    current: Vec<usize>,
    in_current: Bitmap,
    /// Wires enqueued by transistor flips, processed next pass.
    next: Vec<usize>,
    in_next: Bitmap,

    /// Diagnostic counters.
    pub counters: SolveCounters,
}

impl WireCalculator {
    /// Create a calculator with buffers sized for `net`.
    pub fn new(net: &Netlist) -> Self {
        let n = net.num_wires();
        WireCalculator {
            group: Vec::with_capacity(64),
            in_group: Bitmap::new(n),
            dfs_stack: Vec::with_capacity(64),
            current: Vec::with_capacity(n),
            in_current: Bitmap::new(n),
            next: Vec::with_capacity(n),
            in_next: Bitmap::new(n),
            counters: SolveCounters::default(),
        }
    }

    /// Propagate from the given seed wires to a fixed point.
    ///
    /// `half_clock_count` is the caller's progress counter: with a value
    /// of zero (the initial settle) non-convergence is logged and
    /// swallowed, otherwise it is returned as an error. Null-slot seeds
    /// are skipped.
    pub fn recalc_wires(
        &mut self,
        net: &mut Netlist,
        seeds: &[usize],
        half_clock_count: u64,
    ) -> Result<(), SolveError> {
        for &w in seeds {
            self.seed(net, w);
        }
        self.run(net, half_clock_count)
    }

    /// Settle the whole netlist: seed every non-null wire. Used for the
    /// initial settle only, so non-convergence is never raised here.
    pub fn recalc_all(&mut self, net: &mut Netlist) -> Result<(), SolveError> {
        for w in 0..net.num_wires() {
            self.seed(net, w);
        }
        self.run(net, 0)
    }

    #[inline]
    fn seed(&mut self, net: &Netlist, wire: usize) {
        if !net.is_present(wire) || self.in_current.get(wire) {
            return;
        }
        self.in_current.set(wire);
        self.current.push(wire);
    }

    #[inline]
    fn enqueue_next(&mut self, wire: usize) {
        if self.in_next.get(wire) {
            return;
        }
        self.in_next.set(wire);
        self.next.push(wire);
    }

    /// Run work-list passes until quiescent or the step limit is hit.
    fn run(&mut self, net: &mut Netlist, half_clock_count: u64) -> Result<(), SolveError> {
        let mut step = 0usize;
        while !self.current.is_empty() {
            if step >= STEP_LIMIT {
                clilog::warn!(
                    "wire recalc did not settle after {} passes, {} wires still pending",
                    STEP_LIMIT,
                    self.current.len()
                );
                for i in 0..self.current.len() {
                    let w = self.current[i];
                    self.in_current.clear(w);
                }
                self.current.clear();
                if half_clock_count > 0 {
                    return Err(SolveError::DidNotConverge { passes: STEP_LIMIT });
                }
                return Ok(());
            }
            for i in 0..self.current.len() {
                let w = self.current[i];
                // The wire may be re-enqueued by a flip later this pass.
                self.in_next.clear(w);
                self.do_wire_recalc(net, w);
                self.in_current.clear(w);
            }
            self.current.clear();
            std::mem::swap(&mut self.current, &mut self.next);
            std::mem::swap(&mut self.in_current, &mut self.in_next);
            step += 1;
        }
        Ok(())
    }

    /// Resolve the group around `wire` and apply the resulting state.
    fn do_wire_recalc(&mut self, net: &mut Netlist, wire: usize) {
        if wire == net.vcc || wire == net.gnd || !net.present[wire] {
            return;
        }
        self.counters.num_wires_recalculated += 1;

        self.build_group(net, wire);
        let new_value = self.group_value(net);
        let new_high = new_value.is_any_high();

        for i in 0..self.group.len() {
            let w = self.group[i];
            if w == net.vcc || w == net.gnd {
                continue;
            }
            net.states[w] = new_value;
            for k in net.gate_start[w]..net.gate_start[w + 1] {
                let t = net.gate_ids[k];
                if new_high && !net.fet_on[t] {
                    net.fet_on[t] = true;
                    let s1 = net.fet_side1[t];
                    let s2 = net.fet_side2[t];
                    self.enqueue_next(s1);
                    self.enqueue_next(s2);
                } else if !new_high && net.fet_on[t] {
                    net.fet_on[t] = false;
                    let s1 = net.fet_side1[t];
                    let s2 = net.fet_side2[t];
                    float_wire(net, s1);
                    float_wire(net, s2);
                    self.enqueue_next(s1);
                    self.enqueue_next(s2);
                }
            }
        }
    }

    /// Flood the maximal region connected to `seed` through conducting
    /// transistors. Rails join the group but are never traversed through.
    fn build_group(&mut self, net: &Netlist, seed: usize) {
        for i in 0..self.group.len() {
            let w = self.group[i];
            self.in_group.clear(w);
        }
        self.group.clear();
        self.dfs_stack.clear();
        self.dfs_stack.push(seed);

        while let Some(w) = self.dfs_stack.pop() {
            if self.in_group.get(w) {
                continue;
            }
            self.counters.num_add_wire_to_group += 1;
            self.in_group.set(w);
            self.group.push(w);
            if w == net.vcc || w == net.gnd {
                continue;
            }
            for k in net.ctrl_start[w]..net.ctrl_start[w + 1] {
                let t = net.ctrl_ids[k];
                self.counters.num_add_wire_transistor += 1;
                if !net.fet_on[t] {
                    continue;
                }
                let s1 = net.fet_side1[t];
                let s2 = net.fet_side2[t];
                let other = if s2 == w { s1 } else { s2 };
                if other == net.vcc || other == net.gnd {
                    if !self.in_group.get(other) {
                        self.counters.num_add_wire_to_group += 1;
                        self.in_group.set(other);
                        self.group.push(other);
                    }
                } else if !self.in_group.get(other) {
                    self.dfs_stack.push(other);
                }
            }
        }
    }

    /// The single logical value every non-rail member of the current
    /// group adopts.
    ///
    /// Ground dominates, then VCC, then external pulls over the running
    /// value. A floating result with both polarities present in the group
    /// is tie-broken by the capacitance proxy: total adjacency degree of
    /// the FloatingHigh members versus the FloatingLow members.
    fn group_value(&self, net: &Netlist) -> WireState {
        if self.in_group.get(net.gnd) {
            return WireState::Grounded;
        }
        if self.in_group.get(net.vcc) {
            return WireState::High;
        }

        let mut value = net.states[self.group[0]];
        let mut saw_fl = false;
        let mut saw_fh = false;
        for &w in &self.group {
            match net.states[w] {
                WireState::FloatingLow => saw_fl = true,
                WireState::FloatingHigh => saw_fh = true,
                _ => {}
            }
            match net.pulled[w] {
                Pull::High => value = WireState::PulledHigh,
                Pull::Low => value = WireState::PulledLow,
                Pull::None => {}
            }
        }

        if (value == WireState::FloatingLow || value == WireState::FloatingHigh) && saw_fl && saw_fh
        {
            let mut high_cap = 0usize;
            let mut low_cap = 0usize;
            for &w in &self.group {
                match net.states[w] {
                    WireState::FloatingHigh => high_cap += net.capacitance_proxy(w),
                    WireState::FloatingLow => low_cap += net.capacitance_proxy(w),
                    _ => {}
                }
            }
            value = if high_cap >= low_cap {
                WireState::FloatingHigh
            } else {
                WireState::FloatingLow
            };
        }
        value
    }
}

/// Convert a just-disconnected wire to its residual charge state.
///
/// Pinned wires snap back to their pull; otherwise a driven-low wire
/// decays to `FloatingLow` and a driven-high one to `FloatingHigh`.
/// Rail state is never rewritten.
pub(crate) fn float_wire(net: &mut Netlist, wire: usize) {
    if wire == net.vcc || wire == net.gnd {
        return;
    }
    match net.pulled[wire] {
        Pull::High => net.states[wire] = WireState::PulledHigh,
        Pull::Low => net.states[wire] = WireState::PulledLow,
        Pull::None => {
            if matches!(net.states[wire], WireState::Grounded | WireState::PulledLow) {
                net.states[wire] = WireState::FloatingLow;
            }
            if matches!(net.states[wire], WireState::High | WireState::PulledHigh) {
                net.states[wire] = WireState::FloatingHigh;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{load_netlist, CircuitFile};

    fn load(names: &[&str], pulled: &[u8], fets: &[(u32, u32, u32)]) -> Netlist {
        load_netlist(&CircuitFile::from_components(names, pulled, fets)).unwrap()
    }

    fn pin_high(net: &mut Netlist, wire: usize) {
        net.pulled[wire] = Pull::High;
        net.states[wire] = WireState::PulledHigh;
    }

    fn pin_low(net: &mut Netlist, wire: usize) {
        net.pulled[wire] = Pull::Low;
        net.states[wire] = WireState::PulledLow;
    }

    /// S1: NMOS inverter with a pullup on OUT. A low → OUT high;
    /// A high → OUT grounded through the pulldown fet.
    #[test]
    fn test_inverter() {
        let mut net = load(&["VCC", "VSS", "A", "OUT"], &[0, 0, 2, 1], &[(2, 3, 1)]);
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();
        assert!(net.state(3).is_any_high(), "{:?}", net.state(3));

        pin_high(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 1).unwrap();
        assert_eq!(net.state(3), WireState::Grounded);

        pin_low(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 2).unwrap();
        assert!(net.state(3).is_any_high());
    }

    /// S2: pass gate joining two oppositely pulled wires. Once the gate
    /// conducts, the last-processed seed scans the group with the
    /// PulledHigh member visited last.
    #[test]
    fn test_pass_gate_contention() {
        let mut net = load(
            &["VCC", "VSS", "IN", "OUT", "EN"],
            &[0, 0, 1, 2, 2],
            &[(4, 2, 3)],
        );
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();
        assert_eq!(net.state(3), WireState::PulledLow);
        assert_eq!(net.state(2), WireState::PulledHigh);

        pin_high(&mut net, 4);
        calc.recalc_wires(&mut net, &[4], 1).unwrap();
        assert_eq!(net.state(3), WireState::PulledHigh);
        assert_eq!(net.state(2), WireState::PulledHigh);
    }

    /// S3: charge retention on an isolated wire behind a pass gate that
    /// alternately connects it to VCC and VSS.
    #[test]
    fn test_charge_retention() {
        // EN gates SRC↔D; PWR gates VCC↔SRC; GNDC gates VSS↔SRC.
        let mut net = load(
            &["VCC", "VSS", "EN", "PWR", "GNDC", "SRC", "D"],
            &[0, 0, 2, 2, 2, 0, 0],
            &[(2, 5, 6), (3, 0, 5), (4, 1, 5)],
        );
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();

        pin_high(&mut net, 3);
        calc.recalc_wires(&mut net, &[3], 1).unwrap();
        pin_high(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 1).unwrap();
        assert_eq!(net.state(6), WireState::High);

        pin_low(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 2).unwrap();
        assert_eq!(net.state(6), WireState::FloatingHigh);

        pin_low(&mut net, 3);
        calc.recalc_wires(&mut net, &[3], 3).unwrap();
        pin_high(&mut net, 4);
        calc.recalc_wires(&mut net, &[4], 3).unwrap();
        pin_high(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 3).unwrap();
        assert_eq!(net.state(6), WireState::Grounded);

        pin_low(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 4).unwrap();
        assert_eq!(net.state(6), WireState::FloatingLow);
    }

    /// S4: joining a 4-wire FloatingHigh region with a 2-wire FloatingLow
    /// region; the larger adjacency sum wins the charge-sharing estimate.
    #[test]
    fn test_capacitance_tie_break() {
        // H0..H3 fused by always-on (VCC-gated) fets, likewise L0..L1;
        // JOIN gates the bridge fet between H3 and L0.
        let mut net = load(
            &["VCC", "VSS", "JOIN", "H0", "H1", "H2", "H3", "L0", "L1"],
            &[0, 0, 2, 0, 0, 0, 0, 0, 0],
            &[
                (0, 3, 4),
                (0, 4, 5),
                (0, 5, 6),
                (0, 7, 8),
                (2, 6, 7),
            ],
        );
        let mut calc = WireCalculator::new(&net);
        for w in 3..=6 {
            net.states[w] = WireState::FloatingHigh;
        }
        for w in 7..=8 {
            net.states[w] = WireState::FloatingLow;
        }

        pin_high(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 1).unwrap();
        for w in 3..=8 {
            assert_eq!(net.state(w), WireState::FloatingHigh, "wire {}", w);
        }
    }

    /// S4 mirror: when the low region carries the larger adjacency sum,
    /// the union decays low.
    #[test]
    fn test_capacitance_tie_break_low_wins() {
        let mut net = load(
            &["VCC", "VSS", "JOIN", "H0", "L0", "L1", "L2", "L3"],
            &[0, 0, 2, 0, 0, 0, 0, 0],
            &[(0, 4, 5), (0, 5, 6), (0, 6, 7), (2, 3, 4)],
        );
        let mut calc = WireCalculator::new(&net);
        net.states[3] = WireState::FloatingHigh;
        for w in 4..=7 {
            net.states[w] = WireState::FloatingLow;
        }

        pin_high(&mut net, 2);
        calc.recalc_wires(&mut net, &[2], 1).unwrap();
        for w in 3..=7 {
            assert_eq!(net.state(w), WireState::FloatingLow, "wire {}", w);
        }
    }

    /// S5: a three-stage NMOS ring oscillator has no fixed point. The
    /// initial settle swallows the step-limit hit; any later recalc
    /// reports it.
    #[test]
    fn test_ring_oscillator_non_convergence() {
        let mut net = load(
            &["VCC", "VSS", "A", "B", "C"],
            &[0, 0, 1, 1, 1],
            &[(2, 3, 1), (3, 4, 1), (4, 2, 1)],
        );
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();

        let err = calc.recalc_wires(&mut net, &[2, 3, 4], 1).unwrap_err();
        let SolveError::DidNotConverge { passes } = err;
        assert_eq!(passes, STEP_LIMIT);

        // The abort must leave the work-lists clean: a repeat run behaves
        // identically instead of tripping over stale markers.
        let err = calc.recalc_wires(&mut net, &[2, 3, 4], 2).unwrap_err();
        let SolveError::DidNotConverge { passes } = err;
        assert_eq!(passes, STEP_LIMIT);
    }

    /// Property 5: a group reaching both rails resolves grounded, and the
    /// rails themselves are never rewritten.
    #[test]
    fn test_ground_dominates_and_rails_hold() {
        let mut net = load(
            &["VCC", "VSS", "X", "EN"],
            &[0, 0, 0, 2],
            &[(3, 2, 0), (3, 2, 1)],
        );
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();

        pin_high(&mut net, 3);
        calc.recalc_wires(&mut net, &[3], 1).unwrap();
        assert_eq!(net.state(2), WireState::Grounded);
        assert_eq!(net.state(net.vcc()), WireState::High);
        assert_eq!(net.state(net.gnd()), WireState::Grounded);
    }

    /// Property 6: a pulled-high member with no opposing pull and no
    /// ground pins the whole group high.
    #[test]
    fn test_pull_dominates_floating() {
        let mut net = load(
            &["VCC", "VSS", "IN", "OUT", "EN"],
            &[0, 0, 1, 0, 2],
            &[(4, 2, 3)],
        );
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();

        pin_high(&mut net, 4);
        calc.recalc_wires(&mut net, &[4], 1).unwrap();
        assert_eq!(net.state(2), WireState::PulledHigh);
        assert_eq!(net.state(3), WireState::PulledHigh);
    }

    /// Property 7: floating a pinned wire snaps it to its pull.
    #[test]
    fn test_float_wire_idempotent_on_pinned() {
        let mut net = load(&["VCC", "VSS", "P", "Q"], &[0, 0, 1, 2], &[(2, 3, 1)]);
        net.states[2] = WireState::High;
        float_wire(&mut net, 2);
        assert_eq!(net.state(2), WireState::PulledHigh);
        float_wire(&mut net, 2);
        assert_eq!(net.state(2), WireState::PulledHigh);

        net.states[3] = WireState::Grounded;
        float_wire(&mut net, 3);
        assert_eq!(net.state(3), WireState::PulledLow);
    }

    /// The residual-charge table for unpinned wires.
    #[test]
    fn test_float_wire_charge_table() {
        let mut net = load(&["VCC", "VSS", "W", "G"], &[0, 0, 0, 0], &[(3, 2, 1)]);
        for (before, after) in [
            (WireState::Grounded, WireState::FloatingLow),
            (WireState::PulledLow, WireState::FloatingLow),
            (WireState::High, WireState::FloatingHigh),
            (WireState::PulledHigh, WireState::FloatingHigh),
            (WireState::Floating, WireState::Floating),
            (WireState::FloatingLow, WireState::FloatingLow),
            (WireState::FloatingHigh, WireState::FloatingHigh),
        ] {
            net.states[2] = before;
            float_wire(&mut net, 2);
            assert_eq!(net.state(2), after, "from {:?}", before);
        }
    }

    /// Property 8: re-settling a converged netlist is a no-op for state,
    /// while the diagnostic counters keep advancing.
    #[test]
    fn test_resettle_idempotent() {
        let mut net = load(&["VCC", "VSS", "A", "OUT"], &[0, 0, 2, 1], &[(2, 3, 1)]);
        let mut calc = WireCalculator::new(&net);
        calc.recalc_all(&mut net).unwrap();
        let snap1 = net.wires_state();
        let counters1 = calc.counters;

        calc.recalc_all(&mut net).unwrap();
        let snap2 = net.wires_state();
        assert_eq!(snap1, snap2);
        assert!(calc.counters.num_wires_recalculated > counters1.num_wires_recalculated);
    }

    /// Property 2: recalcs never touch the pull pins.
    #[test]
    fn test_pulls_persist() {
        let mut net = load(&["VCC", "VSS", "A", "OUT"], &[0, 0, 2, 1], &[(2, 3, 1)]);
        let mut calc = WireCalculator::new(&net);
        let before: Vec<_> = (0..net.num_wires()).map(|w| net.pulled(w)).collect();
        calc.recalc_all(&mut net).unwrap();
        calc.recalc_wires(&mut net, &[2, 3], 1).unwrap();
        let after: Vec<_> = (0..net.num_wires()).map(|w| net.pulled(w)).collect();
        assert_eq!(before, after);
    }
}
