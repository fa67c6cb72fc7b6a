// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Target-load model and gate sizing.
//!
//! Sizing aims every driver at the load capacitance that makes it switch
//! with the library's "natural" buffer slew: first a target slew is
//! averaged over the resize libraries' buffers, then each cell gets the
//! load capacitance that reproduces that slew, found by bisection. The
//! sizer then walks drivers in reverse level order swapping each instance
//! to the functional equivalent whose target load best matches its actual
//! load.

use indexmap::IndexMap;

use crate::db::{CellId, PinId};
use crate::liberty::{LibCell, TimingArc};
use crate::resizer::{Design, ResizeError, Resizer};

/// Bisection start: 1 pF.
const CAP_INIT: f32 = 1.0e-12;
/// Bisection tolerance: 0.1 fF.
const CAP_TOL: f32 = 0.1e-15;

impl<D: Design> Resizer<'_, D> {
    /// Build equivalence groups and the target-load model for the given
    /// resize libraries. Must run before [`Resizer::resize_to_target_slew`].
    pub fn resize_preamble(&mut self, resize_libs: &[usize]) -> Result<(), ResizeError> {
        if resize_libs.is_empty() {
            return Err(ResizeError::NoResizeLibrary);
        }
        self.init();
        self.design.make_equiv_cells(resize_libs);
        self.find_target_loads(resize_libs);
        self.target_loads_valid = true;
        Ok(())
    }

    /// Find a target slew for the libraries and then a target load for
    /// each cell that gives the target slew.
    fn find_target_loads(&mut self, resize_libs: &[usize]) {
        self.find_buffer_target_slews(resize_libs);
        let mut map = IndexMap::new();
        for &lib_idx in resize_libs {
            let lib = self.design.library(lib_idx);
            for (cell_idx, cell) in lib.cells().iter().enumerate() {
                let target = find_target_load(cell, self.tgt_slews);
                map.insert(CellId::new(lib_idx, cell_idx), target);
                clilog::debug!("{} target_load = {:.2e}", cell.name, target);
            }
        }
        self.target_load_map = map;
    }

    pub fn target_load_cap(&self, cell: CellId) -> f32 {
        self.target_load_map.get(&cell).copied().unwrap_or(0.0)
    }

    pub fn target_slews(&self) -> [f32; 2] {
        self.tgt_slews
    }

    /// Find the target slew across all buffers in the resize libraries:
    /// drive each buffer arc at ten times its input capacitance, then
    /// re-drive it with the resulting slew as input slew.
    fn find_buffer_target_slews(&mut self, resize_libs: &[usize]) {
        let mut slews = [0.0f32; 2];
        let mut counts = [0usize; 2];
        for &lib_idx in resize_libs {
            let lib = self.design.library(lib_idx);
            for (cell_idx, cell) in lib.cells().iter().enumerate() {
                if !cell.is_buffer() || self.dont_use(CellId::new(lib_idx, cell_idx)) {
                    continue;
                }
                let (input, output) = cell.buffer_ports().unwrap();
                let load_cap = cell.ports[input].cap * 10.0; // "factor debatable"
                for arc in cell.arcs_to(output) {
                    let (_, arc_slew) = arc.gate_delay(0.0, load_cap);
                    let (_, arc_slew) = arc.gate_delay(arc_slew, load_cap);
                    slews[arc.to_rf.index()] += arc_slew;
                    counts[arc.to_rf.index()] += 1;
                }
            }
        }
        for rf in 0..2 {
            if counts[rf] > 0 {
                slews[rf] /= counts[rf] as f32;
            }
        }
        self.tgt_slews = slews;
        clilog::debug!(
            "target_slews = {:.3e}/{:.3e}",
            self.tgt_slews[0],
            self.tgt_slews[1]
        );
    }

    // ── Sizing ───────────────────────────────────────────────────────────

    /// Resize every driver to its target load, in reverse level order.
    pub fn resize_to_target_slew(&mut self) -> Result<(), ResizeError> {
        if !self.target_loads_valid {
            return Err(ResizeError::NoTargetLoads);
        }
        self.resize_count = 0;
        self.resized_multi_output_insts.clear();
        self.ensure_level_drvr_pins();
        for i in (0..self.level_drvr_pins.len()).rev() {
            let drvr_pin = self.level_drvr_pins[i];
            let Some(net) = self.design.pin_net(drvr_pin) else {
                continue;
            };
            if !self.design.is_constant(drvr_pin)
                && self.has_fanout(drvr_pin)
                // Hands off the clock nets.
                && !self.design.is_clock_pin(drvr_pin)
                // Hands off special nets.
                && !self.design.is_special(net)
            {
                self.resize_drvr_to_target_slew(drvr_pin);
                if self.over_max_area() {
                    clilog::warn!("Max utilization reached.");
                    break;
                }
            }
        }
        self.ensure_wire_parasitics();
        println!("Resized {} instances.", self.resize_count);
        Ok(())
    }

    /// Swap one driver's master for the equivalent cell whose target load
    /// best matches the driver's load.
    pub(crate) fn resize_drvr_to_target_slew(&mut self, drvr_pin: PinId) {
        let Some(inst) = self.design.pin_instance(drvr_pin) else {
            return;
        };
        let cell_id = self.design.inst_cell(inst);
        let equiv_cells = self.design.equiv_cells(cell_id);
        if equiv_cells.is_empty() {
            return;
        }
        let mut revisiting_inst = false;
        if self.has_multiple_outputs(inst) {
            revisiting_inst = self.resized_multi_output_insts.contains(&inst);
            self.resized_multi_output_insts.insert(inst);
        }
        let cell = self.design.cell(cell_id);
        let is_buf_inv = cell.is_buffer() || cell.is_inverter();
        self.ensure_wire_parasitic(drvr_pin);
        // Includes net parasitic capacitance.
        let load_cap = self.design.load_cap(drvr_pin);
        if load_cap <= 0.0 {
            return;
        }
        let target_load = self.target_load_cap(cell_id);
        let mut best_cell = cell_id;
        let mut best_load = target_load;
        let mut best_ratio = if target_load < load_cap {
            target_load / load_cap
        } else {
            load_cap / target_load
        };
        let mut best_delay = if is_buf_inv {
            self.buffer_delay_under_load(cell_id, load_cap)
        } else {
            0.0
        };
        for target_cell in equiv_cells {
            if self.dont_use(target_cell) {
                continue;
            }
            let target_load = self.target_load_cap(target_cell);
            let delay = if is_buf_inv {
                self.buffer_delay_under_load(target_cell, load_cap)
            } else {
                0.0
            };
            let mut ratio = target_load / load_cap;
            if ratio > 1.0 {
                ratio = 1.0 / ratio;
            }
            let better = if is_buf_inv {
                // Libraries have "delay" buffers/inverters that are
                // functionally buffers/inverters with extra intrinsic
                // delay. Accept worse target load matching when delay
                // shrinks so they are never picked.
                (delay < best_delay && ratio > best_ratio * 0.9)
                    || (ratio > best_ratio && delay < best_delay * 1.1)
            } else {
                ratio > best_ratio
            };
            // A multi-output instance (generally a register Q/QN) may only
            // upsize once the first output has been visited.
            if better && (!revisiting_inst || target_load > best_load) {
                best_cell = target_cell;
                best_ratio = ratio;
                best_load = target_load;
                best_delay = delay;
            }
        }
        if best_cell != cell_id {
            clilog::debug!(
                "resize {} {} -> {}",
                self.design.pin_path_name(drvr_pin),
                self.design.cell(cell_id).name,
                self.design.cell(best_cell).name
            );
            self.design.replace_cell(inst, best_cell);
            if !revisiting_inst {
                self.resize_count += 1;
            }
            self.design_area -= self.area(cell_id);
            self.design_area += self.area(best_cell);
            self.level_drvr_pins_invalid();

            // Delete estimated parasitics on all instance pins: input nets
            // change pin cap, outputs change location slightly.
            if self.have_estimated_parasitics {
                for pin in self.design.inst_pins(inst) {
                    if let Some(net) = self.design.pin_net(pin) {
                        self.design.delete_parasitics(net);
                    }
                }
            }
        }
    }

    // ── Gate delay helpers ───────────────────────────────────────────────

    /// Worst rise/fall delays and slews across all arcs into `port`,
    /// driven at the target slews.
    pub(crate) fn gate_delays(
        &self,
        cell: CellId,
        port: usize,
        load_cap: f32,
    ) -> ([f32; 2], [f32; 2]) {
        let mut delays = [f32::NEG_INFINITY; 2];
        let mut slews = [f32::NEG_INFINITY; 2];
        for arc in self.design.cell(cell).arcs_to(port) {
            let in_slew = self.tgt_slews[arc.from_rf.index()];
            let (gate_delay, drvr_slew) = arc.gate_delay(in_slew, load_cap);
            let out = arc.to_rf.index();
            delays[out] = delays[out].max(gate_delay);
            slews[out] = slews[out].max(drvr_slew);
        }
        (delays, slews)
    }

    /// Worst-case buffer delay driving `load_cap`.
    pub(crate) fn buffer_delay_under_load(&self, buffer_cell: CellId, load_cap: f32) -> f32 {
        let Some((_, output)) = self.design.cell(buffer_cell).buffer_ports() else {
            return 0.0;
        };
        let (delays, _) = self.gate_delays(buffer_cell, output, load_cap);
        delays[0].max(delays[1])
    }

    /// Self delay: the buffer driving one copy of its own input pin.
    pub(crate) fn buffer_self_delay(&self, buffer_cell: CellId) -> f32 {
        let load_cap = self.buffer_input_capacitance(buffer_cell);
        self.buffer_delay_under_load(buffer_cell, load_cap)
    }
}

/// The load capacitance giving this cell the target output slew, averaged
/// over its non-check, non-tristate arcs; minimum across output rise/fall.
/// Cells with no usable arcs get 0 and are never preferred by the sizer.
fn find_target_load(cell: &LibCell, slews: [f32; 2]) -> f32 {
    let mut target_load_sum = [0.0f32; 2];
    let mut arc_count = [0usize; 2];
    for arc in &cell.arcs {
        if arc.role.is_timing_check() || arc.role.is_tristate() {
            continue;
        }
        let load = find_arc_target_load(arc, slews[arc.from_rf.index()], slews[arc.to_rf.index()]);
        target_load_sum[arc.to_rf.index()] += load;
        arc_count[arc.to_rf.index()] += 1;
    }
    let mut target_load = f32::INFINITY;
    for rf in 0..2 {
        if arc_count[rf] > 0 {
            let target = target_load_sum[rf] / arc_count[rf] as f32;
            target_load = target_load.min(target);
        }
    }
    if target_load.is_finite() {
        target_load
    } else {
        0.0
    }
}

/// Bisect for the load capacitance that makes the arc's output slew equal
/// `out_slew`: halve the step on overshoot, stop when the step is below
/// tolerance or the measured slew stops moving.
fn find_arc_target_load(arc: &TimingArc, in_slew: f32, out_slew: f32) -> f32 {
    let mut load_cap = CAP_INIT;
    let mut cap_step = CAP_INIT;
    let mut prev_slew = 0.0f32;
    while cap_step > CAP_TOL {
        let (_, arc_slew) = arc.gate_delay(in_slew, load_cap);
        if arc_slew > out_slew {
            load_cap -= cap_step;
            cap_step /= 2.0;
        }
        load_cap += cap_step;
        if arc_slew == prev_slew {
            // Stuck.
            break;
        }
        prev_slew = arc_slew;
    }
    load_cap.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liberty::LibCell;

    #[test]
    fn test_arc_target_load_matches_slew() {
        // slew = 10ps + 1k * load; target 60ps -> load = 50fF.
        let buf = LibCell::buffer("BUF_X1", 1e-12, 2e-15, 1000.0, 10e-12);
        let arc = &buf.arcs[0];
        let load = find_arc_target_load(arc, 0.0, 60e-12);
        assert!(
            (load - 50e-15).abs() < 0.5e-15,
            "load = {:.3e}, expected 50fF",
            load
        );
        let (_, slew) = arc.gate_delay(0.0, load);
        assert!((slew - 60e-12).abs() < 1e-13);
    }

    #[test]
    fn test_cell_target_load_min_over_rf() {
        let mut cell = LibCell::buffer("BUF_X1", 1e-12, 2e-15, 1000.0, 10e-12);
        // Make the fall arc weaker: it needs less load to hit the slew.
        cell.arcs[1].slew_resistance = 2000.0;
        let target = find_target_load(&cell, [60e-12, 60e-12]);
        // At 60ps input slew the slew floor is 16ps: fall target is 22fF,
        // rise target 44fF, and the minimum wins.
        assert!((target - 22e-15).abs() < 0.5e-15, "target = {:.3e}", target);
    }

    #[test]
    fn test_no_arcs_means_zero_target() {
        let tie = LibCell::tie("TIEHI", 1e-12, true);
        assert_eq!(find_target_load(&tie, [60e-12, 60e-12]), 0.0);
    }
}
