// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Net repair: long wires, max slew, max capacitance and max fanout
//! violations, fixed by walking each driver's Steiner tree and inserting
//! repeaters.
//!
//! The tree walk returns, per point, the accumulated wire length, pin
//! capacitance, fanout and load pins still hanging below it; a repeater
//! insertion cuts all four back to the new buffer's input pin. Steiner
//! trees on large nets can be thousands of points deep, so the post-order
//! walk runs on an explicit work stack rather than the call stack.

use smallvec::SmallVec;

use crate::db::{CellId, NetId, PinId};
use crate::geom::Point;
use crate::resizer::{Design, ResizeError, Resizer};
use crate::steiner::{SteinerPt, SteinerTree};

/// Shorten each repeated segment by this fraction to allow for the offset
/// from instance origin to pin and for detailed-placement movement.
const LENGTH_MARGIN: f64 = 0.05;

type LoadPins = SmallVec<[PinId; 4]>;

/// Accounting carried up the tree from a point toward the driver.
#[derive(Debug, Default, Clone)]
struct SegState {
    /// Unrepeated wire length below the point, in DBU.
    wire_length: i32,
    pin_cap: f32,
    fanout: f32,
    load_pins: LoadPins,
}

/// Violation counters for the end-of-pass summary.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RepairCounts {
    pub repaired_nets: usize,
    pub slew_violations: usize,
    pub cap_violations: usize,
    pub fanout_violations: usize,
    pub length_violations: usize,
}

/// Two-phase work item for the iterative post-order tree walk.
enum WorkItem {
    Visit(SteinerPt, Option<SteinerPt>),
    Merge(SteinerPt, Option<SteinerPt>),
}

impl<D: Design> Resizer<'_, D> {
    /// Repair long wires and max slew / capacitance / fanout violations on
    /// every driver, in reverse level order. The whole enchilada.
    pub fn repair_design(
        &mut self,
        max_wire_length: f64, // meters
        buffer_cell: CellId,
    ) -> Result<(), ResizeError> {
        self.require_buffer(buffer_cell)?;
        self.init();
        self.design.check_limits_preamble();

        self.inserted_buffer_count = 0;
        self.resize_count = 0;
        self.resized_multi_output_insts.clear();
        let mut counts = RepairCounts::default();
        let max_length = self.meters_to_dbu(max_wire_length);
        for i in (0..self.level_drvr_pins.len()).rev() {
            let drvr_pin = self.level_drvr_pins[i];
            let Some(net) = self.design.pin_net(drvr_pin) else {
                continue;
            };
            if !self.design.is_clock_pin(drvr_pin)
                // Exclude tie hi/low cells.
                && !self.is_func_one_zero(drvr_pin)
                && !self.design.is_special(net)
            {
                self.repair_net_drvr(
                    net, drvr_pin, true, true, true, max_length, true, buffer_cell, &mut counts,
                );
            }
        }
        self.ensure_wire_parasitics();

        report_violations(&counts);
        if self.inserted_buffer_count > 0 {
            println!(
                "Inserted {} buffers in {} nets.",
                self.inserted_buffer_count, counts.repaired_nets
            );
            self.level_drvr_pins_invalid();
        }
        if self.resize_count > 0 {
            println!("Resized {} instances.", self.resize_count);
        }
        Ok(())
    }

    /// [`Resizer::repair_design`] restricted to the clock network: long
    /// wires only, and clock tree gates are not resized.
    pub fn repair_clk_nets(
        &mut self,
        max_wire_length: f64, // meters
        buffer_cell: CellId,
    ) -> Result<(), ResizeError> {
        self.require_buffer(buffer_cell)?;
        self.init();
        // Need slews to resize inserted buffers.
        self.design.find_delays();

        self.inserted_buffer_count = 0;
        self.resize_count = 0;
        let mut counts = RepairCounts::default();
        let max_length = self.meters_to_dbu(max_wire_length);
        for clk_drvr in self.design.clock_roots() {
            let Some(net) = self.design.pin_net(clk_drvr) else {
                continue;
            };
            self.repair_net_drvr(
                net, clk_drvr, false, false, false, max_length, false, buffer_cell, &mut counts,
            );
        }
        if counts.length_violations > 0 {
            println!("Found {} long wires.", counts.length_violations);
        }
        if self.inserted_buffer_count > 0 {
            println!(
                "Inserted {} buffers in {} nets.",
                self.inserted_buffer_count, counts.repaired_nets
            );
            self.level_drvr_pins_invalid();
        }
        Ok(())
    }

    /// Repair a single net. For interactive debugging.
    pub fn repair_net(
        &mut self,
        net: NetId,
        max_wire_length: f64, // meters
        buffer_cell: CellId,
    ) -> Result<(), ResizeError> {
        self.require_buffer(buffer_cell)?;
        self.init();
        self.design.check_limits_preamble();

        self.inserted_buffer_count = 0;
        self.resize_count = 0;
        self.resized_multi_output_insts.clear();
        let mut counts = RepairCounts::default();
        let max_length = self.meters_to_dbu(max_wire_length);
        if let Some(&drvr_pin) = self.design.drivers(net).first() {
            self.repair_net_drvr(
                net, drvr_pin, true, true, true, max_length, true, buffer_cell, &mut counts,
            );
        }
        report_violations(&counts);
        if self.inserted_buffer_count > 0 {
            println!(
                "Inserted {} buffers in {} nets.",
                self.inserted_buffer_count, counts.repaired_nets
            );
            self.level_drvr_pins_invalid();
        }
        println!("Resized {} instances.", self.resize_count);
        Ok(())
    }

    /// Check one driver's limits and wire length, repairing its tree when
    /// anything is violated.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn repair_net_drvr(
        &mut self,
        net: NetId,
        drvr_pin: PinId,
        check_slew: bool,
        check_cap: bool,
        check_fanout: bool,
        max_length: i32, // dbu
        resize_drvr: bool,
        buffer_cell: CellId,
        counts: &mut RepairCounts,
    ) {
        let Some(tree) = self.design.make_steiner_tree(net, true) else {
            return;
        };
        clilog::debug!("repair net {}", self.design.pin_path_name(drvr_pin));
        self.ensure_wire_parasitic(drvr_pin);
        self.design.find_delays();

        let mut max_cap = f32::INFINITY;
        let mut max_fanout = f32::INFINITY;
        let mut repair_slew = false;
        let mut repair_cap = false;
        let mut repair_fanout = false;
        let mut repair_wire = false;
        if check_cap {
            let (_cap, cap_limit, cap_slack) = self.design.check_capacitance(drvr_pin);
            if cap_slack < 0.0 {
                max_cap = cap_limit;
                counts.cap_violations += 1;
                repair_cap = true;
            }
        }
        if check_fanout {
            let (_fanout, fanout_limit, fanout_slack) = self.design.check_fanout(drvr_pin);
            if fanout_slack < 0.0 {
                max_fanout = fanout_limit;
                counts.fanout_violations += 1;
                repair_fanout = true;
            }
        }
        let wire_length = find_max_steiner_dist_in_tree(&tree, drvr_pin);
        if max_length > 0 && wire_length > max_length {
            counts.length_violations += 1;
            repair_wire = true;
        }
        if check_slew {
            let (_slew, max_slew, slew_slack) = self.check_slew(drvr_pin);
            if slew_slack < 0.0 {
                counts.slew_violations += 1;
                // Find the max load cap that corresponds to max_slew.
                if let (Some(inst), Some(port)) = (
                    self.design.pin_instance(drvr_pin),
                    self.design.pin_port(drvr_pin),
                ) {
                    let cell = self.design.inst_cell(inst);
                    let max_cap1 = self.find_slew_load_cap(cell, port, max_slew);
                    max_cap = max_cap.min(max_cap1);
                    repair_slew = true;
                }
            }
        }
        if repair_slew || repair_cap || repair_fanout || repair_wire {
            if let Some(drvr_pt) = tree.steiner_pt(drvr_pin) {
                self.repair_net_walk(&tree, drvr_pt, net, max_cap, max_fanout, max_length, buffer_cell);
                counts.repaired_nets += 1;
            }
        }
        if resize_drvr {
            self.resize_drvr_to_target_slew(drvr_pin);
        }
    }

    /// Worst slew check over all pins connected to the driver.
    pub(crate) fn check_slew(&self, drvr_pin: PinId) -> (f32, f32, f32) {
        let mut slew = 0.0;
        let mut limit = 0.0;
        let mut slack = f32::INFINITY;
        let Some(net) = self.design.pin_net(drvr_pin) else {
            return (slew, limit, slack);
        };
        for pin in self.design.net_pins(net) {
            let (slew1, limit1, slack1) = self.design.check_slew(pin);
            if slack1 < slack {
                slew = slew1;
                limit = limit1;
                slack = slack1;
            }
        }
        (slew, limit, slack)
    }

    /// Find the output load capacitance at which the driver's slew reaches
    /// `slew`. Doubling upper-bound search plus bisection, 1% tolerance.
    pub(crate) fn find_slew_load_cap(&self, cell: CellId, port: usize, slew: f32) -> f32 {
        let drive_res = self.design.cell(cell).ports[port].drive_resistance;
        // cap1 lower bound, cap2 upper bound.
        let mut cap1 = 0.0f32;
        let mut cap2 = if drive_res > 0.0 {
            slew / drive_res * 2.0
        } else {
            1.0e-12
        };
        let tol = 0.01; // 1%
        let mut diff2 = self.gate_slew_diff(cell, port, cap2, slew);
        while (cap1 - cap2).abs() > cap1.max(cap2) * tol {
            if diff2 < 0.0 {
                cap1 = cap2;
                cap2 *= 2.0;
                diff2 = self.gate_slew_diff(cell, port, cap2, slew);
            } else {
                let cap3 = (cap1 + cap2) / 2.0;
                let diff3 = self.gate_slew_diff(cell, port, cap3, slew);
                if diff3 < 0.0 {
                    cap1 = cap3;
                } else {
                    cap2 = cap3;
                    diff2 = diff3;
                }
            }
        }
        cap1
    }

    // Objective function.
    fn gate_slew_diff(&self, cell: CellId, port: usize, load_cap: f32, slew: f32) -> f32 {
        let (_, slews) = self.gate_delays(cell, port, load_cap);
        slews[0].max(slews[1]) - slew
    }

    /// Post-order walk of the driver's Steiner tree, inserting repeaters
    /// wherever a child or a segment exceeds the cap/fanout/length bounds.
    fn repair_net_walk(
        &mut self,
        tree: &SteinerTree,
        drvr_pt: SteinerPt,
        net: NetId,
        max_cap: f32,
        max_fanout: f32,
        max_length: i32, // dbu
        buffer_cell: CellId,
    ) {
        let mut results: Vec<Option<SegState>> = vec![None; tree.node_count()];
        let mut work = vec![WorkItem::Visit(drvr_pt, None)];
        while let Some(item) = work.pop() {
            match item {
                WorkItem::Visit(pt, prev_pt) => {
                    work.push(WorkItem::Merge(pt, prev_pt));
                    if let Some(left) = tree.left(pt) {
                        work.push(WorkItem::Visit(left, Some(pt)));
                    }
                    if let Some(right) = tree.right(pt) {
                        work.push(WorkItem::Visit(right, Some(pt)));
                    }
                }
                WorkItem::Merge(pt, prev_pt) => {
                    let left = tree
                        .left(pt)
                        .and_then(|l| results[l].take())
                        .unwrap_or_default();
                    let right = tree
                        .right(pt)
                        .and_then(|r| results[r].take())
                        .unwrap_or_default();
                    let state = self.repair_net_merge(
                        tree,
                        pt,
                        prev_pt,
                        net,
                        max_cap,
                        max_fanout,
                        max_length,
                        buffer_cell,
                        left,
                        right,
                    );
                    results[pt] = Some(state);
                }
            }
        }
    }

    /// Merge step at one tree point: repeat overloaded children, fold in a
    /// load pin at the point, then repeat the segment back toward the
    /// parent until it fits the bounds.
    #[allow(clippy::too_many_arguments)]
    fn repair_net_merge(
        &mut self,
        tree: &SteinerTree,
        pt: SteinerPt,
        prev_pt: Option<SteinerPt>,
        net: NetId,
        max_cap: f32,
        max_fanout: f32,
        max_length: i32,
        buffer_cell: CellId,
        mut left: SegState,
        mut right: SegState,
    ) -> SegState {
        let pt_loc = tree.location(pt);

        // Add a repeater to the left or right branch to stay under the
        // max cap/length/fanout, on the heavier side per axis.
        let mut repeater_left = false;
        let mut repeater_right = false;
        let cap_left =
            left.pin_cap + (self.dbu_to_meters(left.wire_length) * self.wire_cap as f64) as f32;
        let cap_right =
            right.pin_cap + (self.dbu_to_meters(right.wire_length) * self.wire_cap as f64) as f32;
        if cap_left + cap_right > max_cap {
            if cap_left > cap_right {
                repeater_left = true;
            } else {
                repeater_right = true;
            }
        }
        if max_length > 0 && left.wire_length + right.wire_length > max_length {
            if left.wire_length > right.wire_length {
                repeater_left = true;
            } else {
                repeater_right = true;
            }
        }
        if left.fanout + right.fanout > max_fanout {
            if left.fanout > right.fanout {
                repeater_left = true;
            } else {
                repeater_right = true;
            }
        }
        if repeater_left {
            self.make_repeater(pt_loc.x, pt_loc.y, net, buffer_cell, &mut left);
        }
        if repeater_right {
            self.make_repeater(pt_loc.x, pt_loc.y, net, buffer_cell, &mut right);
        }

        let mut state = SegState {
            wire_length: left.wire_length + right.wire_length,
            pin_cap: left.pin_cap + right.pin_cap,
            fanout: left.fanout + right.fanout,
            load_pins: left.load_pins,
        };
        state.load_pins.extend(right.load_pins);

        // The point pin is the net driver when prev_pt is none.
        let Some(prev_pt) = prev_pt else {
            return state;
        };
        if let Some(load_pin) = tree.pin(pt) {
            match (
                self.design.pin_instance(load_pin),
                self.design.pin_port(load_pin),
            ) {
                (Some(inst), Some(port)) => {
                    let cell = self.design.inst_cell(inst);
                    state.pin_cap += self.port_capacitance(cell, port);
                    state.fanout += self.port_fanout_load(cell, port);
                }
                _ => state.fanout += 1.0,
            }
            state.load_pins.push(load_pin);
        }

        let prev_loc = tree.location(prev_pt);
        let mut length = Point::manhattan_distance(prev_loc, pt_loc);
        state.wire_length += length;
        // Back up from pt toward prev_pt adding repeaters every max_length.
        let mut pt_x = pt_loc.x;
        let mut pt_y = pt_loc.y;
        loop {
            let length_violation = max_length > 0 && state.wire_length > max_length;
            let cap_violation = self.wire_cap > 0.0
                && state.pin_cap < max_cap
                && state.pin_cap
                    + (self.dbu_to_meters(state.wire_length) * self.wire_cap as f64) as f32
                    > max_cap;
            if !length_violation && !cap_violation {
                break;
            }
            // Distance from pt to the repeater, backward toward prev_pt.
            let buf_dist: f64 = if length_violation {
                length as f64
                    - (state.wire_length as f64 - max_length as f64 * (1.0 - LENGTH_MARGIN))
            } else if cap_violation {
                let cap_length =
                    self.meters_to_dbu(((max_cap - state.pin_cap) / self.wire_cap) as f64);
                length as f64
                    - (state.wire_length as f64 - cap_length as f64 * (1.0 - LENGTH_MARGIN))
            } else {
                panic!("repair_net segment accounting: unreachable");
            };
            let dx = (prev_loc.x - pt_x) as f64;
            let dy = (prev_loc.y - pt_y) as f64;
            let d = buf_dist / length as f64;
            let buf_x = pt_x + (d * dx) as i32;
            let buf_y = pt_y + (d * dy) as i32;
            if !self.make_repeater(buf_x, buf_y, net, buffer_cell, &mut state) {
                // Placement fell outside the core; leave the rest of the
                // segment unrepaired.
                break;
            }
            // Update for the next round.
            length -= buf_dist as i32;
            state.wire_length = length;
            pt_x = buf_x;
            pt_y = buf_y;
        }
        state
    }

    /// Insert one repeater at (x, y) driving the pins in `state`, then cut
    /// `state` back to the repeater's input pin. Returns false when the
    /// location is outside the core and nothing was made.
    fn make_repeater(
        &mut self,
        x: i32,
        y: i32,
        in_net: NetId,
        buffer_cell: CellId,
        state: &mut SegState,
    ) -> bool {
        let buf_loc = Point::new(x, y);
        if let Some(core) = self.core {
            if !core.contains(buf_loc) {
                return false;
            }
        }
        let (input, output) = self
            .design
            .cell(buffer_cell)
            .buffer_ports()
            .expect("repeater cell must be a buffer");

        let buffer_name = self.make_unique_inst_name("repeater", false);
        let buffer_out_name = self.make_unique_net_name();
        clilog::debug!(
            "{} ({:.1} {:.1})",
            buffer_name,
            self.dbu_to_meters(x) * 1e6,
            self.dbu_to_meters(y) * 1e6
        );
        let buffer_out = self.design.make_net(&buffer_out_name);
        let sig_type = self.design.net_sig_type(in_net);
        self.design.set_sig_type(buffer_out, sig_type);
        let buffer = self.design.make_instance(buffer_cell, &buffer_name);
        self.design.set_location(buffer, buf_loc);
        self.design_area += self.area(buffer_cell);
        self.inserted_buffer_count += 1;
        self.level_drvr_pins_invalid();

        self.design.connect_pin(buffer, input, in_net);
        self.design.connect_pin(buffer, output, buffer_out);
        for &load_pin in &state.load_pins {
            if let (Some(inst), Some(port)) = (
                self.design.pin_instance(load_pin),
                self.design.pin_port(load_pin),
            ) {
                self.design.disconnect_pin(load_pin);
                self.design.connect_pin(inst, port, buffer_out);
            }
        }

        // Delete estimated parasitics on the upstream driver.
        self.design.delete_parasitics(in_net);

        // Resize the repeater to its downstream load as we back up.
        let drvr_pin = self.design.find_pin(buffer, output).unwrap();
        self.resize_drvr_to_target_slew(drvr_pin);
        let buffer_cell = self.design.inst_cell(buffer);
        let (input, _) = self.design.cell(buffer_cell).buffer_ports().unwrap();

        let buf_in_pin = self.design.find_pin(buffer, input).unwrap();
        state.load_pins.clear();
        state.load_pins.push(buf_in_pin);
        state.wire_length = 0;
        state.pin_cap = self.port_capacitance(buffer_cell, input);
        state.fanout = self.port_fanout_load(buffer_cell, input);
        true
    }

    /// Maximum distance along Steiner branches from the driver to any load
    /// of its net, in DBU.
    pub(crate) fn find_max_steiner_dist(&self, drvr_pin: PinId) -> i32 {
        let Some(net) = self.design.pin_net(drvr_pin) else {
            return 0;
        };
        match self.design.make_steiner_tree(net, true) {
            Some(tree) => find_max_steiner_dist_in_tree(&tree, drvr_pin),
            None => 0,
        }
    }
}

fn report_violations(counts: &RepairCounts) {
    if counts.slew_violations > 0 {
        println!("Found {} slew violations.", counts.slew_violations);
    }
    if counts.fanout_violations > 0 {
        println!("Found {} fanout violations.", counts.fanout_violations);
    }
    if counts.cap_violations > 0 {
        println!("Found {} capacitance violations.", counts.cap_violations);
    }
    if counts.length_violations > 0 {
        println!("Found {} long wires.", counts.length_violations);
    }
}

/// Depth-first max driver-to-load distance over tree branches.
pub(crate) fn find_max_steiner_dist_in_tree(tree: &SteinerTree, drvr_pin: PinId) -> i32 {
    let Some(drvr_pt) = tree.steiner_pt(drvr_pin) else {
        return 0;
    };
    let mut max_dist = 0;
    let mut stack: Vec<(SteinerPt, i32)> = vec![(drvr_pt, 0)];
    while let Some((pt, dist)) = stack.pop() {
        if tree.pin(pt).is_some() && pt != drvr_pt {
            max_dist = max_dist.max(dist);
            continue;
        }
        let loc = tree.location(pt);
        for child in [tree.left(pt), tree.right(pt)].into_iter().flatten() {
            let step = Point::manhattan_distance(loc, tree.location(child));
            stack.push((child, dist + step));
        }
    }
    max_dist
}
