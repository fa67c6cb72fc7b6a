// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Hold-violation repair by delay-buffer insertion.
//!
//! Failing endpoints pull in their fanin cones; the worst fanins get a
//! chain of buffers between the driver and exactly the loads that are
//! themselves failing hold. The added delay is bounded by the setup slack
//! unless the caller allows setup violations, so the repair cannot trade
//! one violation class for the other. Passes repeat while they make
//! progress.

use std::collections::VecDeque;

use indexmap::IndexSet;

use crate::db::{self, CellId, PinId};
use crate::fuzzy::{fuzzy_equal, fuzzy_less};
use crate::geom::Point;
use crate::resizer::{Design, ResizeError, Resizer};
use crate::sta::{MinMax, Slacks};

impl<D: Design> Resizer<'_, D> {
    /// Repair hold violations at every endpoint.
    pub fn repair_hold_violations(
        &mut self,
        buffer_cell: CellId,
        allow_setup_violations: bool,
    ) -> Result<(), ResizeError> {
        self.require_buffer(buffer_cell)?;
        self.init();
        self.design.find_requireds();
        let ends = self.design.endpoints();
        self.repair_hold_ends(&ends, buffer_cell, allow_setup_violations);
        Ok(())
    }

    /// Repair hold violations at one endpoint. For testing/debug.
    pub fn repair_hold_violations_at(
        &mut self,
        end_pin: PinId,
        buffer_cell: CellId,
        allow_setup_violations: bool,
    ) -> Result<(), ResizeError> {
        self.require_buffer(buffer_cell)?;
        self.init();
        self.design.find_requireds();
        self.repair_hold_ends(&[end_pin], buffer_cell, allow_setup_violations);
        Ok(())
    }

    fn repair_hold_ends(&mut self, ends: &[PinId], buffer_cell: CellId, allow_setup: bool) {
        let (mut worst_slack, mut hold_failures) = self.find_hold_violations(ends);
        if hold_failures.is_empty() {
            println!("No hold violations found.");
            return;
        }
        println!(
            "Found {} endpoints with hold violations.",
            hold_failures.len()
        );
        self.inserted_buffer_count = 0;
        let buffer_self_delay = self.buffer_self_delay(buffer_cell);
        let mut repair_count = 1;
        let mut pass = 1;
        while !hold_failures.is_empty()
            // Make sure we are making progress.
            && repair_count > 0
        {
            repair_count =
                self.repair_hold_pass(&hold_failures, buffer_cell, buffer_self_delay, allow_setup);
            clilog::debug!(
                "pass {} worst slack {:.3e} failures {} inserted {}",
                pass,
                worst_slack,
                hold_failures.len(),
                repair_count
            );
            self.design.find_requireds();
            (worst_slack, hold_failures) = self.find_hold_violations(ends);
            pass += 1;
        }
        if self.inserted_buffer_count > 0 {
            println!("Inserted {} hold buffers.", self.inserted_buffer_count);
            self.level_drvr_pins_invalid();
        }
    }

    fn find_hold_violations(&self, ends: &[PinId]) -> (f32, Vec<PinId>) {
        let mut worst_slack = f32::INFINITY;
        let mut hold_violations = Vec::new();
        for &end in ends {
            let slack = self.design.vertex_slack(end, MinMax::Min);
            if !self.design.is_clock_pin(end) && fuzzy_less(slack, 0.0) {
                worst_slack = worst_slack.min(slack);
                hold_violations.push(end);
            }
        }
        (worst_slack, hold_violations)
    }

    fn repair_hold_pass(
        &mut self,
        hold_failures: &[PinId],
        buffer_cell: CellId,
        buffer_self_delay: f32,
        allow_setup: bool,
    ) -> usize {
        let fanins = self.find_hold_fanins(hold_failures);
        let sorted_fanins = self.sort_hold_fanins(fanins);

        let mut repair_count = 0;
        let max_repair_count = ((hold_failures.len() as f64 * 0.2) as usize).max(10);
        for &vertex in &sorted_fanins {
            if repair_count >= max_repair_count {
                break;
            }
            let Some(net) = self.design.pin_net(vertex) else {
                continue;
            };
            let hold_slack = self.design.vertex_slack(vertex, MinMax::Min);
            if hold_slack < 0.0
                // Hands off special nets.
                && !self.design.is_special(net)
            {
                // Only add delay to loads with hold violations.
                let mut load_pins = Vec::new();
                let mut min_load_delay = f32::INFINITY;
                for fanout in self.design.graph_fanout(vertex) {
                    let slacks = self.design.vertex_slacks(fanout);
                    if hold_slack_of(&slacks) < 0.0 {
                        let delay = if allow_setup {
                            -hold_slack_of(&slacks)
                        } else {
                            (-hold_slack_of(&slacks)).min(setup_slack_of(&slacks))
                        };
                        if delay > 0.0 {
                            min_load_delay = min_load_delay.min(delay);
                            load_pins.push(fanout);
                        }
                    }
                }
                if !load_pins.is_empty() {
                    let buffer_count = (min_load_delay / buffer_self_delay).ceil() as usize;
                    clilog::debug!(
                        "{} hold={:.3e} inserting {} for {}/{} loads",
                        self.design.pin_path_name(vertex),
                        hold_slack,
                        buffer_count,
                        load_pins.len(),
                        self.fanout(vertex)
                    );
                    self.make_hold_delay(vertex, buffer_count, &load_pins, buffer_cell);
                    repair_count += buffer_count;
                    if self.over_max_area() {
                        clilog::warn!("Max utilization reached.");
                        return repair_count;
                    }
                }
            }
        }
        repair_count
    }

    /// All non-clock driver vertices in the fanin cones of the failures.
    fn find_hold_fanins(&self, ends: &[PinId]) -> IndexSet<PinId> {
        let mut fanins = IndexSet::new();
        let mut visited: IndexSet<PinId> = IndexSet::new();
        let mut queue: VecDeque<PinId> = VecDeque::new();
        for &end in ends {
            for fanin in self.design.graph_fanin(end) {
                queue.push_back(fanin);
            }
        }
        while let Some(vertex) = queue.pop_front() {
            if !visited.insert(vertex) {
                continue;
            }
            if !self.design.is_clock_pin(vertex) {
                if db::is_driver(&*self.design, vertex) {
                    fanins.insert(vertex);
                }
                for fanin in self.design.graph_fanin(vertex) {
                    queue.push_back(fanin);
                }
            }
        }
        fanins
    }

    /// Order: worst hold slack first; ties by larger hold/setup gap, then
    /// by deeper level.
    fn sort_hold_fanins(&self, fanins: IndexSet<PinId>) -> Vec<PinId> {
        let mut sorted_fanins: Vec<PinId> = fanins.into_iter().collect();
        sorted_fanins.sort_by(|&v1, &v2| {
            let s1 = self.design.vertex_slack(v1, MinMax::Min);
            let s2 = self.design.vertex_slack(v2, MinMax::Min);
            if fuzzy_equal(s1, s2) {
                let gap1 = slack_gap_of(&self.design.vertex_slacks(v1));
                let gap2 = slack_gap_of(&self.design.vertex_slacks(v2));
                // Break ties based on the hold/setup gap.
                if fuzzy_equal(gap1, gap2) {
                    self.design.level(v2).cmp(&self.design.level(v1))
                } else {
                    gap2.partial_cmp(&gap1).unwrap_or(std::cmp::Ordering::Equal)
                }
            } else {
                s1.partial_cmp(&s2).unwrap_or(std::cmp::Ordering::Equal)
            }
        });
        sorted_fanins
    }

    /// Insert `buffer_count` buffers in series between the driver and the
    /// failing loads, spread evenly toward the load centroid.
    fn make_hold_delay(
        &mut self,
        drvr: PinId,
        buffer_count: usize,
        load_pins: &[PinId],
        buffer_cell: CellId,
    ) {
        let (input, output) = self.design.cell(buffer_cell).buffer_ports().unwrap();
        let drvr_net = self.design.pin_net(drvr).unwrap();
        let mut in_net = drvr_net;
        let mut out_net = drvr_net;

        let drvr_loc = self.design.pin_location(drvr);
        let load_center = self.find_center(load_pins);
        let dx = (load_center.x - drvr_loc.x) / (buffer_count as i32 + 1);
        let dy = (load_center.y - drvr_loc.y) / (buffer_count as i32 + 1);

        // drvr_pin -> drvr_net -> hold_buffer -> ... -> out_net -> load_pins
        for i in 0..buffer_count {
            let out_net_name = self.make_unique_net_name();
            out_net = self.design.make_net(&out_net_name);
            let buffer_name = self.make_unique_inst_name("hold", false);
            let buffer = self.design.make_instance(buffer_cell, &buffer_name);
            self.inserted_buffer_count += 1;
            self.design_area += self.area(buffer_cell);
            self.level_drvr_pins_invalid();

            self.design.connect_pin(buffer, input, in_net);
            self.design.connect_pin(buffer, output, out_net);
            let step = i as i32 + 1;
            let buffer_loc = Point::new(drvr_loc.x + dx * step, drvr_loc.y + dy * step);
            self.design.set_location(buffer, buffer_loc);
            in_net = out_net;
        }

        for &load_pin in load_pins {
            if let (Some(load), Some(load_port)) = (
                self.design.pin_instance(load_pin),
                self.design.pin_port(load_pin),
            ) {
                self.design.disconnect_pin(load_pin);
                self.design.connect_pin(load, load_port, out_net);
            }
        }
        if self.have_estimated_parasitics {
            self.estimate_wire_parasitic(drvr_net);
            self.estimate_wire_parasitic(out_net);
        }
    }
}

/// Worst hold slack over rise/fall.
fn hold_slack_of(slacks: &Slacks) -> f32 {
    slacks[0][MinMax::Min.index()].min(slacks[1][MinMax::Min.index()])
}

/// Worst setup slack over rise/fall.
fn setup_slack_of(slacks: &Slacks) -> f32 {
    slacks[0][MinMax::Max.index()].min(slacks[1][MinMax::Max.index()])
}

/// Head room between the setup and hold slacks: how much delay can be
/// added for hold before setup breaks.
fn slack_gap_of(slacks: &Slacks) -> f32 {
    let rise = slacks[0][MinMax::Max.index()] - slacks[0][MinMax::Min.index()];
    let fall = slacks[1][MinMax::Max.index()] - slacks[1][MinMax::Min.index()];
    rise.min(fall)
}
