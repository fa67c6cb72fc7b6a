// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Clock inverter cloning.
//!
//! A shared inverter inside a clock network forces clock-tree synthesis
//! to treat all its fanout as one subtree. Cloning one inverter per load
//! leaves a private inverter at each sink, after which the original and
//! its output net are deleted.

use std::collections::VecDeque;

use indexmap::IndexSet;

use crate::db::{self, InstId};
use crate::resizer::{Design, Resizer};

impl<D: Design> Resizer<'_, D> {
    /// Clone every inverter driving part of a clock network, one clone
    /// per load.
    pub fn repair_clk_inverters(&mut self) {
        self.design.ensure_levelized();
        self.design.ensure_clk_network();
        self.ensure_block();
        for inv in self.find_clk_inverters() {
            self.clone_clk_inverter(inv);
        }
    }

    /// Forward BFS from the clock roots, stopping at register clock pins,
    /// collecting every inverter driver on the way.
    fn find_clk_inverters(&self) -> Vec<InstId> {
        let mut clk_inverters = Vec::new();
        let mut seen_insts: IndexSet<InstId> = IndexSet::new();
        let mut visited: IndexSet<crate::db::PinId> = IndexSet::new();
        let mut queue: VecDeque<crate::db::PinId> = self.design.clock_roots().into();
        while let Some(vertex) = queue.pop_front() {
            if !visited.insert(vertex) {
                continue;
            }
            if let Some(inst) = self.design.pin_instance(vertex) {
                if db::is_driver(&*self.design, vertex)
                    && self.design.cell(self.design.inst_cell(inst)).is_inverter()
                    && seen_insts.insert(inst)
                {
                    clilog::debug!("clock inverter {}", self.design.inst_name(inst));
                    clk_inverters.push(inst);
                }
            }
            if !self.design.is_reg_clk_pin(vertex) {
                for next in self.design.graph_fanout(vertex) {
                    queue.push_back(next);
                }
            }
        }
        clk_inverters
    }

    fn clone_clk_inverter(&mut self, inv: InstId) {
        let inv_cell = self.design.inst_cell(inv);
        let Some((in_port, out_port)) = self.design.cell(inv_cell).buffer_ports() else {
            return;
        };
        let (Some(in_pin), Some(out_pin)) = (
            self.design.find_pin(inv, in_port),
            self.design.find_pin(inv, out_port),
        ) else {
            return;
        };
        let (Some(in_net), Some(out_net)) =
            (self.design.pin_net(in_pin), self.design.pin_net(out_pin))
        else {
            return;
        };
        let inv_name = self.design.inst_name(inv).to_string();
        let sig_type = self.design.net_sig_type(in_net);
        for load_pin in self.design.net_pins(out_net) {
            if load_pin == out_pin {
                continue;
            }
            let (Some(load), Some(load_port)) = (
                self.design.pin_instance(load_pin),
                self.design.pin_port(load_pin),
            ) else {
                continue;
            };
            let clone_name = self.make_unique_inst_name(&inv_name, true);
            let clone = self.design.make_instance(inv_cell, &clone_name);
            let clone_loc = self.design.pin_location(load_pin);
            self.design.set_location(clone, clone_loc);
            self.design_area += self.area(inv_cell);

            let clone_out_net_name = self.make_unique_net_name();
            let clone_out_net = self.design.make_net(&clone_out_net_name);
            self.design.set_sig_type(clone_out_net, sig_type);

            self.design.connect_pin(clone, in_port, in_net);
            self.design.connect_pin(clone, out_port, clone_out_net);

            // Move the load onto the clone.
            self.design.disconnect_pin(load_pin);
            self.design.connect_pin(load, load_port, clone_out_net);
        }

        self.design.disconnect_pin(in_pin);
        self.design.disconnect_pin(out_pin);
        self.design.delete_net(out_net);
        self.design.delete_instance(inv);
        self.design_area -= self.area(inv_cell);
        self.level_drvr_pins_invalid();
    }
}
