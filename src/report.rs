// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Diagnostics: long-wire ranking, floating nets and Steiner SVG dumps.

use std::path::Path;

use crate::db::{self, NetId, PinId};
use crate::resizer::{Design, Resizer};

impl<D: Design> Resizer<'_, D> {
    /// Print the `count` longest-wire drivers: max load Manhattan
    /// distance, max Steiner distance, and the lumped wire delay.
    pub fn report_long_wires(&mut self, count: usize, digits: usize) {
        self.design.ensure_levelized();
        self.design.ensure_clk_network();
        let drvrs = self.find_long_wires();
        println!("Driver    length delay");
        for drvr_pin in drvrs.into_iter().take(count) {
            if self.design.is_top_level_port(drvr_pin) {
                continue;
            }
            let wire_length = self.dbu_to_meters(self.max_load_manhattan_distance(drvr_pin));
            let steiner_length = self.dbu_to_meters(self.find_max_steiner_dist(drvr_pin));
            let delay =
                wire_length * self.wire_res as f64 * wire_length * self.wire_cap as f64 * 0.5;
            println!(
                "{} manhtn {:.1} steiner {:.1} {:.prec$e}",
                self.design.pin_path_name(drvr_pin),
                wire_length * 1e6,
                steiner_length * 1e6,
                delay,
                prec = digits
            );
        }
    }

    /// Non-clock, non-constant drivers ordered by decreasing max load
    /// Manhattan distance.
    fn find_long_wires(&mut self) -> Vec<PinId> {
        let mut drvr_dists: Vec<(PinId, i32)> = Vec::new();
        for net in self.design.nets() {
            for drvr_pin in self.design.drivers(net) {
                // Hands off the clock nets.
                if !self.design.is_clock_pin(drvr_pin) && !self.design.is_constant(drvr_pin) {
                    drvr_dists.push((drvr_pin, self.max_load_manhattan_distance(drvr_pin)));
                }
            }
        }
        drvr_dists.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        drvr_dists.into_iter().map(|(drvr, _)| drvr).collect()
    }

    pub(crate) fn max_load_manhattan_distance(&self, drvr_pin: PinId) -> i32 {
        let drvr_loc = self.design.pin_location(drvr_pin);
        let mut max_dist = 0;
        for load in self.design.graph_fanout(drvr_pin) {
            let load_loc = self.design.pin_location(load);
            max_dist = max_dist.max(crate::geom::Point::manhattan_distance(drvr_loc, load_loc));
        }
        max_dist
    }

    /// Nets with loads but no driver, sorted by name.
    pub fn find_floating_nets(&self) -> Vec<NetId> {
        let mut floating_nets: Vec<NetId> = Vec::new();
        for net in self.design.nets() {
            let pins = self.design.net_pins(net);
            let has_drvr = pins.iter().any(|&pin| db::is_driver(&*self.design, pin));
            let has_load = pins.iter().any(|&pin| db::is_load(&*self.design, pin));
            if !has_drvr && has_load {
                floating_nets.push(net);
            }
        }
        floating_nets.sort_by(|&a, &b| self.design.net_name(a).cmp(self.design.net_name(b)));
        floating_nets
    }

    /// Dump a net's Steiner tree as SVG.
    pub fn write_net_svg(&self, net: NetId, path: &Path) -> std::io::Result<()> {
        if let Some(tree) = self.design.make_steiner_tree(net, true) {
            tree.write_svg(path)?;
        }
        Ok(())
    }
}
