// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Tie hi/low fanout repair.
//!
//! A tie cell driving many loads becomes one tie cell per load, each
//! placed just off the nearest side of its load's bounding box, after
//! which the shared tie and its net are deleted.

use crate::db::{CellId, InstId, PinId};
use crate::geom::Point;
use crate::resizer::{Design, Resizer};

impl<D: Design> Resizer<'_, D> {
    /// Duplicate every instance of `tie_cell` so each load gets a private
    /// driver, `separation` meters off the load's bounding box.
    pub fn repair_tie_fanout(&mut self, tie_cell: CellId, separation: f64, verbose: bool) {
        self.ensure_block();
        let Some(tie_port) = self.design.cell(tie_cell).output_ports().next() else {
            return;
        };
        let insts = self.find_cell_instances(tie_cell);
        let mut tie_count = 0;
        let separation_dbu = self.meters_to_dbu(separation);
        for inst in insts {
            let Some(drvr_pin) = self.design.find_pin(inst, tie_port) else {
                continue;
            };
            let Some(net) = self.design.pin_net(drvr_pin) else {
                continue;
            };
            let inst_name = self.design.inst_name(inst).to_string();
            for load in self.design.net_pins(net) {
                if load == drvr_pin {
                    continue;
                }
                let (Some(load_inst), Some(load_port)) = (
                    self.design.pin_instance(load),
                    self.design.pin_port(load),
                ) else {
                    continue;
                };
                // Make tie inst.
                let tie_loc = self.tie_location(load, separation_dbu);
                let tie_name = self.make_unique_inst_name(&inst_name, true);
                let tie = self.design.make_instance(tie_cell, &tie_name);
                self.design.set_location(tie, tie_loc);

                // Make tie output net.
                let load_net_name = self.make_unique_net_name();
                let load_net = self.design.make_net(&load_net_name);

                // Connect tie inst output.
                self.design.connect_pin(tie, tie_port, load_net);

                // Connect load to tie output net.
                self.design.disconnect_pin(load);
                self.design.connect_pin(load_inst, load_port, load_net);

                self.design_area += self.area(tie_cell);
                tie_count += 1;
                if verbose {
                    clilog::info!(
                        "inserted {} near {}",
                        tie_name,
                        self.design.inst_name(load_inst)
                    );
                }
            }

            // Delete the original tie output net and instance.
            self.design.delete_net(net);
            self.design.delete_instance(inst);
            self.design_area -= self.area(tie_cell);
        }

        if tie_count > 0 {
            println!(
                "Inserted {} tie {} instances.",
                tie_count,
                self.design.cell(tie_cell).name
            );
            self.level_drvr_pins_invalid();
        }
    }

    fn find_cell_instances(&self, cell: CellId) -> Vec<InstId> {
        self.design
            .instances()
            .into_iter()
            .filter(|&inst| self.design.inst_cell(inst) == cell)
            .collect()
    }

    /// Place the tie on the side of the load's bounding box strictly
    /// nearest the load pin; dead ties on the load itself. Clamped into
    /// the core.
    fn tie_location(&self, load: PinId, separation: i32) -> Point {
        let load_loc = self.design.pin_location(load);
        let mut tie_x = load_loc.x;
        let mut tie_y = load_loc.y;
        if let Some(load_inst) = self.design.pin_instance(load) {
            let bbox = self.design.inst_bbox(load_inst);
            let left_dist = (load_loc.x - bbox.x_min).abs();
            let right_dist = (load_loc.x - bbox.x_max).abs();
            let bot_dist = (load_loc.y - bbox.y_min).abs();
            let top_dist = (load_loc.y - bbox.y_max).abs();
            if left_dist < right_dist && left_dist < bot_dist && left_dist < top_dist {
                tie_x -= separation;
            }
            if right_dist < left_dist && right_dist < bot_dist && right_dist < top_dist {
                tie_x += separation;
            }
            if bot_dist < left_dist && bot_dist < right_dist && bot_dist < top_dist {
                tie_y -= separation;
            }
            if top_dist < left_dist && top_dist < right_dist && top_dist < bot_dist {
                tie_y += separation;
            }
        }
        match self.core {
            Some(core) => core.closest_pt_inside(Point::new(tie_x, tie_y)),
            None => Point::new(tie_x, tie_y),
        }
    }
}
