// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The repair engine core: pass state, bookkeeping and the entry points
//! that do not have a module of their own.
//!
//! A [`Resizer`] borrows the external design services for the duration of
//! a session and owns everything the passes derive from them: wire RC,
//! target loads and slews, the level-ordered driver list, name counters
//! and the area ledger. Every public entry point runs a preamble that
//! revalidates this state and invalidates the timer's derived caches
//! before the first edit.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::db::{self, CellId, InstId, Network, PinId};
use crate::fuzzy::fuzzy_greater_equal;
use crate::geom::{self, Point, Rect};
use crate::liberty::PortDirection;
use crate::sta::Timer;
use crate::steiner::SteinerBuilder;

/// The three external collaborators, borrowed as one design object.
pub trait Design: Network + Timer + SteinerBuilder {}
impl<T: Network + Timer + SteinerBuilder> Design for T {}

/// Configuration errors reported before any netlist mutation.
#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("no resize library specified")]
    NoResizeLibrary,
    #[error("{0} is not a buffer cell")]
    NotABuffer(String),
    #[error("wire resistance and capacitance are not set")]
    NoWireRc,
    #[error("resize preamble has not been run")]
    NoTargetLoads,
}

/// Post-placement repair engine over a borrowed design.
pub struct Resizer<'d, D: Design> {
    pub(crate) design: &'d mut D,

    // Per-corner wire RC, per meter.
    pub(crate) wire_res: f32,
    pub(crate) wire_cap: f32,
    pub(crate) wire_clk_res: f32,
    pub(crate) wire_clk_cap: f32,

    pub(crate) core: Option<Rect>,
    pub(crate) design_area: f64,
    max_area: f64,
    block_ensured: bool,

    pub(crate) have_estimated_parasitics: bool,

    pub(crate) target_load_map: IndexMap<CellId, f32>,
    pub(crate) target_loads_valid: bool,
    /// Target rise/fall slews averaged over the resize libraries' buffers.
    pub(crate) tgt_slews: [f32; 2],

    pub(crate) level_drvr_pins: Vec<PinId>,
    pub(crate) level_drvr_pins_valid: bool,

    dont_use: IndexSet<CellId>,

    unique_net_index: u64,
    unique_inst_index: u64,

    pub(crate) inserted_buffer_count: usize,
    pub(crate) resize_count: usize,
    pub(crate) resized_multi_output_insts: IndexSet<InstId>,
}

impl<'d, D: Design> Resizer<'d, D> {
    pub fn new(design: &'d mut D) -> Resizer<'d, D> {
        Resizer {
            design,
            wire_res: 0.0,
            wire_cap: 0.0,
            wire_clk_res: 0.0,
            wire_clk_cap: 0.0,
            core: None,
            design_area: 0.0,
            max_area: 0.0,
            block_ensured: false,
            have_estimated_parasitics: false,
            target_load_map: IndexMap::new(),
            target_loads_valid: false,
            tgt_slews: [0.0, 0.0],
            level_drvr_pins: Vec::new(),
            level_drvr_pins_valid: false,
            dont_use: IndexSet::new(),
            unique_net_index: 1,
            unique_inst_index: 1,
            inserted_buffer_count: 0,
            resize_count: 0,
            resized_multi_output_insts: IndexSet::new(),
        }
    }

    pub fn design(&self) -> &D {
        self.design
    }

    // ── Configuration ────────────────────────────────────────────────────

    /// Signal-net wire RC per meter. Re-arms the analysis corner and
    /// disables incremental timing.
    pub fn set_wire_rc(&mut self, wire_res: f32, wire_cap: f32) {
        self.set_wire_corner();
        self.wire_res = wire_res;
        self.wire_cap = wire_cap;
    }

    /// Clock-net wire RC per meter.
    pub fn set_wire_clk_rc(&mut self, wire_res: f32, wire_cap: f32) {
        self.set_wire_corner();
        self.wire_clk_res = wire_res;
        self.wire_clk_cap = wire_cap;
    }

    fn set_wire_corner(&mut self) {
        self.design.ensure_levelized();
        // Disable incremental timing.
        self.design.delays_invalid();
        self.design.arrivals_invalid();
    }

    pub fn set_max_utilization(&mut self, max_utilization: f64) {
        self.ensure_block();
        self.max_area = self.core_area() * max_utilization;
    }

    pub fn set_dont_use(&mut self, dont_use: &[CellId]) {
        self.dont_use.extend(dont_use.iter().copied());
    }

    pub(crate) fn dont_use(&self, cell: CellId) -> bool {
        self.design.cell(cell).dont_use || self.dont_use.contains(&cell)
    }

    // ── Block / floorplan state ──────────────────────────────────────────

    pub(crate) fn ensure_block(&mut self) {
        if !self.block_ensured {
            self.core = self.design.core_area().filter(|core| {
                !(core.x_min == 0 && core.x_max == 0 && core.y_min == 0 && core.y_max == 0)
            });
            self.design_area = self.find_design_area();
            self.block_ensured = true;
        }
    }

    /// Common entry-point preamble.
    pub(crate) fn init(&mut self) {
        self.design.ensure_levelized();
        self.ensure_block();
        self.ensure_level_drvr_pins();
        self.design.ensure_clk_network();
        // Disable incremental timing before the pass edits anything.
        self.design.delays_invalid();
        self.design.arrivals_invalid();
    }

    pub fn core_area(&self) -> f64 {
        match self.core {
            Some(core) => self.dbu_to_meters(core.dx()) * self.dbu_to_meters(core.dy()),
            None => 0.0,
        }
    }

    pub fn utilization(&mut self) -> f64 {
        self.ensure_block();
        let core_area = self.core_area();
        if core_area > 0.0 {
            self.design_area / core_area
        } else {
            1.0
        }
    }

    pub fn design_area(&mut self) -> f64 {
        self.ensure_block();
        self.design_area
    }

    pub fn max_area(&self) -> f64 {
        self.max_area
    }

    pub(crate) fn over_max_area(&self) -> bool {
        self.max_area > 0.0 && fuzzy_greater_equal(self.design_area as f32, self.max_area as f32)
    }

    pub(crate) fn area(&self, cell: CellId) -> f64 {
        self.design.cell(cell).area
    }

    fn find_design_area(&self) -> f64 {
        self.design
            .instances()
            .iter()
            .map(|&inst| self.area(self.design.inst_cell(inst)))
            .sum()
    }

    // ── Units ────────────────────────────────────────────────────────────

    pub(crate) fn dbu_to_meters(&self, dist: i32) -> f64 {
        geom::dbu_to_meters(dist, self.design.dbu_per_micron())
    }

    pub(crate) fn meters_to_dbu(&self, dist: f64) -> i32 {
        geom::meters_to_dbu(dist, self.design.dbu_per_micron())
    }

    // ── Level-ordered driver list ────────────────────────────────────────

    pub(crate) fn ensure_level_drvr_pins(&mut self) {
        if !self.level_drvr_pins_valid {
            let mut drvrs: Vec<PinId> = Vec::new();
            for net in self.design.nets() {
                for pin in self.design.net_pins(net) {
                    if db::is_driver(&*self.design, pin) {
                        drvrs.push(pin);
                    }
                }
            }
            // Break level ties on path name for stable results.
            drvrs.sort_by(|&a, &b| {
                self.design
                    .level(a)
                    .cmp(&self.design.level(b))
                    .then_with(|| self.design.pin_path_name(a).cmp(&self.design.pin_path_name(b)))
            });
            drvrs.dedup();
            self.level_drvr_pins = drvrs;
            self.level_drvr_pins_valid = true;
        }
    }

    /// Instances were added, removed or moved: the driver order is stale.
    pub(crate) fn level_drvr_pins_invalid(&mut self) {
        self.level_drvr_pins_valid = false;
    }

    // ── Unique names ─────────────────────────────────────────────────────

    pub(crate) fn make_unique_net_name(&mut self) -> String {
        loop {
            let name = format!("net{}", self.unique_net_index);
            self.unique_net_index += 1;
            if self.design.find_net(&name).is_none() {
                return name;
            }
        }
    }

    pub(crate) fn make_unique_inst_name(&mut self, base_name: &str, underscore: bool) -> String {
        loop {
            let name = if underscore {
                format!("{}_{}", base_name, self.unique_inst_index)
            } else {
                format!("{}{}", base_name, self.unique_inst_index)
            };
            self.unique_inst_index += 1;
            if self.design.find_instance(&name).is_none() {
                return name;
            }
        }
    }

    // ── Small shared queries ─────────────────────────────────────────────

    pub(crate) fn has_fanout(&self, drvr_pin: PinId) -> bool {
        !self.design.graph_fanout(drvr_pin).is_empty()
    }

    pub(crate) fn fanout(&self, drvr_pin: PinId) -> usize {
        let Some(net) = self.design.pin_net(drvr_pin) else {
            return 0;
        };
        self.design
            .net_pins(net)
            .iter()
            .filter(|&&pin| pin != drvr_pin)
            .count()
    }

    pub(crate) fn is_func_one_zero(&self, drvr_pin: PinId) -> bool {
        match (self.design.pin_instance(drvr_pin), self.design.pin_port(drvr_pin)) {
            (Some(inst), Some(port)) => {
                let cell = self.design.cell(self.design.inst_cell(inst));
                matches!(
                    cell.ports[port].function,
                    Some(crate::liberty::PortFunction::Zero)
                        | Some(crate::liberty::PortFunction::One)
                )
            }
            _ => false,
        }
    }

    pub(crate) fn has_multiple_outputs(&self, inst: InstId) -> bool {
        let mut output_count = 0;
        for pin in self.design.inst_pins(inst) {
            if self.design.pin_direction(pin) == PortDirection::Output
                && self.design.pin_net(pin).is_some()
            {
                output_count += 1;
                if output_count > 1 {
                    return true;
                }
            }
        }
        false
    }

    pub(crate) fn port_capacitance(&self, cell: CellId, port: usize) -> f32 {
        self.design.cell(cell).ports[port].cap
    }

    pub(crate) fn port_fanout_load(&self, cell: CellId, port: usize) -> f32 {
        let lib_cell = self.design.cell(cell);
        lib_cell.ports[port]
            .fanout_load
            .or(self.design.library(cell.lib as usize).default_fanout_load)
            .unwrap_or(0.0)
    }

    pub(crate) fn buffer_input_capacitance(&self, buffer_cell: CellId) -> f32 {
        let (input, _) = self
            .design
            .cell(buffer_cell)
            .buffer_ports()
            .expect("buffer cell has no buffer ports");
        self.port_capacitance(buffer_cell, input)
    }

    pub(crate) fn find_center(&self, pins: &[PinId]) -> Point {
        let mut sum_x = 0i64;
        let mut sum_y = 0i64;
        for &pin in pins {
            let loc = self.design.pin_location(pin);
            sum_x += loc.x as i64;
            sum_y += loc.y as i64;
        }
        Point::new(
            (sum_x / pins.len() as i64) as i32,
            (sum_y / pins.len() as i64) as i32,
        )
    }

    /// Check that `cell` is a usable buffer, returning its port pair.
    pub(crate) fn require_buffer(&self, cell: CellId) -> Result<(usize, usize), ResizeError> {
        self.design
            .cell(cell)
            .buffer_ports()
            .ok_or_else(|| ResizeError::NotABuffer(self.design.cell(cell).name.to_string()))
    }

    // ── Buffer removal ───────────────────────────────────────────────────

    /// Remove buffers whose nets stay inside the block, shorting each
    /// buffer's loads onto its input net.
    pub fn remove_buffers(&mut self) {
        self.ensure_block();
        // Disable incremental timing.
        self.design.delays_invalid();
        self.design.arrivals_invalid();

        let mut remove_count = 0;
        for inst in self.design.instances() {
            let cell_id = self.design.inst_cell(inst);
            let cell = self.design.cell(cell_id);
            if !cell.is_buffer() {
                continue;
            }
            let (input, output) = cell.buffer_ports().unwrap();
            let (Some(input_pin), Some(output_pin)) = (
                self.design.find_pin(inst, input),
                self.design.find_pin(inst, output),
            ) else {
                continue;
            };
            let (Some(input_net), Some(output_net)) = (
                self.design.pin_net(input_pin),
                self.design.pin_net(output_pin),
            ) else {
                continue;
            };
            if db::has_top_level_port(&*self.design, input_net)
                || db::has_top_level_port(&*self.design, output_net)
            {
                continue;
            }
            for pin in self.design.net_pins(output_net) {
                if pin != output_pin {
                    let pin_inst = self.design.pin_instance(pin).unwrap();
                    let pin_port = self.design.pin_port(pin).unwrap();
                    self.design.disconnect_pin(pin);
                    self.design.connect_pin(pin_inst, pin_port, input_net);
                }
            }
            self.design.delete_net(output_net);
            self.design.delete_instance(inst);
            self.design.delete_parasitics(input_net);
            self.design_area -= self.area(cell_id);
            self.level_drvr_pins_invalid();
            remove_count += 1;
        }
        println!("Removed {} buffers.", remove_count);
    }

    // ── Port buffering ───────────────────────────────────────────────────

    /// Insert a buffer after every non-clock, non-special input port.
    pub fn buffer_inputs(&mut self, buffer_cell: CellId) -> Result<(), ResizeError> {
        let (input, output) = self.require_buffer(buffer_cell)?;
        self.init();
        self.inserted_buffer_count = 0;
        for pin in self.design.top_ports() {
            let Some(net) = self.design.pin_net(pin) else {
                continue;
            };
            if self.design.pin_direction(pin) == PortDirection::Input
                && !self.design.is_clock_pin(pin)
                && !self.design.is_special(net)
            {
                self.buffer_input(pin, buffer_cell, input, output);
            }
        }
        if self.inserted_buffer_count > 0 {
            println!("Inserted {} input buffers.", self.inserted_buffer_count);
            self.level_drvr_pins_invalid();
        }
        Ok(())
    }

    fn buffer_input(&mut self, top_pin: PinId, buffer_cell: CellId, input: usize, output: usize) {
        let input_net = self.design.pin_net(top_pin).unwrap();
        let buffer_out_name = self.make_unique_net_name();
        let buffer_name = self.make_unique_inst_name("input", false);
        let buffer_out = self.design.make_net(&buffer_out_name);
        let buffer = self.design.make_instance(buffer_cell, &buffer_name);

        let pin_loc = self.design.pin_location(top_pin);
        let buf_loc = match self.core {
            Some(core) => core.closest_pt_inside(pin_loc),
            None => pin_loc,
        };
        self.design.set_location(buffer, buf_loc);
        self.design_area += self.area(buffer_cell);
        self.inserted_buffer_count += 1;

        for pin in self.design.net_pins(input_net) {
            // Leave the input port pin connected to its net.
            if pin != top_pin {
                if let (Some(inst), Some(port)) =
                    (self.design.pin_instance(pin), self.design.pin_port(pin))
                {
                    self.design.disconnect_pin(pin);
                    self.design.connect_pin(inst, port, buffer_out);
                }
            }
        }
        self.design.connect_pin(buffer, input, input_net);
        self.design.connect_pin(buffer, output, buffer_out);
        self.design.delete_parasitics(input_net);
    }

    /// Insert a buffer before every non-special output port.
    pub fn buffer_outputs(&mut self, buffer_cell: CellId) -> Result<(), ResizeError> {
        let (input, output) = self.require_buffer(buffer_cell)?;
        self.init();
        self.inserted_buffer_count = 0;
        for pin in self.design.top_ports() {
            let Some(net) = self.design.pin_net(pin) else {
                continue;
            };
            if self.design.pin_direction(pin) == PortDirection::Output
                && !self.design.is_special(net)
            {
                self.buffer_output(pin, buffer_cell, input, output);
            }
        }
        if self.inserted_buffer_count > 0 {
            println!("Inserted {} output buffers.", self.inserted_buffer_count);
            self.level_drvr_pins_invalid();
        }
        Ok(())
    }

    fn buffer_output(&mut self, top_pin: PinId, buffer_cell: CellId, input: usize, output: usize) {
        let output_net = self.design.pin_net(top_pin).unwrap();
        let buffer_in_name = self.make_unique_net_name();
        let buffer_name = self.make_unique_inst_name("output", false);
        let buffer_in = self.design.make_net(&buffer_in_name);
        let buffer = self.design.make_instance(buffer_cell, &buffer_name);

        // Legalization downstream will resolve the overlap with the pad.
        let buf_loc = self.design.pin_location(top_pin);
        self.design.set_location(buffer, buf_loc);
        self.design_area += self.area(buffer_cell);
        self.inserted_buffer_count += 1;

        for pin in self.design.net_pins(output_net) {
            // Leave the output port pin connected to its net.
            if pin != top_pin {
                if let (Some(inst), Some(port)) =
                    (self.design.pin_instance(pin), self.design.pin_port(pin))
                {
                    self.design.disconnect_pin(pin);
                    self.design.connect_pin(inst, port, buffer_in);
                }
            }
        }
        self.design.connect_pin(buffer, input, buffer_in);
        self.design.connect_pin(buffer, output, output_net);
        self.design.delete_parasitics(output_net);
    }

    // ── Counters ─────────────────────────────────────────────────────────

    pub fn inserted_buffer_count(&self) -> usize {
        self.inserted_buffer_count
    }

    pub fn resize_count(&self) -> usize {
        self.resize_count
    }
}
