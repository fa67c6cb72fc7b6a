// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Wire-length characterization against the configured wire RC.
//!
//! Answers two planning questions: past what length is it faster to split
//! a wire in half with a buffer, and past what length does a driver/load
//! pair exceed a slew limit. Both are doubling searches followed by
//! bisection to 1% tolerance on an analytic gate-plus-Elmore delay.

use crate::db::CellId;
use crate::resizer::{Design, ResizeError, Resizer};

const SEARCH_TOL: f64 = 0.01; // 1%

impl<D: Design> Resizer<'_, D> {
    /// The max wire length before splitting the wire in half with a
    /// buffer is faster, in meters.
    pub fn find_max_wire_length(&mut self, buffer_cell: CellId) -> Result<f64, ResizeError> {
        let (_, output) = self.require_buffer(buffer_cell)?;
        if self.wire_res <= 0.0 || self.wire_cap <= 0.0 {
            return Err(ResizeError::NoWireRc);
        }
        let drvr_r = self.design.cell(buffer_cell).ports[output].drive_resistance;
        // wire_length1 lower bound, wire_length2 upper bound.
        let mut wire_length1 = 0.0f64;
        // Initial guess with wire resistance same as driver resistance.
        let mut wire_length2 = (drvr_r / self.wire_res) as f64;
        let mut diff2 = self.split_wire_delay_diff(wire_length2, buffer_cell);
        // Binary search for diff = 0.
        while (wire_length1 - wire_length2).abs() > wire_length1.max(wire_length2) * SEARCH_TOL {
            if diff2 < 0.0 {
                wire_length1 = wire_length2;
                wire_length2 *= 2.0;
                diff2 = self.split_wire_delay_diff(wire_length2, buffer_cell);
            } else {
                let wire_length3 = (wire_length1 + wire_length2) / 2.0;
                let diff3 = self.split_wire_delay_diff(wire_length3, buffer_cell);
                if diff3 < 0.0 {
                    wire_length1 = wire_length3;
                } else {
                    wire_length2 = wire_length3;
                    diff2 = diff3;
                }
            }
        }
        Ok(wire_length1)
    }

    // Objective function: unsplit delay minus split delay (two half wires
    // through an extra buffer).
    fn split_wire_delay_diff(&self, wire_length: f64, buffer_cell: CellId) -> f32 {
        let (delay1, _) = self.buffer_wire_delay(buffer_cell, wire_length);
        let (delay2, _) = self.buffer_wire_delay(buffer_cell, wire_length / 2.0);
        delay1 - delay2 * 2.0
    }

    /// Delay and slew of `buffer_cell` driving `wire_length` meters of
    /// wire into a copy of its own input.
    pub(crate) fn buffer_wire_delay(&self, buffer_cell: CellId, wire_length: f64) -> (f32, f32) {
        let (input, output) = self
            .design
            .cell(buffer_cell)
            .buffer_ports()
            .expect("buffer cell has no buffer ports");
        self.cell_wire_delay(buffer_cell, output, buffer_cell, input, wire_length)
    }

    /// Cell delay plus wire delay, driven at the target slews. The driver
    /// and load ports do not have to belong to the same cell.
    pub(crate) fn cell_wire_delay(
        &self,
        drvr_cell: CellId,
        drvr_port: usize,
        load_cell: CellId,
        load_port: usize,
        wire_length: f64, // meters
    ) -> (f32, f32) {
        let wire_cap = (wire_length * self.wire_cap as f64) as f32;
        let wire_res = (wire_length * self.wire_res as f64) as f32;
        let load_pin_cap = self.port_capacitance(load_cell, load_port);
        let (delays, slews) = self.gate_delays(drvr_cell, drvr_port, wire_cap + load_pin_cap);
        // First moment of the lumped wire into the load pin.
        let wire_delay = wire_res * (wire_cap / 2.0 + load_pin_cap);
        let delay = delays[0].max(delays[1]) + wire_delay;
        let slew = slews[0].max(slews[1]) + wire_delay;
        (delay, slew)
    }

    /// The max wire length at which `drvr_cell` driving `load_cell` stays
    /// under `max_slew`, in meters.
    pub fn find_max_slew_wire_length(
        &mut self,
        drvr_cell: CellId,
        load_cell: CellId,
        max_slew: f32,
    ) -> Result<f64, ResizeError> {
        let (_, drvr_port) = self.require_buffer(drvr_cell)?;
        let (load_port, _) = self.require_buffer(load_cell)?;
        if self.wire_res <= 0.0 || self.wire_cap <= 0.0 {
            return Err(ResizeError::NoWireRc);
        }
        // wire_length1 lower bound, wire_length2 upper bound.
        let mut wire_length1 = 0.0f64;
        let mut wire_length2 = (max_slew as f64 / (self.wire_res as f64 * self.wire_cap as f64)).sqrt();
        let mut diff2 =
            self.max_slew_wire_diff(drvr_cell, drvr_port, load_cell, load_port, wire_length2, max_slew);
        // Binary search for diff = 0.
        while (wire_length1 - wire_length2).abs() > wire_length1.max(wire_length2) * SEARCH_TOL {
            if diff2 < 0.0 {
                wire_length1 = wire_length2;
                wire_length2 *= 2.0;
                diff2 = self.max_slew_wire_diff(
                    drvr_cell,
                    drvr_port,
                    load_cell,
                    load_port,
                    wire_length2,
                    max_slew,
                );
            } else {
                let wire_length3 = (wire_length1 + wire_length2) / 2.0;
                let diff3 = self.max_slew_wire_diff(
                    drvr_cell,
                    drvr_port,
                    load_cell,
                    load_port,
                    wire_length3,
                    max_slew,
                );
                if diff3 < 0.0 {
                    wire_length1 = wire_length3;
                } else {
                    wire_length2 = wire_length3;
                    diff2 = diff3;
                }
            }
        }
        Ok(wire_length1)
    }

    // Objective function.
    #[allow(clippy::too_many_arguments)]
    fn max_slew_wire_diff(
        &self,
        drvr_cell: CellId,
        drvr_port: usize,
        load_cell: CellId,
        load_port: usize,
        wire_length: f64,
        max_slew: f32,
    ) -> f32 {
        let (_, slew) = self.cell_wire_delay(drvr_cell, drvr_port, load_cell, load_port, wire_length);
        slew - max_slew
    }
}
