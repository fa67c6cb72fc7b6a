// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The static timing analysis service consumed by the repair passes.
//!
//! Delay calculation, levelization, arrival/required propagation and limit
//! checking belong to an external STA engine. The passes drive it through
//! [`Timer`], keyed by pin handles (one timing vertex per pin), and are
//! responsible for telling it exactly which derived state each netlist
//! edit invalidates.

use crate::db::{CellId, NetId, PinId};
use crate::parasitics::WireModel;

/// Analysis corner selector: min (hold) or max (setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMax {
    Min,
    Max,
}

impl MinMax {
    pub fn index(self) -> usize {
        match self {
            MinMax::Min => 0,
            MinMax::Max => 1,
        }
    }
}

/// Edge direction of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiseFall {
    Rise,
    Fall,
}

impl RiseFall {
    pub fn index(self) -> usize {
        match self {
            RiseFall::Rise => 0,
            RiseFall::Fall => 1,
        }
    }

    pub fn both() -> [RiseFall; 2] {
        [RiseFall::Rise, RiseFall::Fall]
    }
}

/// Slack matrix indexed `[rise/fall][min/max]`.
pub type Slacks = [[f32; 2]; 2];

/// A `(value, limit, slack)` triple from a limit check.
pub type LimitCheck = (f32, f32, f32);

/// Query, invalidation and parasitic-storage capabilities of the external
/// timing engine.
pub trait Timer {
    // Graph maintenance.
    fn ensure_levelized(&mut self);
    fn ensure_clk_network(&mut self);
    /// Topological depth of the pin's vertex.
    fn level(&self, pin: PinId) -> u32;
    fn is_constant(&self, pin: PinId) -> bool;

    // Clock network.
    fn is_clock_pin(&self, pin: PinId) -> bool;
    fn is_clock_net(&self, net: NetId) -> bool;
    /// Register clock input pins stop clock-network traversals.
    fn is_reg_clk_pin(&self, pin: PinId) -> bool;
    /// Driver vertices of every clock's leaf pins.
    fn clock_roots(&self) -> Vec<PinId>;

    // Timing graph adjacency.
    fn endpoints(&self) -> Vec<PinId>;
    fn graph_fanout(&self, pin: PinId) -> Vec<PinId>;
    fn graph_fanin(&self, pin: PinId) -> Vec<PinId>;

    // Delay / slack queries.
    /// Total load seen by a driver: pin caps plus estimated wire cap.
    fn load_cap(&self, drvr_pin: PinId) -> f32;
    fn find_delays(&mut self);
    fn find_requireds(&mut self);
    fn vertex_slack(&self, pin: PinId, min_max: MinMax) -> f32;
    fn vertex_slacks(&self, pin: PinId) -> Slacks;

    // Limit checks.
    fn check_limits_preamble(&mut self);
    fn check_slew(&self, pin: PinId) -> LimitCheck;
    fn check_capacitance(&self, pin: PinId) -> LimitCheck;
    fn check_fanout(&self, pin: PinId) -> LimitCheck;

    // Functionally equivalent cell groups.
    fn make_equiv_cells(&mut self, resize_libs: &[usize]);
    fn equiv_cells(&self, cell: CellId) -> Vec<CellId>;

    // Invalidation hooks.
    fn delays_invalid(&mut self);
    fn arrivals_invalid(&mut self);

    // Estimated wire parasitics, keyed by net.
    fn has_wire_model(&self, drvr_pin: PinId) -> bool;
    fn save_wire_model(&mut self, net: NetId, model: WireModel);
    fn delete_parasitics(&mut self, net: NetId);
    fn delete_all_parasitics(&mut self);
}
