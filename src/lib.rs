// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Post-placement netlist repair: gate sizing to a target slew, port
//! buffering, tie-cell fanout duplication, Steiner-guided repeater
//! insertion, hold fixing, and clock-inverter cloning.
//!
//! The engine edits the design through three service traits ([`db::Network`],
//! [`sta::Timer`] and [`steiner::SteinerBuilder`]) and owns only the derived
//! state needed to keep thousands of incremental edits consistent.

pub mod fuzzy;

pub mod geom;

pub mod liberty;

pub mod db;

pub mod sta;

pub mod steiner;

pub mod parasitics;

pub mod resizer;

pub mod target;

pub mod tie;

pub mod repair_net;

pub mod hold;

pub mod clk;

pub mod wirelen;

pub mod report;

pub mod testbench;

pub use resizer::{Design, ResizeError, Resizer};
