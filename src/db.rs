// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The netlist database service consumed by the repair passes.
//!
//! The physical database (cells, instances, nets, pins, placement) lives
//! outside this crate. The passes see it through the [`Network`] trait and
//! hold only the integer handles defined here, never references, so that
//! thousands of incremental edits cannot invalidate anything the caller
//! keeps across an edit.

use crate::geom::{Point, Rect};
use crate::liberty::{LibCell, Library, PortDirection};

/// Handle of a library cell: library index plus cell index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub lib: u32,
    pub idx: u32,
}

impl CellId {
    pub fn new(lib: usize, idx: usize) -> CellId {
        CellId {
            lib: lib as u32,
            idx: idx as u32,
        }
    }
}

/// Handle of a placed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub usize);

/// Handle of a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(pub usize);

/// Handle of a pin: an (instance, port) pair or a top-level port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId(pub usize);

/// Placement status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementStatus {
    #[default]
    Unplaced,
    Placed,
    Fixed,
}

/// Electrical class of a net. Repeater output nets inherit the class of
/// the net they split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigType {
    #[default]
    Signal,
    Clock,
    Power,
    Ground,
}

/// Query and edit capabilities of the external netlist database.
pub trait Network {
    // Technology / floorplan.
    fn dbu_per_micron(&self) -> i32;
    /// The placeable core rectangle, or None when the floorplan has none.
    fn core_area(&self) -> Option<Rect>;

    // Libraries.
    fn library_count(&self) -> usize;
    fn library(&self, lib: usize) -> &Library;
    fn cell(&self, cell: CellId) -> &LibCell;

    // Instance queries.
    fn instances(&self) -> Vec<InstId>;
    fn inst_cell(&self, inst: InstId) -> CellId;
    fn inst_name(&self, inst: InstId) -> &str;
    fn inst_location(&self, inst: InstId) -> Point;
    /// Bounding box of the instance footprint.
    fn inst_bbox(&self, inst: InstId) -> Rect;
    fn inst_pins(&self, inst: InstId) -> Vec<PinId>;
    fn find_pin(&self, inst: InstId, port: usize) -> Option<PinId>;
    fn find_instance(&self, name: &str) -> Option<InstId>;

    // Net queries.
    fn nets(&self) -> Vec<NetId>;
    fn net_name(&self, net: NetId) -> &str;
    /// All pins on the net, including top-level port pins.
    fn net_pins(&self, net: NetId) -> Vec<PinId>;
    fn drivers(&self, net: NetId) -> Vec<PinId>;
    fn is_special(&self, net: NetId) -> bool;
    fn net_sig_type(&self, net: NetId) -> SigType;
    fn find_net(&self, name: &str) -> Option<NetId>;

    // Pin queries.
    fn top_ports(&self) -> Vec<PinId>;
    fn pin_net(&self, pin: PinId) -> Option<NetId>;
    /// The owning instance; None for a top-level port.
    fn pin_instance(&self, pin: PinId) -> Option<InstId>;
    /// Port index within the owning instance's cell; None for a top-level port.
    fn pin_port(&self, pin: PinId) -> Option<usize>;
    fn pin_direction(&self, pin: PinId) -> PortDirection;
    fn pin_location(&self, pin: PinId) -> Point;
    /// Hierarchical path name used for deterministic ordering.
    fn pin_path_name(&self, pin: PinId) -> String;
    fn is_top_level_port(&self, pin: PinId) -> bool;

    // Edits.
    fn make_instance(&mut self, cell: CellId, name: &str) -> InstId;
    fn make_net(&mut self, name: &str) -> NetId;
    fn connect_pin(&mut self, inst: InstId, port: usize, net: NetId) -> PinId;
    fn disconnect_pin(&mut self, pin: PinId);
    fn delete_net(&mut self, net: NetId);
    fn delete_instance(&mut self, inst: InstId);
    /// Swap the instance master, keeping port order aligned.
    fn replace_cell(&mut self, inst: InstId, cell: CellId);
    /// Move the instance and mark it PLACED.
    fn set_location(&mut self, inst: InstId, loc: Point);
    fn set_sig_type(&mut self, net: NetId, sig: SigType);
}

/// True if the pin sources its net: an instance output, or a top-level
/// input port seen from inside the block.
pub fn is_driver<N: Network + ?Sized>(network: &N, pin: PinId) -> bool {
    if network.is_top_level_port(pin) {
        network.pin_direction(pin) == PortDirection::Input
    } else {
        network.pin_direction(pin) == PortDirection::Output
    }
}

/// Complement of [`is_driver`] for connected pins.
pub fn is_load<N: Network + ?Sized>(network: &N, pin: PinId) -> bool {
    !is_driver(network, pin)
}

/// True if any pin of the net is a top-level port.
pub fn has_top_level_port<N: Network + ?Sized>(network: &N, net: NetId) -> bool {
    network
        .net_pins(net)
        .iter()
        .any(|&pin| network.is_top_level_port(pin))
}
