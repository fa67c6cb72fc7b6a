// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! In-memory liberty cell model.
//!
//! The repair passes only need a narrow view of a liberty library: cell
//! area, port capacitances and limits, buffer/inverter/constant function
//! classification, and timing arcs with a linear delay model
//! (`delay = intrinsic + resistance * load`). Library file parsing is an
//! external concern; libraries are built programmatically through the
//! constructors here.

use compact_str::CompactString;
use indexmap::IndexMap;

use crate::sta::RiseFall;

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Output function classification. Only the shapes the repair passes
/// dispatch on are distinguished; everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortFunction {
    /// Constant logic 0 (tie-lo).
    Zero,
    /// Constant logic 1 (tie-hi).
    One,
    /// Non-inverting single-input function.
    Buffer,
    /// Inverting single-input function.
    Inverter,
    /// Anything else.
    Other,
}

/// Timing arc role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcRole {
    Combinational,
    TristateEnable,
    TristateDisable,
    Setup,
    Hold,
    ClkToQ,
}

impl ArcRole {
    pub fn is_timing_check(self) -> bool {
        matches!(self, ArcRole::Setup | ArcRole::Hold)
    }

    pub fn is_tristate(self) -> bool {
        matches!(self, ArcRole::TristateEnable | ArcRole::TristateDisable)
    }
}

/// A timing arc with a linear delay model.
#[derive(Debug, Clone)]
pub struct TimingArc {
    /// Index of the related (input) port within the cell.
    pub from_port: usize,
    /// Index of the driven (output) port within the cell.
    pub to_port: usize,
    pub from_rf: RiseFall,
    pub to_rf: RiseFall,
    pub role: ArcRole,
    /// Intrinsic delay in seconds.
    pub intrinsic: f32,
    /// Drive resistance in ohms; delay grows by `resistance * load_cap`.
    pub resistance: f32,
    /// Output slew at zero load and zero input slew, in seconds.
    pub slew_intrinsic: f32,
    /// Ohms; output slew grows by `slew_resistance * load_cap`.
    pub slew_resistance: f32,
    /// Dimensionless degradation of output slew with input slew.
    pub slew_input_factor: f32,
}

impl TimingArc {
    /// Drive the arc: gate delay and output slew for the given input slew
    /// and load capacitance.
    pub fn gate_delay(&self, in_slew: f32, load_cap: f32) -> (f32, f32) {
        let delay = self.intrinsic + self.resistance * load_cap;
        let slew =
            self.slew_intrinsic + self.slew_resistance * load_cap + self.slew_input_factor * in_slew;
        (delay, slew)
    }
}

/// A liberty port: direction, capacitance, limits, and output function.
#[derive(Debug, Clone)]
pub struct LibPort {
    pub name: CompactString,
    pub direction: PortDirection,
    /// Input pin capacitance in farads (0 for outputs).
    pub cap: f32,
    pub max_slew: Option<f32>,
    pub max_cap: Option<f32>,
    pub max_fanout: Option<f32>,
    /// Fanout load units presented by this pin as a load.
    pub fanout_load: Option<f32>,
    /// Equivalent output drive resistance in ohms (0 for inputs).
    pub drive_resistance: f32,
    /// Function classification for output ports.
    pub function: Option<PortFunction>,
}

/// A liberty cell.
#[derive(Debug, Clone)]
pub struct LibCell {
    pub name: CompactString,
    /// Footprint area in square meters.
    pub area: f64,
    pub dont_use: bool,
    pub ports: Vec<LibPort>,
    pub arcs: Vec<TimingArc>,
}

impl LibCell {
    pub fn find_port(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = usize> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction == PortDirection::Input)
            .map(|(i, _)| i)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = usize> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction == PortDirection::Output)
            .map(|(i, _)| i)
    }

    fn single_in_out(&self) -> Option<(usize, usize)> {
        let mut input = None;
        let mut output = None;
        for (i, port) in self.ports.iter().enumerate() {
            match port.direction {
                PortDirection::Input => {
                    if input.replace(i).is_some() {
                        return None;
                    }
                }
                PortDirection::Output => {
                    if output.replace(i).is_some() {
                        return None;
                    }
                }
            }
        }
        Some((input?, output?))
    }

    pub fn is_buffer(&self) -> bool {
        self.single_in_out()
            .map(|(_, o)| self.ports[o].function == Some(PortFunction::Buffer))
            .unwrap_or(false)
    }

    pub fn is_inverter(&self) -> bool {
        self.single_in_out()
            .map(|(_, o)| self.ports[o].function == Some(PortFunction::Inverter))
            .unwrap_or(false)
    }

    /// True if any output is tied to constant one or zero.
    pub fn is_func_one_zero(&self) -> bool {
        self.ports.iter().any(|p| {
            matches!(
                p.function,
                Some(PortFunction::Zero) | Some(PortFunction::One)
            )
        })
    }

    /// The (input, output) port pair of a buffer or inverter.
    pub fn buffer_ports(&self) -> Option<(usize, usize)> {
        if self.is_buffer() || self.is_inverter() {
            self.single_in_out()
        } else {
            None
        }
    }

    /// Arcs driving `port`.
    pub fn arcs_to(&self, port: usize) -> impl Iterator<Item = &TimingArc> + '_ {
        self.arcs.iter().filter(move |a| a.to_port == port)
    }
}

/// A cell library.
#[derive(Debug, Clone, Default)]
pub struct Library {
    pub name: CompactString,
    pub default_fanout_load: Option<f32>,
    cells: Vec<LibCell>,
    name2idx: IndexMap<CompactString, usize>,
}

impl Library {
    pub fn new(name: &str) -> Library {
        Library {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_cell(&mut self, cell: LibCell) -> usize {
        let idx = self.cells.len();
        self.name2idx.insert(cell.name.clone(), idx);
        self.cells.push(cell);
        idx
    }

    pub fn cells(&self) -> &[LibCell] {
        &self.cells
    }

    pub fn cell(&self, idx: usize) -> &LibCell {
        &self.cells[idx]
    }

    pub fn find_cell(&self, name: &str) -> Option<usize> {
        self.name2idx.get(name).copied()
    }
}

/// Build a two-pin cell (A -> Z) with the given function and symmetric
/// rise/fall linear arcs. Shared by buffer, inverter and tie constructors.
fn two_pin_cell(
    name: &str,
    function: PortFunction,
    area: f64,
    input_cap: f32,
    drive_res: f32,
    intrinsic: f32,
) -> LibCell {
    let input = LibPort {
        name: "A".into(),
        direction: PortDirection::Input,
        cap: input_cap,
        max_slew: None,
        max_cap: None,
        max_fanout: None,
        fanout_load: Some(1.0),
        drive_resistance: 0.0,
        function: None,
    };
    let output = LibPort {
        name: "Z".into(),
        direction: PortDirection::Output,
        cap: 0.0,
        max_slew: None,
        max_cap: None,
        max_fanout: None,
        fanout_load: None,
        drive_resistance: drive_res,
        function: Some(function),
    };
    let mut arcs = Vec::new();
    for (from_rf, to_rf) in [
        (RiseFall::Rise, RiseFall::Rise),
        (RiseFall::Fall, RiseFall::Fall),
    ] {
        arcs.push(TimingArc {
            from_port: 0,
            to_port: 1,
            from_rf,
            to_rf,
            role: ArcRole::Combinational,
            intrinsic,
            resistance: drive_res,
            slew_intrinsic: intrinsic,
            slew_resistance: drive_res,
            slew_input_factor: 0.1,
        });
    }
    LibCell {
        name: name.into(),
        area,
        dont_use: false,
        ports: vec![input, output],
        arcs,
    }
}

impl LibCell {
    /// A buffer cell with symmetric linear rise/fall arcs.
    pub fn buffer(name: &str, area: f64, input_cap: f32, drive_res: f32, intrinsic: f32) -> LibCell {
        two_pin_cell(name, PortFunction::Buffer, area, input_cap, drive_res, intrinsic)
    }

    /// An inverter cell with symmetric linear rise/fall arcs.
    pub fn inverter(
        name: &str,
        area: f64,
        input_cap: f32,
        drive_res: f32,
        intrinsic: f32,
    ) -> LibCell {
        two_pin_cell(name, PortFunction::Inverter, area, input_cap, drive_res, intrinsic)
    }

    /// A tie cell: single constant output, no inputs, no arcs.
    pub fn tie(name: &str, area: f64, one: bool) -> LibCell {
        LibCell {
            name: name.into(),
            area,
            dont_use: false,
            ports: vec![LibPort {
                name: "Z".into(),
                direction: PortDirection::Output,
                cap: 0.0,
                max_slew: None,
                max_cap: None,
                max_fanout: None,
                fanout_load: None,
                drive_resistance: 0.0,
                function: Some(if one { PortFunction::One } else { PortFunction::Zero }),
            }],
            arcs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_classification() {
        let buf = LibCell::buffer("BUF_X1", 1e-12, 2e-15, 2000.0, 20e-12);
        assert!(buf.is_buffer());
        assert!(!buf.is_inverter());
        assert!(!buf.is_func_one_zero());
        let (input, output) = buf.buffer_ports().unwrap();
        assert_eq!(buf.ports[input].name, "A");
        assert_eq!(buf.ports[output].name, "Z");

        let inv = LibCell::inverter("INV_X1", 1e-12, 2e-15, 2000.0, 10e-12);
        assert!(inv.is_inverter());
        assert!(inv.buffer_ports().is_some());

        let tie = LibCell::tie("TIEHI", 1e-12, true);
        assert!(tie.is_func_one_zero());
        assert!(!tie.is_buffer());
        assert!(tie.buffer_ports().is_none());
    }

    #[test]
    fn test_linear_arc_model() {
        let buf = LibCell::buffer("BUF_X1", 1e-12, 2e-15, 1000.0, 10e-12);
        let arc = &buf.arcs[0];
        let (d0, s0) = arc.gate_delay(0.0, 0.0);
        assert_eq!(d0, 10e-12);
        assert_eq!(s0, 10e-12);
        // 10fF load on 1k drive adds 10ps.
        let (d1, s1) = arc.gate_delay(0.0, 10e-15);
        assert!((d1 - 20e-12).abs() < 1e-15);
        assert!(s1 > s0);
        // Output slew degrades with input slew, delay does not.
        let (d2, s2) = arc.gate_delay(50e-12, 10e-15);
        assert_eq!(d1, d2);
        assert!(s2 > s1);
    }

    #[test]
    fn test_library_lookup() {
        let mut lib = Library::new("repair_cells");
        let x1 = lib.add_cell(LibCell::buffer("BUF_X1", 1e-12, 2e-15, 2000.0, 20e-12));
        let x2 = lib.add_cell(LibCell::buffer("BUF_X2", 2e-12, 4e-15, 1000.0, 20e-12));
        assert_eq!(lib.find_cell("BUF_X1"), Some(x1));
        assert_eq!(lib.find_cell("BUF_X2"), Some(x2));
        assert_eq!(lib.find_cell("BUF_X4"), None);
        assert_eq!(lib.cells().len(), 2);
    }
}
