// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Estimated wire parasitics from Steiner-tree branch lengths.
//!
//! Each branch contributes a π segment: half the branch capacitance on
//! each endpoint and a series resistor between them. The detailed network
//! only lives long enough to be reduced to a driver-facing π plus per-load
//! Elmore delays, which is what the delay calculator consumes.

use indexmap::IndexMap;

use crate::db::{self, NetId, PinId};
use crate::resizer::{Design, Resizer};
use crate::steiner::{SteinerPt, SteinerTree};

/// Resistance used to join coincident points so the reduced network stays
/// connected: 1 milliohm.
const SHORT_RES: f32 = 1.0e-3;

/// Reduced wire model saved into the timer, replacing the detailed
/// parasitic network.
#[derive(Debug, Clone, Default)]
pub struct WireModel {
    /// Capacitance on the driver shoulder of the π.
    pub c_near: f32,
    /// π resistance: the worst driver-to-load path resistance.
    pub rpi: f32,
    /// Capacitance on the load shoulder of the π.
    pub c_far: f32,
    /// First-moment (Elmore) delay from the driver to each load pin.
    pub elmore: IndexMap<PinId, f32>,
}

impl WireModel {
    pub fn wire_cap(&self) -> f32 {
        self.c_near + self.c_far
    }
}

/// Node key in the detailed network: a pin, or a Steiner point of the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeKey {
    Pin(PinId),
    Steiner(SteinerPt),
}

/// Detailed RC network under construction for one net.
#[derive(Debug, Default)]
pub(crate) struct ParasiticNetwork {
    nodes: IndexMap<NodeKey, f32>,
    resistors: Vec<(usize, usize, f32)>,
}

impl ParasiticNetwork {
    fn ensure_node(&mut self, key: NodeKey) -> usize {
        let entry = self.nodes.entry(key);
        let index = entry.index();
        entry.or_insert(0.0);
        index
    }

    fn incr_cap(&mut self, node: usize, cap: f32) {
        self.nodes[node] += cap;
    }

    fn make_resistor(&mut self, n1: usize, n2: usize, res: f32) {
        self.resistors.push((n1, n2, res));
    }

    /// Reduce to pi-Elmore seen from the driver node. DFS from the driver
    /// computes downstream capacitance per subtree; the Elmore delay of a
    /// node is the parent's plus edge resistance times downstream cap.
    fn reduce(&self, drvr: usize) -> WireModel {
        let n = self.nodes.len();
        let mut adj: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
        for &(n1, n2, res) in &self.resistors {
            adj[n1].push((n2, res));
            adj[n2].push((n1, res));
        }

        // Post-order downstream capacitance.
        let mut parent: Vec<Option<usize>> = vec![None; n];
        let mut order: Vec<usize> = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut stack = vec![drvr];
        visited[drvr] = true;
        while let Some(node) = stack.pop() {
            order.push(node);
            for &(next, _) in &adj[node] {
                if !visited[next] {
                    visited[next] = true;
                    parent[next] = Some(node);
                    stack.push(next);
                }
            }
        }
        let mut downstream: Vec<f32> = self.nodes.values().copied().collect();
        for &node in order.iter().rev() {
            if let Some(p) = parent[node] {
                downstream[p] += downstream[node];
            }
        }

        // Forward pass: Elmore delay and path resistance from the driver.
        let mut elmore_at = vec![0.0f32; n];
        let mut path_res = vec![0.0f32; n];
        for &node in &order {
            let Some(p) = parent[node] else { continue };
            let res = adj[node]
                .iter()
                .find(|&&(other, _)| other == p)
                .map(|&(_, r)| r)
                .unwrap();
            elmore_at[node] = elmore_at[p] + res * downstream[node];
            path_res[node] = path_res[p] + res;
        }

        let total_cap: f32 = self.nodes.values().sum();
        let mut model = WireModel {
            c_near: total_cap / 2.0,
            rpi: 0.0,
            c_far: total_cap / 2.0,
            elmore: IndexMap::new(),
        };
        for (i, (key, _)) in self.nodes.iter().enumerate() {
            if let NodeKey::Pin(pin) = *key {
                if i != drvr {
                    model.elmore.insert(pin, elmore_at[i]);
                    model.rpi = model.rpi.max(path_res[i]);
                }
            }
        }
        model
    }
}

impl<D: Design> Resizer<'_, D> {
    /// Estimate parasitics for every non-power/ground net and enable the
    /// parasitic-dependent code paths.
    pub fn estimate_wire_parasitics(&mut self) {
        if self.wire_cap > 0.0 {
            self.design.ensure_clk_network();
            self.design.delete_all_parasitics();
            for net in self.design.nets() {
                // Estimate parasitics for clocks also, for when they are
                // propagated.
                if !matches!(
                    self.design.net_sig_type(net),
                    crate::db::SigType::Power | crate::db::SigType::Ground
                ) {
                    self.estimate_wire_parasitic(net);
                }
            }
            self.have_estimated_parasitics = true;
        }
    }

    pub(crate) fn estimate_wire_parasitic(&mut self, net: NetId) {
        // Do not add parasitics on ports. When an input port drives a pad
        // instance with a huge input cap, the Elmore delay is gigantic.
        if db::has_top_level_port(&*self.design, net) {
            return;
        }
        let Some(tree) = self.design.make_steiner_tree(net, false) else {
            return;
        };
        clilog::debug!("estimate wire {}", self.design.net_name(net));
        let mut parasitic = ParasiticNetwork::default();
        let is_clk = self.design.is_clock_net(net);
        let (res_per_m, cap_per_m) = if is_clk {
            (self.wire_clk_res, self.wire_clk_cap)
        } else {
            (self.wire_res, self.wire_cap)
        };
        for i in 0..tree.branch_count() {
            let branch = tree.branch(i).clone();
            let n1 = parasitic_node(&mut parasitic, &tree, branch.pin1, branch.steiner_pt1);
            let n2 = parasitic_node(&mut parasitic, &tree, branch.pin2, branch.steiner_pt2);
            if n1 != n2 {
                if branch.length == 0 {
                    // Keep the connectivity intact.
                    parasitic.make_resistor(n1, n2, SHORT_RES);
                } else {
                    let wire_length = self.dbu_to_meters(branch.length);
                    let wire_cap = (wire_length * cap_per_m as f64) as f32;
                    let wire_res = (wire_length * res_per_m as f64) as f32;
                    parasitic.incr_cap(n1, wire_cap / 2.0);
                    parasitic.make_resistor(n1, n2, wire_res);
                    parasitic.incr_cap(n2, wire_cap / 2.0);
                }
            }
        }
        let drivers = self.design.drivers(net);
        let Some(&drvr_pin) = drivers.first() else {
            return;
        };
        let drvr = parasitic.ensure_node(NodeKey::Pin(drvr_pin));
        let model = parasitic.reduce(drvr);
        self.design.save_wire_model(net, model);
    }

    /// Lazily re-estimate the wire model of a driver's net after an edit
    /// deleted it. Idempotent.
    pub(crate) fn ensure_wire_parasitic(&mut self, drvr_pin: PinId) {
        if self.have_estimated_parasitics && !self.design.has_wire_model(drvr_pin) {
            if let Some(net) = self.design.pin_net(drvr_pin) {
                self.estimate_wire_parasitic(net);
            }
        }
    }

    /// Re-estimate every net whose model was invalidated during a pass.
    pub(crate) fn ensure_wire_parasitics(&mut self) {
        if self.have_estimated_parasitics {
            for net in self.design.nets() {
                if !matches!(
                    self.design.net_sig_type(net),
                    crate::db::SigType::Power | crate::db::SigType::Ground
                ) {
                    if let Some(&drvr_pin) = self.design.drivers(net).first() {
                        self.ensure_wire_parasitic(drvr_pin);
                    }
                }
            }
        }
    }
}

/// Find the network node for a branch endpoint. A pure Steiner point on
/// top of a pin uses the pin; an unaliased Steiner point is keyed by its
/// point id.
fn parasitic_node(
    parasitic: &mut ParasiticNetwork,
    tree: &SteinerTree,
    pin: Option<PinId>,
    steiner_pt: SteinerPt,
) -> usize {
    let pin = pin.or_else(|| tree.pt_alias(steiner_pt));
    match pin {
        Some(pin) => parasitic.ensure_node(NodeKey::Pin(pin)),
        None => parasitic.ensure_node(NodeKey::Steiner(steiner_pt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_two_pin_wire() {
        // drvr --1k-- load, 10fF on each shoulder.
        let mut parasitic = ParasiticNetwork::default();
        let drvr = parasitic.ensure_node(NodeKey::Pin(PinId(0)));
        let load = parasitic.ensure_node(NodeKey::Pin(PinId(1)));
        parasitic.incr_cap(drvr, 10e-15);
        parasitic.make_resistor(drvr, load, 1000.0);
        parasitic.incr_cap(load, 10e-15);

        let model = parasitic.reduce(drvr);
        assert!((model.wire_cap() - 20e-15).abs() < 1e-20);
        assert_eq!(model.rpi, 1000.0);
        let elmore = model.elmore[&PinId(1)];
        // R * downstream cap = 1k * 10fF.
        assert!((elmore - 1000.0 * 10e-15).abs() < 1e-15);
    }

    #[test]
    fn test_reduce_branching_wire() {
        // drvr --r1-- s --r2-- load1
        //                \--r3-- load2 (heavier cap)
        let mut parasitic = ParasiticNetwork::default();
        let drvr = parasitic.ensure_node(NodeKey::Pin(PinId(0)));
        let s = parasitic.ensure_node(NodeKey::Steiner(7));
        let load1 = parasitic.ensure_node(NodeKey::Pin(PinId(1)));
        let load2 = parasitic.ensure_node(NodeKey::Pin(PinId(2)));
        parasitic.make_resistor(drvr, s, 500.0);
        parasitic.incr_cap(s, 4e-15);
        parasitic.make_resistor(s, load1, 250.0);
        parasitic.incr_cap(load1, 2e-15);
        parasitic.make_resistor(s, load2, 1000.0);
        parasitic.incr_cap(load2, 8e-15);

        let model = parasitic.reduce(drvr);
        assert_eq!(model.elmore.len(), 2);
        // Worst path resistance: 500 + 1000.
        assert_eq!(model.rpi, 1500.0);
        // Elmore into load2 exceeds elmore into load1.
        assert!(model.elmore[&PinId(2)] > model.elmore[&PinId(1)]);
        // Shared trunk term: 500 * (4+2+8)fF reaches both loads.
        let trunk = 500.0 * 14e-15;
        assert!(model.elmore[&PinId(1)] >= trunk);
    }

    #[test]
    fn test_zero_length_branch_keeps_connectivity() {
        let mut parasitic = ParasiticNetwork::default();
        let drvr = parasitic.ensure_node(NodeKey::Pin(PinId(0)));
        let s = parasitic.ensure_node(NodeKey::Steiner(3));
        let load = parasitic.ensure_node(NodeKey::Pin(PinId(1)));
        parasitic.make_resistor(drvr, s, SHORT_RES);
        parasitic.make_resistor(s, load, 100.0);
        parasitic.incr_cap(load, 1e-15);

        let model = parasitic.reduce(drvr);
        assert!(model.elmore.contains_key(&PinId(1)));
        assert!(model.rpi > 100.0 && model.rpi < 100.01);
    }
}
