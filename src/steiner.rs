// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Rectilinear Steiner trees handed back by the route estimator.
//!
//! Tree construction is an external concern behind [`SteinerBuilder`];
//! this module defines the tree value the repair passes walk. Points are
//! dense indices; a point may carry a pin, be a pure Steiner point, or be
//! a Steiner point aliased to a pin placed at the same location.

use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;

use crate::db::{NetId, PinId};
use crate::geom::Point;

/// Index of a point within one tree.
pub type SteinerPt = usize;

#[derive(Debug, Clone)]
pub struct SteinerNode {
    pub loc: Point,
    /// The pin located at this point, if any.
    pub pin: Option<PinId>,
    /// A pin coincident with this pure Steiner point.
    pub alias: Option<PinId>,
    pub left: Option<SteinerPt>,
    pub right: Option<SteinerPt>,
}

/// One branch (edge) of the tree as reported to the parasitic estimator.
#[derive(Debug, Clone)]
pub struct SteinerBranch {
    pub pt1: Point,
    pub pin1: Option<PinId>,
    pub steiner_pt1: SteinerPt,
    pub pt2: Point,
    pub pin2: Option<PinId>,
    pub steiner_pt2: SteinerPt,
    /// Manhattan length in DBU. Zero-length branches join coincident
    /// points and only carry connectivity.
    pub length: i32,
}

#[derive(Debug, Clone, Default)]
pub struct SteinerTree {
    nodes: Vec<SteinerNode>,
    branches: Vec<SteinerBranch>,
    pin2pt: IndexMap<PinId, SteinerPt>,
}

impl SteinerTree {
    pub fn new() -> SteinerTree {
        SteinerTree::default()
    }

    pub fn add_node(&mut self, loc: Point, pin: Option<PinId>) -> SteinerPt {
        let pt = self.nodes.len();
        if let Some(pin) = pin {
            self.pin2pt.insert(pin, pt);
        }
        self.nodes.push(SteinerNode {
            loc,
            pin,
            alias: None,
            left: None,
            right: None,
        });
        pt
    }

    pub fn set_alias(&mut self, pt: SteinerPt, pin: PinId) {
        self.nodes[pt].alias = Some(pin);
    }

    /// Attach `child` under `parent`, filling left then right.
    /// Panics if the parent already has two children; builders must
    /// binarize with zero-length branches instead.
    pub fn add_child(&mut self, parent: SteinerPt, child: SteinerPt) {
        let node = &mut self.nodes[parent];
        if node.left.is_none() {
            node.left = Some(child);
        } else if node.right.is_none() {
            node.right = Some(child);
        } else {
            panic!("steiner point {} already has two children", parent);
        }
        let branch = SteinerBranch {
            pt1: self.nodes[parent].loc,
            pin1: self.nodes[parent].pin,
            steiner_pt1: parent,
            pt2: self.nodes[child].loc,
            pin2: self.nodes[child].pin,
            steiner_pt2: child,
            length: Point::manhattan_distance(self.nodes[parent].loc, self.nodes[child].loc),
        };
        self.branches.push(branch);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn branch(&self, i: usize) -> &SteinerBranch {
        &self.branches[i]
    }

    pub fn left(&self, pt: SteinerPt) -> Option<SteinerPt> {
        self.nodes[pt].left
    }

    pub fn right(&self, pt: SteinerPt) -> Option<SteinerPt> {
        self.nodes[pt].right
    }

    pub fn location(&self, pt: SteinerPt) -> Point {
        self.nodes[pt].loc
    }

    pub fn pin(&self, pt: SteinerPt) -> Option<PinId> {
        self.nodes[pt].pin
    }

    /// The pin aliased onto a pure Steiner point, if any.
    pub fn pt_alias(&self, pt: SteinerPt) -> Option<PinId> {
        self.nodes[pt].alias
    }

    pub fn steiner_pt(&self, pin: PinId) -> Option<SteinerPt> {
        self.pin2pt.get(&pin).copied()
    }

    /// Dump the tree as SVG for debugging.
    pub fn write_svg(&self, path: &Path) -> std::io::Result<()> {
        let mut min = Point::new(i32::MAX, i32::MAX);
        let mut max = Point::new(i32::MIN, i32::MIN);
        for node in &self.nodes {
            min.x = min.x.min(node.loc.x);
            min.y = min.y.min(node.loc.y);
            max.x = max.x.max(node.loc.x);
            max.y = max.y.max(node.loc.y);
        }
        let margin = ((max.x - min.x).max(max.y - min.y) / 20).max(1);
        let mut file = std::fs::File::create(path)?;
        writeln!(
            file,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"{} {} {} {}\">",
            min.x - margin,
            min.y - margin,
            (max.x - min.x) + 2 * margin,
            (max.y - min.y) + 2 * margin
        )?;
        for branch in &self.branches {
            writeln!(
                file,
                "  <polyline points=\"{},{} {},{} {},{}\" fill=\"none\" \
                 stroke=\"black\" stroke-width=\"{}\"/>",
                branch.pt1.x,
                branch.pt1.y,
                branch.pt2.x,
                branch.pt1.y,
                branch.pt2.x,
                branch.pt2.y,
                (margin / 4).max(1)
            )?;
        }
        for node in &self.nodes {
            let color = if node.pin.is_some() { "red" } else { "blue" };
            writeln!(
                file,
                "  <circle cx=\"{}\" cy=\"{}\" r=\"{}\" fill=\"{}\"/>",
                node.loc.x,
                node.loc.y,
                (margin / 2).max(1),
                color
            )?;
        }
        writeln!(file, "</svg>")?;
        Ok(())
    }
}

/// The external route estimator.
pub trait SteinerBuilder {
    /// Build the rectilinear tree of a net, or None for degenerate nets.
    /// `find_left_rights` asks for the driver-rooted child structure the
    /// repair walker needs; the parasitic estimator only reads branches.
    fn make_steiner_tree(&self, net: NetId, find_left_rights: bool) -> Option<SteinerTree>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_construction() {
        let mut tree = SteinerTree::new();
        let drvr = tree.add_node(Point::new(0, 0), Some(PinId(0)));
        let corner = tree.add_node(Point::new(100, 0), None);
        let load1 = tree.add_node(Point::new(100, 50), Some(PinId(1)));
        let load2 = tree.add_node(Point::new(200, 0), Some(PinId(2)));
        tree.add_child(drvr, corner);
        tree.add_child(corner, load1);
        tree.add_child(corner, load2);

        assert_eq!(tree.branch_count(), 3);
        assert_eq!(tree.branch(0).length, 100);
        assert_eq!(tree.branch(1).length, 50);
        assert_eq!(tree.branch(2).length, 100);
        assert_eq!(tree.left(drvr), Some(corner));
        assert_eq!(tree.right(drvr), None);
        assert_eq!(tree.left(corner), Some(load1));
        assert_eq!(tree.right(corner), Some(load2));
        assert_eq!(tree.steiner_pt(PinId(2)), Some(load2));
        assert_eq!(tree.pin(corner), None);
    }

    #[test]
    #[should_panic(expected = "two children")]
    fn test_binarization_enforced() {
        let mut tree = SteinerTree::new();
        let root = tree.add_node(Point::new(0, 0), Some(PinId(0)));
        for i in 1..4 {
            let child = tree.add_node(Point::new(i * 10, 0), Some(PinId(i as usize)));
            tree.add_child(root, child);
        }
    }
}
