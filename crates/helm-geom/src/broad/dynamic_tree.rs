// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Balanced fat-AABB bounding-volume hierarchy.
//!
//! Leaves store proxies with bounds fattened by a fixed margin so small
//! motion updates in place without restructuring; larger moves reinsert with
//! a bound pre-enlarged along the displacement to anticipate continued
//! motion. Internal nodes keep the union of their children and a height for
//! AVL-style rotation repair.
//!
//! Nodes live in one arena `Vec`; handles are slot indices threaded through
//! an intrusive free list, so the tree never holds references into itself.

use helm_core::Vec2;
use rustc_hash::FxHashSet;

use crate::broad::{
    AwakeSet, PairCallback, ProxyId, ProxyPayload, QueryCallback, RayCastCallback, RayFlow,
    SpatialIndex,
};
use crate::error::BroadphaseError;
use crate::types::aabb::Aabb;
use crate::types::ray::Ray;

/// Fixed fattening margin applied to every leaf bound, in metres.
const AABB_MARGIN: f32 = 0.1;

/// Scale applied to the displacement when predicting continued motion on
/// reinsert.
const DISPLACEMENT_MULTIPLIER: f32 = 2.0;

#[derive(Debug)]
enum NodeKind {
    Leaf(ProxyPayload),
    Internal { left: u32, right: u32 },
    Free { next: Option<u32> },
}

#[derive(Debug)]
struct TreeNode {
    /// Fattened bound for leaves; child union for internal nodes.
    aabb: Aabb,
    parent: Option<u32>,
    /// 0 for leaves; 1 + max(child heights) for internal nodes.
    height: u16,
    kind: NodeKind,
}

impl TreeNode {
    const fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }
}

/// Balanced AABB tree index; one per grid that selected this strategy.
#[derive(Debug, Default)]
pub struct DynamicTree {
    nodes: Vec<TreeNode>,
    root: Option<u32>,
    free_head: Option<u32>,
    proxy_count: usize,
    /// Proxies added or moved since the last pair update.
    moved: FxHashSet<ProxyId>,
}

impl DynamicTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the root, or 0 for an empty tree.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.root.map_or(0, |r| self.node(r).height)
    }

    fn node(&self, index: u32) -> &TreeNode {
        &self.nodes[index as usize]
    }

    fn node_mut(&mut self, index: u32) -> &mut TreeNode {
        &mut self.nodes[index as usize]
    }

    fn allocate(&mut self, aabb: Aabb, kind: NodeKind, height: u16) -> u32 {
        let node = TreeNode {
            aabb,
            parent: None,
            height,
            kind,
        };
        match self.free_head {
            Some(slot) => {
                self.free_head = match self.node(slot).kind {
                    NodeKind::Free { next } => next,
                    _ => unreachable!("free list points at a live node"),
                };
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn release(&mut self, index: u32) -> NodeKind {
        let next = self.free_head;
        let freed = std::mem::replace(&mut self.node_mut(index).kind, NodeKind::Free { next });
        self.free_head = Some(index);
        freed
    }

    fn children(&self, index: u32) -> (u32, u32) {
        match self.node(index).kind {
            NodeKind::Internal { left, right } => (left, right),
            _ => unreachable!("expected internal node"),
        }
    }

    fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
        match &mut self.node_mut(parent).kind {
            NodeKind::Internal { left, right } => {
                if *left == old {
                    *left = new;
                } else {
                    debug_assert_eq!(*right, old);
                    *right = new;
                }
            }
            _ => unreachable!("parent is not internal"),
        }
    }

    /// Picks the cheapest sibling for `aabb` by descending the
    /// perimeter-cost heuristic, then splices a new parent in above it and
    /// repairs heights and bounds on the way back up.
    fn insert_leaf(&mut self, leaf: u32) {
        let Some(root) = self.root else {
            self.root = Some(leaf);
            self.node_mut(leaf).parent = None;
            return;
        };

        let leaf_aabb = self.node(leaf).aabb;
        let mut index = root;
        while let NodeKind::Internal { left, right } = self.node(index).kind {
            let area = self.node(index).aabb.perimeter();
            let combined = self.node(index).aabb.union(&leaf_aabb).perimeter();

            // Cost of making a new parent for this node and the leaf.
            let cost = 2.0 * combined;
            // Minimum cost of pushing the leaf further down the tree.
            let inheritance = 2.0 * (combined - area);

            let child_cost = |tree: &Self, child: u32| {
                let child_aabb = &tree.node(child).aabb;
                let enlarged = child_aabb.union(&leaf_aabb).perimeter();
                if tree.node(child).is_leaf() {
                    enlarged + inheritance
                } else {
                    enlarged - child_aabb.perimeter() + inheritance
                }
            };
            let cost_left = child_cost(self, left);
            let cost_right = child_cost(self, right);

            if cost < cost_left && cost < cost_right {
                break;
            }
            index = if cost_left < cost_right { left } else { right };
        }

        let sibling = index;
        let old_parent = self.node(sibling).parent;
        let new_parent = self.allocate(
            leaf_aabb.union(&self.node(sibling).aabb),
            NodeKind::Internal {
                left: sibling,
                right: leaf,
            },
            self.node(sibling).height + 1,
        );
        self.node_mut(new_parent).parent = old_parent;
        self.node_mut(sibling).parent = Some(new_parent);
        self.node_mut(leaf).parent = Some(new_parent);

        match old_parent {
            Some(p) => self.replace_child(p, sibling, new_parent),
            None => self.root = Some(new_parent),
        }

        self.refit_upward(new_parent);
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if self.root == Some(leaf) {
            self.root = None;
            return;
        }

        let parent = match self.node(leaf).parent {
            Some(p) => p,
            None => unreachable!("non-root leaf has a parent"),
        };
        let (left, right) = self.children(parent);
        let sibling = if left == leaf { right } else { left };
        let grandparent = self.node(parent).parent;

        self.release(parent);
        self.node_mut(sibling).parent = grandparent;
        match grandparent {
            Some(g) => {
                self.replace_child(g, parent, sibling);
                self.refit_upward(g);
            }
            None => self.root = Some(sibling),
        }
    }

    /// Rebalances and refits bounds from `start` to the root.
    fn refit_upward(&mut self, start: u32) {
        let mut index = Some(start);
        while let Some(i) = index {
            let i = self.balance(i);
            let (left, right) = self.children(i);
            let height = 1 + self.node(left).height.max(self.node(right).height);
            let aabb = self.node(left).aabb.union(&self.node(right).aabb);
            let node = self.node_mut(i);
            node.height = height;
            node.aabb = aabb;
            index = self.node(i).parent;
        }
    }

    /// Single AVL rotation at `a` when its subtrees differ in height by more
    /// than one. Returns the node now occupying `a`'s position.
    fn balance(&mut self, a: u32) -> u32 {
        if self.node(a).is_leaf() || self.node(a).height < 2 {
            return a;
        }

        let (b, c) = self.children(a);
        let imbalance = i32::from(self.node(c).height) - i32::from(self.node(b).height);
        if imbalance > 1 {
            self.rotate(a, c, b)
        } else if imbalance < -1 {
            self.rotate(a, b, c)
        } else {
            a
        }
    }

    /// Lifts `up` (the taller child of `a`) above `a`, moving the shorter of
    /// `up`'s children down into `a`'s vacated child slot. `keep` is `a`'s
    /// other child and stays put.
    fn rotate(&mut self, a: u32, up: u32, keep: u32) -> u32 {
        let (up_left, up_right) = self.children(up);

        // up replaces a in the grandparent.
        let grandparent = self.node(a).parent;
        self.node_mut(up).parent = grandparent;
        self.node_mut(a).parent = Some(up);
        match grandparent {
            Some(g) => self.replace_child(g, a, up),
            None => self.root = Some(up),
        }

        // The taller of up's children stays with up; the shorter moves to a.
        let (stay, moved) = if self.node(up_left).height >= self.node(up_right).height {
            (up_left, up_right)
        } else {
            (up_right, up_left)
        };

        self.node_mut(up).kind = NodeKind::Internal {
            left: a,
            right: stay,
        };
        self.replace_child(a, up, moved);
        self.node_mut(moved).parent = Some(a);

        let a_aabb = self.node(keep).aabb.union(&self.node(moved).aabb);
        let a_height = 1 + self.node(keep).height.max(self.node(moved).height);
        {
            let node = self.node_mut(a);
            node.aabb = a_aabb;
            node.height = a_height;
        }
        let up_aabb = self.node(a).aabb.union(&self.node(stay).aabb);
        let up_height = 1 + self.node(a).height.max(self.node(stay).height);
        {
            let node = self.node_mut(up);
            node.aabb = up_aabb;
            node.height = up_height;
        }

        up
    }

    fn leaf_payload(&self, proxy: ProxyId) -> &ProxyPayload {
        assert!(
            self.nodes
                .get(proxy.0 as usize)
                .is_some_and(TreeNode::is_leaf),
            "invalid proxy handle {proxy:?}"
        );
        match &self.node(proxy.0).kind {
            NodeKind::Leaf(payload) => payload,
            _ => unreachable!(),
        }
    }
}

impl SpatialIndex for DynamicTree {
    fn add_proxy(&mut self, payload: ProxyPayload) -> ProxyId {
        let fat = payload.aabb.inflate(AABB_MARGIN);
        let leaf = self.allocate(fat, NodeKind::Leaf(payload), 0);
        self.insert_leaf(leaf);
        self.proxy_count += 1;
        let id = ProxyId(leaf);
        self.moved.insert(id);
        id
    }

    fn remove_proxy(&mut self, proxy: ProxyId) -> ProxyPayload {
        assert!(
            self.nodes
                .get(proxy.0 as usize)
                .is_some_and(TreeNode::is_leaf),
            "invalid proxy handle {proxy:?}"
        );
        self.remove_leaf(proxy.0);
        self.proxy_count -= 1;
        self.moved.remove(&proxy);
        match self.release(proxy.0) {
            NodeKind::Leaf(payload) => payload,
            _ => unreachable!("leaf vanished during removal"),
        }
    }

    fn move_proxy(&mut self, proxy: ProxyId, aabb: Aabb, displacement: Vec2) {
        assert!(
            self.nodes
                .get(proxy.0 as usize)
                .is_some_and(TreeNode::is_leaf),
            "invalid proxy handle {proxy:?}"
        );

        let fat_bound = self.node(proxy.0).aabb;
        if fat_bound.contains(&aabb) {
            // Still inside the fattened bound: update in place.
            if let NodeKind::Leaf(payload) = &mut self.node_mut(proxy.0).kind {
                payload.aabb = aabb;
            }
            self.moved.insert(proxy);
            return;
        }

        self.remove_leaf(proxy.0);
        let predicted = aabb
            .inflate(AABB_MARGIN)
            .extended_along(&displacement.scale(DISPLACEMENT_MULTIPLIER));
        {
            let node = self.node_mut(proxy.0);
            node.aabb = predicted;
            if let NodeKind::Leaf(payload) = &mut node.kind {
                payload.aabb = aabb;
            }
        }
        self.insert_leaf(proxy.0);
        self.moved.insert(proxy);
    }

    fn payload(&self, proxy: ProxyId) -> &ProxyPayload {
        self.leaf_payload(proxy)
    }

    fn query(&self, aabb: &Aabb, approximate: bool, callback: &mut QueryCallback<'_>) {
        let mut stack = Vec::with_capacity(64);
        if let Some(root) = self.root {
            stack.push(root);
        }
        while let Some(index) = stack.pop() {
            let node = self.node(index);
            if !node.aabb.overlaps(aabb) {
                continue;
            }
            match &node.kind {
                NodeKind::Internal { left, right } => {
                    stack.push(*left);
                    stack.push(*right);
                }
                NodeKind::Leaf(payload) => {
                    if !approximate && !payload.aabb.overlaps(aabb) {
                        continue;
                    }
                    if !callback(ProxyId(index), payload) {
                        return;
                    }
                }
                NodeKind::Free { .. } => unreachable!("free node reachable from root"),
            }
        }
    }

    fn ray_cast(&self, ray: &Ray, max_distance: f32, callback: &mut RayCastCallback<'_>) {
        let mut max_distance = max_distance;
        let mut stack = Vec::with_capacity(64);
        if let Some(root) = self.root {
            stack.push(root);
        }
        while let Some(index) = stack.pop() {
            let node = self.node(index);
            let Some(span) = ray.intersect_aabb(&node.aabb) else {
                continue;
            };
            if span.enter > max_distance {
                continue;
            }
            match &node.kind {
                NodeKind::Internal { left, right } => {
                    stack.push(*left);
                    stack.push(*right);
                }
                NodeKind::Leaf(payload) => {
                    let Some(hit) = ray.intersect_aabb(&payload.aabb) else {
                        continue;
                    };
                    if hit.enter > max_distance {
                        continue;
                    }
                    match callback(ProxyId(index), payload, ray.at(hit.enter), hit.enter) {
                        RayFlow::Continue => {}
                        RayFlow::Clip(distance) => {
                            max_distance = max_distance.min(distance);
                        }
                        RayFlow::Stop => return,
                    }
                }
                NodeKind::Free { .. } => unreachable!("free node reachable from root"),
            }
        }
    }

    fn update_pairs(&mut self, awake: &dyn AwakeSet, callback: &mut PairCallback<'_>) {
        let mut seeds: Vec<ProxyId> = self.moved.iter().copied().collect();
        seeds.sort_unstable();

        let mut pairs: Vec<(ProxyId, ProxyId)> = Vec::new();
        for seed in seeds {
            let (seed_fat, seed_body, seed_aabb) = {
                let node = self.node(seed.0);
                match &node.kind {
                    NodeKind::Leaf(payload) => (node.aabb, payload.body, payload.aabb),
                    _ => unreachable!("moved set references a non-leaf"),
                }
            };
            if !awake.is_awake(seed_body) {
                continue;
            }
            let seed_payload = self.leaf_payload(seed);
            let mut found: Vec<(ProxyId, ProxyId)> = Vec::new();
            self.query(&seed_fat, true, &mut |other, other_payload| {
                if other != seed
                    && other_payload.body != seed_body
                    && seed_payload.should_collide(other_payload)
                    && seed_aabb.overlaps(&other_payload.aabb)
                {
                    found.push(if seed < other {
                        (seed, other)
                    } else {
                        (other, seed)
                    });
                }
                true
            });
            pairs.extend(found);
        }

        pairs.sort_unstable();
        pairs.dedup();
        for (a, b) in pairs {
            let pa = self.leaf_payload(a);
            let pb = self.leaf_payload(b);
            callback(a, pa, b, pb);
        }
        self.moved.clear();
    }

    fn test_overlap(&self, a: ProxyId, b: ProxyId) -> bool {
        self.leaf_payload(a)
            .aabb
            .overlaps(&self.leaf_payload(b).aabb)
    }

    fn shift_origin(&mut self, offset: Vec2) -> Result<(), BroadphaseError> {
        let delta = offset.neg();
        for node in &mut self.nodes {
            if matches!(node.kind, NodeKind::Free { .. }) {
                continue;
            }
            node.aabb = node.aabb.translated(&delta);
            if let NodeKind::Leaf(payload) = &mut node.kind {
                payload.aabb = payload.aabb.translated(&delta);
            }
        }
        Ok(())
    }

    fn proxy_count(&self) -> usize {
        self.proxy_count
    }
}
