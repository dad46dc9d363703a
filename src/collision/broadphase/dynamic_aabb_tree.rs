use crate::linear_math::aabb::Aabb;
use glam::Vec3A;

pub const NULL_NODE: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct TreeNode {
    aabb: Aabb,
    /// Parent for live nodes, next free id for pooled ones.
    parent_or_next: u32,
    child1: u32,
    child2: u32,
    height: i16,
    /// Leaf payload; `NULL_NODE` on internal nodes.
    payload: u32,
}

impl TreeNode {
    const fn is_leaf(&self) -> bool {
        self.child1 == NULL_NODE
    }
}

/// Incremental bounding volume hierarchy over fattened leaf AABBs. Siblings
/// for insertion are chosen by the surface area heuristic (the candidate
/// minimizing the summed growth of internal bounds) and the tree is kept
/// shallow with AVL-style rotations. Structural mutation requires `&mut`;
/// queries are `&self` and may run concurrently between mutations.
pub struct DynamicAabbTree {
    nodes: Vec<TreeNode>,
    root: u32,
    free_list: u32,
    moved: Vec<u32>,
}

impl DynamicAabbTree {
    #[must_use]
    pub fn new(proxy_capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(proxy_capacity * 2),
            root: NULL_NODE,
            free_list: NULL_NODE,
            moved: Vec::with_capacity(proxy_capacity),
        }
    }

    /// Inserts a leaf with `aabb` already fattened by the caller. The new
    /// proxy is reported through `drain_moved` so pairs form on the next
    /// enumeration.
    pub fn add_proxy(&mut self, payload: u32, aabb: Aabb) -> u32 {
        let leaf = self.allocate_node();
        self.nodes[leaf as usize].aabb = aabb;
        self.nodes[leaf as usize].payload = payload;
        self.nodes[leaf as usize].height = 0;
        self.insert_leaf(leaf);
        self.moved.push(leaf);
        leaf
    }

    pub fn remove_proxy(&mut self, proxy: u32) {
        debug_assert!(self.nodes[proxy as usize].is_leaf());
        self.remove_leaf(proxy);
        self.free_node(proxy);
        self.moved.retain(|&m| m != proxy);
    }

    /// Re-fits the proxy to `tight_aabb`. Returns false while the stored fat
    /// bounds still cover it; otherwise the leaf is reinserted with
    /// `fat_aabb` and queued as moved.
    pub fn update(&mut self, proxy: u32, tight_aabb: &Aabb, fat_aabb: Aabb) -> bool {
        debug_assert!(self.nodes[proxy as usize].is_leaf());

        if self.nodes[proxy as usize].aabb.contains(tight_aabb) {
            return false;
        }

        self.remove_leaf(proxy);
        self.nodes[proxy as usize].aabb = fat_aabb;
        self.insert_leaf(proxy);
        self.moved.push(proxy);
        true
    }

    #[must_use]
    pub fn fat_aabb(&self, proxy: u32) -> &Aabb {
        &self.nodes[proxy as usize].aabb
    }

    #[must_use]
    pub fn payload(&self, proxy: u32) -> u32 {
        debug_assert!(self.nodes[proxy as usize].is_leaf());
        self.nodes[proxy as usize].payload
    }

    pub fn drain_moved(&mut self, out: &mut Vec<u32>) {
        out.append(&mut self.moved);
    }

    /// Calls `visitor(proxy, payload)` for every leaf whose bounds touch
    /// `aabb`.
    pub fn query(&self, aabb: &Aabb, visitor: &mut impl FnMut(u32, u32)) {
        if self.root != NULL_NODE {
            self.query_node(self.root, aabb, visitor);
        }
    }

    fn query_node(&self, node_id: u32, aabb: &Aabb, visitor: &mut impl FnMut(u32, u32)) {
        let node = &self.nodes[node_id as usize];
        if !node.aabb.intersects(aabb) {
            return;
        }

        if node.is_leaf() {
            visitor(node_id, node.payload);
        } else {
            self.query_node(node.child1, aabb, visitor);
            self.query_node(node.child2, aabb, visitor);
        }
    }

    /// Descends front-to-back using slab tests. `hit` receives the payload
    /// and the entry distance of the leaf bounds and returns a new clip
    /// distance: return the argument to keep searching, something smaller to
    /// clip, or 0.0 to stop.
    pub fn ray_cast(
        &self,
        origin: Vec3A,
        direction: Vec3A,
        max_t: f32,
        hit: &mut impl FnMut(u32, f32) -> f32,
    ) {
        if self.root == NULL_NODE {
            return;
        }
        let inv_direction = direction.recip();
        let mut clip = max_t;
        self.ray_cast_node(self.root, origin, inv_direction, &mut clip, hit);
    }

    fn ray_cast_node(
        &self,
        node_id: u32,
        origin: Vec3A,
        inv_direction: Vec3A,
        clip: &mut f32,
        hit: &mut impl FnMut(u32, f32) -> f32,
    ) {
        if *clip <= 0.0 {
            return;
        }

        let node = &self.nodes[node_id as usize];
        let t1 = (node.aabb.min - origin) * inv_direction;
        let t2 = (node.aabb.max - origin) * inv_direction;
        let tmin = t1.min(t2).max_element().max(0.0);
        let tmax = t1.max(t2).min_element().min(*clip);
        if tmin > tmax {
            return;
        }

        if node.is_leaf() {
            let next = hit(node.payload, tmin);
            *clip = clip.min(next);
        } else {
            self.ray_cast_node(node.child1, origin, inv_direction, clip, hit);
            self.ray_cast_node(node.child2, origin, inv_direction, clip, hit);
        }
    }

    /// Depth-bounded walk for debug views: `visitor(aabb, depth, is_leaf)`.
    pub fn enumerate_all(&self, visitor: &mut impl FnMut(&Aabb, u32, bool), max_depth: u32) {
        if self.root != NULL_NODE {
            self.enumerate_node(self.root, 0, max_depth, visitor);
        }
    }

    fn enumerate_node(
        &self,
        node_id: u32,
        depth: u32,
        max_depth: u32,
        visitor: &mut impl FnMut(&Aabb, u32, bool),
    ) {
        if depth > max_depth {
            return;
        }
        let node = &self.nodes[node_id as usize];
        visitor(&node.aabb, depth, node.is_leaf());
        if !node.is_leaf() {
            self.enumerate_node(node.child1, depth + 1, max_depth, visitor);
            self.enumerate_node(node.child2, depth + 1, max_depth, visitor);
        }
    }

    #[must_use]
    pub fn height(&self) -> i16 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    fn allocate_node(&mut self) -> u32 {
        if self.free_list != NULL_NODE {
            let id = self.free_list;
            self.free_list = self.nodes[id as usize].parent_or_next;
            self.nodes[id as usize] = Self::fresh_node();
            id
        } else {
            self.nodes.push(Self::fresh_node());
            self.nodes.len() as u32 - 1
        }
    }

    const fn fresh_node() -> TreeNode {
        TreeNode {
            aabb: Aabb::EMPTY,
            parent_or_next: NULL_NODE,
            child1: NULL_NODE,
            child2: NULL_NODE,
            height: 0,
            payload: NULL_NODE,
        }
    }

    fn free_node(&mut self, node_id: u32) {
        self.nodes[node_id as usize].parent_or_next = self.free_list;
        self.nodes[node_id as usize].height = -1;
        self.free_list = node_id;
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent_or_next = NULL_NODE;
            return;
        }

        // Descend toward the sibling whose expansion costs the least area.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let child1 = node.child1;
            let child2 = node.child2;

            let area = node.aabb.area();
            let combined_area = (node.aabb + leaf_aabb).area();

            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost1 = self.descend_cost(child1, &leaf_aabb) + inheritance_cost;
            let cost2 = self.descend_cost(child2, &leaf_aabb) + inheritance_cost;

            if cost < cost1 && cost < cost2 {
                break;
            }
            index = if cost1 < cost2 { child1 } else { child2 };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent_or_next;
        let new_parent = self.allocate_node();
        self.nodes[new_parent as usize].parent_or_next = old_parent;
        self.nodes[new_parent as usize].aabb = leaf_aabb + self.nodes[sibling as usize].aabb;
        self.nodes[new_parent as usize].height = self.nodes[sibling as usize].height + 1;
        self.nodes[new_parent as usize].child1 = sibling;
        self.nodes[new_parent as usize].child2 = leaf;
        self.nodes[sibling as usize].parent_or_next = new_parent;
        self.nodes[leaf as usize].parent_or_next = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].child1 == sibling {
            self.nodes[old_parent as usize].child1 = new_parent;
        } else {
            self.nodes[old_parent as usize].child2 = new_parent;
        }

        self.refit_upward(new_parent);
    }

    fn descend_cost(&self, child: u32, leaf_aabb: &Aabb) -> f32 {
        let child_aabb = &self.nodes[child as usize].aabb;
        let combined = (*child_aabb + *leaf_aabb).area();
        if self.nodes[child as usize].is_leaf() {
            combined
        } else {
            combined - child_aabb.area()
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent_or_next;
        let grand_parent = self.nodes[parent as usize].parent_or_next;
        let sibling = if self.nodes[parent as usize].child1 == leaf {
            self.nodes[parent as usize].child2
        } else {
            self.nodes[parent as usize].child1
        };

        if grand_parent == NULL_NODE {
            self.root = sibling;
            self.nodes[sibling as usize].parent_or_next = NULL_NODE;
            self.free_node(parent);
            return;
        }

        if self.nodes[grand_parent as usize].child1 == parent {
            self.nodes[grand_parent as usize].child1 = sibling;
        } else {
            self.nodes[grand_parent as usize].child2 = sibling;
        }
        self.nodes[sibling as usize].parent_or_next = grand_parent;
        self.free_node(parent);

        self.refit_upward(grand_parent);
    }

    /// Repairs bounds and heights along the path to the root, rotating where
    /// the two subtrees' heights drift more than one level apart.
    fn refit_upward(&mut self, start: u32) {
        let mut index = start;
        while index != NULL_NODE {
            index = self.balance(index);

            let child1 = self.nodes[index as usize].child1;
            let child2 = self.nodes[index as usize].child2;
            self.nodes[index as usize].height = 1 + self.nodes[child1 as usize]
                .height
                .max(self.nodes[child2 as usize].height);
            self.nodes[index as usize].aabb =
                self.nodes[child1 as usize].aabb + self.nodes[child2 as usize].aabb;

            index = self.nodes[index as usize].parent_or_next;
        }
    }

    fn balance(&mut self, a: u32) -> u32 {
        let node_a = self.nodes[a as usize];
        if node_a.is_leaf() || node_a.height < 2 {
            return a;
        }

        let b = node_a.child1;
        let c = node_a.child2;
        let skew = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if skew > 1 {
            self.rotate_up(a, c, b)
        } else if skew < -1 {
            self.rotate_up(a, b, c)
        } else {
            a
        }
    }

    /// Promotes `tall` above `a`, pushing the shorter grandchild down; `short`
    /// is `a`'s other child and keeps its place.
    fn rotate_up(&mut self, a: u32, tall: u32, short: u32) -> u32 {
        let f = self.nodes[tall as usize].child1;
        let g = self.nodes[tall as usize].child2;

        self.nodes[tall as usize].child1 = a;
        self.nodes[tall as usize].parent_or_next = self.nodes[a as usize].parent_or_next;
        self.nodes[a as usize].parent_or_next = tall;

        let tall_parent = self.nodes[tall as usize].parent_or_next;
        if tall_parent != NULL_NODE {
            if self.nodes[tall_parent as usize].child1 == a {
                self.nodes[tall_parent as usize].child1 = tall;
            } else {
                self.nodes[tall_parent as usize].child2 = tall;
            }
        } else {
            self.root = tall;
        }

        let (keep, push_down) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };

        self.nodes[tall as usize].child2 = keep;
        if self.nodes[a as usize].child1 == tall {
            self.nodes[a as usize].child1 = push_down;
        } else {
            self.nodes[a as usize].child2 = push_down;
        }
        self.nodes[push_down as usize].parent_or_next = a;

        self.nodes[a as usize].aabb =
            self.nodes[short as usize].aabb + self.nodes[push_down as usize].aabb;
        self.nodes[tall as usize].aabb =
            self.nodes[a as usize].aabb + self.nodes[keep as usize].aabb;

        self.nodes[a as usize].height = 1 + self.nodes[short as usize]
            .height
            .max(self.nodes[push_down as usize].height);
        self.nodes[tall as usize].height = 1 + self.nodes[a as usize]
            .height
            .max(self.nodes[keep as usize].height);

        tall
    }
}
