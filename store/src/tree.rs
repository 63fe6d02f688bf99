//! Height-balanced search tree with subtree counts.
//!
//! Nodes live in a `u32`-indexed arena with a free list; [`NIL`] is the
//! reserved null index. Parent links let rebalancing walk to the root without
//! a stack, and per-node subtree counts give rank-offset traversal in
//! O(log n). Unlinking moves tree linkage, never item data, so indices held
//! by an outside secondary index stay valid across deletions.

/// Reserved null index.
pub const NIL: u32 = u32::MAX;

struct Node<T> {
    parent: u32,
    left: u32,
    right: u32,
    height: u32,
    count: u32,
    item: Option<T>,
}

/// Arena-backed AVL tree ordered by a caller-supplied comparator.
pub struct AvlTree<T> {
    nodes: Vec<Node<T>>,
    free: Vec<u32>,
    root: u32,
    len: usize,
}

impl<T> Default for AvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AvlTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Item stored at a live node index.
    pub fn get(&self, idx: u32) -> &T {
        self.node(idx).item.as_ref().expect("live tree node")
    }

    /// Insert an item under the total order given by `less`; returns the
    /// node's stable arena index.
    pub fn insert(&mut self, item: T, less: impl Fn(&T, &T) -> bool) -> u32 {
        let idx = self.alloc(item);
        self.link(idx, &less);
        self.len += 1;
        idx
    }

    /// Unlink a node, free its slot, and return the item.
    pub fn remove(&mut self, idx: u32) -> T {
        self.unlink(idx);
        self.len -= 1;
        self.free.push(idx);
        self.node_mut(idx).item.take().expect("live tree node")
    }

    /// Mutate a node's item in a way that may change its ordering: the node
    /// is detached, updated, and reinserted. Its index does not change.
    pub fn reposition(
        &mut self,
        idx: u32,
        mutate: impl FnOnce(&mut T),
        less: impl Fn(&T, &T) -> bool,
    ) {
        self.unlink(idx);
        mutate(self.node_mut(idx).item.as_mut().expect("live tree node"));
        self.link(idx, &less);
    }

    /// Smallest node whose item is not `below` the caller's key, i.e. the
    /// first item >= key when `below(item)` means item < key. Returns [`NIL`]
    /// when no such node exists.
    pub fn seek_ge(&self, below: impl Fn(&T) -> bool) -> u32 {
        let mut found = NIL;
        let mut cur = self.root;
        while cur != NIL {
            if below(self.get(cur)) {
                cur = self.node(cur).right;
            } else {
                found = cur;
                cur = self.node(cur).left;
            }
        }
        found
    }

    /// Node `offset` positions away from `start` in the in-order traversal
    /// (negative moves backward). Subtree counts steer the walk; [`NIL`] when
    /// the target rank falls outside the tree.
    pub fn rank_offset(&self, start: u32, offset: i64) -> u32 {
        if start == NIL {
            return NIL;
        }
        let mut node = start;
        // Rank of `node` relative to `start`.
        let mut pos: i64 = 0;
        while offset != pos {
            let right = self.node(node).right;
            let left = self.node(node).left;
            if pos < offset && pos + self.count(right) as i64 >= offset {
                // Target is inside the right subtree.
                node = right;
                pos += self.count(self.node(node).left) as i64 + 1;
            } else if pos > offset && pos - self.count(left) as i64 <= offset {
                // Target is inside the left subtree.
                node = left;
                pos -= self.count(self.node(node).right) as i64 + 1;
            } else {
                // Ascend, adjusting by the subtree we arrive from.
                let parent = self.node(node).parent;
                if parent == NIL {
                    return NIL;
                }
                if self.node(parent).right == node {
                    pos -= self.count(self.node(node).left) as i64 + 1;
                } else {
                    pos += self.count(self.node(node).right) as i64 + 1;
                }
                node = parent;
            }
        }
        node
    }

    /// Drop all nodes and reset the arena.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = NIL;
        self.len = 0;
    }

    fn node(&self, idx: u32) -> &Node<T> {
        &self.nodes[idx as usize]
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node<T> {
        &mut self.nodes[idx as usize]
    }

    fn height(&self, idx: u32) -> u32 {
        if idx == NIL { 0 } else { self.node(idx).height }
    }

    fn count(&self, idx: u32) -> u32 {
        if idx == NIL { 0 } else { self.node(idx).count }
    }

    fn alloc(&mut self, item: T) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                let node = self.node_mut(idx);
                node.item = Some(item);
                idx
            }
            None => {
                self.nodes.push(Node {
                    parent: NIL,
                    left: NIL,
                    right: NIL,
                    height: 1,
                    count: 1,
                    item: Some(item),
                });
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Recompute height and subtree count from the children.
    fn update_stats(&mut self, idx: u32) {
        let node = self.node(idx);
        let (left, right) = (node.left, node.right);
        let height = 1 + self.height(left).max(self.height(right));
        let count = 1 + self.count(left) + self.count(right);
        let node = self.node_mut(idx);
        node.height = height;
        node.count = count;
    }

    /// Point `parent`'s child slot (or the root) from `old` to `new`.
    fn relink_child(&mut self, parent: u32, old: u32, new: u32) {
        if parent == NIL {
            self.root = new;
        } else if self.node(parent).left == old {
            self.node_mut(parent).left = new;
        } else {
            self.node_mut(parent).right = new;
        }
    }

    /// Rotate left around `node`; returns the new subtree root. Updates the
    /// parent's child pointer and both nodes' stats.
    fn rot_left(&mut self, node: u32) -> u32 {
        let parent = self.node(node).parent;
        let pivot = self.node(node).right;
        let inner = self.node(pivot).left;

        self.node_mut(node).right = inner;
        if inner != NIL {
            self.node_mut(inner).parent = node;
        }
        self.node_mut(pivot).parent = parent;
        self.node_mut(pivot).left = node;
        self.node_mut(node).parent = pivot;
        self.relink_child(parent, node, pivot);

        self.update_stats(node);
        self.update_stats(pivot);
        pivot
    }

    fn rot_right(&mut self, node: u32) -> u32 {
        let parent = self.node(node).parent;
        let pivot = self.node(node).left;
        let inner = self.node(pivot).right;

        self.node_mut(node).left = inner;
        if inner != NIL {
            self.node_mut(inner).parent = node;
        }
        self.node_mut(pivot).parent = parent;
        self.node_mut(pivot).right = node;
        self.node_mut(node).parent = pivot;
        self.relink_child(parent, node, pivot);

        self.update_stats(node);
        self.update_stats(pivot);
        pivot
    }

    /// Left subtree is taller by 2: rotate the LR case first, then right.
    fn fix_left(&mut self, node: u32) -> u32 {
        let left = self.node(node).left;
        if self.height(self.node(left).left) < self.height(self.node(left).right) {
            self.rot_left(left);
        }
        self.rot_right(node)
    }

    /// Right subtree is taller by 2: mirror of [`Self::fix_left`].
    fn fix_right(&mut self, node: u32) -> u32 {
        let right = self.node(node).right;
        if self.height(self.node(right).right) < self.height(self.node(right).left) {
            self.rot_right(right);
        }
        self.rot_left(node)
    }

    /// Restore the height invariant from `idx` up to the root after a
    /// mutation changed heights below it.
    fn fix_from(&mut self, mut idx: u32) {
        loop {
            self.update_stats(idx);
            let lh = self.height(self.node(idx).left);
            let rh = self.height(self.node(idx).right);
            let top = if lh == rh + 2 {
                self.fix_left(idx)
            } else if lh + 2 == rh {
                self.fix_right(idx)
            } else {
                idx
            };
            let parent = self.node(top).parent;
            if parent == NIL {
                self.root = top;
                return;
            }
            idx = parent;
        }
    }

    /// Attach a detached node under the search position given by `less`.
    fn link(&mut self, idx: u32, less: &impl Fn(&T, &T) -> bool) {
        {
            let node = self.node_mut(idx);
            node.parent = NIL;
            node.left = NIL;
            node.right = NIL;
            node.height = 1;
            node.count = 1;
        }
        if self.root == NIL {
            self.root = idx;
            return;
        }
        let mut cur = self.root;
        loop {
            let go_left = less(self.get(idx), self.get(cur));
            let next = if go_left {
                self.node(cur).left
            } else {
                self.node(cur).right
            };
            if next == NIL {
                if go_left {
                    self.node_mut(cur).left = idx;
                } else {
                    self.node_mut(cur).right = idx;
                }
                self.node_mut(idx).parent = cur;
                break;
            }
            cur = next;
        }
        self.fix_from(idx);
    }

    /// Detach a node with at most one child and rebalance from its parent.
    fn splice_out(&mut self, idx: u32) {
        let node = self.node(idx);
        debug_assert!(node.left == NIL || node.right == NIL);
        let child = if node.left != NIL {
            node.left
        } else {
            node.right
        };
        let parent = node.parent;

        if child != NIL {
            self.node_mut(child).parent = parent;
        }
        if parent == NIL {
            // Removing the root; the surviving subtree is already balanced.
            self.root = child;
            return;
        }
        self.relink_child(parent, idx, child);
        self.fix_from(parent);
    }

    /// Detach a node from the tree, keeping its arena slot and item.
    fn unlink(&mut self, idx: u32) {
        let node = self.node(idx);
        if node.left == NIL || node.right == NIL {
            self.splice_out(idx);
            return;
        }

        // In-order successor: leftmost of the right subtree.
        let mut succ = node.right;
        while self.node(succ).left != NIL {
            succ = self.node(succ).left;
        }
        self.splice_out(succ);

        // Move the victim's linkage onto the successor. Links are read after
        // the splice, which may have rotated the victim's neighborhood.
        let node = self.node(idx);
        let (parent, left, right) = (node.parent, node.left, node.right);
        let (height, count) = (node.height, node.count);
        {
            let succ_node = self.node_mut(succ);
            succ_node.parent = parent;
            succ_node.left = left;
            succ_node.right = right;
            succ_node.height = height;
            succ_node.count = count;
        }
        if left != NIL {
            self.node_mut(left).parent = succ;
        }
        if right != NIL {
            self.node_mut(right).parent = succ;
        }
        self.relink_child(parent, idx, succ);
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        fn walk<T>(tree: &AvlTree<T>, idx: u32, parent: u32) -> (u32, u32) {
            if idx == NIL {
                return (0, 0);
            }
            let node = tree.node(idx);
            assert!(node.item.is_some(), "linked node {idx} must be live");
            assert_eq!(node.parent, parent, "parent link of {idx}");
            let (lh, lc) = walk(tree, node.left, idx);
            let (rh, rc) = walk(tree, node.right, idx);
            assert_eq!(node.height, 1 + lh.max(rh), "height of {idx}");
            assert_eq!(node.count, 1 + lc + rc, "count of {idx}");
            assert!(lh.abs_diff(rh) <= 1, "balance at {idx}");
            (node.height, node.count)
        }
        let (_, count) = walk(self, self.root, NIL);
        assert_eq!(count as usize, self.len);
    }
}
