use alloc::{boxed::Box, vec::Vec};

use crate::Kbn;
use crate::window::{Sample, Window};

/// Sentinel index marking an absent link.
const NIL: usize = usize::MAX;

/// Node colors used to maintain the balance properties of the tree:
/// red nodes have black children, and every root-to-leaf path crosses
/// the same number of black nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

/// A tree node stored in the preallocated slot arena.
///
/// Links are indices into the arena; `NIL` marks an absent link. The
/// `n_left`/`n_right` counts hold the number of nodes strictly inside
/// the left and right subtrees, enabling rank descent for quantiles.
#[derive(Debug, Clone)]
struct Node<T> {
    value: T,
    color: Color,
    parent: usize,
    left: usize,
    right: usize,
    n_left: usize,
    n_right: usize,
}

impl<T: Sample> Node<T> {
    fn vacant() -> Self {
        Self {
            value: T::zero(),
            color: Color::Black,
            parent: NIL,
            left: NIL,
            right: NIL,
            n_left: 0,
            n_right: 0,
        }
    }
}

/// A moving window that aggregates a fixed number of samples. Once the
/// capacity is reached, each new sample causes the oldest sample to be
/// evicted from the window.
///
/// The window is backed by a red-black tree whose nodes live in a slot
/// array preallocated to the capacity, reused in ring order: the slot
/// holding the oldest sample is always the next slot to be written, so
/// eviction is by slot identity rather than by key. Subtree counts on
/// every node support rank-based quantile queries, and mean/variance
/// are maintained incrementally with Welford updates in both
/// directions.
///
/// After construction, no operation allocates.
#[derive(Debug, Clone)]
pub struct FixedWindow<T> {
    /// Slot arena, preallocated to the capacity of the window.
    nodes: Box<[Node<T>]>,
    root: usize,
    min: usize,
    max: usize,
    /// Slot of the oldest sample, which the next put will reuse.
    cursor: usize,
    size: usize,
    /// Mean of all samples currently in the tree.
    mean: f64,
    /// Total sum of squared differences from the mean.
    m2: f64,
}

impl<T: Sample> FixedWindow<T> {
    /// Creates a moving window with the fixed `capacity` for samples.
    ///
    /// This is the only point at which the window allocates.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");

        let mut nodes = Vec::with_capacity(capacity);
        nodes.resize_with(capacity, Node::vacant);

        Self {
            nodes: nodes.into_boxed_slice(),
            root: NIL,
            min: NIL,
            max: NIL,
            cursor: 0,
            size: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Returns the maximum number of samples the window can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the current number of samples in the window.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the lowest sample currently in the window, or the zero
    /// value if the window is empty.
    ///
    /// Time complexity of O(1).
    #[inline]
    pub fn min(&self) -> T {
        if self.min == NIL {
            T::zero()
        } else {
            self.nodes[self.min].value
        }
    }

    /// Returns the highest sample currently in the window, or the zero
    /// value if the window is empty.
    ///
    /// Time complexity of O(1).
    #[inline]
    pub fn max(&self) -> T {
        if self.max == NIL {
            T::zero()
        } else {
            self.nodes[self.max].value
        }
    }

    /// Returns the arithmetic mean of all samples currently in the
    /// window, or 0.0 if the window is empty.
    ///
    /// Time complexity of O(1).
    #[inline]
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Returns the population variance of all samples currently in the
    /// window, or 0.0 if the window is empty.
    ///
    /// Time complexity of O(1).
    #[inline]
    pub fn variance(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.m2 / self.size as f64
    }

    /// Adds a new sample to the window. If the window is at capacity,
    /// the oldest sample is evicted to make room for the new one.
    ///
    /// Time complexity of O(log n), where n is the number of samples in
    /// the window.
    pub fn put(&mut self, value: T) {
        let n = self.slot_for_put();
        {
            let node = &mut self.nodes[n];
            node.value = value;
            // Inserted nodes start as red
            node.color = Color::Red;
        }

        // Welford's algorithm for online variance, which is a numerically
        // stable approach.
        let v = value.as_();
        let delta = v - self.mean;
        self.mean += delta / self.size as f64;
        let delta2 = v - self.mean;
        self.m2 += delta * delta2;

        if self.root == NIL {
            self.root = n;
            self.min = n;
            self.max = n;
            self.nodes[n].parent = NIL;
            self.rebalance_for_insert(n);
            return;
        }

        let mut p = self.root;
        loop {
            if value < self.nodes[p].value {
                self.nodes[p].n_left += 1;
                let left = self.nodes[p].left;
                if left == NIL {
                    self.set_left(p, n);

                    if p == self.min {
                        self.min = n;
                    }
                    break;
                }
                p = left;
            } else {
                self.nodes[p].n_right += 1;
                let right = self.nodes[p].right;
                if right == NIL {
                    self.set_right(p, n);

                    if p == self.max {
                        self.max = n;
                    }
                    break;
                }
                p = right;
            }
        }

        self.rebalance_for_insert(n);

        #[cfg(debug_assertions)]
        debug_assert!(self.verify_invariants(), "tree invariants violated after put");
    }

    /// Returns the q-quantile of the samples currently in the window:
    /// the smallest retained sample x such that at least a q-fraction of
    /// the retained samples are less than or equal to x.
    ///
    /// Inputs outside [0, 1] are clamped, so `quantile(0.0)` reports the
    /// minimum and `quantile(1.0)` the maximum. If the window is empty,
    /// the zero value is returned.
    ///
    /// Time complexity of O(log n).
    pub fn quantile(&self, q: f64) -> T {
        if self.size == 0 {
            return T::zero();
        }

        // Ceiling discipline: ties on the boundary resolve to the
        // larger sample. A NaN q saturates to 0 on the cast and is
        // clamped up to the minimum.
        let mut target = ((q * self.size as f64).ceil() as usize).clamp(1, self.size);

        let mut n = self.root;
        loop {
            let node = &self.nodes[n];
            if target <= node.n_left {
                n = node.left;
            } else if target == node.n_left + 1 {
                return node.value;
            } else {
                target -= node.n_left + 1;
                n = node.right;
            }
        }
    }

    /// Rebuilds the mean and variance from the samples currently in the
    /// window using compensated summation.
    ///
    /// The reverse Welford step applied on eviction can accumulate
    /// floating-point error over very long runs; this recomputation
    /// discards that accumulated error. O(n) time, no allocation.
    pub fn recompute(&mut self) {
        if self.size == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }

        let mut sum = Kbn::default();
        let mut n = self.min;
        while n != NIL {
            sum += self.nodes[n].value.as_();
            n = self.successor(n);
        }
        let mean = sum.total() / self.size as f64;

        let mut m2 = Kbn::default();
        let mut n = self.min;
        while n != NIL {
            let delta = self.nodes[n].value.as_() - mean;
            m2 += delta * delta;
            n = self.successor(n);
        }

        self.mean = mean;
        self.m2 = m2.total();
    }

    /// Yields the slot for the next insertion, evicting its previous
    /// occupant from the tree if that slot is live.
    fn slot_for_put(&mut self) -> usize {
        let next = self.cursor;

        // If the node is already in the tree, remove it.
        if self.nodes[next].parent != NIL || next == self.root {
            self.remove(next);
        }

        self.cursor = (self.cursor + 1) % self.nodes.len();
        self.size = usize::min(self.size + 1, self.nodes.len());

        next
    }

    #[inline]
    fn color(&self, n: usize) -> Color {
        if n == NIL { Color::Black } else { self.nodes[n].color }
    }

    #[inline]
    fn set_color(&mut self, n: usize, color: Color) {
        if n != NIL {
            self.nodes[n].color = color;
        }
    }

    #[inline]
    fn parent(&self, n: usize) -> usize {
        if n == NIL { NIL } else { self.nodes[n].parent }
    }

    #[inline]
    fn left(&self, n: usize) -> usize {
        if n == NIL { NIL } else { self.nodes[n].left }
    }

    #[inline]
    fn right(&self, n: usize) -> usize {
        if n == NIL { NIL } else { self.nodes[n].right }
    }

    fn sibling(&self, n: usize) -> usize {
        let p = self.parent(n);
        if p == NIL {
            NIL
        } else if self.nodes[p].left == n {
            self.nodes[p].right
        } else {
            self.nodes[p].left
        }
    }

    fn set_left(&mut self, n: usize, l: usize) {
        if n == NIL {
            return;
        }
        self.nodes[n].left = l;
        if l != NIL {
            self.nodes[l].parent = n;
        }
    }

    fn set_right(&mut self, n: usize, r: usize) {
        if n == NIL {
            return;
        }
        self.nodes[n].right = r;
        if r != NIL {
            self.nodes[r].parent = n;
        }
    }

    #[inline]
    fn subtree_size(&self, n: usize) -> usize {
        if n == NIL {
            0
        } else {
            1 + self.nodes[n].n_left + self.nodes[n].n_right
        }
    }

    /// Recomputes both subtree counts of `n` from its immediate
    /// children. Required after every rotation and link change.
    fn update_counts(&mut self, n: usize) {
        if n == NIL {
            return;
        }
        let n_left = self.subtree_size(self.nodes[n].left);
        let n_right = self.subtree_size(self.nodes[n].right);
        let node = &mut self.nodes[n];
        node.n_left = n_left;
        node.n_right = n_right;
    }

    fn update_counts_to_root(&mut self, mut n: usize) {
        while n != NIL {
            self.update_counts(n);
            n = self.nodes[n].parent;
        }
    }

    /// In-order successor of `n`, or `NIL` if `n` is the rightmost node.
    fn successor(&self, n: usize) -> usize {
        let right = self.right(n);
        if right != NIL {
            let mut m = right;
            while self.left(m) != NIL {
                m = self.left(m);
            }
            return m;
        }

        let mut m = n;
        let mut p = self.parent(m);
        while p != NIL && m == self.right(p) {
            m = p;
            p = self.parent(p);
        }
        p
    }

    /// Swaps child-of-parent linkage so that `new` takes over `old`'s
    /// position. Tolerates an absent `new`.
    fn replace(&mut self, old: usize, new: usize) {
        let p = self.nodes[old].parent;
        if p == NIL {
            self.root = new;
            if new != NIL {
                self.nodes[new].parent = NIL;
            }
        } else if self.nodes[p].left == old {
            self.set_left(p, new);
        } else {
            self.set_right(p, new);
        }
    }

    /// Fully exchanges the positions of two nodes in the tree,
    /// including their colors and subtree counts. Handles disjoint
    /// nodes, parent-child pairs, and root participants.
    fn swap(&mut self, mut a: usize, mut b: usize) {
        if a == b || a == NIL || b == NIL {
            return;
        }

        if self.parent(b) == a || self.parent(b) == NIL {
            // Swap to reduce number of conditions
            core::mem::swap(&mut a, &mut b);
        }

        let (a_color, b_color) = (self.nodes[a].color, self.nodes[b].color);
        self.nodes[a].color = b_color;
        self.nodes[b].color = a_color;

        let (a_parent, a_left, a_right) = {
            let node = &self.nodes[a];
            (node.parent, node.left, node.right)
        };
        let (b_parent, b_left, b_right) = {
            let node = &self.nodes[b];
            (node.parent, node.left, node.right)
        };

        let a_was_left = a_parent != NIL && self.nodes[a_parent].left == a;
        let b_was_left = b_parent != NIL && self.nodes[b_parent].left == b;

        self.set_left(a, b_left);
        self.set_right(a, b_right);
        self.set_left(b, a_left);
        self.set_right(b, a_right);

        if a_parent == b {
            self.replace(b, a);
            if a_was_left {
                self.set_left(a, b);
            } else {
                self.set_right(a, b);
            }
        } else {
            self.replace(a, b);
            if b_was_left {
                self.set_left(b_parent, a);
            } else {
                self.set_right(b_parent, a);
            }
        }

        // After the exchange, b can only sit below a, so its counts must
        // be refreshed first.
        self.update_counts(b);
        self.update_counts(a);
    }

    fn rotate_left(&mut self, n: usize) {
        if n == NIL {
            return;
        }
        let r = self.nodes[n].right;
        if r == NIL {
            return;
        }

        self.replace(n, r);
        let r_left = self.nodes[r].left;
        self.set_right(n, r_left);
        self.set_left(r, n);

        self.update_counts(n);
        self.update_counts(r);
    }

    fn rotate_right(&mut self, n: usize) {
        if n == NIL {
            return;
        }
        let l = self.nodes[n].left;
        if l == NIL {
            return;
        }

        self.replace(n, l);
        let l_right = self.nodes[l].right;
        self.set_left(n, l_right);
        self.set_right(l, n);

        self.update_counts(n);
        self.update_counts(l);
    }

    fn rebalance_for_insert(&mut self, mut n: usize) {
        loop {
            let p = self.parent(n);
            // Case 1
            if p == NIL {
                self.nodes[n].color = Color::Black;
                return;
            }

            // Case 2
            if self.nodes[p].color == Color::Black {
                return;
            }

            // Case 3
            let g = self.parent(p);
            let u = self.sibling(p);
            if self.color(u) == Color::Red {
                self.set_color(p, Color::Black);
                self.set_color(u, Color::Black);
                self.set_color(g, Color::Red);
                n = g;
                continue;
            }

            // Case 4
            if n == self.right(p) && p == self.left(g) {
                self.rotate_left(p);
                n = self.left(n);
            } else if n == self.left(p) && p == self.right(g) {
                self.rotate_right(p);
                n = self.right(n);
            }

            // Case 5. Reset the parent and grandparent in case that
            // case 4 rotated
            let p = self.parent(n);
            let g = self.parent(p);
            self.set_color(p, Color::Black);
            self.set_color(g, Color::Red);
            if n == self.left(p) && p == self.left(g) {
                self.rotate_right(g);
            } else if n == self.right(p) && p == self.right(g) {
                self.rotate_left(g);
            }
            return;
        }
    }

    /// Excises the node in slot `n` from the tree, applying the reverse
    /// Welford update for its sample and leaving the slot fully cleared
    /// for reuse.
    fn remove(&mut self, n: usize) {
        if n == NIL {
            return;
        }

        self.size -= 1;

        // Adjust the mean and m2 for the removed sample before any tree
        // surgery, while the slot still holds it.
        if self.size == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
        } else {
            let v = self.nodes[n].value.as_();
            let delta2 = v - self.mean;
            self.mean -= delta2 / self.size as f64;
            let delta = v - self.mean;
            self.m2 -= delta * delta2;
        }

        if self.nodes[n].left != NIL && self.nodes[n].right != NIL {
            // Find the immediate predecessor
            let mut pred = self.nodes[n].left;
            while self.nodes[pred].right != NIL {
                pred = self.nodes[pred].right;
            }

            // Swap places with the in-order predecessor
            self.swap(n, pred);

            // Note that because this node had both left and right
            // children, it couldn't possibly be either min or max.
        }

        // Invariant: n.left, n.right, or both are NIL
        let child = if self.nodes[n].left != NIL {
            self.nodes[n].left
        } else {
            self.nodes[n].right
        };

        if n == self.min {
            self.min = if child == NIL { self.nodes[n].parent } else { child };
        }

        if n == self.max {
            self.max = if child == NIL { self.nodes[n].parent } else { child };
        }

        if self.nodes[n].color == Color::Black {
            let effective = self.color(child);
            self.nodes[n].color = effective;
            self.rebalance_for_remove(n);
        }

        let p = self.nodes[n].parent;
        self.replace(n, child);

        // The root must stay black even when a red child is promoted
        // into it.
        if p == NIL && child != NIL {
            self.nodes[child].color = Color::Black;
        }

        // Clear the slot entirely. The subtree counts must be zeroed
        // along with the links: a stale count on a reused slot corrupts
        // the ancestor bookkeeping and, with it, every later quantile.
        let node = &mut self.nodes[n];
        node.parent = NIL;
        node.left = NIL;
        node.right = NIL;
        node.n_left = 0;
        node.n_right = 0;
        node.color = Color::Black;

        self.update_counts_to_root(p);
    }

    fn rebalance_for_remove(&mut self, mut n: usize) {
        loop {
            let p = self.parent(n);
            // Case 1
            if p == NIL {
                return;
            }

            // Case 2
            let s = self.sibling(n);
            if self.nodes[p].color == Color::Black
                && s != NIL
                && self.color(s) == Color::Black
                && self.color(self.left(s)) == Color::Black
                && self.color(self.right(s)) == Color::Black
            {
                self.set_color(s, Color::Red);
                n = p;
                continue;
            }

            // Case 3
            let mut p = p;
            let mut s = s;
            if self.color(s) == Color::Red {
                self.set_color(p, Color::Red);
                self.set_color(s, Color::Black);
                if n == self.left(p) {
                    self.rotate_left(p);
                } else {
                    self.rotate_right(p);
                }

                // Reassign p and s after rotation
                p = self.parent(n);
                s = self.sibling(n);
            }

            // Case 4
            if self.color(p) == Color::Red
                && s != NIL
                && self.color(s) == Color::Black
                && self.color(self.left(s)) == Color::Black
                && self.color(self.right(s)) == Color::Black
            {
                self.set_color(s, Color::Red);
                self.set_color(p, Color::Black);
                return;
            }

            // Case 5
            if n == self.left(p)
                && s != NIL
                && self.color(s) == Color::Black
                && self.color(self.left(s)) == Color::Red
                && self.color(self.right(s)) == Color::Black
            {
                let s_left = self.left(s);
                self.set_color(s, Color::Red);
                self.set_color(s_left, Color::Black);
                self.rotate_right(s);
            } else if n == self.right(p)
                && s != NIL
                && self.color(s) == Color::Black
                && self.color(self.right(s)) == Color::Red
                && self.color(self.left(s)) == Color::Black
            {
                let s_right = self.right(s);
                self.set_color(s, Color::Red);
                self.set_color(s_right, Color::Black);
                self.rotate_left(s);
            }

            // Case 6
            let p = self.parent(n);
            let s = self.sibling(n);
            let p_color = self.color(p);
            self.set_color(s, p_color);
            self.set_color(p, Color::Black);
            if n == self.left(p) && self.color(self.right(s)) == Color::Red {
                let s_right = self.right(s);
                self.set_color(s_right, Color::Black);
                self.rotate_left(p);
            } else if self.color(self.left(s)) == Color::Red {
                let s_left = self.left(s);
                self.set_color(s_left, Color::Black);
                self.rotate_right(p);
            }
            return;
        }
    }

    #[cfg(debug_assertions)]
    fn verify_invariants(&self) -> bool {
        if self.root == NIL {
            return self.size == 0 && self.min == NIL && self.max == NIL;
        }

        if self.color(self.root) != Color::Black {
            return false;
        }

        self.verify_node(self.root)
            .is_some_and(|(total, _)| total == self.size)
    }

    /// Returns `(total nodes, black height)` for the subtree at `n`, or
    /// `None` if any red-black, ordering, or count property is violated.
    #[cfg(debug_assertions)]
    fn verify_node(&self, n: usize) -> Option<(usize, usize)> {
        if n == NIL {
            return Some((0, 1));
        }

        let node = &self.nodes[n];

        if node.color == Color::Red
            && (self.color(node.left) == Color::Red || self.color(node.right) == Color::Red)
        {
            return None;
        }

        if node.left != NIL && self.nodes[node.left].value > node.value {
            return None;
        }
        if node.right != NIL && self.nodes[node.right].value < node.value {
            return None;
        }

        let (left_total, left_black) = self.verify_node(node.left)?;
        let (right_total, right_black) = self.verify_node(node.right)?;

        if left_black != right_black {
            return None;
        }

        if node.n_left != left_total || node.n_right != right_total {
            return None;
        }

        let black = if node.color == Color::Black {
            left_black + 1
        } else {
            left_black
        };

        Some((1 + left_total + right_total, black))
    }
}

impl<T: Sample> Window<T> for FixedWindow<T> {
    fn size(&self) -> usize {
        self.size()
    }

    fn put(&mut self, value: T) {
        self.put(value);
    }

    fn min(&self) -> T {
        self.min()
    }

    fn max(&self) -> T {
        self.max()
    }

    fn mean(&self) -> f64 {
        self.mean()
    }

    fn variance(&self) -> f64 {
        self.variance()
    }
}
