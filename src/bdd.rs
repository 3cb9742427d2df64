//! Reduced ordered binary decision diagrams with complement edges.
//!
//! All operations go through the [`Bdd`] manager, which owns the node storage,
//! the unique table (hash consing) and the computed table. Every boolean
//! function has exactly one [`Ref`] for the fixed variable order, so equality
//! of references is equality of functions.
//!
//! Variables are 1-indexed and ordered by index: variable `1` is tested at the
//! root. Index `0` is reserved for the terminal node.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;

use log::trace;
use num_bigint::BigUint;
use rustc_hash::FxHashMap;

use crate::cache::Cache;
use crate::reference::Ref;
use crate::utils::{pairing3, MyHash};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum OpKey {
    Ite(Ref, Ref, Ref),
    Exists(Ref, u32),
}

impl MyHash for OpKey {
    fn hash(&self) -> u64 {
        match *self {
            OpKey::Ite(f, g, h) => pairing3(
                f.raw() as u32 as u64,
                g.raw() as u32 as u64,
                h.raw() as u32 as u64,
            ),
            OpKey::Exists(f, v) => pairing3(f.raw() as u32 as u64, v as u64, 1 << 40),
        }
    }
}

pub struct Bdd {
    nodes: RefCell<Vec<Node>>,
    unique: RefCell<FxHashMap<Node, u32>>,
    cache: RefCell<Cache<OpKey, Ref>>,
    num_vars: Cell<u32>,
    pub zero: Ref,
    pub one: Ref,
}

impl Bdd {
    pub fn new(cache_bits: usize) -> Self {
        let one = Ref::positive(1);
        let terminal = Node {
            variable: 0,
            low: one,
            high: one,
        };
        // Index 0 is never referenced; index 1 is the terminal node.
        let nodes = vec![terminal, terminal];

        Self {
            nodes: RefCell::new(nodes),
            unique: RefCell::new(FxHashMap::default()),
            cache: RefCell::new(Cache::new(cache_bits)),
            num_vars: Cell::new(0),
            zero: -one,
            one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new(16)
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.borrow();
        f.debug_struct("Bdd")
            .field("nodes", &self.num_nodes())
            .field("vars", &self.num_vars.get())
            .field("cache_hits", &cache.hits())
            .field("cache_misses", &cache.misses())
            .finish()
    }
}

impl Bdd {
    /// Number of allocated nodes, including the terminal.
    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len() - 1
    }

    /// Variable tested at the root of `node`, or `0` for terminals.
    pub fn variable(&self, node: Ref) -> u32 {
        self.nodes.borrow()[node.index()].variable
    }

    /// Position of `node`'s top variable in the order; terminals are below
    /// every variable.
    fn level(&self, node: Ref) -> u32 {
        if self.is_terminal(node) {
            u32::MAX
        } else {
            self.variable(node)
        }
    }

    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.nodes.borrow()[node.index()].low;
        if node.is_negated() {
            -low
        } else {
            low
        }
    }

    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.nodes.borrow()[node.index()].high;
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }

    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }

    pub fn is_terminal(&self, node: Ref) -> bool {
        node.index() == self.one.index()
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        // Canonical form: the high edge is never complemented.
        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }

        if low == high {
            return low;
        }

        let node = Node {
            variable: v,
            low,
            high,
        };
        if let Some(&index) = self.unique.borrow().get(&node) {
            return Ref::positive(index);
        }

        let mut nodes = self.nodes.borrow_mut();
        let index = nodes.len() as u32;
        assert!(index < i32::MAX as u32, "BDD node storage exhausted");
        nodes.push(node);
        self.unique.borrow_mut().insert(node, index);
        if v > self.num_vars.get() {
            self.num_vars.set(v);
        }
        Ref::positive(index)
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");
        self.mk_node(v, self.zero, self.one)
    }

    /// Allocate a fresh variable below all existing ones and return its index.
    pub fn new_var(&self) -> u32 {
        let v = self.num_vars.get() + 1;
        self.num_vars.set(v);
        v
    }

    /// Conjunction of literals given as signed variable indices.
    pub fn cube(&self, literals: impl IntoIterator<Item = i32>) -> Ref {
        let mut literals = literals.into_iter().collect::<Vec<_>>();
        literals.sort_by_key(|&v| std::cmp::Reverse(v.abs()));
        let mut current = self.one;
        for lit in literals {
            assert_ne!(lit, 0, "Variable index should not be zero");
            let v = lit.unsigned_abs();
            current = if lit < 0 {
                self.apply_and(-self.mk_var(v), current)
            } else {
                self.apply_and(self.mk_var(v), current)
            };
        }
        current
    }

    fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        if self.level(node) > v {
            return (node, node);
        }
        debug_assert_eq!(self.level(node), v);
        (self.low_node(node), self.high_node(node))
    }

    /// Apply the ITE operation to the arguments.
    ///
    /// ```text
    /// ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)
    /// ```
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        trace!("apply_ite(f = {}, g = {}, h = {})", f, g, h);

        // ite(1,G,H) => G
        // ite(0,G,H) => H
        if self.is_one(f) {
            return g;
        }
        if self.is_zero(f) {
            return h;
        }

        // ite(F,G,G) => G
        // ite(F,1,0) => F
        // ite(F,0,1) => ~F
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // Standard triples:
        //   ite(F,F,H) => ite(F,1,H)
        //   ite(F,G,F) => ite(F,G,0)
        //   ite(F,~F,H) => ite(F,0,H)
        //   ite(F,G,~F) => ite(F,G,1)
        let g = if g == f {
            self.one
        } else if g == -f {
            self.zero
        } else {
            g
        };
        let h = if h == f {
            self.zero
        } else if h == -f {
            self.one
        } else {
            h
        };
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // ite(~F,G,H) => ite(F,H,G)
        let (f, g, h) = if f.is_negated() { (-f, h, g) } else { (f, g, h) };

        // ite(F,~G,H) => ~ite(F,G,~H)
        let (g, h, negate) = if g.is_negated() {
            (-g, -h, true)
        } else {
            (g, h, false)
        };

        let key = OpKey::Ite(f, g, h);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return if negate { -res } else { res };
        }

        let m = self.level(f).min(self.level(g)).min(self.level(h));
        debug_assert_ne!(m, u32::MAX);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.apply_ite(f0, g0, h0);
        let t = self.apply_ite(f1, g1, h1);
        let res = self.mk_node(m, e, t);

        self.cache.borrow_mut().insert(key, res);

        if negate {
            -res
        } else {
            res
        }
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, -v, v)
    }

    pub fn apply_eq(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, -v)
    }

    pub fn apply_and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.one;
        for node in nodes {
            res = self.apply_and(res, node);
            if self.is_zero(res) {
                break;
            }
        }
        res
    }

    /// Check whether `f → g` is a tautology.
    pub fn is_implies(&self, f: Ref, g: Ref) -> bool {
        self.is_zero(self.apply_and(f, -g))
    }

    /// Existential quantification: `∃v. f = f|v=0 ∨ f|v=1`.
    pub fn exists(&self, f: Ref, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        let top = self.level(f);
        if top > v {
            // `f` does not depend on `v`.
            return f;
        }

        let key = OpKey::Exists(f, v);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return res;
        }

        let res = if top == v {
            self.apply_or(self.low_node(f), self.high_node(f))
        } else {
            let low = self.exists(self.low_node(f), v);
            let high = self.exists(self.high_node(f), v);
            self.mk_node(top, low, high)
        };

        self.cache.borrow_mut().insert(key, res);
        res
    }

    /// Existential quantification over several variables.
    pub fn exists_many(&self, f: Ref, vars: impl IntoIterator<Item = u32>) -> Ref {
        vars.into_iter().fold(f, |acc, v| self.exists(acc, v))
    }

    /// All variables `f` depends on.
    pub fn support(&self, f: Ref) -> BTreeSet<u32> {
        let mut vars = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![f.regular()];
        while let Some(node) = stack.pop() {
            if self.is_terminal(node) || !visited.insert(node.index()) {
                continue;
            }
            vars.insert(self.variable(node));
            stack.push(self.low_node(node).regular());
            stack.push(self.high_node(node).regular());
        }
        vars
    }

    /// Number of distinct nodes reachable from `f` (terminal included).
    pub fn size(&self, f: Ref) -> usize {
        let mut visited = BTreeSet::new();
        let mut stack = vec![f.regular()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.index()) || self.is_terminal(node) {
                continue;
            }
            stack.push(self.low_node(node).regular());
            stack.push(self.high_node(node).regular());
        }
        visited.len()
    }

    /// Number of satisfying assignments over variables `1..=num_vars`.
    pub fn sat_count(&self, f: Ref, num_vars: u32) -> BigUint {
        if let Some(&max) = self.support(f).iter().next_back() {
            assert!(
                max <= num_vars,
                "Function depends on variable {} outside of 1..={}",
                max,
                num_vars
            );
        }
        let mut cache = HashMap::new();
        let count = self.sat_count_(f, num_vars, &mut cache);
        count << (self.level_or(f, num_vars) - 1)
    }

    fn level_or(&self, node: Ref, num_vars: u32) -> u32 {
        if self.is_terminal(node) {
            num_vars + 1
        } else {
            self.variable(node)
        }
    }

    // Counts assignments to the variables from `node`'s level to `num_vars`.
    fn sat_count_(&self, node: Ref, num_vars: u32, cache: &mut HashMap<Ref, BigUint>) -> BigUint {
        if self.is_zero(node) {
            return BigUint::from(0u32);
        }
        if self.is_one(node) {
            return BigUint::from(1u32);
        }
        if let Some(count) = cache.get(&node) {
            return count.clone();
        }

        let v = self.variable(node);
        let low = self.low_node(node);
        let high = self.high_node(node);
        let count_low = self.sat_count_(low, num_vars, cache) << (self.level_or(low, num_vars) - v - 1);
        let count_high = self.sat_count_(high, num_vars, cache) << (self.level_or(high, num_vars) - v - 1);
        let count = count_low + count_high;

        cache.insert(node, count.clone());
        count
    }

    /// Returns an iterator over all paths to TRUE.
    ///
    /// Each path is a list of signed variable indices (negative for `false`),
    /// ordered from the root. Paths are pairwise disjoint; variables not on a
    /// path are don't-cares.
    pub fn paths(&self, f: Ref) -> BddPaths<'_> {
        BddPaths {
            bdd: self,
            stack: vec![(f, Vec::new())],
        }
    }
}

/// Depth-first iterator over the paths to TRUE of a BDD.
pub struct BddPaths<'a> {
    bdd: &'a Bdd,
    stack: Vec<(Ref, Vec<i32>)>,
}

impl Iterator for BddPaths<'_> {
    type Item = Vec<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, path)) = self.stack.pop() {
            if self.bdd.is_zero(node) {
                continue;
            }
            if self.bdd.is_one(node) {
                return Some(path);
            }
            let v = self.bdd.variable(node) as i32;

            let mut low_path = path.clone();
            low_path.push(-v);
            self.stack.push((self.bdd.low_node(node), low_path));

            let mut high_path = path;
            high_path.push(v);
            self.stack.push((self.bdd.high_node(node), high_path));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_var() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        assert_eq!(bdd.variable(x), 1);
        assert_eq!(bdd.high_node(x), bdd.one);
        assert_eq!(bdd.low_node(x), bdd.zero);

        let not_x = -x;
        assert_eq!(bdd.variable(not_x), 1);
        assert_eq!(bdd.high_node(not_x), bdd.zero);
        assert_eq!(bdd.low_node(not_x), bdd.one);
    }

    #[test]
    fn test_terminal() {
        let bdd = Bdd::default();

        assert!(bdd.is_terminal(bdd.zero));
        assert!(bdd.is_zero(bdd.zero));
        assert!(!bdd.is_one(bdd.zero));
        assert!(bdd.is_terminal(bdd.one));
        assert!(bdd.is_one(bdd.one));
        assert_eq!(bdd.variable(bdd.one), 0);
    }

    #[test]
    fn test_hash_consing() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let f = bdd.apply_and(x1, x2);
        let g = bdd.apply_and(x2, x1);
        assert_eq!(f, g);
        let before = bdd.num_nodes();
        let _ = bdd.apply_and(x1, x2);
        assert_eq!(bdd.num_nodes(), before);
    }

    #[test]
    fn test_de_morgan() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);

        assert_eq!(-bdd.apply_and(x, y), bdd.apply_or(-x, -y));
        assert_eq!(-bdd.apply_or(x, y), bdd.apply_and(-x, -y));
    }

    #[test]
    fn test_xor() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let f = bdd.apply_and(x, y);

        assert_eq!(bdd.apply_xor(f, f), bdd.zero);
        assert_eq!(bdd.apply_xor(f, -f), bdd.one);
        assert_eq!(bdd.apply_eq(f, f), bdd.one);
    }

    #[test]
    fn test_cube() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let x3 = bdd.mk_var(3);

        let f = bdd.apply_and_many([x1, -x2, x3]);
        assert_eq!(bdd.cube([3, 1, -2]), f);
        assert_eq!(bdd.cube([]), bdd.one);
    }

    #[test]
    fn test_is_implies() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let f = bdd.apply_and(x1, x2);

        assert!(bdd.is_implies(f, x1));
        assert!(bdd.is_implies(f, x2));
        assert!(!bdd.is_implies(f, -x1));
        assert!(bdd.is_implies(f, bdd.apply_or(x1, x2)));
        assert!(!bdd.is_implies(bdd.apply_or(x1, x2), f));
        assert!(bdd.is_implies(bdd.zero, x1));
        assert!(bdd.is_implies(x1, bdd.one));
    }

    #[test]
    fn test_exists() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let x3 = bdd.mk_var(3);

        // ∃x2. (x1 ∧ x2) ∨ (¬x2 ∧ x3) = x1 ∨ x3
        let f = bdd.apply_or(bdd.apply_and(x1, x2), bdd.apply_and(-x2, x3));
        assert_eq!(bdd.exists(f, 2), bdd.apply_or(x1, x3));

        // Quantifying an absent variable is the identity.
        assert_eq!(bdd.exists(x1, 3), x1);
        assert_eq!(bdd.exists(x1, 1), bdd.one);
        assert_eq!(bdd.exists(-bdd.apply_and(x1, x2), 1), bdd.one);
        assert_eq!(bdd.exists_many(f, [1, 2, 3]), bdd.one);
    }

    #[test]
    fn test_support() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x3 = bdd.mk_var(3);
        let f = bdd.apply_xor(x1, x3);

        assert_eq!(bdd.support(f), BTreeSet::from([1, 3]));
        assert!(bdd.support(bdd.one).is_empty());
    }

    #[test]
    fn test_sat_count() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);

        assert_eq!(bdd.sat_count(bdd.apply_or(x1, x2), 2), BigUint::from(3u32));
        assert_eq!(bdd.sat_count(bdd.apply_or(x1, x2), 3), BigUint::from(6u32));
        assert_eq!(bdd.sat_count(x2, 2), BigUint::from(2u32));
        assert_eq!(bdd.sat_count(bdd.one, 4), BigUint::from(16u32));
        assert_eq!(bdd.sat_count(bdd.zero, 4), BigUint::from(0u32));
    }

    #[test]
    fn test_paths() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let f = bdd.apply_xor(x, y);

        let mut paths: Vec<_> = bdd.paths(f).collect();
        paths.sort();
        assert_eq!(paths, vec![vec![-1, 2], vec![1, -2]]);

        assert_eq!(bdd.paths(bdd.one).collect::<Vec<_>>(), vec![Vec::<i32>::new()]);
        assert_eq!(bdd.paths(bdd.zero).count(), 0);
    }
}
