//! Region algebra over named boolean variables.
//!
//! Predicate abstraction only needs a handful of operations on regions, so
//! they are collected in the object-safe [`RegionCreator`] trait. The default
//! backend is [`BddRegionManager`], which maps every region variable to one
//! BDD variable.

use std::fmt::{Display, Formatter};

use log::trace;
use num_bigint::BigUint;

use crate::bdd::Bdd;
use crate::reference::Ref;

/// Opaque handle to a boolean function over region variables.
///
/// Two regions created by the same manager are equal iff they denote the same
/// function.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Region(Ref);

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Region({})", self.0)
    }
}

/// Operations on regions.
pub trait RegionCreator {
    fn make_true(&self) -> Region;
    fn make_false(&self) -> Region;
    fn make_and(&self, a: Region, b: Region) -> Region;
    fn make_or(&self, a: Region, b: Region) -> Region;
    fn make_not(&self, a: Region) -> Region;

    /// Existentially quantify `variable` (a region created by
    /// [`new_variable`][RegionCreator::new_variable]) out of `region`.
    fn make_exists(&self, region: Region, variable: Region) -> Region;

    fn is_true(&self, region: Region) -> bool;
    fn is_false(&self, region: Region) -> bool;

    /// Check whether `a → b` holds.
    fn entails(&self, a: Region, b: Region) -> bool;

    /// Create a fresh variable, returned as the region where it is true.
    fn new_variable(&self) -> Region;

    /// Split a non-constant region by its top variable.
    ///
    /// Returns `(variable, high, low)` such that
    /// `region = (variable ∧ high) ∨ (¬variable ∧ low)`, or `None` for the
    /// constants.
    fn decompose(&self, region: Region) -> Option<(Region, Region, Region)>;

    /// Disjoint cubes covering `region`, as `(variable, polarity)` literals.
    fn cubes(&self, region: Region) -> Vec<Vec<(Region, bool)>>;

    fn make_cube(&self, literals: &[(Region, bool)]) -> Region {
        literals.iter().fold(self.make_true(), |acc, &(var, positive)| {
            let lit = if positive { var } else { self.make_not(var) };
            self.make_and(acc, lit)
        })
    }
}

/// [`RegionCreator`] backed by a [`Bdd`].
#[derive(Debug)]
pub struct BddRegionManager {
    bdd: Bdd,
}

impl BddRegionManager {
    pub fn new(cache_bits: usize) -> Self {
        Self {
            bdd: Bdd::new(cache_bits),
        }
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    fn variable_index(&self, variable: Region) -> u32 {
        let v = self.bdd.variable(variable.0);
        assert!(
            v != 0 && variable.0 == self.bdd.mk_var(v),
            "{} is not a region variable",
            variable
        );
        v
    }

    /// Number of models of `region` over the given variables.
    pub fn model_count(&self, region: Region, variables: &[Region]) -> BigUint {
        let vars: Vec<u32> = variables.iter().map(|&v| self.variable_index(v)).collect();
        let support = self.bdd.support(region.0);
        assert!(
            support.iter().all(|v| vars.contains(v)),
            "Region depends on variables outside of the given set"
        );
        // Count over all variables up to the largest one and drop the
        // assignments to the variables that were not asked for.
        let max = vars.iter().copied().max().unwrap_or(0);
        let mut distinct = vars.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let total = self.bdd.sat_count(region.0, max);
        total >> (max as usize - distinct.len())
    }

    pub fn size(&self, region: Region) -> usize {
        self.bdd.size(region.0)
    }
}

impl Default for BddRegionManager {
    fn default() -> Self {
        BddRegionManager::new(16)
    }
}

impl RegionCreator for BddRegionManager {
    fn make_true(&self) -> Region {
        Region(self.bdd.one)
    }

    fn make_false(&self) -> Region {
        Region(self.bdd.zero)
    }

    fn make_and(&self, a: Region, b: Region) -> Region {
        Region(self.bdd.apply_and(a.0, b.0))
    }

    fn make_or(&self, a: Region, b: Region) -> Region {
        Region(self.bdd.apply_or(a.0, b.0))
    }

    fn make_not(&self, a: Region) -> Region {
        Region(self.bdd.apply_not(a.0))
    }

    fn make_exists(&self, region: Region, variable: Region) -> Region {
        let v = self.variable_index(variable);
        trace!("make_exists(region = {}, v = {})", region, v);
        Region(self.bdd.exists(region.0, v))
    }

    fn is_true(&self, region: Region) -> bool {
        self.bdd.is_one(region.0)
    }

    fn is_false(&self, region: Region) -> bool {
        self.bdd.is_zero(region.0)
    }

    fn entails(&self, a: Region, b: Region) -> bool {
        self.bdd.is_implies(a.0, b.0)
    }

    fn new_variable(&self) -> Region {
        let v = self.bdd.new_var();
        Region(self.bdd.mk_var(v))
    }

    fn decompose(&self, region: Region) -> Option<(Region, Region, Region)> {
        if self.bdd.is_terminal(region.0) {
            return None;
        }
        let v = self.bdd.variable(region.0);
        Some((
            Region(self.bdd.mk_var(v)),
            Region(self.bdd.high_node(region.0)),
            Region(self.bdd.low_node(region.0)),
        ))
    }

    fn cubes(&self, region: Region) -> Vec<Vec<(Region, bool)>> {
        self.bdd
            .paths(region.0)
            .map(|path| {
                path.into_iter()
                    .map(|lit| (Region(self.bdd.mk_var(lit.unsigned_abs())), lit > 0))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_constants() {
        let rmgr = BddRegionManager::default();

        assert!(rmgr.is_true(rmgr.make_true()));
        assert!(rmgr.is_false(rmgr.make_false()));
        assert_eq!(rmgr.make_not(rmgr.make_true()), rmgr.make_false());
    }

    #[test]
    fn test_fresh_variables_are_distinct() {
        let rmgr = BddRegionManager::default();

        let a = rmgr.new_variable();
        let b = rmgr.new_variable();
        assert_ne!(a, b);
        assert!(!rmgr.entails(a, b));
        assert!(rmgr.entails(rmgr.make_and(a, b), a));
    }

    #[test]
    fn test_exists() {
        let rmgr = BddRegionManager::default();

        let a = rmgr.new_variable();
        let b = rmgr.new_variable();
        let f = rmgr.make_and(a, rmgr.make_not(b));

        assert_eq!(rmgr.make_exists(f, b), a);
        assert_eq!(rmgr.make_exists(rmgr.make_exists(f, a), b), rmgr.make_true());
    }

    #[test]
    fn test_decompose() {
        let rmgr = BddRegionManager::default();

        let a = rmgr.new_variable();
        let b = rmgr.new_variable();
        let f = rmgr.make_or(a, b);

        let (var, high, low) = rmgr.decompose(f).unwrap();
        assert_eq!(var, a);
        assert_eq!(high, rmgr.make_true());
        assert_eq!(low, b);
        assert_eq!(rmgr.decompose(rmgr.make_false()), None);
    }

    #[test]
    fn test_cubes_cover_region() {
        let rmgr = BddRegionManager::default();

        let a = rmgr.new_variable();
        let b = rmgr.new_variable();
        let f = rmgr.make_or(rmgr.make_and(a, b), rmgr.make_and(rmgr.make_not(a), rmgr.make_not(b)));

        let cubes = rmgr.cubes(f);
        assert_eq!(cubes.len(), 2);
        let rebuilt = cubes
            .iter()
            .fold(rmgr.make_false(), |acc, cube| rmgr.make_or(acc, rmgr.make_cube(cube)));
        assert_eq!(rebuilt, f);
    }

    #[test]
    fn test_model_count() {
        let rmgr = BddRegionManager::default();

        let a = rmgr.new_variable();
        let b = rmgr.new_variable();
        let c = rmgr.new_variable();

        assert_eq!(rmgr.model_count(rmgr.make_or(a, c), &[a, c]), BigUint::from(3u32));
        assert_eq!(rmgr.model_count(rmgr.make_or(a, c), &[a, b, c]), BigUint::from(6u32));
        assert_eq!(rmgr.model_count(rmgr.make_true(), &[]), BigUint::from(1u32));
    }
}
