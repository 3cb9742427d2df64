//! Predicate abstraction.
//!
//! An [`AbstractionPredicate`] ties a symbolic atom (e.g. `x > 0`) to a
//! propositional variable for the solver and to a variable of the region
//! algebra. The [`AbstractionManager`] creates predicates canonically and
//! translates between regions and formulas; the
//! [`PredicateAbstractionManager`] computes abstractions of path formulas.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::formula::{BooleanFormula, FormulaKind, FormulaManager};
use crate::region::{Region, RegionCreator};

pub mod abstraction;
pub mod cpa;
pub mod manager;

pub use abstraction::AbstractionFormula;
pub use cpa::{BlockOperator, PredicateCpa, PredicateCpaOptions, PredicateElement, PredicatePrecision};
pub use manager::{AbstractionOptions, PredicateAbstractionManager, Stats};

struct PredicateData {
    id: usize,
    abstract_variable: Region,
    symbolic_variable: BooleanFormula,
    symbolic_atom: BooleanFormula,
}

/// Canonical predicate handle.
///
/// Predicates are compared, hashed and ordered by their creation id, which
/// is unique per [`AbstractionManager`].
#[derive(Clone)]
pub struct AbstractionPredicate(Rc<PredicateData>);

impl AbstractionPredicate {
    pub fn id(&self) -> usize {
        self.0.id
    }

    /// Region variable of this predicate.
    pub fn abstract_variable(&self) -> Region {
        self.0.abstract_variable
    }

    /// Propositional variable naming this predicate in solver queries.
    pub fn symbolic_variable(&self) -> &BooleanFormula {
        &self.0.symbolic_variable
    }

    /// Definition of the predicate over symbolic program variables.
    pub fn symbolic_atom(&self) -> &BooleanFormula {
        &self.0.symbolic_atom
    }
}

impl PartialEq for AbstractionPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AbstractionPredicate {}

impl Hash for AbstractionPredicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl PartialOrd for AbstractionPredicate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbstractionPredicate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl Display for AbstractionPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.0.symbolic_variable, self.0.symbolic_atom)
    }
}

impl Debug for AbstractionPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AbstractionPredicate({})", self)
    }
}

/// Owner of all predicates of an analysis run.
pub struct AbstractionManager {
    rmgr: Rc<dyn RegionCreator>,
    fmgr: Rc<FormulaManager>,
    by_atom: RefCell<FxHashMap<BooleanFormula, AbstractionPredicate>>,
    by_variable: RefCell<FxHashMap<BooleanFormula, AbstractionPredicate>>,
    by_region: RefCell<FxHashMap<Region, AbstractionPredicate>>,
    to_concrete_cache: RefCell<FxHashMap<Region, BooleanFormula>>,
    next_id: Cell<usize>,
}

impl AbstractionManager {
    pub fn new(rmgr: Rc<dyn RegionCreator>, fmgr: Rc<FormulaManager>) -> Self {
        Self {
            rmgr,
            fmgr,
            by_atom: RefCell::new(FxHashMap::default()),
            by_variable: RefCell::new(FxHashMap::default()),
            by_region: RefCell::new(FxHashMap::default()),
            to_concrete_cache: RefCell::new(FxHashMap::default()),
            next_id: Cell::new(0),
        }
    }

    pub fn region_creator(&self) -> &dyn RegionCreator {
        self.rmgr.as_ref()
    }

    pub fn formula_manager(&self) -> &FormulaManager {
        &self.fmgr
    }

    pub fn num_predicates(&self) -> usize {
        self.next_id.get()
    }

    /// The predicate for a symbolic `atom`, created on first use.
    pub fn make_predicate(&self, atom: &BooleanFormula) -> AbstractionPredicate {
        if let Some(p) = self.by_atom.borrow().get(atom) {
            return p.clone();
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let predicate = AbstractionPredicate(Rc::new(PredicateData {
            id,
            abstract_variable: self.rmgr.new_variable(),
            symbolic_variable: self.fmgr.make_prop(format!("PRED{}", id)),
            symbolic_atom: atom.clone(),
        }));
        debug!("Created predicate {}", predicate);

        self.by_atom.borrow_mut().insert(atom.clone(), predicate.clone());
        self.by_variable
            .borrow_mut()
            .insert(predicate.symbolic_variable().clone(), predicate.clone());
        self.by_region
            .borrow_mut()
            .insert(predicate.abstract_variable(), predicate.clone());
        predicate
    }

    /// Predicate whose atom is `false`.
    pub fn make_false_predicate(&self) -> AbstractionPredicate {
        self.make_predicate(&self.fmgr.make_false())
    }

    pub fn predicate_for_region_variable(&self, variable: Region) -> Option<AbstractionPredicate> {
        self.by_region.borrow().get(&variable).cloned()
    }

    /// All predicates whose variables occur in `region`, ordered by id.
    pub fn extract_predicates(&self, region: Region) -> Vec<AbstractionPredicate> {
        let mut found = BTreeMap::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![region];
        while let Some(r) = stack.pop() {
            if !visited.insert(r) {
                continue;
            }
            if let Some((var, high, low)) = self.rmgr.decompose(r) {
                let p = self.predicate_for_variable(var);
                found.insert(p.id(), p);
                stack.push(high);
                stack.push(low);
            }
        }
        found.into_values().collect()
    }

    fn predicate_for_variable(&self, variable: Region) -> AbstractionPredicate {
        match self.predicate_for_region_variable(variable) {
            Some(p) => p,
            None => panic!("{} is not the variable of any predicate", variable),
        }
    }

    /// Formula over symbolic atoms equivalent to `region`.
    pub fn to_concrete(&self, region: Region) -> BooleanFormula {
        if self.rmgr.is_true(region) {
            return self.fmgr.make_true();
        }
        if self.rmgr.is_false(region) {
            return self.fmgr.make_false();
        }
        if let Some(f) = self.to_concrete_cache.borrow().get(&region) {
            return f.clone();
        }

        let f = match self.rmgr.decompose(region) {
            Some((var, high, low)) => {
                let atom = self.predicate_for_variable(var).symbolic_atom().clone();
                let high = self.fmgr.make_and(&atom, &self.to_concrete(high));
                let low = self.fmgr.make_and(&self.fmgr.make_not(&atom), &self.to_concrete(low));
                self.fmgr.make_or(&high, &low)
            }
            None => unreachable!("Non-constant region {} has no top variable", region),
        };

        self.to_concrete_cache.borrow_mut().insert(region, f.clone());
        f
    }

    /// Region equivalent to `f`.
    ///
    /// Arithmetic atoms become (possibly new) predicates; propositional
    /// variables must be predicate variables.
    pub fn build_region_from_formula(&self, f: &BooleanFormula) -> Region {
        let rmgr = self.region_creator();
        match f.kind() {
            FormulaKind::True => rmgr.make_true(),
            FormulaKind::False => rmgr.make_false(),
            FormulaKind::Eq(..) | FormulaKind::Le(..) | FormulaKind::Lt(..) => {
                self.make_predicate(f).abstract_variable()
            }
            FormulaKind::Prop(_) => match self.by_variable.borrow().get(f) {
                Some(p) => p.abstract_variable(),
                None => panic!("{} is not the variable of any predicate", f),
            },
            FormulaKind::Not(g) => rmgr.make_not(self.build_region_from_formula(g)),
            FormulaKind::And(args) => args.iter().fold(rmgr.make_true(), |acc, g| {
                rmgr.make_and(acc, self.build_region_from_formula(g))
            }),
            FormulaKind::Or(args) => args.iter().fold(rmgr.make_false(), |acc, g| {
                rmgr.make_or(acc, self.build_region_from_formula(g))
            }),
            FormulaKind::Iff(a, b) => {
                let a = self.build_region_from_formula(a);
                let b = self.build_region_from_formula(b);
                rmgr.make_or(rmgr.make_and(a, b), rmgr.make_and(rmgr.make_not(a), rmgr.make_not(b)))
            }
        }
    }

    /// Check whether `r1 → r2`.
    pub fn entails(&self, r1: Region, r2: Region) -> bool {
        self.rmgr.entails(r1, r2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::BddRegionManager;
    use test_log::test;

    fn setup() -> (Rc<FormulaManager>, AbstractionManager) {
        let fmgr = Rc::new(FormulaManager::default());
        let rmgr: Rc<dyn RegionCreator> = Rc::new(BddRegionManager::default());
        let amgr = AbstractionManager::new(rmgr, fmgr.clone());
        (fmgr, amgr)
    }

    #[test]
    fn test_canonical_creation() {
        let (fmgr, amgr) = setup();
        let atom = fmgr.make_greater_than(fmgr.make_variable("x"), fmgr.make_number(0));

        let p1 = amgr.make_predicate(&atom);
        let p2 = amgr.make_predicate(&atom);
        assert_eq!(p1, p2);
        assert_eq!(p1.abstract_variable(), p2.abstract_variable());
        assert_eq!(amgr.num_predicates(), 1);

        let q = amgr.make_predicate(&fmgr.make_less_than(fmgr.make_variable("x"), fmgr.make_number(10)));
        assert_ne!(p1, q);
        assert!(p1 < q);
        assert_eq!(amgr.predicate_for_region_variable(q.abstract_variable()), Some(q));
    }

    #[test]
    fn test_to_concrete_roundtrip() {
        let (fmgr, amgr) = setup();
        let a = fmgr.make_greater_than(fmgr.make_variable("x"), fmgr.make_number(0));
        let b = fmgr.make_equal(fmgr.make_variable("y"), fmgr.make_number(1));
        let f = fmgr.make_or(&a, &fmgr.make_not(&b));

        let region = amgr.build_region_from_formula(&f);
        let concrete = amgr.to_concrete(region);
        assert_eq!(amgr.build_region_from_formula(&concrete), region);
        assert_eq!(amgr.extract_predicates(region).len(), 2);
    }

    #[test]
    fn test_extract_predicates_with_sharing() {
        let (fmgr, amgr) = setup();
        let rmgr = amgr.region_creator();
        let predicates: Vec<_> = (0..6)
            .map(|i| amgr.make_predicate(&fmgr.make_greater_than(fmgr.make_variable("x"), fmgr.make_number(i))))
            .collect();

        // Parity of all predicates: every level shares both children.
        let mut parity = rmgr.make_false();
        for p in &predicates {
            let v = p.abstract_variable();
            parity = rmgr.make_or(
                rmgr.make_and(parity, rmgr.make_not(v)),
                rmgr.make_and(rmgr.make_not(parity), v),
            );
        }

        let extracted = amgr.extract_predicates(parity);
        assert_eq!(extracted, predicates);
    }

    #[test]
    fn test_constants() {
        let (fmgr, amgr) = setup();
        let rmgr = amgr.region_creator();

        assert!(fmgr.is_true(&amgr.to_concrete(rmgr.make_true())));
        assert!(fmgr.is_false(&amgr.to_concrete(rmgr.make_false())));
        assert!(amgr.extract_predicates(rmgr.make_true()).is_empty());

        let p = amgr.make_false_predicate();
        assert!(fmgr.is_false(p.symbolic_atom()));
    }
}
