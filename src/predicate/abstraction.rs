use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::formula::BooleanFormula;
use crate::path_formula::PathFormula;
use crate::region::{Region, RegionCreator};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

struct Inner {
    id: usize,
    region: Region,
    formula: BooleanFormula,
    instantiated: BooleanFormula,
    block_formula: PathFormula,
    is_true: bool,
    is_false: bool,
}

/// Result of predicate abstraction.
///
/// Holds the abstraction as a region, as a formula over symbolic atoms, and
/// as that formula instantiated with the SSA map of the block formula it was
/// computed from. Values are immutable and cheap to clone.
///
/// Two abstractions are equal if they have the same region and block
/// formula; the id only distinguishes individual results in logs.
#[derive(Clone)]
pub struct AbstractionFormula(Rc<Inner>);

impl AbstractionFormula {
    pub fn new(
        rmgr: &dyn RegionCreator,
        region: Region,
        formula: BooleanFormula,
        instantiated: BooleanFormula,
        block_formula: PathFormula,
    ) -> Self {
        AbstractionFormula(Rc::new(Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            region,
            formula,
            instantiated,
            block_formula,
            is_true: rmgr.is_true(region),
            is_false: rmgr.is_false(region),
        }))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn as_region(&self) -> Region {
        self.0.region
    }

    /// Formula over symbolic (un-indexed) atoms.
    pub fn as_formula(&self) -> &BooleanFormula {
        &self.0.formula
    }

    pub fn as_instantiated_formula(&self) -> &BooleanFormula {
        &self.0.instantiated
    }

    /// Path formula this abstraction was computed from.
    pub fn block_formula(&self) -> &PathFormula {
        &self.0.block_formula
    }

    pub fn is_true(&self) -> bool {
        self.0.is_true
    }

    pub fn is_false(&self) -> bool {
        self.0.is_false
    }
}

impl PartialEq for AbstractionFormula {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
            || (self.0.region == other.0.region && self.0.block_formula == other.0.block_formula)
    }
}

impl Eq for AbstractionFormula {}

impl Hash for AbstractionFormula {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.region.hash(state);
        self.0.block_formula.hash(state);
    }
}

impl Display for AbstractionFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ABS{}: {}", self.0.id, self.0.formula)
    }
}

impl fmt::Debug for AbstractionFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractionFormula")
            .field("id", &self.0.id)
            .field("region", &self.0.region)
            .field("formula", &self.0.formula)
            .field("instantiated", &self.0.instantiated)
            .finish()
    }
}
