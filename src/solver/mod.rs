//! Decision procedure for quantifier-free linear integer arithmetic.
//!
//! The boolean structure of a query is compiled into a BDD whose variables
//! are the atoms of the formula. Every path to TRUE is a conjunction of
//! literals, which is checked for theory consistency by [`linear`]. This is a
//! reference backend: it is exact on the boolean level and sound (never
//! reports a satisfiable query as unsatisfiable) on the arithmetic level.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::bdd::Bdd;
use crate::error::Result;
use crate::formula::{BooleanFormula, FormulaKind, FormulaManager};
use crate::options::{parse_number, FromProperties};
use crate::reference::Ref;
use crate::region::{Region, RegionCreator};

mod linear;

use linear::{Limits, Linearizer};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
    #[error("integer overflow in arithmetic reasoning")]
    Overflow,
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Maximal number of inequalities kept during variable elimination.
    pub max_constraints: usize,
    /// Maximal number of disequality case splits per consistency check.
    pub max_case_splits: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_constraints: 10_000,
            max_case_splits: 4096,
        }
    }
}

impl FromProperties for SolverOptions {
    fn set_property(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "solver.maxConstraints" => self.max_constraints = parse_number(key, value)?,
            "solver.maxCaseSplits" => self.max_case_splits = parse_number(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Query counters.
#[derive(Debug, Clone, Default)]
pub struct SolverStats {
    pub unsat_queries: usize,
    pub implication_queries: usize,
    pub all_sat_queries: usize,
    pub prover_unsat_queries: usize,
    pub prover_environments: usize,
    pub theory_checks: usize,
    pub solving_time: Duration,
}

impl SolverStats {
    /// Number of queries of any kind.
    pub fn total_queries(&self) -> usize {
        self.unsat_queries + self.implication_queries + self.all_sat_queries + self.prover_unsat_queries
    }
}

/// Result of an all-SAT query: the disjunction of all models projected onto
/// the important variables, and the number of models enumerated.
#[derive(Debug, Clone, Copy)]
pub struct AllSatResult {
    pub region: Region,
    pub count: usize,
}

/// Incremental solver session with an assertion stack.
///
/// Dropping the environment discards its stack.
pub trait ProverEnvironment {
    fn push(&mut self, f: &BooleanFormula);
    fn pop(&mut self);
    fn is_unsat(&mut self) -> Result<bool>;

    /// Enumerate all models of the asserted formulas over `important`
    /// propositional variables, each paired with its region variable.
    fn all_sat(&mut self, important: &[(BooleanFormula, Region)], rmgr: &dyn RegionCreator) -> Result<AllSatResult>;
}

pub struct Solver {
    fmgr: Rc<FormulaManager>,
    options: SolverOptions,
    stats: RefCell<SolverStats>,
}

impl Solver {
    pub fn new(fmgr: Rc<FormulaManager>, options: SolverOptions) -> Self {
        Self {
            fmgr,
            options,
            stats: RefCell::new(SolverStats::default()),
        }
    }

    pub fn formula_manager(&self) -> &FormulaManager {
        &self.fmgr
    }

    pub fn stats(&self) -> SolverStats {
        self.stats.borrow().clone()
    }

    pub fn is_unsat(&self, f: &BooleanFormula) -> Result<bool> {
        self.stats.borrow_mut().unsat_queries += 1;
        trace!("is_unsat({})", f);
        self.timed(|| Query::new(self, f).is_unsat())
    }

    /// Check whether `a → b` is valid.
    pub fn implies(&self, a: &BooleanFormula, b: &BooleanFormula) -> Result<bool> {
        self.stats.borrow_mut().implication_queries += 1;
        let f = self.fmgr.make_and(a, &self.fmgr.make_not(b));
        trace!("implies: is_unsat({})", f);
        self.timed(|| Query::new(self, &f).is_unsat())
    }

    pub fn new_prover_environment(&self) -> BddProverEnvironment<'_> {
        self.stats.borrow_mut().prover_environments += 1;
        BddProverEnvironment {
            solver: self,
            stack: Vec::new(),
        }
    }

    fn timed<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let res = f();
        self.stats.borrow_mut().solving_time += start.elapsed();
        res
    }

    fn limits(&self) -> Limits {
        Limits {
            max_constraints: self.options.max_constraints,
            max_case_splits: self.options.max_case_splits,
        }
    }
}

/// [`ProverEnvironment`] of the reference [`Solver`].
pub struct BddProverEnvironment<'a> {
    solver: &'a Solver,
    stack: Vec<BooleanFormula>,
}

impl BddProverEnvironment<'_> {
    fn conjunction(&self) -> BooleanFormula {
        self.solver.fmgr.make_and_all(self.stack.iter().cloned())
    }
}

impl ProverEnvironment for BddProverEnvironment<'_> {
    fn push(&mut self, f: &BooleanFormula) {
        self.stack.push(f.clone());
    }

    fn pop(&mut self) {
        assert!(self.stack.pop().is_some(), "pop() on an empty prover stack");
    }

    fn is_unsat(&mut self) -> Result<bool> {
        self.solver.stats.borrow_mut().prover_unsat_queries += 1;
        let f = self.conjunction();
        self.solver.timed(|| Query::new(self.solver, &f).is_unsat())
    }

    fn all_sat(&mut self, important: &[(BooleanFormula, Region)], rmgr: &dyn RegionCreator) -> Result<AllSatResult> {
        self.solver.stats.borrow_mut().all_sat_queries += 1;
        let f = self.conjunction();
        self.solver.timed(|| Query::new(self.solver, &f).all_sat(important, rmgr))
    }
}

impl Drop for BddProverEnvironment<'_> {
    fn drop(&mut self) {
        trace!("Closing prover environment with {} assertions", self.stack.len());
    }
}

/// Boolean skeleton of one formula.
struct Query<'a> {
    solver: &'a Solver,
    bdd: Bdd,
    atoms: FxHashMap<BooleanFormula, u32>,
    definitions: Vec<BooleanFormula>,
    root: Ref,
}

impl<'a> Query<'a> {
    fn new(solver: &'a Solver, f: &BooleanFormula) -> Self {
        let mut query = Self {
            solver,
            bdd: Bdd::new(12),
            atoms: FxHashMap::default(),
            definitions: Vec::new(),
            root: Ref::positive(1),
        };
        query.root = query.skeleton(f);
        query
    }

    fn atom(&mut self, atom: &BooleanFormula) -> Ref {
        let v = match self.atoms.get(atom) {
            Some(&v) => v,
            None => {
                let v = self.bdd.new_var();
                self.atoms.insert(atom.clone(), v);
                self.definitions.push(atom.clone());
                v
            }
        };
        self.bdd.mk_var(v)
    }

    fn skeleton(&mut self, f: &BooleanFormula) -> Ref {
        match f.kind() {
            FormulaKind::True => self.bdd.one,
            FormulaKind::False => self.bdd.zero,
            FormulaKind::Prop(_) | FormulaKind::Eq(..) | FormulaKind::Le(..) | FormulaKind::Lt(..) => self.atom(f),
            FormulaKind::Not(g) => -self.skeleton(g),
            FormulaKind::And(args) => {
                let mut res = self.bdd.one;
                for g in args {
                    let r = self.skeleton(g);
                    res = self.bdd.apply_and(res, r);
                }
                res
            }
            FormulaKind::Or(args) => {
                let mut res = self.bdd.zero;
                for g in args {
                    let r = self.skeleton(g);
                    res = self.bdd.apply_or(res, r);
                }
                res
            }
            FormulaKind::Iff(a, b) => {
                let (a, b) = (self.skeleton(a), self.skeleton(b));
                self.bdd.apply_eq(a, b)
            }
        }
    }

    /// Check the arithmetic literals of one boolean path.
    fn is_consistent(&self, path: &[i32]) -> Result<bool> {
        self.solver.stats.borrow_mut().theory_checks += 1;
        let mut linearizer = Linearizer::default();
        let mut constraints = Vec::new();
        for &lit in path {
            let atom = &self.definitions[lit.unsigned_abs() as usize - 1];
            if atom.is_atom() {
                constraints.push(linearizer.literal(atom, lit > 0)?);
            }
        }
        Ok(linear::is_consistent(&constraints, self.solver.limits())?)
    }

    fn is_unsat(&self) -> Result<bool> {
        for path in self.bdd.paths(self.root) {
            if self.is_consistent(&path)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn all_sat(&self, important: &[(BooleanFormula, Region)], rmgr: &dyn RegionCreator) -> Result<AllSatResult> {
        let projection: FxHashMap<u32, Region> = important
            .iter()
            .filter_map(|(var, region)| self.atoms.get(var).map(|&v| (v, *region)))
            .collect();

        let mut region = rmgr.make_false();
        let mut count = 0;
        for path in self.bdd.paths(self.root) {
            if !self.is_consistent(&path)? {
                continue;
            }
            let cube: Vec<(Region, bool)> = path
                .iter()
                .filter_map(|&lit| projection.get(&lit.unsigned_abs()).map(|&r| (r, lit > 0)))
                .collect();
            region = rmgr.make_or(region, rmgr.make_cube(&cube));
            count += 1;
        }
        debug!("All-SAT enumerated {} models", count);
        Ok(AllSatResult { region, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Term, TermOp};
    use crate::region::BddRegionManager;
    use test_log::test;

    fn setup() -> (Rc<FormulaManager>, Solver) {
        let fmgr = Rc::new(FormulaManager::default());
        let solver = Solver::new(fmgr.clone(), SolverOptions::default());
        (fmgr, solver)
    }

    fn x(fmgr: &FormulaManager, i: u32) -> Term {
        fmgr.make_indexed_variable("x", i)
    }

    #[test]
    fn test_boolean_reasoning() {
        let (fmgr, solver) = setup();
        let p = fmgr.make_prop("p");
        let q = fmgr.make_prop("q");

        assert!(!solver.is_unsat(&fmgr.make_or(&p, &q)).unwrap());
        assert!(solver.is_unsat(&fmgr.make_and(&p, &fmgr.make_not(&p))).unwrap());
        assert!(solver.implies(&fmgr.make_and(&p, &q), &p).unwrap());
        assert!(!solver.implies(&p, &q).unwrap());
    }

    #[test]
    fn test_arithmetic_reasoning() {
        let (fmgr, solver) = setup();
        let x2 = x(&fmgr, 2);

        let eq5 = fmgr.make_equal(x2.clone(), fmgr.make_number(5));
        let pos = fmgr.make_greater_than(x2.clone(), fmgr.make_number(0));
        assert!(solver.implies(&eq5, &pos).unwrap());

        let eq_neg5 = fmgr.make_equal(x2.clone(), fmgr.make_number(-5));
        assert!(solver.is_unsat(&fmgr.make_and(&eq_neg5, &pos)).unwrap());

        // x != 0 ∧ 0 <= x <= 0
        let ne = fmgr.make_not(&fmgr.make_equal(x2.clone(), fmgr.make_number(0)));
        let ge = fmgr.make_greater_or_equal(x2.clone(), fmgr.make_number(0));
        let le = fmgr.make_less_or_equal(x2, fmgr.make_number(0));
        assert!(solver.is_unsat(&fmgr.make_and_all([ne, ge, le])).unwrap());
    }

    #[test]
    fn test_nonlinear_terms_are_opaque() {
        let (fmgr, solver) = setup();
        let x2 = x(&fmgr, 2);
        let y = fmgr.make_indexed_variable("y", 1);

        // x*y = 3 ∧ x*y = 4 is unsat even without knowing multiplication.
        let xy = fmgr.make_binary(TermOp::Mul, x2, y);
        let f = fmgr.make_and(
            &fmgr.make_equal(xy.clone(), fmgr.make_number(3)),
            &fmgr.make_equal(xy, fmgr.make_number(4)),
        );
        assert!(solver.is_unsat(&f).unwrap());
    }

    #[test]
    fn test_prover_environment() {
        let (fmgr, solver) = setup();
        let x2 = x(&fmgr, 2);
        let pos = fmgr.make_greater_than(x2.clone(), fmgr.make_number(0));

        let mut prover = solver.new_prover_environment();
        prover.push(&fmgr.make_equal(x2, fmgr.make_number(5)));
        assert!(!prover.is_unsat().unwrap());
        prover.push(&fmgr.make_not(&pos));
        assert!(prover.is_unsat().unwrap());
        prover.pop();
        assert!(!prover.is_unsat().unwrap());
        drop(prover);

        let stats = solver.stats();
        assert_eq!(stats.prover_environments, 1);
        assert_eq!(stats.prover_unsat_queries, 3);
        assert_eq!(stats.total_queries(), 3);
    }

    #[test]
    fn test_all_sat() {
        let (fmgr, solver) = setup();
        let rmgr = BddRegionManager::default();
        let x2 = x(&fmgr, 2);

        let p = fmgr.make_prop("p");
        let q = fmgr.make_prop("q");
        let rp = rmgr.new_variable();
        let rq = rmgr.new_variable();

        // (p ⟺ x > 0) ∧ (q ⟺ x > 10) ∧ x = 5
        let f = fmgr.make_and_all([
            fmgr.make_equivalence(&p, &fmgr.make_greater_than(x2.clone(), fmgr.make_number(0))),
            fmgr.make_equivalence(&q, &fmgr.make_greater_than(x2.clone(), fmgr.make_number(10))),
            fmgr.make_equal(x2, fmgr.make_number(5)),
        ]);

        let mut prover = solver.new_prover_environment();
        prover.push(&f);
        let result = prover.all_sat(&[(p, rp), (q, rq)], &rmgr).unwrap();
        assert_eq!(result.region, rmgr.make_and(rp, rmgr.make_not(rq)));
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_resource_limit() {
        let fmgr = Rc::new(FormulaManager::default());
        let solver = Solver::new(
            fmgr.clone(),
            SolverOptions {
                max_constraints: 10_000,
                max_case_splits: 0,
            },
        );
        let ne = fmgr.make_not(&fmgr.make_equal(x(&fmgr, 2), fmgr.make_number(0)));
        assert!(matches!(
            solver.is_unsat(&ne),
            Err(crate::error::Error::Solver(SolverError::ResourceLimit(_)))
        ));
    }

    #[test]
    fn test_options_from_properties() {
        let options = SolverOptions::from_properties([("solver.maxCaseSplits", "7")]).unwrap();
        assert_eq!(options.max_case_splits, 7);
        assert!(SolverOptions::from_properties([("solver.maxConstraints", "many")]).is_err());
    }
}
