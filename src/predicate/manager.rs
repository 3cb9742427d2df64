use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Display, Formatter};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{AbstractionFormula, AbstractionManager, AbstractionPredicate};
use crate::error::Result;
use crate::formula::{BooleanFormula, FormulaManager};
use crate::options::{parse_bool, parse_number, FromProperties};
use crate::path_formula::{PathFormula, PathFormulaManager};
use crate::region::{Region, RegionCreator};
use crate::solver::{ProverEnvironment, Solver};
use crate::ssa::SsaMap;

#[derive(Debug, Clone)]
pub struct AbstractionOptions {
    /// Use Cartesian instead of Boolean abstraction.
    pub cartesian_abstraction: bool,
    pub use_cache: bool,
    /// Write input and result of slow abstractions to `dump_directory`.
    pub dump_hard_abstractions: bool,
    pub dump_threshold: Duration,
    pub dump_directory: PathBuf,
}

impl Default for AbstractionOptions {
    fn default() -> Self {
        Self {
            cartesian_abstraction: false,
            use_cache: true,
            dump_hard_abstractions: false,
            dump_threshold: Duration::from_secs(10),
            dump_directory: PathBuf::from("output"),
        }
    }
}

impl FromProperties for AbstractionOptions {
    fn set_property(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "cpa.predicate.abstraction.cartesian" => self.cartesian_abstraction = parse_bool(key, value)?,
            "cpa.predicate.abs.useCache" => self.use_cache = parse_bool(key, value)?,
            "cpa.predicate.abstraction.dumpHardQueries" => self.dump_hard_abstractions = parse_bool(key, value)?,
            "cpa.predicate.abstraction.dumpThresholdMillis" => {
                self.dump_threshold = Duration::from_millis(parse_number(key, value)?)
            }
            "output.path" => self.dump_directory = PathBuf::from(value),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Counters and timers of the abstraction computation.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub num_calls_abstraction: usize,
    /// Abstractions answered without the solver (empty precision).
    pub num_symbolic_abstractions: usize,
    /// Boolean abstractions that degenerated into one satisfiability check.
    pub num_sat_check_abstractions: usize,
    pub num_calls_abstraction_cached: usize,
    pub all_sat_count: usize,
    pub max_all_sat_count: usize,
    pub num_path_formula_coverage_checks: usize,
    pub num_equal_path_formulae: usize,
    pub num_syntactic_entailed_path_formulae: usize,
    pub num_semantic_entailed_path_formulae: usize,
    pub abstraction_solve_time: Duration,
    pub abstraction_enum_time: Duration,
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of abstraction computations:   {}", self.num_calls_abstraction)?;
        writeln!(f, "  Trivial (empty precision):          {}", self.num_symbolic_abstractions)?;
        writeln!(f, "  Single satisfiability check:        {}", self.num_sat_check_abstractions)?;
        writeln!(f, "  Answered from cache:                {}", self.num_calls_abstraction_cached)?;
        writeln!(f, "Total models in all-SAT:              {}", self.all_sat_count)?;
        writeln!(f, "Max models in one all-SAT:            {}", self.max_all_sat_count)?;
        writeln!(f, "Path formula coverage checks:         {}", self.num_path_formula_coverage_checks)?;
        writeln!(f, "  Equal path formulas:                {}", self.num_equal_path_formulae)?;
        writeln!(f, "  Syntactically entailed:             {}", self.num_syntactic_entailed_path_formulae)?;
        writeln!(f, "  Semantically entailed:              {}", self.num_semantic_entailed_path_formulae)?;
        writeln!(f, "Time for solving:                     {:?}", self.abstraction_solve_time)?;
        write!(f, "Time for model enumeration:           {:?}", self.abstraction_enum_time)
    }
}

type AbstractionKey = (BooleanFormula, Vec<usize>);

/// Computes, caches and compares predicate abstractions.
pub struct PredicateAbstractionManager {
    amgr: Rc<AbstractionManager>,
    fmgr: Rc<FormulaManager>,
    pfmgr: Rc<PathFormulaManager>,
    solver: Rc<Solver>,
    options: AbstractionOptions,
    stats: RefCell<Stats>,
    abstraction_cache: RefCell<FxHashMap<AbstractionKey, AbstractionFormula>>,
    // Formulas known to be unsatisfiable.
    unsatisfiability_cache: RefCell<FxHashSet<BooleanFormula>>,
    // Truth value of a predicate under a formula: -1 false, 0 unknown, 1 true.
    cartesian_cache: RefCell<FxHashMap<(BooleanFormula, usize), i8>>,
    warned_of_cartesian_abstraction: Cell<bool>,
}

impl Debug for PredicateAbstractionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateAbstractionManager")
            .field("options", &self.options)
            .field("stats", &self.stats.borrow())
            .finish_non_exhaustive()
    }
}

impl PredicateAbstractionManager {
    pub fn new(
        amgr: Rc<AbstractionManager>,
        fmgr: Rc<FormulaManager>,
        pfmgr: Rc<PathFormulaManager>,
        solver: Rc<Solver>,
        options: AbstractionOptions,
    ) -> Self {
        Self {
            amgr,
            fmgr,
            pfmgr,
            solver,
            options,
            stats: RefCell::new(Stats::default()),
            abstraction_cache: RefCell::new(FxHashMap::default()),
            unsatisfiability_cache: RefCell::new(FxHashSet::default()),
            cartesian_cache: RefCell::new(FxHashMap::default()),
            warned_of_cartesian_abstraction: Cell::new(false),
        }
    }

    pub fn abstraction_manager(&self) -> &AbstractionManager {
        &self.amgr
    }

    pub fn path_formula_manager(&self) -> &PathFormulaManager {
        &self.pfmgr
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn options(&self) -> &AbstractionOptions {
        &self.options
    }

    pub fn stats(&self) -> Stats {
        self.stats.borrow().clone()
    }

    fn rmgr(&self) -> &dyn RegionCreator {
        self.amgr.region_creator()
    }

    /// Abstract post: the strongest combination of `predicates` implied by
    /// `abstraction ∧ path_formula`.
    ///
    /// The order of `predicates` is irrelevant, duplicates are ignored.
    pub fn build_abstraction(
        &self,
        abstraction: &AbstractionFormula,
        path_formula: &PathFormula,
        predicates: &[AbstractionPredicate],
    ) -> Result<AbstractionFormula> {
        let call = {
            let mut stats = self.stats.borrow_mut();
            stats.num_calls_abstraction += 1;
            stats.num_calls_abstraction
        };

        if predicates.is_empty() {
            trace!("Abstraction {} with empty precision is true", call);
            self.stats.borrow_mut().num_symbolic_abstractions += 1;
            return Ok(self.make_true_abstraction_formula(Some(path_formula)));
        }

        let mut predicates = predicates.to_vec();
        predicates.sort();
        predicates.dedup();

        debug!("Computing abstraction {} with {} predicates", call, predicates.len());
        trace!("Old abstraction: {}", abstraction);
        trace!("Path formula: {}", path_formula);

        let symbolic = self.build_formula(path_formula.formula());
        let f = self.fmgr.make_and(abstraction.as_instantiated_formula(), &symbolic);

        let key: AbstractionKey = (f.clone(), predicates.iter().map(|p| p.id()).collect());
        if self.options.use_cache {
            let cached = self.abstraction_cache.borrow().get(&key).cloned();
            if let Some(result) = cached {
                // Indices may differ from the cached result's block formula.
                let formula = result.as_formula().clone();
                let instantiated = self.fmgr.instantiate(&formula, path_formula.ssa());
                let result = AbstractionFormula::new(
                    self.rmgr(),
                    result.as_region(),
                    formula,
                    instantiated,
                    path_formula.clone(),
                );
                trace!("Abstraction {} was cached: {}", call, result);
                self.stats.borrow_mut().num_calls_abstraction_cached += 1;
                return Ok(result);
            }

            let unsatisfiable = {
                let cache = self.unsatisfiability_cache.borrow();
                cache.contains(&symbolic) || cache.contains(&f)
            };
            if unsatisfiable {
                trace!("Block of abstraction {} is known to be infeasible", call);
                self.stats.borrow_mut().num_calls_abstraction_cached += 1;
                return Ok(AbstractionFormula::new(
                    self.rmgr(),
                    self.rmgr().make_false(),
                    self.fmgr.make_false(),
                    self.fmgr.make_false(),
                    path_formula.clone(),
                ));
            }
        }

        let start = Instant::now();
        let region = if self.options.cartesian_abstraction {
            self.build_cartesian_abstraction(&f, path_formula.ssa(), &predicates)?
        } else {
            self.build_boolean_abstraction(&f, path_formula.ssa(), &predicates)?
        };
        let result = self.make_abstraction_formula(region, path_formula.ssa(), path_formula.clone());
        let elapsed = start.elapsed();

        if self.options.use_cache {
            self.abstraction_cache.borrow_mut().insert(key, result.clone());
            if result.is_false() {
                self.unsatisfiability_cache.borrow_mut().insert(f.clone());
            }
        }

        debug!("Computing abstraction {} took {:?}", call, elapsed);
        trace!("Abstraction result is {}", result);

        if self.options.dump_hard_abstractions && elapsed > self.options.dump_threshold {
            self.dump_hard_abstraction(call, &f, &predicates, &result);
        }

        Ok(result)
    }

    fn dump_hard_abstraction(
        &self,
        call: usize,
        input: &BooleanFormula,
        predicates: &[AbstractionPredicate],
        result: &AbstractionFormula,
    ) {
        let dir = &self.options.dump_directory;

        let file = self.fmgr.format_output_file(dir, "abstraction", call, "input", 0);
        if let Err(e) = self.fmgr.dump_formula_to_file(input, &file) {
            warn!("Failed to write abstraction input to {}: {}", file.display(), e);
        }

        let file = self.fmgr.format_output_file(dir, "abstraction", call, "predicates", 0);
        let lines: Vec<String> = predicates.iter().map(|p| p.to_string()).collect();
        if let Err(e) = fs::create_dir_all(dir).and_then(|()| fs::write(&file, lines.join("\n"))) {
            warn!("Failed to write predicates to {}: {}", file.display(), e);
        }

        let file = self.fmgr.format_output_file(dir, "abstraction", call, "result", 0);
        if let Err(e) = self.fmgr.dump_formula_to_file(result.as_instantiated_formula(), &file) {
            warn!("Failed to write abstraction result to {}: {}", file.display(), e);
        }
    }

    fn build_formula(&self, f: &BooleanFormula) -> BooleanFormula {
        if self.fmgr.use_bitwise_axioms() {
            let axioms = self.fmgr.bitwise_axioms(f);
            if !self.fmgr.is_true(&axioms) {
                trace!("Added bitwise axioms: {}", axioms);
                return self.fmgr.make_and(f, &axioms);
            }
        }
        f.clone()
    }

    fn build_cartesian_abstraction(
        &self,
        f: &BooleanFormula,
        ssa: &SsaMap,
        predicates: &[AbstractionPredicate],
    ) -> Result<Region> {
        let rmgr = self.rmgr();
        let mut prover = self.solver.new_prover_environment();
        prover.push(f);

        let start = Instant::now();
        let feasible = !prover.is_unsat()?;
        self.stats.borrow_mut().abstraction_solve_time += start.elapsed();

        if !feasible {
            return Ok(rmgr.make_false());
        }

        if !self.warned_of_cartesian_abstraction.get() && !self.fmgr.is_purely_conjunctive(f) {
            warn!(
                "Using cartesian abstraction when formulas contain disjunctions may be imprecise. \
                 This might lead to failing refinements."
            );
            self.warned_of_cartesian_abstraction.set(true);
        }

        let start = Instant::now();
        let mut region = rmgr.make_true();
        for p in predicates {
            let key = (f.clone(), p.id());
            let cached = if self.options.use_cache {
                self.cartesian_cache.borrow().get(&key).copied()
            } else {
                None
            };

            let value = match cached {
                Some(value) => value,
                None => {
                    trace!("Checking value of predicate {}", p.symbolic_atom());
                    let pred_true = self.fmgr.instantiate(p.symbolic_atom(), ssa);
                    let pred_false = self.fmgr.make_not(&pred_true);

                    prover.push(&pred_false);
                    let is_true = prover.is_unsat()?;
                    prover.pop();

                    let value = if is_true {
                        1
                    } else {
                        prover.push(&pred_true);
                        let is_false = prover.is_unsat()?;
                        prover.pop();
                        if is_false {
                            -1
                        } else {
                            0
                        }
                    };

                    if self.options.use_cache {
                        self.cartesian_cache.borrow_mut().insert(key, value);
                    }
                    value
                }
            };

            match value {
                1 => region = rmgr.make_and(region, p.abstract_variable()),
                -1 => region = rmgr.make_and(region, rmgr.make_not(p.abstract_variable())),
                _ => debug_assert_eq!(value, 0, "Predicate value is neither false, true, nor unknown"),
            }
        }
        self.stats.borrow_mut().abstraction_enum_time += start.elapsed();

        Ok(region)
    }

    fn build_boolean_abstraction(
        &self,
        f: &BooleanFormula,
        ssa: &SsaMap,
        predicates: &[AbstractionPredicate],
    ) -> Result<Region> {
        let rmgr = self.rmgr();

        // (var ⟺ atom) for every predicate
        let mut definitions = vec![f.clone()];
        let mut important = Vec::with_capacity(predicates.len());
        for p in predicates {
            if self.fmgr.is_false(p.symbolic_atom()) {
                continue;
            }
            let def = self.fmgr.instantiate(p.symbolic_atom(), ssa);
            definitions.push(self.fmgr.make_equivalence(p.symbolic_variable(), &def));
            important.push((p.symbolic_variable().clone(), p.abstract_variable()));
        }
        let fm = self.fmgr.make_and_all(definitions);

        if important.is_empty() {
            self.stats.borrow_mut().num_sat_check_abstractions += 1;

            let start = Instant::now();
            let sat = !self.solver.is_unsat(&fm)?;
            self.stats.borrow_mut().abstraction_solve_time += start.elapsed();

            return Ok(if sat { rmgr.make_true() } else { rmgr.make_false() });
        }

        trace!("Computing all-SAT on formula {}", fm);
        let start = Instant::now();
        let result = {
            let mut prover = self.solver.new_prover_environment();
            prover.push(&fm);
            prover.all_sat(&important, rmgr)?
        };

        let mut stats = self.stats.borrow_mut();
        stats.abstraction_enum_time += start.elapsed();
        stats.all_sat_count += result.count;
        stats.max_all_sat_count = stats.max_all_sat_count.max(result.count);

        Ok(result.region)
    }

    /// Check whether `a1 → a2` on the level of regions.
    pub fn check_coverage(&self, a1: &AbstractionFormula, a2: &AbstractionFormula) -> bool {
        self.amgr.entails(a1.as_region(), a2.as_region())
    }

    /// Check whether `(a1 ∧ path_formula) → a2`, with `a2` instantiated at the
    /// end of the path.
    pub fn check_coverage_with_path(
        &self,
        a1: &AbstractionFormula,
        path_formula: &PathFormula,
        a2: &AbstractionFormula,
    ) -> Result<bool> {
        let a = self
            .fmgr
            .make_and(a1.as_instantiated_formula(), &self.build_formula(path_formula.formula()));
        let b = self.fmgr.instantiate(a2.as_formula(), path_formula.ssa());
        self.solver.implies(&a, &b)
    }

    /// Check whether `pf1 → pf2` and no variable has a lower index in `pf2`.
    pub fn check_path_formula_coverage(&self, pf1: &PathFormula, pf2: &PathFormula) -> Result<bool> {
        self.stats.borrow_mut().num_path_formula_coverage_checks += 1;

        if pf1 == pf2 {
            self.stats.borrow_mut().num_equal_path_formulae += 1;
            return Ok(true);
        }

        // Indices only grow along a path.
        for var in pf1.ssa().all_variables() {
            match (pf1.ssa().index(var), pf2.ssa().index(var)) {
                (Some(i1), Some(i2)) if i2 >= i1 => {}
                _ => return Ok(false),
            }
        }

        let merged = self.pfmgr.merge(pf1, pf2);
        if self.fmgr.check_syntactic_entails(&merged.left, pf2.formula()) {
            self.stats.borrow_mut().num_syntactic_entailed_path_formulae += 1;
            return Ok(true);
        }

        let disjunction = self.fmgr.make_or(&merged.left, &merged.right);
        if !self.solver.implies(&disjunction, pf2.formula())? {
            return Ok(false);
        }
        self.stats.borrow_mut().num_semantic_entailed_path_formulae += 1;
        Ok(true)
    }

    /// Check whether `abstraction ∧ path_formula` is unsatisfiable.
    pub fn unsat(&self, abstraction: &AbstractionFormula, path_formula: &PathFormula) -> Result<bool> {
        let f = self.fmgr.make_and(
            abstraction.as_instantiated_formula(),
            &self.build_formula(path_formula.formula()),
        );
        trace!("Checking satisfiability of formula {}", f);
        self.solver.is_unsat(&f)
    }

    pub fn make_true_abstraction_formula(&self, previous_block_formula: Option<&PathFormula>) -> AbstractionFormula {
        let block_formula = match previous_block_formula {
            Some(pf) => pf.clone(),
            None => self.pfmgr.make_empty_path_formula(),
        };
        AbstractionFormula::new(
            self.rmgr(),
            self.rmgr().make_true(),
            self.fmgr.make_true(),
            self.fmgr.make_true(),
            block_formula,
        )
    }

    /// Conjunction of two abstractions of the same block formula.
    pub fn make_and(&self, a1: &AbstractionFormula, a2: &AbstractionFormula) -> AbstractionFormula {
        assert!(
            a1.block_formula() == a2.block_formula(),
            "Cannot conjoin abstractions of different blocks: {} and {}",
            a1.block_formula(),
            a2.block_formula()
        );

        let region = self.rmgr().make_and(a1.as_region(), a2.as_region());
        let formula = self.fmgr.make_and(a1.as_formula(), a2.as_formula());
        let instantiated = self
            .fmgr
            .make_and(a1.as_instantiated_formula(), a2.as_instantiated_formula());
        AbstractionFormula::new(self.rmgr(), region, formula, instantiated, a1.block_formula().clone())
    }

    fn make_abstraction_formula(&self, region: Region, ssa: &SsaMap, block_formula: PathFormula) -> AbstractionFormula {
        let symbolic = self.amgr.to_concrete(region);
        let instantiated = self.fmgr.instantiate(&symbolic, ssa);
        AbstractionFormula::new(self.rmgr(), region, symbolic, instantiated, block_formula)
    }

    /// Quantify `remove` out of `abstraction`.
    pub fn reduce(
        &self,
        abstraction: &AbstractionFormula,
        remove: &[AbstractionPredicate],
        ssa: &SsaMap,
    ) -> AbstractionFormula {
        let rmgr = self.rmgr();
        let region = remove.iter().fold(abstraction.as_region(), |r, p| {
            rmgr.make_exists(r, p.abstract_variable())
        });
        self.make_abstraction_formula(region, ssa, abstraction.block_formula().clone())
    }

    /// Restore what `reduce` removed: `reduced ∧ ∃relevant. source`.
    pub fn expand(
        &self,
        reduced: &AbstractionFormula,
        source: &AbstractionFormula,
        relevant: &[AbstractionPredicate],
        ssa: &SsaMap,
    ) -> AbstractionFormula {
        self.expand_region(
            reduced.as_region(),
            source.as_region(),
            relevant,
            ssa,
            reduced.block_formula(),
        )
    }

    pub fn expand_region(
        &self,
        reduced: Region,
        source: Region,
        relevant: &[AbstractionPredicate],
        ssa: &SsaMap,
        block_formula: &PathFormula,
    ) -> AbstractionFormula {
        let rmgr = self.rmgr();
        let source = relevant
            .iter()
            .fold(source, |r, p| rmgr.make_exists(r, p.abstract_variable()));
        let region = rmgr.make_and(reduced, source);
        self.make_abstraction_formula(region, ssa, block_formula.clone())
    }

    /// Predicates for all atoms of `f`.
    pub fn extract_predicates(&self, f: &BooleanFormula) -> Vec<AbstractionPredicate> {
        self.fmgr
            .extract_atoms(f, true)
            .iter()
            .map(|atom| self.amgr.make_predicate(atom))
            .collect()
    }

    pub fn extract_predicates_from_region(&self, region: Region) -> Vec<AbstractionPredicate> {
        self.amgr.extract_predicates(region)
    }

    pub fn build_region_from_formula(&self, f: &BooleanFormula) -> Region {
        self.amgr.build_region_from_formula(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::{CfaEdge, EdgeKind, Expr, NodeId};
    use crate::formula::FormulaManagerOptions;
    use crate::region::BddRegionManager;
    use crate::solver::SolverOptions;
    use test_log::test;

    fn setup(options: AbstractionOptions) -> PredicateAbstractionManager {
        let fmgr = Rc::new(FormulaManager::new(FormulaManagerOptions::default()));
        let rmgr: Rc<dyn RegionCreator> = Rc::new(BddRegionManager::default());
        let amgr = Rc::new(AbstractionManager::new(rmgr, fmgr.clone()));
        let pfmgr = Rc::new(PathFormulaManager::new(fmgr.clone()));
        let solver = Rc::new(Solver::new(fmgr.clone(), SolverOptions::default()));
        PredicateAbstractionManager::new(amgr, fmgr, pfmgr, solver, options)
    }

    fn assign(pamgr: &PredicateAbstractionManager, pf: &PathFormula, name: &str, value: i64) -> PathFormula {
        let edge = CfaEdge::new(
            NodeId(0),
            NodeId(1),
            EdgeKind::Assign {
                lhs: Expr::var(name),
                rhs: Expr::constant(value),
            },
        );
        pamgr.path_formula_manager().make_and(pf, &edge).unwrap()
    }

    fn predicate(pamgr: &PredicateAbstractionManager, name: &str, bound: i64) -> AbstractionPredicate {
        let fmgr = pamgr.abstraction_manager().formula_manager();
        let atom = fmgr.make_greater_than(fmgr.make_variable(name), fmgr.make_number(bound));
        pamgr.abstraction_manager().make_predicate(&atom)
    }

    #[test]
    fn test_reinstantiation_of_cached_result() {
        let pamgr = setup(AbstractionOptions::default());
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "y", 0);

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "y", 1);
        let first = pamgr.build_abstraction(&top, &pf, &[p.clone()]).unwrap();

        // Same formula, but a later SSA index for `y`.
        let ssa = pf.ssa().builder().set("y", 7).build();
        let shifted = PathFormula::new(pf.formula().clone(), ssa, pf.length());
        let second = pamgr.build_abstraction(&top, &shifted, &[p]).unwrap();

        assert_eq!(pamgr.stats().num_calls_abstraction_cached, 1);
        assert_eq!(first.as_region(), second.as_region());
        assert_eq!(second.block_formula(), &shifted);
        assert_eq!(second.as_instantiated_formula().to_string(), "(< 0 y@7)");
    }

    #[test]
    fn test_predicate_order_does_not_matter() {
        let pamgr = setup(AbstractionOptions::default());
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);
        let q = predicate(&pamgr, "x", 10);

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let a = pamgr.build_abstraction(&top, &pf, &[p.clone(), q.clone()]).unwrap();
        let b = pamgr.build_abstraction(&top, &pf, &[q, p.clone(), p]).unwrap();

        assert_eq!(a, b);
        assert_eq!(pamgr.stats().num_calls_abstraction_cached, 1);
    }

    #[test]
    fn test_unsatisfiability_cache() {
        let pamgr = setup(AbstractionOptions::default());
        let fmgr = pamgr.abstraction_manager().formula_manager();
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);
        let q = predicate(&pamgr, "x", 10);

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let contradiction = fmgr.make_less_than(fmgr.make_variable("x"), fmgr.make_number(0));
        let pf = pamgr.path_formula_manager().make_and_formula(&pf, &contradiction);

        let a = pamgr.build_abstraction(&top, &pf, &[p]).unwrap();
        assert!(a.is_false());

        // A different precision misses the abstraction cache but hits the
        // unsatisfiability cache.
        let queries = pamgr.solver().stats().total_queries();
        let b = pamgr.build_abstraction(&top, &pf, &[q]).unwrap();
        assert!(b.is_false());
        assert_eq!(pamgr.solver().stats().total_queries(), queries);
    }

    #[test]
    fn test_false_predicate_degenerates_to_sat_check() {
        let pamgr = setup(AbstractionOptions::default());
        let top = pamgr.make_true_abstraction_formula(None);
        let p = pamgr.abstraction_manager().make_false_predicate();

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let a = pamgr.build_abstraction(&top, &pf, &[p]).unwrap();

        assert!(a.is_true());
        assert_eq!(pamgr.stats().num_sat_check_abstractions, 1);
    }

    #[test]
    fn test_cartesian_cache() {
        let pamgr = setup(AbstractionOptions {
            cartesian_abstraction: true,
            ..AbstractionOptions::default()
        });
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);
        let q = predicate(&pamgr, "x", 10);

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let a = pamgr.build_abstraction(&top, &pf, &[p.clone()]).unwrap();
        let rmgr = pamgr.abstraction_manager().region_creator();
        assert_eq!(a.as_region(), p.abstract_variable());

        // Only the new predicate needs solver queries.
        let before = pamgr.solver().stats().prover_unsat_queries;
        let b = pamgr.build_abstraction(&top, &pf, &[p.clone(), q.clone()]).unwrap();
        let after = pamgr.solver().stats().prover_unsat_queries;
        assert_eq!(after - before, 1 + 2);
        assert_eq!(
            b.as_region(),
            rmgr.make_and(p.abstract_variable(), rmgr.make_not(q.abstract_variable()))
        );
    }

    #[test]
    fn test_reduce_and_expand() {
        let pamgr = setup(AbstractionOptions::default());
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);
        let q = predicate(&pamgr, "y", 0);
        let rmgr = pamgr.abstraction_manager().region_creator();

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let pf = assign(&pamgr, &pf, "y", -5);
        let a = pamgr.build_abstraction(&top, &pf, &[p.clone(), q.clone()]).unwrap();

        let reduced = pamgr.reduce(&a, &[q.clone()], pf.ssa());
        assert_eq!(reduced.as_region(), p.abstract_variable());
        assert_eq!(pamgr.extract_predicates_from_region(reduced.as_region()), vec![p.clone()]);

        let expanded = pamgr.expand(&reduced, &a, &[p.clone()], pf.ssa());
        assert_eq!(expanded.as_region(), a.as_region());
        assert_eq!(
            expanded.as_region(),
            rmgr.make_and(p.abstract_variable(), rmgr.make_not(q.abstract_variable()))
        );
    }

    #[test]
    fn test_check_coverage_with_path() {
        let pamgr = setup(AbstractionOptions::default());
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let positive = pamgr.build_abstraction(&top, &pf, &[p]).unwrap();

        assert!(pamgr.check_coverage_with_path(&top, &pf, &positive).unwrap());
        let pf = assign(&pamgr, &empty, "x", -5);
        assert!(!pamgr.check_coverage_with_path(&top, &pf, &positive).unwrap());
    }

    #[test]
    fn test_extract_predicates() {
        let pamgr = setup(AbstractionOptions::default());
        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        let pf = assign(&pamgr, &pf, "x", 6);

        // `x@2 = 5` and `x@3 = 6` collapse to one symbolic atom each.
        let predicates = pamgr.extract_predicates(pf.formula());
        assert_eq!(predicates.len(), 2);
        assert_eq!(pamgr.extract_predicates(pf.formula()), predicates);
    }

    #[test]
    fn test_unsat() {
        let pamgr = setup(AbstractionOptions::default());
        let fmgr = pamgr.abstraction_manager().formula_manager();
        let top = pamgr.make_true_abstraction_formula(None);

        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 5);
        assert!(!pamgr.unsat(&top, &pf).unwrap());

        let negative = fmgr.make_less_than(fmgr.make_variable("x"), fmgr.make_number(0));
        let pf = pamgr.path_formula_manager().make_and_formula(&pf, &negative);
        assert!(pamgr.unsat(&top, &pf).unwrap());
    }

    #[test]
    fn test_cartesian_warns_once_on_disjunctions() {
        let pamgr = setup(AbstractionOptions {
            cartesian_abstraction: true,
            ..AbstractionOptions::default()
        });
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);
        let empty = pamgr.path_formula_manager().make_empty_path_formula();

        let conjunctive = assign(&pamgr, &empty, "x", 1);
        pamgr.build_abstraction(&top, &conjunctive, &[p.clone()]).unwrap();
        assert!(!pamgr.warned_of_cartesian_abstraction.get());

        let pfmgr = pamgr.path_formula_manager();
        let either = pfmgr.make_or(&conjunctive, &assign(&pamgr, &empty, "x", 2));
        let a = pamgr.build_abstraction(&top, &either, &[p.clone()]).unwrap();
        assert!(pamgr.warned_of_cartesian_abstraction.get());
        assert_eq!(a.as_region(), p.abstract_variable());

        // Later disjunctions keep the flag and do not change the result.
        let other = pfmgr.make_or(&either, &assign(&pamgr, &empty, "x", 3));
        let b = pamgr.build_abstraction(&top, &other, &[p.clone()]).unwrap();
        assert!(pamgr.warned_of_cartesian_abstraction.get());
        assert_eq!(b.as_region(), p.abstract_variable());
    }

    #[test]
    fn test_dump_hard_abstractions() {
        let dir = std::env::temp_dir().join(format!("cpa-rs-dump-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let pamgr = setup(AbstractionOptions {
            dump_hard_abstractions: true,
            dump_threshold: Duration::ZERO,
            dump_directory: dir.clone(),
            ..AbstractionOptions::default()
        });
        let top = pamgr.make_true_abstraction_formula(None);
        let p = predicate(&pamgr, "x", 0);
        let empty = pamgr.path_formula_manager().make_empty_path_formula();
        let pf = assign(&pamgr, &empty, "x", 4);
        pamgr.build_abstraction(&top, &pf, &[p.clone()]).unwrap();

        let fmgr = pamgr.abstraction_manager().formula_manager();
        for part in ["input", "predicates", "result"] {
            let file = fmgr.format_output_file(&dir, "abstraction", 1, part, 0);
            assert!(file.exists(), "{} was not written", file.display());
        }
        let predicates = fs::read_to_string(fmgr.format_output_file(&dir, "abstraction", 1, "predicates", 0)).unwrap();
        assert_eq!(predicates, p.to_string());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_debug_shows_options() {
        let pamgr = setup(AbstractionOptions::default());
        let s = format!("{:?}", pamgr);
        assert!(s.starts_with("PredicateAbstractionManager"));
        assert!(s.contains("cartesian_abstraction: false"));
        assert!(s.ends_with(".. }"));
    }

    #[test]
    fn test_options_from_properties() {
        let options = AbstractionOptions::from_properties([
            ("cpa.predicate.abstraction.cartesian", "true"),
            ("cpa.predicate.abs.useCache", "false"),
            ("cpa.predicate.abstraction.dumpHardQueries", "true"),
        ])
        .unwrap();
        assert!(options.cartesian_abstraction);
        assert!(!options.use_cache);
        assert!(options.dump_hard_abstractions);
        assert_eq!(options.dump_threshold, Duration::from_secs(10));
    }
}
