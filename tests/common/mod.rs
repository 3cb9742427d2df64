#![allow(dead_code)]

use std::rc::Rc;

use cpa_rs::cfa::{CfaEdge, EdgeKind, Expr, NodeId};
use cpa_rs::formula::{FormulaManager, FormulaManagerOptions};
use cpa_rs::path_formula::{PathFormula, PathFormulaManager};
use cpa_rs::predicate::{AbstractionManager, AbstractionOptions, AbstractionPredicate, PredicateAbstractionManager};
use cpa_rs::region::{BddRegionManager, RegionCreator};
use cpa_rs::solver::{Solver, SolverOptions};

/// Everything a predicate abstraction manager needs, shared between
/// managers with different options.
pub struct Context {
    pub fmgr: Rc<FormulaManager>,
    pub amgr: Rc<AbstractionManager>,
    pub pfmgr: Rc<PathFormulaManager>,
    pub solver: Rc<Solver>,
}

impl Context {
    pub fn new() -> Self {
        let fmgr = Rc::new(FormulaManager::new(FormulaManagerOptions::default()));
        let rmgr: Rc<dyn RegionCreator> = Rc::new(BddRegionManager::default());
        Self {
            amgr: Rc::new(AbstractionManager::new(rmgr, fmgr.clone())),
            pfmgr: Rc::new(PathFormulaManager::new(fmgr.clone())),
            solver: Rc::new(Solver::new(fmgr.clone(), SolverOptions::default())),
            fmgr,
        }
    }

    pub fn manager(&self, options: AbstractionOptions) -> Rc<PredicateAbstractionManager> {
        Rc::new(PredicateAbstractionManager::new(
            self.amgr.clone(),
            self.fmgr.clone(),
            self.pfmgr.clone(),
            self.solver.clone(),
            options,
        ))
    }

    pub fn boolean(&self) -> Rc<PredicateAbstractionManager> {
        self.manager(AbstractionOptions::default())
    }

    pub fn cartesian(&self) -> Rc<PredicateAbstractionManager> {
        self.manager(AbstractionOptions {
            cartesian_abstraction: true,
            ..AbstractionOptions::default()
        })
    }

    /// Predicate `name > bound`.
    pub fn greater_than(&self, name: &str, bound: i64) -> AbstractionPredicate {
        let atom = self
            .fmgr
            .make_greater_than(self.fmgr.make_variable(name), self.fmgr.make_number(bound));
        self.amgr.make_predicate(&atom)
    }

    pub fn empty(&self) -> PathFormula {
        self.pfmgr.make_empty_path_formula()
    }

    /// `pf` followed by `lhs = rhs`.
    pub fn assign(&self, pf: &PathFormula, lhs: &str, rhs: Expr) -> PathFormula {
        let edge = CfaEdge::new(
            NodeId(0),
            NodeId(1),
            EdgeKind::Assign {
                lhs: Expr::var(lhs),
                rhs,
            },
        );
        self.pfmgr.make_and(pf, &edge).unwrap()
    }

    pub fn solver_queries(&self) -> usize {
        self.solver.stats().total_queries()
    }
}
