//! Predicate analysis with adjustable-block encoding.
//!
//! Between two block ends the analysis only collects the path formula; at a
//! block end it computes the predicate abstraction of that formula and starts
//! a new block.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;
use std::str::FromStr;

use log::{debug, trace};

use super::{AbstractionFormula, AbstractionPredicate, PredicateAbstractionManager};
use crate::cfa::{Cfa, CfaEdge, EdgeKind, NodeId};
use crate::cpa::{AbstractDomain, ConfigurableProgramAnalysis, MergeOperator, StopOperator, TransferRelation};
use crate::error::{Error, Result};
use crate::options::{parse_bool, FromProperties};
use crate::path_formula::PathFormula;

/// Predicates tracked everywhere plus predicates tracked at single locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicatePrecision {
    global: BTreeSet<AbstractionPredicate>,
    local: BTreeMap<NodeId, BTreeSet<AbstractionPredicate>>,
}

impl PredicatePrecision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(predicates: impl IntoIterator<Item = AbstractionPredicate>) -> Self {
        Self {
            global: predicates.into_iter().collect(),
            local: BTreeMap::new(),
        }
    }

    pub fn add_global(&mut self, predicate: AbstractionPredicate) {
        self.global.insert(predicate);
    }

    pub fn add_local(&mut self, node: NodeId, predicate: AbstractionPredicate) {
        self.local.entry(node).or_default().insert(predicate);
    }

    /// Predicates to abstract with at `node`, ordered by id.
    pub fn predicates_at(&self, node: NodeId) -> Vec<AbstractionPredicate> {
        let mut predicates = self.global.clone();
        if let Some(local) = self.local.get(&node) {
            predicates.extend(local.iter().cloned());
        }
        predicates.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.local.values().all(|l| l.is_empty())
    }
}

/// Abstract state of the predicate analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateElement {
    /// State right after a block end; `path_formula` is empty.
    Abstraction {
        abstraction: AbstractionFormula,
        path_formula: PathFormula,
    },
    /// State inside a block: the abstraction at the start of the block and
    /// the path formula since then.
    NonAbstraction {
        abstraction: AbstractionFormula,
        path_formula: PathFormula,
    },
    Bottom,
}

impl PredicateElement {
    pub fn abstraction(&self) -> Option<&AbstractionFormula> {
        match self {
            PredicateElement::Abstraction { abstraction, .. }
            | PredicateElement::NonAbstraction { abstraction, .. } => Some(abstraction),
            PredicateElement::Bottom => None,
        }
    }

    pub fn path_formula(&self) -> Option<&PathFormula> {
        match self {
            PredicateElement::Abstraction { path_formula, .. }
            | PredicateElement::NonAbstraction { path_formula, .. } => Some(path_formula),
            PredicateElement::Bottom => None,
        }
    }

    pub fn is_abstraction_element(&self) -> bool {
        matches!(self, PredicateElement::Abstraction { .. })
    }
}

impl Display for PredicateElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PredicateElement::Abstraction { abstraction, .. } => write!(f, "ABS {}", abstraction),
            PredicateElement::NonAbstraction {
                abstraction,
                path_formula,
            } => write!(f, "{} & {}", abstraction, path_formula.formula()),
            PredicateElement::Bottom => write!(f, "⊥"),
        }
    }
}

/// Where blocks end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockOperator {
    /// Single-block encoding.
    EveryEdge,
    LoopHeads,
    /// Loop heads, function entries and returns to a caller.
    #[default]
    FunctionsAndLoops,
}

impl BlockOperator {
    pub fn is_block_end(self, cfa: &Cfa, edge: &CfaEdge) -> bool {
        match self {
            BlockOperator::EveryEdge => true,
            BlockOperator::LoopHeads => cfa.is_loop_head(edge.to),
            BlockOperator::FunctionsAndLoops => {
                cfa.is_loop_head(edge.to)
                    || cfa.is_function_entry(edge.to)
                    || matches!(edge.kind, EdgeKind::FunctionReturn { .. })
            }
        }
    }
}

impl FromStr for BlockOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "everyEdge" => Ok(BlockOperator::EveryEdge),
            "loops" => Ok(BlockOperator::LoopHeads),
            "functionsAndLoops" => Ok(BlockOperator::FunctionsAndLoops),
            _ => Err(Error::InvalidConfiguration {
                key: "cpa.predicate.blk".to_string(),
                reason: format!("unknown block operator `{}`", s),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredicateCpaOptions {
    pub block_operator: BlockOperator,
    /// Check the path formula for satisfiability after every edge inside a
    /// block.
    pub sat_check_every_edge: bool,
}

impl FromProperties for PredicateCpaOptions {
    fn set_property(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "cpa.predicate.blk" => self.block_operator = value.parse()?,
            "cpa.predicate.satCheck" => self.sat_check_every_edge = parse_bool(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug)]
struct PredicateDomain {
    pamgr: Rc<PredicateAbstractionManager>,
}

impl PredicateDomain {
    fn is_top(&self, element: &PredicateElement) -> bool {
        match element {
            PredicateElement::NonAbstraction {
                abstraction,
                path_formula,
            } => {
                abstraction.is_true()
                    && self
                        .pamgr
                        .path_formula_manager()
                        .formula_manager()
                        .is_true(path_formula.formula())
            }
            _ => false,
        }
    }
}

impl AbstractDomain for PredicateDomain {
    type Element = PredicateElement;

    fn bottom(&self) -> PredicateElement {
        PredicateElement::Bottom
    }

    fn top(&self) -> PredicateElement {
        PredicateElement::NonAbstraction {
            abstraction: self.pamgr.make_true_abstraction_formula(None),
            path_formula: self.pamgr.path_formula_manager().make_empty_path_formula(),
        }
    }

    fn is_bottom(&self, element: &PredicateElement) -> bool {
        match element {
            PredicateElement::Bottom => true,
            PredicateElement::Abstraction { abstraction, .. } => abstraction.is_false(),
            PredicateElement::NonAbstraction { .. } => false,
        }
    }

    /// Region entailment for abstraction elements, syntactic equality of
    /// path formulas otherwise; never calls the solver.
    fn le(&self, e1: &PredicateElement, e2: &PredicateElement) -> bool {
        match (e1, e2) {
            (PredicateElement::Bottom, _) => true,
            (_, PredicateElement::Bottom) => false,
            _ if self.is_top(e2) => true,
            (
                PredicateElement::Abstraction { abstraction: a1, .. },
                PredicateElement::Abstraction { abstraction: a2, .. },
            ) => self.pamgr.check_coverage(a1, a2),
            (
                PredicateElement::NonAbstraction {
                    abstraction: a1,
                    path_formula: pf1,
                },
                PredicateElement::NonAbstraction {
                    abstraction: a2,
                    path_formula: pf2,
                },
            ) => a1 == a2 && pf1 == pf2,
            _ => false,
        }
    }

    fn join(&self, e1: &PredicateElement, e2: &PredicateElement) -> PredicateElement {
        if self.le(e1, e2) {
            return e2.clone();
        }
        if self.le(e2, e1) {
            return e1.clone();
        }
        match (e1, e2) {
            (
                PredicateElement::NonAbstraction {
                    abstraction: a1,
                    path_formula: pf1,
                },
                PredicateElement::NonAbstraction {
                    abstraction: a2,
                    path_formula: pf2,
                },
            ) if a1 == a2 => PredicateElement::NonAbstraction {
                abstraction: a2.clone(),
                path_formula: self.pamgr.path_formula_manager().make_or(pf1, pf2),
            },
            _ => self.top(),
        }
    }
}

#[derive(Debug)]
struct PredicateTransferRelation {
    pamgr: Rc<PredicateAbstractionManager>,
    cfa: Rc<Cfa>,
    options: PredicateCpaOptions,
}

impl TransferRelation<PredicateElement, PredicatePrecision> for PredicateTransferRelation {
    fn successors(
        &self,
        element: &PredicateElement,
        precision: &PredicatePrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<PredicateElement>> {
        let (abstraction, path_formula) = match element {
            PredicateElement::Abstraction {
                abstraction,
                path_formula,
            }
            | PredicateElement::NonAbstraction {
                abstraction,
                path_formula,
            } => (abstraction, path_formula),
            PredicateElement::Bottom => return Ok(Vec::new()),
        };

        let pfmgr = self.pamgr.path_formula_manager();
        let path_formula = pfmgr.make_and(path_formula, edge)?;

        if !self.options.block_operator.is_block_end(&self.cfa, edge) {
            if self.options.sat_check_every_edge && self.pamgr.unsat(abstraction, &path_formula)? {
                trace!("Edge {} is infeasible", edge);
                return Ok(Vec::new());
            }
            return Ok(vec![PredicateElement::NonAbstraction {
                abstraction: abstraction.clone(),
                path_formula,
            }]);
        }

        let predicates = precision.predicates_at(edge.to);
        // Without predicates the abstraction is `true`, so feasibility of
        // the block has to be checked separately.
        if predicates.is_empty() && self.pamgr.unsat(abstraction, &path_formula)? {
            trace!("Block ending with {} is infeasible", edge);
            return Ok(Vec::new());
        }

        let new_abstraction = self.pamgr.build_abstraction(abstraction, &path_formula, &predicates)?;
        debug!("Abstraction at {}: {}", edge.to, new_abstraction);
        if new_abstraction.is_false() {
            return Ok(Vec::new());
        }
        Ok(vec![PredicateElement::Abstraction {
            abstraction: new_abstraction,
            path_formula: pfmgr.make_empty_path_formula_from(&path_formula),
        }])
    }
}

#[derive(Debug)]
struct PredicateStopOperator {
    pamgr: Rc<PredicateAbstractionManager>,
}

impl StopOperator<PredicateElement> for PredicateStopOperator {
    fn stop_pair(&self, element: &PredicateElement, reached: &PredicateElement) -> Result<bool> {
        match (element, reached) {
            (PredicateElement::Bottom, _) => Ok(true),
            (
                PredicateElement::Abstraction { abstraction: a1, .. },
                PredicateElement::Abstraction { abstraction: a2, .. },
            ) => Ok(self.pamgr.check_coverage(a1, a2)),
            (
                PredicateElement::NonAbstraction {
                    abstraction: a1,
                    path_formula: pf1,
                },
                PredicateElement::NonAbstraction {
                    abstraction: a2,
                    path_formula: pf2,
                },
            ) => {
                if a1 != a2 {
                    return Ok(false);
                }
                self.pamgr.check_path_formula_coverage(pf1, pf2)
            }
            _ => Ok(false),
        }
    }
}

/// Merges non-abstraction elements of the same block by disjunction of
/// their path formulas.
#[derive(Debug)]
struct PredicateMergeOperator {
    pamgr: Rc<PredicateAbstractionManager>,
}

impl MergeOperator<PredicateElement, PredicatePrecision> for PredicateMergeOperator {
    fn merge(
        &self,
        element: &PredicateElement,
        reached: &PredicateElement,
        _precision: &PredicatePrecision,
    ) -> Result<PredicateElement> {
        match (element, reached) {
            (
                PredicateElement::NonAbstraction {
                    abstraction: a1,
                    path_formula: pf1,
                },
                PredicateElement::NonAbstraction {
                    abstraction: a2,
                    path_formula: pf2,
                },
            ) if a1 == a2 && pf1 != pf2 => {
                trace!("Merging path formulas of block after {}", a2);
                Ok(PredicateElement::NonAbstraction {
                    abstraction: a2.clone(),
                    path_formula: self.pamgr.path_formula_manager().make_or(pf1, pf2),
                })
            }
            _ => Ok(reached.clone()),
        }
    }
}

#[derive(Debug)]
pub struct PredicateCpa {
    pamgr: Rc<PredicateAbstractionManager>,
    domain: PredicateDomain,
    transfer: PredicateTransferRelation,
    merge: PredicateMergeOperator,
    stop: PredicateStopOperator,
    precision: PredicatePrecision,
}

impl PredicateCpa {
    pub fn new(
        pamgr: Rc<PredicateAbstractionManager>,
        cfa: Rc<Cfa>,
        options: PredicateCpaOptions,
        precision: PredicatePrecision,
    ) -> Self {
        Self {
            domain: PredicateDomain { pamgr: pamgr.clone() },
            transfer: PredicateTransferRelation {
                pamgr: pamgr.clone(),
                cfa,
                options,
            },
            merge: PredicateMergeOperator { pamgr: pamgr.clone() },
            stop: PredicateStopOperator { pamgr: pamgr.clone() },
            pamgr,
            precision,
        }
    }

    pub fn abstraction_manager(&self) -> &PredicateAbstractionManager {
        &self.pamgr
    }

    pub fn options(&self) -> &PredicateCpaOptions {
        &self.transfer.options
    }
}

impl ConfigurableProgramAnalysis for PredicateCpa {
    type Element = PredicateElement;
    type Precision = PredicatePrecision;

    fn name(&self) -> &'static str {
        "predicate"
    }

    fn domain(&self) -> &dyn AbstractDomain<Element = PredicateElement> {
        &self.domain
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<PredicateElement, PredicatePrecision> {
        &self.transfer
    }

    fn merge_operator(&self) -> &dyn MergeOperator<PredicateElement, PredicatePrecision> {
        &self.merge
    }

    fn stop_operator(&self) -> &dyn StopOperator<PredicateElement> {
        &self.stop
    }

    fn initial_element(&self, _node: NodeId) -> PredicateElement {
        PredicateElement::Abstraction {
            abstraction: self.pamgr.make_true_abstraction_formula(None),
            path_formula: self.pamgr.path_formula_manager().make_empty_path_formula(),
        }
    }

    fn initial_precision(&self, _node: NodeId) -> PredicatePrecision {
        self.precision.clone()
    }
}
