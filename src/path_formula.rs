//! Symbolic summaries of program paths.

use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use log::trace;

use crate::cfa::{return_variable, BinaryOp, CfaEdge, EdgeKind, Expr, UnaryOp};
use crate::error::{Error, Result};
use crate::formula::{BooleanFormula, FormulaManager, Term, TermOp};
use crate::ssa::{SsaMap, SsaMapBuilder};

/// Instantiated formula of a path together with the SSA map valid at its end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathFormula {
    formula: BooleanFormula,
    ssa: SsaMap,
    length: usize,
}

impl PathFormula {
    pub fn new(formula: BooleanFormula, ssa: SsaMap, length: usize) -> Self {
        Self { formula, ssa, length }
    }

    pub fn formula(&self) -> &BooleanFormula {
        &self.formula
    }

    pub fn ssa(&self) -> &SsaMap {
        &self.ssa
    }

    /// Number of edges summarized by this formula.
    pub fn length(&self) -> usize {
        self.length
    }
}

impl Display for PathFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} edges)", self.formula, self.ssa, self.length)
    }
}

/// Both disjuncts of a path-formula disjunction over a common SSA map.
#[derive(Debug, Clone)]
pub struct MergedPathFormulas {
    /// First formula, with equalities lifting its indices to the merged map.
    pub left: BooleanFormula,
    /// Second formula, likewise.
    pub right: BooleanFormula,
    pub ssa: SsaMap,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct PathFormulaManager {
    fmgr: Rc<FormulaManager>,
}

impl PathFormulaManager {
    pub fn new(fmgr: Rc<FormulaManager>) -> Self {
        Self { fmgr }
    }

    pub fn formula_manager(&self) -> &FormulaManager {
        &self.fmgr
    }

    pub fn make_empty_path_formula(&self) -> PathFormula {
        PathFormula::new(self.fmgr.make_true(), SsaMap::empty(), 0)
    }

    /// Empty path formula that continues with the SSA indices of `pf`.
    pub fn make_empty_path_formula_from(&self, pf: &PathFormula) -> PathFormula {
        PathFormula::new(self.fmgr.make_true(), pf.ssa.clone(), 0)
    }

    /// Conjoin the symbolic formula `f`, instantiated at the end of `pf`.
    pub fn make_and_formula(&self, pf: &PathFormula, f: &BooleanFormula) -> PathFormula {
        let f = self.fmgr.instantiate(f, &pf.ssa);
        PathFormula::new(self.fmgr.make_and(&pf.formula, &f), pf.ssa.clone(), pf.length)
    }

    /// Extend `pf` by one edge.
    pub fn make_and(&self, pf: &PathFormula, edge: &CfaEdge) -> Result<PathFormula> {
        let mut encoder = EdgeEncoder {
            fmgr: &self.fmgr,
            edge,
            ssa: pf.ssa.builder(),
            constraints: Vec::new(),
        };
        encoder.encode()?;

        let constraints = encoder.constraints;
        trace!("Edge {} adds {} constraints", edge, constraints.len());
        let formula = self
            .fmgr
            .make_and_all(std::iter::once(pf.formula.clone()).chain(constraints));
        Ok(PathFormula::new(formula, encoder.ssa.build(), pf.length + 1))
    }

    /// Bring `pf1` and `pf2` to a common SSA map.
    ///
    /// Whenever a variable has a lower index on one side, that side gets the
    /// equality `x@max = x@low`.
    pub fn merge(&self, pf1: &PathFormula, pf2: &PathFormula) -> MergedPathFormulas {
        let (ssa, differences) = SsaMap::merge(&pf1.ssa, &pf2.ssa);

        let mut left = vec![pf1.formula.clone()];
        let mut right = vec![pf2.formula.clone()];
        for (name, i1, i2) in differences {
            let i1 = i1.unwrap_or(crate::ssa::DEFAULT_INDEX);
            let i2 = i2.unwrap_or(crate::ssa::DEFAULT_INDEX);
            let max = i1.max(i2);
            let target = self.fmgr.make_indexed_variable(name.clone(), max);
            if i1 < max {
                left.push(
                    self.fmgr
                        .make_equal(target.clone(), self.fmgr.make_indexed_variable(name.clone(), i1)),
                );
            }
            if i2 < max {
                right.push(self.fmgr.make_equal(target, self.fmgr.make_indexed_variable(name, i2)));
            }
        }

        MergedPathFormulas {
            left: self.fmgr.make_and_all(left),
            right: self.fmgr.make_and_all(right),
            ssa,
            length: pf1.length.max(pf2.length),
        }
    }

    /// Disjunction `pf1 ∨ pf2` over the merged SSA map.
    pub fn make_or(&self, pf1: &PathFormula, pf2: &PathFormula) -> PathFormula {
        let merged = self.merge(pf1, pf2);
        PathFormula::new(
            self.fmgr.make_or(&merged.left, &merged.right),
            merged.ssa,
            merged.length,
        )
    }
}

/// Value of a right-hand side.
enum Value {
    Term(Term),
    Condition(BooleanFormula),
}

struct EdgeEncoder<'a> {
    fmgr: &'a FormulaManager,
    edge: &'a CfaEdge,
    ssa: SsaMapBuilder,
    constraints: Vec<BooleanFormula>,
}

impl EdgeEncoder<'_> {
    fn encode(&mut self) -> Result<()> {
        match &self.edge.kind {
            EdgeKind::Blank => {}
            EdgeKind::Declaration { variable, initializer } => {
                let value = initializer.as_ref().and_then(|e| self.value(e));
                self.assign_variable(variable, value);
            }
            EdgeKind::Assign { lhs, rhs } => {
                let value = self.value(rhs);
                self.assign(lhs, value)?;
            }
            EdgeKind::Assume { condition, truth } => {
                if let Some(c) = self.condition(condition) {
                    let c = if *truth { c } else { self.fmgr.make_not(&c) };
                    self.constraints.push(c);
                }
            }
            EdgeKind::FunctionCall {
                function,
                arguments,
                parameters,
                ..
            } => {
                if arguments.len() != parameters.len() {
                    return Err(Error::unrecognized(
                        self.edge,
                        format!(
                            "call to `{}` with {} arguments, expected {}",
                            function,
                            arguments.len(),
                            parameters.len()
                        ),
                    ));
                }
                // Arguments are evaluated before any parameter is bound.
                let values: Vec<_> = arguments.iter().map(|a| self.value(a)).collect();
                for (parameter, value) in parameters.iter().zip(values) {
                    self.assign_variable(parameter, value);
                }
            }
            EdgeKind::FunctionReturn {
                function, assigned, ..
            } => {
                if let Some(lhs) = assigned {
                    let retval = return_variable(function);
                    let term = self
                        .fmgr
                        .make_indexed_variable(retval.clone(), self.ssa.index_or_default(&retval));
                    self.assign(lhs, Some(Value::Term(term)))?;
                }
            }
            EdgeKind::Return { function, value } => {
                if let Some(e) = value {
                    let value = self.value(e);
                    self.assign_variable(&return_variable(function), value);
                }
            }
        }
        Ok(())
    }

    fn assign(&mut self, lhs: &Expr, value: Option<Value>) -> Result<()> {
        match lhs {
            Expr::Var(name) => {
                self.assign_variable(name, value);
                Ok(())
            }
            _ => Err(Error::unrecognized(
                self.edge,
                format!("assignment to `{}` is not supported", lhs),
            )),
        }
    }

    fn assign_variable(&mut self, name: &str, value: Option<Value>) {
        let index = self.ssa.index_or_default(name) + 1;
        self.ssa.set(name, index);
        let target = self.fmgr.make_indexed_variable(name, index);

        match value {
            Some(Value::Term(t)) => self.constraints.push(self.fmgr.make_equal(target, t)),
            Some(Value::Condition(c)) => {
                // x = c ? 1 : 0
                let one = self
                    .fmgr
                    .make_and(&c, &self.fmgr.make_equal(target.clone(), self.fmgr.make_number(1)));
                let zero = self.fmgr.make_and(
                    &self.fmgr.make_not(&c),
                    &self.fmgr.make_equal(target, self.fmgr.make_number(0)),
                );
                self.constraints.push(self.fmgr.make_or(&one, &zero));
            }
            // Unknown values leave the fresh incarnation unconstrained.
            None => {}
        }
    }

    fn value(&self, e: &Expr) -> Option<Value> {
        match e {
            Expr::Binary(op, ..) if op.is_comparison() || op.is_logical() => {
                self.condition(e).map(Value::Condition)
            }
            Expr::Unary(UnaryOp::Not, _) => self.condition(e).map(Value::Condition),
            _ => self.term(e).map(Value::Term),
        }
    }

    fn term(&self, e: &Expr) -> Option<Term> {
        match e {
            Expr::Var(name) => Some(
                self.fmgr
                    .make_indexed_variable(name.as_str(), self.ssa.index_or_default(name)),
            ),
            Expr::Const(c) => Some(self.fmgr.make_number(*c)),
            Expr::Nondet | Expr::Deref(_) => None,
            Expr::Unary(UnaryOp::Neg, a) => Some(self.fmgr.make_negate(self.term(a)?)),
            Expr::Unary(UnaryOp::BitNot, a) => Some(self.fmgr.make_bit_not(self.term(a)?)),
            Expr::Unary(UnaryOp::Not, _) => None,
            Expr::Binary(op, a, b) => {
                let op = match op {
                    BinaryOp::Add => TermOp::Add,
                    BinaryOp::Sub => TermOp::Sub,
                    BinaryOp::Mul => TermOp::Mul,
                    BinaryOp::Div => TermOp::Div,
                    BinaryOp::Rem => TermOp::Rem,
                    BinaryOp::BitAnd => TermOp::BitAnd,
                    BinaryOp::BitOr => TermOp::BitOr,
                    BinaryOp::BitXor => TermOp::BitXor,
                    BinaryOp::Shl => TermOp::Shl,
                    BinaryOp::Shr => TermOp::Shr,
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge
                    | BinaryOp::And
                    | BinaryOp::Or => return None,
                };
                Some(self.fmgr.make_binary(op, self.term(a)?, self.term(b)?))
            }
        }
    }

    fn condition(&self, e: &Expr) -> Option<BooleanFormula> {
        match e {
            Expr::Binary(op, a, b) if op.is_comparison() => {
                let (a, b) = (self.term(a)?, self.term(b)?);
                Some(match op {
                    BinaryOp::Eq => self.fmgr.make_equal(a, b),
                    BinaryOp::Ne => self.fmgr.make_not(&self.fmgr.make_equal(a, b)),
                    BinaryOp::Lt => self.fmgr.make_less_than(a, b),
                    BinaryOp::Le => self.fmgr.make_less_or_equal(a, b),
                    BinaryOp::Gt => self.fmgr.make_greater_than(a, b),
                    _ => self.fmgr.make_greater_or_equal(a, b),
                })
            }
            Expr::Binary(BinaryOp::And, a, b) => {
                Some(self.fmgr.make_and(&self.condition(a)?, &self.condition(b)?))
            }
            Expr::Binary(BinaryOp::Or, a, b) => {
                Some(self.fmgr.make_or(&self.condition(a)?, &self.condition(b)?))
            }
            Expr::Unary(UnaryOp::Not, a) => Some(self.fmgr.make_not(&self.condition(a)?)),
            // Any other value is true iff it is non-zero.
            _ => {
                let t = self.term(e)?;
                Some(self.fmgr.make_not(&self.fmgr.make_equal(t, self.fmgr.make_number(0))))
            }
        }
    }
}
