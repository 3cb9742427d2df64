//! Explicit-value analysis: tracks variables whose value is a known constant.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use log::trace;

use super::{
    AbstractDomain, ConfigurableProgramAnalysis, MergeOperator, MergeSep, SingletonPrecision, StopOperator, StopSep,
    TransferRelation,
};
use crate::cfa::{return_variable, BinaryOp, CfaEdge, EdgeKind, Expr, NodeId, UnaryOp};
use crate::error::{Error, Result};

/// Known values of variables; unmapped variables are unknown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplicitElement {
    values: BTreeMap<String, i64>,
    is_bottom: bool,
}

impl ExplicitElement {
    pub fn top() -> Self {
        Self::default()
    }

    pub fn bottom() -> Self {
        Self {
            values: BTreeMap::new(),
            is_bottom: true,
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.is_bottom
    }

    pub fn value(&self, var: &str) -> Option<i64> {
        self.values.get(var).copied()
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.values.iter().map(|(var, &value)| (var.as_str(), value))
    }

    pub fn with(mut self, var: impl Into<String>, value: i64) -> Self {
        self.values.insert(var.into(), value);
        self
    }

    fn assign(&mut self, var: &str, value: Option<i64>) {
        match value {
            Some(value) => {
                self.values.insert(var.to_string(), value);
            }
            None => {
                self.values.remove(var);
            }
        }
    }

    /// Value of `e`, if it is determined by the known values.
    pub fn eval(&self, e: &Expr) -> Option<i64> {
        match e {
            Expr::Var(v) => self.value(v),
            Expr::Const(c) => Some(*c),
            Expr::Nondet | Expr::Deref(_) => None,
            Expr::Unary(op, a) => {
                let a = self.eval(a)?;
                match op {
                    UnaryOp::Neg => a.checked_neg(),
                    UnaryOp::Not => Some((a == 0) as i64),
                    UnaryOp::BitNot => Some(!a),
                }
            }
            Expr::Binary(BinaryOp::And, a, b) => match self.eval(a) {
                Some(0) => Some(0),
                Some(_) => self.eval(b).map(|b| (b != 0) as i64),
                None => match self.eval(b) {
                    Some(0) => Some(0),
                    _ => None,
                },
            },
            Expr::Binary(BinaryOp::Or, a, b) => match self.eval(a) {
                Some(0) => self.eval(b).map(|b| (b != 0) as i64),
                Some(_) => Some(1),
                None => match self.eval(b) {
                    Some(b) if b != 0 => Some(1),
                    _ => None,
                },
            },
            Expr::Binary(op, a, b) => {
                let (a, b) = (self.eval(a)?, self.eval(b)?);
                match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Rem => a.checked_rem(b),
                    BinaryOp::BitAnd => Some(a & b),
                    BinaryOp::BitOr => Some(a | b),
                    BinaryOp::BitXor => Some(a ^ b),
                    BinaryOp::Shl => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)),
                    BinaryOp::Shr => u32::try_from(b).ok().and_then(|b| a.checked_shr(b)),
                    BinaryOp::Eq => Some((a == b) as i64),
                    BinaryOp::Ne => Some((a != b) as i64),
                    BinaryOp::Lt => Some((a < b) as i64),
                    BinaryOp::Le => Some((a <= b) as i64),
                    BinaryOp::Gt => Some((a > b) as i64),
                    BinaryOp::Ge => Some((a >= b) as i64),
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                }
            }
        }
    }
}

impl Display for ExplicitElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_bottom {
            return write!(f, "⊥");
        }
        write!(f, "[")?;
        for (i, (var, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", var, value)?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitDomain;

impl AbstractDomain for ExplicitDomain {
    type Element = ExplicitElement;

    fn bottom(&self) -> Self::Element {
        ExplicitElement::bottom()
    }

    fn top(&self) -> Self::Element {
        ExplicitElement::top()
    }

    fn is_bottom(&self, element: &Self::Element) -> bool {
        element.is_bottom
    }

    fn le(&self, e1: &Self::Element, e2: &Self::Element) -> bool {
        if e1.is_bottom {
            return true;
        }
        if e2.is_bottom {
            return false;
        }
        e2.values.iter().all(|(var, &v)| e1.value(var) == Some(v))
    }

    fn join(&self, e1: &Self::Element, e2: &Self::Element) -> Self::Element {
        if e1.is_bottom {
            return e2.clone();
        }
        if e2.is_bottom {
            return e1.clone();
        }
        let values = e1
            .values
            .iter()
            .filter(|(var, &v)| e2.value(var) == Some(v))
            .map(|(var, &v)| (var.clone(), v))
            .collect();
        ExplicitElement {
            values,
            is_bottom: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExplicitTransferRelation;

impl ExplicitTransferRelation {
    fn assign(
        &self,
        element: &ExplicitElement,
        lhs: &Expr,
        value: Option<i64>,
        edge: &CfaEdge,
    ) -> Result<ExplicitElement> {
        match lhs {
            Expr::Var(var) => {
                let mut result = element.clone();
                result.assign(var, value);
                Ok(result)
            }
            // Unknown target: nothing stays known.
            Expr::Deref(_) => Ok(ExplicitElement::top()),
            _ => Err(Error::unrecognized(edge, format!("left-hand side {} is not assignable", lhs))),
        }
    }

    /// Learn values from `condition == truth` where the condition is
    /// undetermined.
    fn refine(&self, element: &mut ExplicitElement, condition: &Expr, truth: bool) {
        match condition {
            Expr::Unary(UnaryOp::Not, c) => self.refine(element, c, !truth),
            Expr::Binary(BinaryOp::And, a, b) if truth => {
                self.refine(element, a, true);
                self.refine(element, b, true);
            }
            Expr::Binary(BinaryOp::Or, a, b) if !truth => {
                self.refine(element, a, false);
                self.refine(element, b, false);
            }
            Expr::Binary(op @ (BinaryOp::Eq | BinaryOp::Ne), a, b) if (*op == BinaryOp::Eq) == truth => {
                match (a.as_ref(), element.eval(a), b.as_ref(), element.eval(b)) {
                    (Expr::Var(x), None, _, Some(v)) | (_, Some(v), Expr::Var(x), None) => {
                        element.assign(x, Some(v));
                    }
                    _ => {}
                }
            }
            Expr::Var(x) if !truth => element.assign(x, Some(0)),
            _ => {}
        }
    }
}

impl TransferRelation<ExplicitElement, SingletonPrecision> for ExplicitTransferRelation {
    fn successors(
        &self,
        element: &ExplicitElement,
        _precision: &SingletonPrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<ExplicitElement>> {
        if element.is_bottom {
            return Ok(Vec::new());
        }

        let successor = match &edge.kind {
            EdgeKind::Blank => element.clone(),
            EdgeKind::Declaration { variable, initializer } => {
                let mut result = element.clone();
                result.assign(variable, initializer.as_ref().and_then(|init| element.eval(init)));
                result
            }
            EdgeKind::Assign { lhs, rhs } => self.assign(element, lhs, element.eval(rhs), edge)?,
            EdgeKind::Assume { condition, truth } => match element.eval(condition) {
                Some(value) if (value != 0) != *truth => {
                    trace!("explicit: {} is infeasible from {}", edge, element);
                    return Ok(Vec::new());
                }
                Some(_) => element.clone(),
                None => {
                    let mut result = element.clone();
                    self.refine(&mut result, condition, *truth);
                    result
                }
            },
            EdgeKind::FunctionCall {
                arguments, parameters, ..
            } => {
                if arguments.len() != parameters.len() {
                    return Err(Error::unrecognized(edge, "argument count does not match parameter count"));
                }
                let mut result = element.clone();
                for (param, arg) in parameters.iter().zip(arguments) {
                    result.assign(param, element.eval(arg));
                }
                result
            }
            EdgeKind::FunctionReturn { function, assigned, .. } => {
                let retval = return_variable(function);
                let mut result = match assigned {
                    Some(lhs) => self.assign(element, lhs, element.value(&retval), edge)?,
                    None => element.clone(),
                };
                result.assign(&retval, None);
                result
            }
            EdgeKind::Return { function, value } => {
                let mut result = element.clone();
                let value = value.as_ref().map_or(Some(0), |v| element.eval(v));
                result.assign(&return_variable(function), value);
                result
            }
        };

        trace!("explicit: {} --[{}]--> {}", element, edge, successor);
        Ok(vec![successor])
    }
}

#[derive(Debug, Default)]
pub struct ExplicitCpa {
    transfer: ExplicitTransferRelation,
    stop: StopSep<ExplicitDomain>,
}

impl ExplicitCpa {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigurableProgramAnalysis for ExplicitCpa {
    type Element = ExplicitElement;
    type Precision = SingletonPrecision;

    fn name(&self) -> &'static str {
        "explicit"
    }

    fn domain(&self) -> &dyn AbstractDomain<Element = ExplicitElement> {
        &ExplicitDomain
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<ExplicitElement, SingletonPrecision> {
        &self.transfer
    }

    fn merge_operator(&self) -> &dyn MergeOperator<ExplicitElement, SingletonPrecision> {
        &MergeSep
    }

    fn stop_operator(&self) -> &dyn StopOperator<ExplicitElement> {
        &self.stop
    }

    fn initial_element(&self, _node: NodeId) -> ExplicitElement {
        ExplicitElement::top()
    }

    fn initial_precision(&self, _node: NodeId) -> SingletonPrecision {
        SingletonPrecision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn edge(kind: EdgeKind) -> CfaEdge {
        CfaEdge::new(NodeId(0), NodeId(1), kind)
    }

    fn post(element: &ExplicitElement, edge: &CfaEdge) -> Vec<ExplicitElement> {
        ExplicitTransferRelation
            .successors(element, &SingletonPrecision, edge)
            .unwrap()
    }

    #[test]
    fn test_eval() {
        let e = ExplicitElement::top().with("x", 3);
        let sum = Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::constant(4));
        assert_eq!(e.eval(&sum), Some(7));
        assert_eq!(e.eval(&Expr::var("y")), None);
        assert_eq!(e.eval(&Expr::binary(BinaryOp::Div, Expr::var("x"), Expr::constant(0))), None);
        assert_eq!(e.eval(&Expr::binary(BinaryOp::Mul, Expr::constant(i64::MAX), Expr::constant(2))), None);

        // Short-circuit on a known operand.
        let and = Expr::binary(BinaryOp::And, Expr::var("y"), Expr::constant(0));
        assert_eq!(e.eval(&and), Some(0));
    }

    #[test]
    fn test_assume_decides_branches() {
        let e = ExplicitElement::top().with("x", 5);
        let cond = Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::constant(0));

        let taken = edge(EdgeKind::Assume {
            condition: cond.clone(),
            truth: true,
        });
        assert_eq!(post(&e, &taken), vec![e.clone()]);

        let not_taken = edge(EdgeKind::Assume { condition: cond, truth: false });
        assert!(post(&e, &not_taken).is_empty());
    }

    #[test]
    fn test_assume_learns_equalities() {
        let e = ExplicitElement::top();
        let cond = Expr::binary(BinaryOp::Eq, Expr::constant(7), Expr::var("x"));
        let succ = post(&e, &edge(EdgeKind::Assume { condition: cond, truth: true }));
        assert_eq!(succ, vec![ExplicitElement::top().with("x", 7)]);

        let cond = Expr::binary(BinaryOp::Ne, Expr::var("y"), Expr::constant(2));
        let succ = post(&e, &edge(EdgeKind::Assume { condition: cond, truth: false }));
        assert_eq!(succ, vec![ExplicitElement::top().with("y", 2)]);

        let succ = post(&e, &edge(EdgeKind::Assume {
            condition: Expr::var("z"),
            truth: false,
        }));
        assert_eq!(succ, vec![ExplicitElement::top().with("z", 0)]);
    }

    #[test]
    fn test_pointer_write_forgets_everything() {
        let e = ExplicitElement::top().with("x", 1);
        let write = edge(EdgeKind::Assign {
            lhs: Expr::deref(Expr::var("p")),
            rhs: Expr::constant(2),
        });
        assert_eq!(post(&e, &write), vec![ExplicitElement::top()]);
    }

    #[test]
    fn test_return_value() {
        let e = ExplicitElement::top();
        let ret = edge(EdgeKind::Return {
            function: "f".to_string(),
            value: None,
        });
        let e = post(&e, &ret).remove(0);
        assert_eq!(e.value(&return_variable("f")), Some(0));

        let back = edge(EdgeKind::FunctionReturn {
            function: "f".to_string(),
            call_site: NodeId(0),
            assigned: Some(Expr::var("r")),
        });
        let e = post(&e, &back).remove(0);
        assert_eq!(e.value("r"), Some(0));
        assert_eq!(e.value(&return_variable("f")), None);
    }

    #[test]
    fn test_domain() {
        let d = ExplicitDomain;
        let a = ExplicitElement::top().with("x", 1).with("y", 2);
        let b = ExplicitElement::top().with("x", 1).with("y", 3);

        assert!(d.le(&a, &ExplicitElement::top().with("x", 1)));
        assert!(!d.le(&a, &b));
        assert_eq!(d.join(&a, &b), ExplicitElement::top().with("x", 1));
        assert!(d.le(&d.bottom(), &a));
    }
}
