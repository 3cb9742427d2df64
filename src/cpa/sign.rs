//! Sign analysis.
//!
//! The lattice has 8 elements:
//!
//! ```text
//!           ⊤
//!       /   |   \
//!     ≤0   ≠0   ≥0
//!    / \  / \  / \
//!   -   0   +
//!    \  |  /
//!       ⊥
//! ```
//!
//! Each sign is a subset of `{-, 0, +}`, so the lattice operations are set
//! operations on three bits.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use log::trace;

use super::explicit::ExplicitElement;
use super::{
    find_sibling, AbstractDomain, ConfigurableProgramAnalysis, ElementRef, MergeJoin, MergeOperator, MergeSep,
    SingletonPrecision, StopOperator, StopSep, Strengthened, TransferRelation,
};
use crate::cfa::{return_variable, BinaryOp, CfaEdge, EdgeKind, Expr, NodeId, UnaryOp};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    Bottom,
    Neg,
    Zero,
    Pos,
    NonPos,
    NonNeg,
    NonZero,
    Top,
}

const NEG: u8 = 0b100;
const ZERO: u8 = 0b010;
const POS: u8 = 0b001;

impl Sign {
    fn bits(self) -> u8 {
        match self {
            Sign::Bottom => 0,
            Sign::Neg => NEG,
            Sign::Zero => ZERO,
            Sign::Pos => POS,
            Sign::NonPos => NEG | ZERO,
            Sign::NonNeg => ZERO | POS,
            Sign::NonZero => NEG | POS,
            Sign::Top => NEG | ZERO | POS,
        }
    }

    fn from_bits(bits: u8) -> Sign {
        match bits & 0b111 {
            0 => Sign::Bottom,
            NEG => Sign::Neg,
            ZERO => Sign::Zero,
            POS => Sign::Pos,
            b if b == NEG | ZERO => Sign::NonPos,
            b if b == ZERO | POS => Sign::NonNeg,
            b if b == NEG | POS => Sign::NonZero,
            _ => Sign::Top,
        }
    }

    pub fn from_value(v: i64) -> Self {
        match v.cmp(&0) {
            std::cmp::Ordering::Less => Sign::Neg,
            std::cmp::Ordering::Equal => Sign::Zero,
            std::cmp::Ordering::Greater => Sign::Pos,
        }
    }

    pub fn has_negative(self) -> bool {
        self.bits() & NEG != 0
    }

    pub fn has_zero(self) -> bool {
        self.bits() & ZERO != 0
    }

    pub fn has_positive(self) -> bool {
        self.bits() & POS != 0
    }

    /// `self ⊑ other`
    pub fn le(self, other: Sign) -> bool {
        self.bits() & !other.bits() == 0
    }

    pub fn join(self, other: Sign) -> Sign {
        Sign::from_bits(self.bits() | other.bits())
    }

    pub fn meet(self, other: Sign) -> Sign {
        Sign::from_bits(self.bits() & other.bits())
    }

    /// Lift an operation on the atoms `-`, `0`, `+` to sets of them.
    fn lift(self, other: Sign, op: impl Fn(u8, u8) -> u8) -> Sign {
        let mut bits = 0;
        for a in [NEG, ZERO, POS] {
            if self.bits() & a == 0 {
                continue;
            }
            for b in [NEG, ZERO, POS] {
                if other.bits() & b != 0 {
                    bits |= op(a, b);
                }
            }
        }
        Sign::from_bits(bits)
    }

    pub fn neg(self) -> Sign {
        let mut bits = self.bits() & ZERO;
        if self.has_negative() {
            bits |= POS;
        }
        if self.has_positive() {
            bits |= NEG;
        }
        Sign::from_bits(bits)
    }

    pub fn add(self, other: Sign) -> Sign {
        self.lift(other, |a, b| match (a, b) {
            (ZERO, x) | (x, ZERO) => x,
            (x, y) if x == y => x,
            _ => NEG | ZERO | POS,
        })
    }

    pub fn sub(self, other: Sign) -> Sign {
        self.add(other.neg())
    }

    pub fn mul(self, other: Sign) -> Sign {
        self.lift(other, |a, b| match (a, b) {
            (ZERO, _) | (_, ZERO) => ZERO,
            (x, y) if x == y => POS,
            _ => NEG,
        })
    }

    /// Truncating division. Division by zero has no result.
    pub fn div(self, other: Sign) -> Sign {
        self.lift(other, |a, b| match (a, b) {
            (_, ZERO) => 0,
            (ZERO, _) => ZERO,
            (x, y) if x == y => POS | ZERO,
            _ => NEG | ZERO,
        })
    }

    /// Remainder takes the sign of the dividend.
    pub fn rem(self, other: Sign) -> Sign {
        self.lift(other, |a, b| match (a, b) {
            (_, ZERO) => 0,
            (ZERO, _) => ZERO,
            (x, _) => x | ZERO,
        })
    }
}

impl Display for Sign {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Bottom => write!(f, "⊥"),
            Sign::Neg => write!(f, "-"),
            Sign::Zero => write!(f, "0"),
            Sign::Pos => write!(f, "+"),
            Sign::NonPos => write!(f, "≤0"),
            Sign::NonNeg => write!(f, "≥0"),
            Sign::NonZero => write!(f, "≠0"),
            Sign::Top => write!(f, "⊤"),
        }
    }
}

/// Signs of variables. Variables that are not mapped are `⊤`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignElement {
    signs: BTreeMap<String, Sign>,
    is_bottom: bool,
}

impl SignElement {
    pub fn top() -> Self {
        Self::default()
    }

    pub fn bottom() -> Self {
        Self {
            signs: BTreeMap::new(),
            is_bottom: true,
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.is_bottom
    }

    pub fn get(&self, var: &str) -> Sign {
        if self.is_bottom {
            return Sign::Bottom;
        }
        self.signs.get(var).copied().unwrap_or(Sign::Top)
    }

    pub fn set_bottom(&mut self) {
        self.signs.clear();
        self.is_bottom = true;
    }

    pub fn set(&mut self, var: impl Into<String>, sign: Sign) {
        let var: String = var.into();
        match sign {
            Sign::Bottom => self.set_bottom(),
            Sign::Top => {
                self.signs.remove(&var);
            }
            _ => {
                if !self.is_bottom {
                    self.signs.insert(var, sign);
                }
            }
        }
    }

    pub fn with(mut self, var: impl Into<String>, sign: Sign) -> Self {
        self.set(var, sign);
        self
    }

    pub fn forget(&mut self, var: &str) {
        self.signs.remove(var);
    }

    /// Abstract evaluation of `e`.
    pub fn eval(&self, e: &Expr) -> Sign {
        if self.is_bottom {
            return Sign::Bottom;
        }
        match e {
            Expr::Var(v) => self.get(v),
            Expr::Const(c) => Sign::from_value(*c),
            Expr::Nondet | Expr::Deref(_) => Sign::Top,
            Expr::Unary(UnaryOp::Neg, a) => self.eval(a).neg(),
            Expr::Unary(UnaryOp::Not, a) => match self.eval(a) {
                Sign::Zero => Sign::Pos,
                s if !s.has_zero() => Sign::Zero,
                _ => Sign::NonNeg,
            },
            Expr::Unary(UnaryOp::BitNot, _) => Sign::Top,
            Expr::Binary(op, a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                match op {
                    BinaryOp::Add => a.add(b),
                    BinaryOp::Sub => a.sub(b),
                    BinaryOp::Mul => a.mul(b),
                    BinaryOp::Div => a.div(b),
                    BinaryOp::Rem => a.rem(b),
                    BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => Sign::Top,
                    _ => {
                        debug_assert!(op.is_comparison() || op.is_logical());
                        Sign::NonNeg
                    }
                }
            }
        }
    }
}

impl Display for SignElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_bottom {
            return write!(f, "⊥");
        }
        write!(f, "{{")?;
        for (i, (var, sign)) in self.signs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} -> {}", var, sign)?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SignDomain;

impl AbstractDomain for SignDomain {
    type Element = SignElement;

    fn bottom(&self) -> Self::Element {
        SignElement::bottom()
    }

    fn top(&self) -> Self::Element {
        SignElement::top()
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
        // Unmapped variables are ⊤ in e1, so e2 may only constrain mapped ones.
        e2.signs.iter().all(|(var, &s2)| e1.get(var).le(s2))
    }

    fn join(&self, e1: &Self::Element, e2: &Self::Element) -> Self::Element {
        if e1.is_bottom {
            return e2.clone();
        }
        if e2.is_bottom {
            return e1.clone();
        }
        let mut result = SignElement::top();
        for (var, &s1) in &e1.signs {
            result.set(var.clone(), s1.join(e2.get(var)));
        }
        result
    }
}

fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        op => op,
    }
}

fn negate(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Ge,
        BinaryOp::Le => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::Le,
        BinaryOp::Ge => BinaryOp::Lt,
        BinaryOp::Eq => BinaryOp::Ne,
        BinaryOp::Ne => BinaryOp::Eq,
        op => op,
    }
}

/// Sign of `x` implied by `x op y` where `y` has sign `other`.
fn refinement(op: BinaryOp, other: Sign) -> Sign {
    match op {
        BinaryOp::Gt if other.le(Sign::NonNeg) => Sign::Pos,
        BinaryOp::Ge if other.le(Sign::Pos) => Sign::Pos,
        BinaryOp::Ge if other.le(Sign::NonNeg) => Sign::NonNeg,
        BinaryOp::Lt if other.le(Sign::NonPos) => Sign::Neg,
        BinaryOp::Le if other.le(Sign::Neg) => Sign::Neg,
        BinaryOp::Le if other.le(Sign::NonPos) => Sign::NonPos,
        BinaryOp::Eq => other,
        BinaryOp::Ne if other == Sign::Zero => Sign::NonZero,
        _ => Sign::Top,
    }
}

#[derive(Debug, Default)]
pub struct SignTransferRelation;

impl SignTransferRelation {
    fn assign(&self, element: &SignElement, lhs: &Expr, rhs: &Expr, edge: &CfaEdge) -> Result<SignElement> {
        match lhs {
            Expr::Var(var) => {
                let mut result = element.clone();
                result.set(var.clone(), element.eval(rhs));
                Ok(result)
            }
            _ => Err(Error::unrecognized(edge, format!("left-hand side {} is not a variable", lhs))),
        }
    }

    /// Restrict `element` to the states where `condition == truth`.
    fn assume(&self, element: &mut SignElement, condition: &Expr, truth: bool) {
        match condition {
            Expr::Unary(UnaryOp::Not, c) => self.assume(element, c, !truth),
            Expr::Binary(BinaryOp::And, a, b) if truth => {
                self.assume(element, a, true);
                self.assume(element, b, true);
            }
            Expr::Binary(BinaryOp::Or, a, b) if !truth => {
                self.assume(element, a, false);
                self.assume(element, b, false);
            }
            Expr::Binary(op, a, b) if op.is_comparison() => {
                let op = if truth { *op } else { negate(*op) };
                if let Expr::Var(x) = a.as_ref() {
                    let sign = refinement(op, element.eval(b));
                    element.set(x.clone(), element.get(x).meet(sign));
                }
                if let Expr::Var(y) = b.as_ref() {
                    let sign = refinement(mirror(op), element.eval(a));
                    element.set(y.clone(), element.get(y).meet(sign));
                }
            }
            Expr::Var(x) => {
                let sign = if truth { Sign::NonZero } else { Sign::Zero };
                element.set(x.clone(), element.get(x).meet(sign));
            }
            _ => {
                let value = element.eval(condition);
                let feasible = if truth { value != Sign::Zero } else { value.has_zero() };
                if !feasible {
                    element.set_bottom();
                }
            }
        }
    }
}

impl TransferRelation<SignElement, SingletonPrecision> for SignTransferRelation {
    fn successors(
        &self,
        element: &SignElement,
        _precision: &SingletonPrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<SignElement>> {
        if element.is_bottom {
            return Ok(Vec::new());
        }

        let successor = match &edge.kind {
            EdgeKind::Blank => element.clone(),
            EdgeKind::Declaration { variable, initializer } => {
                let mut result = element.clone();
                let sign = initializer.as_ref().map_or(Sign::Top, |init| element.eval(init));
                result.set(variable.clone(), sign);
                result
            }
            EdgeKind::Assign { lhs, rhs } => self.assign(element, lhs, rhs, edge)?,
            EdgeKind::Assume { condition, truth } => {
                let mut result = element.clone();
                self.assume(&mut result, condition, *truth);
                result
            }
            EdgeKind::FunctionCall {
                arguments, parameters, ..
            } => {
                if arguments.len() != parameters.len() {
                    return Err(Error::unrecognized(edge, "argument count does not match parameter count"));
                }
                let mut result = element.clone();
                for (param, arg) in parameters.iter().zip(arguments) {
                    result.set(param.clone(), element.eval(arg));
                }
                result
            }
            EdgeKind::FunctionReturn { function, assigned, .. } => {
                let retval = return_variable(function);
                let mut result = match assigned {
                    Some(lhs) => self.assign(element, lhs, &Expr::Var(retval.clone()), edge)?,
                    None => element.clone(),
                };
                result.forget(&retval);
                result
            }
            EdgeKind::Return { function, value } => {
                // A missing return value defaults to 0.
                let sign = value.as_ref().map_or(Sign::Zero, |v| element.eval(v));
                let mut result = element.clone();
                result.set(return_variable(function), sign);
                result
            }
        };

        trace!("sign: {} --[{}]--> {}", element, edge, successor);
        if successor.is_bottom {
            Ok(Vec::new())
        } else {
            Ok(vec![successor])
        }
    }

    fn strengthen(
        &self,
        element: &SignElement,
        siblings: &[ElementRef],
        _edge: &CfaEdge,
        _precision: &SingletonPrecision,
    ) -> Result<Strengthened<SignElement>> {
        let explicit = match find_sibling::<ExplicitElement>(siblings) {
            Some(explicit) => explicit,
            None => return Ok(Strengthened::Unchanged),
        };

        let mut result = element.clone();
        for (var, value) in explicit.values() {
            let current = result.get(var);
            let refined = current.meet(Sign::from_value(value));
            if refined == Sign::Bottom {
                return Ok(Strengthened::Infeasible);
            }
            if refined != current {
                result.set(var, refined);
            }
        }

        if result == *element {
            Ok(Strengthened::Unchanged)
        } else {
            Ok(Strengthened::Replaced(result))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMerge {
    Sep,
    Join,
}

#[derive(Debug)]
pub struct SignCpa {
    transfer: SignTransferRelation,
    merge: SignMerge,
    stop: StopSep<SignDomain>,
}

impl SignCpa {
    pub fn new(merge: SignMerge) -> Self {
        Self {
            transfer: SignTransferRelation,
            merge,
            stop: StopSep(SignDomain),
        }
    }
}

impl Default for SignCpa {
    fn default() -> Self {
        Self::new(SignMerge::Sep)
    }
}

static SIGN_MERGE_JOIN: MergeJoin<SignDomain> = MergeJoin(SignDomain);

impl ConfigurableProgramAnalysis for SignCpa {
    type Element = SignElement;
    type Precision = SingletonPrecision;

    fn name(&self) -> &'static str {
        "sign"
    }

    fn domain(&self) -> &dyn AbstractDomain<Element = SignElement> {
        &SignDomain
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<SignElement, SingletonPrecision> {
        &self.transfer
    }

    fn merge_operator(&self) -> &dyn MergeOperator<SignElement, SingletonPrecision> {
        match self.merge {
            SignMerge::Sep => &MergeSep,
            SignMerge::Join => &SIGN_MERGE_JOIN,
        }
    }

    fn stop_operator(&self) -> &dyn StopOperator<SignElement> {
        &self.stop
    }

    fn initial_element(&self, _node: NodeId) -> SignElement {
        SignElement::top()
    }

    fn initial_precision(&self, _node: NodeId) -> SingletonPrecision {
        SingletonPrecision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::NodeId;
    use std::rc::Rc;
    use test_log::test;

    const ALL: [Sign; 8] = [
        Sign::Bottom,
        Sign::Neg,
        Sign::Zero,
        Sign::Pos,
        Sign::NonPos,
        Sign::NonNeg,
        Sign::NonZero,
        Sign::Top,
    ];

    fn edge(kind: EdgeKind) -> CfaEdge {
        CfaEdge::new(NodeId(0), NodeId(1), kind)
    }

    fn assume(condition: Expr, truth: bool) -> CfaEdge {
        edge(EdgeKind::Assume { condition, truth })
    }

    fn post(element: &SignElement, edge: &CfaEdge) -> Vec<SignElement> {
        SignTransferRelation.successors(element, &SingletonPrecision, edge).unwrap()
    }

    #[test]
    fn test_lattice_laws() {
        for a in ALL {
            assert!(a.le(a));
            assert!(Sign::Bottom.le(a));
            assert!(a.le(Sign::Top));
            for b in ALL {
                assert_eq!(a.join(b), b.join(a));
                assert!(a.le(a.join(b)));
                assert!(a.meet(b).le(a));
            }
        }
        assert_eq!(Sign::Neg.join(Sign::Zero), Sign::NonPos);
        assert_eq!(Sign::NonPos.meet(Sign::NonNeg), Sign::Zero);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Sign::Pos.add(Sign::Pos), Sign::Pos);
        assert_eq!(Sign::Pos.add(Sign::Zero), Sign::Pos);
        assert_eq!(Sign::Pos.add(Sign::Neg), Sign::Top);
        assert_eq!(Sign::NonZero.add(Sign::Pos), Sign::Top);
        assert_eq!(Sign::Pos.sub(Sign::Neg), Sign::Pos);
        assert_eq!(Sign::Neg.mul(Sign::Neg), Sign::Pos);
        assert_eq!(Sign::NonZero.mul(Sign::Zero), Sign::Zero);
        assert_eq!(Sign::Neg.div(Sign::Pos), Sign::NonPos);
        assert_eq!(Sign::Pos.div(Sign::Zero), Sign::Bottom);
        assert_eq!(Sign::Neg.rem(Sign::Top), Sign::NonPos);
        assert_eq!(Sign::NonNeg.neg(), Sign::NonPos);
    }

    #[test]
    fn test_assignment() {
        let e = SignElement::top().with("x", Sign::Pos);
        let rhs = Expr::binary(BinaryOp::Mul, Expr::var("x"), Expr::constant(-3));
        let result = post(&e, &edge(EdgeKind::Assign { lhs: Expr::var("y"), rhs }));
        assert_eq!(result, vec![e.clone().with("y", Sign::Neg)]);
    }

    #[test]
    fn test_assignment_through_pointer_is_unrecognized() {
        let e = SignElement::top();
        let edge = edge(EdgeKind::Assign {
            lhs: Expr::deref(Expr::var("p")),
            rhs: Expr::constant(1),
        });
        let err = SignTransferRelation.successors(&e, &SingletonPrecision, &edge).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedCode { .. }));
    }

    #[test]
    fn test_assume_refines() {
        let e = SignElement::top();
        let cond = Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::constant(0));

        assert_eq!(post(&e, &assume(cond.clone(), true)), vec![e.clone().with("x", Sign::Pos)]);
        assert_eq!(post(&e, &assume(cond, false)), vec![e.clone().with("x", Sign::NonPos)]);

        // 0 < y
        let cond = Expr::binary(BinaryOp::Lt, Expr::constant(0), Expr::var("y"));
        assert_eq!(post(&e, &assume(cond, true)), vec![e.with("y", Sign::Pos)]);
    }

    #[test]
    fn test_assume_infeasible() {
        let e = SignElement::top().with("x", Sign::Neg);
        let cond = Expr::binary(BinaryOp::Ge, Expr::var("x"), Expr::constant(0));
        assert!(post(&e, &assume(cond, true)).is_empty());

        let e = SignElement::top().with("x", Sign::Zero);
        assert!(post(&e, &assume(Expr::var("x"), true)).is_empty());
    }

    #[test]
    fn test_function_call_and_return() {
        let e = SignElement::top().with("a", Sign::Neg);
        let call = edge(EdgeKind::FunctionCall {
            function: "f".to_string(),
            arguments: vec![Expr::var("a")],
            parameters: vec!["p".to_string()],
            call_site: NodeId(0),
        });
        let e = post(&e, &call).remove(0);
        assert_eq!(e.get("p"), Sign::Neg);

        let ret = edge(EdgeKind::Return {
            function: "f".to_string(),
            value: Some(Expr::unary(UnaryOp::Neg, Expr::var("p"))),
        });
        let e = post(&e, &ret).remove(0);
        assert_eq!(e.get(&return_variable("f")), Sign::Pos);

        let back = edge(EdgeKind::FunctionReturn {
            function: "f".to_string(),
            call_site: NodeId(0),
            assigned: Some(Expr::var("r")),
        });
        let e = post(&e, &back).remove(0);
        assert_eq!(e.get("r"), Sign::Pos);
        assert_eq!(e.get(&return_variable("f")), Sign::Top);
    }

    #[test]
    fn test_strengthen_with_explicit_values() {
        let explicit = ExplicitElement::top().with("x", 5);
        let siblings: Vec<ElementRef> = vec![Rc::new(explicit)];
        let e = edge(EdgeKind::Blank);

        let top = SignElement::top();
        let result = SignTransferRelation
            .strengthen(&top, &siblings, &e, &SingletonPrecision)
            .unwrap();
        assert_eq!(result, Strengthened::Replaced(top.with("x", Sign::Pos)));

        let neg = SignElement::top().with("x", Sign::Neg);
        let result = SignTransferRelation
            .strengthen(&neg, &siblings, &e, &SingletonPrecision)
            .unwrap();
        assert_eq!(result, Strengthened::Infeasible);

        let pos = SignElement::top().with("x", Sign::Pos);
        let result = SignTransferRelation
            .strengthen(&pos, &siblings, &e, &SingletonPrecision)
            .unwrap();
        assert_eq!(result, Strengthened::Unchanged);
    }

    #[test]
    fn test_domain_order() {
        let d = SignDomain;
        let pos = SignElement::top().with("x", Sign::Pos);
        let nonneg = SignElement::top().with("x", Sign::NonNeg);

        assert!(d.le(&pos, &nonneg));
        assert!(!d.le(&nonneg, &pos));
        assert!(d.le(&pos, &SignElement::top()));
        assert!(!d.le(&SignElement::top(), &pos));
        assert!(d.le(&d.bottom(), &pos));
        assert_eq!(d.join(&pos, &SignElement::top().with("x", Sign::Zero)), nonneg);
    }
}
