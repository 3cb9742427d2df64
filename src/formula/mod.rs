//! Quantifier-free formulas over integer terms.
//!
//! Terms and formulas are immutable trees shared through [`Rc`], compared and
//! hashed structurally. Program variables carry an optional SSA index: a
//! formula whose variables have no index is *symbolic*, and
//! [`FormulaManager::instantiate`] turns it into an *instantiated* one.
//! Propositional variables ([`FormulaKind::Prop`]) stand for predicates and
//! are never indexed.

use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

pub mod manager;

pub use manager::{FormulaManager, FormulaManagerOptions};

/// Program variable, optionally at a fixed SSA index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    pub name: String,
    pub index: Option<u32>,
}

impl Variable {
    pub fn symbolic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}@{}", self.name, index),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TermOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl TermOp {
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            TermOp::BitAnd | TermOp::BitOr | TermOp::BitXor | TermOp::Shl | TermOp::Shr
        )
    }

    fn smt_name(self) -> &'static str {
        match self {
            TermOp::Add => "+",
            TermOp::Sub => "-",
            TermOp::Mul => "*",
            TermOp::Div => "div",
            TermOp::Rem => "mod",
            TermOp::BitAnd => "bvand",
            TermOp::BitOr => "bvor",
            TermOp::BitXor => "bvxor",
            TermOp::Shl => "bvshl",
            TermOp::Shr => "bvashr",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TermUnaryOp {
    Neg,
    BitNot,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermKind {
    Const(i64),
    Var(Variable),
    Unary(TermUnaryOp, Term),
    Binary(TermOp, Term, Term),
}

/// Integer term.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Term(Rc<TermKind>);

impl Term {
    pub(crate) fn new(kind: TermKind) -> Self {
        Term(Rc::new(kind))
    }

    pub fn kind(&self) -> &TermKind {
        &self.0
    }

    pub fn as_const(&self) -> Option<i64> {
        match self.kind() {
            TermKind::Const(c) => Some(*c),
            _ => None,
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TermKind::Const(c) if *c < 0 => write!(f, "(- {})", c.unsigned_abs()),
            TermKind::Const(c) => write!(f, "{}", c),
            TermKind::Var(v) => write!(f, "{}", v),
            TermKind::Unary(TermUnaryOp::Neg, t) => write!(f, "(- {})", t),
            TermKind::Unary(TermUnaryOp::BitNot, t) => write!(f, "(bvnot {})", t),
            TermKind::Binary(op, a, b) => write!(f, "({} {} {})", op.smt_name(), a, b),
        }
    }
}

impl Debug for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormulaKind {
    True,
    False,
    /// Propositional variable.
    Prop(String),
    Eq(Term, Term),
    Le(Term, Term),
    Lt(Term, Term),
    Not(BooleanFormula),
    And(Vec<BooleanFormula>),
    Or(Vec<BooleanFormula>),
    Iff(BooleanFormula, BooleanFormula),
}

/// Boolean formula.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BooleanFormula(Rc<FormulaKind>);

impl BooleanFormula {
    pub(crate) fn new(kind: FormulaKind) -> Self {
        BooleanFormula(Rc::new(kind))
    }

    pub fn kind(&self) -> &FormulaKind {
        &self.0
    }

    /// Is this an arithmetic atom (`=`, `<=`, `<`)?
    pub fn is_atom(&self) -> bool {
        matches!(
            self.kind(),
            FormulaKind::Eq(..) | FormulaKind::Le(..) | FormulaKind::Lt(..)
        )
    }

    /// Top-level conjuncts: the arguments of an `and`, or the formula itself.
    pub fn conjuncts(&self) -> &[BooleanFormula] {
        match self.kind() {
            FormulaKind::And(args) => args,
            _ => std::slice::from_ref(self),
        }
    }
}

impl Display for BooleanFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn list(f: &mut Formatter<'_>, op: &str, args: &[BooleanFormula]) -> fmt::Result {
            write!(f, "({}", op)?;
            for arg in args {
                write!(f, " {}", arg)?;
            }
            write!(f, ")")
        }

        match self.kind() {
            FormulaKind::True => write!(f, "true"),
            FormulaKind::False => write!(f, "false"),
            FormulaKind::Prop(name) => write!(f, "{}", name),
            FormulaKind::Eq(a, b) => write!(f, "(= {} {})", a, b),
            FormulaKind::Le(a, b) => write!(f, "(<= {} {})", a, b),
            FormulaKind::Lt(a, b) => write!(f, "(< {} {})", a, b),
            FormulaKind::Not(g) => write!(f, "(not {})", g),
            FormulaKind::And(args) => list(f, "and", args),
            FormulaKind::Or(args) => list(f, "or", args),
            FormulaKind::Iff(a, b) => write!(f, "(= {} {})", a, b),
        }
    }
}

impl Debug for BooleanFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
