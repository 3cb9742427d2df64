use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use rustc_hash::FxHashSet;

use super::{BooleanFormula, FormulaKind, Term, TermKind, TermOp, TermUnaryOp, Variable};
use crate::error::Result;
use crate::options::{parse_bool, FromProperties};
use crate::ssa::SsaMap;

#[derive(Debug, Clone, Default)]
pub struct FormulaManagerOptions {
    /// Add side conditions for `&` and `|` so a linear solver knows basic
    /// bounds of bitwise results.
    pub use_bitwise_axioms: bool,
}

impl FromProperties for FormulaManagerOptions {
    fn set_property(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "cpa.predicate.useBitwiseAxioms" => self.use_bitwise_axioms = parse_bool(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Builds formulas and performs syntactic operations on them.
///
/// Builders apply only trivial simplifications (constants, double negation,
/// flattening), so structural equality stays cheap and predictable.
#[derive(Debug, Default)]
pub struct FormulaManager {
    options: FormulaManagerOptions,
}

impl FormulaManager {
    pub fn new(options: FormulaManagerOptions) -> Self {
        Self { options }
    }

    pub fn use_bitwise_axioms(&self) -> bool {
        self.options.use_bitwise_axioms
    }

    // Terms

    pub fn make_number(&self, value: i64) -> Term {
        Term::new(TermKind::Const(value))
    }

    /// Symbolic (un-indexed) program variable.
    pub fn make_variable(&self, name: impl Into<String>) -> Term {
        Term::new(TermKind::Var(Variable::symbolic(name)))
    }

    pub fn make_indexed_variable(&self, name: impl Into<String>, index: u32) -> Term {
        Term::new(TermKind::Var(Variable::indexed(name, index)))
    }

    pub fn make_binary(&self, op: TermOp, a: Term, b: Term) -> Term {
        Term::new(TermKind::Binary(op, a, b))
    }

    pub fn make_negate(&self, a: Term) -> Term {
        Term::new(TermKind::Unary(TermUnaryOp::Neg, a))
    }

    pub fn make_bit_not(&self, a: Term) -> Term {
        Term::new(TermKind::Unary(TermUnaryOp::BitNot, a))
    }

    // Atoms

    pub fn make_equal(&self, a: Term, b: Term) -> BooleanFormula {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => self.make_boolean(x == y),
            _ => BooleanFormula::new(FormulaKind::Eq(a, b)),
        }
    }

    pub fn make_less_or_equal(&self, a: Term, b: Term) -> BooleanFormula {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => self.make_boolean(x <= y),
            _ => BooleanFormula::new(FormulaKind::Le(a, b)),
        }
    }

    pub fn make_less_than(&self, a: Term, b: Term) -> BooleanFormula {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => self.make_boolean(x < y),
            _ => BooleanFormula::new(FormulaKind::Lt(a, b)),
        }
    }

    pub fn make_greater_than(&self, a: Term, b: Term) -> BooleanFormula {
        self.make_less_than(b, a)
    }

    pub fn make_greater_or_equal(&self, a: Term, b: Term) -> BooleanFormula {
        self.make_less_or_equal(b, a)
    }

    // Boolean connectives

    pub fn make_true(&self) -> BooleanFormula {
        BooleanFormula::new(FormulaKind::True)
    }

    pub fn make_false(&self) -> BooleanFormula {
        BooleanFormula::new(FormulaKind::False)
    }

    pub fn make_boolean(&self, value: bool) -> BooleanFormula {
        if value {
            self.make_true()
        } else {
            self.make_false()
        }
    }

    /// Propositional variable.
    pub fn make_prop(&self, name: impl Into<String>) -> BooleanFormula {
        BooleanFormula::new(FormulaKind::Prop(name.into()))
    }

    pub fn is_true(&self, f: &BooleanFormula) -> bool {
        matches!(f.kind(), FormulaKind::True)
    }

    pub fn is_false(&self, f: &BooleanFormula) -> bool {
        matches!(f.kind(), FormulaKind::False)
    }

    pub fn make_not(&self, f: &BooleanFormula) -> BooleanFormula {
        match f.kind() {
            FormulaKind::True => self.make_false(),
            FormulaKind::False => self.make_true(),
            FormulaKind::Not(g) => g.clone(),
            _ => BooleanFormula::new(FormulaKind::Not(f.clone())),
        }
    }

    pub fn make_and(&self, a: &BooleanFormula, b: &BooleanFormula) -> BooleanFormula {
        self.make_and_all([a.clone(), b.clone()])
    }

    pub fn make_or(&self, a: &BooleanFormula, b: &BooleanFormula) -> BooleanFormula {
        self.make_or_all([a.clone(), b.clone()])
    }

    pub fn make_and_all(&self, args: impl IntoIterator<Item = BooleanFormula>) -> BooleanFormula {
        let mut flat: Vec<BooleanFormula> = Vec::new();
        for arg in args {
            match arg.kind() {
                FormulaKind::True => {}
                FormulaKind::False => return self.make_false(),
                FormulaKind::And(inner) => {
                    for g in inner {
                        if !flat.contains(g) {
                            flat.push(g.clone());
                        }
                    }
                }
                _ => {
                    if !flat.contains(&arg) {
                        flat.push(arg);
                    }
                }
            }
        }
        match flat.len() {
            0 => self.make_true(),
            1 => flat.swap_remove(0),
            _ => BooleanFormula::new(FormulaKind::And(flat)),
        }
    }

    pub fn make_or_all(&self, args: impl IntoIterator<Item = BooleanFormula>) -> BooleanFormula {
        let mut flat: Vec<BooleanFormula> = Vec::new();
        for arg in args {
            match arg.kind() {
                FormulaKind::False => {}
                FormulaKind::True => return self.make_true(),
                FormulaKind::Or(inner) => {
                    for g in inner {
                        if !flat.contains(g) {
                            flat.push(g.clone());
                        }
                    }
                }
                _ => {
                    if !flat.contains(&arg) {
                        flat.push(arg);
                    }
                }
            }
        }
        match flat.len() {
            0 => self.make_false(),
            1 => flat.swap_remove(0),
            _ => BooleanFormula::new(FormulaKind::Or(flat)),
        }
    }

    pub fn make_equivalence(&self, a: &BooleanFormula, b: &BooleanFormula) -> BooleanFormula {
        if a == b {
            return self.make_true();
        }
        match (a.kind(), b.kind()) {
            (FormulaKind::True, _) => b.clone(),
            (_, FormulaKind::True) => a.clone(),
            (FormulaKind::False, _) => self.make_not(b),
            (_, FormulaKind::False) => self.make_not(a),
            _ => BooleanFormula::new(FormulaKind::Iff(a.clone(), b.clone())),
        }
    }

    // SSA instantiation

    /// Attach SSA indices from `ssa` to every symbolic variable of `f`.
    pub fn instantiate(&self, f: &BooleanFormula, ssa: &SsaMap) -> BooleanFormula {
        self.map_variables(f, &|v: &Variable| match v.index {
            Some(_) => v.clone(),
            None => Variable::indexed(v.name.clone(), ssa.index_or_default(&v.name)),
        })
    }

    pub fn instantiate_term(&self, t: &Term, ssa: &SsaMap) -> Term {
        self.map_term_variables(t, &|v: &Variable| match v.index {
            Some(_) => v.clone(),
            None => Variable::indexed(v.name.clone(), ssa.index_or_default(&v.name)),
        })
    }

    /// Strip all SSA indices from `f`.
    pub fn uninstantiate(&self, f: &BooleanFormula) -> BooleanFormula {
        self.map_variables(f, &|v: &Variable| Variable::symbolic(v.name.clone()))
    }

    fn map_variables(&self, f: &BooleanFormula, m: &dyn Fn(&Variable) -> Variable) -> BooleanFormula {
        match f.kind() {
            FormulaKind::True | FormulaKind::False | FormulaKind::Prop(_) => f.clone(),
            FormulaKind::Eq(a, b) => BooleanFormula::new(FormulaKind::Eq(
                self.map_term_variables(a, m),
                self.map_term_variables(b, m),
            )),
            FormulaKind::Le(a, b) => BooleanFormula::new(FormulaKind::Le(
                self.map_term_variables(a, m),
                self.map_term_variables(b, m),
            )),
            FormulaKind::Lt(a, b) => BooleanFormula::new(FormulaKind::Lt(
                self.map_term_variables(a, m),
                self.map_term_variables(b, m),
            )),
            FormulaKind::Not(g) => BooleanFormula::new(FormulaKind::Not(self.map_variables(g, m))),
            FormulaKind::And(args) => {
                BooleanFormula::new(FormulaKind::And(args.iter().map(|g| self.map_variables(g, m)).collect()))
            }
            FormulaKind::Or(args) => {
                BooleanFormula::new(FormulaKind::Or(args.iter().map(|g| self.map_variables(g, m)).collect()))
            }
            FormulaKind::Iff(a, b) => {
                BooleanFormula::new(FormulaKind::Iff(self.map_variables(a, m), self.map_variables(b, m)))
            }
        }
    }

    fn map_term_variables(&self, t: &Term, m: &dyn Fn(&Variable) -> Variable) -> Term {
        match t.kind() {
            TermKind::Const(_) => t.clone(),
            TermKind::Var(v) => Term::new(TermKind::Var(m(v))),
            TermKind::Unary(op, a) => Term::new(TermKind::Unary(*op, self.map_term_variables(a, m))),
            TermKind::Binary(op, a, b) => Term::new(TermKind::Binary(
                *op,
                self.map_term_variables(a, m),
                self.map_term_variables(b, m),
            )),
        }
    }

    // Syntactic queries

    /// All distinct arithmetic atoms of `f`, in order of first occurrence.
    pub fn extract_atoms(&self, f: &BooleanFormula, uninstantiate: bool) -> Vec<BooleanFormula> {
        let mut seen = FxHashSet::default();
        let mut atoms = Vec::new();
        let mut stack = vec![f.clone()];
        while let Some(g) = stack.pop() {
            match g.kind() {
                FormulaKind::True | FormulaKind::False | FormulaKind::Prop(_) => {}
                FormulaKind::Eq(..) | FormulaKind::Le(..) | FormulaKind::Lt(..) => {
                    let atom = if uninstantiate { self.uninstantiate(&g) } else { g.clone() };
                    if seen.insert(atom.clone()) {
                        atoms.push(atom);
                    }
                }
                FormulaKind::Not(h) => stack.push(h.clone()),
                FormulaKind::And(args) | FormulaKind::Or(args) => {
                    stack.extend(args.iter().rev().cloned());
                }
                FormulaKind::Iff(a, b) => {
                    stack.push(b.clone());
                    stack.push(a.clone());
                }
            }
        }
        atoms
    }

    /// Is `f` a conjunction of literals?
    pub fn is_purely_conjunctive(&self, f: &BooleanFormula) -> bool {
        match f.kind() {
            FormulaKind::True | FormulaKind::False | FormulaKind::Prop(_) => true,
            FormulaKind::Eq(..) | FormulaKind::Le(..) | FormulaKind::Lt(..) => true,
            FormulaKind::Not(g) => matches!(
                g.kind(),
                FormulaKind::Prop(_) | FormulaKind::Eq(..) | FormulaKind::Le(..) | FormulaKind::Lt(..)
            ),
            FormulaKind::And(args) => args.iter().all(|g| self.is_purely_conjunctive(g)),
            FormulaKind::Or(_) | FormulaKind::Iff(..) => false,
        }
    }

    /// Cheap sufficient check for `left → right`.
    ///
    /// Holds if `right` is `true`, equal to `left`, or every conjunct of
    /// `right` is a conjunct of `left`.
    pub fn check_syntactic_entails(&self, left: &BooleanFormula, right: &BooleanFormula) -> bool {
        if self.is_true(right) || left == right {
            return true;
        }
        let left_conjuncts = left.conjuncts();
        right.conjuncts().iter().all(|r| left_conjuncts.contains(r))
    }

    /// Side conditions for every `a & b` and `a | b` subterm of `f`.
    ///
    /// For non-negative operands, `0 <= a & b <= min(a, b)` and
    /// `a | b >= max(a, b)`. Returns `true` when `f` has no such subterms.
    pub fn bitwise_axioms(&self, f: &BooleanFormula) -> BooleanFormula {
        let mut terms = Vec::new();
        let mut seen = FxHashSet::default();
        self.collect_bitwise_terms(f, &mut terms, &mut seen);

        let zero = self.make_number(0);
        let axioms: Vec<BooleanFormula> = terms
            .into_iter()
            .filter_map(|t| {
                let TermKind::Binary(op, a, b) = t.kind() else {
                    return None;
                };
                let premise = self.make_and(
                    &self.make_less_or_equal(zero.clone(), a.clone()),
                    &self.make_less_or_equal(zero.clone(), b.clone()),
                );
                let conclusion = match op {
                    TermOp::BitAnd => self.make_and_all([
                        self.make_less_or_equal(zero.clone(), t.clone()),
                        self.make_less_or_equal(t.clone(), a.clone()),
                        self.make_less_or_equal(t.clone(), b.clone()),
                    ]),
                    TermOp::BitOr => self.make_and(
                        &self.make_less_or_equal(a.clone(), t.clone()),
                        &self.make_less_or_equal(b.clone(), t.clone()),
                    ),
                    _ => return None,
                };
                Some(self.make_or(&self.make_not(&premise), &conclusion))
            })
            .collect();

        if !axioms.is_empty() {
            debug!("Generated {} bitwise axioms", axioms.len());
        }
        self.make_and_all(axioms)
    }

    fn collect_bitwise_terms(&self, f: &BooleanFormula, out: &mut Vec<Term>, seen: &mut FxHashSet<Term>) {
        match f.kind() {
            FormulaKind::True | FormulaKind::False | FormulaKind::Prop(_) => {}
            FormulaKind::Eq(a, b) | FormulaKind::Le(a, b) | FormulaKind::Lt(a, b) => {
                Self::collect_bitwise_subterms(a, out, seen);
                Self::collect_bitwise_subterms(b, out, seen);
            }
            FormulaKind::Not(g) => self.collect_bitwise_terms(g, out, seen),
            FormulaKind::And(args) | FormulaKind::Or(args) => {
                for g in args {
                    self.collect_bitwise_terms(g, out, seen);
                }
            }
            FormulaKind::Iff(a, b) => {
                self.collect_bitwise_terms(a, out, seen);
                self.collect_bitwise_terms(b, out, seen);
            }
        }
    }

    fn collect_bitwise_subterms(t: &Term, out: &mut Vec<Term>, seen: &mut FxHashSet<Term>) {
        match t.kind() {
            TermKind::Const(_) | TermKind::Var(_) => {}
            TermKind::Unary(_, a) => Self::collect_bitwise_subterms(a, out, seen),
            TermKind::Binary(op, a, b) => {
                Self::collect_bitwise_subterms(a, out, seen);
                Self::collect_bitwise_subterms(b, out, seen);
                if matches!(op, TermOp::BitAnd | TermOp::BitOr) && seen.insert(t.clone()) {
                    out.push(t.clone());
                }
            }
        }
    }

    // Diagnostics

    /// File name for a dumped formula, e.g. `output/abstraction.0042.input.0.smt2`.
    pub fn format_output_file(&self, directory: &Path, kind: &str, number: usize, part: &str, sub: usize) -> PathBuf {
        directory.join(format!("{}.{:04}.{}.{}.smt2", kind, number, part, sub))
    }

    pub fn dump_formula_to_file(&self, f: &BooleanFormula, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("(assert {})\n", f))?;
        Ok(())
    }
}
