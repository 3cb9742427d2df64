//! Consistency of conjunctions of integer linear constraints.
//!
//! Equalities with a unit coefficient are solved by substitution, other
//! equalities become two inequalities, inequalities are eliminated with
//! Fourier–Motzkin (tightened to integers after every step) and
//! disequalities are split into `t <= -1 ∨ t >= 1`.
//!
//! A `false` answer is always correct over the integers. A `true` answer may
//! be spurious when only the integrality of the solution is violated.

use std::collections::{BTreeMap, BTreeSet};

use log::trace;
use rustc_hash::FxHashMap;

use super::SolverError;
use crate::formula::{BooleanFormula, FormulaKind, Term, TermKind, TermOp, TermUnaryOp};

type Coeff = i128;

/// `Σ coeffs[x]·x + constant`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LinearExpr {
    coeffs: BTreeMap<usize, Coeff>,
    constant: Coeff,
}

fn overflow<T>(value: Option<T>) -> Result<T, SolverError> {
    value.ok_or(SolverError::Overflow)
}

fn gcd(mut a: Coeff, mut b: Coeff) -> Coeff {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl LinearExpr {
    fn constant(c: Coeff) -> Self {
        Self {
            coeffs: BTreeMap::new(),
            constant: c,
        }
    }

    fn variable(x: usize) -> Self {
        Self {
            coeffs: BTreeMap::from([(x, 1)]),
            constant: 0,
        }
    }

    fn as_constant(&self) -> Option<Coeff> {
        if self.coeffs.is_empty() {
            Some(self.constant)
        } else {
            None
        }
    }

    fn coeff(&self, x: usize) -> Coeff {
        self.coeffs.get(&x).copied().unwrap_or(0)
    }

    /// `self + factor·other`
    fn add_scaled(&self, other: &LinearExpr, factor: Coeff) -> Result<Self, SolverError> {
        let mut res = self.clone();
        for (&x, &c) in &other.coeffs {
            let entry = res.coeffs.entry(x).or_insert(0);
            *entry = overflow(c.checked_mul(factor).and_then(|d| entry.checked_add(d)))?;
            if *entry == 0 {
                res.coeffs.remove(&x);
            }
        }
        res.constant = overflow(other.constant.checked_mul(factor).and_then(|d| res.constant.checked_add(d)))?;
        Ok(res)
    }

    fn scale(&self, factor: Coeff) -> Result<Self, SolverError> {
        LinearExpr::constant(0).add_scaled(self, factor)
    }

    fn sub(&self, other: &LinearExpr) -> Result<Self, SolverError> {
        self.add_scaled(other, -1)
    }

    fn plus_constant(&self, c: Coeff) -> Result<Self, SolverError> {
        let mut res = self.clone();
        res.constant = overflow(res.constant.checked_add(c))?;
        Ok(res)
    }

    /// Replace `x` by `replacement`.
    fn substitute(&self, x: usize, replacement: &LinearExpr) -> Result<Self, SolverError> {
        let c = self.coeff(x);
        if c == 0 {
            return Ok(self.clone());
        }
        let mut res = self.clone();
        res.coeffs.remove(&x);
        res.add_scaled(replacement, c)
    }

    fn coeff_gcd(&self) -> Coeff {
        self.coeffs.values().fold(0, |g, &c| gcd(g, c))
    }
}

/// Constraint on a linear expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Constraint {
    /// `e <= 0`
    Le(LinearExpr),
    /// `e = 0`
    Eq(LinearExpr),
    /// `e != 0`
    Ne(LinearExpr),
}

/// Translates terms into linear expressions over numbered variables.
///
/// Variables and non-linear subterms (products of variables, division,
/// bitwise operations) become opaque integer variables.
#[derive(Debug, Default)]
pub(crate) struct Linearizer {
    vars: FxHashMap<Term, usize>,
}

impl Linearizer {
    fn opaque(&mut self, t: &Term) -> LinearExpr {
        let next = self.vars.len();
        let x = *self.vars.entry(t.clone()).or_insert(next);
        LinearExpr::variable(x)
    }

    pub(crate) fn linearize(&mut self, t: &Term) -> Result<LinearExpr, SolverError> {
        match t.kind() {
            TermKind::Const(c) => Ok(LinearExpr::constant(*c as Coeff)),
            TermKind::Var(_) => Ok(self.opaque(t)),
            TermKind::Unary(TermUnaryOp::Neg, a) => self.linearize(a)?.scale(-1),
            TermKind::Unary(TermUnaryOp::BitNot, a) => {
                // ~a = -a - 1
                self.linearize(a)?.scale(-1)?.plus_constant(-1)
            }
            TermKind::Binary(op, a, b) => {
                let la = self.linearize(a)?;
                let lb = self.linearize(b)?;
                match op {
                    TermOp::Add => la.add_scaled(&lb, 1),
                    TermOp::Sub => la.sub(&lb),
                    TermOp::Mul => match (la.as_constant(), lb.as_constant()) {
                        (Some(c), _) => lb.scale(c),
                        (_, Some(c)) => la.scale(c),
                        _ => Ok(self.opaque(t)),
                    },
                    _ => match (la.as_constant(), lb.as_constant()) {
                        (Some(x), Some(y)) => match fold_constant(*op, x, y) {
                            Some(c) => Ok(LinearExpr::constant(c)),
                            None => Ok(self.opaque(t)),
                        },
                        _ => Ok(self.opaque(t)),
                    },
                }
            }
        }
    }

    /// Constraints asserted by `atom` having the given truth value.
    pub(crate) fn literal(&mut self, atom: &BooleanFormula, truth: bool) -> Result<Constraint, SolverError> {
        let (a, b) = match atom.kind() {
            FormulaKind::Eq(a, b) | FormulaKind::Le(a, b) | FormulaKind::Lt(a, b) => (a, b),
            _ => unreachable!("Not an arithmetic atom: {}", atom),
        };
        let t = self.linearize(a)?.sub(&self.linearize(b)?)?;
        Ok(match (atom.kind(), truth) {
            // a <= b  ⟺  t <= 0;  ¬(a <= b)  ⟺  -t + 1 <= 0
            (FormulaKind::Le(..), true) => Constraint::Le(t),
            (FormulaKind::Le(..), false) => Constraint::Le(t.scale(-1)?.plus_constant(1)?),
            // a < b  ⟺  t + 1 <= 0;  ¬(a < b)  ⟺  -t <= 0
            (FormulaKind::Lt(..), true) => Constraint::Le(t.plus_constant(1)?),
            (FormulaKind::Lt(..), false) => Constraint::Le(t.scale(-1)?),
            (_, true) => Constraint::Eq(t),
            (_, false) => Constraint::Ne(t),
        })
    }
}

fn fold_constant(op: TermOp, x: Coeff, y: Coeff) -> Option<Coeff> {
    match op {
        TermOp::Add => x.checked_add(y),
        TermOp::Sub => x.checked_sub(y),
        TermOp::Mul => x.checked_mul(y),
        TermOp::Div => x.checked_div(y),
        TermOp::Rem => x.checked_rem(y),
        TermOp::BitAnd => Some(x & y),
        TermOp::BitOr => Some(x | y),
        TermOp::BitXor => Some(x ^ y),
        TermOp::Shl => u32::try_from(y).ok().filter(|&s| s < 64).and_then(|s| x.checked_shl(s)),
        TermOp::Shr => u32::try_from(y).ok().filter(|&s| s < 64).and_then(|s| x.checked_shr(s)),
    }
}

/// Limits on the work spent on one consistency check.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_constraints: usize,
    pub max_case_splits: usize,
}

impl Limits {
    #[cfg(test)]
    fn with_splits(self, max_case_splits: usize) -> Self {
        Self { max_case_splits, ..self }
    }
}

/// Check whether the conjunction of `constraints` has an integer solution.
pub(crate) fn is_consistent(constraints: &[Constraint], limits: Limits) -> Result<bool, SolverError> {
    let mut eqs = Vec::new();
    let mut les = Vec::new();
    let mut nes = Vec::new();
    for c in constraints {
        match c {
            Constraint::Le(e) => les.push(e.clone()),
            Constraint::Eq(e) => eqs.push(e.clone()),
            Constraint::Ne(e) => nes.push(e.clone()),
        }
    }
    let mut splits = 0;
    split_disequalities(&eqs, les, &nes, limits, &mut splits)
}

fn split_disequalities(
    eqs: &[LinearExpr],
    les: Vec<LinearExpr>,
    nes: &[LinearExpr],
    limits: Limits,
    splits: &mut usize,
) -> Result<bool, SolverError> {
    if !solve(eqs.to_vec(), les.clone(), limits)? {
        return Ok(false);
    }
    let Some((ne, rest)) = nes.split_first() else {
        return Ok(true);
    };

    *splits += 1;
    if *splits > limits.max_case_splits {
        return Err(SolverError::ResourceLimit(format!(
            "more than {} case splits on disequalities",
            limits.max_case_splits
        )));
    }

    // t != 0  ⟺  t + 1 <= 0  ∨  -t + 1 <= 0
    for branch in [ne.plus_constant(1)?, ne.scale(-1)?.plus_constant(1)?] {
        let mut les = les.clone();
        les.push(branch);
        if split_disequalities(eqs, les, rest, limits, splits)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn solve(mut eqs: Vec<LinearExpr>, mut les: Vec<LinearExpr>, limits: Limits) -> Result<bool, SolverError> {
    while let Some(eq) = eqs.pop() {
        let g = eq.coeff_gcd();
        if g == 0 {
            if eq.constant != 0 {
                return Ok(false);
            }
            continue;
        }
        if eq.constant % g != 0 {
            return Ok(false);
        }

        match eq.coeffs.iter().find(|(_, &c)| c == 1 || c == -1) {
            Some((&x, &c)) => {
                // c·x + rest = 0  ⟹  x = -c·rest
                let mut rest = eq.clone();
                rest.coeffs.remove(&x);
                let replacement = rest.scale(-c)?;
                for e in eqs.iter_mut().chain(les.iter_mut()) {
                    *e = e.substitute(x, &replacement)?;
                }
            }
            None => {
                les.push(eq.clone());
                les.push(eq.scale(-1)?);
            }
        }
    }

    fourier_motzkin(les, limits)
}

/// Tighten `e <= 0` to integer coefficients with gcd 1.
///
/// Returns `None` for trivially true constraints.
fn normalize(e: LinearExpr) -> Result<Option<LinearExpr>, SolverError> {
    let g = e.coeff_gcd();
    if g == 0 {
        return Ok(if e.constant > 0 { Some(e) } else { None });
    }
    if g == 1 {
        return Ok(Some(e));
    }
    // Σ c·x + k <= 0  ⟹  Σ (c/g)·x + ⌈k/g⌉ <= 0
    let coeffs = e.coeffs.iter().map(|(&x, &c)| (x, c / g)).collect();
    let constant = -(-e.constant).div_euclid(g);
    Ok(Some(LinearExpr { coeffs, constant }))
}

fn fourier_motzkin(les: Vec<LinearExpr>, limits: Limits) -> Result<bool, SolverError> {
    let mut current = BTreeSet::new();
    for e in les {
        if let Some(e) = normalize(e)? {
            if e.coeffs.is_empty() {
                // Constant constraint `k <= 0` with `k > 0`.
                return Ok(false);
            }
            current.insert(e);
        }
    }

    loop {
        let vars: BTreeSet<usize> = current.iter().flat_map(|e| e.coeffs.keys().copied()).collect();

        // Eliminate the variable producing the fewest new constraints.
        let Some((x, _)) = vars
            .iter()
            .map(|&x| {
                let pos = current.iter().filter(|e| e.coeff(x) > 0).count();
                let neg = current.iter().filter(|e| e.coeff(x) < 0).count();
                (x, pos * neg)
            })
            .min_by_key(|&(x, cost)| (cost, x))
        else {
            return Ok(true);
        };

        let (with, without): (Vec<_>, Vec<_>) = current.into_iter().partition(|e| e.coeff(x) != 0);
        let (pos, neg): (Vec<_>, Vec<_>) = with.into_iter().partition(|e| e.coeff(x) > 0);

        let mut next: BTreeSet<LinearExpr> = without.into_iter().collect();
        for p in &pos {
            let a = p.coeff(x);
            for n in &neg {
                let b = -n.coeff(x);
                // b·p + a·n eliminates x.
                let combined = p.scale(b)?.add_scaled(n, a)?;
                if let Some(e) = normalize(combined)? {
                    if e.coeffs.is_empty() {
                        trace!("Fourier-Motzkin derived a contradiction eliminating x{}", x);
                        return Ok(false);
                    }
                    next.insert(e);
                }
            }
        }

        if next.len() > limits.max_constraints {
            return Err(SolverError::ResourceLimit(format!(
                "more than {} constraints during variable elimination",
                limits.max_constraints
            )));
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaManager;

    const LIMITS: Limits = Limits {
        max_constraints: 1000,
        max_case_splits: 64,
    };

    fn x(i: usize) -> LinearExpr {
        LinearExpr::variable(i)
    }

    fn le(e: LinearExpr) -> Constraint {
        Constraint::Le(e)
    }

    #[test]
    fn test_bounds() {
        // x <= 3 ∧ x >= 4
        let c = [le(x(0).plus_constant(-3).unwrap()), le(x(0).scale(-1).unwrap().plus_constant(4).unwrap())];
        assert!(!is_consistent(&c, LIMITS).unwrap());

        // x <= 3 ∧ x >= 3
        let c = [le(x(0).plus_constant(-3).unwrap()), le(x(0).scale(-1).unwrap().plus_constant(3).unwrap())];
        assert!(is_consistent(&c, LIMITS).unwrap());
    }

    #[test]
    fn test_transitivity() {
        // x < y ∧ y < z ∧ z < x
        let lt = |a: usize, b: usize| le(x(a).sub(&x(b)).unwrap().plus_constant(1).unwrap());
        assert!(!is_consistent(&[lt(0, 1), lt(1, 2), lt(2, 0)], LIMITS).unwrap());
        assert!(is_consistent(&[lt(0, 1), lt(1, 2)], LIMITS).unwrap());
    }

    #[test]
    fn test_integer_tightening() {
        // 2x >= 1 ∧ 2x <= 1 has only the rational solution 1/2.
        let two_x = x(0).scale(2).unwrap();
        let c = [
            le(two_x.scale(-1).unwrap().plus_constant(1).unwrap()),
            le(two_x.plus_constant(-1).unwrap()),
        ];
        assert!(!is_consistent(&c, LIMITS).unwrap());

        // 2x = 1
        let c = [Constraint::Eq(two_x.plus_constant(-1).unwrap())];
        assert!(!is_consistent(&c, LIMITS).unwrap());
    }

    #[test]
    fn test_equality_substitution() {
        // x = y + 1 ∧ y = 5 ∧ x <= 5
        let c = [
            Constraint::Eq(x(0).sub(&x(1)).unwrap().plus_constant(-1).unwrap()),
            Constraint::Eq(x(1).plus_constant(-5).unwrap()),
            le(x(0).plus_constant(-5).unwrap()),
        ];
        assert!(!is_consistent(&c, LIMITS).unwrap());
    }

    #[test]
    fn test_disequality_split() {
        // x != 0 ∧ x >= 0 ∧ x <= 0
        let c = [
            Constraint::Ne(x(0)),
            le(x(0).scale(-1).unwrap()),
            le(x(0)),
        ];
        assert!(!is_consistent(&c, LIMITS).unwrap());

        // x != 0 ∧ x >= 0
        let c = [Constraint::Ne(x(0)), le(x(0).scale(-1).unwrap())];
        assert!(is_consistent(&c, LIMITS).unwrap());
    }

    #[test]
    fn test_case_split_limit() {
        // Every branch stays feasible until the last disequality, which
        // contradicts `x7 = 0`.
        let mut c: Vec<_> = (0..8).map(|i| Constraint::Ne(x(i))).collect();
        c.push(le(x(7)));
        c.push(le(x(7).scale(-1).unwrap()));

        let limits = Limits {
            max_constraints: 1000,
            max_case_splits: 2,
        };
        assert!(matches!(is_consistent(&c, limits), Err(SolverError::ResourceLimit(_))));
        assert!(!is_consistent(&c, LIMITS.with_splits(1 << 10)).unwrap());
    }

    #[test]
    fn test_linearize() {
        let fmgr = FormulaManager::default();
        let mut lin = Linearizer::default();

        let v = fmgr.make_indexed_variable("x", 2);
        let t = fmgr.make_binary(
            TermOp::Add,
            fmgr.make_binary(TermOp::Mul, fmgr.make_number(3), v.clone()),
            fmgr.make_negate(v.clone()),
        );
        let e = lin.linearize(&t).unwrap();
        assert_eq!(e.coeffs.values().copied().collect::<Vec<_>>(), vec![2]);

        // Products of variables are opaque but stable.
        let sq = fmgr.make_binary(TermOp::Mul, v.clone(), v.clone());
        assert_eq!(lin.linearize(&sq).unwrap(), lin.linearize(&sq).unwrap());

        // Bitwise operations on constants are folded.
        let c = fmgr.make_binary(TermOp::BitAnd, fmgr.make_number(6), fmgr.make_number(3));
        assert_eq!(lin.linearize(&c).unwrap().as_constant(), Some(2));
    }
}
