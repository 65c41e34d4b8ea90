//! Solver-neutral constraint model
//!
//! Variables are plain handles into the [`Model`]; constraints are data. A
//! [`Backend`](super::Backend) translates the whole model at once, so model
//! construction never touches solver state.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntVar(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoolVar(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalVar(pub(crate) usize);

/// A boolean variable or its negation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lit {
    pub var: BoolVar,
    pub negated: bool,
}

impl Lit {
    pub fn not(self) -> Lit {
        Lit {
            var: self.var,
            negated: !self.negated,
        }
    }
}

impl BoolVar {
    pub fn lit(self) -> Lit {
        Lit {
            var: self,
            negated: false,
        }
    }

    pub fn not(self) -> Lit {
        self.lit().not()
    }
}

impl From<BoolVar> for Lit {
    fn from(var: BoolVar) -> Self {
        var.lit()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Term {
    Int(IntVar),
    /// 1 if the literal holds, 0 otherwise
    Bool(Lit),
}

/// `sum(coeff * term) + constant`
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LinearExpr {
    pub terms: Vec<(i64, Term)>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn constant(c: i64) -> Self {
        LinearExpr {
            terms: Vec::new(),
            constant: c,
        }
    }

    pub fn term(coeff: i64, term: Term) -> Self {
        LinearExpr {
            terms: vec![(coeff, term)],
            constant: 0,
        }
    }

    pub fn sum<T: Into<LinearExpr>>(items: impl IntoIterator<Item = T>) -> Self {
        items
            .into_iter()
            .fold(LinearExpr::default(), |acc, item| acc + item.into())
    }

    fn relation(self, rhs: impl Into<LinearExpr>, cmp: Cmp) -> Relation {
        Relation {
            expr: self - rhs.into(),
            cmp,
        }
    }

    pub fn le(self, rhs: impl Into<LinearExpr>) -> Relation {
        self.relation(rhs, Cmp::Le)
    }

    pub fn ge(self, rhs: impl Into<LinearExpr>) -> Relation {
        self.relation(rhs, Cmp::Ge)
    }

    pub fn lt(self, rhs: impl Into<LinearExpr>) -> Relation {
        self.relation(rhs, Cmp::Lt)
    }

    pub fn gt(self, rhs: impl Into<LinearExpr>) -> Relation {
        self.relation(rhs, Cmp::Gt)
    }

    pub fn eq(self, rhs: impl Into<LinearExpr>) -> Relation {
        self.relation(rhs, Cmp::Eq)
    }

    pub fn ne(self, rhs: impl Into<LinearExpr>) -> Relation {
        self.relation(rhs, Cmp::Ne)
    }
}

impl From<IntVar> for LinearExpr {
    fn from(v: IntVar) -> Self {
        LinearExpr::term(1, Term::Int(v))
    }
}

impl From<BoolVar> for LinearExpr {
    fn from(v: BoolVar) -> Self {
        LinearExpr::term(1, Term::Bool(v.lit()))
    }
}

impl From<Lit> for LinearExpr {
    fn from(l: Lit) -> Self {
        LinearExpr::term(1, Term::Bool(l))
    }
}

impl From<i64> for LinearExpr {
    fn from(c: i64) -> Self {
        LinearExpr::constant(c)
    }
}

// lets untyped integer literals act as constants
impl From<i32> for LinearExpr {
    fn from(c: i32) -> Self {
        LinearExpr::constant(i64::from(c))
    }
}

impl From<&LinearExpr> for LinearExpr {
    fn from(e: &LinearExpr) -> Self {
        e.clone()
    }
}

impl<T: Into<LinearExpr>> Add<T> for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: T) -> LinearExpr {
        let rhs = rhs.into();
        self.terms.extend(rhs.terms);
        self.constant += rhs.constant;
        self
    }
}

impl<T: Into<LinearExpr>> Sub<T> for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: T) -> LinearExpr {
        self + (-rhs.into())
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> LinearExpr {
        self * -1
    }
}

impl Mul<i64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(self, k: i64) -> LinearExpr {
        LinearExpr {
            terms: self.terms.into_iter().map(|(c, t)| (c * k, t)).collect(),
            constant: self.constant * k,
        }
    }
}

impl Add<i64> for IntVar {
    type Output = LinearExpr;

    fn add(self, rhs: i64) -> LinearExpr {
        LinearExpr::from(self) + rhs
    }
}

impl Add<IntVar> for IntVar {
    type Output = LinearExpr;

    fn add(self, rhs: IntVar) -> LinearExpr {
        LinearExpr::from(self) + rhs
    }
}

impl Sub<i64> for IntVar {
    type Output = LinearExpr;

    fn sub(self, rhs: i64) -> LinearExpr {
        LinearExpr::from(self) - rhs
    }
}

impl Sub<IntVar> for IntVar {
    type Output = LinearExpr;

    fn sub(self, rhs: IntVar) -> LinearExpr {
        LinearExpr::from(self) - rhs
    }
}

impl Mul<i64> for IntVar {
    type Output = LinearExpr;

    fn mul(self, k: i64) -> LinearExpr {
        LinearExpr::term(k, Term::Int(self))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cmp {
    Le,
    Ge,
    Lt,
    Gt,
    Eq,
    Ne,
}

impl Cmp {
    pub fn holds(self, v: i64) -> bool {
        match self {
            Cmp::Le => v <= 0,
            Cmp::Ge => v >= 0,
            Cmp::Lt => v < 0,
            Cmp::Gt => v > 0,
            Cmp::Eq => v == 0,
            Cmp::Ne => v != 0,
        }
    }
}

/// `expr cmp 0`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub expr: LinearExpr,
    pub cmp: Cmp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Linear(Relation),
    ExactlyOne(Vec<Lit>),
    BoolOr(Vec<Lit>),
    Implication(Lit, Lit),
    AllDifferent(Vec<LinearExpr>),
    /// Present intervals pairwise disjoint
    NoOverlap(Vec<IntervalVar>),
    AbsEq {
        target: IntVar,
        expr: LinearExpr,
    },
    MaxEq {
        target: IntVar,
        exprs: Vec<LinearExpr>,
    },
}

/// A constraint, active only when all enforcement literals hold
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub enforce: Vec<Lit>,
}

impl Constraint {
    pub fn only_enforce_if(&mut self, lits: impl IntoIterator<Item = Lit>) -> &mut Self {
        self.enforce.extend(lits);
        self
    }
}

#[derive(Clone, Debug)]
pub struct IntVarInfo {
    pub name: String,
    pub lb: i64,
    pub ub: i64,
}

/// Half-open interval `[start, end)`, optionally present
#[derive(Clone, Debug)]
pub struct Interval {
    pub name: String,
    pub start: LinearExpr,
    pub end: LinearExpr,
    pub presence: Option<Lit>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Clone, Debug)]
pub struct Objective {
    pub sense: Sense,
    pub expr: LinearExpr,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub ints: usize,
    pub bools: usize,
    pub intervals: usize,
    pub constraints: usize,
}

impl fmt::Display for ModelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} int vars, {} bool vars, {} intervals, {} constraints",
            self.ints, self.bools, self.intervals, self.constraints
        )
    }
}

/// Outcome of a solver run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// Proven optimal (or any solution, without objective)
    Optimal,
    /// A solution, optimality not proven before the timeout
    Feasible,
    Infeasible,
    /// Neither a solution nor a proof of infeasibility
    Unknown,
}

impl SolveStatus {
    pub fn has_solution(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

/// Variable assignment returned by a backend
#[derive(Clone, Debug)]
pub struct Solution {
    pub status: SolveStatus,
    pub ints: Vec<i64>,
    pub bools: Vec<bool>,
    pub objective: Option<i64>,
    pub wall_time: std::time::Duration,
}

impl Solution {
    pub fn empty(status: SolveStatus, wall_time: std::time::Duration) -> Self {
        Solution {
            status,
            ints: Vec::new(),
            bools: Vec::new(),
            objective: None,
            wall_time,
        }
    }

    pub fn value(&self, v: IntVar) -> i64 {
        self.ints.get(v.0).copied().unwrap_or(0)
    }

    pub fn bool_value(&self, v: BoolVar) -> bool {
        self.bools.get(v.0).copied().unwrap_or(false)
    }

    pub fn lit_value(&self, l: Lit) -> bool {
        self.bool_value(l.var) != l.negated
    }

    pub fn eval(&self, e: &LinearExpr) -> i64 {
        e.terms
            .iter()
            .map(|(c, t)| {
                c * match t {
                    Term::Int(v) => self.value(*v),
                    Term::Bool(l) => i64::from(self.lit_value(*l)),
                }
            })
            .sum::<i64>()
            + e.constant
    }
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    ints: Vec<IntVarInfo>,
    bools: Vec<String>,
    intervals: Vec<Interval>,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_int_var(&mut self, lb: i64, ub: i64, name: impl Into<String>) -> IntVar {
        self.ints.push(IntVarInfo {
            name: name.into(),
            lb,
            ub,
        });
        IntVar(self.ints.len() - 1)
    }

    pub fn add_bool_var(&mut self, name: impl Into<String>) -> BoolVar {
        self.bools.push(name.into());
        BoolVar(self.bools.len() - 1)
    }

    pub fn add_interval_var(
        &mut self,
        start: impl Into<LinearExpr>,
        end: impl Into<LinearExpr>,
        presence: Option<Lit>,
        name: impl Into<String>,
    ) -> IntervalVar {
        self.intervals.push(Interval {
            name: name.into(),
            start: start.into(),
            end: end.into(),
            presence,
        });
        IntervalVar(self.intervals.len() - 1)
    }

    fn push(&mut self, kind: ConstraintKind) -> &mut Constraint {
        self.constraints.push(Constraint {
            kind,
            enforce: Vec::new(),
        });
        let last = self.constraints.len() - 1;
        &mut self.constraints[last]
    }

    pub fn add_linear_constraint(&mut self, rel: Relation) -> &mut Constraint {
        self.push(ConstraintKind::Linear(rel))
    }

    pub fn add_exactly_one(&mut self, lits: impl IntoIterator<Item = Lit>) -> &mut Constraint {
        self.push(ConstraintKind::ExactlyOne(lits.into_iter().collect()))
    }

    pub fn add_bool_or(&mut self, lits: impl IntoIterator<Item = Lit>) -> &mut Constraint {
        self.push(ConstraintKind::BoolOr(lits.into_iter().collect()))
    }

    pub fn add_implication(&mut self, a: impl Into<Lit>, b: impl Into<Lit>) -> &mut Constraint {
        self.push(ConstraintKind::Implication(a.into(), b.into()))
    }

    pub fn add_all_different(
        &mut self,
        exprs: impl IntoIterator<Item = LinearExpr>,
    ) -> &mut Constraint {
        self.push(ConstraintKind::AllDifferent(exprs.into_iter().collect()))
    }

    pub fn add_no_overlap(
        &mut self,
        intervals: impl IntoIterator<Item = IntervalVar>,
    ) -> &mut Constraint {
        self.push(ConstraintKind::NoOverlap(intervals.into_iter().collect()))
    }

    pub fn add_abs_eq(&mut self, target: IntVar, expr: impl Into<LinearExpr>) -> &mut Constraint {
        self.push(ConstraintKind::AbsEq {
            target,
            expr: expr.into(),
        })
    }

    pub fn add_max_eq(
        &mut self,
        target: IntVar,
        exprs: impl IntoIterator<Item = LinearExpr>,
    ) -> &mut Constraint {
        self.push(ConstraintKind::MaxEq {
            target,
            exprs: exprs.into_iter().collect(),
        })
    }

    /// Force a literal to a fixed value
    pub fn fix(&mut self, lit: impl Into<Lit>, value: bool) {
        let lit = lit.into();
        let lit = if value { lit } else { lit.not() };
        self.push(ConstraintKind::BoolOr(vec![lit]));
    }

    pub fn minimize(&mut self, expr: impl Into<LinearExpr>) {
        self.objective = Some(Objective {
            sense: Sense::Minimize,
            expr: expr.into(),
        });
    }

    pub fn maximize(&mut self, expr: impl Into<LinearExpr>) {
        self.objective = Some(Objective {
            sense: Sense::Maximize,
            expr: expr.into(),
        });
    }

    pub fn clear_objective(&mut self) {
        self.objective = None;
    }

    pub fn int_vars(&self) -> &[IntVarInfo] {
        &self.ints
    }

    pub fn bool_vars(&self) -> &[String] {
        &self.bools
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn interval(&self, iv: IntervalVar) -> &Interval {
        &self.intervals[iv.0]
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            ints: self.ints.len(),
            bools: self.bools.len(),
            intervals: self.intervals.len(),
            constraints: self.constraints.len(),
        }
    }

    fn interval_present(&self, sol: &Solution, iv: &Interval) -> bool {
        iv.presence.map_or(true, |l| sol.lit_value(l))
    }

    /// Whether an (unenforced) constraint holds under the assignment
    pub fn satisfied(&self, sol: &Solution, kind: &ConstraintKind) -> bool {
        match kind {
            ConstraintKind::Linear(rel) => rel.cmp.holds(sol.eval(&rel.expr)),
            ConstraintKind::ExactlyOne(lits) => {
                lits.iter().filter(|l| sol.lit_value(**l)).count() == 1
            }
            ConstraintKind::BoolOr(lits) => lits.iter().any(|l| sol.lit_value(*l)),
            ConstraintKind::Implication(a, b) => !sol.lit_value(*a) || sol.lit_value(*b),
            ConstraintKind::AllDifferent(exprs) => {
                let mut values: Vec<i64> = exprs.iter().map(|e| sol.eval(e)).collect();
                values.sort_unstable();
                values.windows(2).all(|w| w[0] != w[1])
            }
            ConstraintKind::NoOverlap(ivs) => {
                let present: Vec<(i64, i64)> = ivs
                    .iter()
                    .map(|iv| &self.intervals[iv.0])
                    .filter(|iv| self.interval_present(sol, iv))
                    .map(|iv| (sol.eval(&iv.start), sol.eval(&iv.end)))
                    .collect();
                present.iter().enumerate().all(|(i, a)| {
                    present[i + 1..]
                        .iter()
                        .all(|b| a.1 <= b.0 || b.1 <= a.0 || a.0 == a.1 || b.0 == b.1)
                })
            }
            ConstraintKind::AbsEq { target, expr } => sol.value(*target) == sol.eval(expr).abs(),
            ConstraintKind::MaxEq { target, exprs } => {
                exprs.iter().map(|e| sol.eval(e)).max() == Some(sol.value(*target))
            }
        }
    }

    /// Indices of constraints (and variable bounds) the assignment violates
    pub fn violations(&self, sol: &Solution) -> Vec<String> {
        let mut violated = Vec::new();
        for (i, info) in self.ints.iter().enumerate() {
            let v = sol.value(IntVar(i));
            if v < info.lb || v > info.ub {
                violated.push(format!("{} = {} outside [{}, {}]", info.name, v, info.lb, info.ub));
            }
        }
        for iv in &self.intervals {
            if self.interval_present(sol, iv) && sol.eval(&iv.start) > sol.eval(&iv.end) {
                violated.push(format!("interval {} ends before it starts", iv.name));
            }
        }
        for (i, c) in self.constraints.iter().enumerate() {
            let active = c.enforce.iter().all(|l| sol.lit_value(*l));
            if active && !self.satisfied(sol, &c.kind) {
                violated.push(format!("constraint #{}: {:?}", i, c.kind));
            }
        }
        violated
    }
}
