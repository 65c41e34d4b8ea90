use super::model::{
    Cmp, ConstraintKind, IntervalVar, LinearExpr, Lit, Model, Sense, Solution, SolveStatus, Term,
};
use super::{Backend, BackendError, SolveParams};
use log::{debug, info, warn};
use std::time::Instant;
use z3::ast::{Ast, Bool, Int};
use z3::{Config, Context, Optimize, Params, SatResult};

/// Backend driving z3's optimizing solver
#[derive(Clone, Copy, Debug, Default)]
pub struct Z3Backend;

struct Encoder<'ctx> {
    context: &'ctx Context,
    ints: Vec<Int<'ctx>>,
    bools: Vec<Bool<'ctx>>,
}

impl<'ctx> Encoder<'ctx> {
    fn new(context: &'ctx Context, model: &Model) -> Self {
        let ints = model
            .int_vars()
            .iter()
            .enumerate()
            .map(|(i, v)| Int::new_const(context, format!("{}#{}", v.name, i)))
            .collect();
        let bools = model
            .bool_vars()
            .iter()
            .enumerate()
            .map(|(i, name)| Bool::new_const(context, format!("{}#{}", name, i)))
            .collect();
        Self {
            context,
            ints,
            bools,
        }
    }

    fn lit(&self, l: Lit) -> Bool<'ctx> {
        let b = self.bools[l.var.0].clone();
        if l.negated {
            b.not()
        } else {
            b
        }
    }

    fn int(&self, n: i64) -> Int<'ctx> {
        Int::from_i64(self.context, n)
    }

    fn linear(&self, e: &LinearExpr) -> Int<'ctx> {
        let mut parts: Vec<Int<'ctx>> = e
            .terms
            .iter()
            .map(|(c, t)| {
                let v = match t {
                    Term::Int(v) => self.ints[v.0].clone(),
                    Term::Bool(l) => self.lit(*l).ite(&self.int(1), &self.int(0)),
                };
                if *c == 1 {
                    v
                } else {
                    Int::mul(self.context, &[&self.int(*c), &v])
                }
            })
            .collect();
        if e.constant != 0 || parts.is_empty() {
            parts.push(self.int(e.constant));
        }
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let refs: Vec<&Int<'ctx>> = parts.iter().collect();
        Int::add(self.context, &refs)
    }

    fn relation(&self, e: &LinearExpr, cmp: Cmp) -> Bool<'ctx> {
        let lhs = self.linear(e);
        let zero = self.int(0);
        match cmp {
            Cmp::Le => lhs.le(&zero),
            Cmp::Ge => lhs.ge(&zero),
            Cmp::Lt => lhs.lt(&zero),
            Cmp::Gt => lhs.gt(&zero),
            Cmp::Eq => lhs._eq(&zero),
            Cmp::Ne => lhs._eq(&zero).not(),
        }
    }

    fn interval_parts(&self, model: &Model, iv: IntervalVar) -> (Int<'ctx>, Int<'ctx>, Bool<'ctx>) {
        let interval = model.interval(iv);
        let present = match interval.presence {
            Some(l) => self.lit(l),
            None => Bool::from_bool(self.context, true),
        };
        (
            self.linear(&interval.start),
            self.linear(&interval.end),
            present,
        )
    }

    fn constraint(&self, model: &Model, kind: &ConstraintKind) -> Bool<'ctx> {
        match kind {
            ConstraintKind::Linear(rel) => self.relation(&rel.expr, rel.cmp),
            ConstraintKind::ExactlyOne(lits) => {
                if lits.is_empty() {
                    return Bool::from_bool(self.context, false);
                }
                let bs: Vec<Bool<'ctx>> = lits.iter().map(|l| self.lit(*l)).collect();
                let weighted: Vec<(&Bool<'ctx>, i32)> = bs.iter().map(|b| (b, 1)).collect();
                Bool::pb_eq(self.context, &weighted, 1)
            }
            ConstraintKind::BoolOr(lits) => {
                let bs: Vec<Bool<'ctx>> = lits.iter().map(|l| self.lit(*l)).collect();
                let refs: Vec<&Bool<'ctx>> = bs.iter().collect();
                Bool::or(self.context, &refs)
            }
            ConstraintKind::Implication(a, b) => self.lit(*a).implies(&self.lit(*b)),
            ConstraintKind::AllDifferent(exprs) => {
                if exprs.len() < 2 {
                    return Bool::from_bool(self.context, true);
                }
                let vals: Vec<Int<'ctx>> = exprs.iter().map(|e| self.linear(e)).collect();
                let refs: Vec<&Int<'ctx>> = vals.iter().collect();
                Int::distinct(self.context, &refs)
            }
            ConstraintKind::NoOverlap(ivs) => {
                let parts: Vec<_> = ivs.iter().map(|iv| self.interval_parts(model, *iv)).collect();
                let mut clauses = Vec::new();
                for (i, (sa, ea, pa)) in parts.iter().enumerate() {
                    for (sb, eb, pb) in &parts[i + 1..] {
                        let both = Bool::and(self.context, &[pa, pb]);
                        let apart = Bool::or(
                            self.context,
                            &[&ea.le(sb), &eb.le(sa), &sa._eq(ea), &sb._eq(eb)],
                        );
                        clauses.push(both.implies(&apart));
                    }
                }
                let refs: Vec<&Bool<'ctx>> = clauses.iter().collect();
                Bool::and(self.context, &refs)
            }
            ConstraintKind::AbsEq { target, expr } => {
                let v = self.linear(expr);
                let abs = v.ge(&self.int(0)).ite(&v, &v.unary_minus());
                self.ints[target.0]._eq(&abs)
            }
            ConstraintKind::MaxEq { target, exprs } => {
                let t = &self.ints[target.0];
                let vals: Vec<Int<'ctx>> = exprs.iter().map(|e| self.linear(e)).collect();
                let bounds: Vec<Bool<'ctx>> = vals.iter().map(|v| t.ge(v)).collect();
                let attained: Vec<Bool<'ctx>> = vals.iter().map(|v| t._eq(v)).collect();
                let bound_refs: Vec<&Bool<'ctx>> = bounds.iter().collect();
                let attained_refs: Vec<&Bool<'ctx>> = attained.iter().collect();
                Bool::and(
                    self.context,
                    &[
                        &Bool::and(self.context, &bound_refs),
                        &Bool::or(self.context, &attained_refs),
                    ],
                )
            }
        }
    }
}

impl Backend for Z3Backend {
    fn name(&self) -> &'static str {
        "z3"
    }

    fn solve(&mut self, model: &Model, params: &SolveParams) -> Result<Solution, BackendError> {
        let start = Instant::now();
        let mut cfg = Config::new();
        cfg.set_model_generation(true);
        if let Some(timeout) = params.timeout {
            cfg.set_timeout_msec(timeout.as_millis() as u64);
        }
        let context = Context::new(&cfg);
        let opt = Optimize::new(&context);
        if let Some(seed) = params.random_seed {
            // scoped to this solver instance, other contexts keep their seed
            let mut p = Params::new(&context);
            p.set_u32("random_seed", seed);
            opt.set_params(&p);
        }
        let enc = Encoder::new(&context, model);

        debug!("encoding model for z3: {}", model.stats());
        for (i, info) in model.int_vars().iter().enumerate() {
            let v = &enc.ints[i];
            opt.assert(&v.ge(&enc.int(info.lb)));
            opt.assert(&v.le(&enc.int(info.ub)));
        }
        for iv in model.intervals() {
            if let Some(l) = iv.presence {
                let ordered = enc.linear(&iv.start).le(&enc.linear(&iv.end));
                opt.assert(&enc.lit(l).implies(&ordered));
            } else {
                opt.assert(&enc.linear(&iv.start).le(&enc.linear(&iv.end)));
            }
        }
        for c in model.constraints() {
            let body = enc.constraint(model, &c.kind);
            if c.enforce.is_empty() {
                opt.assert(&body);
            } else {
                let guards: Vec<Bool<'_>> = c.enforce.iter().map(|l| enc.lit(*l)).collect();
                let refs: Vec<&Bool<'_>> = guards.iter().collect();
                opt.assert(&Bool::and(&context, &refs).implies(&body));
            }
        }
        let objective = model.objective().map(|o| (o.sense, enc.linear(&o.expr)));
        if let Some((sense, expr)) = &objective {
            match sense {
                Sense::Minimize => opt.minimize(expr),
                Sense::Maximize => opt.maximize(expr),
            }
        }

        let result = opt.check(&[]);
        let wall_time = start.elapsed();
        let z3_model = match result {
            SatResult::Unsat => {
                info!("z3: infeasible after {:?}", wall_time);
                return Ok(Solution::empty(SolveStatus::Infeasible, wall_time));
            }
            SatResult::Sat | SatResult::Unknown => opt.get_model(),
        };
        let Some(z3_model) = z3_model else {
            info!("z3: no solution within {:?}", wall_time);
            return Ok(Solution::empty(SolveStatus::Unknown, wall_time));
        };

        let ints = enc
            .ints
            .iter()
            .map(|v| {
                z3_model
                    .eval(v, true)
                    .and_then(|x| x.as_i64())
                    .ok_or_else(|| BackendError::Solver(format!("cannot read back {}", v)))
            })
            .collect::<Result<Vec<i64>, _>>()?;
        let bools = enc
            .bools
            .iter()
            .map(|b| {
                z3_model
                    .eval(b, true)
                    .and_then(|x| x.as_bool())
                    .ok_or_else(|| BackendError::Solver(format!("cannot read back {}", b)))
            })
            .collect::<Result<Vec<bool>, _>>()?;
        let objective_value = match &objective {
            Some((_, expr)) => z3_model.eval(expr, true).and_then(|x| x.as_i64()),
            None => None,
        };

        let status = if result == SatResult::Sat {
            SolveStatus::Optimal
        } else {
            SolveStatus::Feasible
        };
        let solution = Solution {
            status,
            ints,
            bools,
            objective: objective_value,
            wall_time,
        };

        let violations = model.violations(&solution);
        if let Some(first) = violations.first() {
            if status == SolveStatus::Feasible {
                // partial model from an interrupted search
                warn!("z3 stopped with an incomplete model, discarding it");
                return Ok(Solution::empty(SolveStatus::Unknown, wall_time));
            }
            return Err(BackendError::InvalidModel {
                count: violations.len(),
                first: first.clone(),
            });
        }

        info!(
            "z3: {:?} after {:?}, objective {:?}",
            status, wall_time, objective_value
        );
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::model::LinearExpr;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimize_with_no_overlap() {
        let mut m = Model::new();
        let a = m.add_int_var(0, 10, "a");
        let b = m.add_int_var(0, 10, "b");
        let ia = m.add_interval_var(a, a + 3, None, "ia");
        let ib = m.add_interval_var(b, b + 2, None, "ib");
        m.add_no_overlap([ia, ib]);
        m.add_linear_constraint(LinearExpr::from(b).ge(a));
        m.minimize(b);

        let sol = Z3Backend.solve(&m, &SolveParams::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_eq!(sol.value(b), 3);
        assert_eq!(sol.objective, Some(3));
    }

    #[test]
    fn test_exactly_one_and_enforcement() {
        let mut m = Model::new();
        let x = m.add_bool_var("x");
        let y = m.add_bool_var("y");
        let n = m.add_int_var(0, 5, "n");
        m.add_exactly_one([x.lit(), y.lit()]);
        m.add_linear_constraint(LinearExpr::from(n).eq(4))
            .only_enforce_if([x.lit()]);
        m.add_linear_constraint(LinearExpr::from(n).le(2));

        let sol = Z3Backend.solve(&m, &SolveParams::default()).unwrap();
        assert!(sol.bool_value(y));
        assert!(!sol.bool_value(x));
        assert!(m.violations(&sol).is_empty());
    }

    fn seeded_minimum(seed: u32) -> Option<i64> {
        let mut m = Model::new();
        let a = m.add_int_var(0, 10, "a");
        let b = m.add_int_var(0, 10, "b");
        m.add_linear_constraint((a + b).ge(7));
        m.minimize(a + b + b);
        let params = SolveParams {
            random_seed: Some(seed),
            ..SolveParams::default()
        };
        let sol = Z3Backend.solve(&m, &params).ok()?;
        assert_eq!(sol.status, SolveStatus::Optimal);
        sol.objective
    }

    #[test]
    fn test_concurrent_seeded_solves() {
        let handles: Vec<_> = (1..=4)
            .map(|seed| std::thread::spawn(move || seeded_minimum(seed)))
            .collect();
        for h in handles {
            assert_eq!(h.join().ok().flatten(), Some(7));
        }
    }

    #[test]
    fn test_infeasible() {
        let mut m = Model::new();
        let x = m.add_int_var(0, 2, "x");
        m.add_linear_constraint(LinearExpr::from(x).gt(5));
        let sol = Z3Backend.solve(&m, &SolveParams::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Infeasible);
    }
}
