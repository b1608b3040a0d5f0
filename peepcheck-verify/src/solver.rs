#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};

use tracing::warn;
use z3::ast::{Ast, Bool, Dynamic};
use z3::{AstKind, Context, Params, Probe, SatResult, SortKind, Solver, Tactic};

use crate::bench::BenchWriter;
use crate::config::VerifierConfig;
use crate::error::VerifyError;

/// A definite solver answer; "unknown" never gets this far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    Sat,
    Unsat,
}

/// Owns the Z3 context handle and everything every solver call shares:
/// parameters, incompleteness handling and benchmark capture.
pub struct Z3Prover<'ctx> {
    ctx: &'ctx Context,
    timeout_ms: Option<u32>,
    bench: Option<BenchWriter>,
    calls: u64,
}

impl<'ctx> Z3Prover<'ctx> {
    pub fn new(ctx: &'ctx Context, config: &VerifierConfig) -> Self {
        Self {
            ctx,
            timeout_ms: config.timeout_ms,
            bench: BenchWriter::for_dir(config.bench_dir.as_deref()),
            calls: 0,
        }
    }

    pub fn ctx(&self) -> &'ctx Context {
        self.ctx
    }

    /// Number of satisfiability checks issued so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn params(&self) -> Params<'ctx> {
        let mut params = Params::new(self.ctx);
        // Seeds stay at Z3's fixed defaults; module-prefixed seed keys change
        // answers of tactic and QF_LIA solvers on some libz3 releases.
        if let Some(ms) = self.timeout_ms {
            params.set_u32("timeout", ms);
        }
        params
    }

    fn configured(&self, solver: Solver<'ctx>) -> Solver<'ctx> {
        solver.set_params(&self.params());
        solver
    }

    pub fn plain_solver(&self) -> Solver<'ctx> {
        self.configured(Solver::new(self.ctx))
    }

    /// Solver for the linear integer typing constraints.
    pub fn typing_solver(&self) -> Solver<'ctx> {
        let solver = Solver::new_for_logic(self.ctx, "QF_LIA").unwrap_or_else(|| Solver::new(self.ctx));
        self.configured(solver)
    }

    /// Solver for refinement obligations:
    /// `(simplify; propagate-values)*; solve-eqs; is-qfbv ? qfbv : bv`.
    pub fn refinement_solver(&self) -> Solver<'ctx> {
        let ctx = self.ctx;
        let simp = Tactic::new(ctx, "simplify").and_then(&Tactic::new(ctx, "propagate-values"));
        let bv = Tactic::cond(
            ctx,
            &Probe::new(ctx, "is-qfbv"),
            &Tactic::new(ctx, "qfbv"),
            &Tactic::new(ctx, "bv"),
        );
        let tactic = Tactic::repeat(ctx, &simp, u32::MAX)
            .and_then(&Tactic::new(ctx, "solve-eqs"))
            .and_then(&bv);
        self.configured(tactic.solver())
    }

    pub fn check(&mut self, solver: &Solver<'ctx>) -> Result<Answer, VerifyError> {
        self.capture(solver, &[])?;
        self.calls += 1;
        Self::decide(solver, solver.check())
    }

    pub fn check_assuming(
        &mut self,
        solver: &Solver<'ctx>,
        assumptions: &[Bool<'ctx>],
    ) -> Result<Answer, VerifyError> {
        self.capture(solver, assumptions)?;
        self.calls += 1;
        Self::decide(solver, solver.check_assumptions(assumptions))
    }

    fn capture(&self, solver: &Solver<'ctx>, assumptions: &[Bool<'ctx>]) -> Result<(), VerifyError> {
        let Some(bench) = &self.bench else {
            return Ok(());
        };
        let mut text = solver.to_string();
        if !assumptions.is_empty() {
            let lits = assumptions.iter().map(|a| a.to_string()).collect::<Vec<_>>();
            text.push_str(&format!("\n(check-sat-assuming ({}))\n", lits.join(" ")));
        }
        bench.write(&text)?;
        Ok(())
    }

    fn decide(solver: &Solver<'ctx>, res: SatResult) -> Result<Answer, VerifyError> {
        match res {
            SatResult::Sat => Ok(Answer::Sat),
            SatResult::Unsat => Ok(Answer::Unsat),
            SatResult::Unknown => {
                let reason = solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "unknown".to_string());
                warn!(%reason, "solver gave up; verification incomplete");
                Err(VerifyError::SolverIncomplete { reason })
            }
        }
    }
}

/// SMT-LIB text of `formula` preceded by the declarations of its constants.
///
/// Constants print without their sort, so the declarations are what keeps
/// one obligation at two widths apart.
pub fn smtlib_text<'ctx>(ctx: &'ctx Context, formula: &Bool<'ctx>) -> String {
    let scratch = Solver::new(ctx);
    scratch.assert(formula);
    scratch.to_string()
}

/// Conjunction that folds the empty list to `true`.
pub fn conjoin<'ctx>(ctx: &'ctx Context, parts: &[Bool<'ctx>]) -> Bool<'ctx> {
    match parts {
        [] => Bool::from_bool(ctx, true),
        [one] => one.clone(),
        _ => {
            let refs = parts.iter().collect::<Vec<_>>();
            Bool::and(ctx, &refs)
        }
    }
}

pub fn disjoin<'ctx>(ctx: &'ctx Context, parts: &[Bool<'ctx>]) -> Bool<'ctx> {
    match parts {
        [] => Bool::from_bool(ctx, false),
        [one] => one.clone(),
        _ => {
            let refs = parts.iter().collect::<Vec<_>>();
            Bool::or(ctx, &refs)
        }
    }
}

pub fn forall<'ctx>(ctx: &'ctx Context, vars: &[Dynamic<'ctx>], body: &Bool<'ctx>) -> Bool<'ctx> {
    if vars.is_empty() {
        return body.clone();
    }
    let bounds = vars.iter().map(|v| v as &dyn Ast<'ctx>).collect::<Vec<_>>();
    z3::ast::forall_const(ctx, &bounds, &[], body)
}

pub fn exists<'ctx>(ctx: &'ctx Context, vars: &[Dynamic<'ctx>], body: &Bool<'ctx>) -> Bool<'ctx> {
    if vars.is_empty() {
        return body.clone();
    }
    let bounds = vars.iter().map(|v| v as &dyn Ast<'ctx>).collect::<Vec<_>>();
    z3::ast::exists_const(ctx, &bounds, &[], body)
}

/// Hash-consed terms share one node, so node identity is structural equality.
pub fn same_term<'ctx>(a: &impl Ast<'ctx>, b: &impl Ast<'ctx>) -> bool {
    a.get_z3_ast() as usize == b.get_z3_ast() as usize
}

/// Free non-boolean constants of `roots`, keyed by name.
///
/// Numerals and boolean constants are never reported; quantifier bodies are
/// not entered.
pub fn collect_symbols<'ctx>(roots: &[Dynamic<'ctx>]) -> BTreeMap<String, Dynamic<'ctx>> {
    let mut out = BTreeMap::new();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut stack = roots.to_vec();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.get_z3_ast() as usize) {
            continue;
        }
        if node.kind() != AstKind::App {
            continue;
        }
        if node.num_children() > 0 {
            stack.extend(node.children());
            continue;
        }
        if node.sort_kind() == SortKind::Bool {
            continue;
        }
        out.insert(node.decl().name(), node);
    }
    out
}
