#![forbid(unsafe_code)]

//! Flag inference.
//!
//! Instead of checking the overflow/exactness flags written in a rule, find
//! the weakest condition over them under which the rewrite is sound. Source
//! flags (`f_*_src`) may only be required set; target flags (`f_*_tgt`) may
//! only be required clear.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use z3::ast::{Ast, Bool, Dynamic, BV};
use z3::{Context, Solver};

use crate::error::VerifyError;
use crate::refine::{RefinementChecker, RoundContext};
use crate::solver::{collect_symbols, conjoin, disjoin, exists, forall, same_term, Answer, Z3Prover};

/// Flag condition established so far for the optimization being verified.
#[derive(Clone, Debug, Default)]
pub struct FlagState<'ctx> {
    established: Option<Bool<'ctx>>,
}

impl<'ctx> FlagState<'ctx> {
    pub fn new() -> Self {
        Self { established: None }
    }

    pub fn reset(&mut self) {
        self.established = None;
    }

    /// Established flags, as hypotheses for later obligations.
    pub fn hypotheses(&self) -> Vec<Bool<'ctx>> {
        self.established.iter().cloned().collect()
    }

    /// Conjoin a round's result into the established condition.
    pub fn absorb(&mut self, ctx: &'ctx Context, result: Bool<'ctx>) {
        let mut parts = self.hypotheses();
        parts.push(result);
        self.established = Some(conjoin(ctx, &parts).simplify());
    }

    pub fn current(&self) -> Option<&Bool<'ctx>> {
        self.established.as_ref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SymbolClass {
    Input,
    SourceFlag,
    TargetFlag,
    Undef,
}

fn classify(name: &str) -> Option<SymbolClass> {
    const INPUT_PREFIXES: [&str; 6] = ["%", "C", "icmp_", "alloca", "mem_", "ana_"];

    if INPUT_PREFIXES.iter().any(|p| name.starts_with(p)) {
        Some(SymbolClass::Input)
    } else if name.starts_with("f_") {
        if name.ends_with("_src") {
            Some(SymbolClass::SourceFlag)
        } else if name.ends_with("_tgt") {
            Some(SymbolClass::TargetFlag)
        } else {
            None
        }
    } else if name.starts_with("u_") || name.starts_with("undef") {
        Some(SymbolClass::Undef)
    } else {
        None
    }
}

fn as_flag<'ctx>(name: &str, sym: &Dynamic<'ctx>) -> Result<BV<'ctx>, VerifyError> {
    match sym.as_bv() {
        Some(bv) if bv.get_size() == 1 => Ok(bv),
        _ => Err(VerifyError::internal(format!("flag `{name}` is not a 1-bit vector"))),
    }
}

/// Closed formulas over flags only, one per flag-sensitive value.
#[derive(Debug, Default)]
pub struct FlagQuery<'ctx> {
    pub clauses: Vec<Bool<'ctx>>,
    pub src_flags: BTreeMap<String, BV<'ctx>>,
    pub tgt_flags: BTreeMap<String, BV<'ctx>>,
}

impl<'ctx> FlagQuery<'ctx> {
    /// For each shared value: `src defined ∧ src non-poison ∧ prev ∧ extra ⇒
    /// tgt defined ∧ tgt non-poison ∧ a = b`, with the value's undef
    /// variables existential and every input universal.
    pub fn build(
        ctx: &'ctx Context,
        round: &RoundContext<'_, 'ctx>,
        prev: &[Bool<'ctx>],
    ) -> Result<Self, VerifyError> {
        let mut query = FlagQuery::default();

        for (name, a, b) in round.shared_values() {
            let mut hyps = Vec::new();
            hyps.extend_from_slice(&a.defined);
            hyps.extend_from_slice(&a.poison);
            hyps.extend_from_slice(prev);
            hyps.extend_from_slice(round.extra);

            let mut goal = Vec::new();
            goal.extend_from_slice(&b.defined);
            goal.extend_from_slice(&b.poison);
            if !same_term(&a.value, &b.value) {
                goal.push(a.value._eq(&b.value));
            }

            let q = conjoin(ctx, &hyps).implies(&conjoin(ctx, &goal));
            if q.simplify().as_bool() == Some(true) {
                continue;
            }
            let mut parts = round.users_of(name).to_vec();
            parts.push(q);
            let q = conjoin(ctx, &parts);

            let mut inputs = Vec::new();
            for (sym_name, sym) in collect_symbols(&[Dynamic::from_ast(&q)]) {
                match classify(&sym_name) {
                    Some(SymbolClass::Input) => inputs.push(sym),
                    Some(SymbolClass::SourceFlag) => {
                        let flag = as_flag(&sym_name, &sym)?;
                        query.src_flags.insert(sym_name, flag);
                    }
                    Some(SymbolClass::TargetFlag) => {
                        let flag = as_flag(&sym_name, &sym)?;
                        query.tgt_flags.insert(sym_name, flag);
                    }
                    Some(SymbolClass::Undef) => {}
                    None => return Err(VerifyError::UnknownSymbol { name: sym_name }),
                }
            }

            let q = exists(ctx, &a.qvars, &q);
            query.clauses.push(forall(ctx, &inputs, &q));
        }
        Ok(query)
    }
}

/// Minimal flag assignments satisfying a query, enumerated on demand.
///
/// Each item is the conjunction of the flag literals the model forces; it is
/// blocked before the next solve.
pub struct FlagSolutions<'p, 'ctx> {
    prover: &'p mut Z3Prover<'ctx>,
    solver: Solver<'ctx>,
    src_flags: Vec<BV<'ctx>>,
    tgt_flags: Vec<BV<'ctx>>,
    done: bool,
}

impl<'p, 'ctx> FlagSolutions<'p, 'ctx> {
    pub fn new(prover: &'p mut Z3Prover<'ctx>, query: &FlagQuery<'ctx>) -> Self {
        let solver = prover.plain_solver();
        for clause in &query.clauses {
            solver.assert(clause);
        }
        Self {
            prover,
            solver,
            src_flags: query.src_flags.values().cloned().collect(),
            tgt_flags: query.tgt_flags.values().cloned().collect(),
            done: false,
        }
    }

    fn forced_literals(&self) -> Result<Bool<'ctx>, VerifyError> {
        let ctx = self.prover.ctx();
        let model = self
            .solver
            .get_model()
            .ok_or_else(|| VerifyError::internal("flag solver returned sat without a model"))?;

        let mut lits = Vec::new();
        // Unassigned flags evaluate to themselves and are left free.
        for (flags, forced) in [(&self.src_flags, 1), (&self.tgt_flags, 0)] {
            for flag in flags {
                let value = model.eval(flag, false).and_then(|v| v.as_u64());
                if value == Some(forced) {
                    lits.push(flag._eq(&BV::from_u64(ctx, forced, 1)));
                }
            }
        }
        Ok(conjoin(ctx, &lits))
    }
}

impl<'ctx> Iterator for FlagSolutions<'_, 'ctx> {
    type Item = Result<Bool<'ctx>, VerifyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.prover.check(&self.solver) {
            Ok(Answer::Sat) => self.forced_literals(),
            Ok(Answer::Unsat) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e),
        };
        match step {
            Ok(solution) => {
                self.solver.assert(&solution.not());
                Some(Ok(solution))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Weakest flag condition making this round's values refine, or the
/// counterexample when no flag assignment helps.
pub fn infer<'ctx>(
    checker: &mut RefinementChecker<'_, 'ctx>,
    round: &RoundContext<'_, 'ctx>,
    state: &FlagState<'ctx>,
) -> Result<Bool<'ctx>, VerifyError> {
    let ctx = checker.prover().ctx();
    let query = FlagQuery::build(ctx, round, &state.hypotheses())?;
    debug!(
        clauses = query.clauses.len(),
        src_flags = query.src_flags.len(),
        tgt_flags = query.tgt_flags.len(),
        "flag query"
    );

    let prover = checker.prover();
    let probe = prover.plain_solver();
    for clause in &query.clauses {
        probe.assert(clause);
    }
    if prover.check(&probe)? == Answer::Unsat {
        warn!("no flag assignment makes the rewrite sound");
        // Re-run the plain checks for a readable counterexample.
        checker.check_values(round)?;
        return Err(VerifyError::internal(
            "flag query is unsatisfiable but every value refines",
        ));
    }

    let solutions = FlagSolutions::new(checker.prover(), &query).collect::<Result<Vec<_>, _>>()?;
    Ok(disjoin(ctx, &solutions))
}
