#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use tracing::debug;
use z3::ast::{Ast, Bool, Dynamic, BV};
use z3::Model;

use crate::cache::{CacheOutcome, ProofCache};
use crate::encoding::{Encoding, ValueRecord};
use crate::error::{Obligation, VerifyError};
use crate::render::{dump_bindings, str_model, Counterexample};
use crate::solver::{conjoin, forall, smtlib_text, Answer, Z3Prover};
use crate::types::TypeModel;

/// Everything one type round checks against.
pub struct RoundContext<'r, 'ctx> {
    pub types: &'r TypeModel,
    pub src: &'r Encoding<'ctx>,
    pub tgt: &'r Encoding<'ctx>,
    /// Precondition, its definedness and both sides' allocation constraints.
    pub extra: &'r [Bool<'ctx>],
    pub users: &'r BTreeMap<String, Vec<Bool<'ctx>>>,
}

impl<'r, 'ctx> RoundContext<'r, 'ctx> {
    /// Values compared between the sides: defined on both, not a constant.
    pub fn shared_values(&self) -> impl Iterator<Item = (&'r str, &'r ValueRecord<'ctx>, &'r ValueRecord<'ctx>)> {
        let (src, tgt) = (self.src, self.tgt);
        src.values.iter().filter_map(move |(name, a)| {
            if name.starts_with('C') {
                return None;
            }
            tgt.values.get(name).map(|b| (name, a, b))
        })
    }

    pub fn users_of(&self, name: &str) -> &'r [Bool<'ctx>] {
        self.users.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Render a counterexample from `model`, dumping values up to `stop`.
    pub fn counterexample(
        &self,
        model: &Model<'ctx>,
        stop: Option<&str>,
        source_value: String,
        target_value: String,
    ) -> Result<Counterexample, VerifyError> {
        Ok(Counterexample {
            bindings: dump_bindings(model, self.types, [&self.src.values, &self.tgt.values], stop)?,
            source_value,
            target_value,
        })
    }
}

/// Proves the obligations of one round, memoizing proofs in the session cache.
pub struct RefinementChecker<'a, 'ctx> {
    prover: &'a mut Z3Prover<'ctx>,
    cache: &'a mut ProofCache,
}

impl<'a, 'ctx> RefinementChecker<'a, 'ctx> {
    pub fn new(prover: &'a mut Z3Prover<'ctx>, cache: &'a mut ProofCache) -> Self {
        Self { prover, cache }
    }

    pub fn prover(&mut self) -> &mut Z3Prover<'ctx> {
        &mut *self.prover
    }

    /// Prove `∀qvars. ∧conjuncts` unsatisfiable.
    ///
    /// A satisfying model is turned into the reported failure by `on_sat`.
    pub fn check_expr(
        &mut self,
        qvars: &[Dynamic<'ctx>],
        conjuncts: &[Bool<'ctx>],
        on_sat: impl FnOnce(&Model<'ctx>) -> VerifyError,
    ) -> Result<CacheOutcome, VerifyError> {
        let ctx = self.prover.ctx();
        let formula = forall(ctx, qvars, &conjoin(ctx, conjuncts));
        let key = smtlib_text(ctx, &formula);
        let prover = &mut *self.prover;

        let outcome = self.cache.get_or_prove(&key, || {
            let solver = prover.refinement_solver();
            solver.assert(&formula);
            match prover.check(&solver)? {
                Answer::Unsat => Ok(()),
                Answer::Sat => {
                    let model = solver
                        .get_model()
                        .ok_or_else(|| VerifyError::internal("refinement solver returned sat without a model"))?;
                    Err(on_sat(&model))
                }
            }
        })?;

        if outcome == CacheOutcome::Hit {
            debug!("obligation already proved");
        }
        Ok(outcome)
    }

    /// Blocks present on both sides must have equivalent entry conditions.
    pub fn check_blocks(&mut self, round: &RoundContext<'_, 'ctx>) -> Result<(), VerifyError> {
        let ctx = self.prover.ctx();
        for (block, src_pre) in &round.src.block_pres {
            // Blocks on one side only are left unconstrained.
            let Some(tgt_pre) = round.tgt.block_pres.get(block) else {
                continue;
            };
            let p1 = conjoin(ctx, src_pre);
            let p2 = conjoin(ctx, tgt_pre);

            let mut conjuncts = vec![p1._eq(&p2).not()];
            conjuncts.extend_from_slice(round.extra);

            self.check_expr(&[], &conjuncts, |model| {
                let source = str_model(model, &Dynamic::from_ast(&p1));
                let target = str_model(model, &Dynamic::from_ast(&p2));
                match round.counterexample(model, None, source, target) {
                    Ok(cex) => VerifyError::BlockPreconditionMismatch {
                        block: block.clone(),
                        counterexample: Box::new(cex),
                    },
                    Err(e) => e,
                }
            })?;
        }
        Ok(())
    }

    /// Definedness, poison and value refinement of every shared value.
    pub fn check_values(&mut self, round: &RoundContext<'_, 'ctx>) -> Result<(), VerifyError> {
        let ctx = self.prover.ctx();
        for (name, a, b) in round.shared_values() {
            let mut base = Vec::new();
            base.extend_from_slice(&a.defined);
            base.extend_from_slice(&a.poison);
            base.extend_from_slice(round.extra);
            base.extend_from_slice(round.users_of(name));

            let defined = conjoin(ctx, &b.defined);
            let non_poison = conjoin(ctx, &b.poison);
            let obligations = [
                (Obligation::Definedness, defined.not()),
                (Obligation::Poison, non_poison.not()),
                (Obligation::Value, a.value._eq(&b.value).not()),
            ];

            for (obligation, violated) in obligations {
                let mut conjuncts = base.clone();
                conjuncts.push(violated);
                self.check_expr(&a.qvars, &conjuncts, |model| {
                    value_failure(model, round, name, obligation, a, b)
                })?;
            }
        }
        Ok(())
    }

    /// A load at any address must return the same value on both sides.
    pub fn check_memory(&mut self, round: &RoundContext<'_, 'ctx>) -> Result<(), VerifyError> {
        let ctx = self.prover.ctx();
        let ptr_size = round
            .types
            .ptr_size()
            .ok_or_else(|| VerifyError::internal("type model has no pointer size"))?;
        let idx = BV::new_const(ctx, "idx", ptr_size);
        let v1 = round.src.memory.load(&idx);
        let v2 = round.tgt.memory.load(&idx);

        let mut conjuncts = round.extra.to_vec();
        conjuncts.push(v1._eq(&v2).not());

        self.check_expr(&round.src.memory.qvars, &conjuncts, |model| {
            let message = format!(
                "Mismatch in final memory state in ptr {}",
                str_model(model, &Dynamic::from_ast(&idx))
            );
            let source = str_model(model, &v1);
            let target = str_model(model, &v2);
            match round.counterexample(model, None, source, target) {
                Ok(cex) => VerifyError::MemoryMismatch {
                    message,
                    counterexample: Box::new(cex),
                },
                Err(e) => e,
            }
        })?;
        Ok(())
    }
}

fn value_failure<'ctx>(
    model: &Model<'ctx>,
    round: &RoundContext<'_, 'ctx>,
    name: &str,
    obligation: Obligation,
    a: &ValueRecord<'ctx>,
    b: &ValueRecord<'ctx>,
) -> VerifyError {
    let ty = match round.types.render_type(name) {
        Ok(ty) => ty,
        Err(e) => return e,
    };
    let (message, target) = match obligation {
        Obligation::Definedness => (
            format!("Domain of definedness of Target is smaller than Source's for {ty} {name}"),
            "undef".to_string(),
        ),
        Obligation::Poison => (
            format!("Domain of poisoness of Target is smaller than Source's for {ty} {name}"),
            "poison".to_string(),
        ),
        Obligation::Value => (
            format!("Mismatch in values of {ty} {name}"),
            str_model(model, &b.value),
        ),
    };
    let source = str_model(model, &a.value);
    match round.counterexample(model, Some(name), source, target) {
        Ok(cex) => VerifyError::Refinement {
            obligation,
            message,
            counterexample: Box::new(cex),
        },
        Err(e) => e,
    }
}
