#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use tracing::debug;
use z3::ast::{Ast, Bool, Dynamic, Int};
use z3::{Model, Solver};

use crate::encoding::{Optimization, TypingPart};
use crate::error::{TypingStage, VerifyError};
use crate::solver::{collect_symbols, conjoin, Answer, Z3Prover};
use crate::types::{PickOneType, TypeModel, PTR_SIZE_VAR, PTR_SIZES};

/// Lazy enumeration of every type assignment an optimization admits.
///
/// Each call to [`TypeSpace::next_round`] yields one assignment; the caller
/// checks it and hands it back to [`TypeSpace::block`]. Enumeration ends when
/// the typing solver becomes unsatisfiable, which proves every admissible
/// typing was visited.
pub struct TypeSpace<'ctx> {
    solver: Solver<'ctx>,
    negated: Solver<'ctx>,
    asserted: Vec<Bool<'ctx>>,
    vars: BTreeMap<String, Int<'ctx>>,
    pick_one: PickOneType,
    rounds: usize,
}

fn symbol_names<'ctx>(constraints: &[Bool<'ctx>]) -> Vec<String> {
    let roots = constraints.iter().map(|c| Dynamic::from_ast(c)).collect::<Vec<_>>();
    collect_symbols(&roots).into_keys().collect()
}

impl<'ctx> TypeSpace<'ctx> {
    pub fn new<O>(prover: &mut Z3Prover<'ctx>, opt: &O) -> Result<Self, VerifyError>
    where
        O: Optimization<'ctx> + ?Sized,
    {
        let ctx = prover.ctx();
        let mut space = TypeSpace {
            solver: prover.typing_solver(),
            negated: prover.typing_solver(),
            asserted: Vec::new(),
            vars: BTreeMap::new(),
            pick_one: PickOneType::new(),
            rounds: 0,
        };

        let pre = opt.type_constraints(TypingPart::Precondition, &space.pick_one);
        let src = opt.type_constraints(TypingPart::Source, &space.pick_one);
        let tgt = opt.type_constraints(TypingPart::Target, &space.pick_one);

        // Only one type per precondition-only variable matters.
        space.pick_one.register(symbol_names(&pre));
        for names in [symbol_names(&src), symbol_names(&tgt)] {
            space.pick_one.unregister(names.iter().map(String::as_str));
        }

        for (stage, constraints) in [
            (TypingStage::Precondition, &pre),
            (TypingStage::Source, &src),
            (TypingStage::Target, &tgt),
        ] {
            space.assert_all(constraints);
            if prover.check(&space.solver)? == Answer::Unsat {
                return Err(VerifyError::TypeInconsistency { stage });
            }
        }

        let ptr_size = Int::new_const(ctx, PTR_SIZE_VAR);
        let allowed = PTR_SIZES
            .iter()
            .map(|&n| ptr_size._eq(&Int::from_i64(ctx, n)))
            .collect::<Vec<_>>();
        space.assert_all(&[Bool::or(ctx, &allowed.iter().collect::<Vec<_>>())]);

        let typing = pre.iter().chain(&src).chain(&tgt).cloned().collect::<Vec<_>>();
        space.negated.assert(&conjoin(ctx, &typing).not());

        let roots = space.asserted.iter().map(|c| Dynamic::from_ast(c)).collect::<Vec<_>>();
        for (name, sym) in collect_symbols(&roots) {
            let var = sym
                .as_int()
                .ok_or_else(|| VerifyError::internal(format!("type variable `{name}` is not an integer")))?;
            space.vars.insert(name, var);
        }

        if prover.check(&space.solver)? == Answer::Sat {
            space.pick_pre_types(prover)?;
        }
        Ok(space)
    }

    fn assert_all(&mut self, constraints: &[Bool<'ctx>]) {
        for c in constraints {
            self.solver.assert(c);
            self.asserted.push(c.clone());
        }
    }

    fn model_value(&self, model: &Model<'ctx>, name: &str, var: &Int<'ctx>) -> Result<i64, VerifyError> {
        model
            .eval(var, true)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| VerifyError::internal(format!("no integer value for type variable `{name}`")))
    }

    /// Fix precondition-only widths to one representative, preferring at
    /// least 32 bits where the typing allows it.
    fn pick_pre_types(&mut self, prover: &mut Z3Prover<'ctx>) -> Result<(), VerifyError> {
        let ctx = prover.ctx();
        let model = self
            .solver
            .get_model()
            .ok_or_else(|| VerifyError::internal("typing solver returned sat without a model"))?;

        let scratch = prover.typing_solver();
        for a in &self.asserted {
            scratch.assert(a);
        }

        let mut free = Vec::new();
        for (name, var) in &self.vars {
            if self.pick_one.contains(name) && name.starts_with("size_") {
                free.push(var.clone());
            } else {
                let value = self.model_value(&model, name, var)?;
                scratch.assert(&var._eq(&Int::from_i64(ctx, value)));
            }
        }

        let wide = Int::from_i64(ctx, 32);
        for var in free {
            let pick = Bool::fresh_const(ctx, "pick");
            let prefer = var.ge(&wide);
            scratch.assert(&pick._eq(&prefer));
            if prover.check_assuming(&scratch, &[pick])? == Answer::Sat {
                debug!(var = %var, "pinning precondition-only width to >= 32");
                self.solver.assert(&prefer);
                self.asserted.push(prefer);
            }
        }

        match prover.check(&self.solver)? {
            Answer::Sat => Ok(()),
            Answer::Unsat => Err(VerifyError::internal(
                "pinning precondition types made the typing unsatisfiable",
            )),
        }
    }

    /// Next unexplored assignment, or `None` once every typing was covered.
    pub fn next_round(&mut self, prover: &mut Z3Prover<'ctx>) -> Result<Option<TypeModel>, VerifyError> {
        if prover.check(&self.solver)? == Answer::Unsat {
            return Ok(None);
        }
        let model = self
            .solver
            .get_model()
            .ok_or_else(|| VerifyError::internal("typing solver returned sat without a model"))?;

        let mut types = TypeModel::new();
        for (name, var) in &self.vars {
            types.insert(name.clone(), self.model_value(&model, name, var)?);
        }
        self.rounds += 1;
        debug!(round = self.rounds, ?types, "type assignment");
        Ok(Some(types))
    }

    /// Exclude `types` and every assignment that agrees with it on the
    /// literals that matter.
    ///
    /// A literal is dropped when the remaining ones still refute the negated
    /// typing; pick-one literals are always assumed and never blocked.
    pub fn block(&mut self, prover: &mut Z3Prover<'ctx>, types: &TypeModel) -> Result<(), VerifyError> {
        let ctx = prover.ctx();
        self.negated.push();
        let kept = self.minimize(prover, types);
        self.negated.pop(1);
        let kept = kept?;

        self.solver.assert(&conjoin(ctx, &kept).not());
        Ok(())
    }

    fn minimize(&self, prover: &mut Z3Prover<'ctx>, types: &TypeModel) -> Result<Vec<Bool<'ctx>>, VerifyError> {
        let ctx = prover.ctx();
        let mut req = Vec::new();
        let mut trackers = Vec::new();
        let mut literals = Vec::new();

        for (name, value) in types.iter() {
            let var = match self.vars.get(name) {
                Some(var) => var.clone(),
                None => Int::new_const(ctx, name),
            };
            let lit = var._eq(&Int::from_i64(ctx, value));
            let b = Bool::fresh_const(ctx, "blk");
            self.negated.assert(&b._eq(&lit));
            if self.pick_one.contains(name) {
                req.push(b);
            } else {
                trackers.push(b);
                literals.push(lit);
            }
        }

        let mut kept = Vec::new();
        for i in 0..trackers.len() {
            let mut assumptions = req.clone();
            assumptions.extend_from_slice(&trackers[i + 1..]);
            if prover.check_assuming(&self.negated, &assumptions)? != Answer::Unsat {
                req.push(trackers[i].clone());
                kept.push(literals[i].clone());
            }
        }

        if prover.check_assuming(&self.negated, &req)? != Answer::Unsat {
            return Err(VerifyError::internal(
                "minimized type literals no longer refute the negated typing",
            ));
        }
        Ok(kept)
    }

    pub fn pick_one(&self) -> &PickOneType {
        &self.pick_one
    }

    /// Assignments produced so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }
}
