#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use tracing::{debug, info};
use z3::ast::Bool;
use z3::Context;

use crate::cache::ProofCache;
use crate::config::VerifierConfig;
use crate::encoding::{user_constraints, EncodeOptions, Optimization, Side};
use crate::error::VerifyError;
use crate::explore::TypeSpace;
use crate::flags::{self, FlagState};
use crate::refine::{RefinementChecker, RoundContext};
use crate::report::{render_header, OptimizationReport};
use crate::solver::Z3Prover;
use crate::types::TypeModel;

/// State shared by every check of a run.
///
/// The proof cache lives for the whole run; the flag state is reset at the
/// start of each optimization.
#[derive(Debug, Default)]
pub struct SessionState<'ctx> {
    pub cache: ProofCache,
    pub flags: FlagState<'ctx>,
}

pub struct Verifier<'ctx> {
    prover: Z3Prover<'ctx>,
    config: VerifierConfig,
    state: SessionState<'ctx>,
}

impl<'ctx> Verifier<'ctx> {
    pub fn new(ctx: &'ctx Context, config: VerifierConfig) -> Self {
        Self {
            prover: Z3Prover::new(ctx, &config),
            config,
            state: SessionState::default(),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn prover(&self) -> &Z3Prover<'ctx> {
        &self.prover
    }

    pub fn cache(&self) -> &ProofCache {
        &self.state.cache
    }

    /// Flag condition inferred so far for the current optimization.
    pub fn established_flags(&self) -> Option<&Bool<'ctx>> {
        self.state.flags.current()
    }

    /// Prove `opt` correct for every type assignment it admits.
    pub fn verify<O>(&mut self, opt: &mut O) -> Result<OptimizationReport, VerifyError>
    where
        O: Optimization<'ctx> + ?Sized,
    {
        let header = render_header(
            opt.name(),
            &opt.precondition_text(),
            &opt.listing(Side::Source),
            &opt.listing(Side::Target),
        );
        debug!("\n{header}");

        self.state.flags.reset();
        let hits_before = self.state.cache.hits();

        let mut space = TypeSpace::new(&mut self.prover, &*opt)?;
        opt.shape().check_unused_registers()?;
        let users = user_constraints(&*opt);

        while let Some(types) = space.next_round(&mut self.prover)? {
            opt.fixup_types(&types);
            self.check_typed_opt(&*opt, &types, &users)?;
            space.block(&mut self.prover, &types)?;
        }

        let flags = self.config.infer_flags.then(|| match self.state.flags.current() {
            Some(flags) => flags.to_string(),
            None => "true".to_string(),
        });
        let report = OptimizationReport {
            name: opt.name().to_string(),
            rounds: space.rounds(),
            flags,
            cache_hits: self.state.cache.hits() - hits_before,
        };
        info!(
            optimization = %report.name,
            rounds = report.rounds,
            flags = report.flags.as_deref().unwrap_or("-"),
            "optimization is correct"
        );
        Ok(report)
    }

    /// Check one type round: block preconditions, then values (or flag
    /// inference), then memory. Stops at the first failure.
    pub fn check_typed_opt<O>(
        &mut self,
        opt: &O,
        types: &TypeModel,
        users: &BTreeMap<String, Vec<Bool<'ctx>>>,
    ) -> Result<(), VerifyError>
    where
        O: Optimization<'ctx> + ?Sized,
    {
        let ctx = self.prover.ctx();
        let opts = EncodeOptions {
            use_array_theory: self.config.use_array_theory,
            ptr_size: types
                .ptr_size()
                .ok_or_else(|| VerifyError::internal("type model has no pointer size"))?,
        };
        let src = opt.encode(Side::Source, &opts);
        let tgt = opt.encode(Side::Target, &opts);

        let (pre_defined, pre) = opt.encode_precondition(&src);
        let mut extra = pre_defined;
        extra.extend(pre);
        extra.extend(src.alloca_constraints.iter().cloned());
        extra.extend(tgt.alloca_constraints.iter().cloned());

        let round = RoundContext {
            types,
            src: &src,
            tgt: &tgt,
            extra: &extra,
            users,
        };
        let mut checker = RefinementChecker::new(&mut self.prover, &mut self.state.cache);

        checker.check_blocks(&round)?;
        if self.config.infer_flags {
            let result = flags::infer(&mut checker, &round, &self.state.flags)?;
            self.state.flags.absorb(ctx, result);
        } else {
            checker.check_values(&round)?;
        }
        checker.check_memory(&round)
    }

    /// Verify every optimization selected by `match_names`, stopping at the
    /// first failure.
    pub fn verify_suite<O>(&mut self, opts: &mut [O]) -> Result<Vec<OptimizationReport>, VerifyError>
    where
        O: Optimization<'ctx>,
    {
        let mut reports = Vec::new();
        for opt in opts.iter_mut() {
            if !self.config.selects(opt.name()) {
                debug!(optimization = opt.name(), "skipped by name filter");
                continue;
            }
            reports.push(self.verify(opt)?);
        }
        Ok(reports)
    }
}
