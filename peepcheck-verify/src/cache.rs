//! Cache of already-proved obligations.
//!
//! Keys are SHA-256 digests of the fully quantified obligation in SMT-LIB
//! form, constant declarations included, so two obligations share an entry
//! exactly when they agree on both the formula and the sorts of its
//! constants. Only successful proofs are stored: a failed
//! obligation is always re-solved so it reproduces its counterexample.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Already proved earlier in this run.
    Hit,
    /// Proved now and remembered.
    Proved,
}

#[derive(Clone, Debug, Default)]
pub struct ProofCache {
    proved: HashSet<String>,
    hits: u64,
    misses: u64,
}

impl ProofCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(formula: &str) -> String {
        hex::encode(Sha256::digest(formula.as_bytes()))
    }

    pub fn contains(&self, formula: &str) -> bool {
        self.proved.contains(&Self::key_for(formula))
    }

    /// Run `prove` unless `formula` was already proved.
    ///
    /// The formula is recorded only when `prove` succeeds.
    pub fn get_or_prove<E>(
        &mut self,
        formula: &str,
        prove: impl FnOnce() -> Result<(), E>,
    ) -> Result<CacheOutcome, E> {
        let key = Self::key_for(formula);
        if self.proved.contains(&key) {
            self.hits += 1;
            return Ok(CacheOutcome::Hit);
        }
        self.misses += 1;
        prove()?;
        self.proved.insert(key);
        Ok(CacheOutcome::Proved)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.proved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proved.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_identical_obligation_is_a_hit() {
        let mut cache = ProofCache::new();
        let mut calls = 0;
        let f = "(forall ((u (_ BitVec 8))) (= x x))";

        let first = cache.get_or_prove::<()>(f, || {
            calls += 1;
            Ok(())
        });
        let second = cache.get_or_prove::<()>(f, || {
            calls += 1;
            Ok(())
        });

        assert_eq!(first, Ok(CacheOutcome::Proved));
        assert_eq!(second, Ok(CacheOutcome::Hit));
        assert_eq!(calls, 1);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn failures_are_not_remembered() {
        let mut cache = ProofCache::new();
        let f = "(= x (bvadd x #x01))";
        assert_eq!(cache.get_or_prove(f, || Err("sat")), Err("sat"));
        assert!(!cache.contains(f));
        assert_eq!(cache.get_or_prove(f, || Err("sat")), Err("sat"));
        assert_eq!(cache.misses(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn declarations_are_part_of_the_key() {
        let body = "(assert (not (= (bvmul x x) x)))\n";
        let narrow = format!("(declare-fun x () (_ BitVec 1))\n{body}");
        let wide = format!("(declare-fun x () (_ BitVec 8))\n{body}");
        let mut cache = ProofCache::new();
        assert_eq!(cache.get_or_prove::<()>(&narrow, || Ok(())), Ok(CacheOutcome::Proved));
        assert!(!cache.contains(&wide));
        assert_eq!(cache.get_or_prove(&wide, || Err("sat")), Err("sat"));
    }

    #[test]
    fn quantifier_prefix_is_part_of_the_key() {
        assert_ne!(
            ProofCache::key_for("(forall ((u (_ BitVec 8))) (= u x))"),
            ProofCache::key_for("(= u x)")
        );
        assert_eq!(ProofCache::key_for("a").len(), 64);
    }
}
