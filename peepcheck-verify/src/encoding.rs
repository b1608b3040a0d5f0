#![forbid(unsafe_code)]

//! Interface to the symbolic encoder.
//!
//! The rule parser and the IR's SMT encoding live outside this crate; they
//! plug in through [`Optimization`]. Everything here is produced once per
//! type round and dropped at the end of it.

use std::collections::BTreeMap;
use std::fmt;

use z3::ast::{Ast, Bool, Dynamic, BV};

use crate::shape::RuleShape;
use crate::types::{PickOneType, TypeModel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingPart {
    Precondition,
    Source,
    Target,
}

/// Symbolic meaning of one named value on one side.
#[derive(Clone, Debug)]
pub struct ValueRecord<'ctx> {
    pub value: Dynamic<'ctx>,
    /// Conditions under which computing the value has no undefined behavior.
    pub defined: Vec<Bool<'ctx>>,
    /// Conditions under which the value is not poison.
    pub poison: Vec<Bool<'ctx>>,
    /// Undef placeholders, quantified per obligation.
    pub qvars: Vec<Dynamic<'ctx>>,
}

impl<'ctx> ValueRecord<'ctx> {
    pub fn plain(value: &dyn Ast<'ctx>) -> Self {
        Self {
            value: Dynamic::from_ast(value),
            defined: Vec::new(),
            poison: Vec::new(),
            qvars: Vec::new(),
        }
    }
}

/// Named values of one side, in definition order.
#[derive(Clone, Debug, Default)]
pub struct ValueMap<'ctx> {
    entries: Vec<(String, ValueRecord<'ctx>)>,
}

impl<'ctx> ValueMap<'ctx> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace; a replaced entry keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, record: ValueRecord<'ctx>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = record,
            None => self.entries.push((name, record)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValueRecord<'ctx>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueRecord<'ctx>)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type LoadFn<'ctx> = Box<dyn Fn(&BV<'ctx>) -> Dynamic<'ctx> + 'ctx>;

/// Final memory state of one side.
pub struct Memory<'ctx> {
    load: LoadFn<'ctx>,
    pub qvars: Vec<Dynamic<'ctx>>,
}

impl<'ctx> Memory<'ctx> {
    pub fn new(load: impl Fn(&BV<'ctx>) -> Dynamic<'ctx> + 'ctx, qvars: Vec<Dynamic<'ctx>>) -> Self {
        Self {
            load: Box::new(load),
            qvars,
        }
    }

    pub fn load(&self, idx: &BV<'ctx>) -> Dynamic<'ctx> {
        (self.load)(idx)
    }
}

impl fmt::Debug for Memory<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("qvars", &self.qvars)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Encoding<'ctx> {
    pub values: ValueMap<'ctx>,
    /// Entry condition of each basic block.
    pub block_pres: BTreeMap<String, Vec<Bool<'ctx>>>,
    pub alloca_constraints: Vec<Bool<'ctx>>,
    pub memory: Memory<'ctx>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub use_array_theory: bool,
    pub ptr_size: u32,
}

/// One optimization rule together with its symbolic encoder.
pub trait Optimization<'ctx> {
    fn name(&self) -> &str;

    fn precondition_text(&self) -> String {
        "true".to_string()
    }

    /// Printable instruction listing of one side.
    fn listing(&self, _side: Side) -> Vec<String> {
        Vec::new()
    }

    fn shape(&self) -> &RuleShape;

    /// Linear integer constraints over `t_*` / `size_*` variables.
    fn type_constraints(&self, part: TypingPart, pick_one: &PickOneType) -> Vec<Bool<'ctx>>;

    /// Specialize the rule to the widths chosen for this round.
    fn fixup_types(&mut self, types: &TypeModel);

    fn encode(&self, side: Side, opts: &EncodeOptions) -> Encoding<'ctx>;

    /// `(definedness, formula)` of the precondition over the source encoding.
    fn encode_precondition(&self, source: &Encoding<'ctx>) -> (Vec<Bool<'ctx>>, Vec<Bool<'ctx>>);

    /// Number of uses of each source identifier within the source sequence.
    fn count_users(&self) -> BTreeMap<String, u64>;

    /// Symbolic use-count variable of a source identifier. Must be named
    /// `u_<name>`.
    fn users_var(&self, name: &str) -> BV<'ctx>;
}

/// Per-identifier user-count constraints: `users_var(k) != n` when `k` has
/// `n > 0` observed uses, nothing otherwise.
pub fn user_constraints<'ctx, O>(opt: &O) -> BTreeMap<String, Vec<Bool<'ctx>>>
where
    O: Optimization<'ctx> + ?Sized,
{
    let counts = opt.count_users();
    opt.shape()
        .source_idents
        .iter()
        .map(|k| {
            let cnstr = match counts.get(k) {
                Some(&n) if n > 0 => {
                    let var = opt.users_var(k);
                    let observed = BV::from_u64(var.get_ctx(), n, var.get_size());
                    vec![var._eq(&observed).not()]
                }
                _ => Vec::new(),
            };
            (k.clone(), cnstr)
        })
        .collect()
}
