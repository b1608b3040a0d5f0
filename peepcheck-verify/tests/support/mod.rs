#![allow(dead_code)]

//! A tiny stand-in for the rule parser and IR encoder.
//!
//! Every identifier is an integer register; all registers of a rule share
//! one width, chosen from the rule's admissible widths.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use peepcheck_verify::types::{kind_var, size_var};
use peepcheck_verify::{
    EncodeOptions, Encoding, Memory, Optimization, PickOneType, RuleShape, Side, TypeKind, TypeModel,
    TypingPart, ValueMap, ValueRecord,
};
use z3::ast::{Array, Ast, Bool, Dynamic, Int, BV};
use z3::{Context, Sort};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Widths in force for the current round.
#[derive(Clone, Copy)]
pub struct Env<'ctx> {
    pub ctx: &'ctx Context,
    pub width: u32,
    pub ptr_size: u32,
}

impl<'ctx> Env<'ctx> {
    pub fn reg(&self, name: &str) -> BV<'ctx> {
        BV::new_const(self.ctx, name, self.width)
    }

    pub fn lit(&self, v: u64) -> BV<'ctx> {
        BV::from_u64(self.ctx, v, self.width)
    }

    pub fn flag(&self, name: &str) -> BV<'ctx> {
        BV::new_const(self.ctx, name, 1)
    }

    /// `a + b` does not wrap as a signed addition.
    pub fn add_nsw(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
        let wide = a.sign_ext(1).bvadd(&b.sign_ext(1));
        wide._eq(&a.bvadd(b).sign_ext(1))
    }

    pub fn initial_memory(&self) -> Array<'ctx> {
        Array::new_const(
            self.ctx,
            "mem_0",
            &Sort::bitvector(self.ctx, self.ptr_size),
            &Sort::bitvector(self.ctx, 8),
        )
    }

    pub fn encoding(&self, values: Vec<(&str, ValueRecord<'ctx>)>) -> Encoding<'ctx> {
        self.encoding_with_memory(values, self.initial_memory())
    }

    pub fn encoding_with_memory(
        &self,
        values: Vec<(&str, ValueRecord<'ctx>)>,
        memory: Array<'ctx>,
    ) -> Encoding<'ctx> {
        let mut map = ValueMap::new();
        for (name, record) in values {
            map.insert(name, record);
        }
        Encoding {
            values: map,
            block_pres: BTreeMap::new(),
            alloca_constraints: Vec::new(),
            memory: Memory::new(move |idx| memory.select(idx), Vec::new()),
        }
    }
}

pub fn value<'ctx>(v: &BV<'ctx>) -> ValueRecord<'ctx> {
    ValueRecord::plain(v)
}

/// Value `v` whose undef placeholders are `undefs`.
pub fn value_with_undef<'ctx>(v: &BV<'ctx>, undefs: &[&BV<'ctx>]) -> ValueRecord<'ctx> {
    let mut record = ValueRecord::plain(v);
    record.qvars = undefs.iter().map(|u| Dynamic::from_ast(*u)).collect();
    record
}

type SideFn<'ctx> = Box<dyn Fn(&Env<'ctx>) -> Encoding<'ctx> + 'ctx>;
type PreFn<'ctx> = Box<dyn Fn(&Env<'ctx>, &Encoding<'ctx>) -> (Vec<Bool<'ctx>>, Vec<Bool<'ctx>>) + 'ctx>;

pub struct TestRule<'ctx> {
    ctx: &'ctx Context,
    name: String,
    shape: RuleShape,
    widths: Vec<u32>,
    target_widths: Option<Vec<u32>>,
    pre_vars: Vec<(String, Vec<u32>)>,
    source: SideFn<'ctx>,
    target: SideFn<'ctx>,
    precondition: Option<PreFn<'ctx>>,
    users: BTreeMap<String, u64>,
    env: Env<'ctx>,
    fixups: usize,
    pick_one_seen: RefCell<Vec<usize>>,
}

impl<'ctx> TestRule<'ctx> {
    /// The last source identifier is the root; every other one is used.
    pub fn new(
        ctx: &'ctx Context,
        name: &str,
        source_idents: &[&str],
        target_idents: &[&str],
        source: impl Fn(&Env<'ctx>) -> Encoding<'ctx> + 'ctx,
        target: impl Fn(&Env<'ctx>) -> Encoding<'ctx> + 'ctx,
    ) -> Self {
        let used = source_idents[..source_idents.len().saturating_sub(1)]
            .iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>();
        let shape = RuleShape {
            source_idents: source_idents.iter().map(|s| s.to_string()).collect(),
            target_idents: target_idents.iter().map(|s| s.to_string()).collect(),
            used_source: used.clone(),
            used_target: used,
            skip_target: BTreeSet::new(),
        };
        Self {
            ctx,
            name: name.to_string(),
            shape,
            widths: vec![8],
            target_widths: None,
            pre_vars: Vec::new(),
            source: Box::new(source),
            target: Box::new(target),
            precondition: None,
            users: BTreeMap::new(),
            env: Env {
                ctx,
                width: 8,
                ptr_size: 32,
            },
            fixups: 0,
            pick_one_seen: RefCell::new(Vec::new()),
        }
    }

    pub fn with_widths(mut self, widths: &[u32]) -> Self {
        self.widths = widths.to_vec();
        self
    }

    pub fn with_target_widths(mut self, widths: &[u32]) -> Self {
        self.target_widths = Some(widths.to_vec());
        self
    }

    /// An integer that only the precondition mentions.
    pub fn with_precondition_var(mut self, name: &str, widths: &[u32]) -> Self {
        self.pre_vars.push((name.to_string(), widths.to_vec()));
        self
    }

    pub fn with_precondition(
        mut self,
        pre: impl Fn(&Env<'ctx>, &Encoding<'ctx>) -> (Vec<Bool<'ctx>>, Vec<Bool<'ctx>>) + 'ctx,
    ) -> Self {
        self.precondition = Some(Box::new(pre));
        self
    }

    pub fn with_users(mut self, name: &str, n: u64) -> Self {
        self.users.insert(name.to_string(), n);
        self
    }

    pub fn shape_mut(&mut self) -> &mut RuleShape {
        &mut self.shape
    }

    pub fn env(&self) -> Env<'ctx> {
        self.env
    }

    pub fn fixups(&self) -> usize {
        self.fixups
    }

    /// Size of the pick-one set handed to each `type_constraints` call.
    pub fn pick_one_seen(&self) -> Vec<usize> {
        self.pick_one_seen.borrow().clone()
    }

    fn int_typing(&self, name: &str, widths: &[u32]) -> Vec<Bool<'ctx>> {
        let ctx = self.ctx;
        let kind = Int::new_const(ctx, kind_var(name));
        let size = Int::new_const(ctx, size_var(name));
        let options = widths
            .iter()
            .map(|&w| size._eq(&Int::from_u64(ctx, u64::from(w))))
            .collect::<Vec<_>>();
        vec![
            kind._eq(&Int::from_i64(ctx, TypeKind::Int.tag())),
            Bool::or(ctx, &options.iter().collect::<Vec<_>>()),
        ]
    }

    fn root_size(&self) -> Int<'ctx> {
        Int::new_const(self.ctx, size_var(&self.shape.source_idents[0]))
    }

    fn side_typing(&self, idents: &[String], widths: &[u32]) -> Vec<Bool<'ctx>> {
        let root = self.root_size();
        let mut out = Vec::new();
        for name in idents {
            out.extend(self.int_typing(name, widths));
            out.push(Int::new_const(self.ctx, size_var(name))._eq(&root));
        }
        out
    }
}

impl<'ctx> Optimization<'ctx> for TestRule<'ctx> {
    fn name(&self) -> &str {
        &self.name
    }

    fn listing(&self, side: Side) -> Vec<String> {
        let idents = match side {
            Side::Source => &self.shape.source_idents,
            Side::Target => &self.shape.target_idents,
        };
        idents.iter().map(|n| format!("{n} = ...")).collect()
    }

    fn shape(&self) -> &RuleShape {
        &self.shape
    }

    fn type_constraints(&self, part: TypingPart, pick_one: &PickOneType) -> Vec<Bool<'ctx>> {
        self.pick_one_seen.borrow_mut().push(pick_one.len());
        match part {
            TypingPart::Precondition => self
                .pre_vars
                .iter()
                .flat_map(|(name, widths)| self.int_typing(name, widths))
                .collect(),
            TypingPart::Source => self.side_typing(&self.shape.source_idents, &self.widths),
            TypingPart::Target => {
                let widths = self.target_widths.as_deref().unwrap_or(&self.widths);
                self.side_typing(&self.shape.target_idents, widths)
            }
        }
    }

    fn fixup_types(&mut self, types: &TypeModel) {
        let root = &self.shape.source_idents[0];
        self.env.width = types.width_of(root).expect("root width");
        self.env.ptr_size = types.ptr_size().expect("pointer size");
        self.fixups += 1;
    }

    fn encode(&self, side: Side, opts: &EncodeOptions) -> Encoding<'ctx> {
        assert_eq!(opts.ptr_size, self.env.ptr_size);
        match side {
            Side::Source => (self.source)(&self.env),
            Side::Target => (self.target)(&self.env),
        }
    }

    fn encode_precondition(&self, source: &Encoding<'ctx>) -> (Vec<Bool<'ctx>>, Vec<Bool<'ctx>>) {
        match &self.precondition {
            Some(pre) => pre(&self.env, source),
            None => (Vec::new(), Vec::new()),
        }
    }

    fn count_users(&self) -> BTreeMap<String, u64> {
        self.users.clone()
    }

    fn users_var(&self, name: &str) -> BV<'ctx> {
        BV::new_const(self.ctx, format!("u_{name}"), 8)
    }
}

/// Unsigned reading of a rendered value such as `0xFF (255, -1)`.
pub fn unsigned_of(rendered: &str) -> u64 {
    let open = rendered.find('(').expect("decimal part");
    rendered[open + 1..]
        .split(|c| c == ',' || c == ')')
        .next()
        .expect("unsigned value")
        .trim()
        .parse()
        .expect("number")
}
