#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use crate::error::VerifyError;

/// Reserved name of the pointer-width type variable.
pub const PTR_SIZE_VAR: &str = "ptrsize";

/// Pointer widths the explorer is allowed to pick.
pub const PTR_SIZES: [i64; 2] = [32, 64];

/// Kind tag stored in `t_<name>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Int = 0,
    Ptr = 1,
    Array = 2,
    Unknown = 3,
}

impl TypeKind {
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(TypeKind::Int),
            1 => Some(TypeKind::Ptr),
            2 => Some(TypeKind::Array),
            3 => Some(TypeKind::Unknown),
            _ => None,
        }
    }
}

pub fn kind_var(name: &str) -> String {
    format!("t_{name}")
}

pub fn size_var(name: &str) -> String {
    format!("size_{name}")
}

pub fn elems_var(name: &str) -> String {
    format!("val_{name}_elems")
}

/// Type variables whose value does not affect correctness.
///
/// Every variable of the precondition typing starts here; the ones that also
/// appear in source or target typing are removed again. Members are pinned to
/// one representative value instead of being enumerated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PickOneType {
    names: BTreeSet<String>,
}

impl PickOneType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
    }

    pub fn unregister<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for n in names {
            self.names.remove(n);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One concrete solution of the typing constraints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeModel {
    values: BTreeMap<String, i64>,
}

impl TypeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ptr_size(&self) -> Option<u32> {
        self.get(PTR_SIZE_VAR).and_then(|v| u32::try_from(v).ok())
    }

    pub fn kind_of(&self, name: &str) -> Option<TypeKind> {
        self.get(&kind_var(name)).and_then(TypeKind::from_tag)
    }

    pub fn width_of(&self, name: &str) -> Option<u32> {
        self.get(&size_var(name)).and_then(|v| u32::try_from(v).ok())
    }

    /// IR spelling of the type assigned to `name`: `i32`, `i8*`, `[4 x i16]`.
    pub fn render_type(&self, name: &str) -> Result<String, VerifyError> {
        let missing = |var: String| VerifyError::internal(format!("type model has no value for `{var}`"));
        let tag = self.get(&kind_var(name)).ok_or_else(|| missing(kind_var(name)))?;
        match TypeKind::from_tag(tag) {
            Some(TypeKind::Int) => {
                let size = self.get(&size_var(name)).ok_or_else(|| missing(size_var(name)))?;
                Ok(format!("i{size}"))
            }
            Some(TypeKind::Ptr) => Ok(format!("{}*", self.render_type(&format!("*{name}"))?)),
            Some(TypeKind::Array) => {
                let elems = self.get(&elems_var(name)).ok_or_else(|| missing(elems_var(name)))?;
                let elem = self.render_type(&format!("[{name}]"))?;
                Ok(format!("[{elems} x {elem}]"))
            }
            _ => Err(VerifyError::internal(format!(
                "`{name}` has no concrete type (kind tag {tag})"
            ))),
        }
    }
}

impl FromIterator<(String, i64)> for TypeModel {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
