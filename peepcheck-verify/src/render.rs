// Counterexample rendering: Z3 model → typed value report
//
// Bit-vector values print as `0x<hex> (<unsigned>, <signed>)`, padded to the
// value's width; the signed half is omitted when both readings agree.
// Variable dumps walk source values then target values in program order and
// stop at the value that failed.

use std::fmt;

/// One `name type = value` line of a counterexample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedBinding {
    pub name: String,
    pub ty: String,
    pub value: String,
}

impl fmt::Display for TypedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} = {}", self.name, self.ty, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Counterexample {
    pub bindings: Vec<TypedBinding>,
    pub source_value: String,
    pub target_value: String,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Example:")?;
        for b in &self.bindings {
            writeln!(f, "{b}")?;
        }
        writeln!(f, "Source value: {}", self.source_value)?;
        write!(f, "Target value: {}", self.target_value)
    }
}

/// Parse a Z3 bit-vector numeral (`#x2a`, `#b101`, or plain decimal).
pub fn parse_bv_numeral(text: &str) -> Option<u128> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("#x") {
        u128::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = text.strip_prefix("#b") {
        u128::from_str_radix(bin, 2).ok()
    } else {
        text.parse::<u128>().ok()
    }
}

/// Two's complement reading of the low `bits` bits of `value`.
pub fn to_signed(bits: u32, value: u128) -> i128 {
    if bits == 0 {
        return 0;
    }
    let bits = bits.min(128);
    let shift = 128 - bits;
    ((value << shift) as i128) >> shift
}

pub fn format_bv(bits: u32, value: u128) -> String {
    let value = if bits >= 128 {
        value
    } else {
        value & ((1u128 << bits) - 1)
    };
    let digits = bits.div_ceil(4).max(1) as usize;
    let hex = format!("0x{value:0digits$X}");
    let signed = to_signed(bits, value);
    if signed >= 0 && signed as u128 == value {
        format!("{hex} ({value})")
    } else {
        format!("{hex} ({value}, {signed})")
    }
}

pub fn format_bool(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

#[cfg(feature = "z3")]
pub use model::{dump_bindings, str_model};

#[cfg(feature = "z3")]
mod model {
    use std::collections::BTreeSet;

    use z3::ast::Dynamic;
    use z3::Model;

    use super::{format_bool, format_bv, parse_bv_numeral, TypedBinding};
    use crate::encoding::ValueMap;
    use crate::error::VerifyError;
    use crate::types::TypeModel;

    /// Render the model's value for `v`.
    pub fn str_model<'ctx>(model: &Model<'ctx>, v: &Dynamic<'ctx>) -> String {
        let Some(val) = model.eval(v, true) else {
            return "<unknown>".to_string();
        };
        if let Some(b) = val.as_bool() {
            return match b.as_bool() {
                Some(b) => format_bool(b).to_string(),
                None => b.to_string(),
            };
        }
        if let Some(bv) = val.as_bv() {
            let bits = bv.get_size();
            let raw = bv
                .as_u64()
                .map(u128::from)
                .or_else(|| parse_bv_numeral(&bv.to_string()));
            return match raw {
                Some(n) if bits <= 128 => format_bv(bits, n),
                _ => bv.to_string(),
            };
        }
        val.to_string()
    }

    /// Typed dump of every named value the model assigns, source side first.
    ///
    /// Each side stops at `stop`; names already printed are not repeated.
    pub fn dump_bindings<'ctx>(
        model: &Model<'ctx>,
        types: &TypeModel,
        sides: [&ValueMap<'ctx>; 2],
        stop: Option<&str>,
    ) -> Result<Vec<TypedBinding>, VerifyError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut out = Vec::new();
        for values in sides {
            for (name, record) in values.iter() {
                if Some(name) == stop {
                    break;
                }
                if !seen.insert(name) {
                    continue;
                }
                out.push(TypedBinding {
                    name: name.to_string(),
                    ty: types.render_type(name)?,
                    value: str_model(model, &record.value),
                });
            }
        }
        Ok(out)
    }
}
