#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use crate::error::{UnusedReason, VerifyError};

/// Identifier-level outline of one optimization, as produced by the rule parser.
#[derive(Clone, Debug, Default)]
pub struct RuleShape {
    /// Source identifiers in definition order (inputs, constants, temporaries).
    pub source_idents: Vec<String>,
    /// Target identifiers in definition order.
    pub target_idents: Vec<String>,
    pub used_source: BTreeSet<String>,
    pub used_target: BTreeSet<String>,
    /// Target identifiers intentionally left dead (overwritten source values).
    pub skip_target: BTreeSet<String>,
}

fn is_temporary(name: &str) -> bool {
    name.starts_with('%')
}

impl RuleShape {
    pub fn source_defines(&self, name: &str) -> bool {
        self.source_idents.iter().any(|n| n == name)
    }

    pub fn has_unreachable_target(&self) -> bool {
        self.target_idents.iter().any(|n| n.starts_with("unreachable"))
    }

    /// Reject temporaries that are computed but never consumed.
    pub fn check_unused_registers(&self) -> Result<(), VerifyError> {
        let has_unreach = self.has_unreachable_target();
        for v in &self.source_idents {
            if is_temporary(v)
                && !self.used_source.contains(v)
                && !self.used_target.contains(v)
                && self.skip_target.contains(v)
                && !has_unreach
            {
                return Err(VerifyError::UnusedRegister {
                    name: v.clone(),
                    reason: UnusedReason::NotOverwritten,
                });
            }
        }

        for v in &self.target_idents {
            if is_temporary(v) && !self.used_target.contains(v) && !self.source_defines(v) {
                return Err(VerifyError::UnusedRegister {
                    name: v.clone(),
                    reason: UnusedReason::NoSourceCounterpart,
                });
            }
        }
        Ok(())
    }
}
