#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::render::Counterexample;

/// Which typing constraint set made the joint system unsatisfiable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingStage {
    Precondition,
    Source,
    Target,
}

impl fmt::Display for TypingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypingStage::Precondition => write!(f, "Precondition does not type check"),
            TypingStage::Source => write!(f, "Source program does not type check"),
            TypingStage::Target => write!(f, "Source and Target programs do not type check"),
        }
    }
}

/// The per-value refinement obligations, in the order they are discharged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Obligation {
    Definedness,
    Poison,
    Value,
}

impl fmt::Display for Obligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obligation::Definedness => write!(f, "definedness"),
            Obligation::Poison => write!(f, "poison"),
            Obligation::Value => write!(f, "value"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnusedReason {
    /// Source temporary that is neither used nor overwritten by the target.
    NotOverwritten,
    /// Target temporary that is not used and has no source counterpart.
    NoSourceCounterpart,
}

impl fmt::Display for UnusedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnusedReason::NotOverwritten => write!(f, "unused and not overwritten"),
            UnusedReason::NoSourceCounterpart => {
                write!(f, "unused and does not overwrite any Source register")
            }
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum VerifyError {
    #[error("{stage}")]
    #[diagnostic(code(peepcheck::types))]
    TypeInconsistency { stage: TypingStage },

    #[error("Temporary register {name} {reason}")]
    #[diagnostic(code(peepcheck::unused_register))]
    UnusedRegister { name: String, reason: UnusedReason },

    #[error("{message}")]
    #[diagnostic(code(peepcheck::refinement))]
    Refinement {
        obligation: Obligation,
        message: String,
        counterexample: Box<Counterexample>,
    },

    #[error("{message}")]
    #[diagnostic(code(peepcheck::memory))]
    MemoryMismatch {
        message: String,
        counterexample: Box<Counterexample>,
    },

    #[error("Mismatch in preconditions for BB '{block}'")]
    #[diagnostic(code(peepcheck::block_precondition))]
    BlockPreconditionMismatch {
        block: String,
        counterexample: Box<Counterexample>,
    },

    #[error("The SMT solver gave up. Verification incomplete. Solver says: {reason}")]
    #[diagnostic(
        code(peepcheck::incomplete),
        help("retry with a larger `timeout_ms` or different solver parameters")
    )]
    SolverIncomplete { reason: String },

    #[error("unknown SMT variable `{name}` in flag query")]
    #[diagnostic(code(peepcheck::internal))]
    UnknownSymbol { name: String },

    #[error("internal verifier error: {message}")]
    #[diagnostic(code(peepcheck::internal))]
    Internal { message: String },

    #[error("config error: {message}")]
    #[diagnostic(code(peepcheck::config))]
    Config { message: String },

    #[error(transparent)]
    #[diagnostic(code(peepcheck::io))]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    pub fn internal(message: impl Into<String>) -> Self {
        VerifyError::Internal {
            message: message.into(),
        }
    }

    pub fn counterexample(&self) -> Option<&Counterexample> {
        match self {
            VerifyError::Refinement { counterexample, .. }
            | VerifyError::MemoryMismatch { counterexample, .. }
            | VerifyError::BlockPreconditionMismatch { counterexample, .. } => {
                Some(counterexample.as_ref())
            }
            _ => None,
        }
    }

    /// Engine contract violations, as opposed to verification verdicts.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            VerifyError::UnknownSymbol { .. } | VerifyError::Internal { .. }
        )
    }

    /// Process status a front end should exit with.
    pub fn exit_code(&self) -> i32 {
        match self {
            VerifyError::UnknownSymbol { .. } | VerifyError::Internal { .. } => 70,
            VerifyError::Config { .. } | VerifyError::Io(_) => 2,
            VerifyError::SolverIncomplete { .. } => 3,
            _ => 1,
        }
    }

    /// Full user-facing text: the headline followed by the counterexample, if any.
    pub fn render(&self) -> String {
        match self.counterexample() {
            Some(cex) => format!("ERROR: {self}\n{cex}"),
            None => format!("ERROR: {self}"),
        }
    }
}
