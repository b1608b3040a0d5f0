#![forbid(unsafe_code)]

pub mod bench;
pub mod cache;
pub mod config;
pub mod error;
pub mod render;
pub mod report;
pub mod shape;
pub mod types;

#[cfg(feature = "z3")]
pub mod encoding;
#[cfg(feature = "z3")]
pub mod explore;
#[cfg(feature = "z3")]
pub mod flags;
#[cfg(feature = "z3")]
pub mod refine;
#[cfg(feature = "z3")]
pub mod session;
#[cfg(feature = "z3")]
pub mod solver;

pub use bench::BenchWriter;
pub use cache::{CacheOutcome, ProofCache};
pub use config::VerifierConfig;
pub use error::{Obligation, TypingStage, UnusedReason, VerifyError};
pub use render::{Counterexample, TypedBinding};
pub use report::{render_header, write_suite_report, OptimizationReport};
pub use shape::RuleShape;
pub use types::{PickOneType, TypeKind, TypeModel};

#[cfg(feature = "z3")]
pub use encoding::{EncodeOptions, Encoding, Memory, Optimization, Side, TypingPart, ValueMap, ValueRecord};
#[cfg(feature = "z3")]
pub use explore::TypeSpace;
#[cfg(feature = "z3")]
pub use flags::{FlagQuery, FlagSolutions, FlagState};
#[cfg(feature = "z3")]
pub use refine::{RefinementChecker, RoundContext};
#[cfg(feature = "z3")]
pub use session::{SessionState, Verifier};
#[cfg(feature = "z3")]
pub use solver::{Answer, Z3Prover};
