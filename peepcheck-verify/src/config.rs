#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VerifyError;

pub const CONFIG_FILE: &str = "peepcheck.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Synthesize the weakest overflow/exactness flags instead of checking
    /// the ones written in the rule.
    pub infer_flags: bool,

    /// Ask the encoder for array-theory memory instead of store chains.
    pub use_array_theory: bool,

    /// Per-query solver timeout. A timeout is reported as incomplete
    /// verification, never as a verdict.
    pub timeout_ms: Option<u32>,

    /// Directory for SMT-LIB benchmark capture (debug builds only).
    pub bench_dir: Option<PathBuf>,

    /// Only verify optimizations whose name contains one of these.
    pub match_names: Vec<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
struct ConfigFile {
    #[serde(default)]
    verify: VerifierConfig,
}

impl VerifierConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, VerifyError> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| VerifyError::Config {
            message: e.to_string(),
        })?;
        Ok(file.verify)
    }

    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let text = fs::read_to_string(path).map_err(|e| VerifyError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Walk up from `start` looking for `peepcheck.toml`.
    pub fn find(start: &Path) -> Option<PathBuf> {
        let mut cur = if start.is_file() {
            start.parent()?.to_path_buf()
        } else {
            start.to_path_buf()
        };

        loop {
            let candidate = cur.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !cur.pop() {
                return None;
            }
        }
    }

    /// Overlay `PEEPCHECK_INFER_FLAGS`, `PEEPCHECK_TIMEOUT_MS` and
    /// `PEEPCHECK_BENCH_DIR` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, VerifyError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, VerifyError> {
        if let Some(v) = lookup("PEEPCHECK_INFER_FLAGS") {
            self.infer_flags = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("PEEPCHECK_TIMEOUT_MS") {
            let ms = v.trim().parse::<u32>().map_err(|e| VerifyError::Config {
                message: format!("PEEPCHECK_TIMEOUT_MS: {e}"),
            })?;
            self.timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(v) = lookup("PEEPCHECK_BENCH_DIR") {
            self.bench_dir = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        Ok(self)
    }

    pub fn selects(&self, name: &str) -> bool {
        self.match_names.is_empty() || self.match_names.iter().any(|pat| name.contains(pat.as_str()))
    }
}
