#![forbid(unsafe_code)]

//! Regression benchmark capture.
//!
//! Each solver query can be written as a standalone SMT-LIB file
//! `<dir>/NNN.smt2`, numbered after the highest file already present.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::VerifyError;

pub const PROVENANCE_HEADER: &str = "(set-info :source |\n Generated by peepcheck\n Refinement query for a peephole optimization.\n|)\n\n";

#[derive(Clone, Debug)]
pub struct BenchWriter {
    dir: PathBuf,
}

impl BenchWriter {
    /// Writer for `dir`, or `None` unless this is a debug build and `dir` exists.
    pub fn for_dir(dir: Option<&Path>) -> Option<Self> {
        if !cfg!(debug_assertions) {
            return None;
        }
        let dir = dir?;
        dir.is_dir().then(|| Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn next_path(&self) -> Result<PathBuf, VerifyError> {
        let mut next = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("smt2") {
                continue;
            }
            if let Some(n) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                next = next.max(n + 1);
            }
        }
        Ok(self.dir.join(format!("{next:03}.smt2")))
    }

    pub fn write(&self, smtlib: &str) -> Result<PathBuf, VerifyError> {
        let path = self.next_path()?;
        let mut text = String::with_capacity(PROVENANCE_HEADER.len() + smtlib.len() + 12);
        text.push_str(PROVENANCE_HEADER);
        text.push_str(smtlib);
        if !smtlib.contains("(check-sat") {
            text.push_str("\n(check-sat)\n");
        }
        fs::write(&path, text)?;
        debug!(path = %path.display(), "benchmark written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_continues_after_highest_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("000.smt2"), "").unwrap();
        fs::write(dir.path().join("007.smt2"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let w = BenchWriter { dir: dir.path().to_path_buf() };
        assert_eq!(w.next_path().unwrap(), dir.path().join("008.smt2"));
    }

    #[test]
    fn written_file_carries_header_and_check_sat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let w = BenchWriter { dir: dir.path().to_path_buf() };

        let first = w.write("(declare-fun x () (_ BitVec 8))\n(assert (= x x))").unwrap();
        let second = w.write("(assert false)").unwrap();

        assert_eq!(first, dir.path().join("000.smt2"));
        assert_eq!(second, dir.path().join("001.smt2"));
        let text = fs::read_to_string(first).unwrap();
        assert!(text.starts_with("(set-info :source |"));
        assert!(text.contains("(assert (= x x))"));
        assert!(text.trim_end().ends_with("(check-sat)"));
    }

    #[test]
    fn missing_directory_disables_capture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gone = dir.path().join("bench");
        assert!(BenchWriter::for_dir(Some(&gone)).is_none());
        assert!(BenchWriter::for_dir(None).is_none());
        if cfg!(debug_assertions) {
            assert!(BenchWriter::for_dir(Some(dir.path())).is_some());
        }
    }
}
