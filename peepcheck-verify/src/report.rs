#![forbid(unsafe_code)]

use std::fmt;
use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;

/// Success report for one optimization.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OptimizationReport {
    pub name: String,
    /// Number of type assignments checked before the typing solver ran dry.
    pub rounds: usize,
    /// Inferred flag precondition (flag-inference mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    pub cache_hits: u64,
}

impl fmt::Display for OptimizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Done: {}\nOptimization is correct!", self.rounds)?;
        if let Some(flags) = &self.flags {
            write!(f, "\nFlags: {flags}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SuiteReport<'a> {
    schema: &'static str,
    correct: usize,
    optimizations: &'a [OptimizationReport],
}

/// Write the reports of a verified suite as JSON to `out_path`.
pub fn write_suite_report(reports: &[OptimizationReport], out_path: &Path) -> miette::Result<()> {
    let report = SuiteReport {
        schema: "peepcheck.suite.v1",
        correct: reports.len(),
        optimizations: reports,
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).into_diagnostic()?;
    }
    let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
    std::fs::write(out_path, json).into_diagnostic()?;
    Ok(())
}

/// Banner printed before an optimization is checked.
pub fn render_header(name: &str, precondition: &str, source: &[String], target: &[String]) -> String {
    let mut out = String::new();
    out.push_str("----------------------------------------\n");
    out.push_str(&format!("Optimization: {name}\n"));
    out.push_str(&format!("Precondition: {precondition}\n"));
    for line in source {
        out.push_str(&format!("  {line}\n"));
    }
    out.push_str("=>\n");
    for line in target {
        out.push_str(&format!("  {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lists_both_sides() {
        let h = render_header(
            "AddZero",
            "true",
            &["%r = add %x, 0".to_string()],
            &["%r = %x".to_string()],
        );
        assert!(h.contains("Optimization: AddZero\n"));
        assert!(h.contains("  %r = add %x, 0\n=>\n  %r = %x\n"));
    }

    #[test]
    fn report_mentions_flags_only_when_inferred() {
        let mut r = OptimizationReport {
            name: "AddSub".to_string(),
            rounds: 3,
            flags: None,
            cache_hits: 0,
        };
        assert_eq!(r.to_string(), "Done: 3\nOptimization is correct!");
        r.flags = Some("(= f_nsw_src #b1)".to_string());
        assert!(r.to_string().ends_with("Flags: (= f_nsw_src #b1)"));
    }

    #[test]
    fn suite_report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports").join("suite.json");
        let reports = vec![
            OptimizationReport {
                name: "AddZero".to_string(),
                rounds: 3,
                flags: None,
                cache_hits: 0,
            },
            OptimizationReport {
                name: "AddNsw".to_string(),
                rounds: 2,
                flags: Some("true".to_string()),
                cache_hits: 4,
            },
        ];

        write_suite_report(&reports, &out).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["schema"], "peepcheck.suite.v1");
        assert_eq!(json["correct"], 2);
        assert_eq!(json["optimizations"][0]["name"], "AddZero");
        assert!(json["optimizations"][0].get("flags").is_none());
        assert_eq!(json["optimizations"][1]["flags"], "true");
        assert_eq!(json["optimizations"][1]["cache_hits"], 4);
    }
}
