//! JSON-lines encoding of batch results.
//!
//! One object per input, in input order, separated by newlines:
//!
//! ```text
//! {"file":"srcpkgs/foo/template","depends":["libc"],"makedepends":[]}
//! ```
//!
//! `file` always comes first, followed by the dependency variables in
//! lexicographic order.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::batch::TemplateReport;
use crate::extract::DependencyRecord;

#[derive(Debug, Serialize)]
struct ReportLine<'a> {
    file: String,
    #[serde(flatten)]
    dependencies: &'a DependencyRecord,
}

/// Write every report as one JSON object per line.
pub fn write_reports<W: Write>(mut out: W, reports: &[TemplateReport]) -> Result<()> {
    for report in reports {
        let line = ReportLine {
            file: report.input.to_string(),
            dependencies: &report.dependencies,
        };
        serde_json::to_writer(&mut out, &line)
            .with_context(|| format!("failed to encode results for {}", report.input))?;
        out.write_all(b"\n").context("failed to write results")?;
    }
    out.flush().context("failed to write results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateInput;

    fn report(index: usize, path: &str, deps: &[(&str, &[&str])]) -> TemplateReport {
        TemplateReport {
            index,
            input: TemplateInput::from_arg(path),
            dependencies: deps
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
        }
    }

    #[test]
    fn test_file_field_first_then_sorted_keys() {
        let reports = vec![
            report(0, "srcpkgs/foo/template", &[("makedepends", &[]), ("depends", &["libc", "libssl"])]),
            report(1, "-", &[]),
        ];
        let mut out = Vec::new();
        write_reports(&mut out, &reports).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"file\":\"srcpkgs/foo/template\",\"depends\":[\"libc\",\"libssl\"],\"makedepends\":[]}\n\
             {\"file\":\"-\"}\n"
        );
    }

    #[test]
    fn test_no_reports_no_output() {
        let mut out = Vec::new();
        write_reports(&mut out, &[]).unwrap();
        assert!(out.is_empty());
    }
}
