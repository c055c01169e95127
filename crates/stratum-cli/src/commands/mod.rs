pub mod completions;
pub mod create;
pub mod delete;
pub mod plan;

use std::path::Path;
use stratum_core::{ConvergenceReport, Outcome};
use stratum_profile::HostFacts;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_RESOLUTION_ERROR: u8 = 2;
pub const EXIT_CONVERGENCE_ERROR: u8 = 3;

/// Fully gathered inputs for one convergence action.
pub struct TargetSpec {
    pub facts: HostFacts,
    pub product_version: String,
    pub instance: String,
    pub mpm: String,
}

/// Assemble host facts from an override file, explicit flags, or detection.
///
/// A facts file wins outright; otherwise each flag overrides the detected
/// value for its field only.
pub fn gather_facts(
    facts_file: Option<&Path>,
    arch: Option<&str>,
    platform_version: Option<&str>,
) -> Result<HostFacts, String> {
    if let Some(path) = facts_file {
        return HostFacts::from_file(path).map_err(|e| format!("resolution error: {e}"));
    }
    let detected = HostFacts::detect();
    Ok(HostFacts::new(
        arch.unwrap_or(&detected.machine),
        platform_version.unwrap_or(&detected.platform_version),
    ))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn colorize_outcome(outcome: Outcome) -> String {
    use console::Style;
    let text = outcome.to_string();
    match outcome {
        Outcome::Applied => Style::new().green().apply_to(text).to_string(),
        Outcome::Noop => Style::new().dim().apply_to(text).to_string(),
        Outcome::Skipped => Style::new().yellow().apply_to(text).to_string(),
        Outcome::Failed => Style::new().red().bold().apply_to(text).to_string(),
    }
}

/// Print a convergence report and return the exit code for it.
pub fn report_result(report: &ConvergenceReport, json: bool) -> Result<u8, String> {
    if json {
        println!("{}", json_pretty(report)?);
    } else {
        for entry in &report.outcomes {
            println!(
                "{:<18} {:<8} {}",
                colorize_outcome(entry.outcome),
                entry.verb.to_string(),
                entry.id
            );
        }
        if let Some(failure) = &report.failure {
            eprintln!("error: {failure}");
        } else {
            println!(
                "converged: {} applied, {} up to date, {} skipped",
                report.count(Outcome::Applied),
                report.count(Outcome::Noop),
                report.count(Outcome::Skipped)
            );
        }
    }
    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_CONVERGENCE_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_value() {
        let val = serde_json::json!({"outcome": "applied"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"outcome\""));
        assert!(result.contains("\"applied\""));
    }

    #[test]
    fn colorized_outcomes_keep_their_text() {
        assert!(colorize_outcome(Outcome::Applied).contains("applied"));
        assert!(colorize_outcome(Outcome::Noop).contains("no-op"));
        assert!(colorize_outcome(Outcome::Skipped).contains("skipped"));
        assert!(colorize_outcome(Outcome::Failed).contains("failed"));
    }

    #[test]
    fn facts_flags_override_detection() {
        let facts = gather_facts(None, Some("i686"), Some("6.5")).unwrap();
        assert_eq!(facts.machine, "i686");
        assert_eq!(facts.platform_version, "6.5");
    }

    #[test]
    fn facts_file_wins_over_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.toml");
        std::fs::write(&path, "machine = \"x86_64\"\nplatform_version = \"7.2\"\n").unwrap();

        let facts = gather_facts(Some(&path), Some("i686"), Some("5.11")).unwrap();
        assert_eq!(facts.machine, "x86_64");
        assert_eq!(facts.platform_version, "7.2");
    }

    #[test]
    fn unreadable_facts_file_reports_resolution_error() {
        let err = gather_facts(Some(Path::new("/nonexistent/facts.toml")), None, None)
            .unwrap_err();
        assert!(err.starts_with("resolution error:"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_RESOLUTION_ERROR);
        assert_ne!(EXIT_RESOLUTION_ERROR, EXIT_CONVERGENCE_ERROR);
    }
}
