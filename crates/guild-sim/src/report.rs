//! Results of a harness run and their JSON output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one scripted scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub passed: bool,
    /// Failure reason, empty on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub duration_ms: u64,
}

/// Concurrent-proposer stress statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StressReport {
    pub guilds: usize,
    pub proposers: usize,
    pub rounds: usize,
    pub seed: u64,
    /// Proposals that created a relation
    pub created: usize,
    /// Proposals refused because the pair was already related
    pub already_exists: usize,
    /// Proposals refused for any other reason
    pub other_failures: usize,
    /// Pairs observed with more than one open relation. Must be zero.
    pub violations: usize,
    pub duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub topology: String,
    pub scenarios: Vec<ScenarioOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress: Option<StressReport>,
    /// Notice keys delivered, by count
    pub notices: BTreeMap<String, usize>,
    /// Notices that reached the presenter off the global authority
    pub off_owner_notices: usize,
}

impl RunReport {
    pub fn new(topology: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            ended_at: now,
            topology: topology.into(),
            scenarios: Vec::new(),
            stress: None,
            notices: BTreeMap::new(),
            off_owner_notices: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed)
            && self.stress.as_ref().map_or(true, |s| s.violations == 0)
            && self.off_owner_notices == 0
    }

    pub fn print_summary(&self) {
        println!("\n=== Guild Kernel Run ({}) ===", self.topology);
        for scenario in &self.scenarios {
            let mark = if scenario.passed { "PASS" } else { "FAIL" };
            println!("  [{}] {} ({} ms)", mark, scenario.name, scenario.duration_ms);
            if !scenario.passed {
                println!("         {}", scenario.detail);
            }
        }
        if let Some(stress) = &self.stress {
            println!(
                "  stress: {} guilds, {} proposers x {} rounds (seed {})",
                stress.guilds, stress.proposers, stress.rounds, stress.seed
            );
            println!(
                "          created {}, already related {}, other {}, violations {} ({} ms)",
                stress.created,
                stress.already_exists,
                stress.other_failures,
                stress.violations,
                stress.duration_ms
            );
        }
        let total: usize = self.notices.values().sum();
        println!("  notices delivered: {} ({} off owner)", total, self.off_owner_notices);
        println!("  result: {}", if self.passed() { "OK" } else { "FAILED" });
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }
}

/// "report.json" -> "report-20260108-010530.json"
pub fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_scenario_fails_the_run() {
        let mut report = RunReport::new("single_authority");
        report.scenarios.push(ScenarioOutcome {
            name: "ok".into(),
            passed: true,
            detail: String::new(),
            duration_ms: 1,
        });
        assert!(report.passed());

        report.scenarios.push(ScenarioOutcome {
            name: "broken".into(),
            passed: false,
            detail: "expected one relation".into(),
            duration_ms: 1,
        });
        assert!(!report.passed());
    }

    #[test]
    fn test_timestamped_path_keeps_stem_and_extension() {
        let path = timestamped_path(Path::new("out/report.json"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("report-"));
        assert!(name.ends_with(".json"));
        assert_eq!(path.parent(), Some(Path::new("out")));
    }
}
