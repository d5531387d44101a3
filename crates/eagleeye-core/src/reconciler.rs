//! Filesystem evidence check for tasks whose deliverable is written files.

use std::path::Path;

use eagleeye_types::{ArtifactReport, CategoryStats, TaskKind};
use serde_json::Value;

use crate::TaskError;

pub const METADATA_FILE: &str = "metadata.json";

/// Verdict for a finished session once its output location was inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub success: bool,
    /// The session failed but deliverables were found.
    pub reconciled: bool,
    pub note: Option<String>,
}

/// Lists regular files directly under `output_dir` whose names match
/// `pattern`, sorted by name, plus whatever `metadata.json` tells about them.
pub fn inspect_output(output_dir: &Path, pattern: &str) -> ArtifactReport {
    let mut report = ArtifactReport {
        output_dir: output_dir.to_path_buf(),
        ..ArtifactReport::default()
    };

    let full_pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&output_dir.to_string_lossy()),
        pattern
    );
    match glob::glob(&full_pattern) {
        Ok(paths) => {
            report.artifacts = paths
                .filter_map(Result::ok)
                .filter(|path| path.is_file())
                .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect();
            report.artifacts.sort();
        }
        Err(err) => {
            tracing::warn!(pattern = %full_pattern, "invalid artifact pattern: {err}");
        }
    }

    if let Some((count, stats)) = read_metadata(&output_dir.join(METADATA_FILE)) {
        report.article_count = Some(count);
        report.category_stats = Some(stats);
    }
    report
}

fn read_metadata(path: &Path) -> Option<(u32, CategoryStats)> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::debug!(path = %path.display(), "no crawl metadata: {err}");
            return None;
        }
    };
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(path = %path.display(), "unreadable crawl metadata: {err}");
            return None;
        }
    };

    let articles = value
        .get("articles")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut stats = CategoryStats::default();
    for article in articles {
        match article.get("category").and_then(Value::as_str) {
            Some("policy") => stats.policy += 1,
            Some("competitor") => stats.competitor += 1,
            _ => {}
        }
    }
    let count = value
        .get("articleCount")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(articles.len() as u32);
    Some((count, stats))
}

/// Final success verdict: the session result, upgraded to success when a
/// task with a filesystem deliverable left at least one artifact behind.
pub fn reconcile(
    kind: TaskKind,
    failure: Option<&TaskError>,
    report: Option<&ArtifactReport>,
) -> Reconciliation {
    let Some(err) = failure else {
        return Reconciliation {
            success: true,
            reconciled: false,
            note: None,
        };
    };
    let found = report
        .filter(|_| kind.has_filesystem_deliverable())
        .map(|report| report.artifacts.len())
        .unwrap_or(0);
    if found == 0 {
        return Reconciliation {
            success: false,
            reconciled: false,
            note: None,
        };
    }
    Reconciliation {
        success: true,
        reconciled: true,
        note: Some(format!(
            "agent reported failure ({}) but {found} artifact file(s) were written: {err}",
            err.code()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn exit_failure() -> TaskError {
        TaskError::ProcessExitFailure {
            exit_code: Some(1),
            stderr: "boom".to_string(),
        }
    }

    #[test]
    fn inspect_lists_matching_files_sorted_and_non_recursive() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("02_policy_b.md"), "b").expect("write");
        fs::write(dir.path().join("01_policy_a.md"), "a").expect("write");
        fs::write(dir.path().join("notes.txt"), "n").expect("write");
        fs::create_dir(dir.path().join("nested.md")).expect("mkdir");
        fs::write(dir.path().join("nested.md").join("03_x.md"), "x").expect("write");

        let report = inspect_output(dir.path(), "*.md");
        assert_eq!(report.artifacts, vec!["01_policy_a.md", "02_policy_b.md"]);
        assert!(report.article_count.is_none());
    }

    #[test]
    fn metadata_supplies_counts_and_categories() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(METADATA_FILE),
            r#"{"articleCount":3,"articles":[{"category":"policy"},{"category":"competitor"},{"category":"policy"}]}"#,
        )
        .expect("write");
        let report = inspect_output(dir.path(), "*.md");
        assert_eq!(report.article_count, Some(3));
        assert_eq!(
            report.category_stats,
            Some(CategoryStats {
                policy: 2,
                competitor: 1
            })
        );
    }

    #[test]
    fn malformed_metadata_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(METADATA_FILE), "{not json").expect("write");
        fs::write(dir.path().join("a.md"), "a").expect("write");
        let report = inspect_output(dir.path(), "*.md");
        assert!(report.category_stats.is_none());
        assert_eq!(report.artifacts.len(), 1);
    }

    #[test]
    fn missing_directory_yields_empty_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = inspect_output(&dir.path().join("never-created"), "*.md");
        assert!(!report.has_deliverables());
    }

    #[test]
    fn crawl_failure_with_artifacts_is_upgraded() {
        let report = ArtifactReport {
            artifacts: vec!["01_policy_a.md".to_string()],
            ..ArtifactReport::default()
        };
        let verdict = reconcile(TaskKind::Crawl, Some(&exit_failure()), Some(&report));
        assert!(verdict.success);
        assert!(verdict.reconciled);
        assert!(verdict
            .note
            .expect("note")
            .contains("PROCESS_EXIT_FAILURE"));
    }

    #[test]
    fn crawl_failure_without_artifacts_stays_failed() {
        let verdict = reconcile(
            TaskKind::Crawl,
            Some(&exit_failure()),
            Some(&ArtifactReport::default()),
        );
        assert!(!verdict.success);
        assert!(!verdict.reconciled);
    }

    #[test]
    fn analysis_tasks_are_never_reconciled() {
        let report = ArtifactReport {
            artifacts: vec!["stray.md".to_string()],
            ..ArtifactReport::default()
        };
        let verdict = reconcile(
            TaskKind::PolicyAnalysis,
            Some(&exit_failure()),
            Some(&report),
        );
        assert!(!verdict.success);
    }

    #[test]
    fn clean_session_needs_no_reconciliation() {
        let verdict = reconcile(TaskKind::Crawl, None, None);
        assert_eq!(
            verdict,
            Reconciliation {
                success: true,
                reconciled: false,
                note: None
            }
        );
    }
}
