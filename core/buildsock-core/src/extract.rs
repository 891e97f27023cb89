//! Issue extraction from build artifacts.
//!
//! Artifacts are scanned line by line for tag lines of the form
//! `TAG: message`, where `TAG` is one of `GENERIC`, `INFO`, `WARN`,
//! `WARNING` or `ERROR` at the very start of the line. Each tag line opens a
//! new issue; the non-blank lines that follow it (up to the next blank line,
//! tag line, or end of file) become that issue's `details`.
//!
//! A tag line always closes whatever details block is still open.

use buildsock_protocol::{Issue, IssueType};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_TAG_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(GENERIC|INFO|WARNING|WARN|ERROR):(.*)$").unwrap());

/// One text artifact produced by a build step.
///
/// `file` is relative to the project root. Captured process output has no
/// file, and issues found in it carry neither `file` nor `line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file: Option<String>,
    pub contents: String,
}

impl Artifact {
    pub fn file(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            file: Some(path.into()),
            contents: contents.into(),
        }
    }

    pub fn output(contents: impl Into<String>) -> Self {
        Self {
            file: None,
            contents: contents.into(),
        }
    }
}

/// Extracts issues from every artifact, in artifact order then line order.
pub fn extract_issues(artifacts: &[Artifact]) -> Vec<Issue> {
    artifacts
        .iter()
        .flat_map(|artifact| extract_from_text(artifact.file.as_deref(), &artifact.contents))
        .collect()
}

pub fn extract_from_text(file: Option<&str>, text: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut pending: Option<PendingIssue<'_>> = None;

    for (index, line) in text.lines().enumerate() {
        if let Some((issue_type, message)) = parse_tag_line(line) {
            if let Some(open) = pending.take() {
                issues.push(open.finish());
            }
            let line_number = u32::try_from(index + 1).ok();
            pending = Some(PendingIssue {
                issue: Issue {
                    issue_type,
                    message: Some(message.to_string()),
                    file: file.map(str::to_string),
                    line: file.and(line_number),
                    ..Issue::default()
                },
                details: Vec::new(),
            });
            continue;
        }

        if line.trim().is_empty() {
            if let Some(open) = pending.take() {
                issues.push(open.finish());
            }
            continue;
        }

        if let Some(open) = pending.as_mut() {
            open.details.push(line);
        }
    }

    if let Some(open) = pending.take() {
        issues.push(open.finish());
    }

    issues
}

fn parse_tag_line(line: &str) -> Option<(IssueType, &str)> {
    let caps = RE_TAG_LINE.captures(line)?;
    let issue_type = match caps.get(1)?.as_str() {
        "INFO" => IssueType::Info,
        "WARN" | "WARNING" => IssueType::Warning,
        "ERROR" => IssueType::Error,
        _ => IssueType::Generic,
    };
    let message = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
    Some((issue_type, message))
}

struct PendingIssue<'a> {
    issue: Issue,
    details: Vec<&'a str>,
}

impl PendingIssue<'_> {
    fn finish(self) -> Issue {
        let mut issue = self.issue;
        if !self.details.is_empty() {
            issue.details = Some(self.details.join("\n"));
        }
        issue
    }
}
