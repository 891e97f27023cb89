//! Wire protocol types for buildsock status messages.
//!
//! This crate is shared by the coordinator and its tooling so every sender
//! produces the same JSON shape. A message is one JSON document per socket
//! connection; there is no framing beyond the bytes themselves.
//!
//! Unset optional fields are omitted from the encoded document rather than
//! written as `null`, so consumers can distinguish "absent" from "empty".

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/sublime.buildsock.sock";
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    #[default]
    Generic,
    Info,
    Warning,
    Error,
}

impl IssueType {
    pub fn is_generic(&self) -> bool {
        matches!(self, IssueType::Generic)
    }
}

/// One diagnostic finding.
///
/// `file` is relative to the project root; `line` and `column` are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Issue {
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "IssueType::is_generic"
    )]
    pub issue_type: IssueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

impl Issue {
    pub fn new(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Absolute location of the issue's file, resolved against the project root.
    pub fn path(&self, root: &Path) -> Option<PathBuf> {
        self.file.as_ref().map(|file| root.join(file))
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_positive(self.line, "line")?;
        require_positive(self.column, "column")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpinnerName {
    Clock,
    Dot1,
    Dot2,
    Dot3,
}

/// Either one of the consumer's built-in spinners or explicit animation frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Spinner {
    Named(SpinnerName),
    Frames(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    ShowIssues {
        issues: Vec<Issue>,
    },
    HideIssues,
    ShowStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spinner: Option<Spinner>,
    },
    HideStatus,
    Clear,
}

impl Command {
    pub fn status(message: impl Into<String>) -> Self {
        Command::ShowStatus {
            message: Some(message.into()),
            spinner: None,
        }
    }

    pub fn status_with_spinner(message: impl Into<String>, spinner: Spinner) -> Self {
        Command::ShowStatus {
            message: Some(message.into()),
            spinner: Some(spinner),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::ShowIssues { .. } => "show-issues",
            Command::HideIssues => "hide-issues",
            Command::ShowStatus { .. } => "show-status",
            Command::HideStatus => "hide-status",
            Command::Clear => "clear",
        }
    }
}

/// The unit of transmission: one message per socket connection.
///
/// Commands within a message are applied by the consumer as one ordered batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    pub project: String,
    pub commands: Vec<Command>,
}

impl Message {
    pub fn new(project: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            project: project.into(),
            commands,
        }
    }

    pub fn clear(project: impl Into<String>) -> Self {
        Self::new(project, vec![Command::Clear])
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.project.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "project is required"));
        }
        for command in &self.commands {
            if let Command::ShowIssues { issues } = command {
                for issue in issues {
                    issue.validate()?;
                }
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ErrorInfo> {
        serde_json::to_vec(self).map_err(|err| {
            ErrorInfo::new(
                "serialization_error",
                format!("failed to encode message: {}", err),
            )
        })
    }
}

/// Parses and validates one message document.
pub fn decode_message(bytes: &[u8]) -> Result<Message, ErrorInfo> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(ErrorInfo::new(
            "message_too_large",
            "message exceeded maximum size",
        ));
    }
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_message", "message body was empty"));
    }
    let message: Message = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("message was not valid JSON: {}", err),
        )
    })?;
    message.validate()?;
    Ok(message)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

fn require_positive(value: Option<u32>, field: &str) -> Result<(), ErrorInfo> {
    match value {
        Some(0) => Err(ErrorInfo::new(
            "invalid_position",
            format!("{} must be 1 or greater", field),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_issue() -> Issue {
        Issue {
            issue_type: IssueType::Warning,
            message: Some("unused variable".to_string()),
            file: Some("src/main.c".to_string()),
            line: Some(12),
            column: Some(4),
            details: Some("first\nsecond".to_string()),
            tooltip: Some("hover".to_string()),
        }
    }

    #[test]
    fn encodes_status_with_named_spinner() {
        let message = Message::new(
            "/repo",
            vec![Command::status_with_spinner(
                "Building",
                Spinner::Named(SpinnerName::Clock),
            )],
        );
        let value: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "project": "/repo",
                "commands": [
                    { "command": "show-status", "message": "Building", "spinner": "clock" }
                ]
            })
        );
    }

    #[test]
    fn encodes_unit_commands_with_only_tag() {
        let message = Message::new(
            "/repo",
            vec![Command::HideIssues, Command::HideStatus, Command::Clear],
        );
        let value: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value["commands"],
            json!([
                { "command": "hide-issues" },
                { "command": "hide-status" },
                { "command": "clear" }
            ])
        );
    }

    #[test]
    fn generic_issue_omits_type_and_unset_fields() {
        let issue = Issue {
            message: Some(String::new()),
            ..Issue::default()
        };
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value, json!({ "message": "" }));
    }

    #[test]
    fn missing_type_decodes_as_generic() {
        let issue: Issue = serde_json::from_value(json!({ "message": "x" })).unwrap();
        assert_eq!(issue.issue_type, IssueType::Generic);
        assert_eq!(issue.file, None);
    }

    #[test]
    fn round_trip_preserves_absent_and_empty_fields() {
        let sparse = Issue {
            issue_type: IssueType::Error,
            message: Some(String::new()),
            ..Issue::default()
        };
        let message = Message::new(
            "/repo",
            vec![
                Command::ShowIssues {
                    issues: vec![full_issue(), sparse],
                },
                Command::ShowStatus {
                    message: None,
                    spinner: Some(Spinner::Frames(vec!["|".into(), "/".into()])),
                },
            ],
        );
        let decoded = decode_message(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decodes_frame_list_spinner() {
        let decoded = decode_message(
            br#"{"project":"/p","commands":[{"command":"show-status","spinner":["a","b"]}]}"#,
        )
        .unwrap();
        assert_eq!(
            decoded.commands,
            vec![Command::ShowStatus {
                message: None,
                spinner: Some(Spinner::Frames(vec!["a".into(), "b".into()])),
            }]
        );
    }

    #[test]
    fn rejects_zero_line() {
        let mut issue = full_issue();
        issue.line = Some(0);
        let message = Message::new("/repo", vec![Command::ShowIssues { issues: vec![issue] }]);
        let err = message.validate().unwrap_err();
        assert_eq!(err.code, "invalid_position");
    }

    #[test]
    fn rejects_empty_project() {
        let err = decode_message(br#"{"project":" ","commands":[]}"#).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn rejects_unknown_command() {
        let err = decode_message(br#"{"project":"/p","commands":[{"command":"explode"}]}"#)
            .unwrap_err();
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn rejects_empty_body() {
        let err = decode_message(b"  \n").unwrap_err();
        assert_eq!(err.code, "empty_message");
    }

    #[test]
    fn issue_path_joins_root() {
        let issue = full_issue();
        assert_eq!(
            issue.path(Path::new("/repo")),
            Some(PathBuf::from("/repo/src/main.c"))
        );
        assert_eq!(Issue::default().path(Path::new("/repo")), None);
    }
}
