//! Pluggable build steps.
//!
//! A build step takes a project root and returns the raw text artifacts the
//! issue extractor scans. Steps run on a worker thread, so they may block.

use crate::config::Config;
use crate::error::BuildStepError;
use crate::extract::Artifact;
use glob::Pattern;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

pub trait BuildStep: Send + Sync {
    fn run(&self, root: &Path) -> Result<Vec<Artifact>, BuildStepError>;
}

impl<S: BuildStep + ?Sized> BuildStep for Arc<S> {
    fn run(&self, root: &Path) -> Result<Vec<Artifact>, BuildStepError> {
        (**self).run(root)
    }
}

/// Collects text files under the root whose relative path matches one of
/// the configured glob patterns. Discovery order is sorted by path.
#[derive(Debug, Clone)]
pub struct ArtifactScan {
    patterns: Vec<Pattern>,
}

impl ArtifactScan {
    pub fn new(patterns: &[String]) -> Result<Self, BuildStepError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|err| BuildStepError::Pattern {
                    pattern: pattern.clone(),
                    details: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    fn matches(&self, relative: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(relative))
    }
}

impl BuildStep for ArtifactScan {
    fn run(&self, root: &Path) -> Result<Vec<Artifact>, BuildStepError> {
        if !root.is_dir() {
            return Err(BuildStepError::Scan {
                path: root.to_path_buf(),
                details: "not a directory".to_string(),
            });
        }

        let mut artifacts = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git");

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(
                        path = ?err.path(),
                        error = %err,
                        "Skipping unreadable directory entry"
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };
            if !self.matches(&relative) {
                continue;
            }

            match fs_err::read_to_string(entry.path()) {
                Ok(contents) => artifacts.push(Artifact::file(relative, contents)),
                Err(err) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "Skipping unreadable artifact"
                    );
                }
            }
        }

        Ok(artifacts)
    }
}

/// `path` relative to `root`, with `/` separators, as artifact patterns
/// expect it.
pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Runs an external program in the project root. Its combined output is the
/// first artifact; a scan, if configured, contributes the rest.
///
/// A non-zero exit status is not an error: failing builds are expected to
/// report their problems as tagged lines.
#[derive(Debug, Clone)]
pub struct CommandStep {
    program: String,
    args: Vec<String>,
    scan: Option<ArtifactScan>,
}

impl CommandStep {
    pub fn new(program: impl Into<String>, args: Vec<String>, scan: Option<ArtifactScan>) -> Self {
        Self {
            program: program.into(),
            args,
            scan,
        }
    }
}

impl BuildStep for CommandStep {
    fn run(&self, root: &Path) -> Result<Vec<Artifact>, BuildStepError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(root)
            .output()
            .map_err(|source| BuildStepError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        tracing::debug!(
            program = %self.program,
            status = ?output.status.code(),
            "Build command exited"
        );

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let mut artifacts = vec![Artifact::output(combined)];
        if let Some(scan) = &self.scan {
            artifacts.extend(scan.run(root)?);
        }
        Ok(artifacts)
    }
}

/// Sleeps for a fixed duration before delegating, standing in for real
/// build time in demos and tests.
#[derive(Debug, Clone)]
pub struct DelayedStep<S> {
    inner: S,
    delay: Duration,
}

impl<S> DelayedStep<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<S: BuildStep> BuildStep for DelayedStep<S> {
    fn run(&self, root: &Path) -> Result<Vec<Artifact>, BuildStepError> {
        thread::sleep(self.delay);
        self.inner.run(root)
    }
}

/// Builds the step described by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn BuildStep>, BuildStepError> {
    let scan = if config.artifact_patterns.is_empty() {
        None
    } else {
        Some(ArtifactScan::new(&config.artifact_patterns)?)
    };

    let step: Arc<dyn BuildStep> = match config.build_command.split_first() {
        Some((program, args)) => Arc::new(CommandStep::new(program.clone(), args.to_vec(), scan)),
        None => Arc::new(scan.unwrap_or(ArtifactScan {
            patterns: Vec::new(),
        })),
    };

    if config.build_delay_ms == 0 {
        Ok(step)
    } else {
        Ok(Arc::new(DelayedStep::new(step, config.build_delay())))
    }
}
