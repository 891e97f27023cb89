//! Recursive directory watching for project roots.
//!
//! Raw notify events are normalized to one `ChangeEvent` per affected path.
//! Access-only events and transient artifacts (editor swap files, partial
//! downloads, VCS internals) are dropped before they reach the caller, as
//! are files the build itself writes when the filter is given their
//! patterns. Dropping the `DirectoryWatcher` stops the watch.

use crate::build_step::relative_path;
use crate::error::WatchError;
use glob::Pattern;
use notify::event::EventKind;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};

const DEFAULT_TRANSIENT_SUFFIXES: &[&str] = &["~", ".tmp", ".swp", ".swx", ".part"];
const TRANSIENT_PREFIXES: &[&str] = &[".#"];
const IGNORED_DIRS: &[&str] = &[".git"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
pub struct TransientFilter {
    suffixes: Vec<String>,
    generated: Vec<Pattern>,
}

impl Default for TransientFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl TransientFilter {
    pub fn new(extra_suffixes: &[String]) -> Self {
        let mut suffixes: Vec<String> = DEFAULT_TRANSIENT_SUFFIXES
            .iter()
            .map(|suffix| suffix.to_string())
            .collect();
        suffixes.extend(
            extra_suffixes
                .iter()
                .filter(|suffix| !suffix.is_empty())
                .cloned(),
        );
        Self {
            suffixes,
            generated: Vec::new(),
        }
    }

    /// Also ignores paths, relative to the watched root, that match one of
    /// `patterns`. Used for build outputs so a build's own writes do not
    /// queue another build. Invalid patterns are skipped.
    pub fn with_generated(mut self, patterns: &[String]) -> Self {
        for pattern in patterns {
            match Pattern::new(pattern) {
                Ok(compiled) => self.generated.push(compiled),
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "Ignoring invalid output pattern");
                }
            }
        }
        self
    }

    pub fn is_generated(&self, root: &Path, path: &Path) -> bool {
        if self.generated.is_empty() {
            return false;
        }
        relative_path(root, path)
            .map(|relative| self.generated.iter().any(|pattern| pattern.matches(&relative)))
            .unwrap_or(false)
    }

    pub fn is_transient(&self, path: &Path) -> bool {
        let in_ignored_dir = path.components().any(|component| match component {
            Component::Normal(name) => IGNORED_DIRS.iter().any(|dir| name == *dir),
            _ => false,
        });
        if in_ignored_dir {
            return true;
        }

        let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
            return false;
        };
        TRANSIENT_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
            || self.suffixes.iter().any(|suffix| name.ends_with(suffix))
    }
}

pub fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Any | EventKind::Other => Some(ChangeKind::Other),
    }
}

/// Splits a raw notify event under `root` into filtered per-path changes.
pub fn normalize_event(event: &Event, root: &Path, filter: &TransientFilter) -> Vec<ChangeEvent> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter(|path| !filter.is_transient(path) && !filter.is_generated(root, path))
        .map(|path| ChangeEvent {
            path: path.clone(),
            kind,
        })
        .collect()
}

pub struct DirectoryWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("root", &self.root)
            .finish()
    }
}

impl DirectoryWatcher {
    /// Starts a recursive watch on `root`, calling `on_change` from the
    /// notify thread for every surviving change.
    pub fn start<F>(root: &Path, filter: TransientFilter, on_change: F) -> Result<Self, WatchError>
    where
        F: Fn(ChangeEvent) + Send + 'static,
    {
        if !root.is_dir() {
            return Err(WatchError::MissingRoot(root.to_path_buf()));
        }

        let watched_root = root.to_path_buf();
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for change in normalize_event(&event, &watched_root, &filter) {
                    on_change(change);
                }
            }
            Err(err) => {
                tracing::warn!(root = %watched_root.display(), error = %err, "Watch error");
            }
        };

        let mut watcher =
            RecommendedWatcher::new(handler, NotifyConfig::default()).map_err(|source| {
                WatchError::Notify {
                    path: root.to_path_buf(),
                    source,
                }
            })?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: root.to_path_buf(),
                source,
            })?;

        tracing::debug!(root = %root.display(), "Watching project root");
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
