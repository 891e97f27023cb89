//! Coordinator configuration.
//!
//! Loaded once at startup from an optional TOML file; every field has a
//! default so an empty (or missing) file yields a working configuration.
//! The resulting value is read-only for the lifetime of the process.

use crate::error::ConfigError;
use buildsock_protocol::DEFAULT_SOCKET_PATH;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SOCKET_ENV: &str = "BUILDSOCK_SOCKET";
const CONFIG_RELATIVE_PATH: &str = "buildsock/config.toml";
const DEFAULT_DEBOUNCE_MS: u64 = 100;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 2000;
const DEFAULT_ARTIFACT_PATTERN: &str = "**/*.log";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub root: PathBuf,
}

/// A project as handed to the coordinator: a stable display name and an
/// absolute root path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    pub name: String,
    pub root: PathBuf,
}

impl ProjectDescriptor {
    /// Value used for the protocol's `project` field.
    pub fn project_key(&self) -> String {
        self.root.to_string_lossy().to_string()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub socket_path: PathBuf,
    pub debounce_ms: u64,
    pub send_timeout_ms: u64,
    pub artifact_patterns: Vec<String>,
    pub ignore_suffixes: Vec<String>,
    pub build_command: Vec<String>,
    pub build_delay_ms: u64,
    pub projects: Vec<ProjectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            artifact_patterns: vec![DEFAULT_ARTIFACT_PATTERN.to_string()],
            ignore_suffixes: Vec::new(),
            build_command: Vec::new(),
            build_delay_ms: 0,
            projects: Vec::new(),
        }
    }
}

impl Config {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn build_delay(&self) -> Duration {
        Duration::from_millis(self.build_delay_ms)
    }

    /// Applies environment overrides on top of the file. Command-line flags
    /// are applied afterwards by the caller.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(SOCKET_ENV) {
            if !path.trim().is_empty() {
                self.socket_path = PathBuf::from(path);
            }
        }
    }

    /// Resolves configured projects to absolute roots relative to `cwd`.
    ///
    /// Roots that cannot be canonicalized are kept as absolute paths; the
    /// watcher reports them when it fails to attach.
    pub fn resolve_projects(&self, cwd: &Path) -> Result<Vec<ProjectDescriptor>, ConfigError> {
        self.projects
            .iter()
            .map(|project| resolve_project(project, cwd))
            .collect()
    }
}

fn resolve_project(project: &ProjectConfig, cwd: &Path) -> Result<ProjectDescriptor, ConfigError> {
    if project.root.as_os_str().is_empty() {
        return Err(ConfigError::InvalidProjectRoot {
            path: project.root.clone(),
            reason: "root must not be empty".to_string(),
        });
    }

    let absolute = if project.root.is_absolute() {
        project.root.clone()
    } else {
        cwd.join(&project.root)
    };
    let root = fs_err::canonicalize(&absolute).unwrap_or(absolute);

    let name = project
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_project_name(&root));

    Ok(ProjectDescriptor { name, root })
}

pub fn default_project_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| root.to_string_lossy().to_string())
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_RELATIVE_PATH))
}

/// Loads configuration from `path`, or from the default location when no
/// path is given. A missing default file yields `Config::default()`; a
/// missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (config_path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(Config::default()),
        },
    };

    if !explicit && !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    parse_config(&content, &config_path)
}

fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str::<Config>(content).map_err(|err| ConfigError::Malformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
