//! Owns one project loop and directory watcher per configured project.
//!
//! Projects whose watch cannot be established are logged and left out; they
//! never affect the others. `shutdown` consumes the coordinator, stops every
//! watcher, asks every loop to send `clear`, and returns once all loops have
//! exited. Dropping a coordinator that was not shut down does the same.
//!
//! When a build command is configured, its artifact patterns are treated as
//! build outputs and changes to them never start another build.

use crate::build_step::BuildStep;
use crate::client::{MessageSink, ProtocolClient};
use crate::config::{Config, ProjectDescriptor};
use crate::project::{event_channel, forward_change, ProjectHandle};
use crate::watcher::{DirectoryWatcher, TransientFilter};
use std::sync::Arc;
use std::time::Duration;

struct ActiveProject {
    watcher: DirectoryWatcher,
    handle: ProjectHandle,
}

#[derive(Debug, Clone)]
pub struct SkippedProject {
    pub descriptor: ProjectDescriptor,
    pub reason: String,
}

pub struct Coordinator {
    active: Vec<ActiveProject>,
    skipped: Vec<SkippedProject>,
}

impl Coordinator {
    /// Starts every project, reporting to the socket named in `config`.
    pub fn start(
        projects: Vec<ProjectDescriptor>,
        config: &Config,
        build_step: Arc<dyn BuildStep>,
    ) -> Self {
        let client = ProtocolClient::new(&config.socket_path, config.send_timeout());
        Self::start_with_sink(projects, config, build_step, Arc::new(client))
    }

    pub fn start_with_sink(
        projects: Vec<ProjectDescriptor>,
        config: &Config,
        build_step: Arc<dyn BuildStep>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let filter = watch_filter(config);
        let mut active = Vec::new();
        let mut skipped = Vec::new();

        for descriptor in projects {
            match start_project(
                descriptor.clone(),
                config.debounce(),
                filter.clone(),
                Arc::clone(&build_step),
                Arc::clone(&sink),
            ) {
                Ok(project) => {
                    tracing::info!(
                        project = %descriptor.name,
                        root = %descriptor.root.display(),
                        "Watching project"
                    );
                    active.push(project);
                }
                Err(reason) => {
                    tracing::error!(
                        project = %descriptor.name,
                        root = %descriptor.root.display(),
                        error = %reason,
                        "Project excluded"
                    );
                    skipped.push(SkippedProject { descriptor, reason });
                }
            }
        }

        Self { active, skipped }
    }

    pub fn active_projects(&self) -> Vec<&ProjectDescriptor> {
        self.active
            .iter()
            .map(|project| project.handle.descriptor())
            .collect()
    }

    pub fn skipped_projects(&self) -> &[SkippedProject] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Clears every active project and waits for each loop to finish.
    pub fn shutdown(mut self) {
        self.stop_all();
    }

    fn stop_all(&mut self) {
        let active = std::mem::take(&mut self.active);
        let mut handles = Vec::with_capacity(active.len());
        for project in active {
            let ActiveProject { watcher, handle } = project;
            tracing::debug!(root = %watcher.root().display(), "Stopping watcher");
            drop(watcher);
            handle.request_shutdown();
            handles.push(handle);
        }

        let count = handles.len();
        for handle in handles {
            handle.join();
        }
        tracing::info!(projects = count, "Coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            tracing::debug!("Coordinator dropped without shutdown");
            self.stop_all();
        }
    }
}

fn watch_filter(config: &Config) -> TransientFilter {
    let filter = TransientFilter::new(&config.ignore_suffixes);
    if config.build_command.is_empty() {
        filter
    } else {
        filter.with_generated(&config.artifact_patterns)
    }
}

fn start_project(
    descriptor: ProjectDescriptor,
    debounce: Duration,
    filter: TransientFilter,
    build_step: Arc<dyn BuildStep>,
    sink: Arc<dyn MessageSink>,
) -> Result<ActiveProject, String> {
    let (sender, receiver) = event_channel();
    let watch_sender = sender.clone();
    let watcher = DirectoryWatcher::start(&descriptor.root, filter, move |change| {
        forward_change(&watch_sender, change);
    })
    .map_err(|err| err.to_string())?;

    let handle = ProjectHandle::spawn_with_channel(
        descriptor,
        debounce,
        build_step,
        sink,
        (sender, receiver),
    )
    .map_err(|err| format!("Failed to start project loop: {}", err))?;

    Ok(ActiveProject { watcher, handle })
}
