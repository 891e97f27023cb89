//! Per-project event loop.
//!
//! Each project gets one thread that owns its `BuildCycle`. Watch
//! notifications, build completions and shutdown requests arrive on a
//! bounded channel; the loop blocks until the next event or the debounce
//! deadline, applies exactly one transition, and carries out its effects
//! before looking at the next event. All of a project's messages are sent
//! from this thread, so they leave in transition order and never overlap.
//!
//! Build steps run on a short-lived worker thread and report back through
//! the same channel.

use crate::build_step::BuildStep;
use crate::client::MessageSink;
use crate::config::ProjectDescriptor;
use crate::cycle::{BuildCycle, Effect};
use crate::error::BuildStepError;
use crate::extract::extract_issues;
use crate::watcher::ChangeEvent;
use buildsock_protocol::{Issue, Message};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum ProjectEvent {
    Changed(ChangeEvent),
    BuildFinished(Result<Vec<Issue>, BuildStepError>),
    Shutdown,
}

/// Handle to a running project loop.
#[derive(Debug)]
pub struct ProjectHandle {
    descriptor: ProjectDescriptor,
    sender: SyncSender<ProjectEvent>,
    thread: JoinHandle<()>,
}

impl ProjectHandle {
    pub fn spawn(
        descriptor: ProjectDescriptor,
        debounce: Duration,
        build_step: Arc<dyn BuildStep>,
        sink: Arc<dyn MessageSink>,
    ) -> std::io::Result<Self> {
        Self::spawn_with_channel(descriptor, debounce, build_step, sink, event_channel())
    }

    /// Like `spawn`, but on a channel created earlier so a watcher can be
    /// attached before the loop exists.
    pub fn spawn_with_channel(
        descriptor: ProjectDescriptor,
        debounce: Duration,
        build_step: Arc<dyn BuildStep>,
        sink: Arc<dyn MessageSink>,
        (sender, receiver): (SyncSender<ProjectEvent>, Receiver<ProjectEvent>),
    ) -> std::io::Result<Self> {
        let runner = ProjectRunner {
            cycle: BuildCycle::new(descriptor.project_key(), debounce),
            name: descriptor.name.clone(),
            root: descriptor.root.clone(),
            build_step,
            sink,
            sender: sender.clone(),
        };

        let thread = thread::Builder::new()
            .name(format!("buildsock-{}", descriptor.name))
            .spawn(move || runner.run(receiver))?;

        Ok(Self {
            descriptor,
            sender,
            thread,
        })
    }

    pub fn descriptor(&self) -> &ProjectDescriptor {
        &self.descriptor
    }

    pub fn notify_change(&self, change: ChangeEvent) {
        forward_change(&self.sender, change);
    }

    /// Asks the loop to clear the project and exit. Does not wait.
    pub fn request_shutdown(&self) {
        if self.sender.send(ProjectEvent::Shutdown).is_err() {
            tracing::debug!(project = %self.descriptor.name, "Project loop already stopped");
        }
    }

    /// Waits for the loop to exit, which happens after its `clear` was attempted.
    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!(project = %self.descriptor.name, "Project loop panicked");
        }
    }
}

pub fn event_channel() -> (SyncSender<ProjectEvent>, Receiver<ProjectEvent>) {
    mpsc::sync_channel(EVENT_QUEUE_CAPACITY)
}

/// Queues a change without blocking the watcher thread. A full queue
/// already holds pending changes, and any one of them triggers the same
/// coalesced build, so the overflow is dropped.
pub fn forward_change(sender: &SyncSender<ProjectEvent>, change: ChangeEvent) {
    match sender.try_send(ProjectEvent::Changed(change)) {
        Ok(()) | Err(TrySendError::Full(_)) => {}
        Err(TrySendError::Disconnected(_)) => {
            tracing::trace!("Dropping change for stopped project");
        }
    }
}

struct ProjectRunner {
    cycle: BuildCycle,
    name: String,
    root: PathBuf,
    build_step: Arc<dyn BuildStep>,
    sink: Arc<dyn MessageSink>,
    sender: SyncSender<ProjectEvent>,
}

impl ProjectRunner {
    fn run(mut self, receiver: Receiver<ProjectEvent>) {
        tracing::debug!(project = %self.name, root = %self.root.display(), "Project loop started");

        loop {
            let event = match self.cycle.deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(timeout) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match receiver.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            let now = Instant::now();
            let effects = match event {
                None => self.cycle.on_deadline(now),
                Some(ProjectEvent::Changed(change)) => {
                    tracing::trace!(
                        project = %self.name,
                        path = %change.path.display(),
                        kind = ?change.kind,
                        "Change observed"
                    );
                    self.cycle.on_change(now)
                }
                Some(ProjectEvent::BuildFinished(outcome)) => {
                    log_outcome(&self.name, &self.root, &outcome);
                    self.cycle.on_build_finished(outcome, now)
                }
                Some(ProjectEvent::Shutdown) => self.cycle.on_shutdown(),
            };

            self.apply(effects);

            if self.cycle.is_shut_down() {
                break;
            }
        }

        tracing::debug!(project = %self.name, "Project loop stopped");
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(message) => deliver(self.sink.as_ref(), &message),
                Effect::StartBuild => self.start_build(),
            }
        }
    }

    fn start_build(&self) {
        tracing::info!(project = %self.name, "Build started");

        let build_step = Arc::clone(&self.build_step);
        let root = self.root.clone();
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name(format!("buildsock-build-{}", self.name))
            .spawn(move || {
                let outcome = run_build_step(build_step.as_ref(), &root);
                // The loop may already have shut down; the result is dropped then.
                let _ = sender.send(ProjectEvent::BuildFinished(outcome));
            });

        if let Err(err) = spawned {
            let outcome = Err(BuildStepError::Spawn {
                program: "build worker".to_string(),
                source: err,
            });
            if self
                .sender
                .try_send(ProjectEvent::BuildFinished(outcome))
                .is_err()
            {
                tracing::error!(project = %self.name, "Could not report failed build start");
            }
        }
    }
}

/// Runs the build step and extracts its issues. A panicking step is
/// reported as a build error so the project never stays in `building`.
pub fn run_build_step(build_step: &dyn BuildStep, root: &Path) -> Result<Vec<Issue>, BuildStepError> {
    match panic::catch_unwind(AssertUnwindSafe(|| build_step.run(root))) {
        Ok(result) => result.map(|artifacts| extract_issues(&artifacts)),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(BuildStepError::Panicked(reason))
        }
    }
}

/// Runs one complete cycle on the calling thread and sends every message it
/// produces. Returns the issues the cycle reported.
pub fn run_single_cycle(
    descriptor: &ProjectDescriptor,
    build_step: &dyn BuildStep,
    sink: &dyn MessageSink,
) -> Result<Vec<Issue>, String> {
    let mut cycle = BuildCycle::new(descriptor.project_key(), Duration::ZERO);
    let mut outcome = None;

    for effect in cycle.on_change(Instant::now()) {
        match effect {
            Effect::Send(message) => deliver(sink, &message),
            Effect::StartBuild => outcome = Some(run_build_step(build_step, &descriptor.root)),
        }
    }

    let outcome = outcome.unwrap_or_else(|| Ok(Vec::new()));
    let result = outcome
        .as_ref()
        .map(|issues| issues.clone())
        .map_err(|err| err.to_string());
    log_outcome(&descriptor.name, &descriptor.root, &outcome);

    for effect in cycle.on_build_finished(outcome, Instant::now()) {
        if let Effect::Send(message) = effect {
            deliver(sink, &message);
        }
    }

    result
}

/// Sends one message; failures are logged and otherwise ignored.
pub fn deliver(sink: &dyn MessageSink, message: &Message) {
    if let Err(err) = sink.send(message) {
        let commands: Vec<&str> = message.commands.iter().map(|c| c.name()).collect();
        tracing::warn!(
            project = %message.project,
            commands = ?commands,
            error = %err,
            "Failed to deliver message"
        );
    }
}

fn log_outcome(name: &str, root: &Path, outcome: &Result<Vec<Issue>, BuildStepError>) {
    match outcome {
        Ok(issues) => {
            tracing::info!(project = %name, issues = issues.len(), "Build finished");
            for issue in issues {
                if let Some(path) = issue.path(root) {
                    tracing::debug!(
                        project = %name,
                        path = %path.display(),
                        line = ?issue.line,
                        message = ?issue.message,
                        "Issue reported"
                    );
                }
            }
        }
        Err(err) => tracing::warn!(project = %name, error = %err, "Build step failed"),
    }
}
