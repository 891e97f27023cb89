//! Build cycle state machine for one project.
//!
//! ```text
//! idle     --change-->          building   (or arm the debounce deadline)
//! idle     --deadline passes--> building
//! building --change-->          queued
//! queued   --change-->          queued
//! building --finished-->        idle
//! queued   --finished-->        building   (immediate rebuild)
//! any      --shutdown-->        terminal   (clear)
//! ```
//!
//! The machine is pure: it owns no timers, threads or sockets. Callers pass
//! the current `Instant` into every transition and carry out the returned
//! effects in order.

use crate::error::BuildStepError;
use buildsock_protocol::{Command, Issue, Message, Spinner, SpinnerName};
use std::time::{Duration, Instant};

pub const BUILDING_STATUS: &str = "Building";
pub const FAILED_STATUS: &str = "Build failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Building,
    /// Building, with another change seen since the build started.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(Message),
    StartBuild,
}

#[derive(Debug)]
pub struct BuildCycle {
    project: String,
    debounce: Duration,
    state: CycleState,
    deadline: Option<Instant>,
    started_at: Option<Instant>,
    pending_issues: Vec<Issue>,
    shut_down: bool,
}

impl BuildCycle {
    pub fn new(project: impl Into<String>, debounce: Duration) -> Self {
        Self {
            project: project.into(),
            debounce,
            state: CycleState::Idle,
            deadline: None,
            started_at: None,
            pending_issues: Vec::new(),
            shut_down: false,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Pending debounce deadline, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Issues reported by the most recently completed cycle.
    pub fn pending_issues(&self) -> &[Issue] {
        &self.pending_issues
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn on_change(&mut self, now: Instant) -> Vec<Effect> {
        if self.shut_down {
            return Vec::new();
        }

        match self.state {
            CycleState::Idle if self.debounce.is_zero() => self.begin(now),
            CycleState::Idle => {
                self.deadline = Some(now + self.debounce);
                Vec::new()
            }
            CycleState::Building | CycleState::Queued => {
                self.state = CycleState::Queued;
                Vec::new()
            }
        }
    }

    /// Fires the debounce deadline if it has passed.
    pub fn on_deadline(&mut self, now: Instant) -> Vec<Effect> {
        if self.shut_down || self.state != CycleState::Idle {
            return Vec::new();
        }
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.begin(now)
            }
            _ => Vec::new(),
        }
    }

    pub fn on_build_finished(
        &mut self,
        outcome: Result<Vec<Issue>, BuildStepError>,
        now: Instant,
    ) -> Vec<Effect> {
        if self.shut_down || self.state == CycleState::Idle {
            return Vec::new();
        }

        let elapsed = self
            .started_at
            .take()
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();

        let commands = match outcome {
            Ok(issues) => {
                let commands = completion_commands(&issues, elapsed);
                self.pending_issues = issues;
                commands
            }
            Err(err) => {
                self.pending_issues = Vec::new();
                vec![
                    Command::HideIssues,
                    Command::status(format!("Build error: {}", err)),
                ]
            }
        };

        let mut effects = vec![Effect::Send(Message::new(self.project.clone(), commands))];
        if self.state == CycleState::Queued {
            effects.extend(self.begin(now));
        } else {
            self.state = CycleState::Idle;
        }
        effects
    }

    /// Cancels any pending deadline and clears the consumer's view of the
    /// project. Later transitions are ignored.
    pub fn on_shutdown(&mut self) -> Vec<Effect> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;
        self.deadline = None;
        vec![Effect::Send(Message::clear(self.project.clone()))]
    }

    fn begin(&mut self, now: Instant) -> Vec<Effect> {
        self.state = CycleState::Building;
        self.started_at = Some(now);
        vec![
            Effect::Send(Message::new(self.project.clone(), vec![building_status()])),
            Effect::StartBuild,
        ]
    }
}

pub fn building_status() -> Command {
    Command::status_with_spinner(BUILDING_STATUS, Spinner::Named(SpinnerName::Clock))
}

/// Commands reported when a build step finishes normally.
pub fn completion_commands(issues: &[Issue], elapsed: Duration) -> Vec<Command> {
    if issues.is_empty() {
        vec![
            Command::HideIssues,
            Command::status(format!(
                "Build finished in {} seconds",
                format_elapsed(elapsed)
            )),
        ]
    } else {
        vec![
            Command::ShowIssues {
                issues: issues.to_vec(),
            },
            Command::status(FAILED_STATUS),
        ]
    }
}

/// Seconds rounded to the nearest tenth, e.g. 1234ms -> "1.2".
pub fn format_elapsed(elapsed: Duration) -> String {
    let tenths = (elapsed.as_millis() + 50) / 100;
    format!("{}.{}", tenths / 10, tenths % 10)
}
