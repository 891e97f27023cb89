//! # buildsock-core
//!
//! Build-event coordinator: watches project directories, coalesces bursts of
//! changes into build cycles, extracts tagged issues from build artifacts and
//! reports status to a local socket listener.
//!
//! ## Design Principles
//!
//! - **Synchronous**: threads and channels, no async runtime.
//! - **Pure core**: `cycle::BuildCycle` takes time as an argument and returns
//!   effects; the threads in `project` carry them out.
//! - **Isolated projects**: a failing watch, build or send affects only its
//!   own project.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use buildsock_core::{build_step, Config, Coordinator};
//!
//! let config = Config::default();
//! let step = build_step::from_config(&config)?;
//! let coordinator = Coordinator::start(projects, &config, step);
//! // ... later
//! coordinator.shutdown();
//! ```

pub mod build_step;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod cycle;
pub mod error;
pub mod extract;
pub mod project;
pub mod watcher;

pub use build_step::{ArtifactScan, BuildStep, CommandStep, DelayedStep};
pub use client::{MessageSink, ProtocolClient};
pub use config::{load_config, Config, ProjectDescriptor};
pub use coordinator::Coordinator;
pub use cycle::{BuildCycle, CycleState, Effect};
pub use error::{BuildStepError, ConfigError, SendError, WatchError};
pub use extract::{extract_issues, Artifact};
