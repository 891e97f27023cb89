//! buildsock: reports build status for watched projects to a local socket.
//!
//! ## Subcommands
//!
//! - `watch`: watch project roots and report every build cycle until Ctrl-C
//! - `scan`: run the build step once and print the extracted issues as JSON
//! - `send`: run one build cycle and report it to the socket
//! - `clear`: tell the listener to forget a project

mod logging;

use buildsock_core::client::MessageSink;
use buildsock_core::config::{default_project_name, ProjectConfig};
use buildsock_core::project::{run_build_step, run_single_cycle};
use buildsock_core::{build_step, load_config, Config, Coordinator, ProjectDescriptor, ProtocolClient};
use buildsock_protocol::Message;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

#[derive(Parser)]
#[command(name = "buildsock")]
#[command(about = "Build status reporter for buildsock listeners")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listener socket path
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch project roots and report build status until interrupted
    Watch {
        /// Quiet period before a change starts a build
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,

        /// Project roots (replaces the projects listed in the config file)
        #[arg(value_name = "ROOT")]
        roots: Vec<PathBuf>,
    },

    /// Run the build step once and print the issues as JSON
    Scan {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
    },

    /// Run one build cycle and report it to the listener
    Send {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
    },

    /// Send a clear command for a project
    Clear {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_file.as_deref());

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Watch { debounce_ms, roots } => {
            let mut config = config;
            if let Some(debounce_ms) = debounce_ms {
                config.debounce_ms = debounce_ms;
            }
            if !roots.is_empty() {
                config.projects = roots
                    .into_iter()
                    .map(|root| ProjectConfig { name: None, root })
                    .collect();
            }
            run_watch(&config)
        }
        Commands::Scan { root } => run_scan(&config, &root),
        Commands::Send { root } => run_send(&config, &root),
        Commands::Clear { root } => run_clear(&config, &root),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "buildsock failed");
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<Config, String> {
    let mut config = load_config(cli.config.as_deref()).map_err(|err| err.to_string())?;
    config.apply_env();
    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }
    Ok(config)
}

fn run_watch(config: &Config) -> Result<(), String> {
    let cwd = std::env::current_dir().map_err(|err| format!("Cannot read cwd: {}", err))?;
    let projects = config
        .resolve_projects(&cwd)
        .map_err(|err| err.to_string())?;
    if projects.is_empty() {
        return Err("No projects to watch".to_string());
    }

    let step = build_step::from_config(config).map_err(|err| err.to_string())?;
    let coordinator = Coordinator::start(projects, config, step);
    if coordinator.is_empty() {
        coordinator.shutdown();
        return Err("No project could be watched".to_string());
    }

    tracing::info!(
        socket = %config.socket_path.display(),
        projects = coordinator.active_projects().len(),
        "buildsock started"
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| format!("Failed to install interrupt handler: {}", err))?;

    let _ = rx.recv();
    tracing::info!("Interrupted, clearing projects");
    coordinator.shutdown();
    Ok(())
}

fn run_scan(config: &Config, root: &Path) -> Result<(), String> {
    let descriptor = descriptor_for(root)?;
    let step = build_step::from_config(config).map_err(|err| err.to_string())?;
    let issues = run_build_step(step.as_ref(), &descriptor.root).map_err(|err| err.to_string())?;
    let json = serde_json::to_string_pretty(&issues)
        .map_err(|err| format!("Failed to serialize issues: {}", err))?;
    println!("{}", json);
    Ok(())
}

fn run_send(config: &Config, root: &Path) -> Result<(), String> {
    let descriptor = descriptor_for(root)?;
    let step = build_step::from_config(config).map_err(|err| err.to_string())?;
    let client = ProtocolClient::new(&config.socket_path, config.send_timeout());
    let issues = run_single_cycle(&descriptor, step.as_ref(), &client)?;
    tracing::info!(project = %descriptor.name, issues = issues.len(), "Cycle reported");
    Ok(())
}

fn run_clear(config: &Config, root: &Path) -> Result<(), String> {
    let descriptor = descriptor_for(root)?;
    let client = ProtocolClient::new(&config.socket_path, config.send_timeout());
    client
        .send(&Message::clear(descriptor.project_key()))
        .map_err(|err| err.to_string())
}

fn descriptor_for(root: &Path) -> Result<ProjectDescriptor, String> {
    let root = std::fs::canonicalize(root)
        .map_err(|err| format!("Invalid project root {}: {}", root.display(), err))?;
    Ok(ProjectDescriptor {
        name: default_project_name(&root),
        root,
    })
}
