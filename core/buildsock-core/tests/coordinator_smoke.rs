use buildsock_core::{ArtifactScan, BuildStep, Config, Coordinator, ProjectDescriptor};
use buildsock_protocol::{decode_message, Command, IssueType, Message};
use std::io::Read;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, sleep, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Consumer {
    messages: Arc<Mutex<Vec<Message>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Consumer {
    fn bind(path: &Path) -> Self {
        let listener = UnixListener::bind(path).expect("bind consumer socket");
        listener.set_nonblocking(true).expect("nonblocking listener");

        let messages = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let messages_clone = Arc::clone(&messages);
        let stop_clone = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            while !stop_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).expect("blocking stream");
                        let mut buffer = Vec::new();
                        stream.read_to_end(&mut buffer).expect("read message");
                        let message = decode_message(&buffer).expect("valid message");
                        messages_clone.lock().unwrap().push(message);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            messages,
            stop,
            thread: Some(thread),
        }
    }

    fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Vec<Message>
    where
        F: Fn(&[Message]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let messages = self.snapshot();
            if predicate(&messages) {
                return messages;
            }
            sleep(Duration::from_millis(10));
        }
        panic!("Timed out waiting for consumer messages: {:?}", self.snapshot());
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn project(root: &Path) -> ProjectDescriptor {
    let root = std::fs::canonicalize(root).expect("canonical root");
    ProjectDescriptor {
        name: "demo".to_string(),
        root,
    }
}

fn config(socket: PathBuf) -> Config {
    Config {
        socket_path: socket,
        debounce_ms: 50,
        ..Config::default()
    }
}

fn scan() -> Arc<dyn BuildStep> {
    Arc::new(ArtifactScan::new(&["**/*.log".to_string()]).expect("valid pattern"))
}

#[test]
fn reports_issues_from_changed_artifacts_and_clears_on_shutdown() {
    let sockets = TempDir::new().expect("socket dir");
    let socket = sockets.path().join("consumer.sock");
    let consumer = Consumer::bind(&socket);

    let workspace = TempDir::new().expect("project dir");
    let descriptor = project(workspace.path());
    let key = descriptor.project_key();
    let coordinator = Coordinator::start(vec![descriptor.clone()], &config(socket), scan());
    assert_eq!(coordinator.active_projects().len(), 1);

    std::fs::create_dir_all(descriptor.root.join("build")).expect("build dir");
    std::fs::write(
        descriptor.root.join("build/out.log"),
        "compiling\nERROR: bad token\n  at line 3\n\n",
    )
    .expect("write log");

    let messages = consumer.wait_until(Duration::from_secs(10), |messages| {
        messages.iter().any(|message| {
            matches!(message.commands.first(), Some(Command::ShowIssues { .. }))
        })
    });

    coordinator.shutdown();
    let after = consumer.wait_until(Duration::from_secs(5), |messages| {
        messages.last() == Some(&Message::clear(key.clone()))
    });

    assert!(messages.iter().all(|message| message.project == key));
    assert_eq!(
        messages[0].commands,
        vec![buildsock_core::cycle::building_status()]
    );

    let reported = messages
        .iter()
        .find_map(|message| match message.commands.as_slice() {
            [Command::ShowIssues { issues }, status] => Some((issues.clone(), status.clone())),
            _ => None,
        })
        .expect("show-issues message");
    assert_eq!(reported.1, Command::status("Build failed"));
    assert_eq!(reported.0.len(), 1);
    let issue = &reported.0[0];
    assert_eq!(issue.issue_type, IssueType::Error);
    assert_eq!(issue.message.as_deref(), Some("bad token"));
    assert_eq!(issue.file.as_deref(), Some("build/out.log"));
    assert_eq!(issue.line, Some(2));
    assert_eq!(issue.details.as_deref(), Some("  at line 3"));

    let clears = after
        .iter()
        .filter(|message| message.commands == vec![Command::Clear])
        .count();
    assert_eq!(clears, 1);
}

#[test]
fn missing_root_is_skipped_and_others_still_clear() {
    let sockets = TempDir::new().expect("socket dir");
    let socket = sockets.path().join("consumer.sock");
    let consumer = Consumer::bind(&socket);

    let workspace = TempDir::new().expect("project dir");
    let good = project(workspace.path());
    let missing = ProjectDescriptor {
        name: "missing".to_string(),
        root: workspace.path().join("does-not-exist"),
    };

    let coordinator = Coordinator::start(vec![missing, good.clone()], &config(socket), scan());
    assert_eq!(coordinator.active_projects(), vec![&good]);
    assert_eq!(coordinator.skipped_projects().len(), 1);
    assert_eq!(coordinator.skipped_projects()[0].descriptor.name, "missing");

    coordinator.shutdown();
    let messages = consumer.wait_until(Duration::from_secs(5), |messages| !messages.is_empty());
    sleep(Duration::from_millis(50));
    assert_eq!(consumer.snapshot(), messages);
    assert_eq!(messages, vec![Message::clear(good.project_key())]);
}

#[test]
fn absent_consumer_does_not_block_shutdown() {
    let sockets = TempDir::new().expect("socket dir");
    let workspace = TempDir::new().expect("project dir");
    let descriptor = project(workspace.path());

    let coordinator = Coordinator::start(
        vec![descriptor.clone()],
        &config(sockets.path().join("nobody-listening.sock")),
        scan(),
    );
    std::fs::write(descriptor.root.join("out.log"), "ERROR: unheard\n").expect("write log");
    sleep(Duration::from_millis(200));

    let started = Instant::now();
    coordinator.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
}
