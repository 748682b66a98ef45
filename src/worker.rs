//! Long-lived compiler worker subprocess.
//!
//! One worker per resource type, launched with the pipeline definition's
//! executable and arguments plus `--persistent`. The worker owns the child
//! process handle, the write half of its stdin, a reader task draining its
//! stdout into the cache's signal channel, and the FIFO of requests waiting
//! for it. Workers are single-threaded: at most one request is in flight.

use crate::cache::BuildInput;
use crate::error::{PipelineError, Result};
use crate::ipc::{self, Message};
use crate::project::CompilerDef;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle of a worker subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Launched, version handshake not yet answered.
    Spawning,
    Idle,
    Busy,
    Terminating,
    Dead,
}

/// What a worker's stdout reader hands back to the cache.
#[derive(Debug)]
pub enum WorkerSignal {
    Message(Message),
    /// The worker produced output the protocol cannot parse.
    Malformed(String),
    /// The worker's stdout closed.
    Closed,
}

pub type SignalSender = mpsc::UnboundedSender<(String, WorkerSignal)>;

#[derive(Debug)]
pub struct Worker {
    pub resource_type: String,
    /// Executable basename, recorded into target entries.
    pub compiler_name: String,
    pub state: WorkerState,
    pub version: Option<u32>,
    pub queue: VecDeque<BuildInput>,
    pub in_flight: Option<BuildInput>,
    executable: PathBuf,
    args: Vec<String>,
    child: Child,
    stdin: Option<ChildStdin>,
    reader: JoinHandle<()>,
}

impl Worker {
    /// Spawn the subprocess for `resource_type` and begin the version
    /// handshake. The executable resolves against `processor_root` when the
    /// pipeline definition names it with a relative path.
    pub async fn spawn(
        resource_type: &str,
        def: &CompilerDef,
        processor_root: &Path,
        signals: &SignalSender,
    ) -> Result<Worker> {
        let executable = {
            let path = Path::new(&def.executable);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                processor_root.join(path)
            }
        };
        let compiler_name = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| def.executable.clone());

        let (child, stdin, reader) =
            launch(resource_type, &executable, &def.args, signals).await?;
        debug!(resource_type, executable = %executable.display(), "worker spawned");

        Ok(Worker {
            resource_type: resource_type.to_string(),
            compiler_name,
            state: WorkerState::Spawning,
            version: None,
            queue: VecDeque::new(),
            in_flight: None,
            executable,
            args: def.args.clone(),
            child,
            stdin,
            reader,
        })
    }

    /// Replace a crashed or dead child with a fresh one. Queued requests
    /// are kept; the handshake starts over.
    pub async fn respawn(&mut self, signals: &SignalSender) -> Result<()> {
        warn!(resource_type = %self.resource_type, "relaunching compiler worker");
        self.reader.abort();
        let _ = self.child.start_kill();
        let (child, stdin, reader) =
            launch(&self.resource_type, &self.executable, &self.args, signals).await?;
        self.child = child;
        self.stdin = stdin;
        self.reader = reader;
        self.state = WorkerState::Spawning;
        self.version = None;
        Ok(())
    }

    /// Send one message down the worker's stdin.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => ipc::write_message(stdin, message).await,
            None => Err(PipelineError::ChannelClosed),
        }
    }

    /// Close stdin and wait for an orderly exit; force-kill past `grace`.
    pub async fn shutdown(&mut self, grace: Duration) {
        self.state = WorkerState::Terminating;
        self.stdin.take();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {
                debug!(resource_type = %self.resource_type, "worker exited");
            }
            Err(_) => {
                warn!(
                    resource_type = %self.resource_type,
                    "worker ignored shutdown, killing"
                );
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
        self.reader.abort();
        self.state = WorkerState::Dead;
    }
}

async fn launch(
    resource_type: &str,
    executable: &Path,
    args: &[String],
    signals: &SignalSender,
) -> Result<(Child, Option<ChildStdin>, JoinHandle<()>)> {
    let mut command = Command::new(executable);
    command
        .args(args)
        .arg("--persistent")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
        resource_type: resource_type.to_string(),
        executable: executable.display().to_string(),
        source,
    })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        PipelineError::Protocol(format!("no stdout pipe for `{}` worker", resource_type))
    })?;
    let mut stdin = child.stdin.take().ok_or_else(|| {
        PipelineError::Protocol(format!("no stdin pipe for `{}` worker", resource_type))
    })?;

    let reader = tokio::spawn(read_loop(
        resource_type.to_string(),
        stdout,
        signals.clone(),
    ));

    // A fresh worker answers the version query before anything else.
    ipc::write_message(&mut stdin, &Message::VersionQuery).await?;

    Ok((child, Some(stdin), reader))
}

async fn read_loop(resource_type: String, stdout: ChildStdout, signals: SignalSender) {
    let mut reader = BufReader::new(stdout);
    loop {
        match ipc::read_message(&mut reader).await {
            Ok(Some(message)) => {
                if signals
                    .send((resource_type.clone(), WorkerSignal::Message(message)))
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                let _ = signals.send((resource_type.clone(), WorkerSignal::Closed));
                break;
            }
            Err(err) => {
                let _ = signals.send((resource_type.clone(), WorkerSignal::Malformed(err.to_string())));
                break;
            }
        }
    }
}
