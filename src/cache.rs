//! Compiler worker cache.
//!
//! Owns one worker subprocess per resource type defined in the pipeline,
//! routes build requests to them, and surfaces their lifecycle as cache
//! events. Requests queue FIFO per worker with a single outstanding
//! request, so for any one worker the N-th completion answers the N-th
//! start; ordering across workers is unspecified.

use crate::error::{PipelineError, Result};
use crate::event::SkipReason;
use crate::ipc::{BuildRequest, BuildResult, Message};
use crate::project::Pipeline;
use crate::worker::{SignalSender, Worker, WorkerSignal, WorkerState};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One unit of work submitted by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInput {
    /// Package the source file belongs to.
    pub bundle: String,
    /// Platform of the target being built.
    pub target: String,
    pub source_path: PathBuf,
    /// Extension-less output stem under the target directory.
    pub target_path: PathBuf,
    pub resource_name: String,
    pub resource_type: String,
    /// Effective platform of the source file itself.
    pub platform: String,
}

#[derive(Debug)]
pub enum CacheEvent {
    /// Every worker answered the version handshake.
    Ready,
    /// A build request went out to a worker.
    Started { input: BuildInput },
    /// The request was dropped without reaching a worker.
    Skipped { input: BuildInput, reason: SkipReason },
    /// A worker answered (or crashed out of) a request.
    Complete { input: BuildInput, result: BuildResult },
    /// All workers have exited.
    Terminated,
}

pub struct CompilerCache {
    workers: HashMap<String, Worker>,
    signal_tx: SignalSender,
    signals: mpsc::UnboundedReceiver<(String, WorkerSignal)>,
    pending_events: VecDeque<CacheEvent>,
    ready_sent: bool,
}

impl CompilerCache {
    /// Spawn one worker per resource type in the pipeline definition.
    /// Failure to spawn any defined compiler is fatal to the project.
    pub async fn new(processor_root: &Path, pipeline: &Pipeline) -> Result<CompilerCache> {
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let mut workers = HashMap::new();
        for (resource_type, def) in pipeline {
            let worker = Worker::spawn(resource_type, def, processor_root, &signal_tx).await?;
            workers.insert(resource_type.clone(), worker);
        }
        info!(workers = workers.len(), "compiler cache started");

        let mut cache = CompilerCache {
            workers,
            signal_tx,
            signals,
            pending_events: VecDeque::new(),
            ready_sent: false,
        };
        cache.note_ready();
        Ok(cache)
    }

    pub fn compiler_name(&self, resource_type: &str) -> Option<&str> {
        self.workers
            .get(resource_type)
            .map(|worker| worker.compiler_name.as_str())
    }

    pub fn compiler_version(&self, resource_type: &str) -> Option<u32> {
        self.workers.get(resource_type).and_then(|worker| worker.version)
    }

    /// Queue a build request for its resource type's worker, dispatching
    /// immediately when the worker is idle. A request for a type with no
    /// worker is answered synchronously with a `Skipped` event.
    pub async fn build(&mut self, input: BuildInput) -> Result<()> {
        if !self.workers.contains_key(&input.resource_type) {
            debug!(
                resource_type = %input.resource_type,
                source = %input.source_path.display(),
                "no compiler for resource type"
            );
            self.pending_events.push_back(CacheEvent::Skipped {
                input,
                reason: SkipReason::NoCompiler,
            });
            return Ok(());
        }
        let resource_type = input.resource_type.clone();
        if let Some(worker) = self.workers.get_mut(&resource_type) {
            worker.queue.push_back(input);
        }
        self.dispatch(&resource_type).await
    }

    /// Next lifecycle event; drives worker signal processing until one is
    /// available.
    pub async fn next_event(&mut self) -> Result<CacheEvent> {
        loop {
            if let Some(event) = self.pending_events.pop_front() {
                return Ok(event);
            }
            let (resource_type, signal) = self
                .signals
                .recv()
                .await
                .ok_or(PipelineError::ChannelClosed)?;
            self.handle_signal(resource_type, signal).await?;
        }
    }

    /// Terminate every worker: close stdin, allow a bounded grace period,
    /// force-kill survivors.
    pub async fn shutdown(&mut self) -> Result<()> {
        for worker in self.workers.values_mut() {
            worker.shutdown(SHUTDOWN_GRACE).await;
        }
        self.pending_events.push_back(CacheEvent::Terminated);
        info!("compiler cache terminated");
        Ok(())
    }

    async fn dispatch(&mut self, resource_type: &str) -> Result<()> {
        let Some(worker) = self.workers.get_mut(resource_type) else {
            return Ok(());
        };
        if worker.state == WorkerState::Dead && !worker.queue.is_empty() {
            worker.respawn(&self.signal_tx).await?;
        }
        if worker.state != WorkerState::Idle || worker.queue.is_empty() {
            return Ok(());
        }
        let Some(input) = worker.queue.pop_front() else {
            return Ok(());
        };
        let request = BuildRequest {
            source_path: input.source_path.display().to_string(),
            target_path: input.target_path.display().to_string(),
            platform: input.platform.clone(),
        };
        worker.send(&Message::BuildRequest(request)).await?;
        worker.state = WorkerState::Busy;
        worker.in_flight = Some(input.clone());
        self.pending_events.push_back(CacheEvent::Started { input });
        Ok(())
    }

    async fn handle_signal(&mut self, resource_type: String, signal: WorkerSignal) -> Result<()> {
        match signal {
            WorkerSignal::Message(Message::VersionData(data)) => {
                if let Some(worker) = self.workers.get_mut(&resource_type) {
                    worker.version = Some(data.version);
                    if worker.state == WorkerState::Spawning {
                        worker.state = WorkerState::Idle;
                    }
                    debug!(%resource_type, version = data.version, "worker handshake complete");
                }
                self.note_ready();
                self.dispatch(&resource_type).await
            }
            WorkerSignal::Message(Message::BuildResult(result)) => {
                let completed = self.workers.get_mut(&resource_type).and_then(|worker| {
                    if worker.state == WorkerState::Busy {
                        worker.state = WorkerState::Idle;
                    }
                    worker.in_flight.take()
                });
                match completed {
                    Some(input) => {
                        self.pending_events
                            .push_back(CacheEvent::Complete { input, result });
                    }
                    None => {
                        warn!(%resource_type, "unsolicited build result from worker");
                    }
                }
                self.dispatch(&resource_type).await
            }
            WorkerSignal::Message(other) => {
                warn!(%resource_type, message = ?other, "unexpected cache-bound message");
                Ok(())
            }
            WorkerSignal::Closed => {
                self.handle_worker_loss(&resource_type, "process exited".to_string())
                    .await
            }
            WorkerSignal::Malformed(detail) => {
                self.handle_worker_loss(&resource_type, detail).await
            }
        }
    }

    async fn handle_worker_loss(&mut self, resource_type: &str, detail: String) -> Result<()> {
        let Some(worker) = self.workers.get_mut(resource_type) else {
            return Ok(());
        };
        match worker.state {
            // Expected while shutting down.
            WorkerState::Terminating | WorkerState::Dead => Ok(()),
            WorkerState::Spawning => {
                Err(PipelineError::WorkerHandshake(resource_type.to_string()))
            }
            WorkerState::Busy => {
                if let Some(input) = worker.in_flight.take() {
                    let result = BuildResult {
                        source_path: input.source_path.display().to_string(),
                        target_path: input.target_path.display().to_string(),
                        platform: input.platform.clone(),
                        success: false,
                        errors: vec![format!("compiler worker crashed: {}", detail)],
                        outputs: Vec::new(),
                        references: Vec::new(),
                    };
                    self.pending_events
                        .push_back(CacheEvent::Complete { input, result });
                }
                worker.respawn(&self.signal_tx).await
            }
            WorkerState::Idle => {
                warn!(%resource_type, %detail, "idle worker lost, will respawn on demand");
                worker.state = WorkerState::Dead;
                Ok(())
            }
        }
    }

    fn note_ready(&mut self) {
        if self.ready_sent {
            return;
        }
        if self.workers.values().all(|worker| worker.version.is_some()) {
            self.pending_events.push_back(CacheEvent::Ready);
            self.ready_sent = true;
        }
    }
}
