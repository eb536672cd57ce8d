//! Background build worker.
//!
//! Hosts that receive build requests from many tasks hand them to one worker
//! task that owns the orchestrator. Requests are processed one at a time in
//! arrival order; each caller waits on its own reply channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::bundle::BuildOrchestrator;
use crate::bundler::ModuleBundler;
use crate::compiler::ComponentCompiler;
use crate::plugin::module_cache::RemoteFetcher;
use crate::{BuildError, BuildRequest, BuildResult};

const DEFAULT_QUEUE_DEPTH: usize = 16;

type Job = (BuildRequest, oneshot::Sender<BuildResult>);

/// Spawns the worker task.
pub struct BuildWorker;

impl BuildWorker {
    /// Start a worker on the current tokio runtime.
    pub fn spawn<C, B, F>(orchestrator: Arc<BuildOrchestrator<C, B, F>>) -> BuildHandle
    where
        C: ComponentCompiler + 'static,
        B: ModuleBundler + 'static,
        F: RemoteFetcher,
    {
        Self::spawn_with_queue(orchestrator, DEFAULT_QUEUE_DEPTH)
    }

    pub fn spawn_with_queue<C, B, F>(
        orchestrator: Arc<BuildOrchestrator<C, B, F>>,
        depth: usize,
    ) -> BuildHandle
    where
        C: ComponentCompiler + 'static,
        B: ModuleBundler + 'static,
        F: RemoteFetcher,
    {
        let (tx, mut rx) = mpsc::channel::<Job>(depth.max(1));

        tokio::spawn(async move {
            let mut served = 0usize;
            while let Some((request, reply_tx)) = rx.recv().await {
                let result = orchestrator.build(&request).await;
                served += 1;
                if reply_tx.send(result).is_err() {
                    debug!("build caller went away before the reply");
                }
            }
            info!(served, "build worker stopped");
        });

        BuildHandle { tx }
    }
}

/// Cheap, cloneable handle for submitting builds.
#[derive(Debug, Clone)]
pub struct BuildHandle {
    tx: mpsc::Sender<Job>,
}

impl BuildHandle {
    /// Submit a build and wait for its result.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildResult, BuildError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| BuildError::WorkerClosed)?;
        reply_rx.await.map_err(|_| BuildError::WorkerClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
