//! # Node Pool Bootstrap
//!
//! Builds every node's pool in parallel, one dedicated worker thread per
//! node. Each worker:
//! 1. Binds itself to the node's CPU set
//! 2. Maps node-local memory for the pool
//! 3. Locks it into RAM
//! 4. Touches every page
//!
//! and reports a `Result` over a channel. The coordinator waits for every
//! worker (no early cancellation), then commits only if all nodes
//! succeeded. Otherwise the pools that were built are dropped, which
//! unlocks and releases their regions.
//!
//! With a bootstrap timeout, the coordinator stops waiting at the deadline.
//! Workers still running are detached; when they finish, sending their
//! pool to the closed channel fails and the pool is dropped on the worker
//! thread, so late regions are released as well.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::numa::{AffinityBinder, NumaError, NumaPlatform};

use super::error::{NodeFailure, NodeFailures};
use super::node::NodePool;
use super::region::PinnedRegion;
use super::{PoolConfig, PoolError, PoolPlan};

type NodeResult = Result<NodePool, NumaError>;

/// Body of one bootstrap worker.
pub(crate) type Worker = Box<dyn FnOnce() + Send + 'static>;

/// Build the pool for one node on the calling thread.
///
/// Binds the *calling* thread to `node`; run it on a dedicated thread or
/// restore the previous affinity afterwards.
///
/// # Errors
///
/// Returns [`NumaError::AffinityBindFailed`], [`NumaError::NodeAllocFailed`]
/// or [`NumaError::PinFailed`] for the step that failed. Nothing is left
/// allocated on error.
pub fn bootstrap_node(
    platform: Arc<dyn NumaPlatform>,
    binder: &AffinityBinder,
    node: usize,
    size: usize,
) -> Result<NodePool, NumaError> {
    binder.bind_to_node(node)?;
    let region = PinnedRegion::acquire(platform, node, size)?;
    tracing::debug!("Node {} pool ready: {} bytes", node, size);
    Ok(NodePool::new(region))
}

/// Bootstrap every node in `plan` in parallel with all-or-nothing commit.
///
/// # Errors
///
/// Returns [`PoolError::PartialInitFailure`] listing every failed node, or
/// [`PoolError::InitTimeout`] if the configured timeout elapses first. In
/// both cases no pool built by this call remains allocated.
pub(crate) fn bootstrap_all(
    platform: &Arc<dyn NumaPlatform>,
    binder: &AffinityBinder,
    plan: &PoolPlan,
    config: &PoolConfig,
) -> Result<Vec<NodePool>, PoolError> {
    bootstrap_all_with(platform, binder, plan, config, |_, builder, worker| {
        builder.spawn(worker)
    })
}

/// [`bootstrap_all`] with the thread spawn supplied by the caller.
///
/// `spawn` receives the node, a named [`thread::Builder`] and the worker
/// body. An error from it fails that node with [`NumaError::WorkerFailed`].
pub(crate) fn bootstrap_all_with<S>(
    platform: &Arc<dyn NumaPlatform>,
    binder: &AffinityBinder,
    plan: &PoolPlan,
    config: &PoolConfig,
    mut spawn: S,
) -> Result<Vec<NodePool>, PoolError>
where
    S: FnMut(usize, thread::Builder, Worker) -> io::Result<JoinHandle<()>>,
{
    let node_count = plan.node_count();
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<(usize, NodeResult)>();

    let mut results: Vec<Option<NodeResult>> = (0..node_count).map(|_| None).collect();
    let mut workers: Vec<(usize, JoinHandle<()>)> = Vec::with_capacity(node_count);

    for (node, &size) in plan.node_sizes.iter().enumerate() {
        let tx = tx.clone();
        let platform = Arc::clone(platform);
        let binder = binder.clone();

        let builder = thread::Builder::new().name(format!("{}-{node}", config.thread_name_prefix));
        let worker: Worker = Box::new(move || {
            let result = bootstrap_node(platform, &binder, node, size);
            if let Err(e) = &result {
                tracing::error!("Node {} bootstrap failed: {}", node, e);
            }
            // A closed channel means the coordinator gave up; dropping
            // the returned pool releases its region.
            let _ = tx.send((node, result));
        });
        let spawned = spawn(node, builder, worker);

        match spawned {
            Ok(handle) => workers.push((node, handle)),
            Err(e) => {
                tracing::error!("Failed to spawn bootstrap worker for node {}: {}", node, e);
                results[node] = Some(Err(NumaError::WorkerFailed {
                    node,
                    reason: format!("spawn failed: {e}"),
                }));
            }
        }
    }
    drop(tx);

    let deadline = config.bootstrap_timeout.map(|timeout| started + timeout);
    let mut outstanding = workers.len();
    while outstanding > 0 {
        let received = match deadline {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok((node, result)) => {
                results[node] = Some(result);
                outstanding -= 1;
            }
            // Every sender is gone: the remaining workers died without reporting.
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let pending: Vec<usize> = workers
                    .iter()
                    .map(|(node, _)| *node)
                    .filter(|&node| results[node].is_none())
                    .collect();
                let timeout = config.bootstrap_timeout.unwrap_or_default();
                tracing::warn!(
                    "Pool bootstrap timed out after {:?}; rolling back (pending nodes: {:?})",
                    timeout,
                    pending
                );
                return Err(PoolError::InitTimeout { timeout, pending });
            }
        }
    }

    for (node, handle) in workers {
        if handle.join().is_err() && results[node].is_none() {
            results[node] = Some(Err(NumaError::WorkerFailed {
                node,
                reason: "worker panicked".to_string(),
            }));
        }
    }

    let mut pools = Vec::with_capacity(node_count);
    let mut failures = Vec::new();
    for (node, result) in results.into_iter().enumerate() {
        match result {
            Some(Ok(pool)) => pools.push(pool),
            Some(Err(cause)) => failures.push(NodeFailure { node, cause }),
            None => failures.push(NodeFailure {
                node,
                cause: NumaError::WorkerFailed {
                    node,
                    reason: "worker exited without reporting".to_string(),
                },
            }),
        }
    }

    if !failures.is_empty() {
        tracing::warn!(
            "Pool bootstrap failed on {} of {} nodes; releasing {} completed pools",
            failures.len(),
            node_count,
            pools.len()
        );
        drop(pools);
        return Err(PoolError::PartialInitFailure {
            failures: NodeFailures(failures),
            node_count,
        });
    }

    tracing::debug!(
        "Bootstrapped {} node pools in {:?}",
        node_count,
        started.elapsed()
    );
    Ok(pools)
}
