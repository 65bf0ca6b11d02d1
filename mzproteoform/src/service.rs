//! A background worker that rebuilds communities off the caller's thread.
//!
//! Requests are tagged with increasing generation numbers. When several requests
//! queue up while a build is running, only the newest is built; the rest are
//! superseded. Readers only ever observe a completed build.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{build_community, CommunityBuild, CommunityInput};
use crate::community::CommunityError;
use crate::params::CommunityParams;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("The rebuild worker is no longer accepting requests")]
    Disconnected,
    #[error("The rebuild worker panicked")]
    WorkerPanicked,
}

#[derive(Debug)]
struct RebuildRequest {
    generation: u64,
    params: CommunityParams,
    input: CommunityInput,
}

#[derive(Debug, Default)]
struct Published {
    build: Option<Arc<CommunityBuild>>,
    /// The newest generation the worker has finished with, built or failed
    completed: u64,
    last_error: Option<(u64, CommunityError)>,
}

#[derive(Debug, Default)]
struct SharedState {
    published: Mutex<Published>,
    changed: Condvar,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, Published> {
        // A poisoned lock still holds the last fully published state
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Take the newest request from the queue, discarding older ones. Returns `None`
/// once the queue is closed and empty.
fn newest_request(receiver: &Receiver<RebuildRequest>) -> Option<RebuildRequest> {
    let mut request = receiver.recv().ok()?;
    loop {
        match receiver.try_recv() {
            Ok(newer) => {
                debug!(
                    "Generation {} superseded by generation {}",
                    request.generation, newer.generation
                );
                request = newer;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    Some(request)
}

fn rebuild_worker(receiver: Receiver<RebuildRequest>, state: Arc<SharedState>) {
    while let Some(request) = newest_request(&receiver) {
        let generation = request.generation;
        debug!("Building generation {generation}");
        let result = build_community(request.input, request.params);
        let mut published = state.lock();
        match result {
            Ok(community) => {
                published.build = Some(Arc::new(CommunityBuild {
                    generation,
                    community,
                }));
                info!("Published generation {generation}");
            }
            Err(e) => {
                warn!("Generation {generation} failed: {e}");
                published.last_error = Some((generation, e));
            }
        }
        published.completed = generation;
        drop(published);
        state.changed.notify_all();
    }
    debug!("Rebuild request queue closed");
}

/// Owns the rebuild worker thread and the most recently published build
#[derive(Debug)]
pub struct RebuildService {
    sender: Option<Sender<RebuildRequest>>,
    worker: Option<JoinHandle<()>>,
    state: Arc<SharedState>,
    next_generation: AtomicU64,
}

impl RebuildService {
    pub fn spawn() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let state = Arc::new(SharedState::default());
        let worker_state = state.clone();
        let worker = thread::spawn(move || rebuild_worker(receiver, worker_state));
        Self {
            sender: Some(sender),
            worker: Some(worker),
            state,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Queue a rebuild and return the generation it will be published under
    pub fn submit(
        &self,
        params: CommunityParams,
        input: CommunityInput,
    ) -> Result<u64, ServiceError> {
        let sender = self.sender.as_ref().ok_or(ServiceError::Disconnected)?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        sender
            .send(RebuildRequest {
                generation,
                params,
                input,
            })
            .map_err(|_| ServiceError::Disconnected)?;
        Ok(generation)
    }

    /// The most recently completed build, if any
    pub fn latest(&self) -> Option<Arc<CommunityBuild>> {
        self.state.lock().build.clone()
    }

    /// The most recent failed generation and its error, if any
    pub fn last_error(&self) -> Option<(u64, CommunityError)> {
        self.state.lock().last_error.clone()
    }

    /// Block until the worker has finished with `generation` or a newer one, or until
    /// `timeout` elapses. Returns whether the generation was reached.
    pub fn wait_for(&self, generation: u64, timeout: Duration) -> bool {
        let guard = self.state.lock();
        let (guard, _) = self
            .state
            .changed
            .wait_timeout_while(guard, timeout, |p| p.completed < generation)
            .unwrap_or_else(|e| e.into_inner());
        guard.completed >= generation
    }

    /// Close the request queue, let the worker finish its current build and join it
    pub fn shutdown(mut self) -> Result<(), ServiceError> {
        self.join()
    }

    fn join(&mut self) -> Result<(), ServiceError> {
        self.sender.take();
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| ServiceError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for RebuildService {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::observation::Observation;

    fn input(masses: &[f64]) -> CommunityInput {
        CommunityInput {
            observations: masses
                .iter()
                .enumerate()
                .map(|(i, m)| Observation::new(format!("o{i}"), "run1", *m, 100.0, 30.0, None))
                .collect(),
            ..Default::default()
        }
    }

    #[test_log::test]
    fn test_latest_wins() {
        let service = RebuildService::spawn();
        assert!(service.latest().is_none());
        let mut last = 0;
        for n in 1..=5 {
            let masses: Vec<f64> = (0..n).map(|i| 10000.0 + i as f64 * 50.0).collect();
            last = service
                .submit(CommunityParams::default(), input(&masses))
                .unwrap();
        }
        assert_eq!(last, 5);
        assert!(service.wait_for(last, Duration::from_secs(30)));
        let build = service.latest().unwrap();
        assert_eq!(build.generation, 5);
        assert_eq!(build.community.experimental_ids().len(), 5);
        assert!(build.community.is_built());
        service.shutdown().unwrap();
    }

    #[test]
    fn test_failed_generation_keeps_previous_build() {
        let service = RebuildService::spawn();
        let first = service
            .submit(CommunityParams::default(), input(&[10000.0]))
            .unwrap();
        assert!(service.wait_for(first, Duration::from_secs(30)));

        let mut bad = CommunityParams::default();
        bad.tolerance.retention_time_tolerance = -1.0;
        let second = service.submit(bad, input(&[10000.0, 11000.0])).unwrap();
        assert!(service.wait_for(second, Duration::from_secs(30)));

        assert_eq!(service.latest().unwrap().generation, first);
        let (generation, err) = service.last_error().unwrap();
        assert_eq!(generation, second);
        assert!(matches!(err, CommunityError::Configuration(_)));
    }
}
