//! Running one phase of a benchmark.

use crate::client::{ClientError, S3Client};
use crate::counters::{PhaseKind, SharedCounters};
use crate::payload::ObjectPayload;
use crate::performance::PhaseResult;
use crate::worker::Worker;

use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};

/// Possible errors from running a phase.
///
/// Any of these ends the whole benchmark run.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    /// A request failed without a complete response.
    #[error("FATAL: {kind} phase failed: {source}")]
    Transport {
        /// The phase that failed.
        kind: PhaseKind,
        /// What went wrong with the request.
        source: ClientError,
    },

    /// A request could not be built or signed.
    #[error("FATAL: {kind} phase could not send a request: {source}")]
    Request {
        /// The phase that failed.
        kind: PhaseKind,
        /// Why the request could not be sent.
        source: ClientError,
    },

    /// A phase that needs existing objects ran before any upload.
    #[error("{0} phase needs objects, but nothing has been uploaded")]
    NothingUploaded(PhaseKind),

    /// A worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(std::io::Error),

    /// A worker thread panicked.
    #[error("a worker panicked during {0} phase")]
    WorkerPanicked(PhaseKind),
}

/// Runs phases with a fixed number of workers.
#[derive(Debug)]
pub struct PhaseController<'a> {
    client: &'a S3Client,
    counters: &'a SharedCounters,
    payload: &'a ObjectPayload,
    workers: usize,
    duration: Duration,
}

impl<'a> PhaseController<'a> {
    /// Create a controller. The duration only applies to timed phases.
    pub fn new(
        client: &'a S3Client,
        counters: &'a SharedCounters,
        payload: &'a ObjectPayload,
        workers: usize,
        duration: Duration,
    ) -> Self {
        Self {
            client,
            counters,
            payload,
            workers,
            duration,
        }
    }

    /// Run a phase to completion.
    ///
    /// A fresh thread is started for every worker. This returns only
    /// after every worker thread has finished, so the counters are
    /// final when the result is computed.
    pub fn run(&self, kind: PhaseKind) -> Result<PhaseResult, PhaseError> {
        if kind != PhaseKind::Upload && self.counters.uploads() == 0 {
            return Err(PhaseError::NothingUploaded(kind));
        }

        self.counters.begin_phase(kind, self.workers);
        let start = Instant::now();
        let deadline = if kind.is_timed() {
            Some(start + self.duration)
        } else {
            None
        };
        info!("{} phase starts with {} workers", kind, self.workers);

        if let Some(err) = self.spawn_and_join(kind, deadline) {
            return Err(err);
        }
        debug_assert_eq!(self.counters.active_workers(), 0);

        let finish = self.counters.finish_time(kind).unwrap_or_else(Instant::now);
        let elapsed = finish.saturating_duration_since(start);
        let result = PhaseResult::new(
            kind,
            self.counters.operations(kind),
            elapsed,
            self.payload.len(),
        );
        debug!("{} phase done: {:?}", kind, result);
        Ok(result)
    }

    // Returns the first error any worker reported.
    fn spawn_and_join(&self, kind: PhaseKind, deadline: Option<Instant>) -> Option<PhaseError> {
        thread::scope(|s| {
            let mut handles = Vec::with_capacity(self.workers);
            let mut first_error = None;
            for id in 1..=self.workers {
                let worker = Worker::new(id, self.client, self.counters, self.payload, deadline);
                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", kind, id))
                    .spawn_scoped(s, move || worker.run(kind));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        self.counters.abort();
                        first_error = Some(PhaseError::Spawn(err));
                        break;
                    }
                }
            }

            for handle in handles {
                let outcome = handle
                    .join()
                    .unwrap_or(Err(PhaseError::WorkerPanicked(kind)));
                if let Err(err) = outcome {
                    first_error.get_or_insert(err);
                }
            }
            first_error
        })
    }
}
