//! Running a complete benchmark.

use crate::client::{BucketAdmin, S3Client};
use crate::config::BenchmarkConfig;
use crate::counters::{PhaseKind, SharedCounters};
use crate::error::BenchError;
use crate::payload::ObjectPayload;
use crate::performance::Performance;
use crate::phase::PhaseController;

use log::info;

/// Runs the upload, download, and delete phases of a benchmark.
///
/// Each repetition runs the three phases in that order. The delete
/// phase removes exactly the objects the same repetition uploaded.
#[derive(Debug)]
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    client: S3Client,
    payload: ObjectPayload,
    counters: SharedCounters,
}

impl BenchmarkRunner {
    /// Create a runner, with a random payload of the configured size.
    pub fn new(config: BenchmarkConfig) -> Result<Self, BenchError> {
        let client = S3Client::new(&config)?;
        Ok(Self::with_client(config, client))
    }

    /// Create a runner that uses a given storage client.
    pub fn with_client(config: BenchmarkConfig, client: S3Client) -> Self {
        let payload = ObjectPayload::random(config.object_size);
        Self {
            config,
            client,
            payload,
            counters: SharedCounters::new(),
        }
    }

    /// The storage client used by the runner.
    pub fn client(&self) -> &S3Client {
        &self.client
    }

    /// Create the bucket, if needed, and empty it.
    pub fn setup(&self) -> Result<(), BenchError> {
        self.client.create_bucket().map_err(BenchError::SetupError)?;
        let deleted = self
            .client
            .delete_all_objects()
            .map_err(BenchError::SetupError)?;
        info!(
            "deleted {} existing objects from bucket {}",
            deleted,
            self.client.bucket()
        );
        Ok(())
    }

    /// Run every repetition of the benchmark.
    ///
    /// The first failing phase ends the run.
    pub fn run(&self) -> Result<Performance, BenchError> {
        let controller = PhaseController::new(
            &self.client,
            &self.counters,
            &self.payload,
            self.config.workers,
            self.config.duration,
        );

        let mut perf = Performance::default();
        for repetition in 1..=self.config.loops {
            for kind in PhaseKind::ALL {
                let result = controller.run(kind)?;
                perf.record(repetition, result);
            }
        }
        Ok(perf)
    }
}
