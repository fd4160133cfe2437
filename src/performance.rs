//! Performance measurements from a benchmark run.

use crate::counters::PhaseKind;
use bytesize::ByteSize;
use log::info;
use std::time::Duration;

/// Throughput of one completed phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    /// The kind of phase.
    pub kind: PhaseKind,
    /// Operations issued, successful or not.
    pub operations: u64,
    /// Time from phase start until the last worker exited.
    pub elapsed: Duration,
    /// Size of each object.
    pub object_size: u64,
}

impl PhaseResult {
    /// Create a result from a phase's final counters.
    pub fn new(kind: PhaseKind, operations: u64, elapsed: Duration, object_size: u64) -> Self {
        Self {
            kind,
            operations,
            elapsed,
            object_size,
        }
    }

    /// Elapsed time in seconds.
    pub fn secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Bytes moved by the phase's operations.
    pub fn bytes(&self) -> u64 {
        self.operations.saturating_mul(self.object_size)
    }

    /// Operations per second. Zero if no time elapsed.
    pub fn ops_per_sec(&self) -> f64 {
        self.rate(self.operations as f64)
    }

    /// Bytes per second. Zero if no time elapsed.
    pub fn bytes_per_sec(&self) -> f64 {
        self.rate(self.bytes() as f64)
    }

    fn rate(&self, amount: f64) -> f64 {
        let secs = self.secs();
        if secs > 0.0 {
            amount / secs
        } else {
            0.0
        }
    }

    /// The report line for this phase in a given repetition.
    pub fn report(&self, repetition: usize) -> String {
        match self.kind {
            PhaseKind::Delete => format!(
                "Loop {}: {} time {:.1} secs, {:.1} deletes/sec.",
                repetition,
                self.kind.method(),
                self.secs(),
                self.ops_per_sec()
            ),
            _ => format!(
                "Loop {}: {} time {:.1} secs, objects = {}, speed = {}/sec, {:.1} operations/sec.",
                repetition,
                self.kind.method(),
                self.secs(),
                self.operations,
                ByteSize::b(self.bytes_per_sec() as u64).to_string_as(true),
                self.ops_per_sec()
            ),
        }
    }
}

/// Collected measurements from a benchmark run.
#[derive(Debug, Default)]
pub struct Performance {
    results: Vec<(usize, PhaseResult)>,
}

impl Performance {
    /// Log a phase result and remember it.
    pub fn record(&mut self, repetition: usize, result: PhaseResult) {
        info!("{}", result.report(repetition));
        self.results.push((repetition, result));
    }

    /// All results, with the repetition they belong to, in run order.
    pub fn results(&self) -> &[(usize, PhaseResult)] {
        &self.results
    }

    /// Total operations of one kind across every repetition.
    pub fn total_operations(&self, kind: PhaseKind) -> u64 {
        self.results
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .map(|(_, r)| r.operations)
            .sum()
    }

    /// Log totals for the whole run.
    pub fn log(&self) {
        info!("Performance measurements for this run");
        for kind in PhaseKind::ALL {
            info!(
                "Total {} operations: {}",
                kind.method(),
                self.total_operations(kind)
            );
        }
    }
}
