//! Object storage throughput benchmark.
//!
//! This crate measures how fast an S3-compatible object storage
//! service can store, fetch, and delete objects of a fixed size, with
//! a fixed number of concurrent workers. A benchmark repetition runs
//! three phases: upload for a set time, download random objects for a
//! set time, and delete everything that was uploaded.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod counters;
pub mod error;
pub mod keyspace;
pub mod payload;
pub mod performance;
pub mod phase;
pub mod runner;
pub mod signer;
pub mod worker;
