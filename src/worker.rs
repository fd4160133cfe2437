//! The workers that generate load during a phase.
//!
//! Each worker runs on its own thread and repeats one kind of
//! operation until its phase is over. Timed phases end at a deadline,
//! checked before each request. The delete phase ends when every
//! object of the preceding upload phase has been claimed.
//!
//! A request that gets no response at all, or can't be sent, is fatal
//! for the whole run: the worker stops, raises the abort flag so that
//! the other workers stop as well, and returns the error to the phase
//! controller.

use crate::client::{body_text, drain, ClientError, S3Client};
use crate::counters::{PhaseKind, SharedCounters};
use crate::payload::ObjectPayload;
use crate::phase::PhaseError;

use log::{debug, error, warn};
use rand::Rng;
use reqwest::blocking::Response;
use std::time::Instant;

/// One worker of a phase.
#[derive(Debug)]
pub struct Worker<'a> {
    id: usize,
    client: &'a S3Client,
    counters: &'a SharedCounters,
    payload: &'a ObjectPayload,
    deadline: Option<Instant>,
}

impl<'a> Worker<'a> {
    /// Create a worker. Timed phases need a deadline.
    pub fn new(
        id: usize,
        client: &'a S3Client,
        counters: &'a SharedCounters,
        payload: &'a ObjectPayload,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            id,
            client,
            counters,
            payload,
            deadline,
        }
    }

    /// Run one kind of operation until the phase is over.
    ///
    /// Whatever the outcome, the worker is counted out of the phase
    /// before this returns.
    pub fn run(&self, kind: PhaseKind) -> Result<(), PhaseError> {
        debug!("worker {} starts {} phase", self.id, kind);
        let result = match kind {
            PhaseKind::Upload => self.upload(),
            PhaseKind::Download => self.download(),
            PhaseKind::Delete => self.delete(),
        };
        if let Err(err) = &result {
            error!("worker {} stopped: {}", self.id, err);
            self.counters.abort();
        }
        if self.counters.worker_exited(kind) {
            debug!("worker {} was the last one out of {} phase", self.id, kind);
        }
        result
    }

    fn upload(&self) -> Result<(), PhaseError> {
        while self.in_time() {
            let seq = self.counters.next_upload();
            let url = self.client.object_url(seq);
            let res = self
                .client
                .put_object(&url, self.payload)
                .map_err(|err| fatal(PhaseKind::Upload, err))?;
            self.finish(PhaseKind::Upload, &url, res)?;
        }
        Ok(())
    }

    fn download(&self) -> Result<(), PhaseError> {
        while self.in_time() {
            self.counters.next_download();
            let uploads = self.counters.uploads();
            if uploads == 0 {
                return Err(PhaseError::NothingUploaded(PhaseKind::Download));
            }
            let seq = rand::thread_rng().gen_range(1..=uploads);
            let url = self.client.object_url(seq);
            let res = self
                .client
                .get_object(&url)
                .map_err(|err| fatal(PhaseKind::Download, err))?;
            self.finish(PhaseKind::Download, &url, res)?;
        }
        Ok(())
    }

    fn delete(&self) -> Result<(), PhaseError> {
        let uploads = self.counters.uploads();
        while !self.counters.is_aborted() {
            let seq = self.counters.next_delete();
            if seq > uploads {
                break;
            }
            let url = self.client.object_url(seq);
            let res = self
                .client
                .delete_object(&url)
                .map_err(|err| fatal(PhaseKind::Delete, err))?;
            self.finish(PhaseKind::Delete, &url, res)?;
        }
        Ok(())
    }

    // Read the whole response, so the connection can be reused.
    fn finish(&self, kind: PhaseKind, url: &str, res: Response) -> Result<(), PhaseError> {
        let status = res.status();
        if status.is_success() {
            drain(url, res).map_err(|err| fatal(kind, err))?;
        } else {
            let body = body_text(url, res).map_err(|err| fatal(kind, err))?;
            warn!("{} {} status {}: body: {}", kind.method(), url, status, body);
        }
        Ok(())
    }

    fn in_time(&self) -> bool {
        if self.counters.is_aborted() {
            return false;
        }
        match self.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => false,
        }
    }
}

fn fatal(kind: PhaseKind, source: ClientError) -> PhaseError {
    match source {
        ClientError::Transport(..) | ClientError::Read(..) => PhaseError::Transport { kind, source },
        _ => PhaseError::Request { kind, source },
    }
}
