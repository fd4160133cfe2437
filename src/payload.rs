//! Contents of the objects that get uploaded.

use bytes::Bytes;
use rand::RngCore;

/// A buffer of random bytes, shared by every upload of a run.
///
/// The buffer is filled once and never changed afterwards. Cloning
/// the payload shares the same buffer.
#[derive(Debug, Clone)]
pub struct ObjectPayload {
    data: Bytes,
}

impl ObjectPayload {
    /// Create a payload of a given size with random contents.
    pub fn random(size: u64) -> Self {
        let mut data = vec![0; size as usize];
        rand::thread_rng().fill_bytes(&mut data);
        Self {
            data: Bytes::from(data),
        }
    }

    /// Size of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Is the payload empty?
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A handle to the contents, for use as a request body.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}
