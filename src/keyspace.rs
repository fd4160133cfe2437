//! Names of the objects a benchmark run creates.

use std::fmt;

/// Prefix of every object name.
pub const OBJECT_PREFIX: &str = "Object-";

/// Maps sequence numbers to object locations in one bucket.
///
/// Object `n` lives at `<endpoint>/<bucket>/Object-<n>`. The mapping
/// is a pure function, so every phase of a run agrees on which
/// object a sequence number refers to.
#[derive(Debug, Clone)]
pub struct ObjectKeySpace {
    base_url: String,
}

impl ObjectKeySpace {
    /// Create a key space for a bucket at an endpoint.
    pub fn new(endpoint: &str, bucket: &str) -> Self {
        Self {
            base_url: format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
        }
    }

    /// Return the object name for a sequence number.
    pub fn key(seq: u64) -> ObjectKey {
        ObjectKey(seq)
    }

    /// Return the full URL of an object.
    pub fn url(&self, seq: u64) -> String {
        format!("{}/{}", self.base_url, ObjectKey(seq))
    }
}

/// Name of one benchmark object inside its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectKey(u64);

impl ObjectKey {
    /// Sequence number of the object.
    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", OBJECT_PREFIX, self.0)
    }
}
