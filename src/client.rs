//! Client to the object storage HTTP API.
//!
//! [`S3Client`] issues the signed single-object requests the benchmark
//! workers use, and implements [`BucketAdmin`], the bucket set-up and
//! clean-up operations that run before the first phase.

use crate::config::BenchmarkConfig;
use crate::keyspace::ObjectKeySpace;
use crate::payload::ObjectPayload;
use crate::signer::{RequestSigner, SignError, CONTENT_MD5};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use reqwest::blocking::{Client, ClientBuilder, RequestBuilder, Response};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::thread;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_IDLE_PER_HOST: usize = 4096;

/// Number of keys asked for in each bucket listing request.
pub const LIST_PAGE_SIZE: usize = 1000;

const ALREADY_EXISTS: &[&str] = &["BucketAlreadyOwnedByYou", "BucketAlreadyExists"];
const NO_SUCH_BUCKET: &str = "NoSuchBucket";

/// Possible errors when using the storage API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP client could not be created.
    #[error("failed to create HTTP client: {0}")]
    Build(reqwest::Error),

    /// A request could not be built.
    #[error("failed to build request for {0}: {1}")]
    Request(String, reqwest::Error),

    /// A request could not be signed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// The request did not get a response: connection, DNS, or TLS failure.
    #[error("request to {0} failed: {1}")]
    Transport(String, reqwest::Error),

    /// Reading a response body failed part way.
    #[error("failed to read response from {0}: {1}")]
    Read(String, std::io::Error),

    /// The bucket could not be created.
    #[error("unable to create bucket {bucket} (is your access and secret correct?): {status} {code}")]
    CreateBucket {
        /// Name of the bucket.
        bucket: String,
        /// HTTP status of the response.
        status: StatusCode,
        /// Error code from the response body, if any.
        code: String,
    },

    /// The bucket does not exist.
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),

    /// The server answered with an unexpected status.
    #[error("{method} {url} failed: {status}: {body}")]
    Status {
        /// HTTP method of the request.
        method: &'static str,
        /// URL of the request.
        url: String,
        /// HTTP status of the response.
        status: StatusCode,
        /// Body of the response.
        body: String,
    },

    /// Some objects in a bulk delete were not deleted.
    #[error("failed to delete {0} objects, first error: {1}")]
    DeleteObjects(usize, String),

    /// Error parsing an XML response.
    #[error("failed to parse XML from {0}: {1}")]
    XmlParse(String, quick_xml::DeError),

    /// Error generating an XML request body.
    #[error("failed to generate XML: {0}")]
    XmlGenerate(quick_xml::DeError),
}

/// Create the HTTP client shared by every worker of a run.
pub fn http_client(workers: usize) -> Result<Client, ClientError> {
    http_client_builder(workers)
        .build()
        .map_err(ClientError::Build)
}

/// Settings of the HTTP client, for callers that need to add their own.
///
/// The connection pool keeps at least one idle connection per worker,
/// so workers don't have to wait for each other to reuse connections.
/// There is no timeout for a whole request, only for connecting.
pub fn http_client_builder(workers: usize) -> ClientBuilder {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .pool_max_idle_per_host(idle_pool_size(workers))
        .pool_idle_timeout(IDLE_TIMEOUT)
        .timeout(None)
        .danger_accept_invalid_certs(true)
}

/// Number of idle connections kept per host for a number of workers.
pub fn idle_pool_size(workers: usize) -> usize {
    MAX_IDLE_PER_HOST.max(workers)
}

/// Client for one bucket of an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3Client {
    http: Client,
    signer: RequestSigner,
    keys: ObjectKeySpace,
    bucket_url: String,
    bucket: String,
}

impl S3Client {
    /// Create a new client, with a fresh HTTP connection pool.
    pub fn new(config: &BenchmarkConfig) -> Result<Self, ClientError> {
        let http = http_client(config.workers)?;
        Ok(Self::with_http(config, http))
    }

    /// Create a new client using an existing HTTP client.
    pub fn with_http(config: &BenchmarkConfig, http: Client) -> Self {
        let endpoint = config.endpoint.trim_end_matches('/');
        Self {
            http,
            signer: RequestSigner::new(&config.access_key, &config.secret_key),
            keys: ObjectKeySpace::new(endpoint, &config.bucket),
            bucket_url: format!("{}/{}", endpoint, config.bucket),
            bucket: config.bucket.clone(),
        }
    }

    /// Name of the bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// URL of object number `seq`.
    pub fn object_url(&self, seq: u64) -> String {
        self.keys.url(seq)
    }

    /// Upload the payload to an object URL.
    pub fn put_object(&self, url: &str, payload: &ObjectPayload) -> Result<Response, ClientError> {
        let req = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, payload.len())
            .body(payload.bytes());
        self.execute(url, req)
    }

    /// Start downloading an object.
    ///
    /// The caller must read the body to the end, see [`drain`].
    pub fn get_object(&self, url: &str) -> Result<Response, ClientError> {
        let req = self.http.get(url);
        self.execute(url, req)
    }

    /// Delete an object.
    pub fn delete_object(&self, url: &str) -> Result<Response, ClientError> {
        let req = self.http.delete(url);
        self.execute(url, req)
    }

    fn execute(&self, url: &str, builder: RequestBuilder) -> Result<Response, ClientError> {
        let mut req = builder
            .build()
            .map_err(|err| ClientError::Request(url.to_string(), err))?;
        self.signer.sign(&mut req)?;
        debug!("{} {}", req.method(), url);
        self.http
            .execute(req)
            .map_err(|err| ClientError::Transport(url.to_string(), err))
    }
}

/// Read a response body to the end and throw it away.
///
/// The connection only goes back to the pool once its body has been
/// read. Returns the number of bytes read.
pub fn drain(url: &str, mut res: Response) -> Result<u64, ClientError> {
    std::io::copy(&mut res, &mut std::io::sink())
        .map_err(|err| ClientError::Read(url.to_string(), err))
}

/// Read a response body as text, for error messages.
pub fn body_text(url: &str, mut res: Response) -> Result<String, ClientError> {
    let mut body = Vec::new();
    res.read_to_end(&mut body)
        .map_err(|err| ClientError::Read(url.to_string(), err))?;
    Ok(String::from_utf8_lossy(&body).to_string())
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    /// Keys of the objects on this page.
    pub keys: Vec<String>,
    /// Marker to continue listing from, if the server gave one.
    pub next_marker: Option<String>,
    /// Are there more keys after this page?
    pub truncated: bool,
}

impl ObjectListing {
    /// Marker for the request for the next page.
    ///
    /// Servers only have to return a next marker in some cases.
    /// Otherwise the last key on this page is the marker.
    pub fn continue_from(&self) -> Option<String> {
        self.next_marker
            .clone()
            .or_else(|| self.keys.last().cloned())
    }
}

/// Creating and emptying the benchmark bucket.
pub trait BucketAdmin: Sync {
    /// Create the bucket. A bucket that already exists is fine.
    fn create_bucket(&self) -> Result<(), ClientError>;

    /// List up to `max_keys` objects, starting after `marker`.
    fn list_objects(&self, marker: Option<&str>, max_keys: usize)
        -> Result<ObjectListing, ClientError>;

    /// Delete a batch of objects in one request.
    fn delete_objects(&self, keys: &[String]) -> Result<(), ClientError>;

    /// Delete every object in the bucket.
    ///
    /// Each page of the listing is deleted on its own thread, while the
    /// listing continues. A bucket that doesn't exist has nothing to
    /// delete. Returns the number of objects deleted.
    fn delete_all_objects(&self) -> Result<usize, ClientError> {
        thread::scope(|s| {
            let mut batches = vec![];
            let mut marker: Option<String> = None;
            let listed = loop {
                let listing = match self.list_objects(marker.as_deref(), LIST_PAGE_SIZE) {
                    Ok(listing) => listing,
                    Err(ClientError::NoSuchBucket(_)) => break Ok(()),
                    Err(err) => break Err(err),
                };
                let next = listing.continue_from();
                if !listing.keys.is_empty() {
                    let keys = listing.keys;
                    batches.push(s.spawn(move || self.delete_objects(&keys).map(|_| keys.len())));
                }
                match next {
                    Some(next) if listing.truncated => marker = Some(next),
                    _ => break Ok(()),
                }
            };

            let mut deleted = 0;
            let mut result = listed;
            for batch in batches {
                match batch.join() {
                    Ok(Ok(n)) => deleted += n,
                    Ok(Err(err)) => {
                        if result.is_ok() {
                            result = Err(err);
                        }
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            result.map(|_| deleted)
        })
    }
}

impl BucketAdmin for S3Client {
    fn create_bucket(&self) -> Result<(), ClientError> {
        let req = self.http.put(&self.bucket_url);
        let res = self.execute(&self.bucket_url, req)?;
        let status = res.status();
        if status.is_success() {
            info!("created bucket {}", self.bucket);
            return Ok(());
        }

        let body = body_text(&self.bucket_url, res)?;
        let code = error_code(&body);
        if ALREADY_EXISTS.contains(&code.as_str()) {
            warn!("bucket {} already exists, proceeding", self.bucket);
            return Ok(());
        }
        Err(ClientError::CreateBucket {
            bucket: self.bucket.clone(),
            status,
            code,
        })
    }

    fn list_objects(
        &self,
        marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectListing, ClientError> {
        let mut query = vec![("max-keys", max_keys.to_string())];
        if let Some(marker) = marker {
            query.push(("marker", marker.to_string()));
        }
        let req = self.http.get(&self.bucket_url).query(&query);
        let res = self.execute(&self.bucket_url, req)?;
        let status = res.status();
        let body = body_text(&self.bucket_url, res)?;
        if !status.is_success() {
            if error_code(&body) == NO_SUCH_BUCKET {
                return Err(ClientError::NoSuchBucket(self.bucket.clone()));
            }
            return Err(ClientError::Status {
                method: "GET",
                url: self.bucket_url.clone(),
                status,
                body,
            });
        }
        parse_listing(&self.bucket_url, &body)
    }

    fn delete_objects(&self, keys: &[String]) -> Result<(), ClientError> {
        let url = format!("{}?delete", self.bucket_url);
        let xml = delete_request_xml(keys)?;
        let md5 = BASE64.encode(md5::compute(xml.as_bytes()).0);
        let req = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/xml")
            .header(CONTENT_MD5, md5)
            .body(xml);
        let res = self.execute(&url, req)?;
        let status = res.status();
        let body = body_text(&url, res)?;
        if !status.is_success() {
            return Err(ClientError::Status {
                method: "POST",
                url,
                status,
                body,
            });
        }

        let result = parse_delete_result(&url, &body)?;
        if let Some(first) = result.errors.first() {
            return Err(ClientError::DeleteObjects(
                result.errors.len(),
                format!("{}: {} {}", first.key, first.code, first.message),
            ));
        }
        debug!("deleted {} objects from {}", keys.len(), self.bucket);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
struct DeleteRequest<'a> {
    #[serde(rename = "Quiet")]
    quiet: bool,
    #[serde(rename = "Object")]
    objects: Vec<ObjectIdentifier<'a>>,
}

#[derive(Debug, Serialize)]
struct ObjectIdentifier<'a> {
    #[serde(rename = "Key")]
    key: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteResult {
    #[serde(rename = "Error", default)]
    errors: Vec<DeleteError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteError {
    #[serde(default)]
    key: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn parse_listing(url: &str, xml: &str) -> Result<ObjectListing, ClientError> {
    let result: ListBucketResult =
        quick_xml::de::from_str(xml).map_err(|err| ClientError::XmlParse(url.to_string(), err))?;
    Ok(ObjectListing {
        keys: result.contents.into_iter().map(|entry| entry.key).collect(),
        next_marker: result.next_marker.filter(|marker| !marker.is_empty()),
        truncated: result.is_truncated,
    })
}

// Servers may answer a quiet bulk delete with no body at all.
fn parse_delete_result(url: &str, xml: &str) -> Result<DeleteResult, ClientError> {
    if xml.trim().is_empty() {
        return Ok(DeleteResult::default());
    }
    quick_xml::de::from_str(xml).map_err(|err| ClientError::XmlParse(url.to_string(), err))
}

fn delete_request_xml(keys: &[String]) -> Result<String, ClientError> {
    let req = DeleteRequest {
        quiet: true,
        objects: keys.iter().map(|key| ObjectIdentifier { key }).collect(),
    };
    quick_xml::se::to_string(&req).map_err(ClientError::XmlGenerate)
}

// An unparseable error body has no code.
fn error_code(body: &str) -> String {
    quick_xml::de::from_str::<ErrorResponse>(body)
        .map(|err| err.code)
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn parses_listing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bench</Name>
  <Prefix></Prefix>
  <Marker></Marker>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>Object-1</Key><Size>10</Size></Contents>
  <Contents><Key>Object-2</Key><Size>10</Size></Contents>
</ListBucketResult>"#;
        let listing = parse_listing("url", xml).unwrap();
        assert_eq!(listing.keys, vec!["Object-1", "Object-2"]);
        assert!(listing.truncated);
        assert_eq!(listing.next_marker, None);
        assert_eq!(listing.continue_from(), Some("Object-2".to_string()));
    }

    #[test]
    fn parses_empty_listing() {
        let xml = "<ListBucketResult><Name>bench</Name><IsTruncated>false</IsTruncated></ListBucketResult>";
        let listing = parse_listing("url", xml).unwrap();
        assert!(listing.keys.is_empty());
        assert!(!listing.truncated);
        assert_eq!(listing.continue_from(), None);
    }

    #[test]
    fn next_marker_wins_over_last_key() {
        let listing = ObjectListing {
            keys: vec!["a".into(), "b".into()],
            next_marker: Some("m".into()),
            truncated: true,
        };
        assert_eq!(listing.continue_from(), Some("m".to_string()));
    }

    #[test]
    fn generates_delete_request() {
        let xml = delete_request_xml(&["Object-1".to_string(), "Object-2".to_string()]).unwrap();
        assert!(xml.starts_with("<Delete>"));
        assert!(xml.contains("<Quiet>true</Quiet>"));
        assert!(xml.contains("<Object><Key>Object-1</Key></Object><Object><Key>Object-2</Key></Object>"));
    }

    #[test]
    fn empty_delete_result_means_no_errors() {
        assert!(parse_delete_result("url", "").unwrap().errors.is_empty());
        assert!(parse_delete_result("url", "\n").unwrap().errors.is_empty());
    }

    #[test]
    fn parses_delete_errors() {
        let xml = "<DeleteResult><Error><Key>Object-4</Key><Code>AccessDenied</Code>\
                   <Message>no</Message></Error></DeleteResult>";
        let result = parse_delete_result("url", xml).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, "Object-4");
        assert_eq!(result.errors[0].code, "AccessDenied");
    }

    #[test]
    fn idle_pool_covers_every_worker() {
        assert_eq!(idle_pool_size(1), MAX_IDLE_PER_HOST);
        assert_eq!(idle_pool_size(5000), 5000);
        assert!(http_client(5000).is_ok());
    }

    #[test]
    fn finds_error_code() {
        let xml = "<Error><Code>BucketAlreadyOwnedByYou</Code><Message>yours</Message></Error>";
        assert_eq!(error_code(xml), "BucketAlreadyOwnedByYou");
        assert_eq!(error_code("not xml at all"), "");
    }

    // A bucket held in memory, listed in pages of two.
    struct FakeBucket {
        keys: Mutex<Vec<String>>,
        missing: bool,
    }

    impl FakeBucket {
        fn with_objects(n: usize) -> Self {
            Self {
                keys: Mutex::new((1..=n).map(|i| format!("Object-{:03}", i)).collect()),
                missing: false,
            }
        }
    }

    impl BucketAdmin for FakeBucket {
        fn create_bucket(&self) -> Result<(), ClientError> {
            Ok(())
        }

        fn list_objects(
            &self,
            marker: Option<&str>,
            _max_keys: usize,
        ) -> Result<ObjectListing, ClientError> {
            if self.missing {
                return Err(ClientError::NoSuchBucket("fake".into()));
            }
            let keys = self.keys.lock().unwrap();
            let rest: Vec<String> = keys
                .iter()
                .filter(|key| marker.map(|m| key.as_str() > m).unwrap_or(true))
                .cloned()
                .collect();
            Ok(ObjectListing {
                keys: rest.iter().take(2).cloned().collect(),
                next_marker: None,
                truncated: rest.len() > 2,
            })
        }

        fn delete_objects(&self, keys: &[String]) -> Result<(), ClientError> {
            self.keys.lock().unwrap().retain(|key| !keys.contains(key));
            Ok(())
        }
    }

    #[test]
    fn deletes_every_page() {
        let bucket = FakeBucket::with_objects(7);
        assert_eq!(bucket.delete_all_objects().unwrap(), 7);
        assert!(bucket.keys.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_bucket_has_nothing_to_delete() {
        let bucket = FakeBucket {
            keys: Mutex::new(vec![]),
            missing: true,
        };
        assert_eq!(bucket.delete_all_objects().unwrap(), 0);
    }
}
