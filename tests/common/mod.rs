//! An in-process stand-in for an S3-compatible endpoint.
//!
//! The server runs on its own thread with its own tokio runtime, so
//! the blocking benchmark code can talk to it from the test thread.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use s3_benchmark::client::{http_client_builder, S3Client};
use s3_benchmark::config::{BenchmarkConfig, TentativeConfig};
use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;
use warp::http::StatusCode;
use warp::Filter;

/// What the mock endpoint has seen.
#[derive(Debug, Default)]
pub struct MockState {
    puts: AtomicU64,
    put_bytes: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    bulk_deletes: AtomicU64,
    unsigned: AtomicU64,
    bad_md5: AtomicU64,
    get_keys: Mutex<Vec<String>>,
    deleted_keys: Mutex<Vec<String>>,
    objects: Mutex<BTreeSet<String>>,
}

impl MockState {
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn put_bytes(&self) -> u64 {
        self.put_bytes.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn bulk_deletes(&self) -> u64 {
        self.bulk_deletes.load(Ordering::SeqCst)
    }

    pub fn unsigned(&self) -> u64 {
        self.unsigned.load(Ordering::SeqCst)
    }

    pub fn bad_md5(&self) -> u64 {
        self.bad_md5.load(Ordering::SeqCst)
    }

    pub fn get_keys(&self) -> Vec<String> {
        self.get_keys.lock().unwrap().clone()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted_keys.lock().unwrap().clone()
    }

    pub fn objects(&self) -> BTreeSet<String> {
        self.objects.lock().unwrap().clone()
    }

    fn check_auth(&self, auth: &Option<String>, date: &Option<String>) {
        let signed = matches!(auth, Some(value) if value.starts_with("AWS access:"));
        if !signed || date.is_none() {
            self.unsigned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A running mock endpoint. Dropping it stops the server.
pub struct MockEndpoint {
    pub url: String,
    pub state: Arc<MockState>,
    stop: Option<oneshot::Sender<()>>,
}

impl MockEndpoint {
    /// Start an endpoint that answers uploads with the given status.
    pub fn start(put_status: u16) -> Self {
        Self::start_with(put_status, 200, "")
    }

    /// Start an endpoint that answers uploads and bucket creation with
    /// the given statuses. A failed bucket creation carries the given
    /// error code.
    pub fn start_with(put_status: u16, create_status: u16, create_code: &'static str) -> Self {
        let state = Arc::new(MockState::default());
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server_state = Arc::clone(&state);
        thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let routes = routes(server_state, put_status, create_status, create_code);
                let (addr, server) = warp::serve(routes)
                    .bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
                        stop_rx.await.ok();
                    });
                addr_tx.send(addr).unwrap();
                server.await;
            });
        });

        let addr = addr_rx.recv().unwrap();
        Self {
            url: format!("http://{}", addr),
            state,
            stop: Some(stop_tx),
        }
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
    }
}

fn routes(
    state: Arc<MockState>,
    put_status: u16,
    create_status: u16,
    create_code: &'static str,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let put_status = StatusCode::from_u16(put_status).unwrap();
    let create_status = StatusCode::from_u16(create_status).unwrap();
    let state = warp::any().map(move || Arc::clone(&state));
    let auth = warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("x-amz-date"));

    let put_object = warp::put()
        .and(warp::path!(String / String))
        .and(auth.clone())
        .and(warp::body::bytes())
        .and(state.clone())
        .map(
            move |_bucket: String,
                  key: String,
                  auth: Option<String>,
                  date: Option<String>,
                  body: Bytes,
                  state: Arc<MockState>| {
                state.check_auth(&auth, &date);
                state.puts.fetch_add(1, Ordering::SeqCst);
                state
                    .put_bytes
                    .fetch_add(body.len() as u64, Ordering::SeqCst);
                if put_status.is_success() {
                    state.objects.lock().unwrap().insert(key);
                    warp::reply::with_status(String::new(), put_status)
                } else {
                    let body = "<Error><Code>InternalError</Code></Error>".to_string();
                    warp::reply::with_status(body, put_status)
                }
            },
        );

    let get_object = warp::get()
        .and(warp::path!(String / String))
        .and(auth.clone())
        .and(state.clone())
        .map(
            |_bucket: String,
             key: String,
             auth: Option<String>,
             date: Option<String>,
             state: Arc<MockState>| {
                state.check_auth(&auth, &date);
                state.gets.fetch_add(1, Ordering::SeqCst);
                let stored = state.objects.lock().unwrap().contains(&key);
                state.get_keys.lock().unwrap().push(key);
                if stored {
                    warp::reply::with_status(vec![7u8; 1024], StatusCode::OK)
                } else {
                    let body = b"<Error><Code>NoSuchKey</Code></Error>".to_vec();
                    warp::reply::with_status(body, StatusCode::NOT_FOUND)
                }
            },
        );

    let delete_object = warp::delete()
        .and(warp::path!(String / String))
        .and(auth.clone())
        .and(state.clone())
        .map(
            |_bucket: String,
             key: String,
             auth: Option<String>,
             date: Option<String>,
             state: Arc<MockState>| {
                state.check_auth(&auth, &date);
                state.deletes.fetch_add(1, Ordering::SeqCst);
                state.objects.lock().unwrap().remove(&key);
                state.deleted_keys.lock().unwrap().push(key);
                warp::reply::with_status(String::new(), StatusCode::NO_CONTENT)
            },
        );

    let create_bucket = warp::put()
        .and(warp::path!(String))
        .and(auth.clone())
        .and(state.clone())
        .map(
            move |_bucket: String,
                  auth: Option<String>,
                  date: Option<String>,
                  state: Arc<MockState>| {
                state.check_auth(&auth, &date);
                let body = if create_status.is_success() {
                    String::new()
                } else {
                    format!("<Error><Code>{}</Code></Error>", create_code)
                };
                warp::reply::with_status(body, create_status)
            },
        );

    let list_objects = warp::get()
        .and(warp::path!(String))
        .and(auth.clone())
        .and(state.clone())
        .map(
            |bucket: String, auth: Option<String>, date: Option<String>, state: Arc<MockState>| {
                state.check_auth(&auth, &date);
                let contents: String = state
                    .objects()
                    .iter()
                    .map(|key| format!("<Contents><Key>{}</Key><Size>1</Size></Contents>", key))
                    .collect();
                let body = format!(
                    "<ListBucketResult><Name>{}</Name><IsTruncated>false</IsTruncated>{}</ListBucketResult>",
                    bucket, contents
                );
                warp::reply::with_status(body, StatusCode::OK)
            },
        );

    let delete_objects = warp::post()
        .and(warp::path!(String))
        .and(auth)
        .and(warp::header::optional::<String>("content-md5"))
        .and(warp::body::bytes())
        .and(state)
        .map(
            |_bucket: String,
             auth: Option<String>,
             date: Option<String>,
             md5: Option<String>,
             body: Bytes,
             state: Arc<MockState>| {
                state.check_auth(&auth, &date);
                let expected = BASE64.encode(md5::compute(&body).0);
                if md5.as_deref() != Some(expected.as_str()) {
                    state.bad_md5.fetch_add(1, Ordering::SeqCst);
                }
                state.bulk_deletes.fetch_add(1, Ordering::SeqCst);
                let text = String::from_utf8_lossy(&body).to_string();
                let mut objects = state.objects.lock().unwrap();
                for part in text.split("<Key>").skip(1) {
                    if let Some(end) = part.find("</Key>") {
                        objects.remove(&part[..end]);
                    }
                }
                warp::reply::with_status(
                    "<DeleteResult></DeleteResult>".to_string(),
                    StatusCode::OK,
                )
            },
        );

    put_object
        .or(get_object)
        .or(delete_object)
        .or(create_bucket)
        .or(list_objects)
        .or(delete_objects)
}

/// A URL where nothing accepts connections.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Benchmark settings for a test run.
pub fn config(url: &str, workers: usize, secs: u64, loops: usize) -> BenchmarkConfig {
    TentativeConfig {
        access_key: Some("access".into()),
        secret_key: Some("secret".into()),
        url: Some(url.into()),
        bucket: Some("bench".into()),
        duration: Some(secs),
        threads: Some(workers),
        loops: Some(loops),
        size: Some("1M".into()),
        log: None,
    }
    .finish()
    .unwrap()
}

/// A storage client that talks to the mock directly, whatever the
/// proxy settings of the environment.
pub fn client(config: &BenchmarkConfig) -> S3Client {
    let http = http_client_builder(config.workers)
        .no_proxy()
        .build()
        .unwrap();
    S3Client::with_http(config, http)
}
