//! Signing of object storage requests.
//!
//! Requests are signed with the HMAC-SHA1 header scheme understood by
//! S3-compatible services. The signer works directly on an outgoing
//! [`Request`], so that requests can be built and sent on the shared
//! HTTP client without an SDK request pipeline in between.
//!
//! The string to sign is made of the HTTP method, the `Content-MD5`
//! and `Content-Type` header values, an empty date line, the
//! canonical block of `x-amz` headers, and the resource path. The
//! request date is sent in the `x-amz-date` header instead of `Date`,
//! which makes it part of the canonical header block.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::trace;
use reqwest::blocking::Request;
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use sha1::Sha1;
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

/// Prefix of headers that take part in the signature.
const AMZ_PREFIX: &str = "x-amz";

/// Header carrying the base64 encoded MD5 sum of the body.
pub const CONTENT_MD5: &str = "content-md5";

/// Header carrying the request timestamp.
pub const DATE_HEADER: &str = "x-amz-date";

/// Format of the request timestamp, e.g. `20170102T150405Z`.
pub const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const SCHEME: &str = "AWS";

// Query parameters that name a sub-resource and must be signed. Sorted.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// Possible errors from signing a request.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// A computed header value can't be sent over HTTP.
    #[error("can't use {0:?} as a header value: {1}")]
    HeaderValue(String, InvalidHeaderValue),
}

/// Signs requests on behalf of one set of credentials.
#[derive(Clone)]
pub struct RequestSigner {
    access_key: String,
    secret_key: String,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

impl RequestSigner {
    /// Create a signer for the given credentials.
    pub fn new(access_key: &str, secret_key: &str) -> Self {
        Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    /// Stamp the request with the current time and sign it.
    pub fn sign(&self, req: &mut Request) -> Result<(), SignError> {
        self.sign_at(req, Utc::now())
    }

    /// Stamp the request with a given time and sign it.
    ///
    /// Only the request's headers are changed: the timestamp header is
    /// set first, then the `Authorization` header.
    pub fn sign_at(&self, req: &mut Request, now: DateTime<Utc>) -> Result<(), SignError> {
        let date = now.format(DATE_FORMAT).to_string();
        req.headers_mut().insert(DATE_HEADER, header_value(date)?);

        let to_sign = string_to_sign(req.method(), req.headers(), req.url());
        trace!("string to sign: {:?}", to_sign);
        let signature = signature(&self.secret_key, &to_sign);

        let auth = format!("{} {}:{}", SCHEME, self.access_key, signature);
        req.headers_mut().insert(AUTHORIZATION, header_value(auth)?);
        Ok(())
    }
}

fn header_value(value: String) -> Result<HeaderValue, SignError> {
    HeaderValue::from_str(&value).map_err(|err| SignError::HeaderValue(value, err))
}

/// Build the string that gets signed for a request.
pub fn string_to_sign(method: &Method, headers: &HeaderMap, url: &Url) -> String {
    format!(
        "{}\n{}\n{}\n\n{}{}",
        method,
        header_str(headers, CONTENT_MD5),
        header_str(headers, CONTENT_TYPE.as_str()),
        canonical_amz_headers(headers),
        canonical_resource(url),
    )
}

/// Return the `x-amz` headers in canonical form.
///
/// Header names are lower case and sorted. Each header becomes one
/// `name:value` line, with newlines in the value replaced by spaces.
/// Every line, including the last one, ends in a newline.
pub fn canonical_amz_headers(headers: &HeaderMap) -> String {
    let mut names: Vec<String> = headers
        .keys()
        .map(|name| name.as_str().trim().to_lowercase())
        .filter(|name| name.starts_with(AMZ_PREFIX))
        .collect();
    names.sort();
    names.dedup();

    let mut block = String::new();
    for name in names {
        block.push_str(&name);
        block.push(':');
        block.push_str(&header_str(headers, &name).replace('\n', " "));
        block.push('\n');
    }
    block
}

/// Return the escaped path of a request, plus any signed sub-resources.
pub fn canonical_resource(url: &Url) -> String {
    let mut resource = url.path().to_string();
    let mut subs: Vec<String> = url
        .query_pairs()
        .filter(|(key, _)| SUB_RESOURCES.contains(&key.as_ref()))
        .map(|(key, value)| {
            if value.is_empty() {
                key.to_string()
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect();
    if !subs.is_empty() {
        subs.sort();
        resource.push('?');
        resource.push_str(&subs.join("&"));
    }
    resource
}

/// Compute the base64 encoded HMAC-SHA1 of a string.
pub fn signature(secret_key: &str, to_sign: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC takes keys of any length");
    mac.update(to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).to_string())
        .unwrap_or_default()
}
