//! Amazon S3 object store.
//!
//! Lists, downloads and pre-signs objects using the S3 REST API with
//! AWS Signature V4 authentication. Supports custom endpoints for
//! S3-compatible services (MinIO, LocalStack).
//!
//! Signing uses pure-Rust `hmac` and `sha2`, with no C library dependencies.
//!
//! # Addressing
//!
//! Against AWS the bucket is part of the host
//! (`<bucket>.s3.<region>.amazonaws.com`). With a custom `endpoint_url` the
//! bucket moves into the path (`http://localhost:9000/<bucket>/<key>`), which
//! is what MinIO and LocalStack expect.
//!
//! # Authentication
//!
//! Requests are signed using
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! in the `Authorization` header. Pre-signed URLs use the query-string
//! variant with `UNSIGNED-PAYLOAD`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{ByteStream, ListPage, ListRequest, ObjectStore, StoreProvider};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::models::{ArchiveRef, Credentials};

type HmacSha256 = Hmac<Sha256>;

/// Longest validity S3 accepts for a pre-signed URL (7 days).
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

/// Creates [`S3Store`]s from request credentials and the `[storage]` config.
pub struct S3Provider {
    config: StorageConfig,
    client: reqwest::Client,
}

impl S3Provider {
    pub fn new(config: StorageConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

impl StoreProvider for S3Provider {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let region = credentials
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.config.default_region)
            .to_string();
        let store = S3Store::new(
            self.client.clone(),
            AwsCredentials::from(credentials),
            region,
            self.config.endpoint_url.as_deref(),
        )?;
        Ok(Arc::new(store))
    }
}

// ============ AWS Credentials ============

/// Access key pair (and optional session token) used for signing.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

impl From<&Credentials> for AwsCredentials {
    fn from(c: &Credentials) -> Self {
        Self::new(
            c.access_key.trim(),
            c.secret_key.trim(),
            c.session_token.clone().filter(|t| !t.is_empty()),
        )
    }
}

/// Scheme and host of a custom endpoint.
#[derive(Debug, Clone)]
struct Endpoint {
    scheme: &'static str,
    host: String,
}

impl Endpoint {
    fn parse(url: &str) -> Result<Self, StorageError> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("http://") {
            ("http", rest)
        } else if let Some(rest) = url.strip_prefix("https://") {
            ("https", rest)
        } else {
            ("https", url)
        };
        let host = rest.trim_end_matches('/');
        if host.is_empty() {
            return Err(StorageError::InvalidRequest(format!(
                "invalid endpoint_url: '{}'",
                url
            )));
        }
        Ok(Self {
            scheme,
            host: host.to_string(),
        })
    }
}

/// Where a request goes: scheme, host and canonical (already encoded) path.
struct Target {
    scheme: &'static str,
    host: String,
    canonical_uri: String,
}

/// S3 REST client bound to one set of credentials and one region.
pub struct S3Store {
    client: reqwest::Client,
    creds: AwsCredentials,
    region: String,
    endpoint: Option<Endpoint>,
}

impl S3Store {
    pub fn new(
        client: reqwest::Client,
        creds: AwsCredentials,
        region: String,
        endpoint_url: Option<&str>,
    ) -> Result<Self, StorageError> {
        let endpoint = endpoint_url.map(Endpoint::parse).transpose()?;
        Ok(Self {
            client,
            creds,
            region,
            endpoint,
        })
    }

    /// Resolve scheme, host and canonical URI for a bucket/key pair.
    ///
    /// `bucket = None` addresses the service itself (`ListBuckets`).
    fn target(&self, bucket: Option<&str>, key: &str) -> Target {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match (&self.endpoint, bucket) {
            (Some(ep), Some(bucket)) => Target {
                scheme: ep.scheme,
                host: ep.host.clone(),
                canonical_uri: if key.is_empty() {
                    format!("/{}", uri_encode(bucket))
                } else {
                    format!("/{}/{}", uri_encode(bucket), encoded_key)
                },
            },
            (Some(ep), None) => Target {
                scheme: ep.scheme,
                host: ep.host.clone(),
                canonical_uri: "/".to_string(),
            },
            (None, Some(bucket)) => Target {
                scheme: "https",
                host: format!("{}.s3.{}.amazonaws.com", bucket, self.region),
                canonical_uri: format!("/{}", encoded_key),
            },
            (None, None) => Target {
                scheme: "https",
                host: format!("s3.{}.amazonaws.com", self.region),
                canonical_uri: "/".to_string(),
            },
        }
    }

    /// Send a SigV4-signed GET and return the successful response.
    async fn signed_get(
        &self,
        operation: &'static str,
        target: &Target,
        query_params: &[(String, String)],
    ) -> Result<reqwest::Response, StorageError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");
        let canonical_querystring = canonical_query(query_params);

        let mut headers = vec![
            ("host".to_string(), target.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            target.canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = self.credential_scope(&now);
        let signature = self.sign(&now, &amz_date, &credential_scope, &canonical_request);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", target.scheme, target.host, target.canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req_builder = self
            .client
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| StorageError::Transport {
                operation,
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                operation,
                status,
                body: body.chars().take(500).collect(),
            });
        }

        Ok(resp)
    }

    /// Signed `GetObject` with a 404 reported as [`StorageError::NotFound`].
    async fn fetch_object(&self, bucket: &str, key: &str) -> Result<reqwest::Response, StorageError> {
        let target = self.target(Some(bucket), key);
        match self.signed_get("GetObject", &target, &[]).await {
            Err(StorageError::Status { status: 404, .. }) => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            other => other,
        }
    }

    fn credential_scope(&self, now: &DateTime<Utc>) -> String {
        format!("{}/{}/s3/aws4_request", now.format("%Y%m%d"), self.region)
    }

    fn sign(
        &self,
        now: &DateTime<Utc>,
        amz_date: &str,
        credential_scope: &str,
        canonical_request: &str,
    ) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &now.format("%Y%m%d").to_string(),
            &self.region,
            "s3",
        );
        hex_hmac_sha256(&signing_key, string_to_sign.as_bytes())
    }

    /// Build a pre-signed GET URL for a fixed signing time.
    fn presign_at(
        &self,
        bucket: &str,
        key: &str,
        expiry_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidRequest("object key is required".into()));
        }
        if expiry_secs == 0 || expiry_secs > MAX_PRESIGN_EXPIRY_SECS {
            return Err(StorageError::InvalidRequest(format!(
                "expiry must be between 1 and {} seconds",
                MAX_PRESIGN_EXPIRY_SECS
            )));
        }

        let target = self.target(Some(bucket), key);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = self.credential_scope(&now);

        let mut params = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.creds.access_key_id, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expiry_secs.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(ref token) = self.creds.session_token {
            params.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        let canonical_querystring = canonical_query(&params);

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            target.canonical_uri, canonical_querystring, target.host
        );
        let signature = self.sign(&now, &amz_date, &credential_scope, &canonical_request);

        Ok(format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            target.scheme, target.host, target.canonical_uri, canonical_querystring, signature
        ))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let target = self.target(None, "");
        let resp = self.signed_get("ListBuckets", &target, &[]).await?;
        let xml = resp.text().await.map_err(|e| StorageError::Transport {
            operation: "ListBuckets",
            message: e.to_string(),
        })?;
        Ok(parse_list_buckets_response(&xml))
    }

    async fn list_page(
        &self,
        bucket: &str,
        request: ListRequest<'_>,
    ) -> Result<ListPage, StorageError> {
        let mut query_params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !request.prefix.is_empty() {
            query_params.push(("prefix".to_string(), request.prefix.to_string()));
        }
        if let Some(delimiter) = request.delimiter {
            query_params.push(("delimiter".to_string(), delimiter.to_string()));
        }
        if let Some(token) = request.continuation_token {
            query_params.push(("continuation-token".to_string(), token.to_string()));
        }

        let target = self.target(Some(bucket), "");
        let resp = match self.signed_get("ListObjectsV2", &target, &query_params).await {
            Err(StorageError::Status { status: 404, body, .. }) if body.contains("NoSuchBucket") => {
                return Err(StorageError::NoSuchBucket(bucket.to_string()))
            }
            other => other?,
        };
        let xml = resp.text().await.map_err(|e| StorageError::Transport {
            operation: "ListObjectsV2",
            message: e.to_string(),
        })?;
        parse_list_objects_response(&xml)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self.fetch_object(bucket, key).await?;
        let bytes = resp.bytes().await.map_err(|e| StorageError::Transport {
            operation: "GetObject",
            message: format!("s3://{}/{}: {}", bucket, key, e),
        })?;
        Ok(bytes.to_vec())
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let resp = self.fetch_object(bucket, key).await?;
        let location = format!("s3://{}/{}", bucket, key);
        let chunks = resp.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| StorageError::Transport {
                operation: "GetObject",
                message: format!("{}: {}", location, e),
            })
        });
        Ok(chunks.boxed())
    }

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expiry_secs: u64,
    ) -> Result<String, StorageError> {
        self.presign_at(bucket, key, expiry_secs, Utc::now())
    }
}

// ============ AWS SigV4 Helpers ============

/// Sorted, RFC 3986-encoded query string.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted_params = params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
    sorted_params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing ============

/// Parse a `ListObjectsV2` XML response into one [`ListPage`].
fn parse_list_objects_response(xml: &str) -> Result<ListPage, StorageError> {
    if !xml.contains("<ListBucketResult") {
        return Err(StorageError::Malformed {
            operation: "ListObjectsV2",
            message: xml.chars().take(200).collect(),
        });
    }

    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_continuation_token = if is_truncated {
        extract_xml_value(xml, "NextContinuationToken")
    } else {
        None
    };
    if is_truncated && next_continuation_token.is_none() {
        return Err(StorageError::Malformed {
            operation: "ListObjectsV2",
            message: "truncated listing without NextContinuationToken".to_string(),
        });
    }

    let mut objects = Vec::new();
    for block in xml_blocks(xml, "Contents") {
        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();

        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        objects.push(ArchiveRef {
            key,
            size,
            last_modified,
        });
    }

    let common_prefixes = xml_blocks(xml, "CommonPrefixes")
        .into_iter()
        .filter_map(|block| extract_xml_value(block, "Prefix"))
        .collect();

    Ok(ListPage {
        objects,
        common_prefixes,
        next_continuation_token,
    })
}

/// Parse a `ListAllMyBucketsResult` XML response into bucket names.
fn parse_list_buckets_response(xml: &str) -> Vec<String> {
    xml_blocks(xml, "Bucket")
        .into_iter()
        .filter_map(|block| extract_xml_value(block, "Name"))
        .collect()
}

/// Inner text of every `<tag>...</tag>` block, in document order.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        let block_start = start + open.len();
        match remaining[block_start..].find(&close) {
            Some(end) => {
                blocks.push(&remaining[block_start..block_start + end]);
                remaining = &remaining[block_start + end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Extract and unescape the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let raw = xml_blocks(xml, tag).into_iter().next()?;
    Some(
        quick_xml::escape::unescape(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string()),
    )
}
