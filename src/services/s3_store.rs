//! S3-compatible object storage over plain HTTP with AWS Signature V4.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::storage::{ObjectStore, StoreError};
use crate::models::S3Config;

type HmacSha256 = Hmac<Sha256>;

/// Characters left as-is in canonical URIs (RFC 3986 unreserved)
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Request parts covered by the signature.
pub struct SigningInput<'a> {
    pub method: &'a str,
    pub canonical_uri: &'a str,
    pub canonical_query: &'a str,
    /// Lower-case header names with their values; must include `host`
    pub headers: &'a [(&'a str, &'a str)],
    pub payload_hash: &'a str,
}

/// Compute the `Authorization` header value for a request.
pub fn sign_request(
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
    time: DateTime<Utc>,
    input: &SigningInput<'_>,
) -> Result<String, StoreError> {
    let amz_date = time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = time.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/s3/aws4_request");

    let mut headers: Vec<(String, String)> = input
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        input.canonical_uri,
        input.canonical_query,
        canonical_headers,
        signed_headers,
        input.payload_hash
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{secret_access_key}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, b"s3")?;
    let k_signing = hmac(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={access_key_id}/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
    ))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StoreError::Backend(format!("cannot sign request: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encode an object key for use in a URL path, keeping `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

pub struct S3Store {
    client: reqwest::Client,
    config: S3Config,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Object URL and the `host` header value it is signed with.
    ///
    /// A custom endpoint uses path-style addressing; AWS uses
    /// virtual-hosted-style.
    fn locate(&self, key: &str) -> Result<(Url, String), StoreError> {
        let encoded = encode_key(key);
        let raw = match &self.config.endpoint {
            Some(endpoint) => format!("{endpoint}/{}/{encoded}", self.config.bucket),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{encoded}",
                self.config.bucket, self.config.region
            ),
        };
        let url = Url::parse(&raw).map_err(|e| StoreError::Backend(format!("{raw}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(StoreError::Backend(format!("{raw}: no host"))),
        };
        Ok((url, host))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, StoreError> {
        let (url, host) = self.locate(key)?;
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex::encode(Sha256::digest(&body));

        let authorization = sign_request(
            &self.config.access_key_id,
            &self.config.secret_access_key,
            &self.config.region,
            now,
            &SigningInput {
                method: method.as_str(),
                canonical_uri: url.path(),
                canonical_query: "",
                headers: &[
                    ("host", host.as_str()),
                    ("x-amz-content-sha256", payload_hash.as_str()),
                    ("x-amz-date", amz_date.as_str()),
                ],
                payload_hash: &payload_hash,
            },
        )?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("authorization", authorization);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        if method == Method::PUT {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("{method} {key}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(StoreError::Backend(format!(
                "{method} {key} returned {status}: {detail}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.send(Method::GET, key, Vec::new(), None).await?;
        let data = response
            .bytes()
            .await
            .map_err(|e| StoreError::Backend(format!("GET {key}: {e}")))?;
        tracing::debug!(key, bytes = data.len(), bucket = %self.config.bucket, "Fetched object");
        Ok(data.to_vec())
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let bytes = data.len();
        self.send(Method::PUT, key, data, Some(content_type)).await?;
        tracing::info!(key, bytes, bucket = %self.config.bucket, "Stored object");
        Ok(key.to_string())
    }
}
