//! S3-compatible storage client
//!
//! Pure-Rust async client using reqwest with manual AWS SigV4 signing.
//! Path-style addressing (`{endpoint}/{bucket}/{key}`), so MinIO and
//! friends work without DNS tricks.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::object_store::{CompletedPart, ObjectStore};
use super::sigv4::{canonical_query, uri_encode, SigV4Signer};
use crate::error::{Result, StratusError};

/// Configuration for S3 client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            bucket: "stratus".into(),
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

/// S3-compatible storage client using reqwest
pub struct S3Client {
    client: Client,
    config: S3Config,
    signer: Option<SigV4Signer>,
    host: String,
}

impl S3Client {
    /// Create a new S3 client
    ///
    /// Requests are signed only when both credentials are configured.
    pub fn new(config: S3Config) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| StratusError::InvalidConfig {
            reason: format!("Invalid S3 endpoint {}: {}", config.endpoint, e),
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(StratusError::InvalidConfig {
                    reason: format!("S3 endpoint {} has no host", config.endpoint),
                })
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| StratusError::storage(format!("Failed to create HTTP client: {}", e)))?;

        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access), Some(secret)) => Some(SigV4Signer::new(access, secret, &config.region)),
            _ => {
                warn!("No S3 credentials configured, sending unsigned requests");
                None
            }
        };

        Ok(Self {
            client,
            config,
            signer,
            host,
        })
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Encoded path of an object, as used both on the wire and for signing
    fn object_path(&self, key: &str) -> String {
        format!(
            "/{}/{}",
            uri_encode(&self.config.bucket, true),
            uri_encode(key, false)
        )
    }

    /// Build, sign and send one request
    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> std::result::Result<Response, reqwest::Error> {
        let path = self.object_path(key);
        let query = canonical_query(query);
        let url = if query.is_empty() {
            format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
        } else {
            format!("{}{}?{}", self.config.endpoint.trim_end_matches('/'), path, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        if let Some(signer) = &self.signer {
            let signed = signer.sign(
                method.as_str(),
                &self.host,
                &path,
                &query,
                headers,
                &body,
                Utc::now(),
            );
            request = request
                .header("authorization", signed.authorization)
                .header("x-amz-date", signed.amz_date)
                .header("x-amz-content-sha256", signed.content_sha256);
        }

        request.body(body).send().await
    }

    /// Turn a non-success response into a storage error carrying the S3 error code
    async fn failure(op: &str, key: &str, resp: Response) -> StratusError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = match (extract_tag(&body, "Code"), extract_tag(&body, "Message")) {
            (Some(code), Some(message)) => format!("{} ({})", code, message),
            (Some(code), None) => code,
            _ => format!("status {}", status),
        };
        StratusError::storage(format!("{} failed for {}: {}", op, key, detail))
    }

    fn transport(op: &str, key: &str, e: reqwest::Error) -> StratusError {
        StratusError::storage(format!("{} failed for {}: {}", op, key, e))
    }

    fn etag_header(resp: &Response) -> String {
        resp.headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        let resp = self
            .send(
                Method::POST,
                key,
                &[("uploads", "")],
                &[("content-type", content_type)],
                Bytes::new(),
            )
            .await
            .map_err(|e| Self::transport("Create multipart upload", key, e))?;

        if !resp.status().is_success() {
            return Err(Self::failure("Create multipart upload", key, resp).await);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Self::transport("Create multipart upload", key, e))?;
        let upload_id = extract_tag(&body, "UploadId").ok_or_else(|| {
            StratusError::storage(format!("No UploadId in create response for {}", key))
        })?;

        debug!("Created multipart upload {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        let part = part_number.to_string();
        let resp = self
            .send(
                Method::PUT,
                key,
                &[("partNumber", part.as_str()), ("uploadId", upload_id)],
                &[],
                data,
            )
            .await
            .map_err(|e| Self::transport("Upload part", key, e))?;

        if !resp.status().is_success() {
            return Err(Self::failure("Upload part", key, resp).await);
        }

        let etag = Self::etag_header(&resp);
        if etag.is_empty() {
            return Err(StratusError::storage(format!(
                "Upload part {} for {} returned no ETag",
                part_number, key
            )));
        }
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let body = complete_request_body(parts);
        let resp = self
            .send(
                Method::POST,
                key,
                &[("uploadId", upload_id)],
                &[("content-type", "application/xml")],
                Bytes::from(body),
            )
            .await
            .map_err(|e| Self::transport("Complete multipart upload", key, e))?;

        if !resp.status().is_success() {
            return Err(Self::failure("Complete multipart upload", key, resp).await);
        }

        // S3 may answer 200 and still report an error in the body
        let text = resp
            .text()
            .await
            .map_err(|e| Self::transport("Complete multipart upload", key, e))?;
        if text.contains("<Error>") {
            let code = extract_tag(&text, "Code").unwrap_or_else(|| "unknown".into());
            return Err(StratusError::storage(format!(
                "Complete multipart upload failed for {}: {}",
                key, code
            )));
        }

        debug!("Completed multipart upload {} for {} ({} parts)", upload_id, key, parts.len());
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let resp = self
            .send(Method::DELETE, key, &[("uploadId", upload_id)], &[], Bytes::new())
            .await
            .map_err(|e| Self::transport("Abort multipart upload", key, e))?;

        if !resp.status().is_success() {
            return Err(Self::failure("Abort multipart upload", key, resp).await);
        }

        debug!("Aborted multipart upload {} for {}", upload_id, key);
        Ok(())
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let resp = self
            .send(Method::PUT, key, &[], &[("content-type", content_type)], data)
            .await
            .map_err(|e| Self::transport("Put object", key, e))?;

        if !resp.status().is_success() {
            return Err(Self::failure("Put object", key, resp).await);
        }

        let etag = Self::etag_header(&resp);
        debug!("Put {} complete, etag={}", key, etag);
        Ok(etag)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let resp = self
            .send(Method::GET, key, &[], &[], Bytes::new())
            .await
            .map_err(|e| Self::transport("Get object", key, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StratusError::ObjectNotFound { key: key.into() });
        }

        if !resp.status().is_success() {
            return Err(Self::failure("Get object", key, resp).await);
        }

        resp.bytes()
            .await
            .map_err(|e| StratusError::storage(format!("Failed to read body for {}: {}", key, e)))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let resp = self
            .send(Method::DELETE, key, &[], &[], Bytes::new())
            .await
            .map_err(|e| Self::transport("Delete object", key, e))?;

        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(Self::failure("Delete object", key, resp).await);
        }

        debug!("Deleted {}", key);
        Ok(())
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<String> {
        let source = self.object_path(src_key);
        let resp = self
            .send(
                Method::PUT,
                dst_key,
                &[],
                &[("x-amz-copy-source", source.as_str())],
                Bytes::new(),
            )
            .await
            .map_err(|e| Self::transport("Copy object", src_key, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StratusError::ObjectNotFound { key: src_key.into() });
        }

        if !resp.status().is_success() {
            return Err(Self::failure("Copy object", src_key, resp).await);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Self::transport("Copy object", src_key, e))?;
        if text.contains("<Error>") {
            let code = extract_tag(&text, "Code").unwrap_or_else(|| "unknown".into());
            return Err(StratusError::storage(format!(
                "Copy object failed for {}: {}",
                src_key, code
            )));
        }

        debug!("Copied {} to {}", src_key, dst_key);
        Ok(extract_tag(&text, "ETag").unwrap_or_default())
    }
}

/// Text of the first `<tag>` element, XML entities decoded
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(
        body[start..end]
            .replace("&quot;", "\"")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `CompleteMultipartUpload` request document
fn complete_request_body(parts: &[CompletedPart]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for part in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.part_number,
            xml_escape(&part.etag)
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag() {
        let body = "<InitiateMultipartUploadResult><Bucket>b</Bucket>\
                    <Key>k</Key><UploadId>VXBsb2FkIElE</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(extract_tag(body, "UploadId").as_deref(), Some("VXBsb2FkIElE"));
        assert_eq!(extract_tag(body, "Missing"), None);

        let copy = "<CopyObjectResult><ETag>&quot;abc&quot;</ETag></CopyObjectResult>";
        assert_eq!(extract_tag(copy, "ETag").as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_complete_body() {
        let parts = vec![
            CompletedPart::new(1, "\"etag-1\"", 10),
            CompletedPart::new(2, "\"etag-2\"", 5),
        ];
        assert_eq!(
            complete_request_body(&parts),
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>\"etag-1\"</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>\"etag-2\"</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_object_path_encoding() {
        let client = S3Client::new(S3Config::default()).unwrap();
        assert_eq!(client.host, "localhost:9000");
        assert_eq!(
            client.object_path("folder/a file+1.txt"),
            "/stratus/folder/a%20file%2B1.txt"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = S3Config {
            endpoint: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            S3Client::new(config),
            Err(StratusError::InvalidConfig { .. })
        ));
    }
}
