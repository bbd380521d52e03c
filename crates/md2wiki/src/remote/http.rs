//! HTTP transport shared by both protocol adapters.
//!
//! Thin wrapper around a `ureq` agent: per-request timeout, credential
//! header on every call, JSON helpers, multipart upload, and a bounded
//! retry loop. Only transport-level failures retry; any HTTP status
//! response, including 409, is returned to the adapter for interpretation.

use crate::config::ConnectionConfig;
use crate::error::{RemoteError, RemoteResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BASE_DELAY_MS: u64 = 250;

pub struct HttpClient {
    agent: ureq::Agent,
    site_url: String,
    auth_header: String,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &ConnectionConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let auth_header = match &config.user_name {
            Some(user) => format!(
                "Basic {}",
                BASE64.encode(format!("{user}:{}", config.api_key))
            ),
            None => format!("Bearer {}", config.api_key),
        };
        Self {
            agent,
            site_url: config.site_url(),
            auth_header,
            max_retries: config.max_retries,
        }
    }

    /// Builds a full endpoint URL: site prefix + API root + path.
    pub fn url(&self, api_root: &str, path: &str) -> String {
        let sep = if path.starts_with('/') { "" } else { "/" };
        format!("{}{}{sep}{}", self.site_url, api_root, path)
    }

    pub fn get_json(&self, url: &str, query: &[(&str, &str)]) -> RemoteResult<Value> {
        let response = self.execute(url, || {
            let mut req = self
                .agent
                .get(url)
                .set("Authorization", &self.auth_header)
                .set("Accept", "application/json");
            for (key, value) in query {
                req = req.query(key, value);
            }
            req.call()
        })?;
        read_json(url, response)
    }

    pub fn post_json(&self, url: &str, body: &Value) -> RemoteResult<Value> {
        let response = self.execute(url, || {
            self.agent
                .post(url)
                .set("Authorization", &self.auth_header)
                .set("Accept", "application/json")
                .send_json(body.clone())
        })?;
        read_json(url, response)
    }

    pub fn put_json(&self, url: &str, body: &Value) -> RemoteResult<Value> {
        let response = self.execute(url, || {
            self.agent
                .put(url)
                .set("Authorization", &self.auth_header)
                .set("Accept", "application/json")
                .send_json(body.clone())
        })?;
        read_json(url, response)
    }

    pub fn delete(&self, url: &str, query: &[(&str, &str)]) -> RemoteResult<()> {
        self.execute(url, || {
            let mut req = self.agent.delete(url).set("Authorization", &self.auth_header);
            for (key, value) in query {
                req = req.query(key, value);
            }
            req.call()
        })?;
        Ok(())
    }

    /// Uploads a file as `multipart/form-data` with an optional comment
    /// part, the shape Confluence's attachment endpoint expects.
    pub fn post_multipart_file(
        &self,
        url: &str,
        file_name: &str,
        file_path: &Path,
        comment: &str,
    ) -> RemoteResult<Value> {
        let bytes = std::fs::read(file_path).map_err(|e| RemoteError::Payload {
            url: url.to_string(),
            message: format!("cannot read {}: {e}", file_path.display()),
        })?;
        let boundary = format!("md2wiki-{:016x}", fastrand_seed());
        let body = multipart_body(&boundary, file_name, &bytes, comment);
        let content_type = format!("multipart/form-data; boundary={boundary}");

        let response = self.execute(url, || {
            self.agent
                .post(url)
                .set("Authorization", &self.auth_header)
                .set("Accept", "application/json")
                .set("X-Atlassian-Token", "no-check")
                .set("Content-Type", &content_type)
                .send_bytes(&body)
        })?;
        read_json(url, response)
    }

    /// Runs a request with bounded retry on transport failures. The request
    /// is rebuilt for every attempt.
    fn execute(
        &self,
        url: &str,
        build_and_send: impl Fn() -> Result<ureq::Response, ureq::Error>,
    ) -> RemoteResult<ureq::Response> {
        let mut attempt = 0;
        loop {
            match build_and_send() {
                Ok(response) => {
                    debug!(url, status = response.status(), "request completed");
                    return Ok(response);
                }
                Err(ureq::Error::Status(status, response)) => {
                    let message = response
                        .into_string()
                        .unwrap_or_else(|_| String::from("<unreadable body>"));
                    return Err(RemoteError::Http {
                        status,
                        url: url.to_string(),
                        message,
                    });
                }
                Err(ureq::Error::Transport(transport)) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(RemoteError::Transport {
                            attempts: attempt,
                            message: transport.to_string(),
                        });
                    }
                    let delay = RETRY_BASE_DELAY_MS * (1 << (attempt - 1));
                    warn!(url, attempt, delay_ms = delay, error = %transport, "transport failure, retrying");
                    std::thread::sleep(Duration::from_millis(delay));
                }
            }
        }
    }
}

fn read_json(url: &str, response: ureq::Response) -> RemoteResult<Value> {
    response.into_json().map_err(|e| RemoteError::Payload {
        url: url.to_string(),
        message: format!("invalid JSON response: {e}"),
    })
}

fn multipart_body(boundary: &str, file_name: &str, bytes: &[u8], comment: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"comment\"\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{comment}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Boundary entropy from the system clock; uniqueness within one process
/// is all that is needed.
fn fastrand_seed() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
