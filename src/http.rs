#![forbid(unsafe_code)]

//! Blocking HTTP client shared by the page fetcher and the downloader.
//!
//! One `HttpClient` is built per run from explicit `HttpSettings` and passed
//! to every component that talks to the network; there is no process-wide
//! session.

use std::io::Read;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::security::Credential;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Transport policy for every request made during a run.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub default_headers: Vec<(String, String)>,
    pub max_retries: u32,
    /// Base delay; attempt `n` sleeps `backoff * 2^n`.
    pub backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: vec![
                ("accept".to_string(), "*/*".to_string()),
                ("accept-language".to_string(), "en-US,en;q=0.9".to_string()),
            ],
            max_retries: 3,
            backoff: Duration::from_secs(1),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A single search-page request as shaped by an origin adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PageRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

/// Streaming response for a media GET.
pub struct MediaResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for MediaResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    settings: HttpSettings,
}

impl HttpClient {
    pub fn new(settings: HttpSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .user_agent(&settings.user_agent)
            .build();
        Self { agent, settings }
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Sends a page request and decodes the JSON envelope.
    pub fn fetch_json(&self, request: &PageRequest, credential: Option<&Credential>) -> Result<Value> {
        let response = self.execute(&request.url, request.body.as_ref(), || {
            let mut builder = self.request(request.method, &request.url, &request.headers);
            for (key, value) in &request.query {
                builder = builder.query(key, value);
            }
            if let Some((name, value)) = credential.and_then(Credential::header) {
                builder = builder.set(name, &value);
            }
            builder
        })?;

        let status = response.status();
        if status != 200 {
            return Err(IngestError::transient(&request.url, format!("unexpected status {status}")));
        }
        response
            .into_json::<Value>()
            .map_err(|err| IngestError::transient(&request.url, format!("invalid JSON body: {err}")))
    }

    /// Opens a media URL for streaming.
    pub fn get_media(&self, url: &str, headers: &[(String, String)]) -> Result<MediaResponse> {
        let response = self.execute(url, None, || self.request(Method::Get, url, headers))?;
        let content_type = response
            .header("content-type")
            .map(|value| value.trim().to_ascii_lowercase());
        let content_length = response
            .header("content-length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        Ok(MediaResponse {
            status: response.status(),
            content_type,
            content_length,
            body: response.into_reader(),
        })
    }

    fn request(&self, method: Method, url: &str, headers: &[(String, String)]) -> ureq::Request {
        let mut builder = self.agent.request(method.as_str(), url);
        for (key, value) in self.settings.default_headers.iter().chain(headers) {
            builder = builder.set(key, value);
        }
        builder
    }

    /// Runs the request, retrying configured statuses and transport errors
    /// with exponential backoff.
    fn execute<F>(&self, url: &str, body: Option<&Value>, build: F) -> Result<ureq::Response>
    where
        F: Fn() -> ureq::Request,
    {
        let mut attempt = 0u32;
        loop {
            let request = build();
            let result = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };
            let retryable = attempt < self.settings.max_retries;
            match result {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(code, _))
                    if retryable && self.settings.retry_statuses.contains(&code) =>
                {
                    warn!(url, status = code, attempt, "retrying after error status");
                }
                Err(ureq::Error::Status(code, _)) => {
                    return Err(IngestError::transient(url, format!("status {code}")));
                }
                Err(ureq::Error::Transport(transport)) if retryable => {
                    warn!(url, error = %transport, attempt, "retrying after transport error");
                }
                Err(err) => return Err(IngestError::transient(url, err)),
            }

            let delay = self.settings.backoff.saturating_mul(1u32 << attempt.min(16));
            if !delay.is_zero() {
                debug!(url, delay_ms = delay.as_millis() as u64, "backing off");
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}
