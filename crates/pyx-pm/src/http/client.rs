//! HTTP client for index and artifact traffic.
//!
//! A thin wrapper around `reqwest` that adds retries with exponential
//! backoff on server errors and rate limiting, streamed downloads with a
//! progress callback, and JSON decoding.
//!
//! ```no_run
//! use pyx_pm::http::{HttpClient, HttpClientConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::with_config(
//!     HttpClientConfig::new()
//!         .with_timeout(Duration::from_secs(60))
//!         .with_max_retries(5),
//! )?;
//!
//! client.download(
//!     "https://files.example.com/demo-1.0-py3-none-any.whl",
//!     "/tmp/demo-1.0-py3-none-any.whl".as_ref(),
//!     Some(|downloaded, total| println!("{}/{}", downloaded, total)),
//! ).await?;
//! # Ok(())
//! # }
//! ```

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const DEFAULT_USER_AGENT: &str = concat!("pyx/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Max retries exceeded for {url}")]
    MaxRetries { url: String },

    #[error("JSON deserialization error: {0}")]
    JsonParse(String),
}

pub struct HttpClient {
    client: Client,
    user_agent: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, HttpError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .user_agent(&config.user_agent);

        if let Some(proxy_url) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        if let Some(cafile) = &config.cafile {
            let pem = std::fs::read(cafile)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            user_agent: config.user_agent,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    /// Perform GET request with automatic retries
    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        self.get_with_accept(url, None).await
    }

    /// GET with an explicit `Accept` header, retrying transient failures
    pub async fn get_with_accept(&self, url: &str, accept: Option<&str>) -> Result<Response, HttpError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self.execute_get(url, accept).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(HttpError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    } else {
                        return Err(HttpError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }

            if attempt < self.max_retries {
                let delay = self.retry_delay * 2_u32.pow(attempt);
                log::debug!("Retrying {} in {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Err(HttpError::MaxRetries {
                url: url.to_string(),
            }),
        }
    }

    async fn execute_get(&self, url: &str, accept: Option<&str>) -> Result<Response, HttpError> {
        let mut request = self.client.get(url).header("Accept-Encoding", "gzip");
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }
        Ok(request.send().await?)
    }

    /// GET JSON and deserialize
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        self.get_json_with_accept(url, "application/json").await
    }

    pub async fn get_json_with_accept<T: DeserializeOwned>(&self, url: &str, accept: &str) -> Result<T, HttpError> {
        let response = self.get_with_accept(url, Some(accept)).await?;
        let text = response.text().await?;

        serde_json::from_str(&text).map_err(|e| HttpError::JsonParse(e.to_string()))
    }

    /// Download file with progress callback
    pub async fn download<F>(&self, url: &str, dest: &Path, progress: Option<F>) -> Result<(), HttpError>
    where
        F: Fn(u64, u64),
    {
        let response = self.get(url).await?;
        let total_size = response.content_length().unwrap_or(0);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(dest).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(ref callback) = progress {
                callback(downloaded, total_size);
            }
        }

        file.flush().await?;

        Ok(())
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub proxy: Option<String>,
    pub cafile: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            proxy: None,
            cafile: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_cafile(mut self, cafile: PathBuf) -> Self {
        self.cafile = Some(cafile);
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpClientConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_max_retries(5)
            .with_user_agent("Test/1.0".to_string());

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.user_agent, "Test/1.0");
    }

    #[test]
    fn test_default_user_agent() {
        let client = HttpClient::new().unwrap();
        assert!(client.user_agent().starts_with("pyx/"));
        assert_eq!(client.max_retries(), DEFAULT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_retries() {
        let client = HttpClient::with_config(
            HttpClientConfig::new()
                .with_max_retries(1)
                .with_retry_delay(Duration::from_millis(1))
                .with_connect_timeout(Duration::from_millis(200)),
        )
        .unwrap();

        let result = client.get("http://127.0.0.1:9/simple/").await;
        assert!(result.is_err());
    }
}
