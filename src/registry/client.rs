use crate::utils::bandwidth::RateBucket;
use crate::{constants::*, MirrorError, Result};
use futures::stream::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Formats the message reported when a URL scheme has no downloader.
pub type SchemeMessage = fn(&Url) -> String;

fn default_scheme_message(url: &Url) -> String {
    format!("URL scheme {} of {} is not supported", url.scheme(), url)
}

/// What the server told us about a fetched file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub content_type: Option<String>,
    pub bytes: u64,
}

/// Streams HTTP(S) responses to disk, optionally throttled by the shared bucket.
pub struct HttpDownloader {
    client: Client,
    bucket: Option<Arc<RateBucket>>,
}

impl HttpDownloader {
    pub fn new(client: Client, bucket: Option<Arc<RateBucket>>) -> Self {
        Self { client, bucket }
    }

    /// Mirror files are stored byte-for-byte, so transparent decoding stays off.
    fn create_client() -> Result<Client> {
        ClientBuilder::new()
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("aptsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MirrorError::Network)
    }

    pub async fn download(&self, url: &Url, dst: &Path) -> Result<FetchOutcome> {
        let response = self.client.get(url.clone()).send().await?;

        if response.status() != StatusCode::OK {
            return Err(MirrorError::HttpStatus {
                url: url.to_string(),
                status: response.status().to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::filesystem(parent, e))?;
        }
        let mut file = fs::File::create(dst)
            .await
            .map_err(|e| MirrorError::filesystem(dst, e))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk?;
            if let Some(bucket) = &self.bucket {
                bucket.acquire(chunk.len() as u64).await;
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| MirrorError::filesystem(dst, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| MirrorError::filesystem(dst, e))?;

        Ok(FetchOutcome {
            content_type,
            bytes: written,
        })
    }
}

/// Per-scheme download strategy.
pub enum Downloader<'a> {
    Http(&'a HttpDownloader),
    /// Configuration error: fails the whole run instead of the single item.
    Unsupported(String),
}

impl Downloader<'_> {
    pub async fn download(&self, url: &Url, dst: &Path) -> Result<FetchOutcome> {
        match self {
            Downloader::Http(http) => http.download(url, dst).await,
            Downloader::Unsupported(message) => Err(MirrorError::UnsupportedScheme(message.clone())),
        }
    }
}

/// Dispatches URLs to downloaders and caps how many transfers run at once.
pub struct DownloadManager {
    http: HttpDownloader,
    gate: Arc<Semaphore>,
    scheme_message: SchemeMessage,
}

impl DownloadManager {
    pub fn new(bucket: Option<Arc<RateBucket>>, max_in_flight: usize) -> Result<Self> {
        let client = HttpDownloader::create_client()?;
        Ok(Self::with_client(client, bucket, max_in_flight))
    }

    pub fn with_client(client: Client, bucket: Option<Arc<RateBucket>>, max_in_flight: usize) -> Self {
        Self {
            http: HttpDownloader::new(client, bucket),
            gate: Arc::new(Semaphore::new(max_in_flight.max(1))),
            scheme_message: default_scheme_message,
        }
    }

    pub fn with_scheme_message(mut self, message: SchemeMessage) -> Self {
        self.scheme_message = message;
        self
    }

    pub fn dispatch(&self, url: &Url) -> Downloader<'_> {
        match url.scheme() {
            "http" | "https" => Downloader::Http(&self.http),
            _ => Downloader::Unsupported((self.scheme_message)(url)),
        }
    }

    /// Single attempt, holding an admission permit for the duration of the transfer.
    pub async fn download(&self, url: &Url, dst: &Path) -> Result<FetchOutcome> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| MirrorError::Aborted("download gate closed".to_string()))?;
        debug!("Fetching {} into {}", url, dst.display());
        self.dispatch(url).download(url, dst).await
    }

    /// Up to [`MAX_DOWNLOAD_ATTEMPTS`] back-to-back attempts; non-retryable errors return at once.
    pub async fn download_with_retry(&self, url: &Url, dst: &Path) -> Result<FetchOutcome> {
        let mut attempt = 1;
        loop {
            match self.download(url, dst).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= MAX_DOWNLOAD_ATTEMPTS => {
                    return Err(MirrorError::DownloadsExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt, MAX_DOWNLOAD_ATTEMPTS, url, e
                    );
                    attempt += 1;
                }
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }
}
