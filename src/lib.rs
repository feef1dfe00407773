//! aptsync - Debian repository mirroring
//!
//! Keeps a local replica of one or more apt repositories in sync with upstream:
//! - Repository metadata is resolved into a concrete list of package files
//! - Package files are fetched by a bounded, rate-limited worker pool
//! - Downloads land in a staging tree and are promoted only after every worker drains
//! - Mirror content no longer referenced by metadata is swept away

// Use mimalloc for better memory performance
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod cli;
pub mod core;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::{MirrorConfig, MirrorPaths},
    control::{parse_control_file, Stanza},
    fetcher::{FetchQueue, FetchSummary, PackageFetcher},
    packages::{parse_package_list, PackageEntry},
    reconcile::{reconcile, LiveSet, ReconcileStats},
    repository::{parse_repo, Repository},
    staging::promote,
};

pub use registry::{
    client::{DownloadManager, Downloader, FetchOutcome, HttpDownloader},
    metadata::{Compression, MetadataFetcher},
};

pub use utils::{
    bandwidth::RateBucket,
    progress::ProgressTracker,
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unrecognized architecture selector: {0}")]
    ArchitectureSelector(String),

    #[error("Invalid repository URI {uri}: {source}")]
    RepoUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Malformed repository line: {0}")]
    MalformedRepository(String),

    #[error("Malformed package list: invalid size {value:?} for {file}")]
    PackageListFormat { file: String, value: String },

    #[error("Cannot open package list {path}: {source}")]
    PackageListUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    UnsupportedScheme(String),

    #[error("Error downloading {url}: got http status {status}")]
    HttpStatus { url: String, status: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error downloading {url} after {attempts} attempts: {source}")]
    DownloadsExhausted {
        url: String,
        attempts: usize,
        #[source]
        source: Box<MirrorError>,
    },

    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl MirrorError {
    /// Transient transport failures are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::HttpStatus { .. } | MirrorError::Network(_))
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Global constants for tuning
pub mod constants {
    use std::time::Duration;

    pub const MAX_DOWNLOAD_ATTEMPTS: usize = 3;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/apt/mirror.list";
    pub const FALLBACK_ARCHITECTURE: &str = "i386";
}

#[cfg(test)]
pub(crate) mod test_support;
