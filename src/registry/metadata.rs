use crate::core::config::MirrorPaths;
use crate::core::packages::{parse_package_list, PackageEntry};
use crate::core::repository::Repository;
use crate::registry::client::{DownloadManager, FetchOutcome};
use crate::{MirrorError, Result};
use flate2::read::GzDecoder;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

/// Compression declared by a server's `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Bzip2,
}

impl Compression {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or("").trim();
        match mime {
            "application/x-gzip" | "application/gzip" => Some(Compression::Gzip),
            "application/x-xz" => Some(Compression::Xz),
            "application/x-bzip2" => Some(Compression::Bzip2),
            _ => None,
        }
    }

    /// Name of the external tool that inflates this format.
    pub fn tool(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Xz => "xz",
            Compression::Bzip2 => "bzip2",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => ".gz",
            Compression::Xz => ".xz",
            Compression::Bzip2 => ".bz2",
        }
    }
}

/// Gives a compressed download its proper extension and runs the external tool on it.
///
/// Best-effort: failures are logged and the run carries on.
pub async fn decompress(path: &Path, compression: Compression) {
    let mut compressed = path.as_os_str().to_owned();
    compressed.push(compression.extension());
    let compressed = PathBuf::from(compressed);

    info!("Decompressing {} with {}", path.display(), compression.tool());
    if let Err(e) = tokio::fs::rename(path, &compressed).await {
        warn!(
            "Cannot rename {} to {}, ignored: {}",
            path.display(),
            compressed.display(),
            e
        );
    }

    let status = Command::new(compression.tool())
        .arg("-dfkq")
        .arg(&compressed)
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(
            "Cannot decompress {} using {}, ignored: {}",
            compressed.display(),
            compression.tool(),
            status
        ),
        Err(e) => warn!(
            "Cannot decompress {} using {}, ignored: {}",
            compressed.display(),
            compression.tool(),
            e
        ),
    }
}

/// Fetches repository metadata into the staging tree.
///
/// Package lists are fetched on the caller's path. Release, Contents and
/// translation files go to background tasks that are never joined; they may
/// still be running when the download barrier is passed.
pub struct MetadataFetcher {
    manager: Arc<DownloadManager>,
    paths: Arc<MirrorPaths>,
    translations: Vec<String>,
    background: Vec<(String, JoinHandle<()>)>,
}

impl MetadataFetcher {
    pub fn new(manager: Arc<DownloadManager>, paths: Arc<MirrorPaths>, translations: Vec<String>) -> Self {
        Self {
            manager,
            paths,
            translations,
            background: Vec::new(),
        }
    }

    /// One attempt; logs failures and returns the outcome only on success.
    async fn fetch(manager: &DownloadManager, paths: &MirrorPaths, url: &Url) -> Result<Option<FetchOutcome>> {
        let dst = paths.skel_path(url);
        match manager.download(url, &dst).await {
            Ok(outcome) => {
                info!("Info file {} downloaded", url);
                Ok(Some(outcome))
            }
            Err(e @ MirrorError::UnsupportedScheme(_)) => Err(e),
            Err(e) => {
                warn!("Cannot fetch {}: {}", url, e);
                Ok(None)
            }
        }
    }

    /// Fetches `url` and inflates it when the server sent a compressed body under a plain name.
    async fn fetch_and_inflate(manager: &DownloadManager, paths: &MirrorPaths, url: &Url) -> Result<()> {
        let Some(outcome) = Self::fetch(manager, paths, url).await? else {
            return Ok(());
        };
        let compression = outcome
            .content_type
            .as_deref()
            .and_then(Compression::from_content_type);
        if let Some(compression) = compression {
            if !url.path().ends_with(compression.extension()) {
                decompress(&paths.skel_path(url), compression).await;
            }
        }
        Ok(())
    }

    /// Launches the background fetch of Release, Contents and translation files.
    pub fn spawn_info_files(&mut self, repo: &Repository) -> Result<()> {
        let info_files = repo.info_files()?;
        let mut translations = Vec::new();
        for lang in &self.translations {
            translations.extend(repo.translations(lang)?);
        }

        let manager = self.manager.clone();
        let paths = self.paths.clone();
        let label = format!("{} {} [{}]", repo.url, repo.version, repo.architecture);
        let task_label = label.clone();

        let handle = tokio::spawn(async move {
            for url in &info_files {
                if let Err(e) = Self::fetch_and_inflate(&manager, &paths, url).await {
                    warn!("Background metadata fetch for {} stopped: {}", task_label, e);
                    return;
                }
            }
            for url in &translations {
                if let Err(e) = Self::fetch(&manager, &paths, url).await {
                    warn!("Background metadata fetch for {} stopped: {}", task_label, e);
                    return;
                }
            }
        });
        self.background.push((label, handle));
        Ok(())
    }

    /// Fetches the package list of `component` and its `.gz` form, then parses them.
    pub async fn fetch_package_list(&self, repo: &Repository, component: &str) -> Result<Vec<PackageEntry>> {
        let plain = repo.packages(component)?;
        let gz = repo.packages_gz(component)?;

        Self::fetch_and_inflate(&self.manager, &self.paths, &plain).await?;
        Self::fetch(&self.manager, &self.paths, &gz).await?;

        let plain_path = self.paths.skel_path(&plain);
        let gz_path = self.paths.skel_path(&gz);
        let repo = repo.clone();
        tokio::task::spawn_blocking(move || read_package_list(&repo, &plain_path, &gz_path))
            .await
            .map_err(|e| MirrorError::Aborted(format!("package list reader panicked: {}", e)))?
    }

    /// Background fetches that have not finished yet.
    pub fn pending(&self) -> Vec<&str> {
        self.background
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(label, _)| label.as_str())
            .collect()
    }
}

/// Reads the uncompressed list, falling back to the gzipped one.
pub fn read_package_list(repo: &Repository, plain: &Path, gz: &Path) -> Result<Vec<PackageEntry>> {
    let reader: Box<dyn Read> = match std::fs::File::open(plain) {
        Ok(file) => Box::new(file),
        Err(_) => match std::fs::File::open(gz) {
            Ok(file) => Box::new(GzDecoder::new(file)),
            Err(source) => {
                return Err(MirrorError::PackageListUnavailable {
                    path: gz.to_path_buf(),
                    source,
                })
            }
        },
    };
    parse_package_list(repo, BufReader::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::repository::parse_repo;
    use crate::test_support::{Reply, ScriptedServer};
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    const LIST: &str = "Filename: pool/main/a/a_1_amd64.deb\nSize: 3\nMD5sum: abc\n\n\
Filename: pool/main/b/b_1_amd64.deb\nSize: 5\nMD5sum: def\n";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn content_type_mapping() {
        assert_eq!(Compression::from_content_type("application/x-gzip"), Some(Compression::Gzip));
        assert_eq!(Compression::from_content_type("application/gzip; charset=binary"), Some(Compression::Gzip));
        assert_eq!(Compression::from_content_type("application/x-xz"), Some(Compression::Xz));
        assert_eq!(Compression::from_content_type("application/x-bzip2"), Some(Compression::Bzip2));
        assert_eq!(Compression::from_content_type("text/plain"), None);
        assert_eq!(Compression::Bzip2.tool(), "bzip2");
        assert_eq!(Compression::Xz.extension(), ".xz");
    }

    #[test]
    fn falls_back_to_gzipped_list() {
        let dir = TempDir::new().unwrap();
        let repo = parse_repo("deb http://host/debian stable main", "amd64").unwrap().remove(0);
        let gz = dir.path().join("Packages.gz");
        std::fs::write(&gz, gzip(LIST.as_bytes())).unwrap();

        let entries = read_package_list(&repo, &dir.path().join("Packages"), &gz).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].size, 5);
    }

    #[test]
    fn missing_lists_are_fatal() {
        let dir = TempDir::new().unwrap();
        let repo = parse_repo("deb http://host/debian stable main", "amd64").unwrap().remove(0);

        let err = read_package_list(&repo, &dir.path().join("Packages"), &dir.path().join("Packages.gz"))
            .unwrap_err();
        assert!(matches!(err, MirrorError::PackageListUnavailable { .. }));
    }

    #[tokio::test]
    async fn package_list_is_fetched_into_staging() {
        let server = ScriptedServer::start(vec![Reply::ok(LIST.as_bytes()), Reply::status(404)]).await;
        let dir = TempDir::new().unwrap();
        let paths = Arc::new(MirrorPaths::new(dir.path().join("skel"), dir.path().join("mirror")));
        let manager = Arc::new(DownloadManager::new(None, 4).unwrap());
        let fetcher = MetadataFetcher::new(manager, paths.clone(), Vec::new());

        let line = format!("deb {} stable main", server.url("/debian/"));
        let repo = parse_repo(&line, "amd64").unwrap().remove(0);
        let entries = fetcher.fetch_package_list(&repo, "main").await.unwrap();

        assert_eq!(entries.len(), 2);
        assert!(paths.skel_path(&repo.packages("main").unwrap()).is_file());
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn unreachable_lists_abort() {
        let server = ScriptedServer::start(Vec::new()).await;
        let dir = TempDir::new().unwrap();
        let paths = Arc::new(MirrorPaths::new(dir.path().join("skel"), dir.path().join("mirror")));
        let manager = Arc::new(DownloadManager::new(None, 4).unwrap());
        let fetcher = MetadataFetcher::new(manager, paths, Vec::new());

        let line = format!("deb {} stable main", server.url("/debian/"));
        let repo = parse_repo(&line, "amd64").unwrap().remove(0);
        let err = fetcher.fetch_package_list(&repo, "main").await.unwrap_err();

        assert!(matches!(err, MirrorError::PackageListUnavailable { .. }));
    }

    #[tokio::test]
    async fn unsupported_scheme_on_package_list_is_fatal() {
        let dir = TempDir::new().unwrap();
        let paths = Arc::new(MirrorPaths::new(dir.path().join("skel"), dir.path().join("mirror")));
        let manager = Arc::new(DownloadManager::new(None, 4).unwrap());
        let fetcher = MetadataFetcher::new(manager, paths, Vec::new());

        let repo = parse_repo("deb ftp://host/debian stable main", "amd64").unwrap().remove(0);
        let err = fetcher.fetch_package_list(&repo, "main").await.unwrap_err();

        assert!(matches!(err, MirrorError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn background_fetches_are_tracked() {
        let server = ScriptedServer::start(Vec::new()).await;
        let dir = TempDir::new().unwrap();
        let paths = Arc::new(MirrorPaths::new(dir.path().join("skel"), dir.path().join("mirror")));
        let manager = Arc::new(DownloadManager::new(None, 4).unwrap());
        let mut fetcher = MetadataFetcher::new(manager, paths, vec!["en".to_string()]);

        let line = format!("deb {} stable main", server.url("/debian/"));
        let repo = parse_repo(&line, "amd64").unwrap().remove(0);
        fetcher.spawn_info_files(&repo).unwrap();

        // 2 release files, 3 per component, 1 translation
        for _ in 0..200 {
            if fetcher.pending().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(fetcher.pending().is_empty());
        assert_eq!(server.hits(), 6);
    }
}
