use crate::core::config::MirrorPaths;
use crate::core::packages::PackageEntry;
use crate::registry::client::DownloadManager;
use crate::{MirrorError, Result};
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Counts reported by the pool once every worker has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: usize,
    pub skipped: usize,
    /// Cache misses left alone because of dry-run mode.
    pub planned: usize,
}

impl FetchSummary {
    fn merge(&mut self, other: FetchSummary) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.planned += other.planned;
    }
}

/// Configures the package download pool.
pub struct PackageFetcher {
    manager: Arc<DownloadManager>,
    paths: Arc<MirrorPaths>,
    workers: usize,
    dry_run: bool,
    progress: ProgressBar,
}

impl PackageFetcher {
    pub fn new(manager: Arc<DownloadManager>, paths: Arc<MirrorPaths>, workers: usize) -> Self {
        Self {
            manager,
            paths,
            workers: workers.max(1),
            dry_run: false,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Spawns the workers and returns the queue that feeds them.
    pub fn start(self) -> FetchQueue {
        let (sender, receiver) = mpsc::channel::<PackageEntry>(self.workers);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();

        for id in 0..self.workers {
            let worker = Worker {
                id,
                manager: self.manager.clone(),
                paths: self.paths.clone(),
                dry_run: self.dry_run,
                progress: self.progress.clone(),
            };
            workers.spawn(worker.run(receiver.clone(), cancel.clone()));
        }

        FetchQueue {
            sender: Some(sender),
            workers,
            cancel,
            progress: self.progress,
        }
    }
}

struct Worker {
    id: usize,
    manager: Arc<DownloadManager>,
    paths: Arc<MirrorPaths>,
    dry_run: bool,
    progress: ProgressBar,
}

impl Worker {
    async fn run(
        self,
        queue: Arc<Mutex<mpsc::Receiver<PackageEntry>>>,
        cancel: CancellationToken,
    ) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();

        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    entry = queue.recv() => entry,
                }
            };
            let Some(entry) = next else {
                break;
            };

            if let Err(e) = self.process(&entry, &mut summary).await {
                error!("Error downloading {}: {}", entry.url, e);
                cancel.cancel();
                return Err(e);
            }
            self.progress.inc(1);
        }

        Ok(summary)
    }

    async fn process(&self, entry: &PackageEntry, summary: &mut FetchSummary) -> Result<()> {
        if entry.is_satisfied(&self.paths).await {
            debug!("Worker#{} skipping {}: already mirrored", self.id, entry.url);
            summary.skipped += 1;
            return Ok(());
        }

        let reason = entry.miss_reason(&self.paths).await;
        info!("Worker#{} downloading {} : {}", self.id, entry.url, reason);
        if self.dry_run {
            summary.planned += 1;
            return Ok(());
        }

        let dst = self.paths.skel_path(&entry.url);
        self.manager.download_with_retry(&entry.url, &dst).await?;
        summary.downloaded += 1;
        Ok(())
    }
}

/// Producer side of the pool. Closing it and joining the workers is the download barrier.
pub struct FetchQueue {
    sender: Option<mpsc::Sender<PackageEntry>>,
    workers: JoinSet<Result<FetchSummary>>,
    cancel: CancellationToken,
    progress: ProgressBar,
}

impl FetchQueue {
    /// Queues one entry, waiting while every worker is busy.
    ///
    /// If a worker has already failed, the pool is torn down and its error returned.
    pub async fn submit(&mut self, entry: PackageEntry) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Err(MirrorError::Aborted("download queue already closed".to_string()));
        };

        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = sender.send(entry) => res.is_ok(),
        };
        if sent {
            self.progress.inc_length(1);
            return Ok(());
        }

        match self.join().await {
            Err(e) => Err(e),
            Ok(_) => Err(MirrorError::Aborted("download workers exited early".to_string())),
        }
    }

    /// Closes the queue and waits for every worker.
    pub async fn finish(mut self) -> Result<FetchSummary> {
        self.join().await
    }

    async fn join(&mut self) -> Result<FetchSummary> {
        self.sender.take();

        let mut summary = FetchSummary::default();
        while let Some(joined) = self.workers.join_next().await {
            let outcome = joined
                .map_err(|e| MirrorError::Aborted(format!("download worker failed: {}", e)))
                .and_then(|result| result);
            match outcome {
                Ok(report) => summary.merge(report),
                Err(e) => {
                    // in-flight downloads are abandoned; their staging files are redone next run
                    self.cancel.cancel();
                    self.workers.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(summary)
    }
}
