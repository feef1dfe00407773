use crate::core::config::MirrorConfig;
use crate::core::fetcher::{FetchSummary, PackageFetcher};
use crate::core::reconcile::{reconcile, LiveSet, ReconcileStats};
use crate::core::staging::{promote, PromoteStats};
use crate::registry::client::DownloadManager;
use crate::registry::metadata::MetadataFetcher;
use crate::utils::bandwidth::RateBucket;
use crate::utils::progress::ProgressTracker;
use crate::{MirrorError, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub package_files: usize,
    pub fetch: FetchSummary,
    pub cleaned: ReconcileStats,
    pub promoted: PromoteStats,
    pub pending_metadata: usize,
}

/// One full mirror run: resolve, download, sweep, promote.
pub async fn execute(config: &MirrorConfig, options: SyncOptions) -> Result<SyncReport> {
    let start = Instant::now();
    let paths = Arc::new(config.paths());
    let workers = config.worker_count();

    let bucket = config
        .download_rate()
        .and_then(RateBucket::new)
        .map(Arc::new);
    let manager = Arc::new(DownloadManager::new(bucket.clone(), config.max_downloads())?);

    info!("Path holding temp files(skel_path): {}", paths.skel_root().display());
    info!("Path holding mirrored files(mirror_path): {}", paths.mirror_root().display());
    info!("Default architecture: {}", config.variable("defaultarch"));
    if let Some(bucket) = &bucket {
        info!("Limiting downloads to {} bytes/s", bucket.rate());
    }
    info!("Spawning {} workers to download packages.", workers);

    let progress = ProgressTracker::new(options.show_progress);
    let resolving = progress.add_spinner("Resolving package lists");
    let counter = progress.add_counter("package files");
    let mut queue = PackageFetcher::new(manager.clone(), paths.clone(), workers)
        .dry_run(options.dry_run)
        .with_progress(counter)
        .start();
    let mut metadata = MetadataFetcher::new(manager, paths.clone(), config.translations());

    let mut live = LiveSet::new();
    for repo in &config.repositories {
        info!(
            "Resolving {} {} [{}] {}",
            repo.url,
            repo.version,
            repo.architecture,
            repo.components.join(" ")
        );
        resolving.set_message(format!("Resolving {} [{}]", repo.url, repo.architecture));
        metadata.spawn_info_files(repo)?;

        for component in &repo.components {
            let entries = metadata.fetch_package_list(repo, component).await?;
            info!("{} {}: {} package files", repo.url, component, entries.len());
            for entry in entries {
                live.insert(&entry.url);
                queue.submit(entry).await?;
            }
        }
    }
    resolving.finish_and_clear();
    info!("Got {} package files ... ", live.len());

    let fetch = queue.finish().await?;
    progress.finish_all();
    info!(
        "Downloads finished: {} downloaded, {} already mirrored",
        fetch.downloaded, fetch.skipped
    );

    let mut cleaned = ReconcileStats::default();
    for target in &config.clean {
        let url = target.clone();
        let sweep_paths = paths.clone();
        let sweep_live = live.clone();
        let dry_run = options.dry_run;
        let stats = tokio::task::spawn_blocking(move || reconcile(&sweep_paths, &url, &sweep_live, dry_run))
            .await
            .map_err(|e| MirrorError::Aborted(format!("cleanup task failed: {}", e)))??;
        cleaned.merge(stats);
    }

    let promoted = if options.dry_run {
        PromoteStats::default()
    } else {
        let skel = paths.skel_root().to_path_buf();
        let mirror = paths.mirror_root().to_path_buf();
        tokio::task::spawn_blocking(move || promote(&skel, &mirror))
            .await
            .map_err(|e| MirrorError::Aborted(format!("promotion task failed: {}", e)))??
    };

    let pending = metadata.pending();
    if !pending.is_empty() {
        warn!(
            "{} background metadata fetches still running: {}",
            pending.len(),
            pending.join(", ")
        );
    }

    let report = SyncReport {
        package_files: live.len(),
        fetch,
        cleaned,
        promoted,
        pending_metadata: pending.len(),
    };

    println!(
        "{} {} package files ({} downloaded, {} cached), {} stale files removed in {:.2}s",
        "✓".green(),
        report.package_files,
        report.fetch.downloaded,
        report.fetch.skipped,
        report.cleaned.files_removed,
        start.elapsed().as_secs_f64()
    );
    if options.dry_run {
        println!(
            "{} Dry run: {} downloads planned, nothing promoted",
            "!".yellow(),
            report.fetch.planned
        );
    }

    Ok(report)
}
