//! Crawl orchestration: seed roots, run workers and writer, shut down in order

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use indicatif::ProgressBar;

use crate::aggregator::{self, DEFAULT_CHANNEL_CAPACITY};
use crate::diagnostics::Diagnostics;
use crate::progress::fmt_num;
use crate::provider::{RemoteTreeFactory, TreeAdapter};
use crate::queue::TaskQueue;
use crate::record::FolderTask;
use crate::shutdown::CancelToken;
use crate::worker::{CrawlStats, PoolParams, WorkerConfig, WorkerPool};
use crate::writer::{OutputWriter, WriterConfig};

/// How often the orchestrator re-checks worker liveness while joining
const JOIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub workers: usize,
    pub worker: WorkerConfig,
    pub writer: WriterConfig,
    /// Record batches that may wait for the writer
    pub channel_capacity: usize,
    /// Where worker failures are dumped; `None` only logs them
    pub diagnostics: Option<Diagnostics>,
}

impl CrawlOptions {
    pub fn new(writer: WriterConfig) -> Self {
        Self {
            workers: default_workers(),
            worker: WorkerConfig::default(),
            writer,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            diagnostics: None,
        }
    }

    /// List mode: one worker, no descent into subfolders
    pub fn list(mut self) -> Self {
        self.workers = 1;
        self.worker.recursive = false;
        self
    }
}

/// Two workers per CPU; the work is network bound
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get() * 2)
}

/// Outcome of one crawl session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub roots: usize,
    pub roots_skipped: usize,
    pub folders: usize,
    /// Matched records before deduplication
    pub records_found: usize,
    /// Unique rows in the sink
    pub rows_written: usize,
    pub failed_workers: usize,
    pub sink: Option<&'static str>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Runs crawl sessions against one remote tree provider.
pub struct Crawler {
    factory: Arc<dyn RemoteTreeFactory>,
    cancel: CancelToken,
    progress: ProgressBar,
}

impl Crawler {
    pub fn new(factory: Arc<dyn RemoteTreeFactory>) -> Self {
        Self {
            factory,
            cancel: CancelToken::new(),
            progress: ProgressBar::hidden(),
        }
    }

    /// Show folder and record counts on `bar` while crawling
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask workers and the writer to stop; `run` then returns promptly.
    pub fn clean_up(&self) {
        log::debug!("Crawl cancellation requested");
        self.cancel.cancel();
    }

    /// Crawl `roots` and write every matching item to the configured output.
    ///
    /// Blocks until the output is finalized or the session is cancelled.
    /// Unknown roots are logged and skipped.
    pub fn run(&self, roots: &[String], options: CrawlOptions) -> Result<CrawlSummary> {
        let start = Instant::now();
        let workers = if options.worker.recursive {
            options.workers.max(1)
        } else {
            1
        };
        let mut summary = CrawlSummary {
            roots: roots.len(),
            ..CrawlSummary::default()
        };

        let queue: TaskQueue<FolderTask> = TaskQueue::new();
        summary.roots_skipped = self.seed(roots, &queue, &options.worker)?;

        let (results, receiver) = aggregator::channel(options.channel_capacity, self.cancel.clone());
        let writer = OutputWriter::new(receiver, options.writer.clone())
            .spawn()
            .context("Failed to start output writer")?;

        let stats = Arc::new(CrawlStats::default());
        let mut pool = WorkerPool::spawn(
            workers,
            PoolParams {
                factory: Arc::clone(&self.factory),
                queue: queue.clone(),
                results,
                config: Arc::new(options.worker.clone()),
                stats: Arc::clone(&stats),
                cancel: self.cancel.clone(),
            },
        )
        .context("Failed to start crawl workers")?;
        log::info!("Crawling {} root(s) with {workers} worker(s)", queue.outstanding());

        // wait for the tree to be exhausted
        let drained = queue.join_while(JOIN_TICK, || {
            self.progress.set_message(format!(
                "{} folders, {} records",
                fmt_num(stats.folders()),
                fmt_num(stats.records())
            ));
            if writer.is_finished() && !self.cancel.is_cancelled() {
                log::error!("Output writer stopped early, cancelling crawl");
                self.cancel.cancel();
            }
            !self.cancel.is_cancelled() && pool.alive() > 0
        });

        if !self.cancel.is_cancelled() {
            if !drained {
                let left = queue.drain_abandoned();
                log::warn!("All workers stopped, {left} folder(s) left unexplored");
            }
            // one sentinel per worker still alive
            let alive = pool.alive();
            for _ in 0..alive {
                queue.put_sentinel();
            }
            queue.join_while(JOIN_TICK, || pool.alive() > 0);
            queue.drain_abandoned();
        }

        let exits = pool.join();
        for exit in &exits {
            match &exit.result {
                Ok(report) => log::debug!(
                    "worker {}: {} folders, {} records",
                    exit.worker,
                    report.folders,
                    report.records
                ),
                Err(e) => {
                    summary.failed_workers += 1;
                    if let Some(diagnostics) = &options.diagnostics {
                        let worker = exit.worker.to_string();
                        diagnostics.report(
                            "crawl worker",
                            "WorkerError",
                            e,
                            &[("worker", worker.as_str())],
                        );
                    }
                }
            }
        }

        let written = writer
            .join()
            .map_err(|_| anyhow!("Output writer panicked"))?
            .with_context(|| {
                format!(
                    "Failed writing {}",
                    options.writer.target.path.display()
                )
            })?;
        self.progress.finish_and_clear();

        summary.folders = stats.folders();
        summary.records_found = stats.records();
        summary.rows_written = written.rows;
        summary.sink = written.sink;
        summary.cancelled = self.cancel.is_cancelled();
        summary.elapsed = start.elapsed();

        log::info!(
            "Explored {} folders, found {} records, wrote {} unique rows",
            fmt_num(summary.folders),
            fmt_num(summary.records_found),
            fmt_num(summary.rows_written)
        );
        if summary.failed_workers > 0 {
            log::warn!("{} worker(s) stopped on errors", summary.failed_workers);
        }
        log::info!("Elapsed time: {:.1?}", summary.elapsed);
        Ok(summary)
    }

    /// Queue one task per root that exists. Returns how many were skipped.
    fn seed(
        &self,
        roots: &[String],
        queue: &TaskQueue<FolderTask>,
        config: &WorkerConfig,
    ) -> Result<usize> {
        let remote = self
            .factory
            .open()
            .context("Failed to connect to the remote tree")?;
        let mut adapter = TreeAdapter::new(remote, config.retry).with_cancel(self.cancel.clone());
        let mut skipped = 0;
        for root in roots {
            match adapter.get_node(root) {
                Ok(node) => {
                    log::debug!("Root {} is {:?}", node.id, node.name);
                    queue.put(FolderTask::new(node.id, node.name));
                }
                Err(e) if e.is_not_found() => {
                    log::error!("Folder not found: {root}");
                    skipped += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to look up folder {root}"));
                }
            }
        }
        Ok(skipped)
    }
}
