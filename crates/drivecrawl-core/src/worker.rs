//! Crawl workers: expand folder tasks, filter children, hand records to the writer

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::aggregator::{QueueClosed, RecordSender};
use crate::error::RemoteError;
use crate::filter::Filters;
use crate::provider::{MAX_PAGE_SIZE, RemoteTreeFactory, TreeAdapter};
use crate::queue::{QueueItem, TaskQueue};
use crate::record::{FileRecord, FolderTask, display_path};
use crate::retry::RetryPolicy;
use crate::shutdown::CancelToken;

/// Buffered records per worker before they are handed to the writer
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// How often an idle worker re-checks cancellation
const TICK: Duration = Duration::from_millis(100);

/// Behaviour shared by every worker of a session
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub filters: Filters,
    pub include_trashed: bool,
    /// Enqueue discovered subfolders
    pub recursive: bool,
    pub separator: String,
    pub flush_threshold: usize,
    pub retry: RetryPolicy,
    pub page_size: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            filters: Filters::match_all(),
            include_trashed: false,
            recursive: true,
            separator: "\\".to_string(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            retry: RetryPolicy::default(),
            page_size: MAX_PAGE_SIZE,
        }
    }
}

/// Session-wide counters, read by the progress line and the final summary
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub folders: AtomicUsize,
    pub records: AtomicUsize,
}

impl CrawlStats {
    pub fn folders(&self) -> usize {
        self.folders.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> usize {
        self.records.load(Ordering::Relaxed)
    }
}

/// Why a worker stopped early
#[derive(Debug)]
pub enum WorkerError {
    Remote(RemoteError),
    /// The writer stopped accepting records
    ResultsClosed,
    Panicked,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "remote: {e}"),
            Self::ResultsClosed => write!(f, "output writer is no longer accepting records"),
            Self::Panicked => write!(f, "worker thread panicked"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for WorkerError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

impl From<QueueClosed> for WorkerError {
    fn from(_: QueueClosed) -> Self {
        Self::ResultsClosed
    }
}

/// What one worker did before exiting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub folders: usize,
    pub records: usize,
}

/// Exit notice a worker sends on its way out
#[derive(Debug)]
pub struct WorkerExit {
    pub worker: usize,
    pub result: Result<WorkerReport, WorkerError>,
}

/// One crawl worker, owning its own provider adapter
pub struct Worker {
    id: usize,
    adapter: TreeAdapter,
    queue: TaskQueue<FolderTask>,
    results: RecordSender,
    config: Arc<WorkerConfig>,
    stats: Arc<CrawlStats>,
    cancel: CancelToken,
    buffer: Vec<FileRecord>,
    report: WorkerReport,
}

impl Worker {
    pub fn new(
        id: usize,
        adapter: TreeAdapter,
        queue: TaskQueue<FolderTask>,
        results: RecordSender,
        config: Arc<WorkerConfig>,
        stats: Arc<CrawlStats>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id,
            adapter,
            queue,
            results,
            buffer: Vec::with_capacity(config.flush_threshold),
            config,
            stats,
            cancel,
            report: WorkerReport::default(),
        }
    }

    /// Process tasks until a stop sentinel, cancellation or a fatal error.
    ///
    /// Every dequeued item is marked done, whatever the outcome.
    pub fn run(mut self) -> Result<WorkerReport, WorkerError> {
        let queue = self.queue.clone();
        let outcome = self.work(&queue);
        if outcome.is_err() {
            // records found before the failure still reach the writer
            let _ = self.flush();
        }
        outcome.map(|()| self.report)
    }

    fn work(&mut self, queue: &TaskQueue<FolderTask>) -> Result<(), WorkerError> {
        loop {
            let Some(item) = queue.get_timeout(TICK) else {
                if self.cancel.is_cancelled() {
                    break;
                }
                continue;
            };
            let _done = queue.done_guard();
            match item {
                QueueItem::Stop => {
                    self.flush()?;
                    log::debug!("worker {}: stopping", self.id);
                    return Ok(());
                }
                QueueItem::Task(task) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.expand(&task) {
                        if self.cancel.is_cancelled() {
                            log::debug!("worker {}: {} abandoned: {e}", self.id, task.path);
                            break;
                        }
                        return Err(e);
                    }
                    if self.buffer.len() > self.config.flush_threshold {
                        self.flush()?;
                    }
                }
            }
        }
        log::debug!("worker {}: cancelled", self.id);
        // partial output is acceptable after cancellation
        let _ = self.flush();
        Ok(())
    }

    fn expand(&mut self, task: &FolderTask) -> Result<(), WorkerError> {
        let children = self
            .adapter
            .list_children(&task.id, self.config.include_trashed)?;
        self.report.folders += 1;
        self.stats.folders.fetch_add(1, Ordering::Relaxed);

        let sep = self.config.separator.as_str();
        let mut matched = 0;
        for child in &children {
            if self.config.filters.matches(&child.name, &child.mime_type) {
                self.buffer.push(FileRecord::from_child(child, &task.path, sep));
                matched += 1;
            }
            if self.config.recursive && child.is_folder() {
                self.queue.put(FolderTask::new(
                    child.id.clone(),
                    display_path(&task.path, sep, &child.name),
                ));
            }
        }
        self.report.records += matched;
        self.stats.records.fetch_add(matched, Ordering::Relaxed);
        log::trace!(
            "worker {}: {} -> {} children, {matched} matched",
            self.id,
            task.path,
            children.len()
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<(), QueueClosed> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.flush_threshold),
        );
        self.results.send(batch)
    }
}

/// Sends the exit notice exactly once, including when the worker panics.
struct ExitNotice {
    worker: usize,
    tx: Option<Sender<WorkerExit>>,
}

impl ExitNotice {
    fn finish(mut self, result: Result<WorkerReport, WorkerError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerExit {
                worker: self.worker,
                result,
            });
        }
    }
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerExit {
                worker: self.worker,
                result: Err(WorkerError::Panicked),
            });
        }
    }
}

/// Everything a pool needs to start its workers
pub struct PoolParams {
    pub factory: Arc<dyn RemoteTreeFactory>,
    pub queue: TaskQueue<FolderTask>,
    pub results: RecordSender,
    pub config: Arc<WorkerConfig>,
    pub stats: Arc<CrawlStats>,
    pub cancel: CancelToken,
}

/// Supervised worker threads.
///
/// Workers report their exit over a completion channel so liveness is
/// known without inspecting thread state.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    exit_rx: Receiver<WorkerExit>,
    exits: Vec<WorkerExit>,
}

impl WorkerPool {
    /// Start `count` workers. The pool keeps no record sender of its own.
    pub fn spawn(count: usize, params: PoolParams) -> std::io::Result<Self> {
        let (exit_tx, exit_rx) = unbounded();
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let notice = ExitNotice {
                worker: id,
                tx: Some(exit_tx.clone()),
            };
            let factory = Arc::clone(&params.factory);
            let queue = params.queue.clone();
            let results = params.results.clone();
            let config = Arc::clone(&params.config);
            let stats = Arc::clone(&params.stats);
            let cancel = params.cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("crawl-{id}"))
                .spawn(move || {
                    let result = factory
                        .open()
                        .map_err(WorkerError::from)
                        .and_then(|remote| {
                            let adapter = TreeAdapter::new(remote, config.retry)
                                .with_page_size(config.page_size)
                                .with_cancel(cancel.clone());
                            Worker::new(id, adapter, queue, results, config, stats, cancel).run()
                        });
                    notice.finish(result);
                })?;
            handles.push(handle);
        }
        log::debug!("Started {count} crawl workers");
        Ok(Self {
            handles,
            exit_rx,
            exits: Vec::new(),
        })
    }

    fn collect_exits(&mut self) {
        while let Ok(exit) = self.exit_rx.try_recv() {
            if let Err(e) = &exit.result {
                log::error!("worker {} stopped: {e}", exit.worker);
            }
            self.exits.push(exit);
        }
    }

    /// Workers that have not reported an exit yet
    pub fn alive(&mut self) -> usize {
        self.collect_exits();
        self.handles.len() - self.exits.len()
    }

    /// Wait for every thread and return all exit notices.
    pub fn join(mut self) -> Vec<WorkerExit> {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.collect_exits();
        self.exits
    }
}
