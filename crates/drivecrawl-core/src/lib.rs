//! drivecrawl-core - concurrent crawl engine for remote folder trees
//!
//! Workers expand folders breadth-first through a retrying, paginating
//! provider adapter and hand matching records to a single writer thread,
//! which deduplicates them into a tabular, document, relational or
//! spreadsheet sink.

pub mod aggregator;
pub mod crawl;
pub mod diagnostics;
pub mod error;
pub mod filter;
pub mod logging;
pub mod progress;
pub mod provider;
pub mod queue;
pub mod record;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod worker;
pub mod writer;

// Re-exports for convenience
pub use crawl::{CrawlOptions, CrawlSummary, Crawler, default_workers};
pub use diagnostics::Diagnostics;
pub use error::{RemoteError, SinkError};
pub use filter::Filters;
pub use logging::{IndicatifLogger, LOG_LEVELS, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use provider::{
    ChildDescriptor, ChildPage, MAX_PAGE_SIZE, NodeInfo, PageRequest, RemoteTree,
    RemoteTreeFactory, TreeAdapter,
};
pub use record::{FOLDER_MIME_TYPE, FileRecord, FolderTask, Permission, PermissionType, Role};
pub use retry::RetryPolicy;
pub use shutdown::{CancelToken, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use sink::{
    OutputFormat, OutputTarget, SUPPORTED_EXTENSIONS, SinkSettings, SpreadsheetConnector,
    SpreadsheetInfo, SpreadsheetService,
};
pub use worker::WorkerConfig;
pub use writer::WriterConfig;
