//! Explore and list subcommands - crawl Drive folders into an output file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use drivecrawl_core::{
    CrawlOptions, CrawlSummary, Crawler, Diagnostics, Filters, OutputFormat, OutputTarget,
    RemoteError, SharedProgress, SinkError, SinkSettings, WorkerConfig, WriterConfig, fmt_num,
};
use drivecrawl_gdrive::{DriveConnector, SheetsConnector};

use crate::config::Config;

#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    /// Folder id(s) to crawl; "root" is My Drive
    #[arg(long = "folder-id", num_args = 1.., default_value = "root")]
    pub folder_id: Vec<String>,

    /// Output file (.csv, .tsv, .json, .duckdb, .db, .sqlite, .sqlite3, .gs, .gsheet)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Include trashed items
    #[arg(long)]
    pub include_trashed: bool,

    /// Regex on file names; folders are always traversed
    #[arg(long, default_value = ".*")]
    pub file_match: String,

    /// Make --file-match case sensitive
    #[arg(long)]
    pub case_sensitive: bool,

    /// Regex on MIME types
    #[arg(long, default_value = ".*")]
    pub type_match: String,

    /// Separator between folder names in paths (default from config: "\")
    #[arg(long)]
    pub folder_separator: Option<String>,

    /// Identity from the token file to crawl as
    #[arg(short, long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExploreArgs {
    #[command(flatten)]
    pub crawl: CrawlArgs,

    /// Number of parallel workers (default: 2 x CPUs)
    #[arg(short, long)]
    pub workers: Option<usize>,
}

/// Everything validated before the first remote call
struct Plan {
    roots: Vec<String>,
    options: CrawlOptions,
    connector: DriveConnector,
}

impl Plan {
    fn new(args: &CrawlArgs, workers: Option<usize>, recursive: bool, config: &Config) -> Result<Self> {
        let target = OutputTarget::parse(&args.output)
            .with_context(|| format!("Invalid output {}", args.output.display()))?;
        let filters = Filters::new(&args.file_match, &args.type_match, args.case_sensitive)
            .context("Invalid --file-match or --type-match pattern")?;

        let identity = args
            .user
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| config.auth.identity.clone());
        let token_file = config.auth.token_file.clone();
        let retry = config.retry.policy();

        let spreadsheets = (target.format == OutputFormat::Spreadsheet).then(|| {
            Arc::new(SheetsConnector::new(&token_file, identity.clone()))
                as Arc<dyn drivecrawl_core::SpreadsheetConnector>
        });
        let mut writer = WriterConfig::new(target);
        writer.chunk_size = config.output.chunk_size;
        writer.sink = SinkSettings {
            cell_limit: config.output.cell_limit,
            retry,
            spreadsheets,
        };

        let mut options = CrawlOptions::new(writer);
        options.workers = workers
            .unwrap_or(config.crawl.workers)
            .clamp(1, config.crawl.max_workers.max(1));
        options.worker = WorkerConfig {
            filters,
            include_trashed: args.include_trashed,
            recursive,
            separator: args
                .folder_separator
                .clone()
                .unwrap_or_else(|| config.crawl.separator.clone()),
            flush_threshold: config.crawl.flush_threshold,
            retry,
            ..WorkerConfig::default()
        };
        options.channel_capacity = config.crawl.channel_capacity.max(1);
        options.diagnostics = Some(Diagnostics::new(&config.output.diagnostics_dir));
        if !recursive {
            options = options.list();
        }

        let mut roots = args.folder_id.clone();
        if roots.is_empty() {
            roots.push("root".to_string());
        }

        Ok(Self {
            roots,
            options,
            connector: DriveConnector::new(token_file, identity),
        })
    }
}

pub fn explore(args: ExploreArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    run(&args.crawl, args.workers, true, config, progress)
}

pub fn list(args: CrawlArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    run(&args, Some(1), false, config, progress)
}

fn run(
    args: &CrawlArgs,
    workers: Option<usize>,
    recursive: bool,
    config: &Config,
    progress: &SharedProgress,
) -> Result<()> {
    let plan = Plan::new(args, workers, recursive, config)?;
    let diagnostics = plan.options.diagnostics.clone().unwrap_or_default();

    match crawl(plan, progress) {
        Err(e) if !is_classified(&e) => {
            let output = args.output.display().to_string();
            let roots = args.folder_id.join(" ");
            diagnostics.report(
                "drivecrawl",
                "UnexpectedError",
                e.as_ref(),
                &[("output", output.as_str()), ("folder_id", roots.as_str())],
            );
            Err(e)
        }
        other => other,
    }
}

fn crawl(plan: Plan, progress: &SharedProgress) -> Result<()> {
    let (identity, _) = plan
        .connector
        .resolve()
        .context("Failed to load credentials")?;
    log::info!("Using credentials: {identity}");

    let output = plan.options.writer.target.path.clone();
    let crawler = Crawler::new(Arc::new(plan.connector)).with_progress(progress.stage_line("crawl"));
    let summary = crawler.run(&plan.roots, plan.options)?;

    print_summary(&output, &summary);
    if summary.cancelled {
        log::warn!("Crawl interrupted, {} may be incomplete", output.display());
    }
    Ok(())
}

/// Remote and sink failures are already explained by their message.
fn is_classified(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|cause| cause.is::<RemoteError>() || cause.is::<SinkError>())
}

fn print_summary(output: &std::path::Path, summary: &CrawlSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Crawl").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    let roots = if summary.roots_skipped > 0 {
        format!("{} ({} not found)", summary.roots, summary.roots_skipped)
    } else {
        summary.roots.to_string()
    };
    let rows: [(&str, String); 7] = [
        ("Roots", roots),
        ("Folders expanded", fmt_num(summary.folders)),
        ("Records found", fmt_num(summary.records_found)),
        ("Unique rows written", fmt_num(summary.rows_written)),
        (
            "Output",
            match summary.sink {
                Some(kind) => format!("{} ({kind})", output.display()),
                None => "none (nothing matched)".to_string(),
            },
        ),
        ("Failed workers", summary.failed_workers.to_string()),
        ("Elapsed", format!("{:.1?}", summary.elapsed)),
    ];
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}
