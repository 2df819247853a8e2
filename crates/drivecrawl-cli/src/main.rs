//! drivecrawl - Crawl Google Drive folder trees into CSV, JSON, DuckDB or Sheets
//!
//! Walks one or more folders with a pool of workers and writes every
//! matching file, with its path and sharing summary, to a single output.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;
use drivecrawl_core::{LOG_LEVELS, shutdown_flag};

#[derive(Parser)]
#[command(name = "drivecrawl")]
#[command(about = "Explore Google Drive folders, the easy way")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging (same as --log-level debug)
    #[arg(long, global = true)]
    debug: bool,

    /// Log level (default: warn on a terminal, info otherwise)
    #[arg(long, global = true, value_parser = clap::builder::PossibleValuesParser::new(LOG_LEVELS))]
    log_level: Option<String>,

    /// Config file path (default: ./drivecrawl.toml or ~/.config/drivecrawl/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Recursively explore folders with parallel workers
    Explore(cmd::crawl::ExploreArgs),
    /// List the items directly inside folders
    List(cmd::crawl::CrawlArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(drivecrawl_core::ProgressContext::new());

    // Logging:
    //   TTY:     warn unless asked, the spinner shows activity
    //   non-TTY: info, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let level = match (cli.debug, cli.log_level.as_deref()) {
        (true, _) => "debug",
        (false, Some(level)) => level,
        (false, None) if is_tty => "warn",
        (false, None) => "info",
    };
    drivecrawl_core::init_logging(level, multi);
    setup_signal_handler();

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Explore(args) => cmd::crawl::explore(args, &config, &progress),
        Command::List(args) => cmd::crawl::list(args, &config, &progress),
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.crawl.workers, config.crawl.max_workers),
    ]);
    table.add_row(vec!["Folder separator", &config.crawl.separator]);
    table.add_row(vec![
        "Flush threshold",
        &config.crawl.flush_threshold.to_string(),
    ]);
    table.add_row(vec![
        "Channel capacity",
        &config.crawl.channel_capacity.to_string(),
    ]);
    table.add_row(vec!["Chunk size", &config.output.chunk_size.to_string()]);
    table.add_row(vec![
        "Spreadsheet cell limit",
        &drivecrawl_core::fmt_num(config.output.cell_limit),
    ]);
    table.add_row(vec![
        "Diagnostics dir",
        &config.output.diagnostics_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Retry",
        &format!(
            "{} attempts, {}ms doubling to {}ms",
            config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
        ),
    ]);
    table.add_row(vec![
        "Token file",
        &config.auth.token_file.display().to_string(),
    ]);

    let identities = match drivecrawl_gdrive::TokenStore::load(&config.auth.token_file) {
        Ok(store) => {
            let default = config
                .auth
                .identity
                .as_deref()
                .or(store.default_identity())
                .map(str::to_string);
            let names: Vec<String> = store
                .identities()
                .map(|name| {
                    if default.as_deref() == Some(name) {
                        format!("{name} (default)")
                    } else {
                        name.to_string()
                    }
                })
                .collect();
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join("\n")
            }
        }
        Err(e) => format!("unavailable: {e}"),
    };
    table.add_row(vec!["Identities", &identities]);

    eprintln!("\n{table}");
}

fn setup_signal_handler() {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            let registered = signal_hook::low_level::register(signal, || {
                if shutdown_flag().swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            });
            if let Err(e) = registered {
                log::warn!("Failed to register handler for signal {signal}: {e}");
            }
        }
    }
}
