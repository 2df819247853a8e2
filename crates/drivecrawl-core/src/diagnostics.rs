//! Diagnostic dumps for unclassified failures
//!
//! Each failure is written as JSON to `error_details.json`, or
//! `error_details (N).json` when earlier dumps exist. Files are never
//! overwritten.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

const STEM: &str = "error_details";
const MAX_SUFFIX: u32 = 10_000;

#[derive(Debug, Serialize)]
struct Report<'a> {
    timestamp: String,
    component: &'a str,
    error_type: &'a str,
    message: String,
    /// `source()` chain, outermost first
    chain: Vec<String>,
    arguments: Vec<(&'a str, &'a str)>,
}

/// Writes diagnostic dumps into one directory.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dump `error` and return the file it was written to.
    pub fn record(
        &self,
        component: &str,
        error_type: &str,
        error: &(dyn std::error::Error + 'static),
        arguments: &[(&str, &str)],
    ) -> io::Result<PathBuf> {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        let report = Report {
            timestamp: chrono::Local::now().to_rfc3339(),
            component,
            error_type,
            message: error.to_string(),
            chain,
            arguments: arguments.to_vec(),
        };

        let (path, mut file) = create_unique(&self.dir)?;
        serde_json::to_writer_pretty(&mut file, &report)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(path)
    }

    /// Like [`record`](Self::record), but logs the outcome instead of returning it.
    pub fn report(
        &self,
        component: &str,
        error_type: &str,
        error: &(dyn std::error::Error + 'static),
        arguments: &[(&str, &str)],
    ) {
        match self.record(component, error_type, error, arguments) {
            Ok(path) => log::error!(
                "Unhandled {error_type} in {component}: {error}. Details saved to {}",
                path.display()
            ),
            Err(e) => log::error!(
                "Unhandled {error_type} in {component}: {error} (could not save details: {e})"
            ),
        }
    }
}

fn file_name(suffix: u32) -> String {
    if suffix == 0 {
        format!("{STEM}.json")
    } else {
        format!("{STEM} ({suffix}).json")
    }
}

/// Create the first free `error_details*.json` in `dir`.
fn create_unique(dir: &Path) -> io::Result<(PathBuf, File)> {
    for suffix in 0..MAX_SUFFIX {
        let path = dir.join(file_name(suffix));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::other(format!(
        "no free diagnostic file name in {}",
        dir.display()
    )))
}
