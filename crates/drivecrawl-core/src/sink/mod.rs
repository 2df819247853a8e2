//! Output sinks: one closed set of variants behind a common
//! `initialize` / `write_batch` / `finalize` contract.

mod document;
mod relational;
mod spreadsheet;
mod tabular;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde_json::Value;

pub use document::DocumentSink;
pub use relational::{Dialect, RelationalSink};
pub use spreadsheet::{
    DEFAULT_CELL_LIMIT, SpreadsheetConnector, SpreadsheetInfo, SpreadsheetService, SpreadsheetSink,
};
pub use tabular::TabularSink;

use crate::error::{RemoteError, SinkError};
use crate::record::{FileRecord, SUMMARY_COLUMNS};
use crate::retry::RetryPolicy;

/// Output extensions accepted by [`OutputFormat::from_path`]
pub const SUPPORTED_EXTENSIONS: [&str; 9] = [
    ".csv", ".tsv", ".json", ".duckdb", ".db", ".sqlite", ".sqlite3", ".gs", ".gsheet",
];

/// Fields never rendered as a column of their own
const IGNORED_FIELDS: [&str; 1] = ["permissions"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Tsv,
    Json,
    DuckDb,
    Sqlite,
    Spreadsheet,
}

impl OutputFormat {
    /// Pick the format from the path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, SinkError> {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        match ext.as_str() {
            ".csv" => Ok(Self::Csv),
            ".tsv" => Ok(Self::Tsv),
            ".json" => Ok(Self::Json),
            ".duckdb" | ".db" => Ok(Self::DuckDb),
            ".sqlite" | ".sqlite3" => Ok(Self::Sqlite),
            ".gs" | ".gsheet" => Ok(Self::Spreadsheet),
            _ => Err(SinkError::UnsupportedFormat(ext)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
            Self::DuckDb => "duckdb",
            Self::Sqlite => "sqlite",
            Self::Spreadsheet => "spreadsheet",
        }
    }
}

/// Where and how results are written; validated before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub format: OutputFormat,
}

impl OutputTarget {
    pub fn parse(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let format = OutputFormat::from_path(&path)?;
        Ok(Self { path, format })
    }
}

/// Knobs shared by all sinks
#[derive(Clone)]
pub struct SinkSettings {
    /// Per-spreadsheet cell cap
    pub cell_limit: usize,
    pub retry: RetryPolicy,
    /// Required for spreadsheet output only
    pub spreadsheets: Option<Arc<dyn SpreadsheetConnector>>,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            cell_limit: DEFAULT_CELL_LIMIT,
            retry: RetryPolicy::default(),
            spreadsheets: None,
        }
    }
}

impl std::fmt::Debug for SinkSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSettings")
            .field("cell_limit", &self.cell_limit)
            .field("retry", &self.retry)
            .field("spreadsheets", &self.spreadsheets.is_some())
            .finish()
    }
}

/// One output sink per session
pub enum Sink {
    Tabular(TabularSink),
    Document(DocumentSink),
    Relational(RelationalSink),
    Spreadsheet(SpreadsheetSink),
}

impl Sink {
    /// Build the sink for `target`. Column layouts come from `first`.
    pub fn open(
        target: &OutputTarget,
        first: &FileRecord,
        settings: &SinkSettings,
    ) -> Result<Self, SinkError> {
        let sink = match target.format {
            OutputFormat::Csv => {
                Self::Tabular(TabularSink::create(&target.path, b',', columns_for(first))?)
            }
            OutputFormat::Tsv => {
                Self::Tabular(TabularSink::create(&target.path, b'\t', columns_for(first))?)
            }
            OutputFormat::Json => Self::Document(DocumentSink::create(&target.path)?),
            OutputFormat::DuckDb => {
                Self::Relational(RelationalSink::open(&target.path, Dialect::DuckDb)?)
            }
            OutputFormat::Sqlite => {
                Self::Relational(RelationalSink::open(&target.path, Dialect::Sqlite)?)
            }
            OutputFormat::Spreadsheet => {
                let connector = settings.spreadsheets.as_ref().ok_or_else(|| {
                    SinkError::Remote(RemoteError::Auth(
                        "spreadsheet output needs a spreadsheet service".to_string(),
                    ))
                })?;
                Self::Spreadsheet(SpreadsheetSink::new(
                    connector.connect()?,
                    spreadsheet_title(&target.path),
                    columns_for(first),
                    settings.cell_limit,
                    settings.retry,
                ))
            }
        };
        log::debug!("Opened {} sink at {}", sink.kind(), target.path.display());
        Ok(sink)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tabular(_) => "tabular",
            Self::Document(_) => "document",
            Self::Relational(_) => "relational",
            Self::Spreadsheet(_) => "spreadsheet",
        }
    }

    pub fn initialize(&mut self) -> Result<(), SinkError> {
        match self {
            Self::Tabular(s) => s.initialize(),
            Self::Document(s) => s.initialize(),
            Self::Relational(s) => s.initialize(),
            Self::Spreadsheet(s) => s.initialize(),
        }
    }

    /// Write `records`, skipping ids already written. Returns rows written.
    pub fn write_batch(&mut self, records: &[FileRecord]) -> Result<usize, SinkError> {
        match self {
            Self::Tabular(s) => s.write_batch(records),
            Self::Document(s) => s.write_batch(records),
            Self::Relational(s) => s.write_batch(records),
            Self::Spreadsheet(s) => s.write_batch(records),
        }
    }

    /// Close the sink. Returns the number of unique rows written.
    pub fn finalize(self) -> Result<usize, SinkError> {
        match self {
            Self::Tabular(s) => s.finalize(),
            Self::Document(s) => s.finalize(),
            Self::Relational(s) => s.finalize(),
            Self::Spreadsheet(s) => s.finalize(),
        }
    }
}

/// Ids already written by a sink; first copy wins.
#[derive(Debug, Default)]
pub(crate) struct SeenIds(FxHashSet<String>);

impl SeenIds {
    /// Records from `batch` whose id was never seen before, in order
    pub(crate) fn fresh<'a>(&mut self, batch: &'a [FileRecord]) -> Vec<&'a FileRecord> {
        batch
            .iter()
            .filter(|r| self.0.insert(r.id.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Column layout: `id`, `name`, then the record's other fields plus the
/// permission summary columns, sorted, without `permissions`.
pub fn columns_for(first: &FileRecord) -> Vec<String> {
    let mut rest: Vec<String> = first
        .field_names()
        .into_iter()
        .chain(SUMMARY_COLUMNS.iter().map(|c| c.to_string()))
        .filter(|c| c != "id" && c != "name" && !IGNORED_FIELDS.contains(&c.as_str()))
        .collect();
    rest.sort();
    rest.dedup();

    let mut columns = Vec::with_capacity(rest.len() + 2);
    columns.push("id".to_string());
    columns.push("name".to_string());
    columns.extend(rest);
    columns
}

/// Cell values of `record` in `columns` order; lists are joined with ", ".
pub(crate) fn flat_row(record: &FileRecord, columns: &[String]) -> Vec<Value> {
    let row = record.to_row();
    let summary = record.permission_summary();
    columns
        .iter()
        .map(|column| {
            if let Some(text) = summary.get(column) {
                return Value::String(text.to_string());
            }
            match row.get(column) {
                Some(Value::Array(items)) => Value::String(
                    items
                        .iter()
                        .map(crate::record::cell_text)
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Some(value) => value.clone(),
                None => Value::Null,
            }
        })
        .collect()
}

/// Spreadsheet title: the output file name without its `.gs`/`.gsheet` extension.
fn spreadsheet_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drivecrawl".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::record;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out.CSV")).unwrap(),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a/b.tsv")).unwrap(),
            OutputFormat::Tsv
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("inventory.db")).unwrap(),
            OutputFormat::DuckDb
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("legacy.SQLite3")).unwrap(),
            OutputFormat::Sqlite
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("inventory.sqlite")).unwrap(),
            OutputFormat::Sqlite
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("Team files.gsheet")).unwrap(),
            OutputFormat::Spreadsheet
        );
    }

    #[test]
    fn unknown_extension_rejected() {
        let err = OutputTarget::parse("out.xlsx").unwrap_err();
        assert!(matches!(err, SinkError::UnsupportedFormat(ref e) if e == ".xlsx"));
        assert!(matches!(
            OutputTarget::parse("no_extension"),
            Err(SinkError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn columns_start_with_id_and_name() {
        let columns = columns_for(&record("1", "a"));
        assert_eq!(&columns[..2], ["id", "name"]);
        assert!(!columns.iter().any(|c| c == "permissions"));
        for summary in SUMMARY_COLUMNS {
            assert!(columns.iter().any(|c| c == summary));
        }
        let mut rest = columns[2..].to_vec();
        rest.sort();
        assert_eq!(rest, columns[2..]);
    }

    #[test]
    fn flat_row_joins_parents_and_summarizes_permissions() {
        let mut rec = record("1", "Shared\\a.csv");
        rec.parents = vec!["p1".to_string(), "p2".to_string()];
        let columns = columns_for(&rec);
        let row = flat_row(&rec, &columns);
        let cell = |name: &str| &row[columns.iter().position(|c| c == name).unwrap()];
        assert_eq!(cell("parents"), &Value::String("p1, p2".to_string()));
        assert_eq!(cell("owners"), &Value::String("owner@x.com".to_string()));
        assert_eq!(cell("name"), &Value::String("Shared\\a.csv".to_string()));
        assert_eq!(cell("sharedContainerId"), &Value::Null);
    }

    #[test]
    fn seen_ids_keep_first_copy() {
        let mut seen = SeenIds::default();
        let mut dup = record("1", "second");
        dup.size = Some(7);
        let batch = vec![record("1", "first"), dup, record("2", "b")];
        let fresh = seen.fresh(&batch);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].name, "first");
        assert!(seen.fresh(&batch).is_empty());
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn title_strips_extension() {
        assert_eq!(spreadsheet_title(Path::new("dir/Audit.gsheet")), "Audit");
        assert_eq!(spreadsheet_title(Path::new("Audit.gs")), "Audit");
    }
}
