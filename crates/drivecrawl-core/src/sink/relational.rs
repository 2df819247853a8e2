//! Normalized database output: files, permissions and two association
//! tables, written to DuckDB or SQLite from the same table descriptions.
//!
//! Table names carry a per-session timestamp prefix so repeated runs into
//! the same database never collide.

use std::path::Path;

use chrono::{DateTime, Local};
use rustc_hash::FxHashMap;

use super::SeenIds;
use crate::error::SinkError;
use crate::record::{FileRecord, Permission};

/// Rows per INSERT statement
const ROWS_PER_STATEMENT: usize = 100;

/// One column of a table description
struct Column {
    name: &'static str,
    sql_type: &'static str,
}

const fn col(name: &'static str, sql_type: &'static str) -> Column {
    Column { name, sql_type }
}

/// Database engine behind a [`RelationalSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    DuckDb,
    Sqlite,
}

/// Static table description: statements are generated from it
struct Table {
    suffix: &'static str,
    columns: &'static [Column],
    constraints: &'static str,
}

const FILES: Table = Table {
    suffix: "files",
    columns: &[
        col("id", "VARCHAR PRIMARY KEY"),
        col("mimeType", "VARCHAR"),
        col("name", "VARCHAR"),
        col("size", "BIGINT DEFAULT 0"),
        col("trashed", "BOOLEAN DEFAULT false"),
        col("sharedContainerId", "VARCHAR"),
        col("createdTime", "TIMESTAMP"),
        col("modifiedTime", "TIMESTAMP"),
        col("url", "VARCHAR"),
    ],
    constraints: "",
};

const PERMISSIONS: Table = Table {
    suffix: "permissions",
    columns: &[
        col("id", "BIGINT PRIMARY KEY"),
        col("type", "VARCHAR NOT NULL"),
        col("email", "VARCHAR DEFAULT ''"),
        col("domain", "VARCHAR DEFAULT ''"),
        col("role", "VARCHAR NOT NULL"),
        col("allow_discovery", "BOOLEAN"),
    ],
    constraints: "UNIQUE (\"type\", email, domain, role, allow_discovery)",
};

const FILE_PERMISSIONS: Table = Table {
    suffix: "file_permissions",
    columns: &[
        col("file_id", "VARCHAR NOT NULL"),
        col("permission_id", "BIGINT NOT NULL"),
    ],
    constraints: "PRIMARY KEY (file_id, permission_id)",
};

const FILE_PARENTS: Table = Table {
    suffix: "file_parents",
    columns: &[
        col("parent_id", "VARCHAR NOT NULL"),
        col("file_id", "VARCHAR NOT NULL"),
    ],
    constraints: "PRIMARY KEY (parent_id, file_id)",
};

impl Table {
    fn name(&self, prefix: &str) -> String {
        format!("\"{prefix}_{}\"", self.suffix)
    }

    fn create_sql(&self, prefix: &str) -> String {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("  \"{}\" {}", c.name, c.sql_type))
            .collect();
        if !self.constraints.is_empty() {
            defs.push(format!("  {}", self.constraints));
        }
        format!("CREATE TABLE {} (\n{}\n);", self.name(prefix), defs.join(",\n"))
    }

    /// Multi-row INSERT with one `?` per value. DuckDB casts timestamp
    /// columns; SQLite stores the text as is.
    fn insert_sql(&self, prefix: &str, rows: usize, dialect: Dialect) -> String {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect();
        let tuple = format!(
            "({})",
            self.columns
                .iter()
                .map(|c| {
                    if dialect == Dialect::DuckDb && c.sql_type.starts_with("TIMESTAMP") {
                        "CAST(? AS TIMESTAMP)"
                    } else {
                        "?"
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        );
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.name(prefix),
            names.join(", "),
            vec![tuple; rows].join(", ")
        )
    }
}

/// Session table prefix, e.g. `2024_05_01_13_45_10`
pub fn table_prefix(now: DateTime<Local>) -> String {
    now.format("%Y_%m_%d_%H_%M_%S").to_string()
}

/// Engine-neutral bound parameter
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Int(i64),
    Bool(bool),
    Text(String),
}

impl SqlValue {
    fn duckdb(&self) -> duckdb::types::Value {
        use duckdb::types::Value;
        match self {
            Self::Null => Value::Null,
            Self::Int(v) => Value::BigInt(*v),
            Self::Bool(v) => Value::Boolean(*v),
            Self::Text(v) => Value::Text(v.clone()),
        }
    }

    fn sqlite(&self) -> rusqlite::types::Value {
        use rusqlite::types::Value;
        match self {
            Self::Null => Value::Null,
            Self::Int(v) => Value::Integer(*v),
            Self::Bool(v) => Value::Integer(i64::from(*v)),
            Self::Text(v) => Value::Text(v.clone()),
        }
    }
}

/// RFC3339 text → naive UTC timestamp text
fn timestamp_value(file_id: &str, field: &str, text: Option<&str>) -> SqlValue {
    let Some(text) = text else {
        return SqlValue::Null;
    };
    match DateTime::parse_from_rfc3339(text) {
        Ok(ts) => SqlValue::Text(
            ts.naive_utc()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
        ),
        Err(e) => {
            log::warn!("{file_id}: unparseable {field} {text:?}: {e}");
            SqlValue::Null
        }
    }
}

fn text_or_null(v: Option<&String>) -> SqlValue {
    v.map_or(SqlValue::Null, |s| SqlValue::Text(s.clone()))
}

fn file_values(record: &FileRecord) -> [SqlValue; 9] {
    [
        SqlValue::Text(record.id.clone()),
        SqlValue::Text(record.mime_type.clone()),
        SqlValue::Text(record.name.clone()),
        SqlValue::Int(record.size.map_or(0, |s| i64::try_from(s).unwrap_or(i64::MAX))),
        SqlValue::Bool(record.trashed),
        text_or_null(record.shared_container_id.as_ref()),
        timestamp_value(&record.id, "createdTime", record.created_time.as_deref()),
        timestamp_value(&record.id, "modifiedTime", record.modified_time.as_deref()),
        text_or_null(record.url.as_ref()),
    ]
}

/// One parameterized statement of a batch
struct Statement {
    sql: String,
    values: Vec<SqlValue>,
}

enum Database {
    DuckDb(duckdb::Connection),
    Sqlite(rusqlite::Connection),
}

impl Database {
    fn open(path: &Path, dialect: Dialect) -> Result<Self, SinkError> {
        Ok(match dialect {
            Dialect::DuckDb => Self::DuckDb(duckdb::Connection::open(path)?),
            Dialect::Sqlite => Self::Sqlite(rusqlite::Connection::open(path)?),
        })
    }

    fn dialect(&self) -> Dialect {
        match self {
            Self::DuckDb(_) => Dialect::DuckDb,
            Self::Sqlite(_) => Dialect::Sqlite,
        }
    }

    fn execute_batch(&self, sql: &str) -> Result<(), SinkError> {
        match self {
            Self::DuckDb(conn) => conn.execute_batch(sql)?,
            Self::Sqlite(conn) => conn.execute_batch(sql)?,
        }
        Ok(())
    }

    /// Run all statements in one transaction
    fn run_transaction(&mut self, statements: &[Statement]) -> Result<(), SinkError> {
        match self {
            Self::DuckDb(conn) => {
                let tx = conn.transaction()?;
                for st in statements {
                    let params = duckdb::params_from_iter(st.values.iter().map(SqlValue::duckdb));
                    tx.execute(&st.sql, params)?;
                }
                tx.commit()?;
            }
            Self::Sqlite(conn) => {
                let tx = conn.transaction()?;
                for st in statements {
                    let params = rusqlite::params_from_iter(st.values.iter().map(SqlValue::sqlite));
                    tx.execute(&st.sql, params)?;
                }
                tx.commit()?;
            }
        }
        Ok(())
    }

    fn close(self) -> Result<(), SinkError> {
        match self {
            Self::DuckDb(conn) => conn.close().map_err(|(_, e)| SinkError::Database(e)),
            Self::Sqlite(conn) => conn.close().map_err(|(_, e)| SinkError::Sqlite(e)),
        }
    }
}

pub struct RelationalSink {
    db: Database,
    prefix: String,
    seen: SeenIds,
    /// Distinct permission tuple → synthetic id, for the whole session
    permission_ids: FxHashMap<Permission, i64>,
}

impl RelationalSink {
    pub fn open(path: &Path, dialect: Dialect) -> Result<Self, SinkError> {
        Self::with_prefix(path, dialect, table_prefix(Local::now()))
    }

    pub fn with_prefix(path: &Path, dialect: Dialect, prefix: String) -> Result<Self, SinkError> {
        let db = Database::open(path, dialect)?;
        Ok(Self {
            db,
            prefix,
            seen: SeenIds::default(),
            permission_ids: FxHashMap::default(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Create the four session tables
    pub fn initialize(&mut self) -> Result<(), SinkError> {
        let ddl: Vec<String> = [&FILES, &PERMISSIONS, &FILE_PERMISSIONS, &FILE_PARENTS]
            .iter()
            .map(|t| t.create_sql(&self.prefix))
            .collect();
        self.db.execute_batch(&ddl.join("\n"))?;
        log::info!("Writing to tables {}_*", self.prefix);
        Ok(())
    }

    /// Insert one batch in a single transaction.
    pub fn write_batch(&mut self, records: &[FileRecord]) -> Result<usize, SinkError> {
        let fresh = self.seen.fresh(records);
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut new_permissions: Vec<(i64, &Permission)> = Vec::new();
        let mut file_permissions: Vec<(&str, i64)> = Vec::new();
        let mut file_parents: Vec<(&str, &str)> = Vec::new();
        for record in &fresh {
            let mut linked = Vec::with_capacity(record.permissions.len());
            for permission in &record.permissions {
                // placeholder user grants would collide on the UNIQUE tuple
                if permission.is_stub() {
                    continue;
                }
                let next_id = self.permission_ids.len() as i64 + 1;
                let id = *self
                    .permission_ids
                    .entry(permission.clone())
                    .or_insert_with(|| {
                        new_permissions.push((next_id, permission));
                        next_id
                    });
                if !linked.contains(&id) {
                    linked.push(id);
                    file_permissions.push((record.id.as_str(), id));
                }
            }
            let mut parents_seen = Vec::with_capacity(record.parents.len());
            for parent in &record.parents {
                if !parents_seen.contains(&parent) {
                    parents_seen.push(parent);
                    file_parents.push((parent.as_str(), record.id.as_str()));
                }
            }
        }

        let dialect = self.db.dialect();
        let mut statements = Vec::new();
        for chunk in fresh.chunks(ROWS_PER_STATEMENT) {
            statements.push(Statement {
                sql: FILES.insert_sql(&self.prefix, chunk.len(), dialect),
                values: chunk.iter().flat_map(|r| file_values(r)).collect(),
            });
        }
        for chunk in new_permissions.chunks(ROWS_PER_STATEMENT) {
            statements.push(Statement {
                sql: PERMISSIONS.insert_sql(&self.prefix, chunk.len(), dialect),
                values: chunk
                    .iter()
                    .flat_map(|(id, p)| {
                        [
                            SqlValue::Int(*id),
                            SqlValue::Text(p.kind.as_str().to_string()),
                            SqlValue::Text(p.email.clone()),
                            SqlValue::Text(p.domain.clone()),
                            SqlValue::Text(p.role.as_str().to_string()),
                            SqlValue::Bool(p.allow_discovery),
                        ]
                    })
                    .collect(),
            });
        }
        for chunk in file_permissions.chunks(ROWS_PER_STATEMENT) {
            statements.push(Statement {
                sql: FILE_PERMISSIONS.insert_sql(&self.prefix, chunk.len(), dialect),
                values: chunk
                    .iter()
                    .flat_map(|(file, perm)| {
                        [SqlValue::Text(file.to_string()), SqlValue::Int(*perm)]
                    })
                    .collect(),
            });
        }
        for chunk in file_parents.chunks(ROWS_PER_STATEMENT) {
            statements.push(Statement {
                sql: FILE_PARENTS.insert_sql(&self.prefix, chunk.len(), dialect),
                values: chunk
                    .iter()
                    .flat_map(|(parent, file)| {
                        [SqlValue::Text(parent.to_string()), SqlValue::Text(file.to_string())]
                    })
                    .collect(),
            });
        }
        self.db.run_transaction(&statements)?;

        log::debug!(
            "Inserted {} files, {} new permissions, {} links",
            fresh.len(),
            new_permissions.len(),
            file_permissions.len()
        );
        Ok(fresh.len())
    }

    pub fn finalize(self) -> Result<usize, SinkError> {
        let rows = self.seen.len();
        self.db.close()?;
        Ok(rows)
    }
}
