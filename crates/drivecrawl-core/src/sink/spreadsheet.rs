//! Spreadsheet output split across as many spreadsheets as the cell cap requires

use chrono::Local;
use serde_json::Value;

use super::{SeenIds, flat_row};
use crate::error::{RemoteError, SinkError};
use crate::record::FileRecord;
use crate::retry::RetryPolicy;

/// Cells per spreadsheet, kept below the service's hard limit
pub const DEFAULT_CELL_LIMIT: usize = 1_900_000;

/// A spreadsheet created by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetInfo {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Raw spreadsheet calls; retries are applied by the sink.
pub trait SpreadsheetService: Send {
    /// Create a spreadsheet with one sheet whose first row is `header`.
    fn create(
        &mut self,
        title: &str,
        sheet_title: &str,
        header: &[String],
    ) -> Result<SpreadsheetInfo, RemoteError>;

    /// Append rows below the existing data of `sheet_title`.
    fn append_rows(
        &mut self,
        spreadsheet_id: &str,
        sheet_title: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), RemoteError>;

    fn rename(&mut self, spreadsheet_id: &str, title: &str) -> Result<(), RemoteError>;

    /// Freeze and bolden the header row and add a basic filter.
    fn format_header(&mut self, spreadsheet_id: &str) -> Result<(), RemoteError>;
}

/// Opens a [`SpreadsheetService`] for the writer thread
pub trait SpreadsheetConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SpreadsheetService>, RemoteError>;
}

pub struct SpreadsheetSink {
    service: Box<dyn SpreadsheetService>,
    retry: RetryPolicy,
    title: String,
    sheet_title: String,
    columns: Vec<String>,
    cell_limit: usize,
    /// Cells used in the current spreadsheet, header included
    cells: usize,
    created: Vec<SpreadsheetInfo>,
    seen: SeenIds,
}

impl SpreadsheetSink {
    pub fn new(
        service: Box<dyn SpreadsheetService>,
        title: String,
        columns: Vec<String>,
        cell_limit: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            retry,
            title,
            sheet_title: format!("drivecrawl-{}", Local::now().format("%Y%m%d")),
            columns,
            cell_limit,
            cells: 0,
            created: Vec::new(),
            seen: SeenIds::default(),
        }
    }

    /// Create the first spreadsheet
    pub fn initialize(&mut self) -> Result<(), SinkError> {
        self.start_spreadsheet()
    }

    fn start_spreadsheet(&mut self) -> Result<(), SinkError> {
        let width = self.columns.len();
        if width.saturating_mul(2) > self.cell_limit {
            return Err(SinkError::CellLimit {
                columns: width,
                limit: self.cell_limit,
            });
        }
        let service = &mut self.service;
        let (title, sheet_title, columns) = (&self.title, &self.sheet_title, &self.columns);
        let info = self.retry.call("create spreadsheet", || {
            service.create(title, sheet_title, columns)
        })?;
        log::info!(
            "Created spreadsheet {} ({})",
            info.title,
            self.created.len() + 1
        );
        self.created.push(info);
        self.cells = width;
        Ok(())
    }

    fn current_id(&self) -> Result<String, SinkError> {
        self.created
            .last()
            .map(|s| s.id.clone())
            .ok_or_else(|| SinkError::Remote(RemoteError::http(None, "no spreadsheet created")))
    }

    /// Append unseen records, opening new spreadsheets so none exceeds the cap.
    pub fn write_batch(&mut self, records: &[FileRecord]) -> Result<usize, SinkError> {
        let rows: Vec<Vec<Value>> = self
            .seen
            .fresh(records)
            .into_iter()
            .map(|r| flat_row(r, &self.columns))
            .collect();
        let width = self.columns.len().max(1);

        let mut remaining = rows.as_slice();
        while !remaining.is_empty() {
            let room = self.cell_limit.saturating_sub(self.cells) / width;
            if room == 0 {
                self.start_spreadsheet()?;
                continue;
            }
            let (now, later) = remaining.split_at(room.min(remaining.len()));
            let id = self.current_id()?;
            let service = &mut self.service;
            let sheet_title = &self.sheet_title;
            self.retry.call("append rows", || {
                service.append_rows(&id, sheet_title, now)
            })?;
            self.cells += now.len() * width;
            remaining = later;
        }
        Ok(rows.len())
    }

    /// Number the spreadsheets when more than one was needed, then format headers.
    pub fn finalize(mut self) -> Result<usize, SinkError> {
        let total = self.created.len();
        if total > 1 {
            for (i, info) in self.created.iter_mut().enumerate() {
                let title = format!("{} {} of {}", info.title, i + 1, total);
                let service = &mut self.service;
                self.retry
                    .call("rename spreadsheet", || service.rename(&info.id, &title))?;
                info.title = title;
            }
            log::info!("Data did not fit in one spreadsheet, split into {total}");
        }
        for info in &self.created {
            let service = &mut self.service;
            self.retry
                .call("format header", || service.format_header(&info.id))?;
            log::info!("Saved spreadsheet {} at {}", info.title, info.url);
        }
        Ok(self.seen.len())
    }

    pub fn spreadsheets(&self) -> &[SpreadsheetInfo] {
        &self.created
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::tests::record;
    use std::sync::{Arc, Mutex};

    /// Every call the fake service saw, in order
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Create(String),
        Append(String, usize),
        Rename(String, String),
        Format(String),
    }

    #[derive(Default, Clone)]
    pub(crate) struct FakeSheets {
        pub calls: Arc<Mutex<Vec<Call>>>,
    }

    impl SpreadsheetService for FakeSheets {
        fn create(
            &mut self,
            title: &str,
            _sheet_title: &str,
            _header: &[String],
        ) -> Result<SpreadsheetInfo, RemoteError> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.iter().filter(|c| matches!(c, Call::Create(_))).count();
            let id = format!("sheet{}", n + 1);
            calls.push(Call::Create(id.clone()));
            Ok(SpreadsheetInfo {
                url: format!("https://sheets.example/{id}"),
                id,
                title: title.to_string(),
            })
        }

        fn append_rows(
            &mut self,
            spreadsheet_id: &str,
            _sheet_title: &str,
            rows: &[Vec<Value>],
        ) -> Result<(), RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Append(spreadsheet_id.to_string(), rows.len()));
            Ok(())
        }

        fn rename(&mut self, spreadsheet_id: &str, title: &str) -> Result<(), RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Rename(spreadsheet_id.to_string(), title.to_string()));
            Ok(())
        }

        fn format_header(&mut self, spreadsheet_id: &str) -> Result<(), RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Format(spreadsheet_id.to_string()));
            Ok(())
        }
    }

    impl SpreadsheetConnector for FakeSheets {
        fn connect(&self) -> Result<Box<dyn SpreadsheetService>, RemoteError> {
            Ok(Box::new(self.clone()))
        }
    }

    fn columns(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{i}")).collect()
    }

    fn records(n: usize) -> Vec<FileRecord> {
        (0..n).map(|i| record(&i.to_string(), "x")).collect()
    }

    #[test]
    fn batch_split_across_spreadsheets() {
        let fake = FakeSheets::default();
        let calls = fake.calls.clone();
        let mut sink = SpreadsheetSink::new(
            Box::new(fake),
            "Audit".to_string(),
            columns(10),
            100,
            RetryPolicy::immediate(1),
        );
        sink.initialize().unwrap();
        assert_eq!(sink.write_batch(&records(15)).unwrap(), 15);
        assert_eq!(sink.spreadsheets().len(), 2);

        // second spreadsheet is created before the rest of the batch is written
        assert_eq!(
            calls.lock().unwrap().clone(),
            vec![
                Call::Create("sheet1".to_string()),
                Call::Append("sheet1".to_string(), 9),
                Call::Create("sheet2".to_string()),
                Call::Append("sheet2".to_string(), 6),
            ]
        );

        sink.finalize().unwrap();
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&Call::Rename("sheet1".to_string(), "Audit 1 of 2".to_string())));
        assert!(calls.contains(&Call::Rename("sheet2".to_string(), "Audit 2 of 2".to_string())));
        assert!(calls.contains(&Call::Format("sheet1".to_string())));
        assert!(calls.contains(&Call::Format("sheet2".to_string())));
    }

    #[test]
    fn single_spreadsheet_not_renamed() {
        let fake = FakeSheets::default();
        let calls = fake.calls.clone();
        let mut sink = SpreadsheetSink::new(
            Box::new(fake),
            "Audit".to_string(),
            columns(3),
            DEFAULT_CELL_LIMIT,
            RetryPolicy::immediate(1),
        );
        sink.initialize().unwrap();
        sink.write_batch(&records(4)).unwrap();
        // duplicates are dropped before counting cells
        assert_eq!(sink.write_batch(&records(4)).unwrap(), 0);
        assert_eq!(sink.finalize().unwrap(), 4);

        let calls = calls.lock().unwrap();
        assert!(!calls.iter().any(|c| matches!(c, Call::Rename(..))));
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::Append(..))).count(),
            1
        );
    }

    #[test]
    fn row_wider_than_cap_is_an_error() {
        let mut sink = SpreadsheetSink::new(
            Box::new(FakeSheets::default()),
            "Audit".to_string(),
            columns(60),
            100,
            RetryPolicy::immediate(1),
        );
        assert!(matches!(
            sink.initialize(),
            Err(SinkError::CellLimit {
                columns: 60,
                limit: 100
            })
        ));
    }
}
