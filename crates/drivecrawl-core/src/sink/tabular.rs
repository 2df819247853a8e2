//! Delimited text output (CSV/TSV), UTF-8 with a byte order mark

use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::{SeenIds, flat_row};
use crate::error::SinkError;
use crate::record::{FileRecord, cell_text};

const BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct TabularSink {
    writer: csv::Writer<File>,
    columns: Vec<String>,
    seen: SeenIds,
}

impl std::fmt::Debug for TabularSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularSink")
            .field("columns", &self.columns.len())
            .field("rows", &self.seen.len())
            .finish_non_exhaustive()
    }
}

impl TabularSink {
    pub fn create(path: &Path, delimiter: u8, columns: Vec<String>) -> Result<Self, SinkError> {
        let mut file = File::create(path)?;
        file.write_all(BOM)?;
        let writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(file);
        Ok(Self {
            writer,
            columns,
            seen: SeenIds::default(),
        })
    }

    /// Write the header row
    pub fn initialize(&mut self) -> Result<(), SinkError> {
        self.writer.write_record(&self.columns)?;
        Ok(())
    }

    pub fn write_batch(&mut self, records: &[FileRecord]) -> Result<usize, SinkError> {
        let fresh = self.seen.fresh(records);
        for record in &fresh {
            let cells = flat_row(record, &self.columns);
            self.writer
                .write_record(cells.iter().map(cell_text))?;
        }
        Ok(fresh.len())
    }

    pub fn finalize(mut self) -> Result<usize, SinkError> {
        self.writer.flush()?;
        Ok(self.seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::record;
    use crate::sink::columns_for;

    fn read(path: &Path) -> String {
        String::from_utf8(std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn csv_has_bom_header_and_unique_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let first = record("1", "Shared\\a.csv");
        let mut sink = TabularSink::create(&path, b',', columns_for(&first)).unwrap();
        sink.initialize().unwrap();
        assert_eq!(sink.write_batch(&[first.clone(), record("2", "b")]).unwrap(), 2);
        assert_eq!(sink.write_batch(&[record("2", "b again"), record("3", "c")]).unwrap(), 1);
        assert_eq!(sink.finalize().unwrap(), 3);

        let text = read(&path);
        assert!(text.starts_with('\u{feff}'));
        let mut reader = csv::Reader::from_reader(text.trim_start_matches('\u{feff}').as_bytes());
        let header = reader.headers().unwrap().clone();
        assert_eq!(&header[0], "id");
        assert_eq!(&header[1], "name");
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        let ids: Vec<_> = rows.iter().map(|r| r[0].to_string()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(&rows[0][1], "Shared\\a.csv");
        assert_eq!(&rows[1][1], "b");
    }

    #[test]
    fn tsv_uses_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let first = record("1", "a");
        let mut sink = TabularSink::create(&path, b'\t', columns_for(&first)).unwrap();
        sink.initialize().unwrap();
        sink.write_batch(&[first]).unwrap();
        sink.finalize().unwrap();

        let text = read(&path);
        let header = text.trim_start_matches('\u{feff}').lines().next().unwrap();
        assert!(header.starts_with("id\tname\t"));
        assert!(!header.contains(','));
    }
}
