//! Streaming JSON document: `{"files": [ ... ]}`

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::SeenIds;
use crate::error::SinkError;
use crate::record::FileRecord;

const OPEN: &[u8] = b"{\"files\": [\n  ";
const SEPARATOR: &[u8] = b",\n  ";
const CLOSE: &[u8] = b"\n]}";

/// Appends one encoded record at a time; earlier bytes are never rewritten.
pub struct DocumentSink {
    out: BufWriter<File>,
    seen: SeenIds,
}

impl DocumentSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            seen: SeenIds::default(),
        })
    }

    pub fn initialize(&mut self) -> Result<(), SinkError> {
        self.out.write_all(OPEN)?;
        Ok(())
    }

    pub fn write_batch(&mut self, records: &[FileRecord]) -> Result<usize, SinkError> {
        let already = self.seen.len();
        let fresh = self.seen.fresh(records);
        for (i, record) in fresh.iter().enumerate() {
            if already + i > 0 {
                self.out.write_all(SEPARATOR)?;
            }
            serde_json::to_writer(&mut self.out, record)?;
        }
        Ok(fresh.len())
    }

    pub fn finalize(mut self) -> Result<usize, SinkError> {
        self.out.write_all(CLOSE)?;
        self.out.flush()?;
        Ok(self.seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::record;

    #[test]
    fn output_is_valid_json_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut sink = DocumentSink::create(&path).unwrap();
        sink.initialize().unwrap();
        sink.write_batch(&[record("1", "a"), record("2", "b")]).unwrap();
        // a batch made only of duplicates must not leave a dangling separator
        assert_eq!(sink.write_batch(&[record("1", "a")]).unwrap(), 0);
        sink.write_batch(&[record("3", "c"), record("2", "b")]).unwrap();
        assert_eq!(sink.finalize().unwrap(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\"files\": [\n  {"));
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        let files = doc["files"].as_array().unwrap();
        let ids: Vec<_> = files.iter().map(|f| f["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(files[0]["mimeType"], "text/csv");
        assert_eq!(files[0]["permissions"][0]["role"], "owner");
    }

    #[test]
    fn empty_document_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        let mut sink = DocumentSink::create(&path).unwrap();
        sink.initialize().unwrap();
        sink.finalize().unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["files"].as_array().unwrap().len(), 0);
    }
}
