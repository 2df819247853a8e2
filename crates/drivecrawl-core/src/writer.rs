//! Dedicated writer thread draining the record channel into one sink

use std::io;
use std::thread::{self, JoinHandle};

use crate::aggregator::{Received, RecordReceiver};
use crate::error::SinkError;
use crate::record::FileRecord;
use crate::sink::{OutputTarget, Sink, SinkSettings};

/// Records buffered before a sink write
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub target: OutputTarget,
    pub chunk_size: usize,
    pub sink: SinkSettings,
}

impl WriterConfig {
    pub fn new(target: OutputTarget) -> Self {
        Self {
            target,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sink: SinkSettings::default(),
        }
    }
}

/// What the writer produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// Unique rows in the sink
    pub rows: usize,
    /// Sink kind, `None` when no record ever arrived
    pub sink: Option<&'static str>,
    pub cancelled: bool,
}

/// Receives record batches from the workers and writes them to the sink.
///
/// The sink is only created once the first batch arrives, so an empty
/// crawl leaves no output behind.
pub struct OutputWriter {
    rx: RecordReceiver,
    config: WriterConfig,
}

impl OutputWriter {
    pub fn new(rx: RecordReceiver, config: WriterConfig) -> Self {
        Self { rx, config }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<Result<WriteReport, SinkError>>> {
        thread::Builder::new()
            .name("writer".to_string())
            .spawn(move || self.run())
    }

    pub fn run(self) -> Result<WriteReport, SinkError> {
        let Some(mut buffer) = self.first_batch() else {
            return Ok(WriteReport {
                cancelled: self.rx.is_cancelled(),
                ..WriteReport::default()
            });
        };

        let mut sink = Sink::open(&self.config.target, &buffer[0], &self.config.sink)?;
        sink.initialize()?;
        let kind = sink.kind();
        log::debug!("Writer started, {} output", kind);

        let mut cancelled = false;
        loop {
            let open = self.rx.drain_into(&mut buffer);
            if buffer.len() > self.config.chunk_size {
                log::debug!("Writing {} records", buffer.len());
                sink.write_batch(&buffer)?;
                buffer.clear();
            }
            if !open {
                break;
            }
            match self.rx.recv() {
                Received::Batch(batch) => buffer.extend(batch),
                Received::Finished => break,
                Received::Cancelled => {
                    log::warn!("Writer interrupted, closing output early");
                    cancelled = true;
                    break;
                }
            }
        }

        // final flush of leftovers
        if !buffer.is_empty() {
            sink.write_batch(&buffer)?;
        }
        let rows = sink.finalize()?;
        log::info!("Wrote {rows} unique records to {}", self.config.target.path.display());
        Ok(WriteReport {
            rows,
            sink: Some(kind),
            cancelled,
        })
    }

    /// Block for the first non-empty batch; `None` if the session ends first.
    fn first_batch(&self) -> Option<Vec<FileRecord>> {
        loop {
            match self.rx.recv() {
                Received::Batch(batch) if batch.is_empty() => {}
                Received::Batch(batch) => return Some(batch),
                Received::Finished => {
                    log::warn!("No records found, no output written");
                    return None;
                }
                Received::Cancelled => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator;
    use crate::record::tests::record;
    use crate::shutdown::CancelToken;

    #[test]
    fn writes_all_batches_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let (tx, rx) = aggregator::channel(4, CancelToken::new());
        let mut config = WriterConfig::new(OutputTarget::parse(&path).unwrap());
        config.chunk_size = 2;
        let handle = OutputWriter::new(rx, config).spawn().unwrap();

        for i in 0..5 {
            tx.send(vec![record(&i.to_string(), "x"), record("0", "dup")])
                .unwrap();
        }
        drop(tx);
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.rows, 5);
        assert_eq!(report.sink, Some("document"));
        assert!(!report.cancelled);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["files"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn no_records_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (tx, rx) = aggregator::channel(4, CancelToken::new());
        let writer = OutputWriter::new(rx, WriterConfig::new(OutputTarget::parse(&path).unwrap()));
        drop(tx);
        let report = writer.run().unwrap();
        assert_eq!(report, WriteReport::default());
        assert!(!path.exists());
    }

    #[test]
    fn sink_error_stops_writer() {
        let dir = tempfile::tempdir().unwrap();
        // parent directory does not exist
        let path = dir.path().join("missing").join("out.csv");
        let (tx, rx) = aggregator::channel(4, CancelToken::new());
        let handle = OutputWriter::new(rx, WriterConfig::new(OutputTarget::parse(&path).unwrap()))
            .spawn()
            .unwrap();
        tx.send(vec![record("1", "a")]).unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(SinkError::Io(_))));
        // receiver is gone, workers see the channel as closed
        assert!(tx.send(vec![record("2", "b")]).is_err());
    }

    #[test]
    fn cancellation_finalizes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let cancel = CancelToken::new();
        let (tx, rx) = aggregator::channel(4, cancel.clone());
        let handle = OutputWriter::new(rx, WriterConfig::new(OutputTarget::parse(&path).unwrap()))
            .spawn()
            .unwrap();
        tx.send(vec![record("1", "a")]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(150));
        cancel.cancel();
        let report = handle.join().unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.rows, 1);
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["files"][0]["id"], "1");
        drop(tx);
    }
}
