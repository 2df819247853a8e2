//! Bounded hand-off of record batches from crawl workers to the output writer

use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded,
};

use crate::record::FileRecord;
use crate::shutdown::CancelToken;

/// Default number of batches that may wait for the writer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// How often blocked senders and receivers re-check cancellation
const TICK: Duration = Duration::from_millis(100);

/// The writer is gone (or the session was cancelled) and no longer accepts batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("result channel closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Create a connected sender/receiver pair holding at most `capacity` batches.
pub fn channel(capacity: usize, cancel: CancelToken) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        RecordSender {
            tx,
            cancel: cancel.clone(),
        },
        RecordReceiver { rx, cancel },
    )
}

/// Producer half; one clone per worker. Dropping every clone signals completion.
#[derive(Clone)]
pub struct RecordSender {
    tx: Sender<Vec<FileRecord>>,
    cancel: CancelToken,
}

impl RecordSender {
    /// Hand a whole buffer to the writer, blocking while the channel is full.
    pub fn send(&self, batch: Vec<FileRecord>) -> Result<(), QueueClosed> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut batch = batch;
        loop {
            match self.tx.send_timeout(batch, TICK) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.is_cancelled() {
                        return Err(QueueClosed);
                    }
                    batch = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueClosed),
            }
        }
    }
}

/// Consumer half, owned by the output writer.
pub struct RecordReceiver {
    rx: Receiver<Vec<FileRecord>>,
    cancel: CancelToken,
}

/// Outcome of waiting for the next batch
#[derive(Debug)]
pub enum Received {
    Batch(Vec<FileRecord>),
    /// Every sender dropped and the channel is empty
    Finished,
    Cancelled,
}

impl RecordReceiver {
    /// Block until a batch arrives, every producer is gone, or the session is cancelled.
    pub fn recv(&self) -> Received {
        loop {
            if self.cancel.is_cancelled() {
                return Received::Cancelled;
            }
            match self.rx.recv_timeout(TICK) {
                Ok(batch) => return Received::Batch(batch),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Received::Finished,
            }
        }
    }

    /// Move every batch already waiting into `buffer` without blocking.
    ///
    /// Returns `false` once the channel is closed and empty.
    pub fn drain_into(&self, buffer: &mut Vec<FileRecord>) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(batch) => buffer.extend(batch),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
