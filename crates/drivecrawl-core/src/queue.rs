//! Join-able FIFO of folder tasks shared by all crawl workers

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

/// What a worker pulls from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem<T> {
    Task(T),
    /// Sentinel: the receiving worker must stop
    Stop,
}

/// Count of items put but not yet marked done
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    all_done: Condvar,
}

/// Multi-producer, multi-consumer FIFO with `join` semantics.
///
/// Every `put` (task or sentinel) must be balanced by exactly one
/// [`task_done`](TaskQueue::task_done); [`join`](TaskQueue::join) returns
/// once the balance is zero. Cloning yields another handle to the same queue.
pub struct TaskQueue<T> {
    tx: Sender<QueueItem<T>>,
    rx: Receiver<QueueItem<T>>,
    outstanding: Arc<Outstanding>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            outstanding: Arc::new(Outstanding::default()),
        }
    }

    pub fn put(&self, task: T) {
        self.push(QueueItem::Task(task));
    }

    /// Enqueue one stop sentinel
    pub fn put_sentinel(&self) {
        self.push(QueueItem::Stop);
    }

    fn push(&self, item: QueueItem<T>) {
        // count first so join never sees zero while an item is in flight
        *self.lock_count() += 1;
        // both ends live in `self`, the channel cannot be disconnected
        let _ = self.tx.send(item);
    }

    /// Block until an item is available
    pub fn get(&self) -> QueueItem<T> {
        match self.rx.recv() {
            Ok(item) => item,
            Err(_) => QueueItem::Stop,
        }
    }

    /// Block for at most `timeout`; `None` when nothing arrived
    pub fn get_timeout(&self, timeout: Duration) -> Option<QueueItem<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(QueueItem::Stop),
        }
    }

    /// Mark one previously dequeued item as finished
    pub fn task_done(&self) {
        let mut count = self.lock_count();
        match count.checked_sub(1) {
            Some(n) => *count = n,
            None => log::error!("task_done called more times than items were put"),
        }
        if *count == 0 {
            self.outstanding.all_done.notify_all();
        }
    }

    /// Guard that calls [`task_done`](TaskQueue::task_done) when dropped,
    /// including on early return or panic.
    pub fn done_guard(&self) -> DoneGuard<'_, T> {
        DoneGuard { queue: self }
    }

    pub fn outstanding(&self) -> usize {
        *self.lock_count()
    }

    /// Items currently waiting to be dequeued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Block until every item ever put has been marked done
    pub fn join(&self) {
        let mut count = self.lock_count();
        while *count > 0 {
            count = self
                .outstanding
                .all_done
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`join`](TaskQueue::join), but re-checks `keep_waiting` every
    /// `tick` and gives up as soon as it returns `false`.
    ///
    /// Returns `true` when the queue fully drained.
    pub fn join_while(&self, tick: Duration, mut keep_waiting: impl FnMut() -> bool) -> bool {
        let mut count = self.lock_count();
        while *count > 0 {
            if !keep_waiting() {
                return false;
            }
            count = match self.outstanding.all_done.wait_timeout(count, tick) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    /// Dequeue everything still waiting and mark it done.
    ///
    /// Used once no worker is left to consume the queue.
    pub fn drain_abandoned(&self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            self.task_done();
            drained += 1;
        }
        drained
    }

    fn lock_count(&self) -> std::sync::MutexGuard<'_, usize> {
        self.outstanding
            .count
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// RAII marker for one dequeued item
pub struct DoneGuard<'a, T> {
    queue: &'a TaskQueue<T>,
}

impl<T> Drop for DoneGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}
