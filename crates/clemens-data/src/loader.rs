//! Background batch loading
//!
//! A single worker thread runs decode -> index -> accumulate and pushes full
//! batches into a bounded channel. When the channel is full the worker blocks,
//! which is the only backpressure between producer and consumer.
//!
//! Completion travels on a second channel. The worker publishes it only after
//! its last batch is queued, so a consumer that has seen completion drains the
//! batch channel and then reports end-of-stream. Batches arrive in stream order.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, Sender, bounded, never, select};
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchAccumulator};
use crate::error::{DataError, DataResult};
use crate::features::FeaturePair;
use crate::io::InputSource;
use crate::record::RecordDecoder;

/// Default number of positions per batch
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Default channel capacity is this many batches per position of batch size
pub const QUEUE_DEPTH_FACTOR: usize = 128;

/// Default consumer wait before re-checking completion
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default number of positions between progress logs
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Loader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Dataset path (`-` for stdin, `.gz` is decompressed)
    pub path: PathBuf,
    /// Positions per batch
    pub batch_size: usize,
    /// Batch channel capacity; `None` means `QUEUE_DEPTH_FACTOR * batch_size`
    pub queue_capacity: Option<usize>,
    /// Consumer poll timeout in milliseconds
    pub poll_interval_ms: u64,
    /// Positions between progress logs (0 disables them)
    pub progress_interval: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl LoaderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the consumer poll timeout.
    ///
    /// Stored in whole milliseconds; a non-zero interval below 1 ms becomes 1 ms.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.poll_interval_ms = if millis == 0 && !interval.is_zero() { 1 } else { millis };
        self
    }

    pub fn with_progress_interval(mut self, positions: u64) -> Self {
        self.progress_interval = positions;
        self
    }

    /// Effective batch channel capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| QUEUE_DEPTH_FACTOR.saturating_mul(self.batch_size))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> DataResult<()> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidConfig("batch size must be positive".to_string()));
        }
        if self.queue_capacity() == 0 {
            return Err(DataError::InvalidConfig("queue capacity must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(DataError::InvalidConfig("poll interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// Live counters shared with the worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    positions_read: AtomicU64,
    positions_batched: AtomicU64,
    batches_sent: AtomicU64,
}

impl PipelineStats {
    /// Positions decoded so far
    pub fn positions_read(&self) -> u64 {
        self.positions_read.load(Ordering::Relaxed)
    }

    /// Positions inside batches handed to the channel
    pub fn positions_batched(&self) -> u64 {
        self.positions_batched.load(Ordering::Relaxed)
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    fn summary(&self) -> PipelineSummary {
        let positions_read = self.positions_read();
        let positions_batched = self.positions_batched();
        PipelineSummary {
            positions_read,
            positions_batched,
            positions_dropped: positions_read - positions_batched,
            batches: self.batches_sent(),
        }
    }
}

/// Final counts of one pass over a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub positions_read: u64,
    pub positions_batched: u64,
    /// Positions read but never delivered in a batch
    pub positions_dropped: u64,
    pub batches: u64,
}

/// Batches travel boxed so every preallocated channel slot is pointer-sized.
type QueueSlot = Box<Batch>;

enum Completion {
    Finished(PipelineSummary),
    Failed(DataError),
}

struct Worker<R> {
    decoder: RecordDecoder<R>,
    accumulator: BatchAccumulator,
    batches: Sender<QueueSlot>,
    stats: Arc<PipelineStats>,
    progress_interval: u64,
}

impl<R: Read> Worker<R> {
    fn run(mut self, done: Sender<Completion>) {
        log::info!("data loader started");
        let completion = match self.fill() {
            Ok(summary) => {
                log::info!(
                    "data loader finished: {} positions read, {} batches",
                    summary.positions_read,
                    summary.batches
                );
                Completion::Finished(summary)
            }
            Err(e) => {
                log::error!("data loader aborted: {e}");
                Completion::Failed(e)
            }
        };
        // `self.batches` is still alive here, so every batch is queued before completion.
        let _ = done.send(completion);
    }

    fn fill(&mut self) -> DataResult<PipelineSummary> {
        while let Some(record) = self.decoder.next_record()? {
            let features = FeaturePair::from_record(&record);
            let read = self.stats.positions_read.fetch_add(1, Ordering::Relaxed) + 1;
            if self.progress_interval > 0 && read % self.progress_interval == 0 {
                log::debug!("{read} positions read");
            }

            let Some(batch) =
                self.accumulator.push(&features, record.turn, record.score, record.result)
            else {
                continue;
            };
            let len = batch.len() as u64;
            if self.batches.send(Box::new(batch)).is_err() {
                log::debug!("batch receiver dropped, stopping data loader");
                break;
            }
            self.stats.positions_batched.fetch_add(len, Ordering::Relaxed);
            self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
        }

        let dropped = self.accumulator.discard();
        if dropped > 0 {
            log::warn!(
                "dropping {dropped} trailing positions that do not fill a batch of {}",
                self.accumulator.batch_size()
            );
        }
        Ok(self.stats.summary())
    }
}

enum ReaderState {
    Running,
    Finished(PipelineSummary),
    /// Holds the error until it has been reported once
    Failed(Option<DataError>),
}

enum Polled {
    Batch(QueueSlot),
    Completion(Result<Completion, RecvError>),
    Timeout,
}

/// Consumer side of the pipeline
///
/// Owns the worker thread. Dropping the reader disconnects the batch channel,
/// which releases a worker blocked on a full channel, and joins it. A worker
/// blocked inside `read` (stdin without EOF, a stalled pipe) cannot be released
/// that way: `Drop` waits one poll interval for it to report completion and
/// then detaches the thread, while [`BatchReader::finish`] waits for it.
pub struct BatchReader {
    batches: Receiver<QueueSlot>,
    done: Receiver<Completion>,
    state: ReaderState,
    stats: Arc<PipelineStats>,
    worker: Option<JoinHandle<()>>,
    poll_interval: Duration,
    capacity: usize,
    poll_timeouts: u64,
}

impl BatchReader {
    /// Open `config.path` and start the worker.
    ///
    /// The file is opened on the calling thread so open errors surface here.
    pub fn start(config: &LoaderConfig) -> DataResult<Self> {
        config.validate()?;
        let source = InputSource::from_path(&config.path);
        let reader = source.open()?;
        log::info!(
            "loading {source} (batch size {}, queue capacity {})",
            config.batch_size,
            config.queue_capacity()
        );
        Self::from_reader(reader, config)
    }

    /// Start the worker over an arbitrary byte source. `config.path` is ignored.
    pub fn from_reader<R>(reader: R, config: &LoaderConfig) -> DataResult<Self>
    where
        R: Read + Send + 'static,
    {
        config.validate()?;
        let capacity = config.queue_capacity();
        let (batch_tx, batch_rx) = bounded(capacity);
        let (done_tx, done_rx) = bounded(1);
        let stats = Arc::new(PipelineStats::default());

        let worker = Worker {
            decoder: RecordDecoder::new(reader),
            accumulator: BatchAccumulator::new(config.batch_size)?,
            batches: batch_tx,
            stats: Arc::clone(&stats),
            progress_interval: config.progress_interval,
        };
        let handle = thread::Builder::new()
            .name("clemens-data-loader".to_string())
            .spawn(move || worker.run(done_tx))?;

        Ok(Self {
            batches: batch_rx,
            done: done_rx,
            state: ReaderState::Running,
            stats,
            worker: Some(handle),
            poll_interval: config.poll_interval(),
            capacity,
            poll_timeouts: 0,
        })
    }

    /// Next batch, `Ok(None)` at end-of-stream.
    ///
    /// Batches queued before a failure are delivered first; the failure is
    /// reported once, later calls return [`DataError::Aborted`].
    pub fn next_batch(&mut self) -> DataResult<Option<Batch>> {
        loop {
            if let Ok(batch) = self.batches.try_recv() {
                return Ok(Some(*batch));
            }
            match &mut self.state {
                ReaderState::Running => {}
                ReaderState::Finished(_) => return Ok(None),
                ReaderState::Failed(error) => {
                    return Err(error.take().unwrap_or(DataError::Aborted));
                }
            }

            let polled = select! {
                recv(self.batches) -> batch => match batch {
                    Ok(batch) => Polled::Batch(batch),
                    // The worker is gone; its completion is already queued.
                    Err(_) => Polled::Completion(self.done.recv()),
                },
                recv(self.done) -> completion => Polled::Completion(completion),
                default(self.poll_interval) => Polled::Timeout,
            };

            match polled {
                Polled::Batch(batch) => return Ok(Some(*batch)),
                Polled::Completion(completion) => self.observe(completion),
                Polled::Timeout => {
                    self.poll_timeouts += 1;
                    log::trace!("no batch within {:?}, checking completion", self.poll_interval);
                }
            }
        }
    }

    fn observe(&mut self, completion: Result<Completion, RecvError>) {
        self.state = match completion {
            Ok(Completion::Finished(summary)) => ReaderState::Finished(summary),
            Ok(Completion::Failed(e)) => ReaderState::Failed(Some(e)),
            Err(_) => ReaderState::Failed(Some(DataError::WorkerLost)),
        };
    }

    /// Live worker counters
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Summary of the pass, once end-of-stream has been observed
    pub fn summary(&self) -> Option<PipelineSummary> {
        match self.state {
            ReaderState::Finished(summary) => Some(summary),
            _ => None,
        }
    }

    /// Batches waiting in the channel
    pub fn queued(&self) -> usize {
        self.batches.len()
    }

    /// Batch channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Times the consumer waited a full poll interval without a batch
    pub fn poll_timeouts(&self) -> u64 {
        self.poll_timeouts
    }

    /// Stop the worker and return its summary.
    ///
    /// Batches still queued are discarded. Blocks until the worker reports
    /// completion, including while it waits on a slow source.
    pub fn finish(mut self) -> DataResult<PipelineSummary> {
        let state = std::mem::replace(&mut self.state, ReaderState::Failed(None));
        let outcome = match state {
            ReaderState::Finished(summary) => Ok(summary),
            ReaderState::Failed(error) => Err(error.unwrap_or(DataError::Aborted)),
            ReaderState::Running => {
                self.batches = never();
                match self.done.recv() {
                    Ok(Completion::Finished(summary)) => Ok(summary),
                    Ok(Completion::Failed(e)) => Err(e),
                    Err(_) => Err(DataError::WorkerLost),
                }
            }
        };
        self.join_worker();
        outcome
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("data loader worker panicked");
            }
        }
    }
}

impl Iterator for BatchReader {
    type Item = DataResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) | Err(DataError::Aborted) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for BatchReader {
    fn drop(&mut self) {
        // Disconnect first so a worker blocked on a full channel can exit.
        self.batches = never();
        if matches!(self.state, ReaderState::Running) {
            let waited = self.done.recv_timeout(self.poll_interval);
            if matches!(waited, Err(RecvTimeoutError::Timeout)) {
                // Dropping the handle detaches the thread.
                log::warn!(
                    "data loader worker still reading after {:?}, detaching it",
                    self.poll_interval
                );
                return;
            }
        }
        self.join_worker();
    }
}
