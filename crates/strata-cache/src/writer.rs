//! Background durable writer.
//!
//! One thread drains a bounded queue into the cold tier and the dedup store,
//! in submission order. Failures are logged and counted, never returned to
//! the caller of `set`: the in-memory tiers already hold the entry.

use crate::cold::ColdTier;
use crate::config::Backpressure;
use crate::dedup::DedupStore;
use crate::stats::CacheStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;
use strata_core::{CacheKey, Error, Result, SharedEntry};
use tracing::{debug, warn};

enum Job {
    Write(SharedEntry),
    Tombstone(CacheKey),
    Flush(mpsc::Sender<()>),
}

/// Everything the writer thread touches.
struct Sink {
    cold: Arc<ColdTier>,
    dedup: Option<Arc<DedupStore>>,
    stats: Arc<CacheStats>,
    pending: Arc<AtomicU64>,
}

impl Sink {
    fn run(self, jobs: Receiver<Job>) {
        for job in jobs {
            match job {
                Job::Write(entry) => {
                    self.write(&entry);
                    self.pending.fetch_sub(1, Ordering::Relaxed);
                }
                Job::Tombstone(key) => {
                    match self.cold.tombstone(&key) {
                        Ok(true) => {
                            self.stats.record_tombstone();
                            debug!(key = %key, "tombstoned");
                        }
                        Ok(false) => {}
                        Err(e) => warn!(key = %key, error = %e, "failed to tombstone key"),
                    }
                    self.pending.fetch_sub(1, Ordering::Relaxed);
                }
                Job::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("durable writer stopped");
    }

    fn write(&self, entry: &SharedEntry) {
        if !self.is_indexed(entry) {
            match self.cold.set(entry) {
                Ok(location) => {
                    entry.set_cold_location(location);
                    self.stats.record_durable_write(location.size);
                }
                Err(e) => {
                    self.stats.record_durable_failure();
                    warn!(key = %entry.key(), error = %e, "durable write failed");
                }
            }
        }
        if let Some(dedup) = &self.dedup {
            if let Err(e) = dedup.insert(entry) {
                self.stats.record_durable_failure();
                warn!(key = %entry.key(), error = %e, "dedup write failed");
            }
        }
    }

    /// Whether the cold index still holds `entry` under its key. A location
    /// alone is not enough: the key may have been tombstoned and collected
    /// since the entry was stored.
    fn is_indexed(&self, entry: &SharedEntry) -> bool {
        if entry.cold_location().is_none() {
            return false;
        }
        match self.cold.contains(entry.key()) {
            Ok(indexed) => indexed,
            Err(e) => {
                debug!(key = %entry.key(), error = %e, "index lookup failed, rewriting");
                false
            }
        }
    }
}

/// Handle to the writer thread.
pub struct DurableWriter {
    sender: Option<SyncSender<Job>>,
    handle: Option<JoinHandle<()>>,
    backpressure: Backpressure,
    stats: Arc<CacheStats>,
    pending: Arc<AtomicU64>,
}

impl std::fmt::Debug for DurableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableWriter")
            .field("backpressure", &self.backpressure)
            .field("pending", &self.pending())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl DurableWriter {
    /// Start the writer thread.
    pub fn spawn(
        cold: Arc<ColdTier>,
        dedup: Option<Arc<DedupStore>>,
        stats: Arc<CacheStats>,
        capacity: usize,
        backpressure: Backpressure,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let pending = Arc::new(AtomicU64::new(0));
        let sink = Sink {
            cold,
            dedup,
            stats: Arc::clone(&stats),
            pending: Arc::clone(&pending),
        };
        let handle = std::thread::Builder::new()
            .name("strata-writer".to_string())
            .spawn(move || sink.run(receiver))
            .map_err(|e| Error::storage("strata-writer", e))?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            backpressure,
            stats,
            pending,
        })
    }

    /// Queue a durable write, applying the backpressure policy. Returns
    /// `false` if the write was dropped.
    pub fn enqueue_write(&self, entry: SharedEntry) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::Relaxed);
        let key = entry.key().clone();
        let sent = match self.backpressure {
            Backpressure::Block => sender.send(Job::Write(entry)).is_ok(),
            Backpressure::DropAndLog => match sender.try_send(Job::Write(entry)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.stats.record_durable_drop();
                    warn!(key = %key, "durable write queue full, dropping write");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        };
        if !sent {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
        sent
    }

    /// Queue a tombstone. Always blocks on a full queue: dropping it would
    /// leave a stale key live on disk.
    pub fn enqueue_tombstone(&self, key: CacheKey) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::Relaxed);
        if sender.send(Job::Tombstone(key)).is_ok() {
            true
        } else {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            false
        }
    }

    /// Block until every job queued before this call has been processed.
    pub fn flush(&self) -> Result<()> {
        let stopped = || Error::storage("strata-writer", std::io::Error::other("writer stopped"));
        let sender = self.sender.as_ref().ok_or_else(stopped)?;
        let (ack, done) = mpsc::channel();
        sender.send(Job::Flush(ack)).map_err(|_| stopped())?;
        done.recv().map_err(|_| stopped())
    }

    /// Jobs queued but not yet processed.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }
}

impl Drop for DurableWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "durable writer did not drain on shutdown");
        }
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("durable writer thread panicked");
            }
        }
    }
}
