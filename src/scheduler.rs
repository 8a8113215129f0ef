//! Background reconciliation.
//!
//! Two worker threads, each looping on `recv_timeout` over a command channel:
//! the sync worker flushes the property index on a short interval, the
//! refresh worker recomputes everything on a long one. A refresh stops the
//! sync worker first and starts a fresh one afterwards, so no sync can persist
//! a half-rebuilt index.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    backend::MetadataBackend,
    cache::SnapshotCache,
    config::MetadataConfig,
    counts::CountsAggregator,
    errors::GraphMetaError,
    properties::PropertyAggregator,
    record::MetadataRecord,
};

pub enum WorkerMessage {
    Trigger,
    Shutdown,
}

struct Worker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<F>(name: &str, delay: Duration, interval: Duration, task: F) -> Result<Self, GraphMetaError>
    where
        F: FnMut() + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(receiver, delay, interval, task))
            .map_err(|e| GraphMetaError::worker(format!("spawn {name}: {e}")))?;
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    fn trigger(&self) -> bool {
        self.sender.send(WorkerMessage::Trigger).is_ok()
    }

    /// Lets a running task finish, then joins the thread.
    fn stop(mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("scheduler.worker_panicked");
            }
        }
    }
}

fn worker_loop<F: FnMut()>(
    receiver: Receiver<WorkerMessage>,
    delay: Duration,
    interval: Duration,
    mut task: F,
) {
    let mut wait = delay;
    loop {
        match receiver.recv_timeout(wait) {
            Ok(WorkerMessage::Trigger) | Err(RecvTimeoutError::Timeout) => {
                task();
                wait = interval;
            }
            Ok(WorkerMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Full recount plus property refresh, then a snapshot write when a cache is
/// configured. Both aggregators are attempted even if one fails.
pub fn full_recompute<B: MetadataBackend>(
    counts: &CountsAggregator<B>,
    properties: &PropertyAggregator<B>,
    cache: Option<&SnapshotCache>,
) -> Result<MetadataRecord, GraphMetaError> {
    let recount = counts.full_recount();
    if let Err(err) = &recount {
        warn!(error = %err, "scheduler.recount_failed");
    }
    let refresh = properties.full_refresh();
    if let Err(err) = &refresh {
        warn!(error = %err, "scheduler.property_refresh_failed");
    }
    let record = MetadataRecord {
        counts: recount?,
        properties: refresh?,
    };
    if let Some(cache) = cache {
        if let Err(err) = cache.store(counts.store().label(), &record) {
            warn!(error = %err, "scheduler.snapshot_write_failed");
        }
    }
    Ok(record)
}

struct Shared<B> {
    counts: Arc<CountsAggregator<B>>,
    properties: Arc<PropertyAggregator<B>>,
    cache: Option<SnapshotCache>,
    sync_delay: Duration,
    sync_interval: Duration,
    sync_worker: Mutex<Option<Worker>>,
    refresh_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl<B: MetadataBackend> Shared<B> {
    fn spawn_sync_worker(&self) -> Result<Worker, GraphMetaError> {
        let properties = Arc::clone(&self.properties);
        Worker::spawn("graphmeta-sync", self.sync_delay, self.sync_interval, move || {
            match properties.sync(false) {
                Ok(outcome) => debug!(?outcome, "scheduler.sync"),
                Err(err) => warn!(error = %err, "scheduler.sync_failed"),
            }
        })
    }

    fn refresh_cycle(&self) -> Result<MetadataRecord, GraphMetaError> {
        let _cycle = self.refresh_lock.lock();
        let paused = self.sync_worker.lock().take();
        if let Some(worker) = paused {
            worker.stop();
        }

        let result = full_recompute(&self.counts, &self.properties, self.cache.as_ref());

        if !self.stopped.load(Ordering::Acquire) {
            match self.spawn_sync_worker() {
                Ok(worker) => *self.sync_worker.lock() = Some(worker),
                Err(err) => warn!(error = %err, "scheduler.sync_restart_failed"),
            }
        }
        if let Ok(record) = &result {
            info!(
                entries = record.counts.len(),
                labels = record.properties.len(),
                "scheduler.refresh"
            );
        }
        result
    }
}

pub struct Scheduler<B> {
    shared: Arc<Shared<B>>,
    refresh_worker: Mutex<Option<Worker>>,
}

impl<B: MetadataBackend> Scheduler<B> {
    pub fn start(
        counts: Arc<CountsAggregator<B>>,
        properties: Arc<PropertyAggregator<B>>,
        cache: Option<SnapshotCache>,
        config: &MetadataConfig,
    ) -> Result<Self, GraphMetaError> {
        let shared = Arc::new(Shared {
            counts,
            properties,
            cache,
            sync_delay: config.sync_delay,
            sync_interval: config.sync_interval,
            sync_worker: Mutex::new(None),
            refresh_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        });
        let sync = shared.spawn_sync_worker()?;
        *shared.sync_worker.lock() = Some(sync);

        let cycle = Arc::clone(&shared);
        let refresh = Worker::spawn(
            "graphmeta-refresh",
            config.refresh_delay,
            config.refresh_interval,
            move || {
                if let Err(err) = cycle.refresh_cycle() {
                    warn!(error = %err, "scheduler.refresh_failed");
                }
            },
        )?;
        info!(
            sync_interval_ms = config.sync_interval.as_millis() as u64,
            refresh_interval_ms = config.refresh_interval.as_millis() as u64,
            "scheduler.started"
        );
        Ok(Self {
            shared,
            refresh_worker: Mutex::new(Some(refresh)),
        })
    }

    /// Runs a refresh cycle on the calling thread.
    pub fn trigger_refresh(&self) -> Result<MetadataRecord, GraphMetaError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(GraphMetaError::invalid_input("scheduler is shut down"));
        }
        self.shared.refresh_cycle()
    }

    /// Asks the sync worker for an immediate, still debounced, sync.
    pub fn trigger_sync(&self) -> bool {
        self.shared
            .sync_worker
            .lock()
            .as_ref()
            .is_some_and(Worker::trigger)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn sync_running(&self) -> bool {
        self.shared.sync_worker.lock().is_some()
    }

    /// Stops both workers. A refresh or sync already underway completes first.
    pub fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let refresh = self.refresh_worker.lock().take();
        if let Some(worker) = refresh {
            worker.stop();
        }
        // A manual refresh may still hold the cycle lock.
        let _cycle = self.shared.refresh_lock.lock();
        let sync = self.shared.sync_worker.lock().take();
        if let Some(worker) = sync {
            worker.stop();
        }
        info!("scheduler.stopped");
    }
}

impl<B> Drop for Scheduler<B> {
    fn drop(&mut self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            if let Some(worker) = self.refresh_worker.lock().take() {
                worker.stop();
            }
            if let Some(worker) = self.shared.sync_worker.lock().take() {
                worker.stop();
            }
        }
    }
}
