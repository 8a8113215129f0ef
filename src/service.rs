use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::{
    backend::MetadataBackend,
    cache::SnapshotCache,
    config::MetadataConfig,
    counts::CountsAggregator,
    errors::GraphMetaError,
    events::MutationBatch,
    properties::{PropertyAggregator, SyncOutcome},
    record::{MetadataRecord, MetadataStore, PropertyIndex},
    router::{MutationRouter, RouteReport},
    scheduler::{Scheduler, full_recompute},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bootstrap {
    Recomputed,
    Persisted,
    Snapshot,
}

pub struct MetadataService<B: MetadataBackend> {
    config: MetadataConfig,
    store: Arc<MetadataStore<B>>,
    counts: Arc<CountsAggregator<B>>,
    properties: Arc<PropertyAggregator<B>>,
    router: MutationRouter<B>,
    scheduler: Scheduler<B>,
    cache: Option<SnapshotCache>,
    bootstrap: Bootstrap,
}

impl<B: MetadataBackend> MetadataService<B> {
    /// Blocks until the backend is ready, brings the record up to date and
    /// starts the background workers. Batches may be applied once this
    /// returns.
    pub fn start(backend: Arc<B>, config: MetadataConfig) -> Result<Self, GraphMetaError> {
        config.validate()?;
        wait_until_ready(backend.as_ref(), &config);

        let store = Arc::new(MetadataStore::new(backend, config.record_label.clone()));
        let counts = Arc::new(CountsAggregator::new(Arc::clone(&store)));
        let properties = Arc::new(PropertyAggregator::new(Arc::clone(&store), config.debounce));
        let cache = config.cache_dir.as_ref().map(SnapshotCache::new);

        let bootstrap = match cold_start(&store, &properties, cache.as_ref())? {
            Some((bootstrap, record)) => {
                info!(
                    entries = record.counts.len(),
                    labels = record.properties.len(),
                    source = ?bootstrap,
                    "service.bootstrap.cold_start"
                );
                bootstrap
            }
            None => {
                let record = full_recompute(&counts, &properties, cache.as_ref())?;
                info!(
                    entries = record.counts.len(),
                    labels = record.properties.len(),
                    "service.bootstrap.recomputed"
                );
                Bootstrap::Recomputed
            }
        };

        let router = MutationRouter::new(Arc::clone(&counts), Arc::clone(&properties));
        let scheduler = Scheduler::start(
            Arc::clone(&counts),
            Arc::clone(&properties),
            cache.clone(),
            &config,
        )?;
        Ok(Self {
            config,
            store,
            counts,
            properties,
            router,
            scheduler,
            cache,
            bootstrap,
        })
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    pub fn bootstrap(&self) -> Bootstrap {
        self.bootstrap
    }

    pub fn store(&self) -> &Arc<MetadataStore<B>> {
        &self.store
    }

    pub fn counts(&self) -> &Arc<CountsAggregator<B>> {
        &self.counts
    }

    pub fn properties(&self) -> &Arc<PropertyAggregator<B>> {
        &self.properties
    }

    pub fn scheduler(&self) -> &Scheduler<B> {
        &self.scheduler
    }

    pub fn apply(&self, batch: &MutationBatch) -> RouteReport {
        self.router.route(batch)
    }

    pub fn snapshot(&self) -> Result<MetadataRecord, GraphMetaError> {
        self.store.load()
    }

    pub fn live_properties(&self) -> PropertyIndex {
        self.properties.snapshot()
    }

    pub fn sync_properties(&self, force: bool) -> Result<SyncOutcome, GraphMetaError> {
        self.properties.sync(force)
    }

    pub fn trigger_refresh(&self) -> Result<MetadataRecord, GraphMetaError> {
        self.scheduler.trigger_refresh()
    }

    /// Stops the workers, flushes pending property changes and snapshots the
    /// record for the next cold start.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        if self.properties.is_dirty() {
            if let Err(err) = self.properties.sync(true) {
                warn!(error = %err, "service.final_sync_failed");
            }
        }
        if let Some(cache) = &self.cache {
            let written = self
                .store
                .load()
                .and_then(|record| cache.store(self.store.label(), &record));
            if let Err(err) = written {
                warn!(error = %err, "service.final_snapshot_failed");
            }
        }
    }
}

fn wait_until_ready<B: MetadataBackend>(backend: &B, config: &MetadataConfig) {
    let mut announced = false;
    while !backend.is_ready() {
        if !announced {
            info!(
                poll_ms = config.ready_poll_interval.as_millis() as u64,
                "service.waiting_for_storage"
            );
            announced = true;
        }
        thread::sleep(config.ready_poll_interval);
    }
}

fn cold_start<B: MetadataBackend>(
    store: &MetadataStore<B>,
    properties: &PropertyAggregator<B>,
    cache: Option<&SnapshotCache>,
) -> Result<Option<(Bootstrap, MetadataRecord)>, GraphMetaError> {
    let Some(cache) = cache else {
        return Ok(None);
    };
    match store.load_existing() {
        Ok(Some(record)) => {
            properties.seed(record.properties.clone());
            return Ok(Some((Bootstrap::Persisted, record)));
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "service.record_unreadable"),
    }
    let record = match cache.load(store.label()) {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(None),
        Err(err) => {
            warn!(error = %err, "service.snapshot_unreadable");
            return Ok(None);
        }
    };
    store.replace_counts(&record.counts)?;
    store.replace_properties(&record.properties)?;
    properties.seed(record.properties.clone());
    Ok(Some((Bootstrap::Snapshot, record)))
}
