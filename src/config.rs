use std::path::PathBuf;
use std::time::Duration;

use crate::errors::GraphMetaError;

pub const DEFAULT_RECORD_LABEL: &str = "graph_metadata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    pub record_label: String,
    pub sync_delay: Duration,
    pub sync_interval: Duration,
    pub debounce: Duration,
    pub refresh_delay: Duration,
    pub refresh_interval: Duration,
    pub ready_poll_interval: Duration,
    pub cache_dir: Option<PathBuf>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            record_label: DEFAULT_RECORD_LABEL.to_string(),
            sync_delay: Duration::from_secs(30),
            sync_interval: Duration::from_secs(30),
            debounce: Duration::from_secs(60),
            refresh_delay: Duration::from_secs(24 * 60 * 60),
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            ready_poll_interval: Duration::from_millis(100),
            cache_dir: None,
        }
    }
}

impl MetadataConfig {
    pub fn with_record_label<L: Into<String>>(mut self, label: L) -> Self {
        self.record_label = label.into();
        self
    }

    pub fn with_sync(mut self, delay: Duration, interval: Duration) -> Self {
        self.sync_delay = delay;
        self.sync_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_refresh(mut self, delay: Duration, interval: Duration) -> Self {
        self.refresh_delay = delay;
        self.refresh_interval = interval;
        self
    }

    pub fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<(), GraphMetaError> {
        if self.record_label.trim().is_empty() {
            return Err(GraphMetaError::invalid_input("record label must be set"));
        }
        if self.sync_interval.is_zero() || self.refresh_interval.is_zero() {
            return Err(GraphMetaError::invalid_input(
                "sync and refresh intervals must be non-zero",
            ));
        }
        if self.ready_poll_interval.is_zero() {
            return Err(GraphMetaError::invalid_input(
                "ready poll interval must be non-zero",
            ));
        }
        Ok(())
    }
}
