//! Incrementally maintained label-set statistics for a labeled property graph.
//!
//! Committed transactions arrive as [`MutationBatch`] values and are routed to
//! the counts and property aggregators, which keep a single metadata record up
//! to date. Background workers periodically recompute the record from scratch.
//! Run the routing benchmark with `cargo bench`.

pub mod backend;
pub mod cache;
pub mod config;
pub mod counts;
pub mod drift;
pub mod errors;
pub mod events;
pub mod graph;
pub mod label_set;
pub mod properties;
pub mod record;
pub mod router;
pub mod scheduler;
pub mod schema;
pub mod service;

pub use crate::backend::{GraphReader, MetadataBackend, RecordStore, SharedGraph};
pub use crate::config::MetadataConfig;
pub use crate::counts::{CountOutcome, CountsAggregator};
pub use crate::errors::GraphMetaError;
pub use crate::events::MutationBatch;
pub use crate::graph::{GraphTransaction, SqliteGraph};
pub use crate::label_set::{CanonicalKey, LabelSet};
pub use crate::properties::{PropertyAggregator, SyncOutcome};
pub use crate::record::{CountEntry, CountsMap, MetadataRecord, MetadataStore, PropertyIndex};
pub use crate::router::{MutationRouter, RouteReport};
pub use crate::service::{Bootstrap, MetadataService};
