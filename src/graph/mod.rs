pub mod scan;
mod sqlite_graph;
mod transaction;
pub mod types;

pub use sqlite_graph::SqliteGraph;
pub use transaction::GraphTransaction;
