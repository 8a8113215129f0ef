use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphMetaError {
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("corrupt metadata record: {0}")]
    CorruptRecord(String),
    #[error("snapshot cache error: {0}")]
    CacheError(String),
    #[error("encode error: {0}")]
    EncodeError(String),
    #[error("worker error: {0}")]
    WorkerError(String),
}

impl GraphMetaError {
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::ConnectionError(msg.into())
    }

    pub fn schema<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::SchemaError(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::QueryError(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::NotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::InvalidInput(msg.into())
    }

    pub fn corrupt_record<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::CorruptRecord(msg.into())
    }

    pub fn cache<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::CacheError(msg.into())
    }

    pub fn encode<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::EncodeError(msg.into())
    }

    pub fn worker<T: Into<String>>(msg: T) -> Self {
        GraphMetaError::WorkerError(msg.into())
    }
}
