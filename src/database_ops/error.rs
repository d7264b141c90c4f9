use thiserror::Error;

/// Storage failures, classified once at the driver boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Connectivity is gone; nothing further can be written.
    #[error("storage connection lost: {0}")]
    Connection(String),
    /// The target schema is not what the engine writes into.
    #[error("schema mismatch: {0}")]
    Schema(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// Deadlock or serialization failure; the whole row transaction may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Schema(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => Self::Connection(message),
            sqlx::Error::ColumnNotFound(_) | sqlx::Error::TypeNotFound { .. } => {
                Self::Schema(message)
            }
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                classify_sqlstate(&code, message)
            }
            _ => Self::Query(message),
        }
    }
}

fn classify_sqlstate(code: &str, message: String) -> StoreError {
    match code {
        // undefined_table, undefined_column, undefined_function, invalid_schema_name,
        // and ON CONFLICT targets without a matching unique index
        "42P01" | "42703" | "42883" | "3F000" | "42P10" => StoreError::Schema(message),
        "57P01" | "57P02" | "57P03" => StoreError::Connection(message),
        "40001" | "40P01" => StoreError::Conflict(message),
        c if c.starts_with("08") => StoreError::Connection(message),
        c if c.starts_with("23") => StoreError::Constraint(message),
        _ => StoreError::Query(message),
    }
}

/// A source record that cannot be turned into a typed game row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("missing AppID")]
    MissingKey,
    #[error("invalid AppID {0:?}")]
    InvalidKey(String),
    #[error("app {0}: missing Name")]
    MissingName(i64),
    #[error("field {field}: cannot parse {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("field {field}: {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unreadable source record: {0}")]
    Unreadable(String),
    #[error("app {0}: duplicate AppID rejected")]
    Duplicate(i64),
}

impl RecordError {
    pub fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

/// Why one row did not make it into the catalog.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Fatal errors stop the batch; everything else is charged to the row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_fatal())
    }
}
