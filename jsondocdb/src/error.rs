use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocDbError {
    #[error("No such document: {0}")]
    NoSuchDocument(String),

    #[error("Document already exists: {0}")]
    DocumentExists(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("No such index: {0}")]
    NoSuchIndex(String),

    #[error("Index specification error: {0}")]
    IndexSpecification(String),

    #[error("Document {document}, index {index}, key {key} is not unique")]
    NotUnique {
        index: String,
        document: String,
        key: String,
    },

    #[error("Document {document}, index {index}: key {key} is not a scalar or list of scalars")]
    InvalidKeyType {
        index: String,
        document: String,
        key: String,
    },

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DocDbError>;
