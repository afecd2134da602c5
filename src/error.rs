use thiserror::Error;

/// Engine error taxonomy. Every variant renders as `Tag: detail` so the
/// statement boundary can surface the raw message.
#[derive(Debug, Error)]
pub enum EngineError {
    // catalog
    #[error("DatabaseNotFound: {0}")]
    DatabaseNotFound(String),
    #[error("SchemaNotFound: {0}")]
    SchemaNotFound(String),
    #[error("TableNotFound: {0}")]
    TableNotFound(String),
    #[error("ColumnNotFound: {0}")]
    ColumnNotFound(String),
    #[error("IndexNotFound: {0}")]
    IndexNotFound(String),
    #[error("DuplicateName: {0}")]
    DuplicateName(String),
    #[error("PrimaryIndexExists: table {0} already has a primary index")]
    PrimaryIndexExists(String),

    // data types
    #[error("ValueOutOfRange: {value} does not fit {type_name}")]
    ValueOutOfRange { value: String, type_name: String },
    #[error("ValueTooLong: {len} bytes exceeds declared width {max}")]
    ValueTooLong { len: usize, max: usize },
    #[error("BadTemporalValue: {0}")]
    BadTemporalValue(String),
    #[error("NullViolation: column {0} is NOT NULL")]
    NullViolation(String),

    // predicates
    #[error("DeleteRequiresWhere: DELETE must carry an equality predicate")]
    DeleteRequiresWhere,
    #[error("UnknownPredicateColumn: {0}")]
    UnknownPredicateColumn(String),
    #[error("UnsupportedPredicate: {0}")]
    UnsupportedPredicate(String),

    // files
    #[error("MissingBackingFile: {0}")]
    MissingBackingFile(String),
    #[error("TruncatedHeader: {0}")]
    TruncatedHeader(String),
    #[error("ShortBlock: expected {expected} bytes, got {got}")]
    ShortBlock { expected: usize, got: usize },

    // indexes
    #[error("KeyTooLarge: {len} bytes exceeds key capacity {max}")]
    KeyTooLarge { len: usize, max: usize },
    #[error("CorruptNode: {0}")]
    CorruptNode(String),

    // statements
    #[error("UnsupportedStatement: {0}")]
    UnsupportedStatement(String),
}
