use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("corpus is empty")]
    EmptyCorpus,

    /// Every term fell outside the document-frequency bounds.
    #[error("no terms remain after pruning {documents} documents")]
    EmptyVocabulary { documents: usize },

    /// Row count of the corpus matrix differs from the metadata length.
    #[error("repository misaligned: {rows} rows but {metadata} metadata entries")]
    Misaligned { rows: usize, metadata: usize },

    #[error("corrupt model artifact: {0}")]
    CorruptModel(String),

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("worker {worker} aborted after {faults} faults")]
    WorkerAborted { worker: usize, faults: usize },

    #[error("build aborted")]
    BuildAborted,
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self { Error::InvalidConfig(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
