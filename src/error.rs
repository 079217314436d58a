use thiserror::Error;

pub type MinerResult<T> = Result<T, MinerError>;

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("invalid tokenizer pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid miner configuration: {0}")]
    InvalidConfig(String),

    #[error("pattern tree not initialized")]
    NotInitialized,

    #[error("tree codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tree store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl MinerError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
