use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("broken data file '{file}': {reason}")]
    DataFile { file: String, reason: String },
    #[error("worker link closed: {0}")]
    Disconnected(String),
    #[error("message payload mismatch: {0}")]
    Payload(String),
    #[error(transparent)]
    SerializationFailed(#[from] std::boxed::Box<bincode::ErrorKind>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
