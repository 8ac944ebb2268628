use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("device timeout")]
    Timeout,
    #[error("{0} disconnected")]
    Disconnected(&'static str),
    #[error("device fault: {0}")]
    Fault(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
