use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum BufferError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for device")]
    Timeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid channel {0}")]
    InvalidChannel(usize),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing sample source")]
    MissingSource,
    #[error("missing rotary sensor")]
    MissingRotary,
    #[error("missing motor drive")]
    MissingDrive,
    #[error("missing protocol link")]
    MissingLink,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Failures decoding or encoding the persisted state blob.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("state blob truncated ({0} bytes)")]
    Truncated(usize),
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u16),
    #[error("state payload: {0}")]
    Payload(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
