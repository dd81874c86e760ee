//! Error types

/// Failure to build the bounded allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("slot size {entry_size} cannot hold the {min} byte block prefix")]
    SlotTooSmall { entry_size: usize, min: usize },

    #[error("pool of {entries} x {entry_size} bytes does not fit in memory")]
    PoolTooLarge { entries: usize, entry_size: usize },

    #[error("no fixed slots and heap fallback disabled: nothing can be allocated")]
    NoCapacity,

    #[error("out of memory allocating {bytes} byte pool")]
    OutOfMemory { bytes: usize },
}

/// Failure to decode an entry. Seeing one means the buffer was not produced
/// by the encoder or was not delimited correctly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("entry truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid severity {0} in header")]
    InvalidSeverity(u8),

    #[error("invalid arity {0} in header")]
    InvalidArity(u8),

    #[error("invalid field tag {0:#04x}")]
    InvalidTag(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("literal id {0} is not registered")]
    UnknownLiteral(u32),
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Why a backend failed to start. Reported through `tracing` when
/// [`crate::Logger::init_backend`] returns `TriedButFailed`.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to build entry pool: {0}")]
    Alloc(#[from] AllocError),

    #[error("failed to start backend: {0}")]
    Io(#[from] std::io::Error),
}
