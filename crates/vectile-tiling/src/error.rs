use crate::ops::OpKind;
use thiserror::Error;

/// Planning failures. Shape and capability failures abort compilation of the
/// operator instance; the overflow case is handled internally by skipping the
/// cache store; corruption indicates a key collision or version skew and is
/// always fatal.
#[derive(Debug, Error)]
pub enum TilingError {
    #[error("shape rejected: {0}")]
    Shape(String),

    #[error("capability descriptor rejected: {0}")]
    Caps(String),

    #[error(
        "no tiling strategy for {op} fits reduce_len={reduce_len} outer={outer} \
         in {scratch_bytes}B of scratch"
    )]
    NotCapable {
        op: OpKind,
        reduce_len: u64,
        outer: u64,
        scratch_bytes: usize,
    },

    #[error("serialized plan needs {needed}B, blob capacity is {cap}B")]
    SerializationOverflow { needed: usize, cap: usize },

    #[error("cache entry {key:#018x} holds {stored}B, kernel variant expects {expected}B")]
    CacheCorruption {
        key: u64,
        stored: usize,
        expected: usize,
    },
}

pub type Result<T> = std::result::Result<T, TilingError>;
