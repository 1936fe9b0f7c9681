//! Crate-wide error type.
//!
//! Resource errors ([`Error::Resource`], [`Error::Io`]) are fatal to the
//! affected peer. Codec errors abort the consumer unless it was started with
//! skip-on-corruption. Protocol errors indicate a corrupted or misbehaving
//! peer and always abort.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A shared-memory operation (open, truncate, map) failed.
    #[error("shared memory {name}: {op} failed: {source}")]
    Resource {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    /// File or channel I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The worker pool could not be built or lost its workers.
    #[error("worker pool: {0}")]
    Pool(String),

    /// Decompression produced no usable output for a non-empty input.
    #[error("zlib inflate failed: {0}")]
    Codec(String),

    /// The peer violated the framing protocol; the stream is corrupt.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
