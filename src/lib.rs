//! Shared-memory file transfer with in-flight per-block compression.
//!
//! A producer process reads a file, splits it into fixed-size blocks,
//! compresses the blocks in parallel, and streams the compressed bytes to a
//! consumer process through a single-slot mailbox in POSIX shared memory.
//! The consumer reassembles and decompresses the blocks in parallel and
//! writes the original bytes back out in block order.
//!
//! The `producer` and `consumer` binaries wrap [`producer::run`] and
//! [`consumer::run`]; everything in between is library code so the whole
//! pipeline can be driven in-process by tests.

pub mod channel;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod order;
pub mod producer;
pub mod shm;
pub mod slot;
pub mod threadpool;

pub use channel::Channel;
pub use error::{Error, Result};
pub use shm::ShmRegion;
pub use slot::{Frame, END_OF_STREAM};
pub use threadpool::WorkerPool;
