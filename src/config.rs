// config.rs — Compile-time configuration constants.

/// Default name of the POSIX shared memory object carrying the channel.
/// Both peers must agree on it; override with `--channel` on either side.
pub const DEFAULT_CHANNEL_NAME: &str = "/shm_shr_channel_example";

/// Total size of the shared region in bytes. The slot (header + payload)
/// must fit inside it; the remainder is unused padding.
pub const SHARED_REGION_SIZE: usize = 256;

/// Largest number of payload bytes one slot exchange can carry.
pub const MAX_PAYLOAD: usize = 200;

/// Number of source bytes per block on the producer side. The last block of
/// a file may be shorter.
pub const UNCOMPRESSED_BLOCK_SIZE: usize = 64 * 1024;

/// Default number of (de)compression worker threads.
pub fn default_nb_workers() -> usize {
    num_cpus::get()
}
