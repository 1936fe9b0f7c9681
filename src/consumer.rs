//! Consumer pipeline: receive fragments, rebuild compressed blocks,
//! decompress them in parallel, and write the results in block order.
//!
//! Decompression runs out of order for throughput; the commit loop releases
//! blocks to the output file strictly by `block_id`, so the written bytes
//! always match the original file. Only the receive thread touches the
//! channel, the assembly table, and the reorder buffer.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::channel::Channel;
use crate::codec;
use crate::config::DEFAULT_CHANNEL_NAME;
use crate::error::{Error, Result};
use crate::order::CommitQueue;
use crate::shm::ShmRegion;
use crate::slot::Frame;
use crate::threadpool::WorkerPool;

pub struct ConsumerOptions {
    /// Name of the shared memory object to attach to (and unlink on exit).
    pub channel_name: String,
    /// Decompression worker threads.
    pub workers: usize,
    /// On a block that fails to decompress: warn and keep going instead of
    /// aborting. The skipped block's bytes are lost.
    pub skip_corrupt: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            workers: crate::config::default_nb_workers(),
            skip_corrupt: false,
        }
    }
}

#[derive(Debug)]
pub struct ConsumerStats {
    pub blocks: u32,
    pub output_bytes: u64,
    pub elapsed: Duration,
}

/// Rebuilds compressed blocks from the fragment stream.
///
/// Fragments of one block must arrive with consecutive `fragment_seq`
/// starting at 0; anything else is corruption. The empty-file marker is the
/// only legal zero-length fragment and completes block 0 with no bytes.
struct Reassembler {
    // block_id -> (next expected fragment_seq, bytes so far)
    partial: HashMap<u32, (u32, Vec<u8>)>,
}

impl Reassembler {
    fn new() -> Self {
        Reassembler {
            partial: HashMap::new(),
        }
    }

    /// Feed one data frame. Returns the completed `(block_id, compressed)`
    /// pair when the frame closes its block.
    fn accept(&mut self, frame: &Frame) -> Result<Option<(u32, Vec<u8>)>> {
        if frame.is_empty_file_marker() && !self.partial.contains_key(&0) {
            return Ok(Some((0, Vec::new())));
        }
        if frame.payload.is_empty() {
            return Err(Error::Protocol(format!(
                "zero-length fragment for block {} (seq {})",
                frame.block_id, frame.fragment_seq
            )));
        }

        let entry = self
            .partial
            .entry(frame.block_id)
            .or_insert_with(|| (0, Vec::new()));
        if frame.fragment_seq != entry.0 {
            return Err(Error::Protocol(format!(
                "block {}: expected fragment {}, got {}",
                frame.block_id, entry.0, frame.fragment_seq
            )));
        }
        entry.0 += 1;
        entry.1.extend_from_slice(&frame.payload);

        if !frame.last_fragment {
            return Ok(None);
        }
        let (_, compressed) = self
            .partial
            .remove(&frame.block_id)
            .ok_or_else(|| Error::Protocol(format!("block {} vanished", frame.block_id)))?;
        Ok(Some((frame.block_id, compressed)))
    }

    fn incomplete(&self) -> usize {
        self.partial.len()
    }
}

/// Receive the stream into `output_path`. Returns once the end-of-stream
/// frame has been seen and every block is committed; unlinks the region.
pub fn run(output_path: &Path, opts: &ConsumerOptions) -> Result<ConsumerStats> {
    let start = Instant::now();

    let mut output = File::create(output_path)?;
    let channel = Channel::open(&opts.channel_name)?;
    let pool = WorkerPool::new(opts.workers)?;
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(u32, Result<Vec<u8>>)>();

    let mut assembler = Reassembler::new();
    let mut ready: CommitQueue<Result<Vec<u8>>> = CommitQueue::new();
    let mut in_flight = 0usize;
    let mut blocks = 0u32;
    let mut output_bytes = 0u64;

    info!("waiting for data on {}", opts.channel_name);
    loop {
        let frame = channel.recv()?;
        debug!(
            "received block={} seq={} last={} len={}",
            frame.block_id,
            frame.fragment_seq,
            frame.last_fragment,
            frame.payload.len()
        );

        if frame.is_end_of_stream() {
            if assembler.incomplete() > 0 {
                return Err(Error::Protocol(format!(
                    "end of stream with {} incomplete block(s)",
                    assembler.incomplete()
                )));
            }
            debug!("end-of-stream received");
            break;
        }

        if let Some((block_id, compressed)) = assembler.accept(&frame)? {
            debug!(
                "block {} assembled ({} compressed bytes)",
                block_id,
                compressed.len()
            );
            let result_tx = result_tx.clone();
            pool.spawn(move || {
                let _ = result_tx.send((block_id, codec::decompress(&compressed)));
            });
            in_flight += 1;
        }

        // Park whatever the workers finished meanwhile, then commit every
        // block that is next in line. Stop at the first gap or still-running
        // decompression.
        while let Ok((block_id, result)) = result_rx.try_recv() {
            ready.insert(block_id, result);
            in_flight -= 1;
        }
        commit_ready(&mut ready, &mut output, opts, &mut blocks, &mut output_bytes)?;
    }

    // Sentinel seen: await the remaining decompressions in block order.
    while in_flight > 0 {
        let (block_id, result) = result_rx
            .recv()
            .map_err(|_| Error::Pool("decompression workers exited early".to_string()))?;
        ready.insert(block_id, result);
        in_flight -= 1;
        commit_ready(&mut ready, &mut output, opts, &mut blocks, &mut output_bytes)?;
    }
    if !ready.is_empty() {
        return Err(Error::Protocol(format!(
            "stream ended with a gap before block {}",
            ready.next_expected()
        )));
    }

    output.flush()?;
    drop(channel);
    ShmRegion::unlink(&opts.channel_name);

    let stats = ConsumerStats {
        blocks,
        output_bytes,
        elapsed: start.elapsed(),
    };
    info!(
        "done: {} block(s), {} bytes written in {:.3}s",
        stats.blocks,
        stats.output_bytes,
        stats.elapsed.as_secs_f64()
    );
    Ok(stats)
}

/// Release every ready in-order block to the output file.
fn commit_ready(
    ready: &mut CommitQueue<Result<Vec<u8>>>,
    output: &mut File,
    opts: &ConsumerOptions,
    blocks: &mut u32,
    output_bytes: &mut u64,
) -> Result<()> {
    while let Some((block_id, result)) = ready.pop_next() {
        match result {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    output.write_all(&bytes)?;
                    output.flush()?;
                }
                debug!("block {} committed ({} bytes)", block_id, bytes.len());
                *output_bytes += bytes.len() as u64;
                *blocks += 1;
            }
            Err(err) if opts.skip_corrupt => {
                warn!("block {} skipped: {}", block_id, err);
                *blocks += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(block_id: u32, seq: u32, last: bool, payload: &[u8]) -> Frame {
        Frame::data(block_id, seq, last, payload)
    }

    #[test]
    fn assembles_fragments_in_order() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(&data(0, 0, false, b"ab")).unwrap(), None);
        assert_eq!(r.accept(&data(0, 1, false, b"cd")).unwrap(), None);
        assert_eq!(
            r.accept(&data(0, 2, true, b"e")).unwrap(),
            Some((0, b"abcde".to_vec()))
        );
        assert_eq!(r.incomplete(), 0);
    }

    #[test]
    fn interleaved_blocks_keep_separate_buffers() {
        // The producer never interleaves blocks, but the assembly table is
        // keyed by id and must not mix them up if it did.
        let mut r = Reassembler::new();
        assert_eq!(r.accept(&data(0, 0, false, b"one")).unwrap(), None);
        assert_eq!(r.accept(&data(1, 0, false, b"two")).unwrap(), None);
        assert_eq!(
            r.accept(&data(1, 1, true, b"!")).unwrap(),
            Some((1, b"two!".to_vec()))
        );
        assert_eq!(
            r.accept(&data(0, 1, true, b"!")).unwrap(),
            Some((0, b"one!".to_vec()))
        );
    }

    #[test]
    fn fragment_gap_is_corruption() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(&data(3, 0, false, b"x")).unwrap(), None);
        assert!(matches!(
            r.accept(&data(3, 2, true, b"y")),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn fragment_restart_is_corruption() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(&data(3, 0, false, b"x")).unwrap(), None);
        assert!(matches!(
            r.accept(&data(3, 0, true, b"y")),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn empty_file_marker_completes_block_zero_empty() {
        let mut r = Reassembler::new();
        assert_eq!(
            r.accept(&Frame::empty_file_marker()).unwrap(),
            Some((0, Vec::new()))
        );
    }

    #[test]
    fn zero_length_fragment_mid_block_is_corruption() {
        let mut r = Reassembler::new();
        assert_eq!(r.accept(&data(0, 0, false, b"x")).unwrap(), None);
        // Looks like the empty-file marker, but block 0 is mid-assembly.
        assert!(matches!(
            r.accept(&data(0, 1, true, &[])),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn zero_length_fragment_on_other_block_is_corruption() {
        let mut r = Reassembler::new();
        assert!(matches!(
            r.accept(&data(5, 0, true, &[])),
            Err(Error::Protocol(_))
        ));
    }
}
