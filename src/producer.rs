//! Producer pipeline: read the input, compress blocks in parallel, stream
//! the compressed bytes through the channel as bounded fragments.
//!
//! Compression jobs for every block are launched eagerly; the framing loop
//! consumes their results in strict `block_id` order, holding early
//! finishers in a reorder buffer. Only the framing thread touches the
//! channel.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::channel::Channel;
use crate::codec;
use crate::config::{DEFAULT_CHANNEL_NAME, MAX_PAYLOAD, UNCOMPRESSED_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::order::CommitQueue;
use crate::slot::Frame;
use crate::threadpool::WorkerPool;

pub struct ProducerOptions {
    /// Name of the shared memory object to create.
    pub channel_name: String,
    /// Compression worker threads.
    pub workers: usize,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        ProducerOptions {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            workers: crate::config::default_nb_workers(),
        }
    }
}

/// Transfer summary, logged and returned for callers that want it.
#[derive(Debug)]
pub struct ProducerStats {
    pub input_bytes: u64,
    pub blocks: u32,
    pub compressed_bytes: u64,
    pub elapsed: Duration,
}

/// Stream `input_path` into the channel. Returns once the end-of-stream
/// frame has been posted.
pub fn run(input_path: &Path, opts: &ProducerOptions) -> Result<ProducerStats> {
    let start = Instant::now();

    let content = fs::read(input_path)?;
    let input_bytes = content.len() as u64;
    let nb_blocks = content.len().div_ceil(UNCOMPRESSED_BLOCK_SIZE) as u32;
    info!(
        "input {}: {} bytes, {} block(s) of {} bytes",
        input_path.display(),
        input_bytes,
        nb_blocks,
        UNCOMPRESSED_BLOCK_SIZE
    );

    let channel = Channel::create(&opts.channel_name)?;

    let mut compressed_bytes = 0u64;
    if nb_blocks == 0 {
        info!("input is empty; sending the empty-file marker");
        channel.send(&Frame::empty_file_marker());
    } else {
        let pool = WorkerPool::new(opts.workers)?;
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(u32, Vec<u8>)>();

        for (index, block) in content.chunks(UNCOMPRESSED_BLOCK_SIZE).enumerate() {
            let block = block.to_vec();
            let result_tx = result_tx.clone();
            pool.spawn(move || {
                let _ = result_tx.send((index as u32, codec::compress(&block)));
            });
        }
        drop(content);
        drop(result_tx);

        let mut ready: CommitQueue<Vec<u8>> = CommitQueue::new();
        while ready.next_expected() < nb_blocks {
            let (block_id, compressed) = result_rx
                .recv()
                .map_err(|_| Error::Pool("compression workers exited early".to_string()))?;
            ready.insert(block_id, compressed);

            while let Some((block_id, compressed)) = ready.pop_next() {
                compressed_bytes += compressed.len() as u64;
                send_block(&channel, block_id, &compressed);
                let sent = block_id + 1;
                if sent % 10 == 0 || sent == nb_blocks {
                    info!("sent {}/{} blocks", sent, nb_blocks);
                }
            }
        }
    }

    debug!("posting end-of-stream");
    channel.send_final(&Frame::end_of_stream());

    let stats = ProducerStats {
        input_bytes,
        blocks: nb_blocks,
        compressed_bytes,
        elapsed: start.elapsed(),
    };
    info!(
        "done: {} bytes in, {} compressed bytes out in {:.3}s",
        stats.input_bytes,
        stats.compressed_bytes,
        stats.elapsed.as_secs_f64()
    );
    if stats.input_bytes > 0 {
        info!(
            "compression ratio: {:.2}%",
            100.0 * (1.0 - stats.compressed_bytes as f64 / stats.input_bytes as f64)
        );
    }
    Ok(stats)
}

/// Emit one compressed block as a strictly sequential fragment run.
///
/// Every fragment waits for the consumer's acknowledgement before the next
/// one is posted; `last_fragment` is raised exactly once, on the fragment
/// that reaches the end of the block.
pub(crate) fn send_block(channel: &Channel, block_id: u32, compressed: &[u8]) {
    debug_assert!(!compressed.is_empty());
    let mut offset = 0usize;
    let mut seq = 0u32;
    while offset < compressed.len() {
        let take = MAX_PAYLOAD.min(compressed.len() - offset);
        let last = offset + take == compressed.len();
        channel.send(&Frame::data(
            block_id,
            seq,
            last,
            &compressed[offset..offset + take],
        ));
        offset += take;
        seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::ShmRegion;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "/shmpress-prod-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn collect_block(channel: &Channel) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = channel.recv().unwrap();
            let done = frame.last_fragment;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    #[test]
    fn fragments_are_sequential_and_bounded() {
        let name = unique_name("frag");
        let producer = Channel::create(&name).unwrap();
        let consumer = Channel::open(&name).unwrap();

        // 3 full fragments plus a 50 byte tail.
        let payload: Vec<u8> = (0..MAX_PAYLOAD * 3 + 50).map(|i| i as u8).collect();
        let expected = payload.clone();

        let receiver = thread::spawn(move || collect_block(&consumer));
        send_block(&producer, 4, &payload);
        let frames = receiver.join().unwrap();

        assert_eq!(frames.len(), 4);
        let mut reassembled = Vec::new();
        for (seq, frame) in frames.iter().enumerate() {
            assert_eq!(frame.block_id, 4);
            assert_eq!(frame.fragment_seq, seq as u32);
            assert!(frame.payload.len() <= MAX_PAYLOAD);
            assert_eq!(frame.last_fragment, seq == frames.len() - 1);
            reassembled.extend_from_slice(&frame.payload);
        }
        assert_eq!(reassembled, expected);
        ShmRegion::unlink(&name);
    }

    #[test]
    fn short_block_is_a_single_final_fragment() {
        let name = unique_name("short");
        let producer = Channel::create(&name).unwrap();
        let consumer = Channel::open(&name).unwrap();

        let receiver = thread::spawn(move || collect_block(&consumer));
        send_block(&producer, 0, b"tiny");
        let frames = receiver.join().unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].fragment_seq, 0);
        assert!(frames[0].last_fragment);
        assert_eq!(frames[0].payload, b"tiny");
        ShmRegion::unlink(&name);
    }

    #[test]
    fn empty_input_sends_marker_then_sentinel() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("empty.bin");
        std::fs::write(&input, b"").unwrap();

        let name = unique_name("marker");
        let receiver_name = name.clone();
        let receiver = thread::spawn(move || {
            let channel = Channel::open(&receiver_name).unwrap();
            let first = channel.recv().unwrap();
            let second = channel.recv().unwrap();
            (first, second)
        });

        let opts = ProducerOptions {
            channel_name: name.clone(),
            workers: 1,
        };
        let stats = run(&input, &opts).unwrap();
        assert_eq!(stats.blocks, 0);
        assert_eq!(stats.compressed_bytes, 0);

        let (first, second) = receiver.join().unwrap();
        assert!(first.is_empty_file_marker());
        assert!(second.is_end_of_stream());
        ShmRegion::unlink(&name);
    }

    #[test]
    fn exact_multiple_of_payload_has_no_empty_tail() {
        let name = unique_name("exact");
        let producer = Channel::create(&name).unwrap();
        let consumer = Channel::open(&name).unwrap();

        let payload = vec![0x11u8; MAX_PAYLOAD * 2];
        let receiver = thread::spawn(move || collect_block(&consumer));
        send_block(&producer, 0, &payload);
        let frames = receiver.join().unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload.len(), MAX_PAYLOAD);
        assert!(frames[1].last_fragment);
        ShmRegion::unlink(&name);
    }
}
