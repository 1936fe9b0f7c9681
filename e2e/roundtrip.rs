// e2e/roundtrip.rs — full producer/consumer round-trips over real shared
// memory, both sides driven in-process on separate threads.
//
// Each test uses its own uniquely named region so tests can run in parallel
// and never collide with another process.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use shmpress::config::UNCOMPRESSED_BLOCK_SIZE;
use shmpress::consumer::{self, ConsumerOptions};
use shmpress::producer::{self, ProducerOptions};
use shmpress::ShmRegion;

fn unique_channel(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "/shmpress-e2e-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Run both sides to completion and return (producer blocks, consumer blocks).
fn transfer(channel: &str, input: &Path, output: &Path) -> (u32, u32) {
    let producer_opts = ProducerOptions {
        channel_name: channel.to_string(),
        workers: 2,
    };
    let consumer_opts = ConsumerOptions {
        channel_name: channel.to_string(),
        workers: 2,
        skip_corrupt: false,
    };

    let input = input.to_path_buf();
    let producer = thread::spawn(move || producer::run(&input, &producer_opts).unwrap());
    let consumer_stats = consumer::run(output, &consumer_opts).unwrap();
    let producer_stats = producer.join().unwrap();
    (producer_stats.blocks, consumer_stats.blocks)
}

fn roundtrip(tag: &str, content: &[u8]) -> (u32, u32) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    fs::write(&input, content).unwrap();

    let channel = unique_channel(tag);
    let stats = transfer(&channel, &input, &output);

    let recovered = fs::read(&output).unwrap();
    assert_eq!(recovered, content, "output must match input byte for byte");
    stats
}

// ── S1: empty input ──────────────────────────────────────────────────────────

#[test]
fn empty_file() {
    let (produced, consumed) = roundtrip("empty", &[]);
    assert_eq!(produced, 0);
    // The empty-file marker still counts as one committed (empty) block.
    assert_eq!(consumed, 1);
}

// ── S2: tiny ASCII input ─────────────────────────────────────────────────────

#[test]
fn hello_world() {
    let (produced, _) = roundtrip("hello", b"hello world");
    assert_eq!(produced, 1);
}

// ── S3 / S4: block size boundaries ──────────────────────────────────────────

#[test]
fn exactly_one_block_of_zeroes() {
    let content = vec![0u8; UNCOMPRESSED_BLOCK_SIZE];
    let (produced, consumed) = roundtrip("oneblock", &content);
    assert_eq!(produced, 1);
    assert_eq!(consumed, 1);
}

#[test]
fn one_byte_past_a_block() {
    let content = vec![0u8; UNCOMPRESSED_BLOCK_SIZE + 1];
    let (produced, consumed) = roundtrip("boundary", &content);
    assert_eq!(produced, 2);
    assert_eq!(consumed, 2);
}

#[test]
fn single_byte_file() {
    let (produced, _) = roundtrip("onebyte", b"\xFF");
    assert_eq!(produced, 1);
}

// ── S5: 1 MiB of incompressible data, 16 blocks ─────────────────────────────

#[test]
fn one_mebibyte_random() {
    // Deterministic xorshift noise; incompressible like random bytes but
    // reproducible on failure.
    let mut state = 0x0123_4567_89AB_CDEFu64;
    let content: Vec<u8> = (0..1024 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();

    let (produced, consumed) = roundtrip("mega", &content);
    assert_eq!(produced, 16);
    assert_eq!(consumed, 16);
}

// ── Highly compressible multi-block input ───────────────────────────────────

#[test]
fn repetitive_multi_block() {
    let content: Vec<u8> = b"the same line over and over\n"
        .iter()
        .copied()
        .cycle()
        .take(3 * UNCOMPRESSED_BLOCK_SIZE + 17)
        .collect();
    let (produced, _) = roundtrip("repeat", &content);
    assert_eq!(produced, 4);
}

// ── S6: consumer starts first ───────────────────────────────────────────────

#[test]
fn consumer_first_start_order() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    let content = b"slow producer, patient consumer".repeat(2000);
    fs::write(&input, &content).unwrap();

    let channel = unique_channel("order");
    let consumer_opts = ConsumerOptions {
        channel_name: channel.clone(),
        workers: 2,
        skip_corrupt: false,
    };
    let out = output.clone();
    let consumer = thread::spawn(move || consumer::run(&out, &consumer_opts).unwrap());

    // Let the consumer attach and poll the empty slot for a while.
    thread::sleep(Duration::from_millis(100));

    let producer_opts = ProducerOptions {
        channel_name: channel.clone(),
        workers: 2,
    };
    producer::run(&input, &producer_opts).unwrap();
    consumer.join().unwrap();

    assert_eq!(fs::read(&output).unwrap(), content);
}

// ── Teardown: the consumer removes the region name ──────────────────────────

#[test]
fn consumer_unlinks_the_region() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    fs::write(&input, b"teardown").unwrap();

    let channel = unique_channel("teardown");
    transfer(&channel, &input, &output);

    // After a completed run the name is gone; re-opening creates a fresh,
    // zeroed region rather than finding the old one, whose block_id field
    // still holds the end-of-stream id.
    let fresh = ShmRegion::open(&channel, 256).unwrap();
    let block_id = unsafe { (fresh.as_mut_ptr().add(8) as *const u32).read_unaligned() };
    assert_eq!(block_id, 0);
    ShmRegion::unlink(&channel);
}
