//! Single-slot mailbox over the shared region.
//!
//! The slot is protected by a spin flag in shared memory: a plain host mutex
//! cannot synchronize two processes, so the flag is driven as an atomic word
//! with acquire/release ordering. Acquiring the lock publishes every header
//! and payload write the other peer made before its release; all slot access
//! therefore happens between [`Channel::lock`] and the guard drop.
//!
//! Ownership of the slot contents toggles on `message_available`: the
//! producer may only write while it is 0, the consumer may only read while it
//! is 1. That single flag is also the backpressure mechanism, bounding
//! in-flight data to one fragment.
//!
//! The lock has no fairness and no liveness recovery. A peer dying inside
//! the critical section deadlocks the channel; this is a known limitation of
//! the spin-flag design.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::config::SHARED_REGION_SIZE;
use crate::error::Result;
use crate::shm::ShmRegion;
use crate::slot::{Frame, SlotView};

/// Backoff between failed acquire attempts or empty polls: brief busy spin,
/// then scheduler yields, then 1 ms sleeps. Both peers use the same ladder.
fn backoff(step: &mut u32) {
    if *step < 16 {
        std::hint::spin_loop();
    } else if *step < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *step += 1;
}

/// One end of the shared-memory channel.
pub struct Channel {
    view: SlotView,
    _region: ShmRegion,
}

impl Channel {
    /// Producer-side attach: map the region and reset the slot to its
    /// zeroed initial state. Must run before any traffic.
    pub fn create(name: &str) -> Result<Self> {
        let channel = Self::open(name)?;
        channel.view.zero();
        Ok(channel)
    }

    /// Consumer-side attach: map the region, leaving the slot untouched.
    pub fn open(name: &str) -> Result<Self> {
        let region = ShmRegion::open(name, SHARED_REGION_SIZE)?;
        // The mapping is page-aligned and at least SHARED_REGION_SIZE long.
        let view = unsafe { SlotView::new(region.as_mut_ptr()) };
        Ok(Channel {
            view,
            _region: region,
        })
    }

    /// Acquire the spin flag. The returned guard releases it on every exit
    /// path, panics included.
    fn lock(&self) -> SlotGuard<'_> {
        let mut step = 0u32;
        while self
            .view
            .sync_flag()
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            backoff(&mut step);
        }
        SlotGuard { channel: self }
    }

    /// Deliver one frame and wait until the peer has consumed it.
    ///
    /// Blocks while the slot still holds the previous message, then writes
    /// the frame, raises `message_available`, and blocks again until the
    /// consumer clears it. On return the slot is free for the next fragment.
    pub fn send(&self, frame: &Frame) {
        self.post(frame);
        self.wait_drained();
    }

    /// Deliver one frame without waiting for the peer to consume it. Used
    /// for the final frame of the stream, after which the producer exits.
    pub fn send_final(&self, frame: &Frame) {
        self.post(frame);
    }

    fn post(&self, frame: &Frame) {
        let mut step = 0u32;
        loop {
            let guard = self.lock();
            if !guard.slot().message_available() {
                guard.slot().write_frame(frame);
                guard.slot().set_message_available(true);
                return;
            }
            drop(guard);
            backoff(&mut step);
        }
    }

    fn wait_drained(&self) {
        let mut step = 0u32;
        loop {
            let guard = self.lock();
            let pending = guard.slot().message_available();
            drop(guard);
            if !pending {
                return;
            }
            backoff(&mut step);
        }
    }

    /// Wait for the next frame, copy it out, and free the slot.
    pub fn recv(&self) -> Result<Frame> {
        let mut step = 0u32;
        loop {
            let guard = self.lock();
            if guard.slot().message_available() {
                let frame = guard.slot().read_frame()?;
                guard.slot().set_message_available(false);
                return Ok(frame);
            }
            drop(guard);
            backoff(&mut step);
        }
    }
}

/// Scoped critical section over the slot.
struct SlotGuard<'a> {
    channel: &'a Channel,
}

impl SlotGuard<'_> {
    fn slot(&self) -> &SlotView {
        &self.channel.view
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.channel.view.sync_flag().store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::ShmRegion;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "/shmpress-chan-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn lock_is_mutually_exclusive() {
        let name = unique_name("mutex");
        let channel = Arc::new(Channel::create(&name).unwrap());
        let hits = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let channel = Arc::clone(&channel);
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = channel.lock();
                        // Non-atomic increment under the lock: lost updates
                        // would show up as a short final count.
                        let v = hits.load(Ordering::Relaxed);
                        hits.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::Relaxed), 4000);
        ShmRegion::unlink(&name);
    }

    #[test]
    fn frames_cross_between_mappings() {
        let name = unique_name("xfer");
        let producer = Channel::create(&name).unwrap();
        let consumer = Channel::open(&name).unwrap();

        let frames: Vec<Frame> = (0..20)
            .map(|i| Frame::data(i, 0, true, format!("frame {}", i).as_bytes()))
            .collect();

        let expected = frames.clone();
        let receiver = thread::spawn(move || {
            let mut got = Vec::new();
            for _ in 0..20 {
                got.push(consumer.recv().unwrap());
            }
            got
        });

        for frame in &frames {
            producer.send(frame);
        }

        assert_eq!(receiver.join().unwrap(), expected);
        ShmRegion::unlink(&name);
    }

    #[test]
    fn send_blocks_until_consumed() {
        let name = unique_name("backpressure");
        let producer = Channel::create(&name).unwrap();
        let consumer = Channel::open(&name).unwrap();

        // Fill the slot; the frame sits there until someone receives it.
        producer.send_final(&Frame::data(0, 0, false, b"first"));

        let receiver = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let first = consumer.recv().unwrap();
            let second = consumer.recv().unwrap();
            (first, second)
        });

        // Completes only after the receiver drains the first frame.
        producer.send(&Frame::data(0, 1, true, b"second"));

        let (first, second) = receiver.join().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
        ShmRegion::unlink(&name);
    }

    #[test]
    fn create_resets_a_dirty_slot() {
        let name = unique_name("reset");
        {
            let stale = Channel::open(&name).unwrap();
            stale.send_final(&Frame::data(9, 9, true, b"stale"));
        }
        // A producer attaching to the leftover region starts clean.
        let producer = Channel::create(&name).unwrap();
        let consumer = Channel::open(&name).unwrap();

        producer.send_final(&Frame::data(0, 0, true, b"fresh"));
        assert_eq!(consumer.recv().unwrap().payload, b"fresh");
        ShmRegion::unlink(&name);
    }
}
