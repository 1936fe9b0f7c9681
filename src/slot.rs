//! Wire layout of the single-slot mailbox.
//!
//! The shared region holds exactly one [`RawSlot`]: a packed header followed
//! by a fixed-capacity payload buffer. The layout is byte-exact between the
//! two peers (same-host IPC, natural endianness), so every field is accessed
//! at its packed offset via unaligned raw-pointer reads and writes; no
//! reference to a packed field is ever formed.
//!
//! `sync_flag` sits at offset 0 of a page-aligned mapping and is the only
//! field touched outside the critical section. It is driven as an
//! [`AtomicU32`] by [`crate::channel`]; everything else is read and written
//! strictly between lock and unlock.

use std::mem::{offset_of, size_of};
use std::ptr;
use std::sync::atomic::AtomicU32;

use crate::config::{MAX_PAYLOAD, SHARED_REGION_SIZE};
use crate::error::{Error, Result};

/// `block_id` value that terminates the stream. Never used for data.
pub const END_OF_STREAM: u32 = u32::MAX;

/// The slot as it lives in shared memory.
///
/// Field order and packing are part of the wire contract; offsets are pinned
/// by the assertions below.
#[repr(C, packed)]
pub struct RawSlot {
    /// Spin mutex word: 0 free, 1 held.
    pub sync_flag: u32,
    /// 0 = slot empty (producer may write), 1 = slot full (consumer reads).
    pub message_available: u32,
    /// Owning block, or [`END_OF_STREAM`].
    pub block_id: u32,
    /// Zero-based fragment index within the block.
    pub fragment_seq: u32,
    /// 1 on the final fragment of the block.
    pub last_fragment: u8,
    /// Valid bytes in `payload`, at most [`MAX_PAYLOAD`].
    pub payload_len: u32,
    /// Fragment bytes.
    pub payload: [u8; MAX_PAYLOAD],
}

const _: () = assert!(offset_of!(RawSlot, sync_flag) == 0);
const _: () = assert!(offset_of!(RawSlot, message_available) == 4);
const _: () = assert!(offset_of!(RawSlot, block_id) == 8);
const _: () = assert!(offset_of!(RawSlot, fragment_seq) == 12);
const _: () = assert!(offset_of!(RawSlot, last_fragment) == 16);
const _: () = assert!(offset_of!(RawSlot, payload_len) == 17);
const _: () = assert!(offset_of!(RawSlot, payload) == 21);
const _: () = assert!(size_of::<RawSlot>() <= SHARED_REGION_SIZE);

/// An owned copy of one slot exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub block_id: u32,
    pub fragment_seq: u32,
    pub last_fragment: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A data fragment. `payload` must not exceed [`MAX_PAYLOAD`] bytes.
    pub fn data(block_id: u32, fragment_seq: u32, last_fragment: bool, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Frame {
            block_id,
            fragment_seq,
            last_fragment,
            payload: payload.to_vec(),
        }
    }

    /// The stream terminator: `(END_OF_STREAM, 0, last=1, len=0)`.
    pub fn end_of_stream() -> Self {
        Frame {
            block_id: END_OF_STREAM,
            fragment_seq: 0,
            last_fragment: true,
            payload: Vec::new(),
        }
    }

    /// The marker sent in place of any data when the input file is empty:
    /// `(0, 0, last=1, len=0)`.
    pub fn empty_file_marker() -> Self {
        Frame {
            block_id: 0,
            fragment_seq: 0,
            last_fragment: true,
            payload: Vec::new(),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.block_id == END_OF_STREAM
    }

    pub fn is_empty_file_marker(&self) -> bool {
        self.block_id == 0 && self.last_fragment && self.payload.is_empty()
    }
}

/// Typed view over a mapped slot.
///
/// Header and payload accessors must only run while the caller holds the
/// channel lock; `sync_flag` is exempt.
#[derive(Clone, Copy)]
pub(crate) struct SlotView {
    raw: *mut RawSlot,
}

unsafe impl Send for SlotView {}
unsafe impl Sync for SlotView {}

impl SlotView {
    /// # Safety
    /// `base` must point to at least [`SHARED_REGION_SIZE`] bytes of mapped
    /// read/write memory, 4-byte aligned, that outlives the view.
    pub(crate) unsafe fn new(base: *mut u8) -> Self {
        debug_assert!(base as usize % 4 == 0);
        SlotView {
            raw: base as *mut RawSlot,
        }
    }

    /// The spin mutex word.
    pub(crate) fn sync_flag(&self) -> &AtomicU32 {
        // sync_flag is at offset 0 and the mapping is 4-byte aligned.
        unsafe { &*(self.raw as *const AtomicU32) }
    }

    pub(crate) fn message_available(&self) -> bool {
        unsafe { ptr::addr_of!((*self.raw).message_available).read_unaligned() != 0 }
    }

    pub(crate) fn set_message_available(&self, available: bool) {
        unsafe {
            ptr::addr_of_mut!((*self.raw).message_available).write_unaligned(available as u32);
        }
    }

    /// Write `frame` into the header and payload fields.
    pub(crate) fn write_frame(&self, frame: &Frame) {
        debug_assert!(frame.payload.len() <= MAX_PAYLOAD);
        unsafe {
            ptr::addr_of_mut!((*self.raw).block_id).write_unaligned(frame.block_id);
            ptr::addr_of_mut!((*self.raw).fragment_seq).write_unaligned(frame.fragment_seq);
            ptr::addr_of_mut!((*self.raw).last_fragment).write_unaligned(frame.last_fragment as u8);
            ptr::addr_of_mut!((*self.raw).payload_len).write_unaligned(frame.payload.len() as u32);
            let dst = ptr::addr_of_mut!((*self.raw).payload) as *mut u8;
            ptr::copy_nonoverlapping(frame.payload.as_ptr(), dst, frame.payload.len());
        }
    }

    /// Copy the current frame out of the slot.
    ///
    /// A `payload_len` above [`MAX_PAYLOAD`] cannot have been produced by a
    /// conforming peer and is reported as corruption.
    pub(crate) fn read_frame(&self) -> Result<Frame> {
        unsafe {
            let payload_len = ptr::addr_of!((*self.raw).payload_len).read_unaligned() as usize;
            if payload_len > MAX_PAYLOAD {
                return Err(Error::Protocol(format!(
                    "payload_len {} exceeds the {} byte payload capacity",
                    payload_len, MAX_PAYLOAD
                )));
            }
            let mut payload = vec![0u8; payload_len];
            let src = ptr::addr_of!((*self.raw).payload) as *const u8;
            ptr::copy_nonoverlapping(src, payload.as_mut_ptr(), payload_len);
            Ok(Frame {
                block_id: ptr::addr_of!((*self.raw).block_id).read_unaligned(),
                fragment_seq: ptr::addr_of!((*self.raw).fragment_seq).read_unaligned(),
                last_fragment: ptr::addr_of!((*self.raw).last_fragment).read_unaligned() != 0,
                payload,
            })
        }
    }

    /// Zero the entire slot, header and payload alike.
    pub(crate) fn zero(&self) {
        unsafe {
            ptr::write_bytes(self.raw as *mut u8, 0, size_of::<RawSlot>());
        }
    }
}
