//! zlib codec adapter.
//!
//! Blocks travel as raw zlib streams produced at the fast setting. The wire
//! format does not identify the codec; both peers hardwire it.
//!
//! Failure policy is asymmetric. A deflate failure downgrades to sending the
//! block uncompressed (the receiver then fails to inflate it and handles the
//! block under its corruption policy). An inflate failure is a hard
//! [`Error::Codec`].

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use log::warn;

use crate::error::{Error, Result};

/// Output buffer for inflating `input_len` compressed bytes: a 6x guess with
/// a floor, doubled whenever the stream needs more room.
fn inflate_capacity(input_len: usize) -> usize {
    input_len * 6 + 1024
}

/// Deflate `input` at the fast setting.
///
/// Empty input yields empty output. On codec failure the input is returned
/// unchanged and a warning is logged.
pub fn compress(input: &[u8]) -> Vec<u8> {
    if input.is_empty() {
        return Vec::new();
    }
    match try_compress(input) {
        Ok(out) => out,
        Err(err) => {
            warn!("zlib deflate failed ({}); passing block through uncompressed", err);
            input.to_vec()
        }
    }
}

fn try_compress(input: &[u8]) -> std::result::Result<Vec<u8>, flate2::CompressError> {
    let mut deflater = Compress::new(Compression::fast(), true);
    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    loop {
        let consumed = deflater.total_in() as usize;
        match deflater.compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)? {
            Status::StreamEnd => return Ok(out),
            // Out of output room; double and keep going.
            Status::Ok | Status::BufError => out.reserve(out.capacity().max(64)),
        }
    }
}

/// Inflate one compressed block.
///
/// Empty input yields empty output. The output buffer starts at
/// [`inflate_capacity`] and doubles on each insufficient-buffer signal until
/// the stream ends; a stream that stops making progress before its end is
/// reported as corrupt.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(inflate_capacity(input.len()));
    loop {
        let consumed = inflater.total_in() as usize;
        let produced = out.len();
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| Error::Codec(e.to_string()))?;
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                let input_exhausted = inflater.total_in() as usize == input.len();
                if input_exhausted && out.len() == produced && out.len() < out.capacity() {
                    // Room to write and nothing left to read: truncated stream.
                    return Err(Error::Codec("truncated zlib stream".to_string()));
                }
                if out.len() == out.capacity() {
                    out.reserve(out.capacity());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNCOMPRESSED_BLOCK_SIZE;

    #[test]
    fn empty_input_round_trips_empty() {
        assert!(compress(&[]).is_empty());
        assert!(decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn single_byte_round_trips() {
        let compressed = compress(b"x");
        assert!(!compressed.is_empty());
        assert_eq!(decompress(&compressed).unwrap(), b"x");
    }

    #[test]
    fn full_block_of_zeroes_round_trips() {
        // Compresses far below the 6x inflate guess, forcing buffer doubling
        // on the way back.
        let block = vec![0u8; UNCOMPRESSED_BLOCK_SIZE];
        let compressed = compress(&block);
        assert!(compressed.len() < block.len() / 100);
        assert_eq!(decompress(&compressed).unwrap(), block);
    }

    #[test]
    fn incompressible_block_round_trips() {
        // A fixed xorshift sequence; statistically incompressible.
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let block: Vec<u8> = (0..UNCOMPRESSED_BLOCK_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let compressed = compress(&block);
        assert_eq!(decompress(&compressed).unwrap(), block);
    }

    #[test]
    fn garbage_input_is_a_codec_error() {
        assert!(matches!(
            decompress(b"definitely not a zlib stream"),
            Err(Error::Codec(_))
        ));
    }

    #[test]
    fn truncated_stream_is_a_codec_error() {
        let compressed = compress(&vec![7u8; 4096]);
        let truncated = &compressed[..compressed.len() / 2];
        assert!(matches!(decompress(truncated), Err(Error::Codec(_))));
    }
}
