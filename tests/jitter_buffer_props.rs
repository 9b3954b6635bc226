//! Property tests for the jitter buffer's latency bound and ordering.
//!
//! Run with: cargo test --test jitter_buffer_props

use proptest::prelude::*;
use realtime_voice::audio::JitterBuffer;

const CAPACITY: usize = 512;
const LOW_WATER: usize = 64;
const HIGH_WATER: usize = 256;
const ALIGN: usize = 4;

fn buffer() -> JitterBuffer {
    JitterBuffer::new(CAPACITY, LOW_WATER, HIGH_WATER, ALIGN).unwrap()
}

/// Write sizes in whole sample frames, some of them larger than high-water.
fn write_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec((0usize..100).prop_map(|frames| frames * ALIGN), 1..40)
}

fn write_stream_from(buffer: &JitterBuffer, offset: usize, size: usize) -> Vec<u8> {
    let chunk: Vec<u8> = (offset..offset + size).map(|i| (i % 251) as u8).collect();
    buffer.write(&chunk).unwrap();
    chunk
}

/// Writes `sizes` bytes at a time from a counting byte stream and returns
/// everything written.
fn write_stream(buffer: &JitterBuffer, sizes: &[usize]) -> Vec<u8> {
    let mut written = Vec::new();
    for &size in sizes {
        let chunk = write_stream_from(buffer, written.len(), size);
        written.extend(chunk);
    }
    written
}

fn drain(buffer: &JitterBuffer) -> Vec<u8> {
    buffer.close();
    let mut out = Vec::new();
    let mut chunk = [0u8; 37];
    while let Some(n) = buffer.read(&mut chunk) {
        out.extend_from_slice(&chunk[..n]);
    }
    out
}

proptest! {
    /// INVARIANT: fill never exceeds high-water (and so never capacity)
    #[test]
    fn fill_bounded_after_every_write(sizes in write_sizes()) {
        let buffer = buffer();
        let mut total = 0;
        for &size in &sizes {
            buffer.write(&vec![0u8; size]).unwrap();
            total += size;
            prop_assert!(buffer.len() <= HIGH_WATER, "fill {} above high-water", buffer.len());
            prop_assert!(buffer.len() <= CAPACITY);
            prop_assert!(buffer.len() <= total);
        }
    }

    /// INVARIANT: retained bytes are the newest suffix of the stream, in order
    #[test]
    fn retained_bytes_are_stream_suffix(sizes in write_sizes()) {
        let buffer = buffer();
        let written = write_stream(&buffer, &sizes);
        let retained = drain(&buffer);

        prop_assert!(written.ends_with(&retained));
        prop_assert_eq!(retained.len() % ALIGN, 0);
        if written.len() <= HIGH_WATER {
            prop_assert_eq!(retained, written);
        }
    }

    /// INVARIANT: non-blocking reads never reorder or invent bytes
    #[test]
    fn try_read_preserves_order(sizes in write_sizes(), read_len in 1usize..128) {
        let buffer = buffer();
        let mut written = Vec::new();
        let mut read = Vec::new();
        let mut out = vec![0u8; read_len];

        for &size in &sizes {
            written.extend(write_stream_from(&buffer, written.len(), size));
            let n = buffer.try_read(&mut out);
            read.extend_from_slice(&out[..n]);
        }
        read.extend(drain(&buffer));

        // Whatever was read is a subsequence of the stream made of in-order runs.
        let mut cursor = 0;
        for &byte in &read {
            let position = written[cursor..].iter().position(|&b| b == byte);
            prop_assert!(position.is_some());
            cursor += position.unwrap_or(0) + 1;
        }
    }
}
