//! In-memory device sink.
//!
//! [`BufferedDevice`] stores received transport stream data in a bounded
//! ring buffer that the host drains at its own pace.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::interface::DeviceIf;

/// TS packet size.
pub const TS_PACKET_SIZE: usize = 188;

/// Default ring buffer size (about 5 MB).
pub const DEFAULT_BUFFER_SIZE: usize = TS_PACKET_SIZE * 1024 * 28;

struct Ring {
    data: Box<[u8]>,
    read_pos: usize,
    len: usize,
}

/// Bounded byte ring for TS data. Writes that do not fit are truncated.
pub struct TsRingBuffer {
    ring: Mutex<Ring>,
    dropped: AtomicU64,
}

impl TsRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                data: vec![0u8; capacity.max(1)].into_boxed_slice(),
                read_pos: 0,
                len: 0,
            }),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().data.len()
    }

    /// Bytes available for reading.
    pub fn available(&self) -> usize {
        self.ring.lock().len
    }

    pub fn free_space(&self) -> usize {
        let ring = self.ring.lock();
        ring.data.len() - ring.len
    }

    /// Total bytes discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append data, returning how many bytes were stored.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut ring = self.ring.lock();
        let cap = ring.data.len();
        let to_write = data.len().min(cap - ring.len);

        let write_pos = (ring.read_pos + ring.len) % cap;
        let first = to_write.min(cap - write_pos);
        ring.data[write_pos..write_pos + first].copy_from_slice(&data[..first]);
        if first < to_write {
            ring.data[..to_write - first].copy_from_slice(&data[first..to_write]);
        }
        ring.len += to_write;

        if to_write < data.len() {
            self.dropped
                .fetch_add((data.len() - to_write) as u64, Ordering::Relaxed);
        }
        to_write
    }

    /// Move data into `dest`. Returns the bytes read and the bytes remaining.
    pub fn read_into(&self, dest: &mut [u8]) -> (usize, usize) {
        let mut ring = self.ring.lock();
        let cap = ring.data.len();
        let to_read = dest.len().min(ring.len);

        let first = to_read.min(cap - ring.read_pos);
        dest[..first].copy_from_slice(&ring.data[ring.read_pos..ring.read_pos + first]);
        if first < to_read {
            dest[first..to_read].copy_from_slice(&ring.data[..to_read - first]);
        }

        ring.read_pos = (ring.read_pos + to_read) % cap;
        ring.len -= to_read;
        (to_read, ring.len)
    }

    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.read_pos = 0;
        ring.len = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }
}

impl Default for TsRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

/// A device that buffers its tuner's stream in memory.
pub struct BufferedDevice {
    id: i32,
    buffer: TsRingBuffer,
    stream_id: AtomicI32,
}

impl BufferedDevice {
    pub fn new(id: i32) -> Self {
        Self::with_capacity(id, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(id: i32, capacity: usize) -> Self {
        Self {
            id,
            buffer: TsRingBuffer::new(capacity),
            stream_id: AtomicI32::new(-1),
        }
    }

    pub fn buffer(&self) -> &TsRingBuffer {
        &self.buffer
    }

    /// Stream id last announced by the tuner, -1 if none.
    pub fn stream_id(&self) -> i32 {
        self.stream_id.load(Ordering::Relaxed)
    }
}

impl DeviceIf for BufferedDevice {
    fn get_id(&self) -> i32 {
        self.id
    }

    fn write_data(&self, data: &[u8]) {
        let written = self.buffer.write(data);
        if written < data.len() {
            log::warn!(
                "Buffer full, dropped {} bytes [device {}]",
                data.len() - written,
                self.id
            );
        }
    }

    fn set_stream_id(&self, stream_id: i32) {
        self.stream_id.store(stream_id, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let buffer = TsRingBuffer::new(TS_PACKET_SIZE * 16);

        let data = vec![0x47u8; TS_PACKET_SIZE * 10];
        assert_eq!(buffer.write(&data), data.len());
        assert_eq!(buffer.available(), data.len());

        let mut out = vec![0u8; 1000];
        let (read, remaining) = buffer.read_into(&mut out);
        assert_eq!(read, 1000);
        assert_eq!(remaining, data.len() - 1000);
    }

    #[test]
    fn test_wrap_around_preserves_order() {
        let buffer = TsRingBuffer::new(10);
        assert_eq!(buffer.write(&[1, 2, 3, 4, 5, 6, 7, 8]), 8);

        let mut out = [0u8; 6];
        assert_eq!(buffer.read_into(&mut out), (6, 2));

        assert_eq!(buffer.write(&[9, 10, 11, 12, 13, 14]), 6);
        let mut out = [0u8; 10];
        assert_eq!(buffer.read_into(&mut out), (8, 0));
        assert_eq!(&out[..8], &[7, 8, 9, 10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_overflow_is_counted() {
        let buffer = TsRingBuffer::new(4);
        assert_eq!(buffer.write(&[0; 6]), 4);
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.free_space(), 0);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffered_device() {
        let device = BufferedDevice::with_capacity(2, 1024);
        device.write_data(&[0x47; 188]);
        device.set_stream_id(5);
        assert_eq!(device.get_id(), 2);
        assert_eq!(device.buffer().available(), 188);
        assert_eq!(device.stream_id(), 5);
    }
}
