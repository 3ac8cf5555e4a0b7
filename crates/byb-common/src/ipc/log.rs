//! File-backed single-writer ring log.
//!
//! Layout: a 64-byte header followed by `capacity` bytes of ring data.
//! Frames are `len:u32` + payload, padded to 8-byte alignment; a
//! `u32::MAX` length marks wrap padding at the end of the ring. The
//! writer publishes by storing `head` with release ordering after the
//! frame bytes are in place; a reader acquires `head`, consumes frames
//! from `tail`, and stores `tail` back with release ordering so the
//! writer's backpressure check sees consumed space.
//!
//! Concurrency contract: exactly one writer process/thread offers, and at
//! most one consumer polls. Offers are refused with `NotConnected` until
//! a consumer attaches, mirroring a publication with no subscribers.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::MmapMut;

use super::IpcError;

const MAGIC: u32 = 0x4259_4C47; // "BYLG"
const LOG_VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;
const FRAME_ALIGN: usize = 8;
const WRAP_SENTINEL: u32 = u32::MAX;

/// Outcome of a single offer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Frame committed to the log.
    Accepted,
    /// The attached consumer has not freed enough space.
    BackPressured,
    /// No consumer attached (or the log was never initialized).
    NotConnected,
    /// Payload larger than the ring; will never succeed.
    TooLarge,
}

impl Offer {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted)
    }
}

#[repr(C)]
struct LogHeader {
    magic: u32,
    version: u32,
    capacity: u64,
    head: AtomicU64,
    tail: AtomicU64,
    consumers: AtomicU32,
    _reserved: [u8; 28],
}

/// A mapped log handle. Writer and readers open the same file.
pub struct SharedLog {
    map: MmapMut,
    capacity: usize,
}

// The map is shared process memory coordinated entirely through the
// atomics in the header; the single-writer / single-consumer contract
// above is what keeps the data region race-free.
unsafe impl Send for SharedLog {}
unsafe impl Sync for SharedLog {}

impl SharedLog {
    /// Create (or truncate) a log file sized for `capacity` bytes of ring
    /// data. `capacity` is rounded up to frame alignment.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, IpcError> {
        let capacity = align_up(capacity.max(FRAME_ALIGN));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((HEADER_SIZE + capacity) as u64)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        map[..HEADER_SIZE].fill(0);
        map[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        map[4..8].copy_from_slice(&LOG_VERSION.to_le_bytes());
        map[8..16].copy_from_slice(&(capacity as u64).to_le_bytes());
        map.flush()?;

        Ok(Self { map, capacity })
    }

    /// Open an existing log file (consumer side).
    pub fn open(path: &Path) -> Result<Self, IpcError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        if map.len() < HEADER_SIZE {
            return Err(IpcError::InvalidLog(format!(
                "{} is shorter than the log header",
                path.display()
            )));
        }
        let magic = u32::from_le_bytes([map[0], map[1], map[2], map[3]]);
        let version = u32::from_le_bytes([map[4], map[5], map[6], map[7]]);
        if magic != MAGIC || version != LOG_VERSION {
            return Err(IpcError::InvalidLog(format!(
                "{} has magic {magic:#x} version {version}",
                path.display()
            )));
        }
        let mut cap_bytes = [0u8; 8];
        cap_bytes.copy_from_slice(&map[8..16]);
        let capacity = u64::from_le_bytes(cap_bytes) as usize;
        if map.len() < HEADER_SIZE + capacity {
            return Err(IpcError::InvalidLog(format!(
                "{} is shorter than its declared capacity",
                path.display()
            )));
        }
        Ok(Self { map, capacity })
    }

    fn header(&self) -> &LogHeader {
        // repr(C) view over the mapped header bytes.
        unsafe { &*(self.map.as_ptr() as *const LogHeader) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // MmapMut hands out &self slices; the ring region is written
        // through this pointer under the single-writer contract.
        unsafe { (self.map.as_ptr() as *mut u8).add(HEADER_SIZE) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register this handle as the consumer. Offers are refused until a
    /// consumer is attached.
    pub fn attach_consumer(&self) {
        self.header().consumers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn consumer_count(&self) -> u32 {
        self.header().consumers.load(Ordering::Acquire)
    }

    /// Attempt to append one frame. Never blocks.
    pub fn offer(&self, payload: &[u8]) -> Offer {
        let frame_len = align_up(4 + payload.len());
        if frame_len > self.capacity {
            return Offer::TooLarge;
        }

        let hdr = self.header();
        if hdr.consumers.load(Ordering::Acquire) == 0 {
            return Offer::NotConnected;
        }

        let head = hdr.head.load(Ordering::Relaxed);
        let tail = hdr.tail.load(Ordering::Acquire);
        let mut pos = (head % self.capacity as u64) as usize;

        let to_end = self.capacity - pos;
        let wrap_pad = if to_end < frame_len { to_end } else { 0 };
        if head + (frame_len + wrap_pad) as u64 - tail > self.capacity as u64 {
            return Offer::BackPressured;
        }

        unsafe {
            let base = self.data_ptr();
            if wrap_pad > 0 {
                std::ptr::copy_nonoverlapping(
                    WRAP_SENTINEL.to_le_bytes().as_ptr(),
                    base.add(pos),
                    4,
                );
                pos = 0;
            }
            std::ptr::copy_nonoverlapping(payload.as_ptr(), base.add(pos + 4), payload.len());
            std::ptr::copy_nonoverlapping(
                (payload.len() as u32).to_le_bytes().as_ptr(),
                base.add(pos),
                4,
            );
        }

        hdr.head
            .store(head + (frame_len + wrap_pad) as u64, Ordering::Release);
        Offer::Accepted
    }

    /// Consume up to `limit` frames, invoking `f` for each payload.
    /// Returns the number of frames delivered.
    pub fn poll(&self, mut f: impl FnMut(&[u8]), limit: usize) -> usize {
        let hdr = self.header();
        let head = hdr.head.load(Ordering::Acquire);
        let mut tail = hdr.tail.load(Ordering::Relaxed);
        let mut delivered = 0usize;

        while tail < head && delivered < limit {
            let pos = (tail % self.capacity as u64) as usize;
            let len = unsafe {
                let mut bytes = [0u8; 4];
                std::ptr::copy_nonoverlapping(self.data_ptr().add(pos), bytes.as_mut_ptr(), 4);
                u32::from_le_bytes(bytes)
            };
            if len == WRAP_SENTINEL {
                tail += (self.capacity - pos) as u64;
                continue;
            }
            let payload = unsafe {
                std::slice::from_raw_parts(self.data_ptr().add(pos + 4), len as usize)
            };
            f(payload);
            tail += align_up(4 + len as usize) as u64;
            delivered += 1;
        }

        hdr.tail.store(tail, Ordering::Release);
        delivered
    }

    /// Periodic housekeeping: schedule dirty pages for writeback.
    pub fn service(&self) -> Result<(), IpcError> {
        self.map.flush_async()?;
        Ok(())
    }
}

fn align_up(n: usize) -> usize {
    (n + FRAME_ALIGN - 1) & !(FRAME_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_pair(capacity: usize) -> (TempDir, SharedLog, SharedLog) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream-1001.log");
        let writer = SharedLog::create(&path, capacity).unwrap();
        let reader = SharedLog::open(&path).unwrap();
        (dir, writer, reader)
    }

    #[test]
    fn test_offer_without_consumer_is_not_connected() {
        let (_dir, writer, _reader) = log_pair(1024);
        assert_eq!(writer.offer(b"hello"), Offer::NotConnected);
    }

    #[test]
    fn test_offer_poll_roundtrip() {
        let (_dir, writer, reader) = log_pair(1024);
        reader.attach_consumer();

        assert_eq!(writer.offer(b"first"), Offer::Accepted);
        assert_eq!(writer.offer(b"second frame"), Offer::Accepted);

        let mut seen: Vec<Vec<u8>> = Vec::new();
        let n = reader.poll(|p| seen.push(p.to_vec()), 16);
        assert_eq!(n, 2);
        assert_eq!(seen[0], b"first");
        assert_eq!(seen[1], b"second frame");

        // Nothing left.
        assert_eq!(reader.poll(|_| panic!("no more frames"), 16), 0);
    }

    #[test]
    fn test_backpressure_when_consumer_lags() {
        let (_dir, writer, reader) = log_pair(64);
        reader.attach_consumer();

        // Each 24-byte payload needs 32 bytes framed; two fill the ring.
        assert_eq!(writer.offer(&[7u8; 24]), Offer::Accepted);
        assert_eq!(writer.offer(&[8u8; 24]), Offer::Accepted);
        assert_eq!(writer.offer(&[9u8; 24]), Offer::BackPressured);

        // Draining one frame frees space for exactly one more.
        assert_eq!(reader.poll(|_| {}, 1), 1);
        assert_eq!(writer.offer(&[9u8; 24]), Offer::Accepted);
    }

    #[test]
    fn test_wraparound_preserves_frames() {
        let (_dir, writer, reader) = log_pair(64);
        reader.attach_consumer();

        let mut expected = Vec::new();
        let mut received = Vec::new();
        // Uneven payload sizes force wrap padding at some point.
        for round in 0u8..20 {
            let payload = vec![round; 5 + (round as usize % 11)];
            assert_eq!(writer.offer(&payload), Offer::Accepted);
            expected.push(payload);
            reader.poll(|p| received.push(p.to_vec()), 16);
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_oversized_payload() {
        let (_dir, writer, reader) = log_pair(64);
        reader.attach_consumer();
        assert_eq!(writer.offer(&[0u8; 256]), Offer::TooLarge);
    }

    #[test]
    fn test_open_rejects_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.log");
        std::fs::write(&path, vec![0xAB; 256]).unwrap();
        assert!(matches!(
            SharedLog::open(&path),
            Err(IpcError::InvalidLog(_))
        ));
    }

    #[test]
    fn test_cross_thread_offer_poll() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.log");
        let writer = SharedLog::create(&path, 4096).unwrap();
        let reader = SharedLog::open(&path).unwrap();
        reader.attach_consumer();

        let handle = std::thread::spawn(move || {
            let mut sent = 0u32;
            while sent < 100 {
                if writer.offer(&sent.to_le_bytes()).is_accepted() {
                    sent += 1;
                }
            }
        });

        let mut next = 0u32;
        while next < 100 {
            reader.poll(
                |p| {
                    let got = u32::from_le_bytes(p.try_into().expect("4-byte frame"));
                    assert_eq!(got, next);
                    next += 1;
                },
                8,
            );
        }
        handle.join().unwrap();
    }
}
