use crate::error::{Error, Result};
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use std::io;

/// Fills `size` bytes from the operating system's entropy source.
///
/// Random content keeps intermediate proxies from compressing the upload.
/// A failing entropy source is reported, never papered over with zeros.
pub fn generate(size: usize) -> Result<Bytes> {
    let mut data = vec![0u8; size];
    OsRng.try_fill_bytes(&mut data)?;
    Ok(Bytes::from(data))
}

/// An immutable payload replayed from the start once fully consumed.
#[derive(Debug, Clone)]
pub struct CircularPayload {
    data: Bytes,
    pos: usize,
}

impl CircularPayload {
    pub fn new(data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }
        Ok(Self { data, pos: 0 })
    }

    /// Generates a random payload of `size_kib` KiB.
    pub fn random(size_kib: usize) -> Result<Self> {
        if size_kib == 0 {
            return Err(Error::EmptyPayload);
        }
        let size = size_kib
            .checked_mul(1024)
            .ok_or_else(|| Error::Config(format!("upload payload of {} KiB is too large", size_kib)))?;
        Self::new(generate(size)?)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Returns up to `max` bytes from the current position without copying.
    ///
    /// Chunks never straddle the end of the payload; reaching the end
    /// rewinds to offset 0.
    pub fn next_chunk(&mut self, max: usize) -> Bytes {
        let end = (self.pos + max).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        if self.pos == self.data.len() {
            self.rewind();
        }
        chunk
    }
}

impl io::Read for CircularPayload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.next_chunk(buf.len());
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_generate_size() {
        let data = generate(4096).unwrap();
        assert_eq!(data.len(), 4096);
        // 4 KiB of OS entropy is never all zeros in practice
        assert!(data.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_empty_payload_rejected_at_setup() {
        assert!(matches!(CircularPayload::new(Bytes::new()), Err(Error::EmptyPayload)));
        assert!(matches!(CircularPayload::random(0), Err(Error::EmptyPayload)));
    }

    #[test]
    fn test_random_size_in_kib() {
        let payload = CircularPayload::random(2).unwrap();
        assert_eq!(payload.len(), 2048);
        assert_eq!(payload.position(), 0);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert!(matches!(CircularPayload::random(usize::MAX), Err(Error::Config(_))));
    }

    #[test]
    fn test_rewinds_exactly_at_end() {
        let mut payload = CircularPayload::new(Bytes::from_static(b"abcdefghij")).unwrap();

        assert_eq!(&payload.next_chunk(4)[..], b"abcd");
        assert_eq!(payload.position(), 4);
        assert_eq!(&payload.next_chunk(4)[..], b"efgh");
        assert_eq!(payload.position(), 8);

        // Short read at the tail, then wrap
        assert_eq!(&payload.next_chunk(4)[..], b"ij");
        assert_eq!(payload.position(), 0);
        assert_eq!(&payload.next_chunk(4)[..], b"abcd");
    }

    #[test]
    fn test_position_stays_in_bounds() {
        let mut payload = CircularPayload::new(Bytes::from(vec![7u8; 1000])).unwrap();
        for size in [1, 13, 999, 1000, 4096, 7] {
            payload.next_chunk(size);
            assert!(payload.position() < payload.len());
        }
    }

    #[test]
    fn test_io_read_replays_payload() {
        let mut payload = CircularPayload::new(Bytes::from_static(b"xyz")).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 2];
        for _ in 0..4 {
            let n = payload.read(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"xyzxyz");
    }
}
