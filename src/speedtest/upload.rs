use super::counter::ByteCounter;
use super::join_workers;
use super::report::TransferSummary;
use crate::error::Result;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct UploadTest {
    client: reqwest::Client,
    url: String,
    connections: usize,
    request_bytes: u64,
    duration: Duration,
}

impl UploadTest {
    pub fn new(url: String, connections: usize, request_bytes: u64, duration: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url,
            connections,
            request_bytes,
            duration,
        })
    }

    /// Runs `connections` workers reading request bodies from `counter`,
    /// which must carry an upload payload.
    pub async fn run(&self, counter: Arc<ByteCounter>) -> Result<TransferSummary> {
        counter.start();
        let deadline = Instant::now() + self.duration;

        let mut workers = JoinSet::new();
        for id in 0..self.connections {
            let client = self.client.clone();
            let url = self.url.clone();
            workers.spawn(upload_worker(id, client, url, counter.clone(), self.request_bytes, deadline));
        }

        join_workers(counter.kind(), workers).await?;
        Ok(counter.summary())
    }
}

async fn upload_worker(
    id: usize,
    client: reqwest::Client,
    url: String,
    counter: Arc<ByteCounter>,
    request_bytes: u64,
    deadline: Instant,
) -> Result<()> {
    while Instant::now() < deadline {
        let chunks = PayloadChunks::new(counter.clone(), request_bytes, deadline.into_std());
        let body = reqwest::Body::wrap_stream(futures::stream::iter(chunks));

        match timeout_at(deadline, client.post(&url).body(body).send()).await {
            Ok(response) => {
                response?.error_for_status()?;
            }
            Err(_) => {
                debug!(worker = id, "upload deadline reached");
                break;
            }
        }
    }

    Ok(())
}

/// One request body's worth of chunks drawn from the shared counter. Ends
/// early once the phase deadline passes.
pub struct PayloadChunks {
    counter: Arc<ByteCounter>,
    remaining: u64,
    deadline: std::time::Instant,
}

impl PayloadChunks {
    pub fn new(counter: Arc<ByteCounter>, request_bytes: u64, deadline: std::time::Instant) -> Self {
        Self {
            counter,
            remaining: request_bytes,
            deadline,
        }
    }
}

impl Iterator for PayloadChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || std::time::Instant::now() >= self.deadline {
            return None;
        }

        let max = self.remaining.min(CHUNK_SIZE as u64) as usize;
        match self.counter.next_chunk(max) {
            Ok(chunk) => {
                self.remaining -= chunk.len() as u64;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::payload::CircularPayload;
    use crate::speedtest::progress::TransferKind;

    fn upload_counter(size: usize) -> Arc<ByteCounter> {
        let payload = CircularPayload::new(Bytes::from(vec![9u8; size])).unwrap();
        Arc::new(ByteCounter::new(TransferKind::Upload).with_payload(payload))
    }

    fn far_deadline() -> std::time::Instant {
        std::time::Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_body_replays_small_payload() {
        let counter = upload_counter(1000);
        let chunks: Vec<Bytes> = PayloadChunks::new(counter.clone(), 10_500, far_deadline())
            .collect::<io::Result<_>>()
            .unwrap();

        let total: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(total, 10_500);
        assert!(chunks.iter().all(|c| c.len() <= 1000));
        assert_eq!(counter.total(), 10_500);
        assert_eq!(counter.position(), 500);
    }

    #[test]
    fn test_body_chunks_are_bounded() {
        let counter = upload_counter(1 << 20);
        let chunks: Vec<Bytes> = PayloadChunks::new(counter, 200_000, far_deadline())
            .collect::<io::Result<_>>()
            .unwrap();
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_SIZE));
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 200_000);
    }

    #[test]
    fn test_body_stops_at_deadline() {
        let counter = upload_counter(1000);
        let past = std::time::Instant::now();
        assert_eq!(PayloadChunks::new(counter.clone(), 10_000, past).count(), 0);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_missing_payload_ends_body_with_error() {
        let counter = Arc::new(ByteCounter::new(TransferKind::Upload));
        let mut chunks = PayloadChunks::new(counter, 10_000, far_deadline());
        assert!(matches!(chunks.next(), Some(Err(_))));
        assert!(chunks.next().is_none());
    }
}
