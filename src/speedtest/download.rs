use super::counter::ByteCounter;
use super::join_workers;
use super::report::TransferSummary;
use crate::error::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

pub struct DownloadTest {
    client: reqwest::Client,
    url: String,
    connections: usize,
    duration: Duration,
}

impl DownloadTest {
    pub fn new(url: String, connections: usize, duration: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url,
            connections,
            duration,
        })
    }

    /// Runs `connections` workers into `counter` until the phase budget is
    /// spent.
    pub async fn run(&self, counter: Arc<ByteCounter>) -> Result<TransferSummary> {
        counter.start();
        let deadline = Instant::now() + self.duration;

        let mut workers = JoinSet::new();
        for id in 0..self.connections {
            let client = self.client.clone();
            let url = self.url.clone();
            workers.spawn(download_worker(id, client, url, counter.clone(), deadline));
        }

        join_workers(counter.kind(), workers).await?;
        Ok(counter.summary())
    }
}

async fn download_worker(
    id: usize,
    client: reqwest::Client,
    url: String,
    counter: Arc<ByteCounter>,
    deadline: Instant,
) -> Result<()> {
    while Instant::now() < deadline {
        let response = match timeout_at(deadline, client.get(&url).send()).await {
            Ok(response) => response?.error_for_status()?,
            Err(_) => break,
        };

        let mut stream = response.bytes_stream();
        loop {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(chunk)) => {
                    counter.write(&chunk?);
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(worker = id, "download deadline reached");
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}
