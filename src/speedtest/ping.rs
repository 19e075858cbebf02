use super::progress::{EventSink, ProgressEvent};
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const PING_INTERVAL: Duration = Duration::from_millis(200);

pub struct PingTest {
    client: reqwest::Client,
    url: String,
    ping_count: usize,
    samples: Vec<f64>,
}

impl PingTest {
    pub fn new(url: String, ping_count: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url,
            ping_count,
            samples: Vec::new(),
        })
    }

    pub async fn run(&mut self, sink: Arc<dyn EventSink>) -> Result<PingResult> {
        self.samples.clear();

        for i in 0..self.ping_count {
            let start = Instant::now();
            let response = self.client.get(&self.url).send().await;
            match response.and_then(reqwest::Response::error_for_status) {
                Ok(_) => self.samples.push(start.elapsed().as_secs_f64() * 1000.0),
                Err(e) => debug!("ping {} failed: {}", i + 1, e),
            }

            let stats = PingResult::from_samples(&self.samples);
            let progress = (i + 1) as f64 / self.ping_count as f64;
            sink.emit(ProgressEvent::ping(stats.latency_ms, stats.jitter_ms, progress));

            if i + 1 < self.ping_count {
                tokio::time::sleep(PING_INTERVAL).await;
            }
        }

        Ok(PingResult::from_samples(&self.samples))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PingResult {
    pub latency_ms: f64,
    /// Mean absolute difference between consecutive samples.
    pub jitter_ms: f64,
    pub samples: usize,
}

impl PingResult {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let latency_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        let jitter_ms = if samples.len() > 1 {
            samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (samples.len() - 1) as f64
        } else {
            0.0
        };

        Self {
            latency_ms,
            jitter_ms,
            samples: samples.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_samples() {
        let result = PingResult::from_samples(&[]);
        assert_eq!(result.latency_ms, 0.0);
        assert_eq!(result.jitter_ms, 0.0);
    }

    #[test]
    fn test_single_sample_has_no_jitter() {
        let result = PingResult::from_samples(&[12.0]);
        assert_eq!(result.latency_ms, 12.0);
        assert_eq!(result.jitter_ms, 0.0);
    }

    #[test]
    fn test_jitter_from_consecutive_samples() {
        let result = PingResult::from_samples(&[10.0, 14.0, 12.0, 12.0]);
        assert_eq!(result.latency_ms, 12.0);
        // |4| + |2| + |0| over 3 gaps
        assert_eq!(result.jitter_ms, 2.0);
        assert_eq!(result.samples, 4);
    }
}
