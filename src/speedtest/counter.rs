//! Shared byte accumulator for one measurement phase.
//!
//! Every transfer worker of a phase holds the same `Arc<ByteCounter>`.
//! Download workers feed received chunks through [`ByteCounter::write`];
//! upload workers pull request bodies through [`ByteCounter::next_chunk`]
//! (or the `io::Read` adapter). One mutex guards the byte total, the payload
//! cursor and the emission clock, so a snapshot is taken by at most one
//! worker per interval. The lock covers arithmetic only: copying payload
//! bytes and publishing events happen after it is released.

use super::payload::CircularPayload;
use super::progress::{EventSink, NullSink, ProgressSnapshot, TransferKind};
use super::rate::{self, UnitBase};
use super::report::TransferSummary;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

pub struct ByteCounter {
    kind: TransferKind,
    unit_base: UnitBase,
    budget: Duration,
    emit_interval: Duration,
    sink: Arc<dyn EventSink>,
    state: Mutex<CounterState>,
}

struct CounterState {
    start: Instant,
    last_emit: Instant,
    total: u64,
    payload: Option<CircularPayload>,
}

impl ByteCounter {
    pub fn new(kind: TransferKind) -> Self {
        let now = Instant::now();
        Self {
            kind,
            unit_base: UnitBase::default(),
            budget: Duration::ZERO,
            emit_interval: DEFAULT_EMIT_INTERVAL,
            sink: Arc::new(NullSink),
            state: Mutex::new(CounterState {
                start: now,
                last_emit: now,
                total: 0,
                payload: None,
            }),
        }
    }

    pub fn with_unit_base(mut self, unit_base: UnitBase) -> Self {
        self.unit_base = unit_base;
        self
    }

    /// Expected phase duration, used for the completion fraction.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.emit_interval = interval;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attaches the payload replayed to upload workers.
    pub fn with_payload(mut self, payload: CircularPayload) -> Self {
        self.state.get_mut().payload = Some(payload);
        self
    }

    /// Stamps the phase start. Call once, before workers are spawned.
    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    fn start_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.start = now;
        state.last_emit = now;
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn unit_base(&self) -> UnitBase {
        self.unit_base
    }

    pub fn total(&self) -> u64 {
        self.state.lock().total
    }

    /// Current offset in the upload payload; 0 when no payload is attached.
    pub fn position(&self) -> usize {
        self.state
            .lock()
            .payload
            .as_ref()
            .map_or(0, CircularPayload::position)
    }

    pub fn elapsed(&self) -> Duration {
        self.state.lock().start.elapsed()
    }

    /// Records `buf.len()` received bytes. Never rejects data.
    pub fn write(&self, buf: &[u8]) -> usize {
        self.record_at(buf.len(), Instant::now());
        buf.len()
    }

    fn record_at(&self, n: usize, now: Instant) {
        let snapshot = {
            let mut state = self.state.lock();
            state.total += n as u64;
            self.poll_snapshot(&mut state, now)
        };
        self.publish(snapshot);
    }

    /// Takes the next upload chunk of at most `max` bytes, rewinding the
    /// payload when its end is reached.
    pub fn next_chunk(&self, max: usize) -> io::Result<Bytes> {
        self.next_chunk_at(max, Instant::now())
    }

    fn next_chunk_at(&self, max: usize, now: Instant) -> io::Result<Bytes> {
        let (chunk, snapshot) = {
            let mut state = self.state.lock();
            let payload = state.payload.as_mut().ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "no upload payload attached")
            })?;
            let chunk = payload.next_chunk(max);
            state.total += chunk.len() as u64;
            (chunk, self.poll_snapshot(&mut state, now))
        };
        self.publish(snapshot);
        Ok(chunk)
    }

    /// Copies the next upload chunk into `buf`.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = self.next_chunk(buf.len())?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Check-and-set of the emission clock, under the same lock as the byte
    /// update. The wall-clock stamp is taken there too so events of one
    /// counter are stamped in byte order.
    fn poll_snapshot(&self, state: &mut CounterState, now: Instant) -> Option<(ProgressSnapshot, DateTime<Utc>)> {
        if now.saturating_duration_since(state.last_emit) < self.emit_interval {
            return None;
        }
        state.last_emit = now;
        let snapshot = ProgressSnapshot {
            kind: self.kind,
            bytes: state.total,
            elapsed: now.saturating_duration_since(state.start),
            budget: self.budget,
        };
        Some((snapshot, Utc::now()))
    }

    fn publish(&self, snapshot: Option<(ProgressSnapshot, DateTime<Utc>)>) {
        if let Some(event) = snapshot.and_then(|(s, timestamp)| s.into_event(timestamp)) {
            self.sink.emit(event);
        }
    }

    /// Snapshot of the current state, ignoring the emission clock.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            kind: self.kind,
            bytes: state.total,
            elapsed: state.start.elapsed(),
            budget: self.budget,
        }
    }

    /// Average bytes per second since [`start`](Self::start). Evaluated at
    /// call time, so it decays while no bytes arrive.
    pub fn average_bytes_per_second(&self) -> f64 {
        self.average_bytes_per_second_at(Instant::now())
    }

    fn average_bytes_per_second_at(&self, now: Instant) -> f64 {
        let state = self.state.lock();
        rate::bytes_per_second(state.total, now.saturating_duration_since(state.start))
    }

    /// Average rate in megabits (decimal) or mebibits (binary) per second.
    pub fn average_mbps(&self) -> f64 {
        self.unit_base.to_megabits(self.average_bytes_per_second())
    }

    pub fn humanize(&self) -> String {
        self.unit_base.humanize(self.average_bytes_per_second())
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary::from(self.snapshot())
    }
}

impl io::Write for &ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(ByteCounter::write(*self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for &ByteCounter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ByteCounter::read(*self, buf)
    }
}
