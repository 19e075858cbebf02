//! Concurrent HTTP throughput measurement.
//!
//! Transfer workers share one [`ByteCounter`] per phase. The counter keeps the
//! aggregate byte count, replays the upload payload, and publishes throttled
//! [`ProgressEvent`]s to an injected [`EventSink`].

pub mod error;
pub mod settings;
pub mod speedtest;

pub use error::{Error, Result};
pub use settings::{OutputMode, Settings};
pub use speedtest::counter::ByteCounter;
pub use speedtest::payload::CircularPayload;
pub use speedtest::progress::{EventSink, ProgressEvent, TransferKind};
pub use speedtest::rate::UnitBase;
