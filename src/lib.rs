#![doc = include_str!("../README.md")]

mod client;
mod encoding;
mod error;
mod sets;
mod telemetry;
mod transport;
mod types;

pub use client::{
    InfluxClient, DEFAULT_BATCH_RETRY_INTERVAL, DEFAULT_MAX_BATCH_INTERVAL,
    DEFAULT_MAX_BATCH_SIZE,
};
pub use encoding::{encode_field, encode_measurement, encode_tag};
pub use error::InfluxError;
pub use sets::{FieldSet, TagSet};
pub use telemetry::{noop_event_listener, BatchEvent, BatchEventListener, NoopEventListener};
pub use transport::SendResult;
pub use types::{Field, FieldValue, Measurement, ProtocolVersion, Tag, TimestampResolution};
