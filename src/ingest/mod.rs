//! # Log Tailer / Ingester
//!
//! Polls configured access-log files, enriches each line with UA and geo
//! metadata, applies privacy transforms, and inserts into the storage
//! engine with byte-offset checkpointing (§4.3).

pub mod external;
pub mod privacy;
pub mod tailer;

pub use external::{GeoReader, JsonLineParser, LogLineParser, NullGeoReader, ParseError, ParsedLine, SubstringUaClassifier, UaClassification, UaClassifier};
pub use privacy::PrivacyConfig;
pub use tailer::{IngestError, Tailer, TailStats, TailerConfig};
