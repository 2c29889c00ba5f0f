//! Shared data models for the clipwatch stream clipper.
//!
//! This crate provides Serde-serializable types for:
//! - Buffered media chunks and buffer modes
//! - Per-chunk analysis metrics and ML feature vectors
//! - Trigger events and their reasons
//! - Finished clip records
//! - Notification payloads sent to the external sink

pub mod analysis;
pub mod chunk;
pub mod clip;
pub mod notification;
pub mod status;
pub mod timestamp;
pub mod trigger;

// Re-export common types
pub use analysis::{ChunkMetrics, FeatureVector, SemanticFeatures};
pub use chunk::{BufferMode, MediaChunk};
pub use clip::{AssemblyMethod, ClipRecord};
pub use notification::{ClipCreated, MetricsUpdate, StreamEnded};
pub use status::ProcessorStatus;
pub use trigger::{MetricChannel, TriggerEvent, TriggerReason, TriggerSource};
