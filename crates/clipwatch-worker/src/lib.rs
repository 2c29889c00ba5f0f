//! Live stream highlight worker.
//!
//! This crate provides:
//! - Ad-free stream URL acquisition
//! - Rolling segment buffer with snapshot-safe eviction
//! - Adaptive baseline and trigger fusion
//! - Clip assembly with encode fallback
//! - The capture, analysis and metrics loops

pub mod assembler;
pub mod baseline;
pub mod config;
pub mod error;
pub mod gatekeeper;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod segment_store;
pub mod state;
pub mod trigger;

pub use assembler::{AssemblerSettings, ClipAssembler};
pub use baseline::{Anomaly, BaselineTracker};
pub use config::{EncodeFailurePolicy, ProcessorConfig};
pub use error::{AssembleError, FailureKind, GateError, WorkerError, WorkerResult};
pub use gatekeeper::GateKeeper;
pub use logging::StreamLogger;
pub use orchestrator::{Collaborators, ProcessorOrchestrator};
pub use segment_store::{ChunkRef, SegmentStore};
pub use state::ProcessorState;
pub use trigger::{TriggerDecision, TriggerPolicy};
