//! Processor lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle of a stream processor.
///
/// `Running` and `StreamEnded` alternate while capture keeps failing and
/// recovering. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    #[default]
    Idle,
    Running,
    StreamEnded,
    Stopped,
}

impl ProcessorStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessorStatus::Running | ProcessorStatus::StreamEnded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorStatus::Idle => "idle",
            ProcessorStatus::Running => "running",
            ProcessorStatus::StreamEnded => "stream_ended",
            ProcessorStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
