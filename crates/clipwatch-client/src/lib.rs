//! HTTP collaborators for the stream processor.
//!
//! - [`Notifier`]: clip, metrics and stream-end events for a web server
//! - [`ExcitementScorer`]: optional ML highlight probability
//! - [`TranscriptSource`]: optional speech-to-text
//! - [`semantic`]: keyword and sentiment features from transcripts

pub mod error;
pub mod notifier;
pub mod scorer;
pub mod semantic;
pub mod transcript;

pub use error::{ClientError, ClientResult};
pub use notifier::{HttpNotifier, LogNotifier, Notifier, NotifierTimeouts};
pub use scorer::{ExcitementScorer, HttpExcitementScorer, ScorerConfig};
pub use transcript::{HttpTranscriptSource, TranscriptSource};
