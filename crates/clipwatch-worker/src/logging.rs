//! Structured session logging utilities.
//!
//! Every processing loop logs through a [`StreamLogger`] so that records
//! carry the session, channel and loop name.

use tracing::{error, info, warn, Span};

/// Logger for one stream session, optionally scoped to a loop.
#[derive(Debug, Clone)]
pub struct StreamLogger {
    session_id: String,
    channel: String,
    loop_name: String,
}

impl StreamLogger {
    /// Create a session-level logger.
    pub fn new(session_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            channel: channel.into(),
            loop_name: "session".to_string(),
        }
    }

    /// Same session, scoped to a named loop.
    pub fn for_loop(&self, loop_name: &str) -> Self {
        Self {
            loop_name: loop_name.to_string(),
            ..self.clone()
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            channel = %self.channel,
            loop_name = %self.loop_name,
            "Started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            channel = %self.channel,
            loop_name = %self.loop_name,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            session_id = %self.session_id,
            channel = %self.channel,
            loop_name = %self.loop_name,
            "{}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            session_id = %self.session_id,
            channel = %self.channel,
            loop_name = %self.loop_name,
            "{}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            channel = %self.channel,
            loop_name = %self.loop_name,
            "Stopped: {}", message
        );
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn loop_name(&self) -> &str {
        &self.loop_name
    }

    /// Span the loop task runs inside.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stream_loop",
            session_id = %self.session_id,
            channel = %self.channel,
            loop_name = %self.loop_name
        )
    }
}
