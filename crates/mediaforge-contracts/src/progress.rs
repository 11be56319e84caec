use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::failure::{FailureKind, ProviderFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Queued,
    Generating,
    Uploading,
    Complete,
    Error,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::Queued => "queued",
            ProgressPhase::Generating => "generating",
            ProgressPhase::Uploading => "uploading",
            ProgressPhase::Complete => "complete",
            ProgressPhase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressPhase::Complete | ProgressPhase::Error)
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressError {
    pub message: String,
    pub retryable: bool,
    pub remediation: String,
}

impl ProgressError {
    pub fn from_failure(failure: &ProviderFailure) -> Self {
        Self {
            message: failure.message.clone(),
            retryable: failure.is_retryable(),
            remediation: failure.remediation().suggestion().to_string(),
        }
    }

    pub fn from_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: kind.is_retryable(),
            remediation: kind.remediation().suggestion().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub percent: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProgressError>,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            provider: None,
            percent: percent.min(100),
            message: message.into(),
            error: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_error(mut self, error: ProgressError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Fire-and-forget sender. Events are dropped when the consumer lags or is gone.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!(phase = %event.phase, "progress consumer lagging; event dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Per-invocation emitter that keeps percentages non-decreasing.
#[derive(Debug)]
pub struct ProgressTracker {
    sink: ProgressSink,
    percent: u8,
}

impl ProgressTracker {
    pub fn new(sink: ProgressSink) -> Self {
        Self { sink, percent: 0 }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn emit(&mut self, mut event: ProgressEvent) {
        self.percent = self.percent.max(event.percent.min(100));
        event.percent = self.percent;
        self.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::{ProgressEvent, ProgressPhase, ProgressSink, ProgressTracker};

    #[tokio::test]
    async fn tracker_clamps_percent_to_non_decreasing() {
        let (sink, mut rx) = ProgressSink::channel(8);
        let mut tracker = ProgressTracker::new(sink);
        tracker.emit(ProgressEvent::new(ProgressPhase::Generating, 40, "a"));
        tracker.emit(ProgressEvent::new(ProgressPhase::Generating, 20, "b"));
        tracker.emit(ProgressEvent::new(ProgressPhase::Complete, 250, "c"));
        drop(tracker);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.percent);
        }
        assert_eq!(seen, vec![40, 40, 100]);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ProgressSink::channel(1);
        sink.emit(ProgressEvent::new(ProgressPhase::Queued, 0, "first"));
        sink.emit(ProgressEvent::new(ProgressPhase::Generating, 10, "second"));
        drop(sink);

        let first = rx.recv().await;
        assert_eq!(first.map(|event| event.message), Some("first".to_string()));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn closed_or_disabled_sink_is_silent() {
        let (sink, rx) = ProgressSink::channel(4);
        drop(rx);
        sink.emit(ProgressEvent::new(ProgressPhase::Queued, 0, "nobody listening"));
        ProgressSink::disabled().emit(ProgressEvent::new(ProgressPhase::Queued, 0, "noop"));
    }

    #[test]
    fn event_serializes_without_empty_optionals() -> anyhow::Result<()> {
        let event = ProgressEvent::new(ProgressPhase::Uploading, 80, "Saving image");
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["phase"], "uploading");
        assert!(value.get("provider").is_none());
        assert!(value.get("error").is_none());
        Ok(())
    }
}
