use std::fmt;

use serde::{Deserialize, Serialize};

/// Error taxonomy shared by providers, the orchestrator and progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoProviderAvailable,
    InvalidRequest,
    Timeout,
    RateLimited,
    ContentPolicyRejected,
    InvalidCredential,
    ModelNotFound,
    TransportError,
    PersistenceFailed,
    Cancelled,
    UnknownProviderError,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::RateLimited | FailureKind::TransportError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoProviderAvailable => "no_provider_available",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ContentPolicyRejected => "content_policy_rejected",
            FailureKind::InvalidCredential => "invalid_credential",
            FailureKind::ModelNotFound => "model_not_found",
            FailureKind::TransportError => "transport_error",
            FailureKind::PersistenceFailed => "persistence_failed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::UnknownProviderError => "unknown_provider_error",
        }
    }

    pub fn remediation(&self) -> Remediation {
        match self {
            FailureKind::NoProviderAvailable | FailureKind::InvalidCredential => {
                Remediation::CredentialInvalid
            }
            FailureKind::RateLimited => Remediation::RateLimited,
            FailureKind::ContentPolicyRejected => Remediation::ContentPolicyBlocked,
            FailureKind::Timeout | FailureKind::TransportError => Remediation::NetworkOrTimeout,
            FailureKind::InvalidRequest
            | FailureKind::ModelNotFound
            | FailureKind::PersistenceFailed
            | FailureKind::Cancelled
            | FailureKind::UnknownProviderError => Remediation::Unknown,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing remediation category. The UI renders `suggestion()` verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    CredentialInvalid,
    RateLimited,
    ContentPolicyBlocked,
    NetworkOrTimeout,
    Unknown,
}

impl Remediation {
    pub fn suggestion(&self) -> &'static str {
        match self {
            Remediation::CredentialInvalid => "Check your API key in Settings.",
            Remediation::RateLimited => "The provider is busy; wait a minute and retry.",
            Remediation::ContentPolicyBlocked => {
                "Rephrase the description to avoid content-policy restrictions."
            }
            Remediation::NetworkOrTimeout => {
                "Check your network connection and retry; the provider did not respond in time."
            }
            Remediation::Unknown => "Retry later or choose a different image provider.",
        }
    }
}

/// Failure half of a provider outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// Classifies from whatever the backend returned.
    pub fn classify(status: Option<u16>, code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(status, code, &message);
        Self {
            kind,
            message,
            status,
            code: code.map(str::to_string),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransportError, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn remediation(&self) -> Remediation {
        self.kind.remediation()
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderFailure {}

/// Structured code lookup first, then HTTP status, then message text.
///
/// Message matching is a last resort: backend wording drifts, so prefer
/// adding a code to `classify_code` when a backend exposes one.
pub fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> FailureKind {
    if let Some(kind) = code.and_then(classify_code) {
        return kind;
    }
    if let Some(kind) = status.and_then(classify_status) {
        return kind;
    }
    classify_message(message)
}

fn classify_code(code: &str) -> Option<FailureKind> {
    let normalized = code.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    let kind = match normalized.as_str() {
        "resource_exhausted" | "rate_limit_exceeded" | "rate_limited" | "too_many_requests"
        | "insufficient_quota" | "quota_exceeded" => FailureKind::RateLimited,
        "unavailable" | "internal" | "server_error" | "service_unavailable" | "overloaded" => {
            FailureKind::TransportError
        }
        "deadline_exceeded" | "timeout" => FailureKind::Timeout,
        "unauthenticated" | "permission_denied" | "invalid_api_key" | "unauthorized" => {
            FailureKind::InvalidCredential
        }
        "content_moderation" | "content_policy_violation" | "safety" | "blocked" => {
            FailureKind::ContentPolicyRejected
        }
        "not_found" | "model_not_found" | "unsupported_model" => FailureKind::ModelNotFound,
        _ => return None,
    };
    Some(kind)
}

fn classify_status(status: u16) -> Option<FailureKind> {
    let kind = match status {
        401 | 403 => FailureKind::InvalidCredential,
        404 => FailureKind::ModelNotFound,
        408 | 504 => FailureKind::Timeout,
        429 => FailureKind::RateLimited,
        500 | 502 | 503 => FailureKind::TransportError,
        _ => return None,
    };
    Some(kind)
}

fn classify_message(message: &str) -> FailureKind {
    let lowered = message.to_ascii_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

    // Permanent categories are matched before transient ones.
    if contains_any(&["safety", "content policy", "moderation", "blocked"]) {
        return FailureKind::ContentPolicyRejected;
    }
    if contains_any(&["api key", "unauthorized", "forbidden", "invalid credential"]) {
        return FailureKind::InvalidCredential;
    }
    if contains_any(&["rate limit", "rate-limit", "quota", "too many requests"]) {
        return FailureKind::RateLimited;
    }
    if contains_any(&["timed out", "timeout", "deadline"]) {
        return FailureKind::Timeout;
    }
    if contains_any(&["unavailable", "internal", "connection reset", "connection refused"]) {
        return FailureKind::TransportError;
    }
    if contains_any(&["not found", "not supported", "does not support", "unsupported model", "malformed"]) {
        return FailureKind::ModelNotFound;
    }
    FailureKind::UnknownProviderError
}
