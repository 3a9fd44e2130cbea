use thiserror::Error;

/// Failure taxonomy for webhook/event handling. Variants map one-to-one to
/// the recovery policy at the dispatch boundary: reject the request, skip
/// the event, or degrade to a re-prompt.
#[derive(Debug, Error)]
pub enum EventError {
    /// The webhook destination resolves to no known tenant. Non-retryable.
    #[error("unknown tenant for destination {destination}")]
    TenantNotFound { destination: String },

    /// Tenant exists but its channel secret/credential is missing. Fail
    /// closed and alert the operator rather than accepting unverified input.
    #[error("tenant {tenant} is missing configuration: {what}")]
    ConfigurationError { tenant: String, what: &'static str },

    /// Signature header did not match the body. No state may be mutated.
    #[error("invalid webhook signature for tenant {tenant}")]
    InvalidSignature { tenant: String },

    /// The event id was already claimed. Skipping it is the success path.
    #[error("duplicate event {event_id}")]
    DuplicateEvent { event_id: String },

    /// Free-text parsing produced nothing usable; re-prompt the user.
    #[error("could not parse {what} from message")]
    ParseFailure { what: &'static str },

    /// OCR or content download failed; degrade to manual verification.
    #[error("evidence unavailable: {reason}")]
    EvidenceUnavailable { reason: String },

    /// Owner confirm/reject with nothing pending. A no-op, acknowledged.
    #[error("no pending payment intent to act on")]
    NoPendingIntent,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EventError {
    /// Duplicate events and empty owner actions are expected outcomes, not
    /// faults; they are logged at a lower level than real failures.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            EventError::DuplicateEvent { .. } | EventError::NoPendingIntent
        )
    }
}
