use serde::Serialize;

pub type ClubResult<T> = Result<T, ClubError>;

/// Every failure the club core reports to a caller.
///
/// All variants are recoverable for the process. Only `StoreUnavailable`
/// is worth retrying; the domain-rule variants are final for the event
/// that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail")]
pub enum ClubError {
    #[error("cannot {trigger} a session that is {actual}")]
    InvalidTransition { trigger: String, actual: String },

    #[error("cannot {operation} while the session is {actual} (needs {expected})")]
    PhaseMismatch {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("movie {0} is already proposed in this session")]
    DuplicateProposal(String),

    #[error("no active session for {0}")]
    NoActiveSession(String),

    #[error("precondition not met: {0}")]
    GuardUnmet(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("too many events, retry in {0}s")]
    RateLimited(u64),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClubError {
    pub fn invalid_transition(trigger: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidTransition {
            trigger: trigger.into(),
            actual: actual.into(),
        }
    }

    pub fn phase_mismatch(
        operation: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::PhaseMismatch {
            operation: operation.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::PhaseMismatch { .. } => "PHASE_MISMATCH",
            Self::DuplicateProposal(_) => "DUPLICATE_PROPOSAL",
            Self::NoActiveSession(_) => "NO_ACTIVE_SESSION",
            Self::GuardUnmet(_) => "GUARD_UNMET",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Transient store outages are the only errors a caller should retry.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// A losing racer on a phase change sees `InvalidTransition`; ingestors
    /// treat that as "someone else already did it".
    pub const fn is_already_handled(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    pub fn user_message(&self) -> &str {
        match self {
            Self::InvalidTransition { .. } => "The session has already moved past that step.",
            Self::PhaseMismatch { .. } => "That is not possible at this stage of the session.",
            Self::DuplicateProposal(_) => "That movie has already been proposed.",
            Self::NoActiveSession(_) => "There is no active session. Start one first.",
            Self::GuardUnmet(_) => "The session is not ready for that yet.",
            Self::NotFound(_) => "Nothing found.",
            Self::Validation(_) => "The input is not valid.",
            Self::Forbidden(_) => "Only club admins can do that.",
            Self::RateLimited(_) => "Slow down a little and try again.",
            Self::StoreUnavailable(_) => "Storage is temporarily unavailable. Try again later.",
            Self::Internal(_) => "Something went wrong on our side.",
        }
    }
}

#[cfg(feature = "http")]
mod http_impl {
    use super::ClubError;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;

    #[derive(serde::Serialize)]
    struct ErrorResponse {
        code: &'static str,
        message: String,
        retryable: bool,
    }

    impl ClubError {
        pub const fn status_code(&self) -> StatusCode {
            match self {
                Self::InvalidTransition { .. }
                | Self::PhaseMismatch { .. }
                | Self::DuplicateProposal(_) => StatusCode::CONFLICT,
                Self::GuardUnmet(_) | Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                Self::NoActiveSession(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
                Self::Forbidden(_) => StatusCode::FORBIDDEN,
                Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for ClubError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            if status.is_server_error() {
                tracing::error!(error = %self, code = self.code(), "Request failed");
            } else {
                tracing::debug!(error = %self, code = self.code(), "Request rejected");
            }
            let body = ErrorResponse {
                code: self.code(),
                message: self.to_string(),
                retryable: self.is_retryable(),
            };
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_outages_are_retryable() {
        assert!(ClubError::StoreUnavailable("pool timed out".into()).is_retryable());
        assert!(!ClubError::invalid_transition("close voting", "rating").is_retryable());
        assert!(!ClubError::DuplicateProposal("326".into()).is_retryable());
        assert!(!ClubError::GuardUnmet("need two proposals".into()).is_retryable());
    }

    #[test]
    fn transition_error_names_trigger_and_state() {
        let err = ClubError::invalid_transition("close voting", "rating");
        assert_eq!(err.to_string(), "cannot close voting a session that is rating");
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert!(err.is_already_handled());
    }

    #[test]
    fn phase_mismatch_serializes_with_kind_tag() {
        let err = ClubError::phase_mismatch("cast a vote", "voting", "collecting");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "PhaseMismatch");
        assert_eq!(json["detail"]["expected"], "voting");
    }
}
