//! HTTP API module.
//!
//! JSON endpoints over the [`Labeler`](crate::labeler::Labeler), plus an
//! xlsx download for finished jobs.

mod account;
pub mod auth;
mod jobs;
mod routes;

pub use routes::{router, serve, AppState};

use axum::http::StatusCode;

use crate::classify::ClassifyError;
use crate::labeler::LabelerError;

/// Map a labeler error to a status and a message fit for the caller.
pub(crate) fn error_response(e: LabelerError) -> (StatusCode, String) {
    let status = match &e {
        LabelerError::Ingest(_)
        | LabelerError::IncompleteInputs(_)
        | LabelerError::InvalidAmount => StatusCode::BAD_REQUEST,
        LabelerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        LabelerError::JobInFlight => StatusCode::CONFLICT,
        LabelerError::JobNotFound(_) | LabelerError::NoResult(_) => StatusCode::NOT_FOUND,
        LabelerError::Classify(ClassifyError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        LabelerError::Classify(_) => StatusCode::BAD_GATEWAY,
        LabelerError::LedgerWrite { .. }
        | LabelerError::Store(_)
        | LabelerError::Export(_)
        | LabelerError::Interrupted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("Request failed with {}: {}", status, e);
    }

    (status, e.user_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestError;
    use crate::records::RecordKind;
    use std::time::Duration;

    #[test]
    fn test_error_statuses() {
        let (status, message) = error_response(LabelerError::Ingest(IngestError::NoDataRows {
            kind: RecordKind::Input,
        }));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "No input data found in the file");

        let cases = [
            (
                LabelerError::InsufficientBalance {
                    balance: 0.5,
                    required: 0.8,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (LabelerError::JobInFlight, StatusCode::CONFLICT),
            (
                LabelerError::NoResult(uuid::Uuid::nil()),
                StatusCode::NOT_FOUND,
            ),
            (
                LabelerError::Classify(ClassifyError::Timeout(Duration::from_secs(120))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                LabelerError::Classify(ClassifyError::ServiceError("401".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                LabelerError::Interrupted {
                    job_id: uuid::Uuid::nil(),
                    reason: "task panicked".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).0, expected);
        }
    }
}
