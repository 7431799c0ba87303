//! RetryPolicy — a pure function translating an adapter's sentinel
//! `AdapterError` (or success) into the `MsgStatus` the Sender writes back
//! to the backend, plus whether the backend should ever retry. Analogous
//! to classifying HTTP outcomes into a mediation outcome, generalized to
//! the closed sentinel set adapters surface instead of raw status codes —
//! adapters translate their own wire codes into sentinels; the core only
//! ever classifies sentinels against one uniform table.

use courier_common::{AdapterError, ErrorTaxonomyEntry, MsgStatus};

use crate::contract::SendResult;

/// Outcome of classifying one `Send` attempt.
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: MsgStatus,
    pub retryable: bool,
    pub error: Option<ErrorTaxonomyEntry>,
}

/// Classify a successful `Send` (no error, `result` holds the accepted
/// external ids). Success with at least one external id recorded is
/// `Wired`.
pub fn classify_success(result: &SendResult) -> Classification {
    if result.is_empty() {
        // An adapter that returns Ok with no external ids is violating its
        // contract; the Sender still must produce a status, so it logs and
        // treats this the same as ErrResponseUnparseable.
        return Classification {
            status: MsgStatus::Errored,
            retryable: true,
            error: Some(ErrorTaxonomyEntry {
                kind: "response_unparseable".into(),
                code: None,
                reason: Some("adapter reported success with no external id".into()),
            }),
        };
    }
    Classification { status: MsgStatus::Wired, retryable: false, error: None }
}

/// Classify a failed `Send` into a status and retryability.
pub fn classify_error(err: &AdapterError) -> Classification {
    let status = match err {
        AdapterError::ConnectionFailed(_) => MsgStatus::Errored,
        AdapterError::ResponseStatus(_) => MsgStatus::Errored,
        AdapterError::ResponseUnparseable(_) => MsgStatus::Errored,
        AdapterError::ResponseContent(_) => MsgStatus::Failed,
        AdapterError::ChannelConfig(_) => MsgStatus::Failed,
        AdapterError::FailedWithReason { .. } => MsgStatus::Failed,
        // "other / unexpected" coerces to Errored per the table's last row.
        AdapterError::Other(_) => MsgStatus::Errored,
    };

    Classification { status, retryable: err.is_retryable(), error: Some(err.taxonomy_entry()) }
}
