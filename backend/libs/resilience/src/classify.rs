/// Stock failure classifiers for [`RetryPolicy`](crate::retry::RetryPolicy)
use crate::retry::FailureKind;
use tonic::{Code, Status};

pub fn always_retry<E>(_: &E) -> FailureKind {
    FailureKind::Retryable
}

pub fn never_retry<E>(_: &E) -> FailureKind {
    FailureKind::Terminal
}

/// gRPC status codes that are safe to retry for idempotent calls
///
/// - `Unavailable`, `ResourceExhausted`, `Aborted`: retryable
/// - `DeadlineExceeded`: reported as a timeout so `retry_on_timeout` decides
/// - everything else (auth, validation, not found, internal): terminal
pub fn grpc_status(status: &Status) -> FailureKind {
    match status.code() {
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted => FailureKind::Retryable,
        Code::DeadlineExceeded => FailureKind::Timeout,
        _ => FailureKind::Terminal,
    }
}
