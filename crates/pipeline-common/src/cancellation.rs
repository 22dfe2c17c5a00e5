//! Cancellation scope shared by every stage of a run.
//!
//! The scope is a monotonic flag: once cancelled it is never reset. Stages
//! check it before admitting work and race it against every wait.

pub use tokio_util::sync::CancellationToken;

/// Resolve `fut` unless `token` fires first.
///
/// Returns `None` when the token was (or becomes) cancelled. The token is
/// checked before `fut` is polled, so an already-cancelled scope never starts
/// the operation.
pub async fn or_cancelled<F: std::future::Future>(
    token: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
