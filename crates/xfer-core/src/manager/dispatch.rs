//! Dispatcher loop, attempt tasks and outcome routing.

use std::sync::Arc;

use tokio::time::Instant;

use crate::admission::AdmissionPermit;
use crate::descriptor::TransferDescriptor;
use crate::executor::AttemptOutcome;
use crate::retry::{BackoffDecision, FailureKind};

use super::report::{FailureCause, TransferResult};
use super::Shared;

/// Hands eligible descriptors to attempt tasks, one admission permit each.
///
/// Sleeps (without holding a permit) until the next backoff expires, a
/// transfer is submitted, an attempt finishes, or the manager is cancelled.
pub(super) async fn run_dispatcher(shared: Arc<Shared>) {
    loop {
        let permit = tokio::select! {
            p = shared.admission.acquire() => p,
            _ = shared.cancel.cancelled() => break,
        };

        let now = Instant::now();
        let (picked, next_wake) = {
            let mut table = shared.lock_table();
            if shared.deadline_passed(now) {
                table.fail_idle(FailureCause::DeadlineExceeded, "deadline exceeded");
            }
            (table.checkout_next(now), table.next_wake())
        };

        match picked {
            Some(d) => {
                tokio::spawn(run_attempt(Arc::clone(&shared), d, permit));
            }
            None => {
                drop(permit);
                // The deadline watch task wakes us when the deadline passes.
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = sleep_until(next_wake) => {}
                    _ = shared.cancel.cancelled() => break,
                }
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Force-reports idle transfers once the overall deadline passes.
pub(super) async fn run_deadline_watch(shared: Arc<Shared>, deadline: Instant) {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        _ = shared.cancel.cancelled() => return,
    }
    let failed = shared
        .lock_table()
        .fail_idle(FailureCause::DeadlineExceeded, "deadline exceeded");
    if failed > 0 {
        tracing::warn!(failed, "deadline reached; remaining transfers failed");
    }
    shared.wake.notify_one();
}

/// Runs one attempt on the blocking pool and routes its outcome.
/// The permit is held until the outcome is recorded.
async fn run_attempt(shared: Arc<Shared>, mut d: TransferDescriptor, permit: AdmissionPermit) {
    let id = d.id();
    let executor = shared.executor.clone();
    let cancel = shared.cancel.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let outcome = executor.attempt(&mut d, &cancel);
        (d, outcome)
    })
    .await;

    match joined {
        Ok((d, outcome)) => route_outcome(&shared, d, outcome),
        Err(e) => {
            tracing::error!(%id, "attempt task failed: {}", e);
            shared
                .lock_table()
                .finish_lost(id, format!("attempt task failed: {}", e));
        }
    }
    drop(permit);
    shared.wake.notify_one();
}

/// Apply the state machine to one attempt outcome.
fn route_outcome(shared: &Shared, d: TransferDescriptor, outcome: AttemptOutcome) {
    let now = Instant::now();
    let id = d.id();
    let attempts = d.attempt_count();
    let mut table = shared.lock_table();

    match outcome {
        AttemptOutcome::Success => {
            tracing::info!(%id, attempts, bytes = d.bytes_sent(), "upload done");
            table.finish(d, TransferResult::Done);
        }
        AttemptOutcome::Permanent { kind, reason } => {
            let cause = match kind {
                FailureKind::Cancelled => FailureCause::Cancelled,
                FailureKind::DeadlineExceeded => FailureCause::DeadlineExceeded,
                _ => FailureCause::Rejected,
            };
            tracing::warn!(%id, attempts, %kind, "upload failed permanently: {}", reason);
            table.finish(d, TransferResult::PermanentFailure { cause, reason });
        }
        AttemptOutcome::Transient {
            kind,
            reason,
            retry_after,
        } => {
            if shared.cancel.is_cancelled() {
                table.finish(d, cancelled());
                return;
            }
            if shared.deadline_passed(now) {
                tracing::warn!(%id, attempts, "deadline exceeded after transient failure: {}", reason);
                table.finish(
                    d,
                    TransferResult::PermanentFailure {
                        cause: FailureCause::DeadlineExceeded,
                        reason: "deadline exceeded".to_string(),
                    },
                );
                return;
            }
            let decision = {
                let mut rng = shared.lock_rng();
                shared
                    .backoff
                    .compute_delay_with_hint(attempts, kind, retry_after, &mut *rng)
            };
            match decision {
                BackoffDecision::RetryAfter(delay) => {
                    tracing::info!(
                        %id,
                        attempts,
                        %kind,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off: {}",
                        reason
                    );
                    table.park(d, now + delay);
                }
                BackoffDecision::DoNotRetry => {
                    tracing::warn!(%id, attempts, "retry limit reached: {}", reason);
                    table.finish(
                        d,
                        TransferResult::PermanentFailure {
                            cause: FailureCause::RetryLimit,
                            reason: format!("retry limit reached after {} attempts: {}", attempts, reason),
                        },
                    );
                }
            }
        }
    }
}

fn cancelled() -> TransferResult {
    TransferResult::PermanentFailure {
        cause: FailureCause::Cancelled,
        reason: "cancelled".to_string(),
    }
}
