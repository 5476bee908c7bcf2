//! Concurrent per-device fan-out shared by command dispatch and health sampling

use crate::session::SessionHandle;
use futures::future::join_all;
use std::future::Future;
use swarm_shared::{ConnectionState, DeviceAddress, FailureReason, Outcome, SkipReason, SwarmResult};
use tokio_util::sync::CancellationToken;

/// Split sessions into those whose state satisfies `ready` and record the rest
/// as `Skipped(InvalidState)`
pub(crate) async fn admit<T, F>(
    sessions: Vec<SessionHandle>,
    result: &mut SwarmResult<T>,
    ready: F,
) -> Vec<SessionHandle>
where
    F: Fn(ConnectionState) -> bool,
{
    let mut admitted = Vec::with_capacity(sessions.len());
    for session in sessions {
        let state = session.state().await;
        if ready(state) {
            admitted.push(session);
        } else {
            result.record(
                session.address().clone(),
                Outcome::Skipped(SkipReason::InvalidState(state)),
            );
        }
    }
    admitted
}

/// Record every unknown address as `Skipped(NotRegistered)`
pub(crate) fn record_missing<T>(missing: Vec<DeviceAddress>, result: &mut SwarmResult<T>) {
    for address in missing {
        result.record(address, Outcome::Skipped(SkipReason::NotRegistered));
    }
}

/// Run `op` against every session concurrently and wait for all of them to settle
///
/// Operations are independent: one slow or failing device never blocks or
/// cancels its siblings. Cancelling `cancel` settles every still-pending
/// operation as `Failed(Cancelled)`.
pub(crate) async fn fan_out<T, F, Fut>(
    sessions: Vec<SessionHandle>,
    cancel: &CancellationToken,
    op: F,
) -> Vec<(DeviceAddress, Outcome<T>)>
where
    F: Fn(SessionHandle) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let tasks = sessions.into_iter().map(|session| {
        let address = session.address().clone();
        let operation = op(session);
        async move {
            let outcome = tokio::select! {
                outcome = operation => outcome,
                _ = cancel.cancelled() => Outcome::Failed(FailureReason::Cancelled),
            };
            (address, outcome)
        }
    });

    join_all(tasks).await
}
