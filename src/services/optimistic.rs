// Optimistic updates - apply locally, confirm remotely, optionally revert
//
// Callers apply their local change synchronously first, then hand the
// remote write and an undo step to `settle`. The revert policy decides what
// a remote failure does to the local change.

use std::future::Future;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertPolicy {
    /// Undo the local change when the remote write fails (shared counters)
    Strict,
    /// Keep the local change and log the failure (read state)
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticOutcome<T> {
    Confirmed(T),
    /// Remote write failed and the local change was undone
    Reverted(AppError),
    /// Remote write failed and the local change was kept
    Kept(AppError),
}

impl<T> OptimisticOutcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, OptimisticOutcome::Confirmed(_))
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            OptimisticOutcome::Confirmed(_) => None,
            OptimisticOutcome::Reverted(error) | OptimisticOutcome::Kept(error) => Some(error),
        }
    }
}

/// Await the remote half of an optimistic update and apply the revert policy.
pub async fn settle<T, Fut, U>(
    label: &str,
    policy: RevertPolicy,
    remote: Fut,
    undo: U,
) -> OptimisticOutcome<T>
where
    Fut: Future<Output = AppResult<T>>,
    U: FnOnce(),
{
    match remote.await {
        Ok(value) => {
            debug!("{} confirmed", label);
            OptimisticOutcome::Confirmed(value)
        }
        Err(error) => match policy {
            RevertPolicy::Strict => {
                warn!("{} failed, reverting local change: {}", label, error);
                undo();
                OptimisticOutcome::Reverted(error)
            }
            RevertPolicy::None => {
                warn!("{} failed, keeping local change: {}", label, error);
                OptimisticOutcome::Kept(error)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_strict_policy_runs_undo_on_failure() {
        let undone = Cell::new(false);
        let outcome: OptimisticOutcome<()> = settle(
            "like",
            RevertPolicy::Strict,
            async { Err(AppError::Unavailable("offline".into())) },
            || undone.set(true),
        )
        .await;
        assert!(undone.get());
        assert!(matches!(outcome, OptimisticOutcome::Reverted(AppError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_none_policy_keeps_local_change() {
        let undone = Cell::new(false);
        let outcome: OptimisticOutcome<()> = settle(
            "mark read",
            RevertPolicy::None,
            async { Err(AppError::Unavailable("offline".into())) },
            || undone.set(true),
        )
        .await;
        assert!(!undone.get());
        assert!(matches!(outcome, OptimisticOutcome::Kept(_)));
    }

    #[tokio::test]
    async fn test_success_never_undoes() {
        let undone = Cell::new(false);
        let outcome = settle("like", RevertPolicy::Strict, async { Ok(7) }, || undone.set(true)).await;
        assert_eq!(outcome, OptimisticOutcome::Confirmed(7));
        assert!(!undone.get());
    }
}
