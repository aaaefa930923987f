//! Cooperative cancellation of collaborator calls.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::AuthError;
use crate::AuthResult;

/// Races `operation` against `cancel`.
///
/// When the token fires first the operation future is dropped and
/// [`AuthError::Cancelled`] is returned.
pub async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(AuthError::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AuthError::Cancelled),
        result = operation => result,
    }
}

/// Fails fast when the request is already cancelled.
pub fn ensure_active(cancel: &CancellationToken) -> AuthResult<()> {
    if cancel.is_cancelled() {
        Err(AuthError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { Ok::<_, AuthError>(7) }).await;
        assert_eq!(result.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_operation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, AuthError>(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[test]
    fn test_pending_until_cancelled() {
        let cancel = CancellationToken::new();
        let mut task = tokio_test::task::spawn(cancellable(
            &cancel,
            std::future::pending::<AuthResult<()>>(),
        ));
        tokio_test::assert_pending!(task.poll());

        cancel.cancel();
        assert!(task.is_woken());
        let result = tokio_test::assert_ready!(task.poll());
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[test]
    fn test_ensure_active() {
        let cancel = CancellationToken::new();
        assert!(ensure_active(&cancel).is_ok());
        cancel.cancel();
        assert!(matches!(ensure_active(&cancel), Err(AuthError::Cancelled)));
    }
}
