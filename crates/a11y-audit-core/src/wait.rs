use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a cancellable wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

/// Sleep for `duration` unless `cancel` fires first. An already-cancelled token returns immediately.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Wait {
    if cancel.is_cancelled() {
        return Wait::Cancelled;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Wait::Cancelled,
        _ = tokio::time::sleep(duration) => Wait::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapses_without_cancellation() {
        let token = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert_eq!(pause(Duration::from_secs(5), &token).await, Wait::Elapsed);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let started = tokio::time::Instant::now();
        assert_eq!(pause(Duration::from_secs(60), &token).await, Wait::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn pre_cancelled_token_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(pause(Duration::from_secs(3600), &token).await, Wait::Cancelled);
    }
}
