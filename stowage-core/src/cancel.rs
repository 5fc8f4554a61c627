use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline, checked before each new
/// listing, read or delete call of a batch job.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    pub fn never() -> Self {
        Self::default()
    }

    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self::new(token, Some(Instant::now() + timeout))
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_is_not_stopped() {
        assert!(!StopSignal::never().is_stopped());
    }

    #[test]
    fn test_token_cancellation_stops() {
        let token = CancellationToken::new();
        let signal = StopSignal::new(token.clone(), None);
        assert!(!signal.is_stopped());
        token.cancel();
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn test_elapsed_deadline_stops() {
        let signal = StopSignal::with_timeout(CancellationToken::new(), Duration::ZERO);
        assert!(signal.is_stopped());
    }
}
