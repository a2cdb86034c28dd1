//! Pairing timeout guard.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Cancellable, re-armable deadline for an unpaired session.
///
/// The guard holds no task of its own; the owning actor polls [`expired`]
/// in its select loop. An unarmed guard never expires, and each arming fires
/// at most once because firing disarms it.
///
/// [`expired`]: PairingTimeoutGuard::expired
#[derive(Debug)]
pub struct PairingTimeoutGuard {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl PairingTimeoutGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the guard from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Disarm the guard. Returns whether it was armed.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the armed deadline passes; pending forever when unarmed.
    ///
    /// The returned future does not borrow the guard, so callers must
    /// re-create it after arming or cancelling.
    pub fn expired(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }

    /// Consume an expiry. Returns `false` if the guard was cancelled meanwhile.
    pub fn fire(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let mut guard = PairingTimeoutGuard::new(Duration::from_secs(60));
        guard.arm();

        let start = Instant::now();
        guard.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(guard.fire());
        assert!(!guard.is_armed());
        assert!(!guard.fire());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_pushes_deadline() {
        let mut guard = PairingTimeoutGuard::new(Duration::from_secs(60));
        guard.arm();
        tokio::time::advance(Duration::from_secs(40)).await;
        guard.arm();

        let start = Instant::now();
        guard.expired().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60));
        assert!(waited < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_guard_never_fires() {
        let mut guard = PairingTimeoutGuard::new(Duration::from_secs(60));
        guard.arm();
        assert!(guard.cancel());
        assert!(!guard.cancel());

        let result = tokio::time::timeout(Duration::from_secs(600), guard.expired()).await;
        assert!(result.is_err());
        assert!(!guard.fire());
    }
}
