use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Admission control for outgoing RPC requests.
///
/// Keeps the timestamps of recently admitted requests and never lets more
/// than `limit` of them fall inside any trailing `window`.
#[derive(Debug)]
pub struct RequestGovernor {
    limit: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RequestGovernor {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Waits until one more request fits into the window, then records it.
    ///
    /// Never fails; it can only delay the caller.
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();
                while admitted
                    .front()
                    .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
                {
                    admitted.pop_front();
                }

                if admitted.len() < self.limit {
                    admitted.push_back(now);
                    return;
                }

                // Full: the oldest entry is the first to leave the window.
                match admitted.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, "request window full");
            // Others may have been admitted meanwhile, so re-check after waking.
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of requests admitted within the trailing window.
    #[cfg(test)]
    async fn in_window(&self) -> usize {
        let admitted = self.admitted.lock().await;
        let now = Instant::now();
        admitted
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count()
    }
}
