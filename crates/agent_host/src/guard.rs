//! Per-run execution deadline.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Sleep;

/// Resolves once the deadline passes. Armed on creation; dropping it disarms.
pub struct TimeoutGuard {
    limit: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl TimeoutGuard {
    pub fn arm(limit: Duration) -> Self {
        Self {
            limit,
            sleep: Box::pin(tokio::time::sleep(limit)),
        }
    }

    /// Human-readable line recorded when the guard fires.
    pub fn message(&self) -> String {
        let secs = self.limit.as_secs();
        if secs >= 60 && secs % 60 == 0 {
            format!("Timeout: script ran for more than {} minutes", secs / 60)
        } else if secs > 0 {
            let unit = if secs == 1 { "second" } else { "seconds" };
            format!("Timeout: script ran for more than {} {}", secs, unit)
        } else {
            format!(
                "Timeout: script ran for more than {} ms",
                self.limit.as_millis()
            )
        }
    }
}

impl Future for TimeoutGuard {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}
