//! Business-hours gate and elapsed-time queries

use crate::shutdown::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Business-hours window. Opens on construction, closes either when
/// [`BusinessHours::close`] is called or when the window elapses and the
/// branch's closing timer fires.
#[derive(Debug)]
pub struct BusinessHours {
    open: AtomicBool,
    started: Instant,
    window: Duration,
}

impl BusinessHours {
    /// Open a new business day lasting `window`
    pub fn open(window: Duration) -> Self {
        Self {
            open: AtomicBool::new(true),
            started: Instant::now(),
            window,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the branch. Returns true if it was open.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    /// Time since the branch opened
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left in the window (zero once elapsed)
    pub fn remaining(&self) -> Duration {
        self.window.saturating_sub(self.elapsed())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Close the branch once the window elapses.
    ///
    /// Returns true if this call closed it, false if shutdown came first or
    /// the branch was already closed.
    pub async fn run_until_close(&self, shutdown: &Shutdown) -> bool {
        if !shutdown.sleep(self.remaining()).await {
            return false;
        }
        let closed = self.close();
        if closed {
            tracing::info!(elapsed_ms = self.elapsed().as_millis() as u64, "branch.hours: closed");
        }
        closed
    }
}
