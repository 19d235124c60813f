//! Request rate limiting.
//!
//! Keeps the number of requests admitted per time window under a
//! configurable ceiling. API plans sell request budgets per second, so
//! this is the one knob that decides whether a bulk run gets banned.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{Mutex, Semaphore};

use crate::{ErrorKind, Result};

/// Admission control for outgoing requests.
///
/// A slot is consumed when a request is admitted and grows back a full
/// window after admission, so at most `rate` requests start within any
/// window. Slots are not tied to request completion; a slow response
/// does not stall unrelated requests beyond the configured rate.
#[derive(Debug)]
pub struct Throttle {
    semaphore: Arc<Semaphore>,
    /// Current ceiling. Also serializes rate changes, which block
    /// while slots are being retired.
    rate: Mutex<usize>,
    window: Duration,
}

impl Throttle {
    /// Create a throttle admitting up to `rate` requests per `window`
    #[must_use]
    pub fn new(rate: usize, window: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(rate)),
            rate: Mutex::new(rate),
            window,
        }
    }

    /// Wait for a free slot.
    ///
    /// Returns as soon as the request may be sent. The consumed slot
    /// returns by itself one window later.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Closed`] once the throttle is closed,
    /// including for callers that were already waiting.
    pub async fn acquire(&self) -> Result<()> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ErrorKind::Closed)?;
        permit.forget();

        let semaphore = Arc::clone(&self.semaphore);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            semaphore.add_permits(1);
        });

        Ok(())
    }

    /// Change the request ceiling.
    ///
    /// Raising the rate frees additional slots immediately. Lowering
    /// it retires slots one by one and therefore waits until enough
    /// slots have returned, which keeps already admitted requests
    /// unaffected.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Closed`] once the throttle is closed.
    pub async fn set_rate(&self, new_rate: usize) -> Result<()> {
        let mut rate = self.rate.lock().await;
        if new_rate > *rate {
            self.semaphore.add_permits(new_rate - *rate);
        } else {
            for _ in 0..(*rate - new_rate) {
                let permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| ErrorKind::Closed)?;
                permit.forget();
            }
        }
        debug!("Request rate changed from {} to {new_rate}", *rate);
        *rate = new_rate;
        Ok(())
    }

    /// The current request ceiling
    pub async fn rate(&self) -> usize {
        *self.rate.lock().await
    }

    /// Shut the throttle down.
    ///
    /// All waiting and future [`acquire`](Self::acquire) calls fail
    /// with [`ErrorKind::Closed`]. Closing twice is fine.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
