use std::sync::atomic::{AtomicUsize, Ordering};

/// A tokio semaphore sized by a configurable capacity, where a capacity of 0 means "no limit".
///
/// While unlimited every acquisition completes immediately without handing out a permit.
pub struct Semaphore {
    capacity: AtomicUsize,
    sem: tokio::sync::Semaphore,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            capacity: AtomicUsize::new(0),
            sem: tokio::sync::Semaphore::const_new(0),
        }
    }

    /// Resizes the limit. Growing adds permits right away; shrinking can only take back the
    /// permits that are not currently held.
    pub fn setup(&self, capacity: usize) {
        let previous = self.capacity.swap(capacity, Ordering::AcqRel);
        if capacity >= previous {
            self.sem.add_permits(capacity - previous);
            return;
        }
        let surplus = previous - capacity;
        let reclaimed = self.sem.forget_permits(surplus);
        if reclaimed < surplus {
            tracing::debug!(
                "{} permit(s) in use above the new capacity of {}",
                surplus - reclaimed,
                capacity
            );
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity() > 0
    }

    pub async fn acquire(&self) -> Option<tokio::sync::SemaphorePermit<'_>> {
        if !self.is_enabled() {
            return None;
        }
        // never closed, so an error can only mean there is nothing to wait for
        self.sem.acquire().await.ok()
    }

    /// Takes one token for good; it comes back only through [`Semaphore::refill`].
    pub async fn consume(&self) {
        if let Some(permit) = self.acquire().await {
            permit.forget();
        }
    }

    /// Every `interval`, tops the available tokens back up to the current capacity. Returns
    /// immediately when the semaphore is unlimited.
    pub async fn refill(&self, interval: std::time::Duration) {
        if !self.is_enabled() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let missing = self.capacity().saturating_sub(self.sem.available_permits());
            if missing > 0 {
                self.sem.add_permits(missing);
            }
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
