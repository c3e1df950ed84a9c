//! Fixed-capacity slot pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Notify, Semaphore, TryAcquireError};

use crate::error::GateError;

/// Point-in-time view of a gate, used in run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateSummary {
    pub generation: u64,
    pub capacity: usize,
    pub workers_bound: usize,
    pub peak_held: usize,
    pub disposed: bool,
}

/// Bounded slot pool with a capacity fixed at creation.
///
/// Waiters are parked on a tokio semaphore, so a release wakes exactly one
/// of them and nobody spins. `held` is incremented only after a semaphore
/// permit is obtained and decremented before it is returned, which keeps
/// `held <= capacity` observable at all times.
pub struct Gate {
    generation: u64,
    capacity: usize,
    semaphore: Semaphore,
    held: AtomicUsize,
    peak_held: AtomicUsize,
    bound: AtomicUsize,
    total_bound: AtomicUsize,
    disposed: AtomicBool,
    drained: Notify,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("generation", &self.generation)
            .field("capacity", &self.capacity)
            .field("held", &self.held())
            .field("bound", &self.bound())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Gate {
    pub fn new(generation: u64, capacity: usize) -> Arc<Self> {
        if capacity == 0 {
            tracing::warn!(generation, "Gate created with zero capacity - acquires will never succeed");
        } else {
            tracing::debug!(generation, capacity, "Gate created");
        }

        Arc::new(Self {
            generation,
            capacity,
            semaphore: Semaphore::new(capacity),
            held: AtomicUsize::new(0),
            peak_held: AtomicUsize::new(0),
            bound: AtomicUsize::new(0),
            total_bound: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            drained: Notify::new(),
        })
    }

    /// Wait for a free slot and take it.
    ///
    /// Fails with [`GateError::Closed`] if the gate is disposed while waiting.
    pub async fn acquire(self: &Arc<Self>) -> Result<SlotPermit, GateError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GateError::Closed {
                generation: self.generation,
            })?;
        permit.forget();
        Ok(self.mark_held())
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Option<SlotPermit>, GateError> {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(Some(self.mark_held()))
            }
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(GateError::Closed {
                generation: self.generation,
            }),
        }
    }

    fn mark_held(self: &Arc<Self>) -> SlotPermit {
        let held = self.held.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(
            held <= self.capacity,
            "gate {} holds {held} slots with capacity {}",
            self.generation,
            self.capacity
        );
        self.peak_held.fetch_max(held, Ordering::AcqRel);
        SlotPermit {
            generation: self.generation,
            gate: Some(Arc::clone(self)),
        }
    }

    /// Return one held slot to the pool.
    pub fn release(&self) -> Result<(), GateError> {
        self.held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| held.checked_sub(1))
            .map_err(|_| GateError::InvalidRelease {
                generation: self.generation,
            })?;
        self.semaphore.add_permits(1);
        self.notify_if_drained();
        Ok(())
    }

    /// Close the gate.
    ///
    /// Succeeds only if every slot is free: all permits are taken from the
    /// semaphore in one step before closing, so no acquire can slip in
    /// between the check and the close. A second dispose of an already
    /// drained gate is a no-op.
    pub fn dispose(&self) -> Result<(), GateError> {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match self.semaphore.try_acquire_many(all) {
            Ok(permits) => permits.forget(),
            Err(TryAcquireError::Closed) => {
                tracing::debug!(generation = self.generation, "Gate already disposed");
                return Ok(());
            }
            Err(TryAcquireError::NoPermits) if self.is_disposed() => {
                tracing::debug!(generation = self.generation, "Gate already disposed");
                return Ok(());
            }
            Err(TryAcquireError::NoPermits) => {
                return Err(GateError::PrematureDispose {
                    generation: self.generation,
                    held: self.capacity.saturating_sub(self.available()),
                });
            }
        }

        self.disposed.store(true, Ordering::Release);
        self.semaphore.close();
        tracing::info!(
            generation = self.generation,
            capacity = self.capacity,
            peak_held = self.peak_held(),
            "Gate disposed"
        );
        Ok(())
    }

    /// Register a worker as using this gate. The gate is not drained while
    /// any binding is alive.
    pub fn bind(self: &Arc<Self>) -> GateBinding {
        self.bound.fetch_add(1, Ordering::AcqRel);
        self.total_bound.fetch_add(1, Ordering::AcqRel);
        GateBinding {
            gate: Arc::clone(self),
        }
    }

    /// Resolve once no worker is bound and no slot is held.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    fn notify_if_drained(&self) {
        if self.is_drained() {
            self.drained.notify_waiters();
        }
    }

    pub fn is_drained(&self) -> bool {
        self.bound() == 0 && self.held() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }

    pub fn peak_held(&self) -> usize {
        self.peak_held.load(Ordering::Acquire)
    }

    pub fn bound(&self) -> usize {
        self.bound.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn summary(&self) -> GateSummary {
        GateSummary {
            generation: self.generation,
            capacity: self.capacity,
            workers_bound: self.total_bound.load(Ordering::Acquire),
            peak_held: self.peak_held(),
            disposed: self.is_disposed(),
        }
    }
}

/// A held slot. Returns to its gate via [`SlotPermit::release`].
///
/// Dropping an unreleased permit still returns the slot, but logs it: every
/// acquire is expected to be paired with an explicit release.
#[must_use = "a held slot must be released"]
pub struct SlotPermit {
    generation: u64,
    gate: Option<Arc<Gate>>,
}

impl SlotPermit {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(mut self) -> Result<(), GateError> {
        match self.gate.take() {
            Some(gate) => gate.release(),
            None => Err(GateError::InvalidRelease {
                generation: self.generation,
            }),
        }
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            tracing::warn!(generation = self.generation, "SlotPermit dropped without release");
            if let Err(e) = gate.release() {
                tracing::error!(generation = self.generation, error = %e, "Failed to return dropped slot");
            }
        }
    }
}

/// A worker's registration on the gate it captured at launch.
pub struct GateBinding {
    gate: Arc<Gate>,
}

impl GateBinding {
    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }
}

impl Drop for GateBinding {
    fn drop(&mut self) {
        self.gate.bound.fetch_sub(1, Ordering::AcqRel);
        self.gate.notify_if_drained();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_until_capacity() {
        let gate = Gate::new(0, 2);

        let p1 = gate.try_acquire().unwrap();
        let p2 = gate.try_acquire().unwrap();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(gate.try_acquire().unwrap().is_none());
        assert_eq!(gate.held(), 2);

        p1.unwrap().release().unwrap();
        assert_eq!(gate.held(), 1);
        assert!(gate.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn release_wakes_waiter() {
        let gate = Gate::new(0, 1);
        let first = gate.acquire().await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let permit = gate.acquire().await.unwrap();
                permit.release().unwrap();
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        first.release().unwrap();
        waiter.await.unwrap();
        assert_eq!(gate.held(), 0);
        assert_eq!(gate.peak_held(), 1);
    }

    #[tokio::test]
    async fn release_without_acquire_is_invalid() {
        let gate = Gate::new(3, 1);
        assert_eq!(
            gate.release(),
            Err(GateError::InvalidRelease { generation: 3 })
        );
        // The failed release must not have minted a permit.
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn dispose_with_held_slot_fails() {
        let gate = Gate::new(1, 2);
        let permit = gate.acquire().await.unwrap();

        assert_eq!(
            gate.dispose(),
            Err(GateError::PrematureDispose {
                generation: 1,
                held: 1
            })
        );
        assert!(!gate.is_disposed());

        permit.release().unwrap();
        gate.dispose().unwrap();
        assert!(gate.is_disposed());
    }

    #[tokio::test]
    async fn failed_dispose_leaves_gate_usable() {
        let gate = Gate::new(0, 1);
        let permit = gate.acquire().await.unwrap();
        assert!(gate.dispose().is_err());

        permit.release().unwrap();
        let again = gate.try_acquire().unwrap();
        assert!(again.is_some(), "gate must still serve after a rejected dispose");
        again.unwrap().release().unwrap();

        gate.dispose().unwrap();
        assert_eq!(gate.available(), 0);
        assert_eq!(
            gate.try_acquire().err(),
            Some(GateError::Closed { generation: 0 })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dispose_racing_acquirers_never_strands_a_slot() {
        const CAPACITY: usize = 2;
        let gate = Gate::new(0, CAPACITY);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                loop {
                    match gate.try_acquire() {
                        Ok(Some(permit)) => {
                            tokio::task::yield_now().await;
                            permit.release().unwrap();
                        }
                        Ok(None) => tokio::task::yield_now().await,
                        Err(_) => break,
                    }
                }
            }));
        }

        loop {
            match gate.dispose() {
                Ok(()) => break,
                Err(GateError::PrematureDispose { .. }) => tokio::task::yield_now().await,
                Err(e) => panic!("unexpected dispose error: {e}"),
            }
        }
        assert_eq!(gate.held(), 0);

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(gate.is_disposed());
        assert_eq!(gate.held(), 0);
        assert_eq!(gate.available(), 0);
        assert!(gate.peak_held() <= CAPACITY);
    }

    #[tokio::test]
    async fn dispose_twice_is_noop() {
        let gate = Gate::new(0, 2);
        gate.dispose().unwrap();
        gate.dispose().unwrap();
        assert!(gate.is_disposed());
        assert_eq!(gate.held(), 0);
    }

    #[tokio::test]
    async fn dispose_closes_waiters() {
        let gate = Gate::new(4, 0);
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await.map(|p| p.generation()) })
        };
        tokio::task::yield_now().await;

        gate.dispose().unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            Err(GateError::Closed { generation: 4 })
        );
        assert_eq!(
            gate.try_acquire().err(),
            Some(GateError::Closed { generation: 4 })
        );
    }

    #[tokio::test]
    async fn dropped_permit_returns_slot() {
        let gate = Gate::new(0, 1);
        {
            let _permit = gate.try_acquire().unwrap().unwrap();
        }
        assert_eq!(gate.held(), 0);
        assert!(gate.try_acquire().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_drained_tracks_bindings_and_slots() {
        let gate = Gate::new(0, 1);
        let binding = gate.bind();
        let permit = gate.acquire().await.unwrap();

        let drained = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_drained().await })
        };

        permit.release().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!drained.is_finished(), "binding still alive");

        drop(binding);
        tokio::time::timeout(Duration::from_secs(1), drained)
            .await
            .expect("gate should drain")
            .unwrap();
        assert_eq!(gate.summary().workers_bound, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_holders_never_exceed_capacity() {
        const CAPACITY: usize = 3;
        let gate = Gate::new(0, CAPACITY);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let permit = gate.acquire().await.unwrap();
                assert!(gate.held() <= CAPACITY);
                tokio::time::sleep(Duration::from_millis(2)).await;
                permit.release().unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gate.held(), 0);
        assert!(gate.peak_held() <= CAPACITY);
        assert_eq!(gate.available(), CAPACITY);
    }
}
