//! The currently active gate, published atomically.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::Gate;

/// Outcome of a resize: the gate that stopped accepting new workers and the
/// gate that replaced it.
#[derive(Debug)]
pub struct Replaced {
    pub retired: Arc<Gate>,
    pub active: Arc<Gate>,
}

/// Single-writer handle to the gate new workers bind to.
///
/// Readers get a whole `Arc<Gate>` snapshot from a lock-free load, so they see
/// either the old gate or the new one. Workers waiting on a retired gate are
/// unaffected by the swap; they still hold their own reference to it.
pub struct ActiveGate {
    current: ArcSwap<Gate>,
}

impl ActiveGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: ArcSwap::new(Gate::new(0, capacity)),
        }
    }

    pub fn current(&self) -> Arc<Gate> {
        self.current.load_full()
    }

    pub fn capacity(&self) -> usize {
        self.current.load().capacity()
    }

    /// Publish a fresh gate with `capacity` slots.
    ///
    /// Only the driver calls this. The new gate's generation follows the one it
    /// replaces.
    pub fn replace(&self, capacity: usize) -> Replaced {
        let next = Gate::new(self.current.load().generation() + 1, capacity);
        let retired = self.current.swap(Arc::clone(&next));
        Replaced {
            retired,
            active: next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_publishes_next_generation() {
        let active = ActiveGate::new(2);
        let first = active.current();
        assert_eq!(first.generation(), 0);
        assert_eq!(active.capacity(), 2);

        let Replaced { retired, active: next } = active.replace(1);
        assert!(Arc::ptr_eq(&retired, &first));
        assert_eq!(next.generation(), 1);
        assert_eq!(next.capacity(), 1);
        assert!(Arc::ptr_eq(&active.current(), &next));
    }

    #[tokio::test]
    async fn retired_gate_keeps_serving_its_holders() {
        let active = ActiveGate::new(1);
        let old = active.current();
        let permit = old.acquire().await.unwrap();

        let Replaced { retired, .. } = active.replace(3);
        assert_eq!(retired.held(), 1);
        assert!(active.current().try_acquire().unwrap().is_some());

        permit.release().unwrap();
        assert_eq!(retired.held(), 0);
        retired.dispose().unwrap();
    }
}
