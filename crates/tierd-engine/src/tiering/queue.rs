use std::collections::VecDeque;

use tierd_core::TenantId;

/// Round-robin queue of tenants registered with one tier loop.
#[derive(Debug, Default)]
pub struct MigrationQueue {
    tenants: VecDeque<TenantId>,
}

impl MigrationQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant at the back of the rotation.
    ///
    /// Returns `false` if the tenant was already queued.
    pub fn register(&mut self, tenant: TenantId) -> bool {
        if self.tenants.contains(&tenant) {
            return false;
        }
        self.tenants.push_back(tenant);
        true
    }

    /// Removes a tenant. Returns `false` if it was not queued.
    pub fn unregister(&mut self, tenant: TenantId) -> bool {
        let before = self.tenants.len();
        self.tenants.retain(|queued| *queued != tenant);
        self.tenants.len() != before
    }

    /// Next tenant in rotation; it moves to the back of the queue.
    pub fn next(&mut self) -> Option<TenantId> {
        let tenant = self.tenants.pop_front()?;
        self.tenants.push_back(tenant);
        Some(tenant)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_rotation() {
        let mut queue = MigrationQueue::new();
        let a = TenantId::new();
        let b = TenantId::new();
        let c = TenantId::new();
        queue.register(a);
        queue.register(b);
        queue.register(c);

        let order: Vec<_> = (0..6).filter_map(|_| queue.next()).collect();
        assert_eq!(order, vec![a, b, c, a, b, c]);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut queue = MigrationQueue::new();
        let a = TenantId::new();
        assert!(queue.register(a));
        assert!(!queue.register(a));
        assert_eq!(queue.len(), 1);

        assert!(queue.unregister(a));
        assert!(!queue.unregister(a));
        assert!(queue.is_empty());
        assert_eq!(queue.next(), None);
    }
}
