//! In-memory record of host port bindings owned by managed containers.
//!
//! The engine stays the source of truth for container existence and state;
//! the registry only remembers which host port each managed container was
//! given, so allocation can avoid handing the same port out twice. It is
//! written on run/remove/reconcile and read by everything else.

use dockapi_engine::{ContainerId, ManagedContainer, PortBinding};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry of managed containers' port bindings, keyed by full engine ID.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    bindings: RwLock<HashMap<ContainerId, PortBinding>>,
}

impl ContainerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Writers never leave the map half-updated; poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ContainerId, PortBinding>> {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ContainerId, PortBinding>> {
        self.bindings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the binding for a container, replacing any previous one.
    pub fn record(&self, id: ContainerId, binding: PortBinding) {
        self.write().insert(id, binding);
    }

    /// Records a managed container's binding.
    pub fn record_container(&self, container: &ManagedContainer) {
        self.record(container.id.clone(), container.binding());
    }

    /// Drops a container's record, logically releasing its host port.
    pub fn forget(&self, id: &ContainerId) -> Option<PortBinding> {
        self.write().remove(id)
    }

    /// Returns the recorded binding for a container.
    #[must_use]
    pub fn binding(&self, id: &ContainerId) -> Option<PortBinding> {
        self.read().get(id).copied()
    }

    /// Returns the container currently recorded as owning `host_port`.
    #[must_use]
    pub fn owner_of(&self, host_port: u16) -> Option<ContainerId> {
        self.read()
            .iter()
            .find(|(_, b)| b.host_port == host_port)
            .map(|(id, _)| id.clone())
    }

    /// Returns true if some container owns `host_port`.
    #[must_use]
    pub fn is_host_port_taken(&self, host_port: u16) -> bool {
        self.owner_of(host_port).is_some()
    }

    /// Recorded container IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<ContainerId> {
        self.read().keys().cloned().collect()
    }

    /// Forgets every container in `candidates` for which `gone` holds and
    /// returns the released bindings.
    ///
    /// Records added after `candidates` was taken are never touched.
    pub fn release_where(
        &self,
        candidates: &[ContainerId],
        gone: impl Fn(&ContainerId) -> bool,
    ) -> Vec<(ContainerId, PortBinding)> {
        let mut bindings = self.write();
        candidates
            .iter()
            .filter(|id| gone(id))
            .filter_map(|id| bindings.remove(id).map(|b| (id.clone(), b)))
            .collect()
    }

    /// Replaces the whole registry, e.g. after rediscovering containers from
    /// the engine.
    pub fn replace_all(&self, containers: impl IntoIterator<Item = (ContainerId, PortBinding)>) {
        let mut bindings = self.write();
        bindings.clear();
        bindings.extend(containers);
    }

    /// Number of recorded containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(host_port: u16) -> PortBinding {
        PortBinding {
            host_port,
            container_port: 80,
        }
    }

    #[test]
    fn record_and_forget() {
        let registry = ContainerRegistry::new();
        let id = ContainerId::from("abc");
        registry.record(id.clone(), binding(40000));

        assert_eq!(registry.binding(&id), Some(binding(40000)));
        assert_eq!(registry.owner_of(40000), Some(id.clone()));
        assert!(registry.is_host_port_taken(40000));

        assert_eq!(registry.forget(&id), Some(binding(40000)));
        assert!(!registry.is_host_port_taken(40000));
        assert!(registry.is_empty());
    }

    #[test]
    fn replace_all_drops_stale_records() {
        let registry = ContainerRegistry::new();
        registry.record(ContainerId::from("stale"), binding(40001));
        registry.replace_all([(ContainerId::from("fresh"), binding(40002))]);

        assert_eq!(registry.len(), 1);
        assert!(registry.binding(&ContainerId::from("stale")).is_none());
        assert_eq!(registry.owner_of(40002), Some(ContainerId::from("fresh")));
    }

    #[test]
    fn release_where_only_touches_candidates() {
        let registry = ContainerRegistry::new();
        registry.record(ContainerId::from("gone"), binding(40003));
        registry.record(ContainerId::from("alive"), binding(40004));
        let candidates = registry.ids();
        registry.record(ContainerId::from("late"), binding(40005));

        let released = registry.release_where(&candidates, |id| id.as_str() != "alive");

        assert_eq!(released, vec![(ContainerId::from("gone"), binding(40003))]);
        assert!(!registry.is_host_port_taken(40003));
        assert!(registry.is_host_port_taken(40004));
        assert!(registry.is_host_port_taken(40005));
    }
}
