use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Explicit name -> implementation registry, passed by reference to whoever
/// needs lookups.
pub struct NamedRegistry<T: ?Sized> {
    entries: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: ?Sized> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: ?Sized> NamedRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` under `name`, returning any instance it replaced.
    pub fn register(&self, name: impl Into<String>, instance: Arc<T>) -> Option<Arc<T>> {
        self.entries.write().insert(name.into(), instance)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<T>> {
        self.entries.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Instances in name order.
    pub fn instances(&self) -> Vec<Arc<T>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn replaces_and_lists_in_order() {
        let registry: NamedRegistry<dyn Greeter> = NamedRegistry::new();
        assert!(registry.register("b", Arc::new(Fixed("first"))).is_none());
        registry.register("a", Arc::new(Fixed("alpha")));
        let replaced = registry.register("b", Arc::new(Fixed("second")));

        assert_eq!(replaced.map(|g| g.greet()), Some("first".to_string()));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("b").map(|g| g.greet()), Some("second".to_string()));
        assert!(registry.unregister("a").is_some());
        assert!(!registry.contains("a"));
        assert_eq!(registry.len(), 1);
    }
}
