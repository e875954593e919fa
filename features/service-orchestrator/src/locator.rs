use std::{
    any::type_name,
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    errors::LookupError,
    types::{Injectable, Instance},
};

/// Lookup of all initialized services
///
/// Handed out by the orchestrator, every clone sees instances published later on.
#[derive(Clone, Default)]
pub struct ServiceLocator(Arc<RwLock<HashMap<String, Instance>>>);
impl Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let instances = self.0.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (name, instance) in instances.iter() {
            map.entry(name, &instance.type_name());
        }
        map.finish()
    }
}

impl ServiceLocator {
    /// Publishes an instance, instances are written once per name
    pub(crate) fn publish(&self, name: &str, instance: Instance) {
        let mut instances = self.0.write().unwrap_or_else(PoisonError::into_inner);
        instances.entry(name.to_string()).or_insert(instance);
    }

    pub(crate) fn clear(&self) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn get(&self, name: &str) -> Option<Instance> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Gets the instance if it exists and has the requested type
    pub fn get_as<T: Injectable>(&self, name: &str) -> Option<Arc<T>> {
        self.require(name).ok()
    }

    /// Attempts to get the requested service
    pub fn require<T: Injectable>(&self, name: &str) -> Result<Arc<T>, LookupError> {
        let Some(instance) = self.get(name) else {
            return Err(LookupError::Missing {
                name: name.to_string(),
            });
        };

        instance
            .downcast()
            .map_err(|actual_type| LookupError::DowncastFailed {
                name: name.to_string(),
                required_type: type_name::<T>(),
                actual_type,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of all published services, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
