use std::collections::{HashMap, HashSet};

use futures_channel::oneshot;

use crate::{errors::InitError, types::Instance};

pub(crate) type ReadySender = oneshot::Sender<Result<Instance, InitError>>;
pub(crate) type ReadyReceiver = oneshot::Receiver<Result<Instance, InitError>>;

/// Lifecycle of a service name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Unregistered,
    Registered,
    Initializing,
    Initialized,
    Failed,
}

/// Single source of truth for readiness
///
/// `initializing`, `initialized` and `failed` are disjoint.
#[derive(Default)]
pub(crate) struct StateTracker {
    /// Bumped on reset, outcomes of older initializations are discarded
    generation: u64,
    initializing: HashSet<String>,
    initialized: HashSet<String>,
    failed: HashMap<String, InitError>,
    /// Waiters for a service to reach a terminal state
    waiters: HashMap<String, Vec<ReadySender>>,
}
impl StateTracker {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_initializing(&self, name: &str) -> bool {
        self.initializing.contains(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.initialized.contains(name)
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.contains_key(name)
    }

    pub fn failure(&self, name: &str) -> Option<&InitError> {
        self.failed.get(name)
    }

    /// Marks a name as initializing
    ///
    /// Returns false if it already was.
    pub fn begin(&mut self, name: &str) -> bool {
        self.initializing.insert(name.to_string())
    }

    /// Records a successful initialization and resolves all waiters
    ///
    /// Ignored if the tracker was reset since `generation`.
    pub fn complete(&mut self, generation: u64, name: &str, instance: &Instance) -> bool {
        if generation != self.generation {
            return false;
        }

        self.initializing.remove(name);
        self.initialized.insert(name.to_string());
        self.notify(name, Ok(instance.clone()));
        true
    }

    /// Records a failed initialization and rejects all waiters
    ///
    /// Ignored if the tracker was reset since `generation`.
    pub fn fail(&mut self, generation: u64, name: &str, error: &InitError) -> bool {
        if generation != self.generation {
            return false;
        }

        self.initializing.remove(name);
        self.failed.insert(name.to_string(), error.clone());
        self.notify(name, Err(error.clone()));
        true
    }

    /// Returns a name which is still initializing to `Registered`
    ///
    /// Waiters are rejected with [InitError::Cancelled]. Returns false if there was nothing
    /// to abandon, because the initialization finished or the tracker was reset.
    pub fn abandon(&mut self, generation: u64, name: &str) -> bool {
        if generation != self.generation || !self.initializing.remove(name) {
            return false;
        }

        self.notify(
            name,
            Err(InitError::Cancelled {
                name: name.to_string(),
            }),
        );
        true
    }

    /// Adds a waiter, resolved once the name reaches a terminal state
    pub fn subscribe(&mut self, name: &str) -> ReadyReceiver {
        let (tx, rx) = oneshot::channel();
        let waiters = self.waiters.entry(name.to_string()).or_default();
        // Drop waiters which already gave up
        waiters.retain(|waiter| !waiter.is_canceled());
        waiters.push(tx);
        rx
    }

    fn notify(&mut self, name: &str, message: Result<Instance, InitError>) {
        for waiter in self.waiters.remove(name).into_iter().flatten() {
            // Error can be ignored as it just means the receiver was dropped
            let _ = waiter.send(message.clone());
        }
    }

    pub fn initializing(&self) -> Vec<String> {
        sorted(self.initializing.iter())
    }

    pub fn initialized(&self) -> Vec<String> {
        sorted(self.initialized.iter())
    }

    pub fn failed(&self) -> Vec<String> {
        sorted(self.failed.keys())
    }

    /// Clears all state, pending waiters are dropped
    pub fn reset(&mut self) {
        self.generation += 1;
        self.initializing.clear();
        self.initialized.clear();
        self.failed.clear();
        self.waiters.clear();
    }
}

fn sorted<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = names.cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn completion_resolves_waiters() {
        let mut state = StateTracker::default();
        let rx = state.subscribe("db");
        let instance = Instance::new(1_u32);

        assert!(state.begin("db"));
        assert!(!state.begin("db"));
        assert!(state.complete(state.generation(), "db", &instance));

        let resolved = block_on(rx).unwrap().unwrap();
        assert!(resolved.ptr_eq(&instance));
        assert!(state.is_initialized("db"));
        assert!(!state.is_initializing("db"));
    }

    #[test]
    fn failure_rejects_waiters() {
        let mut state = StateTracker::default();
        let rx = state.subscribe("db");
        let error = InitError::Cancelled { name: "db".into() };

        state.begin("db");
        state.fail(state.generation(), "db", &error);

        assert!(matches!(block_on(rx).unwrap(), Err(InitError::Cancelled { .. })));
        assert_eq!(state.failed(), ["db"]);
        assert!(state.initializing().is_empty());
    }

    #[test]
    fn outcomes_from_before_reset_are_ignored() {
        let mut state = StateTracker::default();
        let generation = state.generation();
        state.begin("db");
        let rx = state.subscribe("db");

        state.reset();

        assert!(!state.complete(generation, "db", &Instance::new(())));
        assert!(!state.is_initialized("db"));
        // Pending waiters are dropped by the reset
        assert!(block_on(rx).is_err());
    }

    #[test]
    fn abandoned_initializations_reject_waiters() {
        let mut state = StateTracker::default();
        state.begin("db");
        let rx = state.subscribe("db");

        assert!(state.abandon(state.generation(), "db"));

        assert!(!state.is_initializing("db"));
        assert!(!state.is_failed("db"));
        assert!(matches!(block_on(rx).unwrap(), Err(InitError::Cancelled { .. })));
        // Finished initializations are left alone
        state.begin("db");
        state.complete(state.generation(), "db", &Instance::new(()));
        assert!(!state.abandon(state.generation(), "db"));
        assert!(state.is_initialized("db"));
    }
}
