use std::{
    any::Any,
    collections::BTreeMap,
    fmt::{Debug, Display},
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{
    future::{self, BoxFuture, Either},
    FutureExt,
};

use crate::{
    config::OrchestratorConfig,
    dependency_graph::{DependencyGraph, DependencyGraphError, DependencyGraphErrors},
    descriptor::{DescriptorTable, RegisteredService, ServiceDescriptor},
    errors::{InitError, RegisterError},
    locator::ServiceLocator,
    state::{ReadyReceiver, ServiceState, StateTracker},
    timer,
    types::{DynError, Injectable, Instance},
};

/// Registers services and initializes them in dependency order
///
/// The orchestrator is a cheap handle, clones share all registrations and state.
/// It never spawns tasks - the futures it returns are driven by the caller's executor.
#[derive(Clone)]
pub struct Orchestrator(pub(crate) Arc<OrchestratorInner>);
pub(crate) struct OrchestratorInner {
    pub config: OrchestratorConfig,
    descriptors: Mutex<DescriptorTable>,
    state: Mutex<StateTracker>,
    pub locator: ServiceLocator,
}
impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
impl Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.descriptors().iter().map(|s| s.name.clone()).collect();
        let mut map = f.debug_struct("Orchestrator");
        for name in &names {
            map.field(name, &self.state_of(name));
        }
        map.finish()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        Orchestrator(Arc::new(OrchestratorInner {
            config,
            descriptors: Mutex::new(DescriptorTable::default()),
            state: Mutex::new(StateTracker::default()),
            locator: ServiceLocator::default(),
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.0.config
    }

    /// Registers a service
    ///
    /// Dependencies are not validated here, so services can be registered in any order.
    pub fn register(&self, descriptor: ServiceDescriptor) -> Result<(), RegisterError> {
        let service = descriptor.into_registered(self.0.config.default_timeout)?;
        let mut descriptors = self.descriptors();

        if descriptors.contains(&service.name) {
            if !self.0.config.allow_overwrite {
                return Err(RegisterError::AlreadyRegistered { name: service.name });
            }
            tracing::warn!(service = %service.name, "Service registered twice - replacing previous descriptor");
        }

        tracing::debug!(
            service = %service.name,
            provides = service.factory.provides(),
            dependencies = ?service.dependencies,
            required = service.required,
            "Registered service"
        );
        descriptors.insert(service);
        Ok(())
    }

    /// Initializes a service and, before it, all of its dependencies
    ///
    /// Returns the cached instance if the service is already initialized.
    /// Failures of optional services are logged and reported as `None`.
    pub async fn initialize(&self, name: &str) -> Result<Option<Instance>, InitError> {
        self.initialize_in_chain(name.to_string(), Vec::new()).await
    }

    /// Initializes all registered services in dependency order
    ///
    /// Aborts on the first failing required service, services not yet attempted stay registered.
    pub async fn initialize_all(&self) -> Result<ServiceLocator, InitError> {
        let order = self.compute_order()?;
        let service_count = order.len();
        tracing::info!("Initializing {service_count} services");

        for (index, name) in order.iter().enumerate() {
            tracing::debug!(service = %name, "Initializing service [{} of {service_count}]", index + 1);
            self.initialize(name).await?;
        }

        tracing::info!("All {service_count} services processed");
        Ok(self.locator())
    }

    /// Computes an order in which every dependency precedes its dependents
    pub fn compute_order(&self) -> Result<Vec<String>, InitError> {
        let order = self.graph().execution_order().map_err(|error| match error {
            DependencyGraphError::CircularDependency { chain } => InitError::CircularDependency {
                name: chain.first().cloned().unwrap_or_default(),
                chain,
            },
            other => InitError::DependencyGraph(DependencyGraphErrors {
                errors: vec![other],
            }),
        })?;

        tracing::debug!(order = ?order, "Computed initialization order");
        Ok(order)
    }

    /// Snapshot of the registered dependency graph
    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::new(&self.descriptors())
    }

    /// Checks the dependency graph for missing dependencies and cycles without running anything
    pub fn validate(&self) -> Result<(), DependencyGraphErrors> {
        self.graph().check()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.descriptors().contains(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.state().is_initialized(name)
    }

    pub fn state_of(&self, name: &str) -> ServiceState {
        let registered = self.is_registered(name);
        let state = self.state();

        if state.is_initialized(name) {
            ServiceState::Initialized
        } else if state.is_failed(name) {
            ServiceState::Failed
        } else if state.is_initializing(name) {
            ServiceState::Initializing
        } else if registered {
            ServiceState::Registered
        } else {
            ServiceState::Unregistered
        }
    }

    /// Gets an initialized service, never fails
    pub fn get(&self, name: &str) -> Option<Instance> {
        self.0.locator.get(name)
    }

    /// Gets an initialized service of the given type
    pub fn get_as<T: Injectable>(&self, name: &str) -> Option<Arc<T>> {
        self.0.locator.get_as(name)
    }

    /// Lookup of all initialized services
    pub fn locator(&self) -> ServiceLocator {
        self.0.locator.clone()
    }

    /// Recorded failure of a service
    pub fn failure(&self, name: &str) -> Option<InitError> {
        self.state().failure(name).cloned()
    }

    /// Read only snapshot for diagnostics
    pub fn debug_info(&self) -> DebugInfo {
        let descriptors = self.descriptors();
        let state = self.state();

        DebugInfo {
            registered: descriptors.iter().map(|s| s.name.clone()).collect(),
            initialized: state.initialized(),
            failed: state.failed(),
            initializing: state.initializing(),
            dependencies: descriptors
                .iter()
                .map(|s| (s.name.clone(), s.dependencies.clone()))
                .collect(),
        }
    }

    /// Forgets all services, instances and state
    ///
    /// Meant for isolating tests. Pending waiters are cancelled and
    /// initializations still in flight can no longer publish their instances.
    pub fn reset(&self) {
        let mut descriptors = self.descriptors();
        let mut state = self.state();

        descriptors.clear();
        state.reset();
        self.0.locator.clear();
        tracing::debug!("Orchestrator reset");
    }
}

/// What to do with an initialize request
enum Step {
    Ready(Instance),
    /// Optional service which failed before
    Absent,
    /// The service is initializing on another task
    Join { required: bool, rx: ReadyReceiver },
    Run {
        service: Arc<RegisteredService>,
        generation: u64,
    },
}

// Initialization state machine
impl Orchestrator {
    /// `chain` holds the services whose initialization led to this call, outermost first
    fn initialize_in_chain(
        &self,
        name: String,
        chain: Vec<String>,
    ) -> BoxFuture<'_, Result<Option<Instance>, InitError>> {
        async move {
            loop {
                let (service, generation) = match self.prepare(&name, &chain)? {
                    Step::Ready(instance) => return Ok(Some(instance)),
                    Step::Absent => return Ok(None),
                    Step::Join { required, rx } => match rx.await {
                        Ok(Ok(instance)) => return Ok(Some(instance)),
                        // The initializing task was dropped, take over
                        Ok(Err(InitError::Cancelled { .. })) => continue,
                        Ok(Err(_)) if !required => return Ok(None),
                        Ok(Err(error)) => return Err(error),
                        Err(_) => return Err(InitError::Cancelled { name }),
                    },
                    Step::Run {
                        service,
                        generation,
                    } => (service, generation),
                };

                let _guard = InitializingGuard {
                    orchestrator: self,
                    name: name.clone(),
                    generation,
                };
                let result = self.run(&service, chain.clone()).await;
                return self.finish(&service, generation, result);
            }
        }
        .boxed()
    }

    /// Decides how to handle a request and marks the service as initializing if it has to run
    fn prepare(&self, name: &str, chain: &[String]) -> Result<Step, InitError> {
        let descriptors = self.descriptors();
        let mut state = self.state();

        if state.is_initialized(name) {
            if let Some(instance) = self.0.locator.get(name) {
                return Ok(Step::Ready(instance));
            }
        }

        let service = descriptors.get(name);
        let required = service.as_ref().map_or(true, |service| service.required);

        if let Some(cause) = state.failure(name) {
            if !required {
                tracing::debug!(service = %name, "Optional service failed previously - skipping");
                return Ok(Step::Absent);
            }
            return Err(InitError::PreviouslyFailed {
                name: name.to_string(),
                cause: Box::new(cause.clone()),
            });
        }

        // Re-entering a service of our own chain is a cycle
        if let Some(start) = chain.iter().position(|entry| entry == name) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(name.to_string());
            return Err(InitError::CircularDependency {
                name: name.to_string(),
                chain: cycle,
            });
        }

        if state.is_initializing(name) {
            // Initializing on another task - waiting is only safe if it does not need us
            let graph = DependencyGraph::new(&descriptors);
            if let Some(path) = graph.find_path(name, |dependency| chain.iter().any(|c| c == dependency)) {
                let ancestor = path.last().map(String::as_str).unwrap_or(name);
                let start = chain.iter().position(|c| c == ancestor).unwrap_or(0);
                let mut cycle = chain[start..].to_vec();
                cycle.extend(path);
                return Err(InitError::CircularDependency {
                    name: name.to_string(),
                    chain: cycle,
                });
            }

            tracing::debug!(service = %name, "Service is already initializing - waiting for it");
            return Ok(Step::Join {
                required,
                rx: state.subscribe(name),
            });
        }

        let Some(service) = service else {
            tracing::error!(service = %name, required_by = ?chain.last(), "Tried to initialize an unregistered service");
            return Err(InitError::UnregisteredService {
                name: name.to_string(),
                required_by: chain.last().cloned(),
            });
        };

        state.begin(name);
        Ok(Step::Run {
            service,
            generation: state.generation(),
        })
    }

    /// Initializes the dependencies one by one, then races the factory against its timeout
    async fn run(&self, service: &RegisteredService, mut chain: Vec<String>) -> Result<Instance, InitError> {
        chain.push(service.name.clone());

        for dependency in &service.dependencies {
            tracing::debug!(service = %service.name, dependency = %dependency, "Initializing dependency");
            self.initialize_in_chain(dependency.clone(), chain.clone())
                .await?;
        }

        tracing::debug!(service = %service.name, timeout = ?service.timeout, "Running factory");
        let construction = AssertUnwindSafe(service.factory.clone().construct()).catch_unwind();

        // The losing factory is dropped, which cancels it at its next suspension point
        match future::select(construction, timer::delay(service.timeout)).await {
            Either::Left((Ok(Ok(instance)), _)) => Ok(instance),
            Either::Left((Ok(Err(error)), _)) => Err(InitError::FactoryFailed {
                name: service.name.clone(),
                error: Arc::new(error),
            }),
            Either::Left((Err(panic), _)) => Err(InitError::FactoryFailed {
                name: service.name.clone(),
                error: Arc::new(panic_error(panic)),
            }),
            Either::Right(((), _)) => Err(InitError::InitializationTimeout {
                name: service.name.clone(),
                timeout: service.timeout,
            }),
        }
    }

    /// Records the outcome, publishes the instance and applies the failure policy
    fn finish(
        &self,
        service: &RegisteredService,
        generation: u64,
        result: Result<Instance, InitError>,
    ) -> Result<Option<Instance>, InitError> {
        let name = &service.name;
        let mut state = self.state();

        if state.generation() != generation {
            tracing::debug!(service = %name, "Orchestrator was reset - discarding outcome");
            return Err(InitError::Cancelled { name: name.clone() });
        }

        match result {
            Ok(instance) => {
                self.0.locator.publish(name, instance.clone());
                state.complete(generation, name, &instance);
                tracing::debug!(service = %name, provides = instance.type_name(), "Service initialized");
                Ok(Some(instance))
            }
            Err(error) => {
                state.fail(generation, name, &error);

                if service.required {
                    tracing::error!(service = %name, %error, "Required service failed to initialize");
                    Err(error)
                } else {
                    tracing::warn!(service = %name, %error, "Optional service failed to initialize - continuing without it");
                    Ok(None)
                }
            }
        }
    }

    fn descriptors(&self) -> MutexGuard<'_, DescriptorTable> {
        self.0
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, StateTracker> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn services(&self) -> Vec<Arc<RegisteredService>> {
        self.descriptors().iter().cloned().collect()
    }
}

/// Returns a service to `Registered` if its initialization is dropped before it finished
///
/// Happens when the caller stops polling, e.g. a factory calling `initialize` lost its timeout race.
struct InitializingGuard<'a> {
    orchestrator: &'a Orchestrator,
    name: String,
    generation: u64,
}
impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        if self.orchestrator.state().abandon(self.generation, &self.name) {
            tracing::warn!(service = %self.name, "Initialization was dropped before it finished");
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> DynError {
    let message = match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    };
    format!("factory panicked: {message}").into()
}

/// Read only snapshot of an [Orchestrator]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    /// In registration order
    pub registered: Vec<String>,
    pub initialized: Vec<String>,
    pub failed: Vec<String>,
    pub initializing: Vec<String>,
    /// Declared dependencies per service
    pub dependencies: BTreeMap<String, Vec<String>>,
}
impl Display for DebugInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "registered:   {}", self.registered.join(", "))?;
        writeln!(f, "initialized:  {}", self.initialized.join(", "))?;
        writeln!(f, "initializing: {}", self.initializing.join(", "))?;
        writeln!(f, "failed:       {}", self.failed.join(", "))?;
        writeln!(f, "dependencies:")?;
        for (name, dependencies) in &self.dependencies {
            writeln!(f, "  {name} -> [{}]", dependencies.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use futures::executor::block_on;

    use super::*;

    fn unit(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name).instance(())
    }

    #[test]
    fn overwriting_replaces_the_descriptor() {
        let orchestrator = Orchestrator::new();
        orchestrator.register(unit("logger")).unwrap();
        orchestrator
            .register(ServiceDescriptor::new("logger").instance(String::from("json")))
            .unwrap();

        let logger: Arc<String> = block_on(orchestrator.initialize("logger"))
            .unwrap()
            .unwrap()
            .downcast()
            .unwrap();
        assert_eq!(*logger, "json");
        assert_eq!(orchestrator.debug_info().registered, ["logger"]);
    }

    #[test]
    fn overwriting_can_be_disabled() {
        let orchestrator =
            Orchestrator::with_config(OrchestratorConfig::default().allow_overwrite(false));
        orchestrator.register(unit("logger")).unwrap();

        assert_eq!(
            orchestrator.register(unit("logger")),
            Err(RegisterError::AlreadyRegistered {
                name: "logger".into()
            })
        );
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let orchestrator = Orchestrator::new();

        assert!(matches!(
            orchestrator.register(unit("")),
            Err(RegisterError::InvalidName { .. })
        ));
        assert!(matches!(
            orchestrator.register(ServiceDescriptor::new("no-factory")),
            Err(RegisterError::InvalidFactory { .. })
        ));
        assert!(!orchestrator.is_registered("no-factory"));
    }

    #[test]
    fn default_timeout_comes_from_config() {
        let orchestrator = Orchestrator::with_config(
            OrchestratorConfig::default().default_timeout(Duration::from_millis(10)),
        );
        orchestrator
            .register(
                ServiceDescriptor::new("hanging")
                    .factory(|| future::pending::<Result<(), Infallible>>()),
            )
            .unwrap();

        let error = block_on(orchestrator.initialize("hanging")).unwrap_err();

        assert!(matches!(
            error,
            InitError::InitializationTimeout { timeout, .. } if timeout == Duration::from_millis(10)
        ));
    }

    #[test]
    fn state_follows_the_lifecycle() {
        let orchestrator = Orchestrator::new();
        assert_eq!(orchestrator.state_of("a"), ServiceState::Unregistered);

        orchestrator.register(unit("a")).unwrap();
        assert_eq!(orchestrator.state_of("a"), ServiceState::Registered);

        block_on(orchestrator.initialize("a")).unwrap();
        assert_eq!(orchestrator.state_of("a"), ServiceState::Initialized);
        assert!(orchestrator.get_as::<()>("a").is_some());
        assert!(orchestrator.get_as::<String>("a").is_none());
    }

    #[test]
    fn compute_order_places_dependencies_first() {
        let orchestrator = Orchestrator::new();
        orchestrator
            .register(unit("api").depends_on(["db", "cache"]))
            .unwrap();
        orchestrator.register(unit("cache").depends_on(["config"])).unwrap();
        orchestrator.register(unit("db").depends_on(["config"])).unwrap();
        orchestrator.register(unit("config")).unwrap();

        assert_eq!(
            orchestrator.compute_order().unwrap(),
            ["config", "db", "cache", "api"]
        );
    }

    #[test]
    fn validate_reports_all_issues() {
        let orchestrator = Orchestrator::new();
        orchestrator.register(unit("a").depends_on(["b"])).unwrap();
        orchestrator.register(unit("b").depends_on(["a"])).unwrap();
        orchestrator.register(unit("c").depends_on(["missing"])).unwrap();

        let errors = orchestrator.validate().unwrap_err().errors;

        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&DependencyGraphError::MissingDependency {
            dependency: "missing".into(),
            required_by: "c".into(),
        }));
        assert!(errors.contains(&DependencyGraphError::CircularDependency {
            chain: vec!["a".into(), "b".into(), "a".into()],
        }));
    }

    #[test]
    fn debug_info_lists_services_and_edges() {
        let orchestrator = Orchestrator::new();
        orchestrator.register(unit("b").depends_on(["a"])).unwrap();
        orchestrator.register(unit("a")).unwrap();
        block_on(orchestrator.initialize("a")).unwrap();

        let info = orchestrator.debug_info();

        assert_eq!(info.registered, ["b", "a"]);
        assert_eq!(info.initialized, ["a"]);
        assert!(info.failed.is_empty());
        assert_eq!(info.dependencies, orchestrator.graph().edges());
        assert!(info.to_string().contains("b -> [a]"));
        assert_eq!(
            format!("{orchestrator:?}"),
            "Orchestrator { b: Registered, a: Initialized }"
        );
    }
}
