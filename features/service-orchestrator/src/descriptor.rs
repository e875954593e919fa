use std::{collections::HashMap, fmt::Debug, future::Future, sync::Arc, time::Duration};

use crate::{
    errors::RegisterError,
    factories::{
        DynFactory, DynHealthCheck, FnFactory, FnHealthCheck, HealthCheckable, Initializable,
        ReadyInstance,
    },
    types::{DynError, Injectable, Instance},
};

/// Configuration of a single service
///
/// ```rust
/// # use std::{convert::Infallible, time::Duration};
/// # use service_orchestrator::ServiceDescriptor;
/// struct Database;
///
/// let descriptor = ServiceDescriptor::new("database")
///     .depends_on(["config"])
///     .timeout(Duration::from_secs(5))
///     .factory(|| async { Ok::<_, Infallible>(Database) });
/// ```
pub struct ServiceDescriptor {
    name: String,
    factory: Option<Arc<dyn DynFactory>>,
    dependencies: Vec<String>,
    required: bool,
    timeout: Option<Duration>,
    health_check: Option<Arc<dyn DynHealthCheck>>,
}
impl Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("provides", &self.factory.as_ref().map(|f| f.provides()))
            .field("dependencies", &self.dependencies)
            .field("required", &self.required)
            .field("timeout", &self.timeout)
            .field("health_check", &self.health_check.is_some())
            .finish()
    }
}

impl ServiceDescriptor {
    /// Creates a required descriptor without factory or dependencies
    pub fn new(name: impl Into<String>) -> Self {
        ServiceDescriptor {
            name: name.into(),
            factory: None,
            dependencies: Vec::new(),
            required: true,
            timeout: None,
            health_check: None,
        }
    }

    /// Uses a closure as factory
    pub fn factory<F, Fut, T, E>(self, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Injectable,
        E: Into<DynError>,
    {
        self.initializable(FnFactory(factory))
    }

    /// Uses a service wrapper as factory
    pub fn initializable<I: Initializable>(mut self, service: I) -> Self {
        self.factory = Some(Arc::new(service));
        self
    }

    /// Uses an already constructed instance
    pub fn instance<T: Injectable>(mut self, instance: T) -> Self {
        self.factory = Some(Arc::new(ReadyInstance(Instance::new(instance))));
        self
    }

    /// Adds dependencies, they are initialized in the given order
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Failures of optional services are logged and absorbed
    pub fn optional(self) -> Self {
        self.required(false)
    }

    /// Maximum time the factory may take, must not be zero
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a closure as health check
    pub fn health_check<F, Fut, T, E>(self, check: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        T: Injectable,
        E: Into<DynError>,
    {
        self.health_checkable(FnHealthCheck::<F, T>::new(check))
    }

    pub fn health_checkable<H: HealthCheckable>(mut self, check: H) -> Self {
        self.health_check = Some(Arc::new(check));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Resolves the descriptor into its registered form
    pub(crate) fn into_registered(
        self,
        default_timeout: Duration,
    ) -> Result<RegisteredService, RegisterError> {
        validate_name(&self.name)?;

        let Some(factory) = self.factory else {
            return Err(RegisterError::InvalidFactory { name: self.name });
        };

        let timeout = self.timeout.unwrap_or(default_timeout);
        if timeout.is_zero() {
            return Err(RegisterError::InvalidTimeout { name: self.name });
        }

        Ok(RegisteredService {
            name: self.name,
            factory,
            dependencies: self.dependencies,
            required: self.required,
            timeout,
            health_check: self.health_check,
        })
    }
}

/// Names must be non empty, without surrounding whitespace or control characters
fn validate_name(name: &str) -> Result<(), RegisterError> {
    let valid = !name.is_empty()
        && name.trim() == name
        && !name.chars().any(char::is_control);

    if valid {
        Ok(())
    } else {
        Err(RegisterError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// A validated descriptor, as stored in the [DescriptorTable]
pub(crate) struct RegisteredService {
    pub name: String,
    pub factory: Arc<dyn DynFactory>,
    pub dependencies: Vec<String>,
    pub required: bool,
    pub timeout: Duration,
    pub health_check: Option<Arc<dyn DynHealthCheck>>,
}

/// All registered services, in registration order
#[derive(Default)]
pub(crate) struct DescriptorTable {
    order: Vec<String>,
    entries: HashMap<String, Arc<RegisteredService>>,
}
impl DescriptorTable {
    /// Stores the service, returning the descriptor it replaced
    ///
    /// A replaced service keeps its original position.
    pub fn insert(&mut self, service: RegisteredService) -> Option<Arc<RegisteredService>> {
        let name = service.name.clone();
        let previous = self.entries.insert(name.clone(), Arc::new(service));
        if previous.is_none() {
            self.order.push(name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredService>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates services in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredService>> + '_ {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}
