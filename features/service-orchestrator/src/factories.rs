use std::{any::type_name, future::Future, marker::PhantomData, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

use crate::{
    errors::LookupError,
    types::{DynError, Injectable, Instance},
};

/// A service which knows how to construct itself
pub trait Initializable: Send + Sync + 'static {
    type Provides: Injectable;
    type Error: Into<DynError>;

    /// Constructs the provided instance
    ///
    /// Called once all declared dependencies are initialized.
    fn init(&self) -> impl Future<Output = Result<Self::Provides, Self::Error>> + Send;
}

/// A post initialization predicate for a service
pub trait HealthCheckable: Send + Sync + 'static {
    type Instance: Injectable;
    type Error: Into<DynError>;

    /// Returns true if the instance is healthy
    ///
    /// Errors are treated as unhealthy.
    fn check_health(
        &self,
        instance: Arc<Self::Instance>,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Adapts a closure into an [Initializable]
pub struct FnFactory<F>(pub F);
impl<F, Fut, T, E> Initializable for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Injectable,
    E: Into<DynError>,
{
    type Provides = T;
    type Error = E;

    fn init(&self) -> impl Future<Output = Result<T, E>> + Send {
        (self.0)()
    }
}

/// Adapts a closure into a [HealthCheckable]
pub struct FnHealthCheck<F, T> {
    check: F,
    _instance: PhantomData<fn(Arc<T>)>,
}
impl<F, T> FnHealthCheck<F, T> {
    pub fn new(check: F) -> Self {
        Self {
            check,
            _instance: PhantomData,
        }
    }
}
impl<F, Fut, T, E> HealthCheckable for FnHealthCheck<F, T>
where
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    T: Injectable,
    E: Into<DynError>,
{
    type Instance = T;
    type Error = E;

    fn check_health(&self, instance: Arc<T>) -> impl Future<Output = Result<bool, E>> + Send {
        (self.check)(instance)
    }
}

/// Type erased factory, as stored in a descriptor
pub(crate) trait DynFactory: Send + Sync {
    /// Name of the produced type
    fn provides(&self) -> &'static str;

    /// Runs the factory
    ///
    /// The future owns the factory, so it can be raced and dropped freely.
    fn construct(self: Arc<Self>) -> BoxFuture<'static, Result<Instance, DynError>>;
}
// Impl DynFactory for any Initializable
impl<F: Initializable> DynFactory for F {
    fn provides(&self) -> &'static str {
        type_name::<F::Provides>()
    }

    fn construct(self: Arc<Self>) -> BoxFuture<'static, Result<Instance, DynError>> {
        async move {
            // Forward the call to the specific implementation
            let provided = self.init().await.map_err(Into::<DynError>::into)?;
            Ok::<_, DynError>(Instance::new(provided))
        }
        .boxed()
    }
}

/// Factory handing out an instance which already exists
pub(crate) struct ReadyInstance(pub Instance);
impl DynFactory for ReadyInstance {
    fn provides(&self) -> &'static str {
        self.0.type_name()
    }

    fn construct(self: Arc<Self>) -> BoxFuture<'static, Result<Instance, DynError>> {
        let instance = self.0.clone();
        async move { Ok::<_, DynError>(instance) }.boxed()
    }
}

/// Type erased health check
pub(crate) trait DynHealthCheck: Send + Sync {
    fn check(
        self: Arc<Self>,
        service: String,
        instance: Instance,
    ) -> BoxFuture<'static, Result<bool, DynError>>;
}
impl<H: HealthCheckable> DynHealthCheck for H {
    fn check(
        self: Arc<Self>,
        service: String,
        instance: Instance,
    ) -> BoxFuture<'static, Result<bool, DynError>> {
        async move {
            let typed = instance
                .downcast::<H::Instance>()
                .map_err(|actual_type| LookupError::DowncastFailed {
                    name: service,
                    required_type: type_name::<H::Instance>(),
                    actual_type,
                })?;

            let healthy = self
                .check_health(typed)
                .await
                .map_err(Into::<DynError>::into)?;
            Ok::<_, DynError>(healthy)
        }
        .boxed()
    }
}
