use std::{
    any::{type_name, Any},
    fmt::Debug,
    sync::Arc,
};

/// Errors raised by factories and health checks
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Services may be shared between tasks of a multithreaded executor,
/// so anything an orchestrator hands out needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Instance produced by a service factory
///
/// Cloning an instance clones the handle, never the service itself.
#[derive(Clone)]
pub struct Instance {
    type_name: &'static str,
    instance: Arc<dyn Any + Send + Sync + 'static>,
}
impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.type_name).finish()
    }
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: Injectable>(instance: Arc<T>) -> Self {
        Instance {
            type_name: type_name::<T>(),
            instance,
        }
    }

    /// Name of the type the factory produced
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcasts to the concrete service type
    ///
    /// On mismatch the name of the actual type is returned.
    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.instance.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.type_name),
        }
    }

    /// Whether both handles point to the same service
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_reports_actual_type() {
        let instance = Instance::new(String::from("db"));

        assert_eq!(*instance.downcast::<String>().unwrap(), "db");
        assert_eq!(
            instance.downcast::<u32>().unwrap_err(),
            type_name::<String>()
        );
    }

    #[test]
    fn clones_share_the_service() {
        let instance = Instance::new(5_u8);
        let clone = instance.clone();

        assert!(instance.ptr_eq(&clone));
        assert!(!instance.ptr_eq(&Instance::new(5_u8)));
    }
}
