use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{dependency_graph::DependencyGraphErrors, types::DynError};

/// Errors when registering a service descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The name is empty or not a usable identifier
    #[error("Invalid service name: '{name}'")]
    InvalidName { name: String },
    /// The descriptor carries no factory
    #[error("Service '{name}' was registered without a factory")]
    InvalidFactory { name: String },
    /// The factory would have no time to run
    #[error("Service '{name}' has a zero timeout")]
    InvalidTimeout { name: String },
    /// Overwriting registrations is disabled
    #[error("Service '{name}' is already registered")]
    AlreadyRegistered { name: String },
}

/// Errors while initializing services
#[derive(Error, Debug, Clone)]
pub enum InitError {
    /// No descriptor exists for the name
    #[error("{}", unregistered_message(name, required_by.as_deref()))]
    UnregisteredService {
        name: String,
        required_by: Option<String>,
    },

    /// The service is part of a dependency cycle
    #[error("Circular dependency detected for '{name}' through {chain:?}")]
    CircularDependency { name: String, chain: Vec<String> },

    /// A required service failed earlier, the failure is final
    #[error("Service '{name}' failed previously: {cause}")]
    PreviouslyFailed { name: String, cause: Box<InitError> },

    /// The factory did not finish in time
    #[error("Initialization of '{name}' timed out after {timeout:?}")]
    InitializationTimeout { name: String, timeout: Duration },

    /// The factory returned an error
    #[error("Factory for '{name}' failed - error: {error}")]
    FactoryFailed { name: String, error: Arc<DynError> },

    /// The orchestrator was reset, or the initialization was dropped before it finished
    #[error("Initialization of '{name}' was cancelled")]
    Cancelled { name: String },

    /// There are issues with the dependency graph
    #[error(transparent)]
    DependencyGraph(#[from] DependencyGraphErrors),
}

fn unregistered_message(name: &str, required_by: Option<&str>) -> String {
    match required_by {
        Some(dependent) => format!("Service '{name}' is not registered (required by '{dependent}')"),
        None => format!("Service '{name}' is not registered"),
    }
}

impl InitError {
    /// Name of the service the error is about, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            InitError::UnregisteredService { name, .. }
            | InitError::CircularDependency { name, .. }
            | InitError::PreviouslyFailed { name, .. }
            | InitError::InitializationTimeout { name, .. }
            | InitError::FactoryFailed { name, .. }
            | InitError::Cancelled { name } => Some(name),
            InitError::DependencyGraph(_) => None,
        }
    }

    /// Unwraps [InitError::PreviouslyFailed] down to the original failure
    pub fn root_cause(&self) -> &InitError {
        match self {
            InitError::PreviouslyFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Errors while waiting for a service to become ready
#[derive(Error, Debug, Clone)]
pub enum WaitError {
    /// The service did not become ready before the deadline
    #[error("Timed out after {timeout:?} waiting for '{name}'")]
    WaitTimeout { name: String, timeout: Duration },
    /// The service failed to initialize
    #[error(transparent)]
    Failed(#[from] InitError),
    /// The orchestrator was reset while waiting
    #[error("Waiting for '{name}' was cancelled")]
    Cancelled { name: String },
}

/// Errors when looking up initialized services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No instance was published under the name
    #[error("Service '{name}' is not available")]
    Missing { name: String },
    /// The instance has a different type
    #[error("Failed to downcast '{name}', required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        name: String,
        required_type: &'static str,
        actual_type: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_previous_failures() {
        let timeout = InitError::InitializationTimeout {
            name: "db".into(),
            timeout: Duration::from_millis(100),
        };
        let error = InitError::PreviouslyFailed {
            name: "db".into(),
            cause: Box::new(InitError::PreviouslyFailed {
                name: "db".into(),
                cause: Box::new(timeout),
            }),
        };

        assert!(matches!(
            error.root_cause(),
            InitError::InitializationTimeout { .. }
        ));
        assert_eq!(error.service(), Some("db"));
    }

    #[test]
    fn unregistered_message_names_dependent() {
        let error = InitError::UnregisteredService {
            name: "cache".into(),
            required_by: Some("api".into()),
        };

        assert_eq!(
            error.to_string(),
            "Service 'cache' is not registered (required by 'api')"
        );
    }
}
