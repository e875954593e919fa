//! Service Orchestrator initializes named services in dependency order.
//!
//! Services are registered as [ServiceDescriptor]s, each with a factory, the names
//! of the services it depends on, whether it is required and how long its factory may take.
//! Initializing a service first initializes its dependencies, one after another in declared
//! order, then races its factory against the timeout.
//!
//! - Failures of required services propagate to the caller, failures of optional
//!   services are logged and the service is treated as absent.
//! - Every service initializes at most once, later requests return the cached instance
//!   or the recorded failure.
//! - Circular dependencies are reported as [InitError::CircularDependency] instead of deadlocking.
//!
//! Initialized services are published to a [ServiceLocator], which can be handed to the rest
//! of the application. Callers which don't own the orchestration can [Orchestrator::wait_for]
//! a service, and [Orchestrator::check_health] runs the registered health checks.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use service_orchestrator::{Orchestrator, ServiceDescriptor};
//!
//! struct Config {
//!     url: String,
//! }
//! struct Database {
//!     url: String,
//! }
//!
//! let orchestrator = Orchestrator::new();
//! orchestrator
//!     .register(ServiceDescriptor::new("config").instance(Config {
//!         url: "postgres://localhost".to_string(),
//!     }))
//!     .unwrap();
//!
//! let locator = orchestrator.locator();
//! orchestrator
//!     .register(
//!         ServiceDescriptor::new("database")
//!             .depends_on(["config"])
//!             .factory(move || {
//!                 let locator = locator.clone();
//!                 async move {
//!                     let config = locator.require::<Config>("config")?;
//!                     Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Database {
//!                         url: config.url.clone(),
//!                     })
//!                 }
//!             }),
//!     )
//!     .unwrap();
//!
//! let services = futures::executor::block_on(orchestrator.initialize_all()).unwrap();
//! let database: Arc<Database> = services.require("database").unwrap();
//! assert_eq!(database.url, "postgres://localhost");
//! ```
//!
//! The crate consists of the following components:
//!
//! 1. Descriptor - declaring services and their factories
//! 2. Dependency Graph - ordering services and detecting cycles
//! 3. Orchestrator - the initialization state machine
//! 4. Locator - lookup of initialized services
//! 5. Waiter and Health - readiness and health queries

pub mod config;
pub mod dependency_graph;
pub mod descriptor;
pub mod errors;
pub mod factories;
pub mod health;
pub mod locator;
pub mod orchestrator;
pub mod state;
pub mod timer;
pub mod types;
mod waiter;

pub use config::OrchestratorConfig;
pub use dependency_graph::{DependencyGraph, DependencyGraphError, DependencyGraphErrors};
pub use descriptor::ServiceDescriptor;
pub use errors::{InitError, LookupError, RegisterError, WaitError};
pub use factories::{HealthCheckable, Initializable};
pub use health::HealthReport;
pub use locator::ServiceLocator;
pub use orchestrator::{DebugInfo, Orchestrator};
pub use state::ServiceState;
pub use types::{DynError, Injectable, Instance};
