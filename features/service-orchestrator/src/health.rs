use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::orchestrator::Orchestrator;

/// Outcome of [Orchestrator::check_health]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: Vec<String>,
    pub unhealthy: Vec<String>,
}
impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }
}

impl Orchestrator {
    /// Runs the health checks of all services which registered one
    ///
    /// Checks run one after another in registration order. A check which fails or
    /// panics counts as unhealthy, as does a service which is not initialized.
    pub async fn check_health(&self) -> HealthReport {
        let checks: Vec<_> = self
            .services()
            .into_iter()
            .filter_map(|service| {
                let check = service.health_check.clone()?;
                Some((service.name.clone(), check))
            })
            .collect();

        let mut report = HealthReport::default();
        for (name, check) in checks {
            let healthy = match self.get(&name) {
                None => {
                    tracing::debug!(service = %name, "Service is not initialized - skipping health check");
                    false
                }
                Some(instance) => {
                    let checking = AssertUnwindSafe(check.check(name.clone(), instance));
                    match checking.catch_unwind().await {
                        Ok(Ok(healthy)) => healthy,
                        Ok(Err(error)) => {
                            tracing::warn!(service = %name, %error, "Health check failed");
                            false
                        }
                        Err(_) => {
                            tracing::warn!(service = %name, "Health check panicked");
                            false
                        }
                    }
                }
            };

            if healthy {
                report.healthy.push(name);
            } else {
                tracing::warn!(service = %name, "Service is unhealthy");
                report.unhealthy.push(name);
            }
        }

        report
    }
}
