use std::{collections::HashMap, time::Duration};

use futures::future::{self, Either};

use crate::{
    errors::{InitError, WaitError},
    orchestrator::Orchestrator,
    timer,
    types::Instance,
};

// Waiting for services initialized elsewhere
impl Orchestrator {
    /// Waits until the service is initialized, using the configured default timeout
    pub async fn wait_for(&self, name: &str) -> Result<Instance, WaitError> {
        self.wait_for_timeout(name, self.0.config.default_wait_timeout)
            .await
    }

    /// Waits until the service is initialized
    ///
    /// The service does not need to be registered yet. Resolves as soon as the
    /// initialization completes and fails immediately once it failed.
    pub async fn wait_for_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Instance, WaitError> {
        let mut deadline = timer::delay(timeout);
        loop {
            let rx = {
                let mut state = self.state();
                if state.is_initialized(name) {
                    if let Some(instance) = self.0.locator.get(name) {
                        return Ok(instance);
                    }
                }
                if let Some(error) = state.failure(name) {
                    return Err(WaitError::Failed(error.clone()));
                }
                state.subscribe(name)
            };

            match future::select(rx, &mut deadline).await {
                Either::Left((Ok(Ok(instance)), _)) => return Ok(instance),
                // The initialization was dropped, the service may still be initialized later
                Either::Left((Ok(Err(InitError::Cancelled { .. })), _)) => continue,
                Either::Left((Ok(Err(error)), _)) => return Err(WaitError::Failed(error)),
                Either::Left((Err(_), _)) => {
                    return Err(WaitError::Cancelled {
                        name: name.to_string(),
                    })
                }
                Either::Right(((), _)) => {
                    tracing::warn!(service = %name, ?timeout, "Timed out waiting for service");
                    return Err(WaitError::WaitTimeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
            }
        }
    }

    /// Waits for all services concurrently, using the configured default timeout
    pub async fn wait_for_all<I, S>(&self, names: I) -> Result<HashMap<String, Instance>, WaitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait_for_all_timeout(names, self.0.config.default_wait_timeout)
            .await
    }

    /// Waits for all services concurrently
    ///
    /// Fails as a whole if any of the waits fails.
    pub async fn wait_for_all_timeout<I, S>(
        &self,
        names: I,
        timeout: Duration,
    ) -> Result<HashMap<String, Instance>, WaitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let waits = names.into_iter().map(Into::into).map(|name: String| async move {
            let instance = self.wait_for_timeout(&name, timeout).await?;
            Ok::<_, WaitError>((name, instance))
        });

        let ready = future::try_join_all(waits).await?;
        Ok(ready.into_iter().collect())
    }
}
