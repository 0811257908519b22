//! Process-wide arm registry.
//!
//! The registry is an explicitly owned object built once at boot and
//! passed by handle to request handlers; there is no hidden global
//! state. It constructs one controller driver per configured board,
//! registers each arm through the fallible [`Registry::register`] (a
//! duplicate identity is an error, never a panic) and spawns the arm's
//! worker task. Shutdown drives every arm back to neutral and resets the
//! attached controllers.

use crate::config::{Config, ConfigError};
use crate::worker::{spawn_worker, ArmHandle};
use grip_core::ArmId;
use grip_hal::{Arm, ArmError, ArmSpec, HalError, PwmController, SharedController};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors raised while building the registry. All fatal at boot.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate arm identity {0}")]
    DuplicateArm(ArmId),

    #[error("controller {address:#04x} failed to initialize: {source}")]
    ControllerSetup {
        address: u16,
        #[source]
        source: HalError,
    },

    #[error("arm {id} failed to initialize: {source}")]
    ArmSetup {
        id: ArmId,
        #[source]
        source: ArmError,
    },

    #[error("arm {id} misconfigured: {source}")]
    InvalidArm {
        id: ArmId,
        #[source]
        source: ConfigError,
    },
}

/// Map from arm identity to live arm workers and their controllers.
pub struct Registry {
    arms: HashMap<ArmId, ArmHandle>,
    controllers: Vec<SharedController>,
}

impl Registry {
    /// Builds the registry from configuration: controllers first, then
    /// every arm, initialized and spawned as a worker.
    ///
    /// Must run inside a tokio runtime since it spawns the worker tasks.
    pub async fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self {
            arms: HashMap::new(),
            controllers: Vec::new(),
        };

        for controller_config in &config.controllers {
            let bus = controller_config.driver.create_bus();
            let controller = PwmController::new(
                bus,
                controller_config.address,
                controller_config.oscillator_hz,
                controller_config.resolution,
            )
            .map_err(|source| RegistryError::ControllerSetup {
                address: controller_config.address,
                source,
            })?;
            let shared: SharedController = Arc::new(Mutex::new(controller));
            registry.controllers.push(Arc::clone(&shared));

            for arm_config in &controller_config.arms {
                let id = controller_config.arm_id(arm_config);
                let spec = arm_config
                    .to_spec(controller_config.frequency)
                    .map_err(|source| RegistryError::InvalidArm {
                        id: id.clone(),
                        source,
                    })?;
                registry.register(id, spec, &shared).await?;
            }
        }

        info!(arms = registry.arms.len(), "registry populated");
        Ok(registry)
    }

    /// Registers one arm: rejects duplicate identities, initializes the
    /// hardware and spawns the worker task.
    pub async fn register(
        &mut self,
        id: ArmId,
        spec: ArmSpec,
        controller: &SharedController,
    ) -> Result<ArmHandle, RegistryError> {
        if self.arms.contains_key(&id) {
            return Err(RegistryError::DuplicateArm(id));
        }

        let mut arm = Arm::new(id.clone(), spec, Arc::clone(controller));
        arm.initialize()
            .await
            .map_err(|source| RegistryError::ArmSetup {
                id: id.clone(),
                source,
            })?;

        let handle = spawn_worker(arm);
        self.arms.insert(id, handle.clone());
        Ok(handle)
    }

    /// Looks up the worker handle for an arm identity.
    pub fn arm(&self, id: &ArmId) -> Option<&ArmHandle> {
        self.arms.get(id)
    }

    /// All known arm identities, sorted for stable output.
    pub fn arm_ids(&self) -> Vec<ArmId> {
        let mut ids: Vec<ArmId> = self.arms.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Stops every arm worker (neutral + power-off) and resets the
    /// attached controllers.
    pub async fn shutdown(&self) {
        for handle in self.arms.values() {
            if let Err(error) = handle.shutdown().await {
                warn!(arm = %handle.id(), error = %error, "arm worker shutdown failed");
            }
        }
        for controller in &self.controllers {
            let mut controller = controller.lock().await;
            if let Err(error) = controller.shutdown() {
                warn!(error = %error, "controller reset failed");
            }
        }
        info!("registry shut down");
    }
}
