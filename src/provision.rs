//! Provisioning workflow
//!
//! Generates a key pair, renders the interface config and installs all
//! three artifacts. Calls for the same interface name are serialized.
//! Callers that may be cancelled use [`Provisioner::provision_detached`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::error::ProvisioningError;
use crate::installer::{InstalledArtifacts, Installer};
use crate::keygen::{key_text, KeyGenerator};
use crate::render::{compose_address, ConfigRenderer, InterfaceOptions, InterfaceProfile};
use crate::validation;

/// Parameters of one provisioning call
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub name: String,
    pub address: String,
    pub mask: String,
    /// Textual port, parsed before anything is run
    pub listen_port: String,
    pub profile: InterfaceProfile,
}

/// Result of a successful provisioning call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedInterface {
    pub name: String,
    pub public_key: String,
    pub artifacts: InstalledArtifacts,
}

/// Per-interface async locks
///
/// Entries exist only while someone holds or waits for the lock.
#[derive(Debug, Default)]
pub struct InterfaceLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InterfaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `name` remains
    pub async fn lock(&self, name: &str) -> InterfaceGuard<'_> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(name.to_string()).or_default())
        };
        let guard = Arc::clone(&mutex).lock_owned().await;
        InterfaceGuard {
            locks: self,
            name: name.to_string(),
            mutex,
            guard: Some(guard),
        }
    }

    /// Number of names with a holder or waiter
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held lock for one interface name
pub struct InterfaceGuard<'a> {
    locks: &'a InterfaceLocks,
    name: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InterfaceGuard<'_> {
    fn drop(&mut self) {
        // Release first so the owned guard's reference is gone
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference here, one in the map: nobody else is waiting
        if Arc::strong_count(&self.mutex) == 2 {
            map.remove(&self.name);
        }
    }
}

/// Runs the provisioning pipeline
pub struct Provisioner {
    keys: KeyGenerator,
    renderer: Arc<ConfigRenderer>,
    installer: Installer,
    locks: InterfaceLocks,
}

impl Provisioner {
    pub fn new(keys: KeyGenerator, renderer: Arc<ConfigRenderer>, installer: Installer) -> Self {
        Self {
            keys,
            renderer,
            installer,
            locks: InterfaceLocks::new(),
        }
    }

    pub fn locks(&self) -> &InterfaceLocks {
        &self.locks
    }

    /// Provision `request.name`, overwriting any earlier artifacts
    ///
    /// The name, port and address are checked before any external command
    /// runs. The private key is never part of the result.
    pub async fn provision(
        &self,
        request: ProvisioningRequest,
    ) -> Result<ProvisionedInterface, ProvisioningError> {
        let ProvisioningRequest {
            name,
            address,
            mask,
            listen_port,
            profile,
        } = request;

        validation::validate_interface_name(&name).map_err(ProvisioningError::InvalidName)?;
        let port = validation::parse_listen_port(&listen_port).map_err(ProvisioningError::InvalidPort)?;
        let address = compose_address(&address, &mask);
        validation::validate_cidr(&address).map_err(ProvisioningError::InvalidAddress)?;

        let _guard = self.locks.lock(&name).await;
        debug!("Provisioning {} ({}, port {})", name, address, port);

        let private_key = self
            .keys
            .generate_private_key()
            .await
            .map_err(ProvisioningError::KeyGeneration)?;
        let public_key = self
            .keys
            .generate_public_key(&private_key)
            .await
            .map_err(ProvisioningError::KeyDerivation)?;

        let options = InterfaceOptions::new(address, port, key_text(&private_key)).with_profile(profile);
        let config = self.renderer.render(&options)?;

        let artifacts = self
            .installer
            .full_install(&name, &private_key, &public_key, config.as_bytes())
            .await?;

        info!("Provisioned interface {}", name);
        Ok(ProvisionedInterface {
            name,
            public_key: key_text(&public_key),
            artifacts,
        })
    }

    /// [`Self::provision`] on its own task
    ///
    /// Dropping the returned future does not stop the task, so an install
    /// that has started always finishes or rolls back.
    pub async fn provision_detached(
        self: &Arc<Self>,
        request: ProvisioningRequest,
    ) -> Result<ProvisionedInterface, ProvisioningError> {
        let provisioner = Arc::clone(self);
        tokio::spawn(async move { provisioner.provision(request).await })
            .await
            .map_err(ProvisioningError::Interrupted)?
    }
}
