//! The gateway kernel: owns the registry and wires discovery into it.
//!
//! There is exactly one [`TargetRegistry`] per process; it is created here and
//! handed to every component that needs it.

use crate::auth::CredentialStore;
use crate::config::validate_config;
use crate::discovery::{DiscoveryEngine, DiscoveryHandle};
use crate::error::{KernelError, KernelResult};
use crate::registry::TargetRegistry;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use vncgate_types::config::GatewayConfig;
use vncgate_types::target::TargetDescriptor;

pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<TargetRegistry>,
    credentials: Option<CredentialStore>,
    discovery: Mutex<Option<DiscoveryHandle>>,
}

impl Gateway {
    /// Validate the config, build the registry and register static targets.
    pub fn boot(config: GatewayConfig) -> KernelResult<Self> {
        validate_config(&config)?;

        let registry = Arc::new(TargetRegistry::with_capacity(
            config.discovery.subscriber_capacity,
        ));
        for url in &config.targets {
            registry.add(TargetDescriptor::parse(url)?);
        }

        let credentials = config.auth.passwd_file.as_ref().map(CredentialStore::new);
        match &credentials {
            Some(store) => info!(path = %store.path().display(), "Login required"),
            None => warn!("No credential file configured, authentication disabled"),
        }

        info!(static_targets = config.targets.len(), "Gateway booted");
        Ok(Self {
            config,
            registry,
            credentials,
            discovery: Mutex::new(None),
        })
    }

    /// Start the discovery loop if a watch glob is configured.
    pub fn start_discovery(&self) -> KernelResult<()> {
        let Some(pattern) = &self.config.discovery.watch_glob else {
            info!("No watch glob configured, discovery disabled");
            return Ok(());
        };

        let mut slot = self.discovery.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(KernelError::BootFailed("discovery already running".into()));
        }

        let engine = DiscoveryEngine::new(
            pattern,
            Arc::clone(&self.registry),
            self.config.discovery.poll_interval(),
        )?;
        *slot = Some(engine.start()?);
        Ok(())
    }

    /// Stop discovery. Registry contents are left as they are.
    pub async fn shutdown(&self) {
        let handle = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        info!("Gateway shut down");
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// `None` when authentication is disabled.
    pub fn credentials(&self) -> Option<&CredentialStore> {
        self.credentials.as_ref()
    }
}
