//! Module self-registration.
//!
//! External modules own their flows and steps; the core only invokes a
//! registration callback once per module and records the outcome. An
//! asynchronous callback is driven to completion on an isolated worker
//! thread with its own runtime, so registration can be called from
//! inside an async context without deadlocking, and a bounded timeout
//! turns a hung callback into a failed registration instead of a hung
//! process.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::definition::ModuleName;
use crate::registry::FlowRegistry;
use crate::CoreError;

/// Synchronous registration callback, invoked inline
pub type SyncRegisterFn =
    Box<dyn Fn(&FlowRegistry, &ModuleName, &ModuleManifest) -> Result<(), CoreError> + Send + Sync>;

/// Asynchronous registration callback, driven on an isolated worker
pub type AsyncRegisterFn = Box<
    dyn Fn(Arc<FlowRegistry>, ModuleName, ModuleManifest) -> BoxFuture<'static, Result<(), CoreError>>
        + Send
        + Sync,
>;

/// How a module registers its flows and steps with the core
pub enum RegistrationCallback {
    /// Invoked inline on the caller's thread
    Sync(SyncRegisterFn),

    /// Run to completion on an isolated worker under a bounded timeout
    Async(AsyncRegisterFn),
}

/// What a module declares about itself when registering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name, unique among registered modules
    pub name: ModuleName,

    /// Module version string
    pub version: String,

    /// Capabilities the module provides
    pub capabilities: Vec<String>,

    /// Names of modules this one depends on
    pub dependencies: Vec<String>,
}

impl ModuleManifest {
    /// Create a manifest with no declared capabilities or dependencies
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: ModuleName(name.into()),
            version: version.into(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Declare the module's capabilities
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Declare the module's dependencies
    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Outcome of a module registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// The callback completed successfully
    Registered,

    /// The callback failed or timed out
    Failed,
}

/// Record of one module's registration attempt
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    /// The manifest the module supplied
    pub manifest: ModuleManifest,

    /// Outcome of the registration
    pub status: RegistrationStatus,

    /// Failure detail, when the registration failed
    pub error: Option<String>,

    /// When the registration was attempted
    pub registered_at: DateTime<Utc>,
}

/// Configuration for the module registrar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Bound on how long an asynchronous callback may run
    pub registration_timeout: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_secs(30),
        }
    }
}

/// Invokes module registration callbacks and records their outcomes
pub struct ModuleRegistrar {
    registry: Arc<FlowRegistry>,
    config: RegistrarConfig,
    records: DashMap<String, ModuleRecord>,
}

impl ModuleRegistrar {
    /// Create a registrar with the default configuration
    pub fn new(registry: Arc<FlowRegistry>) -> Self {
        Self::with_config(registry, RegistrarConfig::default())
    }

    /// Create a registrar with an explicit configuration
    pub fn with_config(registry: Arc<FlowRegistry>, config: RegistrarConfig) -> Self {
        Self {
            registry,
            config,
            records: DashMap::new(),
        }
    }

    /// Register a module by invoking its callback exactly once.
    ///
    /// A module name that has already been registered is refused; the
    /// original record's status is returned unchanged.
    pub fn register_module(
        &self,
        manifest: ModuleManifest,
        callback: RegistrationCallback,
    ) -> RegistrationStatus {
        let name = manifest.name.clone();

        if let Some(existing) = self.records.get(&name.0) {
            warn!(
                module = %name.0,
                "Module already registered; refusing to invoke its callback again"
            );
            return existing.status;
        }

        let outcome = match callback {
            RegistrationCallback::Sync(register) => {
                register(self.registry.as_ref(), &name, &manifest)
            }
            RegistrationCallback::Async(register) => {
                let future = register(self.registry.clone(), name.clone(), manifest.clone());
                block_on_with_timeout(future, self.config.registration_timeout)
            }
        };

        let (status, error) = match outcome {
            Ok(()) => {
                info!(
                    module = %name.0,
                    version = %manifest.version,
                    "Module registered"
                );
                (RegistrationStatus::Registered, None)
            }
            Err(e) => {
                warn!(module = %name.0, error = %e, "Module registration failed");
                (RegistrationStatus::Failed, Some(e.to_string()))
            }
        };

        self.records.insert(
            name.0,
            ModuleRecord {
                manifest,
                status,
                error,
                registered_at: Utc::now(),
            },
        );
        status
    }

    /// Outcome of a module's registration, if it was attempted
    pub fn module_status(&self, name: &ModuleName) -> Option<RegistrationStatus> {
        self.records.get(&name.0).map(|record| record.status)
    }

    /// Records for every registration attempt
    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Run an asynchronous operation to completion from a synchronous call
/// site, under a bounded timeout.
///
/// The future is driven on a dedicated worker thread with its own
/// current-thread runtime, so the call site may itself be running
/// inside a tokio runtime. A timeout is reported as an error, never as
/// a hang.
pub fn block_on_with_timeout<T>(
    future: BoxFuture<'static, Result<T, CoreError>>,
    timeout: Duration,
) -> Result<T, CoreError>
where
    T: Send + 'static,
{
    let worker = std::thread::Builder::new()
        .name("waypoint-registration".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| {
                    CoreError::ModuleRegistrationError(format!(
                        "failed to build registration runtime: {}",
                        e
                    ))
                })?;

            runtime.block_on(async move {
                match tokio::time::timeout(timeout, future).await {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::ModuleRegistrationError(format!(
                        "registration callback timed out after {:?}",
                        timeout
                    ))),
                }
            })
        })
        .map_err(|e| {
            CoreError::ModuleRegistrationError(format!(
                "failed to spawn registration worker: {}",
                e
            ))
        })?;

    worker.join().map_err(|_| {
        CoreError::ModuleRegistrationError("registration worker panicked".to_string())
    })?
}
