//! Driver registry.
//!
//! Drivers are a closed sum over the known backends; the registry maps a
//! profile's driver name to a configured instance and dispatches through
//! a uniform `invoke`.

use crate::api::ApiDriver;
use crate::error::{DriverError, Result};
use crate::subprocess::SubprocessDriver;
use crate::types::{InvokeRequest, InvokeResult, StreamSink};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A configured agent execution backend.
#[derive(Debug, Clone)]
pub enum Driver {
    /// Supervised child CLI process per invocation.
    Subprocess(SubprocessDriver),
    /// Direct model-provider request/response.
    Api(ApiDriver),
}

impl Driver {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subprocess(_) => "subprocess",
            Self::Api(_) => "api",
        }
    }

    /// Run one invocation, streaming telemetry into `sink`.
    pub async fn invoke(
        &self,
        request: &InvokeRequest,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        match self {
            Self::Subprocess(driver) => driver.invoke(request, sink, cancel).await,
            Self::Api(driver) => driver.invoke(request, sink, cancel).await,
        }
    }
}

/// Name-keyed set of configured drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under a name, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, driver: Driver) {
        self.drivers.write().insert(name.into(), Arc::new(driver));
    }

    /// Look up a driver by name.
    pub fn get(&self, name: &str) -> Result<Arc<Driver>> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::UnknownDriver(name.to_string()))
    }

    /// Registered driver names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch an invocation to the named driver.
    pub async fn invoke(
        &self,
        name: &str,
        request: &InvokeRequest,
        sink: &dyn StreamSink,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        let driver = self.get(name)?;
        driver.invoke(request, sink, cancel).await
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
