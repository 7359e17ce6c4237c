//! Run configuration profile.
//!
//! A profile binds a workflow to a driver, a tracker, a trust level and
//! optional per-agent model overrides. Profiles are registered with the
//! engine at construction and read-only during a run.

use amelia_drivers::TrustLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sandbox settings surfaced to drivers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SandboxSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_network: bool,
}

/// Configuration binding for a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,

    /// Driver registry name to execute agents with.
    pub driver: String,

    /// Tracker registry name to fetch issues from.
    pub tracker: String,

    #[serde(default)]
    pub trust_level: TrustLevel,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    /// Per-agent model overrides, keyed by agent name.
    #[serde(default)]
    pub agent_models: HashMap<String, String>,
}

impl Profile {
    pub fn new(id: impl Into<String>, driver: impl Into<String>, tracker: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            driver: driver.into(),
            tracker: tracker.into(),
            trust_level: TrustLevel::default(),
            sandbox: SandboxSettings::default(),
            agent_models: HashMap::new(),
        }
    }

    pub fn with_trust_level(mut self, trust: TrustLevel) -> Self {
        self.trust_level = trust;
        self
    }

    pub fn with_agent_model(mut self, agent: impl Into<String>, model: impl Into<String>) -> Self {
        self.agent_models.insert(agent.into(), model.into());
        self
    }

    /// Model override for an agent, if configured.
    pub fn model_for(&self, agent: &str) -> Option<&str> {
        self.agent_models.get(agent).map(String::as_str)
    }
}
