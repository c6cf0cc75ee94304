#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

/// The only model key the high-sensitivity override ever rewrites.
pub const REMOTE_TIER_MODEL_KEY: &str = "remote_tier";
pub const DEFAULT_MODEL_KEY: &str = "local_small";
pub const DEFAULT_PROVIDER: &str = "ollama";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    #[default]
    Normal,
    High,
}

impl Sensitivity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub id: String,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_model_key() -> String {
    DEFAULT_MODEL_KEY.to_string()
}

fn default_allow_remote() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighSensitivityOverride {
    #[serde(default = "default_allow_remote")]
    pub allow_remote: bool,
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Default for HighSensitivityOverride {
    fn default() -> Self {
        Self {
            allow_remote: true,
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOverrides {
    #[serde(default)]
    pub high_sensitivity: HighSensitivityOverride,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRules {
    #[serde(default = "default_model_key")]
    pub default: String,
    #[serde(default)]
    pub by_task_type: BTreeMap<String, String>,
    #[serde(default)]
    pub overrides: RoutingOverrides,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            default: default_model_key(),
            by_task_type: BTreeMap::new(),
            overrides: RoutingOverrides::default(),
        }
    }
}

/// Parsed routing configuration document (`routing_rules` + `models`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default)]
    pub routing_rules: RoutingRules,
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

impl RoutingTable {
    pub fn model(&self, model_key: &str) -> Option<&ModelConfig> {
        self.models.get(model_key)
    }
}

impl Validate for RoutingTable {
    fn validate(&self) -> Result<(), ContractViolation> {
        require_non_empty("routing_table.routing_rules.default", &self.routing_rules.default)?;
        for (task_type, model_key) in &self.routing_rules.by_task_type {
            require_non_empty("routing_table.routing_rules.by_task_type.key", task_type)?;
            require_non_empty("routing_table.routing_rules.by_task_type.value", model_key)?;
        }
        if let Some(fallback) = &self.routing_rules.overrides.high_sensitivity.fallback {
            require_non_empty(
                "routing_table.routing_rules.overrides.high_sensitivity.fallback",
                fallback,
            )?;
        }
        for (model_key, cfg) in &self.models {
            require_non_empty("routing_table.models.key", model_key)?;
            require_non_empty("routing_table.models.provider", &cfg.provider)?;
            require_non_empty("routing_table.models.id", &cfg.id)?;
        }
        Ok(())
    }
}

/// Routing keys are free-form YAML map keys; only blank ones are rejected.
fn require_non_empty(field: &'static str, value: &str) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be non-empty",
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub model_key: String,
    pub config: ModelConfig,
    pub override_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRunOutput {
    pub model_key: String,
    pub model_id: String,
    pub provider: String,
    pub text: String,
    pub sensitivity: Sensitivity,
}
