#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_token;
use crate::routing::Sensitivity;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Raw,
    Explained,
}

impl ResponseMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "raw" => Some(Self::Raw),
            "explained" => Some(Self::Explained),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Explained => "explained",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Specialist,
    Validator,
    Arbiter,
    Interpreter,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Specialist => "specialist",
            Self::Validator => "validator",
            Self::Arbiter => "arbiter",
            Self::Interpreter => "interpreter",
        }
    }
}

/// Roles every invocation traverses, in order.
pub const BASE_AGENT_PATH: [AgentRole; 3] =
    [AgentRole::Specialist, AgentRole::Validator, AgentRole::Arbiter];

pub fn agent_path_for(mode: ResponseMode) -> Vec<AgentRole> {
    let mut path = BASE_AGENT_PATH.to_vec();
    if mode == ResponseMode::Explained {
        path.push(AgentRole::Interpreter);
    }
    path
}

/// Per-invocation context handed read-only to every role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    pub policy_version: String,
    pub model_id: String,
    pub sensitivity: Sensitivity,
}

impl PipelineContext {
    pub fn v1(
        policy_version: String,
        model_id: String,
        sensitivity: Sensitivity,
    ) -> Result<Self, ContractViolation> {
        let ctx = Self {
            policy_version,
            model_id,
            sensitivity,
        };
        ctx.validate()?;
        Ok(ctx)
    }
}

impl Validate for PipelineContext {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("pipeline_context.policy_version", &self.policy_version, 32)?;
        validate_token("pipeline_context.model_id", &self.model_id, 128)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistOutput {
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    HardRefusal,
    ProfessionalMisrepresentation,
    PotentialOvercertainty,
}

impl ViolationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HardRefusal => "HARD_REFUSAL",
            Self::ProfessionalMisrepresentation => "PROFESSIONAL_MISREPRESENTATION",
            Self::PotentialOvercertainty => "POTENTIAL_OVERCERTAINTY",
        }
    }

    /// Only hard refusals flip the policy verdict.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::HardRefusal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOutput {
    pub policy_ok: bool,
    pub violations: Vec<Violation>,
    /// Untouched specialist answer, kept for audit regardless of verdict.
    pub original: String,
    pub answer: String,
}

impl Validate for ValidatorOutput {
    fn validate(&self) -> Result<(), ContractViolation> {
        let blocked = self.violations.iter().any(|v| v.code.is_blocking());
        if self.policy_ok == blocked {
            return Err(ContractViolation::InvalidValue {
                field: "validator_output.policy_ok",
                reason: "must be false iff a blocking violation is present",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArbiterStatus {
    Ok,
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterOutput {
    pub status: ArbiterStatus,
    pub final_answer: String,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterOutput {
    pub prompt: String,
    pub explained_answer: String,
}
