#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::{validate_sha256_hex, validate_token};
use crate::drift::DriftFinding;
use crate::roles::{AgentRole, ResponseMode, BASE_AGENT_PATH};
use crate::{ContractViolation, Validate};

const ID_MAX_LEN: usize = 64;

/// Immutable, hash-bearing audit record of one pipeline invocation.
///
/// Field set is the persisted artifact shape; nothing else is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub answer_id: String,
    pub model_id: String,
    pub policy_version: String,
    pub mode: ResponseMode,
    pub agent_path: Vec<AgentRole>,
    pub prompt_hash: String,
    pub answer_hash: String,
    pub interpreter_prompt_hash: Option<String>,
    pub assistant_system_prompt_hash: String,
    pub parent_receipt_id: Option<String>,
    pub drift_detected: bool,
    pub drift_details: Vec<DriftFinding>,
    /// Unix seconds.
    pub timestamp: u64,
}

impl Receipt {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        receipt_id: String,
        answer_id: String,
        model_id: String,
        policy_version: String,
        mode: ResponseMode,
        agent_path: Vec<AgentRole>,
        prompt_hash: String,
        answer_hash: String,
        interpreter_prompt_hash: Option<String>,
        assistant_system_prompt_hash: String,
        parent_receipt_id: Option<String>,
        drift_details: Vec<DriftFinding>,
        timestamp: u64,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            receipt_id,
            answer_id,
            model_id,
            policy_version,
            mode,
            agent_path,
            prompt_hash,
            answer_hash,
            interpreter_prompt_hash,
            assistant_system_prompt_hash,
            parent_receipt_id,
            drift_detected: !drift_details.is_empty(),
            drift_details,
            timestamp,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for Receipt {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("receipt.receipt_id", &self.receipt_id, ID_MAX_LEN)?;
        validate_token("receipt.answer_id", &self.answer_id, ID_MAX_LEN)?;
        if self.receipt_id == self.answer_id {
            return Err(ContractViolation::InvalidValue {
                field: "receipt.answer_id",
                reason: "must differ from receipt_id",
            });
        }
        validate_token("receipt.model_id", &self.model_id, 128)?;
        validate_token("receipt.policy_version", &self.policy_version, 32)?;

        if self.agent_path.len() < BASE_AGENT_PATH.len()
            || self.agent_path[..BASE_AGENT_PATH.len()] != BASE_AGENT_PATH
        {
            return Err(ContractViolation::InvalidValue {
                field: "receipt.agent_path",
                reason: "must begin with specialist, validator, arbiter",
            });
        }
        let tail = &self.agent_path[BASE_AGENT_PATH.len()..];
        let expected_tail: &[AgentRole] = match self.mode {
            ResponseMode::Raw => &[],
            ResponseMode::Explained => &[AgentRole::Interpreter],
        };
        if tail != expected_tail {
            return Err(ContractViolation::InvalidValue {
                field: "receipt.agent_path",
                reason: "must end with interpreter iff mode=explained",
            });
        }

        validate_sha256_hex("receipt.prompt_hash", &self.prompt_hash)?;
        validate_sha256_hex("receipt.answer_hash", &self.answer_hash)?;
        validate_sha256_hex(
            "receipt.assistant_system_prompt_hash",
            &self.assistant_system_prompt_hash,
        )?;
        match (self.mode, &self.interpreter_prompt_hash) {
            (ResponseMode::Explained, Some(h)) => {
                validate_sha256_hex("receipt.interpreter_prompt_hash", h)?
            }
            (ResponseMode::Explained, None) => {
                return Err(ContractViolation::InvalidValue {
                    field: "receipt.interpreter_prompt_hash",
                    reason: "must be present when mode=explained",
                })
            }
            (ResponseMode::Raw, Some(_)) => {
                return Err(ContractViolation::InvalidValue {
                    field: "receipt.interpreter_prompt_hash",
                    reason: "must be absent when mode=raw",
                })
            }
            (ResponseMode::Raw, None) => {}
        }

        if let Some(parent) = &self.parent_receipt_id {
            validate_token("receipt.parent_receipt_id", parent, ID_MAX_LEN)?;
            if parent == &self.receipt_id {
                return Err(ContractViolation::InvalidValue {
                    field: "receipt.parent_receipt_id",
                    reason: "must not reference itself",
                });
            }
        }
        if self.drift_detected == self.drift_details.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "receipt.drift_detected",
                reason: "must be true iff drift_details is non-empty",
            });
        }
        for finding in &self.drift_details {
            finding.validate()?;
        }
        if self.timestamp == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "receipt.timestamp",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Answer texts stored once next to their receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub answer_id: String,
    pub receipt_id: String,
    pub question: String,
    pub raw_answer: String,
    pub explained_answer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    ReceiptPersisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub event: AuditEventKind,
    pub receipt_id: String,
    pub answer_id: String,
    pub parent_receipt_id: Option<String>,
    pub mode: ResponseMode,
    pub timestamp: u64,
}

impl AuditLogEntry {
    pub fn receipt_persisted(receipt: &Receipt) -> Self {
        Self {
            event: AuditEventKind::ReceiptPersisted,
            receipt_id: receipt.receipt_id.clone(),
            answer_id: receipt.answer_id.clone(),
            parent_receipt_id: receipt.parent_receipt_id.clone(),
            mode: receipt.mode,
            timestamp: receipt.timestamp,
        }
    }
}
