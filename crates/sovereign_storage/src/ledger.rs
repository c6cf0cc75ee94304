#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use sovereign_kernel_contracts::drift::DriftFinding;
use sovereign_kernel_contracts::receipt::{AuditLogEntry, Receipt, StoredAnswer};
use sovereign_kernel_contracts::roles::{AgentRole, PipelineContext, ResponseMode};
use sovereign_kernel_contracts::{ContractViolation, Validate};
use tracing::info;
use uuid::Uuid;

use crate::digest::hash_text;
use crate::repo::ReceiptLedgerRepo;

pub const RECEIPTS_TABLE: &str = "receipts";
pub const ANSWERS_TABLE: &str = "answers";

#[derive(Debug)]
pub enum LedgerError {
    PersistenceConflict { table: &'static str, key: String },
    UnknownParent { parent_receipt_id: String },
    NotFound { receipt_id: String },
    ChainBroken { receipt_id: String, reason: &'static str },
    Io(std::io::Error),
    Json(serde_json::Error),
    ContractViolation(ContractViolation),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersistenceConflict { table, key } => {
                write!(f, "refusing to overwrite existing {table} record '{key}'")
            }
            Self::UnknownParent { parent_receipt_id } => {
                write!(f, "parent receipt '{parent_receipt_id}' was never persisted")
            }
            Self::NotFound { receipt_id } => write!(f, "receipt '{receipt_id}' not found"),
            Self::ChainBroken { receipt_id, reason } => {
                write!(f, "receipt chain broken at '{receipt_id}': {reason}")
            }
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::ContractViolation(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ContractViolation> for LedgerError {
    fn from(value: ContractViolation) -> Self {
        Self::ContractViolation(value)
    }
}

/// Everything a receipt is derived from. Texts are hashed, never stored here.
#[derive(Debug, Clone)]
pub struct ReceiptBuildInput<'a> {
    pub question: &'a str,
    pub raw_answer: &'a str,
    pub interpreter_prompt: Option<&'a str>,
    pub assistant_system_prompt: &'a str,
    pub context: &'a PipelineContext,
    pub agent_path: Vec<AgentRole>,
    pub mode: ResponseMode,
    pub parent_receipt_id: Option<String>,
    pub drift_details: Vec<DriftFinding>,
}

/// Pure construction: fresh ids, digests, wall-clock timestamp. No I/O.
pub fn build_receipt(input: ReceiptBuildInput<'_>) -> Result<Receipt, LedgerError> {
    let receipt = Receipt::v1(
        Uuid::new_v4().to_string(),
        Uuid::new_v4().to_string(),
        input.context.model_id.clone(),
        input.context.policy_version.clone(),
        input.mode,
        input.agent_path,
        hash_text(input.question),
        hash_text(input.raw_answer),
        input.interpreter_prompt.map(hash_text),
        hash_text(input.assistant_system_prompt),
        input.parent_receipt_id,
        input.drift_details,
        now_unix_secs(),
    )?;
    Ok(receipt)
}

pub(crate) fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .max(1)
}

/// Stored texts must be the ones the receipt's digests were computed from.
pub(crate) fn check_stored_texts(
    receipt: &Receipt,
    question: &str,
    raw_answer: &str,
) -> Result<(), ContractViolation> {
    if hash_text(question) != receipt.prompt_hash {
        return Err(ContractViolation::InvalidValue {
            field: "stored_answer.question",
            reason: "does not match receipt.prompt_hash",
        });
    }
    if hash_text(raw_answer) != receipt.answer_hash {
        return Err(ContractViolation::InvalidValue {
            field: "stored_answer.raw_answer",
            reason: "does not match receipt.answer_hash",
        });
    }
    Ok(())
}

pub(crate) fn stored_answer_for(
    receipt: &Receipt,
    question: &str,
    raw_answer: &str,
    explained_answer: Option<&str>,
) -> StoredAnswer {
    StoredAnswer {
        answer_id: receipt.answer_id.clone(),
        receipt_id: receipt.receipt_id.clone(),
        question: question.to_string(),
        raw_answer: raw_answer.to_string(),
        explained_answer: explained_answer.map(str::to_string),
    }
}

#[derive(Debug, Default)]
struct InMemoryLedgerState {
    receipts: BTreeMap<String, Receipt>,
    answers: BTreeMap<String, StoredAnswer>,
    audit: Vec<AuditLogEntry>,
}

/// Process-local ledger. Same write-once rules as the filesystem store.
#[derive(Debug, Default)]
pub struct InMemoryReceiptLedger {
    state: Mutex<InMemoryLedgerState>,
}

impl InMemoryReceiptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipt_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receipts
            .len()
    }
}

impl ReceiptLedgerRepo for InMemoryReceiptLedger {
    fn persist(
        &self,
        receipt: &Receipt,
        question: &str,
        raw_answer: &str,
        explained_answer: Option<&str>,
    ) -> Result<String, LedgerError> {
        receipt.validate()?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.receipts.contains_key(&receipt.receipt_id) {
            return Err(LedgerError::PersistenceConflict {
                table: RECEIPTS_TABLE,
                key: receipt.receipt_id.clone(),
            });
        }
        if state.answers.contains_key(&receipt.answer_id) {
            return Err(LedgerError::PersistenceConflict {
                table: ANSWERS_TABLE,
                key: receipt.answer_id.clone(),
            });
        }
        if let Some(parent) = &receipt.parent_receipt_id {
            if !state.receipts.contains_key(parent) {
                return Err(LedgerError::UnknownParent {
                    parent_receipt_id: parent.clone(),
                });
            }
        }
        check_stored_texts(receipt, question, raw_answer)?;

        state.answers.insert(
            receipt.answer_id.clone(),
            stored_answer_for(receipt, question, raw_answer, explained_answer),
        );
        state
            .receipts
            .insert(receipt.receipt_id.clone(), receipt.clone());
        state.audit.push(AuditLogEntry::receipt_persisted(receipt));
        info!(
            receipt_id = %receipt.receipt_id,
            parent_receipt_id = ?receipt.parent_receipt_id,
            "receipt persisted"
        );
        Ok(format!("memory://{RECEIPTS_TABLE}/{}", receipt.receipt_id))
    }

    fn load_receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, LedgerError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.receipts.get(receipt_id).cloned())
    }

    fn load_answer(&self, answer_id: &str) -> Result<Option<StoredAnswer>, LedgerError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.answers.get(answer_id).cloned())
    }

    fn audit_entries(&self) -> Result<Vec<AuditLogEntry>, LedgerError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.audit.clone())
    }
}
