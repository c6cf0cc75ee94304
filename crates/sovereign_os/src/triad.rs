#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sovereign_engines::arbiter::arbitrate;
use sovereign_engines::drift_detector::{DriftDetector, DriftError, ManifestDriftDetector};
use sovereign_engines::model_router::{ModelRouter, RouterError};
use sovereign_engines::policy_validator::{
    PatternError, PolicyPatternSet, PolicyValidatorConfig, PolicyValidatorRuntime,
};
use sovereign_kernel_contracts::drift::DriftFinding;
use sovereign_kernel_contracts::receipt::Receipt;
use sovereign_kernel_contracts::roles::{agent_path_for, PipelineContext, ResponseMode, Violation};
use sovereign_kernel_contracts::routing::Sensitivity;
use sovereign_kernel_contracts::ContractViolation;
use sovereign_storage::ledger::{build_receipt, LedgerError, ReceiptBuildInput};
use sovereign_storage::repo::ReceiptLedgerRepo;
use tracing::{debug, warn};

use crate::assistant_channel::assistant_system_prompt;
use crate::role_engines::{
    InterpreterEngine, RoutedInterpreter, RoutedSpecialist, SpecialistEngine,
    INTERPRETER_TASK_TYPE, SPECIALIST_TASK_TYPE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub policy_version: String,
    pub model_id: String,
    pub specialist_task_type: String,
    pub interpreter_task_type: String,
    pub drift_root: PathBuf,
}

impl PipelineConfig {
    pub fn mvp_v1() -> Self {
        Self {
            policy_version: "v0.1a".to_string(),
            model_id: "stack-routed".to_string(),
            specialist_task_type: SPECIALIST_TASK_TYPE.to_string(),
            interpreter_task_type: INTERPRETER_TASK_TYPE.to_string(),
            drift_root: PathBuf::from("."),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    Router(RouterError),
    Ledger(LedgerError),
    Pattern(PatternError),
    Contract(ContractViolation),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Router(err) => write!(f, "{err}"),
            Self::Ledger(err) => write!(f, "receipt ledger: {err}"),
            Self::Pattern(err) => write!(f, "{err}"),
            Self::Contract(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<RouterError> for PipelineError {
    fn from(value: RouterError) -> Self {
        Self::Router(value)
    }
}

impl From<LedgerError> for PipelineError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<PatternError> for PipelineError {
    fn from(value: PatternError) -> Self {
        Self::Pattern(value)
    }
}

impl From<ContractViolation> for PipelineError {
    fn from(value: ContractViolation) -> Self {
        Self::Contract(value)
    }
}

/// Caller-facing result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriadRunResult {
    pub answer: String,
    pub mode: ResponseMode,
    pub answer_id: String,
    pub receipt_id: String,
    pub violations: Vec<Violation>,
    pub policy_ok: bool,
    pub receipt_path: String,
    pub receipt: Receipt,
}

/// Specialist -> Validator -> Arbiter -> (Interpreter), then one receipt.
///
/// Any stage error aborts the call before the ledger is touched, so a failed
/// invocation leaves no receipt behind.
pub struct TriadPipeline<S, I, L>
where
    S: SpecialistEngine,
    I: InterpreterEngine,
    L: ReceiptLedgerRepo,
{
    config: PipelineConfig,
    specialist: S,
    validator: PolicyValidatorRuntime,
    interpreter: I,
    drift: Box<dyn DriftDetector>,
    ledger: L,
}

impl<S, I, L> TriadPipeline<S, I, L>
where
    S: SpecialistEngine,
    I: InterpreterEngine,
    L: ReceiptLedgerRepo,
{
    pub fn new(
        config: PipelineConfig,
        specialist: S,
        validator: PolicyValidatorRuntime,
        interpreter: I,
        drift: Box<dyn DriftDetector>,
        ledger: L,
    ) -> Result<Self, ContractViolation> {
        PipelineContext::v1(
            config.policy_version.clone(),
            config.model_id.clone(),
            Sensitivity::Normal,
        )?;
        Ok(Self {
            config,
            specialist,
            validator,
            interpreter,
            drift,
            ledger,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn run(
        &self,
        question: &str,
        mode: ResponseMode,
        parent_receipt_id: Option<&str>,
        sensitivity: Sensitivity,
    ) -> Result<TriadRunResult, PipelineError> {
        let ctx = PipelineContext::v1(
            self.config.policy_version.clone(),
            self.config.model_id.clone(),
            sensitivity,
        )?;
        let drift_details = self.detect_drift();

        let specialist = self.specialist.answer(question, &ctx)?;
        let validated = self.validator.validate(&specialist, &ctx);
        let arbitrated = arbitrate(&specialist, &validated, &ctx);
        let raw_answer = arbitrated.final_answer.as_str();

        let interpreted = match mode {
            ResponseMode::Explained => {
                Some(self.interpreter.explain(question, raw_answer, &ctx)?)
            }
            ResponseMode::Raw => None,
        };
        let explained_answer = interpreted.as_ref().map(|o| o.explained_answer.as_str());

        let receipt = build_receipt(ReceiptBuildInput {
            question,
            raw_answer,
            interpreter_prompt: interpreted.as_ref().map(|o| o.prompt.as_str()),
            assistant_system_prompt: assistant_system_prompt(),
            context: &ctx,
            agent_path: agent_path_for(mode),
            mode,
            parent_receipt_id: parent_receipt_id.map(str::to_string),
            drift_details,
        })?;
        let receipt_path = self
            .ledger
            .persist(&receipt, question, raw_answer, explained_answer)?;
        let persisted = self
            .ledger
            .load_receipt(&receipt.receipt_id)?
            .ok_or_else(|| LedgerError::NotFound {
                receipt_id: receipt.receipt_id.clone(),
            })?;

        let answer = match explained_answer {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => arbitrated.final_answer.clone(),
        };
        debug!(
            receipt_id = %persisted.receipt_id,
            mode = mode.as_str(),
            policy_ok = validated.policy_ok,
            "triad run complete"
        );
        Ok(TriadRunResult {
            answer,
            mode,
            answer_id: persisted.answer_id.clone(),
            receipt_id: persisted.receipt_id.clone(),
            violations: arbitrated.violations,
            policy_ok: validated.policy_ok,
            receipt_path,
            receipt: persisted,
        })
    }

    fn detect_drift(&self) -> Vec<DriftFinding> {
        match self.drift.detect(&self.config.drift_root) {
            Ok(findings) => findings,
            Err(DriftError::Unavailable { detail }) => {
                debug!(%detail, "drift detector unavailable, recording no drift");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "drift detector failed, recording no drift");
                Vec::new()
            }
        }
    }
}

pub type RoutedTriadPipeline<L> = TriadPipeline<RoutedSpecialist, RoutedInterpreter, L>;

/// Default wiring: model-backed roles, the built-in policy pattern set and the
/// manifest drift detector.
pub fn routed_pipeline<L: ReceiptLedgerRepo>(
    config: PipelineConfig,
    router: Arc<ModelRouter>,
    ledger: L,
) -> Result<RoutedTriadPipeline<L>, PipelineError> {
    let validator = PolicyValidatorRuntime::new(
        PolicyValidatorConfig::mvp_v1(),
        Arc::new(PolicyPatternSet::sovereign_v1()?),
    );
    let specialist =
        RoutedSpecialist::new(Arc::clone(&router), config.specialist_task_type.clone());
    let interpreter = RoutedInterpreter::new(router, config.interpreter_task_type.clone());
    Ok(TriadPipeline::new(
        config,
        specialist,
        validator,
        interpreter,
        Box::new(ManifestDriftDetector::new()),
        ledger,
    )?)
}
