#![forbid(unsafe_code)]

use sovereign_kernel_contracts::roles::{
    ArbiterOutput, ArbiterStatus, PipelineContext, SpecialistOutput, ValidatorOutput,
};

pub const REFUSAL_PREFIX: &str = "FINAL DECISION: REFUSAL\n";

/// Final visible answer for one invocation. Stateless; the verdict comes
/// only from the validator output.
pub fn arbitrate(
    specialist: &SpecialistOutput,
    validator: &ValidatorOutput,
    _ctx: &PipelineContext,
) -> ArbiterOutput {
    if !validator.policy_ok {
        return ArbiterOutput {
            status: ArbiterStatus::Refused,
            final_answer: format!("{REFUSAL_PREFIX}{}", validator.answer),
            violations: validator.violations.clone(),
        };
    }
    let final_answer = if !validator.answer.is_empty() {
        validator.answer.clone()
    } else {
        specialist.answer.clone()
    };
    ArbiterOutput {
        status: ArbiterStatus::Ok,
        final_answer,
        violations: validator.violations.clone(),
    }
}
