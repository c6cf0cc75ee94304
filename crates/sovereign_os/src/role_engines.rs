#![forbid(unsafe_code)]

use std::sync::Arc;

use sovereign_engines::model_router::{ModelRouter, RouterError};
use sovereign_kernel_contracts::roles::{InterpreterOutput, PipelineContext, SpecialistOutput};

use crate::assistant_channel::assistant_system_prompt;

pub const SPECIALIST_TASK_TYPE: &str = "governance";
pub const INTERPRETER_TASK_TYPE: &str = "explanation";

/// First-draft answer producer.
pub trait SpecialistEngine {
    fn answer(
        &self,
        question: &str,
        ctx: &PipelineContext,
    ) -> Result<SpecialistOutput, RouterError>;
}

/// Rephrases an already-arbitrated answer. Never sees the unvalidated draft.
pub trait InterpreterEngine {
    fn explain(
        &self,
        question: &str,
        final_answer: &str,
        ctx: &PipelineContext,
    ) -> Result<InterpreterOutput, RouterError>;
}

pub fn specialist_prompt(question: &str) -> String {
    format!(
        "{}\n\nQuestion: {}\n\nAnswer:",
        assistant_system_prompt(),
        question.trim()
    )
}

pub fn interpreter_prompt(question: &str, final_answer: &str) -> String {
    format!(
        "Rewrite the answer below in plain language for a non-specialist. \
Keep its meaning and its decision exactly; do not add facts.\n\n\
Question: {}\n\nAnswer: {}\n\nPlain-language explanation:",
        question.trim(),
        final_answer.trim()
    )
}

#[derive(Debug, Clone)]
pub struct RoutedSpecialist {
    router: Arc<ModelRouter>,
    task_type: String,
}

impl RoutedSpecialist {
    pub fn new(router: Arc<ModelRouter>, task_type: String) -> Self {
        Self { router, task_type }
    }
}

impl SpecialistEngine for RoutedSpecialist {
    fn answer(
        &self,
        question: &str,
        ctx: &PipelineContext,
    ) -> Result<SpecialistOutput, RouterError> {
        let out = self.router.run_model_for_task(
            &self.task_type,
            &specialist_prompt(question),
            ctx.sensitivity,
        )?;
        Ok(SpecialistOutput { answer: out.text })
    }
}

#[derive(Debug, Clone)]
pub struct RoutedInterpreter {
    router: Arc<ModelRouter>,
    task_type: String,
}

impl RoutedInterpreter {
    pub fn new(router: Arc<ModelRouter>, task_type: String) -> Self {
        Self { router, task_type }
    }
}

impl InterpreterEngine for RoutedInterpreter {
    fn explain(
        &self,
        question: &str,
        final_answer: &str,
        ctx: &PipelineContext,
    ) -> Result<InterpreterOutput, RouterError> {
        let prompt = interpreter_prompt(question, final_answer);
        let out = self
            .router
            .run_model_for_task(&self.task_type, &prompt, ctx.sensitivity)?;
        Ok(InterpreterOutput {
            prompt,
            explained_answer: out.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sovereign_engines::model_router::{parse_routing_table, OllamaConfig};
    use sovereign_kernel_contracts::routing::Sensitivity;

    fn stub_router() -> Arc<ModelRouter> {
        let table = parse_routing_table(
            "routing_rules:\n  default: remote_tier\nmodels:\n  remote_tier:\n    provider: cloud-llm\n    id: frontier\n",
        )
        .unwrap();
        Arc::new(ModelRouter::new(Arc::new(table), OllamaConfig::mvp_v1()))
    }

    fn ctx() -> PipelineContext {
        PipelineContext::v1(
            "v0.1a".to_string(),
            "stack-routed".to_string(),
            Sensitivity::Normal,
        )
        .unwrap()
    }

    #[test]
    fn at_role_engines_01_interpreter_returns_its_prompt() {
        let interpreter = RoutedInterpreter::new(stub_router(), INTERPRETER_TASK_TYPE.to_string());
        let out = interpreter.explain("Why?", "Because.", &ctx()).unwrap();
        assert_eq!(out.prompt, interpreter_prompt("Why?", "Because."));
        assert!(out.explained_answer.starts_with("[REMOTE_STUB:frontier] "));
    }

    #[test]
    fn at_role_engines_02_specialist_prompt_carries_system_prompt() {
        let p = specialist_prompt("  What is a receipt? ");
        assert!(p.starts_with(assistant_system_prompt()));
        assert!(p.contains("Question: What is a receipt?\n"));
        let specialist = RoutedSpecialist::new(stub_router(), SPECIALIST_TASK_TYPE.to_string());
        let out = specialist.answer("q", &ctx()).unwrap();
        assert!(out.answer.starts_with("[REMOTE_STUB:frontier]"));
    }
}
