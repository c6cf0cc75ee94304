#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use sovereign_kernel_contracts::roles::{
    PipelineContext, SpecialistOutput, ValidatorOutput, Violation, ViolationCode,
};
use tracing::info;

pub const REFUSAL_TEMPLATE: &str = "I must decline providing that assistance under the Sovereign policy. This request triggers safety or legality constraints.";

pub const HARD_REFUSAL_PATTERNS_V1: &[&str] = &[
    r"\bmake\s+a\s+bomb\b",
    r"\bcredit\s+card\s+fraud\b",
    r"\bhack\s+.*server\b",
    r"\bkill\b",
    r"\bmanufacture\s+drugs\b",
];

pub const PROFESSIONAL_CLAIM_PATTERNS_V1: &[&str] =
    &[r"\bi am a (doctor|lawyer|attorney|certified|surgeon)\b"];

pub const UNCERTAINTY_MARKERS_V1: &[&str] = &["maybe", "possibly", "unclear", "unknown"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub pattern: String,
    pub detail: String,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid policy pattern '{}': {}", self.pattern, self.detail)
    }
}

impl std::error::Error for PatternError {}

/// A compiled, case-insensitive policy regex. The source text is the pattern's
/// identifier in violation records.
#[derive(Debug, Clone)]
pub struct PolicyPattern {
    source: String,
    regex: Regex,
}

impl PolicyPattern {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|err| PatternError {
                pattern: source.to_string(),
                detail: err.to_string(),
            })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Immutable pattern sets shared by every validator built from them.
#[derive(Debug, Clone)]
pub struct PolicyPatternSet {
    pub hard_refusals: Vec<PolicyPattern>,
    pub professional_claims: Vec<PolicyPattern>,
    /// Lowercased plain substrings, not regexes.
    pub uncertainty_markers: Vec<String>,
}

impl PolicyPatternSet {
    pub fn sovereign_v1() -> Result<Self, PatternError> {
        Self::from_sources(
            HARD_REFUSAL_PATTERNS_V1,
            PROFESSIONAL_CLAIM_PATTERNS_V1,
            UNCERTAINTY_MARKERS_V1,
        )
    }

    pub fn from_sources(
        hard_refusals: &[&str],
        professional_claims: &[&str],
        uncertainty_markers: &[&str],
    ) -> Result<Self, PatternError> {
        Ok(Self {
            hard_refusals: compile_all(hard_refusals)?,
            professional_claims: compile_all(professional_claims)?,
            uncertainty_markers: uncertainty_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        })
    }
}

fn compile_all(sources: &[&str]) -> Result<Vec<PolicyPattern>, PatternError> {
    sources.iter().map(|s| PolicyPattern::compile(s)).collect()
}

/// Every matching pattern's identifier, in pattern-set order.
pub fn scan(text: &str, patterns: &[PolicyPattern]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| p.is_match(text))
        .map(|p| p.source.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyValidatorConfig {
    pub overcertainty_word_threshold: usize,
}

impl PolicyValidatorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            overcertainty_word_threshold: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyValidatorRuntime {
    config: PolicyValidatorConfig,
    patterns: Arc<PolicyPatternSet>,
}

impl PolicyValidatorRuntime {
    pub fn new(config: PolicyValidatorConfig, patterns: Arc<PolicyPatternSet>) -> Self {
        Self { config, patterns }
    }

    pub fn patterns(&self) -> &PolicyPatternSet {
        &self.patterns
    }

    pub fn validate(
        &self,
        specialist: &SpecialistOutput,
        ctx: &PipelineContext,
    ) -> ValidatorOutput {
        let text = specialist.answer.as_str();
        let mut violations = Vec::new();

        let hard = scan(text, &self.patterns.hard_refusals);
        if !hard.is_empty() {
            violations.push(Violation {
                code: ViolationCode::HardRefusal,
                patterns: hard,
            });
        }
        let claims = scan(text, &self.patterns.professional_claims);
        if !claims.is_empty() {
            violations.push(Violation {
                code: ViolationCode::ProfessionalMisrepresentation,
                patterns: claims,
            });
        }
        if self.is_overcertain(text) {
            violations.push(Violation {
                code: ViolationCode::PotentialOvercertainty,
                patterns: Vec::new(),
            });
        }

        let policy_ok = !violations.iter().any(|v| v.code.is_blocking());
        let answer = if policy_ok {
            specialist.answer.clone()
        } else {
            REFUSAL_TEMPLATE.to_string()
        };
        info!(
            policy_version = %ctx.policy_version,
            policy_ok,
            violations = ?violations.iter().map(|v| v.code.as_str()).collect::<Vec<_>>(),
            "validator verdict"
        );
        ValidatorOutput {
            policy_ok,
            violations,
            original: specialist.answer.clone(),
            answer,
        }
    }

    fn is_overcertain(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        let hedged = self
            .patterns
            .uncertainty_markers
            .iter()
            .any(|m| lower.contains(m.as_str()));
        !hedged && text.split_whitespace().count() > self.config.overcertainty_word_threshold
    }
}
