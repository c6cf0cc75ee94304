#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_sha256_hex;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftFindingKind {
    Modified,
    Missing,
}

/// One integrity-drift signal. Observational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFinding {
    pub kind: DriftFindingKind,
    pub path: String,
    pub expected_sha256: String,
    pub observed_sha256: Option<String>,
}

impl DriftFinding {
    pub fn v1(
        kind: DriftFindingKind,
        path: String,
        expected_sha256: String,
        observed_sha256: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let f = Self {
            kind,
            path,
            expected_sha256,
            observed_sha256,
        };
        f.validate()?;
        Ok(f)
    }
}

impl Validate for DriftFinding {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.path.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "drift_finding.path",
                reason: "must be non-empty",
            });
        }
        validate_sha256_hex("drift_finding.expected_sha256", &self.expected_sha256)?;
        match (self.kind, &self.observed_sha256) {
            (DriftFindingKind::Missing, Some(_)) => Err(ContractViolation::InvalidValue {
                field: "drift_finding.observed_sha256",
                reason: "must be absent when kind=MISSING",
            }),
            (DriftFindingKind::Modified, None) => Err(ContractViolation::InvalidValue {
                field: "drift_finding.observed_sha256",
                reason: "must be present when kind=MODIFIED",
            }),
            (DriftFindingKind::Modified, Some(observed)) => {
                validate_sha256_hex("drift_finding.observed_sha256", observed)
            }
            (DriftFindingKind::Missing, None) => Ok(()),
        }
    }
}
