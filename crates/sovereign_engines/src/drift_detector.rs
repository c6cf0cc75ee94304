#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use sovereign_kernel_contracts::drift::{DriftFinding, DriftFindingKind};
use tracing::warn;

pub const INTEGRITY_MANIFEST_RELATIVE_PATH: &str = ".sovereign/integrity_manifest.json";

#[derive(Debug)]
pub enum DriftError {
    Unavailable { detail: String },
    Io(io::Error),
    Manifest(String),
}

impl fmt::Display for DriftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { detail } => write!(f, "drift detector unavailable: {detail}"),
            Self::Io(err) => write!(f, "drift detector io error: {err}"),
            Self::Manifest(detail) => write!(f, "integrity manifest invalid: {detail}"),
        }
    }
}

impl std::error::Error for DriftError {}

impl From<io::Error> for DriftError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Integrity-drift capability. Findings are observational; callers must not
/// let an error here block a request.
pub trait DriftDetector: Send + Sync {
    fn detect(&self, root: &Path) -> Result<Vec<DriftFinding>, DriftError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDriftDetector;

impl DriftDetector for NoDriftDetector {
    fn detect(&self, _root: &Path) -> Result<Vec<DriftFinding>, DriftError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct IntegrityManifest {
    files: BTreeMap<String, String>,
}

/// Compares files under `root` against the sha256 manifest at
/// `<root>/.sovereign/integrity_manifest.json`.
#[derive(Debug, Clone, Default)]
pub struct ManifestDriftDetector {
    manifest_override: Option<PathBuf>,
}

impl ManifestDriftDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(path: PathBuf) -> Self {
        Self {
            manifest_override: Some(path),
        }
    }

    fn manifest_path(&self, root: &Path) -> PathBuf {
        self.manifest_override
            .clone()
            .unwrap_or_else(|| root.join(INTEGRITY_MANIFEST_RELATIVE_PATH))
    }
}

impl DriftDetector for ManifestDriftDetector {
    fn detect(&self, root: &Path) -> Result<Vec<DriftFinding>, DriftError> {
        let manifest_path = self.manifest_path(root);
        let raw = match fs::read(&manifest_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(DriftError::Unavailable {
                    detail: format!("no manifest at {}", manifest_path.display()),
                })
            }
            Err(err) => return Err(err.into()),
        };
        let manifest: IntegrityManifest =
            serde_json::from_slice(&raw).map_err(|e| DriftError::Manifest(e.to_string()))?;

        // BTreeMap iteration keeps findings sorted by path.
        let mut findings = Vec::new();
        for (rel, expected) in manifest.files {
            if !is_contained_relative_path(&rel) {
                warn!(path = %rel, "skipping manifest entry outside the scanned root");
                continue;
            }
            let expected = expected.to_ascii_lowercase();
            let (kind, observed) = match fs::read(root.join(&rel)) {
                Ok(bytes) => {
                    let observed = sha256_hex(&bytes);
                    if observed == expected {
                        continue;
                    }
                    (DriftFindingKind::Modified, Some(observed))
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    (DriftFindingKind::Missing, None)
                }
                Err(err) => return Err(err.into()),
            };
            match DriftFinding::v1(kind, rel.clone(), expected, observed) {
                Ok(finding) => findings.push(finding),
                Err(violation) => {
                    warn!(path = %rel, %violation, "skipping invalid manifest entry");
                }
            }
        }
        Ok(findings)
    }
}

/// Non-empty, relative, and free of `..`, root or prefix components.
fn is_contained_relative_path(rel: &str) -> bool {
    let path = Path::new(rel);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
