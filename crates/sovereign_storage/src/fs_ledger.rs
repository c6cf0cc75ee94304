#![forbid(unsafe_code)]

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use sovereign_kernel_contracts::receipt::{AuditLogEntry, Receipt, StoredAnswer};
use sovereign_kernel_contracts::{ContractViolation, Validate};
use tracing::{info, warn};

use crate::ledger::{
    check_stored_texts, stored_answer_for, LedgerError, ANSWERS_TABLE, RECEIPTS_TABLE,
};
use crate::repo::ReceiptLedgerRepo;

pub const RECEIPT_DIR_ENV: &str = "SOVEREIGN_RECEIPT_DIR";
pub const DEFAULT_RECEIPT_DIR: &str = "sovereign_data";
const AUDIT_LOG_FILE: &str = "audit_log.jsonl";

/// Filesystem ledger:
///
/// ```text
/// <root>/receipts/<receipt_id>.json
/// <root>/answers/<answer_id>.json
/// <root>/audit_log.jsonl
/// ```
///
/// Record files are created with `create_new`, so an existing id is never
/// replaced. Writers in one process are serialized.
#[derive(Debug)]
pub struct FsReceiptLedger {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsReceiptLedger {
    pub fn default_local() -> Self {
        let root = env::var(RECEIPT_DIR_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECEIPT_DIR));
        Self::for_root(root)
    }

    pub fn for_root(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn receipt_path(&self, receipt_id: &str) -> PathBuf {
        self.root
            .join(RECEIPTS_TABLE)
            .join(format!("{receipt_id}.json"))
    }

    fn answer_path(&self, answer_id: &str) -> PathBuf {
        self.root
            .join(ANSWERS_TABLE)
            .join(format!("{answer_id}.json"))
    }

    fn audit_log_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG_FILE)
    }

    fn ensure_dirs(&self) -> Result<(), LedgerError> {
        fs::create_dir_all(self.root.join(RECEIPTS_TABLE))?;
        fs::create_dir_all(self.root.join(ANSWERS_TABLE))?;
        Ok(())
    }

    fn append_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_log_path())?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

impl ReceiptLedgerRepo for FsReceiptLedger {
    fn persist(
        &self,
        receipt: &Receipt,
        question: &str,
        raw_answer: &str,
        explained_answer: Option<&str>,
    ) -> Result<String, LedgerError> {
        receipt.validate()?;
        validate_file_key("receipt.receipt_id", &receipt.receipt_id)?;
        validate_file_key("receipt.answer_id", &receipt.answer_id)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_dirs()?;

        let receipt_path = self.receipt_path(&receipt.receipt_id);
        if receipt_path.exists() {
            return Err(LedgerError::PersistenceConflict {
                table: RECEIPTS_TABLE,
                key: receipt.receipt_id.clone(),
            });
        }
        if let Some(parent) = &receipt.parent_receipt_id {
            if !self.contains_receipt(parent)? {
                return Err(LedgerError::UnknownParent {
                    parent_receipt_id: parent.clone(),
                });
            }
        }
        check_stored_texts(receipt, question, raw_answer)?;

        let answer = stored_answer_for(receipt, question, raw_answer, explained_answer);
        let answer_path = self.answer_path(&receipt.answer_id);
        write_new_file(&answer_path, &serde_json::to_vec_pretty(&answer)?)
            .map_err(|e| conflict_or_io(e, ANSWERS_TABLE, &receipt.answer_id))?;

        // The receipt file is the commit point.
        if let Err(err) = serde_json::to_vec_pretty(receipt)
            .map_err(LedgerError::from)
            .and_then(|bytes| {
                write_new_file(&receipt_path, &bytes)
                    .map_err(|e| conflict_or_io(e, RECEIPTS_TABLE, &receipt.receipt_id))
            })
        {
            remove_uncommitted(&answer_path);
            return Err(err);
        }

        if let Err(err) = self.append_audit_entry(&AuditLogEntry::receipt_persisted(receipt)) {
            remove_uncommitted(&receipt_path);
            remove_uncommitted(&answer_path);
            return Err(err);
        }

        info!(
            receipt_id = %receipt.receipt_id,
            parent_receipt_id = ?receipt.parent_receipt_id,
            path = %receipt_path.display(),
            "receipt persisted"
        );
        Ok(receipt_path.display().to_string())
    }

    fn load_receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, LedgerError> {
        if validate_file_key("receipt_id", receipt_id).is_err() {
            return Ok(None);
        }
        let receipt: Option<Receipt> = read_json(&self.receipt_path(receipt_id))?;
        if let Some(r) = &receipt {
            r.validate()?;
        }
        Ok(receipt)
    }

    fn load_answer(&self, answer_id: &str) -> Result<Option<StoredAnswer>, LedgerError> {
        if validate_file_key("answer_id", answer_id).is_err() {
            return Ok(None);
        }
        read_json(&self.answer_path(answer_id))
    }

    fn audit_entries(&self) -> Result<Vec<AuditLogEntry>, LedgerError> {
        let file = match fs::File::open(self.audit_log_path()) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// Ids become file names; only `[A-Za-z0-9_-]` is accepted.
fn validate_file_key(field: &'static str, key: &str) -> Result<(), ContractViolation> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be a file-safe identifier",
        });
    }
    Ok(())
}

fn write_new_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    Ok(())
}

fn conflict_or_io(err: io::Error, table: &'static str, key: &str) -> LedgerError {
    if err.kind() == io::ErrorKind::AlreadyExists {
        LedgerError::PersistenceConflict {
            table,
            key: key.to_string(),
        }
    } else {
        LedgerError::Io(err)
    }
}

fn remove_uncommitted(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "failed to remove uncommitted ledger file");
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LedgerError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_fs_ledger_01_file_keys_reject_path_segments() {
        assert!(validate_file_key("k", "6f1c-22ab").is_ok());
        assert!(validate_file_key("k", "../escape").is_err());
        assert!(validate_file_key("k", "a/b").is_err());
        assert!(validate_file_key("k", "").is_err());
    }

    #[test]
    fn at_fs_ledger_02_unsafe_lookup_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
        assert!(ledger.load_receipt("../../etc/passwd").unwrap().is_none());
        assert!(ledger.audit_entries().unwrap().is_empty());
    }
}
