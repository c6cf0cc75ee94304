#![forbid(unsafe_code)]

use sovereign_kernel_contracts::receipt::{AuditLogEntry, Receipt, StoredAnswer};

use crate::ledger::LedgerError;

/// Write-once receipt store with an append-only audit log.
///
/// No update or delete operation exists.
pub trait ReceiptLedgerRepo: Send + Sync {
    /// Persists the receipt, its answer texts and one audit entry, or nothing.
    /// Returns the location of the persisted receipt.
    fn persist(
        &self,
        receipt: &Receipt,
        question: &str,
        raw_answer: &str,
        explained_answer: Option<&str>,
    ) -> Result<String, LedgerError>;

    fn load_receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, LedgerError>;

    fn load_answer(&self, answer_id: &str) -> Result<Option<StoredAnswer>, LedgerError>;

    fn audit_entries(&self) -> Result<Vec<AuditLogEntry>, LedgerError>;

    fn contains_receipt(&self, receipt_id: &str) -> Result<bool, LedgerError> {
        Ok(self.load_receipt(receipt_id)?.is_some())
    }
}
