#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::Serialize;
use sovereign_kernel_contracts::receipt::Receipt;

use crate::digest::hash_text;
use crate::ledger::LedgerError;
use crate::repo::ReceiptLedgerRepo;

/// The receipt and all of its ancestors, child first.
pub fn walk_chain<L>(ledger: &L, receipt_id: &str) -> Result<Vec<Receipt>, LedgerError>
where
    L: ReceiptLedgerRepo + ?Sized,
{
    let head = ledger
        .load_receipt(receipt_id)?
        .ok_or_else(|| LedgerError::NotFound {
            receipt_id: receipt_id.to_string(),
        })?;
    let mut seen = BTreeSet::from([head.receipt_id.clone()]);
    let mut chain = vec![head];
    while let Some(parent_id) = chain
        .last()
        .and_then(|r| r.parent_receipt_id.clone())
    {
        if !seen.insert(parent_id.clone()) {
            return Err(LedgerError::ChainBroken {
                receipt_id: parent_id,
                reason: "cycle in parent references",
            });
        }
        let parent = ledger
            .load_receipt(&parent_id)?
            .ok_or_else(|| LedgerError::ChainBroken {
                receipt_id: parent_id.clone(),
                reason: "parent receipt missing",
            })?;
        chain.push(parent);
    }
    Ok(chain)
}

/// Confirms the child's parent exists and was persisted no later than the
/// child. Returns the parent, or `None` for a root receipt.
pub fn verify_parent_link<L>(ledger: &L, child: &Receipt) -> Result<Option<Receipt>, LedgerError>
where
    L: ReceiptLedgerRepo + ?Sized,
{
    let Some(parent_id) = &child.parent_receipt_id else {
        return Ok(None);
    };
    let parent = ledger
        .load_receipt(parent_id)?
        .ok_or_else(|| LedgerError::ChainBroken {
            receipt_id: parent_id.clone(),
            reason: "parent receipt missing",
        })?;
    if parent.timestamp > child.timestamp {
        return Err(LedgerError::ChainBroken {
            receipt_id: child.receipt_id.clone(),
            reason: "parent timestamp is after child timestamp",
        });
    }
    Ok(Some(parent))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerIntegrityReport {
    pub receipt_id: String,
    pub answer_id: String,
    pub prompt_hash_matches: bool,
    pub answer_hash_matches: bool,
}

impl AnswerIntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.prompt_hash_matches && self.answer_hash_matches
    }
}

/// Re-hashes the stored question and raw answer against the receipt.
pub fn verify_answer_integrity<L>(
    ledger: &L,
    receipt_id: &str,
) -> Result<AnswerIntegrityReport, LedgerError>
where
    L: ReceiptLedgerRepo + ?Sized,
{
    let receipt = ledger
        .load_receipt(receipt_id)?
        .ok_or_else(|| LedgerError::NotFound {
            receipt_id: receipt_id.to_string(),
        })?;
    let answer = ledger
        .load_answer(&receipt.answer_id)?
        .ok_or_else(|| LedgerError::ChainBroken {
            receipt_id: receipt_id.to_string(),
            reason: "stored answer missing",
        })?;
    Ok(AnswerIntegrityReport {
        receipt_id: receipt.receipt_id.clone(),
        answer_id: receipt.answer_id.clone(),
        prompt_hash_matches: hash_text(&answer.question) == receipt.prompt_hash,
        answer_hash_matches: hash_text(&answer.raw_answer) == receipt.answer_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryReceiptLedger;
    use sovereign_kernel_contracts::roles::{agent_path_for, ResponseMode};

    fn receipt(id: &str, parent: Option<&str>, timestamp: u64) -> Receipt {
        Receipt::v1(
            id.to_string(),
            format!("ans-{id}"),
            "stack-routed".to_string(),
            "v0.1a".to_string(),
            ResponseMode::Raw,
            agent_path_for(ResponseMode::Raw),
            hash_text("q"),
            hash_text("a"),
            None,
            hash_text("system"),
            parent.map(str::to_string),
            Vec::new(),
            timestamp,
        )
        .unwrap()
    }

    #[test]
    fn at_chain_01_walk_returns_child_first() {
        let ledger = InMemoryReceiptLedger::new();
        ledger.persist(&receipt("r1", None, 10), "q", "a", None).unwrap();
        ledger.persist(&receipt("r2", Some("r1"), 11), "q", "a", None).unwrap();
        ledger.persist(&receipt("r3", Some("r2"), 12), "q", "a", None).unwrap();
        let ids: Vec<String> = walk_chain(&ledger, "r3")
            .unwrap()
            .into_iter()
            .map(|r| r.receipt_id)
            .collect();
        assert_eq!(ids, vec!["r3", "r2", "r1"]);
    }

    #[test]
    fn at_chain_02_unknown_head_is_not_found() {
        let ledger = InMemoryReceiptLedger::new();
        assert!(matches!(
            walk_chain(&ledger, "nope"),
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[test]
    fn at_chain_03_parent_after_child_is_broken() {
        let ledger = InMemoryReceiptLedger::new();
        ledger.persist(&receipt("r1", None, 50), "q", "a", None).unwrap();
        let child = receipt("r2", Some("r1"), 40);
        assert!(matches!(
            verify_parent_link(&ledger, &child),
            Err(LedgerError::ChainBroken { .. })
        ));
        let ok_child = receipt("r3", Some("r1"), 50);
        let parent = verify_parent_link(&ledger, &ok_child).unwrap().unwrap();
        assert_eq!(parent.receipt_id, "r1");
        assert!(verify_parent_link(&ledger, &parent).unwrap().is_none());
    }

    #[test]
    fn at_chain_04_answer_integrity_of_persisted_texts() {
        let ledger = InMemoryReceiptLedger::new();
        ledger.persist(&receipt("r1", None, 1), "q", "a", None).unwrap();
        assert!(verify_answer_integrity(&ledger, "r1").unwrap().is_intact());

        let report = verify_answer_integrity(&ledger, "r1").unwrap();
        assert!(report.prompt_hash_matches);
        assert!(report.answer_hash_matches);
        assert_eq!(report.answer_id, "ans-r1");

        assert!(ledger
            .persist(&receipt("r2", None, 1), "q", "tampered", None)
            .is_err());
        assert!(verify_answer_integrity(&ledger, "r2").is_err());
    }
}
