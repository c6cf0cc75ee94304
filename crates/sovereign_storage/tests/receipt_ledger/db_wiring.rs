#![forbid(unsafe_code)]

use std::fs;
use std::sync::Arc;
use std::thread;

use sovereign_kernel_contracts::drift::{DriftFinding, DriftFindingKind};
use sovereign_kernel_contracts::receipt::{AuditEventKind, Receipt};
use sovereign_kernel_contracts::roles::{agent_path_for, PipelineContext, ResponseMode};
use sovereign_kernel_contracts::routing::Sensitivity;
use sovereign_storage::chain::{verify_answer_integrity, verify_parent_link, walk_chain};
use sovereign_storage::digest::hash_text;
use sovereign_storage::fs_ledger::FsReceiptLedger;
use sovereign_storage::ledger::{build_receipt, LedgerError, ReceiptBuildInput};
use sovereign_storage::repo::ReceiptLedgerRepo;

fn ctx() -> PipelineContext {
    PipelineContext::v1(
        "v0.1a".to_string(),
        "stack-routed".to_string(),
        Sensitivity::Normal,
    )
    .unwrap()
}

fn build(mode: ResponseMode, parent: Option<String>, drift: Vec<DriftFinding>) -> Receipt {
    let ctx = ctx();
    build_receipt(ReceiptBuildInput {
        question: "What does the charter require?",
        raw_answer: "Every decision carries a receipt.",
        interpreter_prompt: (mode == ResponseMode::Explained).then_some("Explain: receipts"),
        assistant_system_prompt: "system prompt",
        context: &ctx,
        agent_path: agent_path_for(mode),
        mode,
        parent_receipt_id: parent,
        drift_details: drift,
    })
    .unwrap()
}

fn persist(ledger: &FsReceiptLedger, r: &Receipt) -> String {
    ledger
        .persist(
            r,
            "What does the charter require?",
            "Every decision carries a receipt.",
            None,
        )
        .unwrap()
}

#[test]
fn at_ledger_db_01_receipt_answer_and_audit_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let r = build(ResponseMode::Raw, None, Vec::new());
    let path = persist(&ledger, &r);

    assert_eq!(path, ledger.receipt_path(&r.receipt_id).display().to_string());
    let on_disk: Receipt = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, r);

    let answer = ledger.load_answer(&r.answer_id).unwrap().unwrap();
    assert_eq!(answer.receipt_id, r.receipt_id);
    assert_eq!(answer.raw_answer, "Every decision carries a receipt.");
    assert!(answer.explained_answer.is_none());

    let audit = ledger.audit_entries().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event, AuditEventKind::ReceiptPersisted);
    assert_eq!(audit[0].receipt_id, r.receipt_id);
}

#[test]
fn at_ledger_db_02_colliding_receipt_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let r = build(ResponseMode::Raw, None, Vec::new());
    persist(&ledger, &r);
    let before = fs::read(ledger.receipt_path(&r.receipt_id)).unwrap();

    let err = ledger.persist(&r, "other", "other", None).unwrap_err();
    assert!(matches!(err, LedgerError::PersistenceConflict { .. }));
    assert_eq!(fs::read(ledger.receipt_path(&r.receipt_id)).unwrap(), before);
    assert_eq!(ledger.audit_entries().unwrap().len(), 1);
}

#[test]
fn at_ledger_db_03_unknown_parent_leaves_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let orphan = build(ResponseMode::Raw, Some("missing-parent".to_string()), Vec::new());
    let err = ledger.persist(&orphan, "q", "a", None).unwrap_err();
    assert!(matches!(err, LedgerError::UnknownParent { .. }));
    assert!(!ledger.receipt_path(&orphan.receipt_id).exists());
    assert!(ledger.load_answer(&orphan.answer_id).unwrap().is_none());
    assert!(ledger.audit_entries().unwrap().is_empty());
}

#[test]
fn at_ledger_db_04_chain_walk_and_parent_link_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = build(ResponseMode::Raw, None, Vec::new());
    let child = build(
        ResponseMode::Explained,
        Some(root.receipt_id.clone()),
        Vec::new(),
    );
    {
        let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
        persist(&ledger, &root);
        ledger
            .persist(
                &child,
                "What does the charter require?",
                "Every decision carries a receipt.",
                Some("In short: every answer is logged."),
            )
            .unwrap();
    }

    let reopened = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let loaded_child = reopened.load_receipt(&child.receipt_id).unwrap().unwrap();
    assert_eq!(loaded_child.parent_receipt_id.as_deref(), Some(root.receipt_id.as_str()));
    assert_eq!(
        loaded_child.interpreter_prompt_hash,
        Some(hash_text("Explain: receipts"))
    );

    let chain = walk_chain(&reopened, &child.receipt_id).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].receipt_id, root.receipt_id);
    let parent = verify_parent_link(&reopened, &loaded_child).unwrap().unwrap();
    assert_eq!(parent, root);

    let report = verify_answer_integrity(&reopened, &child.receipt_id).unwrap();
    assert!(report.is_intact());
    let audit = reopened.audit_entries().unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[1].parent_receipt_id.as_deref(), Some(root.receipt_id.as_str()));
}

#[test]
fn at_ledger_db_05_drift_details_persist_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let finding = DriftFinding::v1(
        DriftFindingKind::Missing,
        "charter.md".to_string(),
        hash_text("charter"),
        None,
    )
    .unwrap();
    let r = build(ResponseMode::Raw, None, vec![finding.clone()]);
    assert!(r.drift_detected);
    persist(&ledger, &r);
    let loaded = ledger.load_receipt(&r.receipt_id).unwrap().unwrap();
    assert_eq!(loaded.drift_details, vec![finding]);
}

#[test]
fn at_ledger_db_06_concurrent_writers_each_land_once() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(FsReceiptLedger::for_root(dir.path().to_path_buf()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let r = build(ResponseMode::Raw, None, Vec::new());
                persist(&ledger, &r);
                r.receipt_id
            })
        })
        .collect();
    let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let audit = ledger.audit_entries().unwrap();
    assert_eq!(audit.len(), 8);
    for id in ids {
        assert!(ledger.contains_receipt(&id).unwrap());
    }
}

#[test]
fn at_ledger_db_07_audit_log_only_grows() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let first = build(ResponseMode::Raw, None, Vec::new());
    persist(&ledger, &first);
    let log_path = dir.path().join("audit_log.jsonl");
    let before = fs::read(&log_path).unwrap();

    assert!(ledger
        .persist(
            &first,
            "What does the charter require?",
            "Every decision carries a receipt.",
            None
        )
        .is_err());
    assert_eq!(fs::read(&log_path).unwrap(), before);

    let second = build(ResponseMode::Raw, Some(first.receipt_id.clone()), Vec::new());
    persist(&ledger, &second);
    let after = fs::read(&log_path).unwrap();
    assert!(after.starts_with(&before));
    assert_eq!(ledger.audit_entries().unwrap().len(), 2);
}

#[test]
fn at_ledger_db_08_mismatched_texts_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let r = build(ResponseMode::Raw, None, Vec::new());
    let err = ledger
        .persist(&r, "What does the charter require?", "Nothing at all.", None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::ContractViolation(_)));
    assert!(!ledger.receipt_path(&r.receipt_id).exists());
    assert!(ledger.load_answer(&r.answer_id).unwrap().is_none());
    assert!(ledger.audit_entries().unwrap().is_empty());
}

#[test]
fn at_ledger_db_09_tampered_answer_file_fails_integrity() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FsReceiptLedger::for_root(dir.path().to_path_buf());
    let r = build(ResponseMode::Raw, None, Vec::new());
    persist(&ledger, &r);
    assert!(verify_answer_integrity(&ledger, &r.receipt_id)
        .unwrap()
        .is_intact());

    let mut answer = ledger.load_answer(&r.answer_id).unwrap().unwrap();
    answer.raw_answer = "Receipts are optional.".to_string();
    let answer_path = dir
        .path()
        .join("answers")
        .join(format!("{}.json", r.answer_id));
    fs::write(&answer_path, serde_json::to_vec_pretty(&answer).unwrap()).unwrap();

    let report = verify_answer_integrity(&ledger, &r.receipt_id).unwrap();
    assert!(report.prompt_hash_matches);
    assert!(!report.answer_hash_matches);
    assert!(!report.is_intact());
}
