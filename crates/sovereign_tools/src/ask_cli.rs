#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::json;
use sovereign_engines::model_router::ModelRouter;
use sovereign_kernel_contracts::roles::ResponseMode;
use sovereign_kernel_contracts::routing::Sensitivity;
use sovereign_os::triad::{routed_pipeline, PipelineConfig};
use sovereign_storage::chain::{verify_answer_integrity, verify_parent_link, walk_chain};
use sovereign_storage::ledger::LedgerError;
use sovereign_storage::repo::ReceiptLedgerRepo;
use tracing::debug;

pub const USAGE: &str = "usage:\n  \
sovereign ask [--mode raw|explained] [--sensitivity normal|high] [--parent <receipt_id>] <question...>\n  \
sovereign route <task_type> [normal|high]\n  \
sovereign verify <receipt_id>\n  \
sovereign chain <receipt_id>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SovereignCommand {
    Ask {
        question: String,
        mode: ResponseMode,
        sensitivity: Sensitivity,
        parent_receipt_id: Option<String>,
    },
    Route {
        task_type: String,
        sensitivity: Sensitivity,
    },
    Verify {
        receipt_id: String,
    },
    Chain {
        receipt_id: String,
    },
}

impl SovereignCommand {
    /// Only `ask` and `route` read the routing configuration.
    pub fn needs_router(&self) -> bool {
        matches!(self, Self::Ask { .. } | Self::Route { .. })
    }
}

pub fn parse_command(args: &[String]) -> Result<SovereignCommand, String> {
    let (sub, rest) = args.split_first().ok_or_else(|| USAGE.to_string())?;
    match sub.as_str() {
        "ask" => parse_ask(rest),
        "route" => {
            let task_type = rest.first().ok_or_else(|| USAGE.to_string())?.clone();
            let sensitivity = match rest.get(1) {
                Some(raw) => parse_sensitivity(raw)?,
                None => Sensitivity::Normal,
            };
            Ok(SovereignCommand::Route {
                task_type,
                sensitivity,
            })
        }
        "verify" => Ok(SovereignCommand::Verify {
            receipt_id: single_id(rest)?,
        }),
        "chain" => Ok(SovereignCommand::Chain {
            receipt_id: single_id(rest)?,
        }),
        other => Err(format!(
            "unknown subcommand: {other}. expected one of: ask, route, verify, chain"
        )),
    }
}

fn parse_ask(rest: &[String]) -> Result<SovereignCommand, String> {
    let mut mode = ResponseMode::Raw;
    let mut sensitivity = Sensitivity::Normal;
    let mut parent_receipt_id = None;
    let mut words = Vec::new();
    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--mode" => {
                let raw = it.next().ok_or("--mode needs a value")?;
                mode = ResponseMode::parse(raw)
                    .ok_or_else(|| format!("invalid mode '{raw}'. expected raw or explained"))?;
            }
            "--sensitivity" => {
                let raw = it.next().ok_or("--sensitivity needs a value")?;
                sensitivity = parse_sensitivity(raw)?;
            }
            "--parent" => {
                let raw = it.next().ok_or("--parent needs a receipt id")?;
                parent_receipt_id = Some(raw.clone());
            }
            _ => words.push(arg.as_str()),
        }
    }
    let question = words.join(" ");
    if question.trim().is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(SovereignCommand::Ask {
        question,
        mode,
        sensitivity,
        parent_receipt_id,
    })
}

fn parse_sensitivity(raw: &str) -> Result<Sensitivity, String> {
    Sensitivity::parse(raw)
        .ok_or_else(|| format!("invalid sensitivity '{raw}'. expected normal or high"))
}

fn single_id(rest: &[String]) -> Result<String, String> {
    match rest {
        [id] => Ok(id.clone()),
        _ => Err(USAGE.to_string()),
    }
}

pub fn execute_command<L: ReceiptLedgerRepo>(
    cmd: &SovereignCommand,
    router: Arc<ModelRouter>,
    ledger: L,
    config: PipelineConfig,
) -> Result<String, String> {
    debug!(command = ?cmd, "executing sovereign command");
    match cmd {
        SovereignCommand::Ask {
            question,
            mode,
            sensitivity,
            parent_receipt_id,
        } => {
            let pipeline = routed_pipeline(config, router, ledger).map_err(|e| e.to_string())?;
            let out = pipeline
                .run(question, *mode, parent_receipt_id.as_deref(), *sensitivity)
                .map_err(|e| format!("ask failed: {e}"))?;
            to_pretty(&out)
        }
        SovereignCommand::Route {
            task_type,
            sensitivity,
        } => {
            let resolved = router
                .resolve(task_type, *sensitivity)
                .map_err(|e| e.to_string())?;
            to_pretty(&json!({
                "task_type": task_type,
                "sensitivity": sensitivity.as_str(),
                "model_key": resolved.model_key,
                "provider": resolved.config.provider,
                "model_id": resolved.config.id,
                "override_applied": resolved.override_applied,
            }))
        }
        SovereignCommand::Verify { receipt_id } => {
            let receipt = ledger
                .load_receipt(receipt_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| {
                    LedgerError::NotFound {
                        receipt_id: receipt_id.clone(),
                    }
                    .to_string()
                })?;
            let parent = verify_parent_link(&ledger, &receipt).map_err(|e| e.to_string())?;
            let integrity =
                verify_answer_integrity(&ledger, receipt_id).map_err(|e| e.to_string())?;
            let ok = integrity.is_intact();
            to_pretty(&json!({
                "receipt_id": receipt.receipt_id,
                "parent_receipt_id": parent.map(|p| p.receipt_id),
                "parent_link_ok": true,
                "answer_integrity": integrity,
                "ok": ok,
            }))
        }
        SovereignCommand::Chain { receipt_id } => {
            let chain = walk_chain(&ledger, receipt_id).map_err(|e| e.to_string())?;
            let rows: Vec<_> = chain
                .iter()
                .map(|r| {
                    json!({
                        "receipt_id": r.receipt_id,
                        "parent_receipt_id": r.parent_receipt_id,
                        "mode": r.mode,
                        "timestamp": r.timestamp,
                    })
                })
                .collect();
            to_pretty(&rows)
        }
    }
}

fn to_pretty<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to render output: {e}"))
}
