#![forbid(unsafe_code)]

use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use sovereign_kernel_contracts::routing::{
    ModelRunOutput, ResolvedModel, RoutingTable, Sensitivity, REMOTE_TIER_MODEL_KEY,
};
use sovereign_kernel_contracts::Validate;
use tracing::{debug, info, warn};

pub const ROUTING_CONFIG_PATH_ENV: &str = "SOVEREIGN_MODEL_STACK_PATH";
pub const DEFAULT_ROUTING_CONFIG_PATH: &str = "config/model_stack.yaml";

pub const OLLAMA_URL_ENV: &str = "SOVEREIGN_OLLAMA_URL";
pub const OLLAMA_TIMEOUT_MS_ENV: &str = "SOVEREIGN_OLLAMA_TIMEOUT_MS";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u32 = 90_000;
const MAX_DISPATCH_TIMEOUT_MS: u32 = 600_000;

pub const PROVIDER_OLLAMA: &str = "ollama";
pub const PROVIDER_CLOUD_LLM: &str = "cloud-llm";
const REMOTE_STUB_PROMPT_CHARS: usize = 180;
const ERROR_BODY_EXCERPT_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerFailure {
    pub provider: String,
    pub error_kind: &'static str,
    pub http_status: Option<u16>,
    pub detail: String,
}

impl RunnerFailure {
    fn new(
        provider: &str,
        error_kind: &'static str,
        http_status: Option<u16>,
        detail: String,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            error_kind,
            http_status,
            detail,
        }
    }
}

impl fmt::Display for RunnerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) => write!(
                f,
                "provider={} error={} status={} detail={}",
                self.provider, self.error_kind, status, self.detail
            ),
            None => write!(
                f,
                "provider={} error={} detail={}",
                self.provider, self.error_kind, self.detail
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    Config { origin: String, detail: String },
    UnknownModel { model_key: String, task_type: String },
    UnsupportedProvider { provider: String },
    Runner(RunnerFailure),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { origin, detail } => {
                write!(f, "routing config error ({origin}): {detail}")
            }
            Self::UnknownModel {
                model_key,
                task_type,
            } => write!(
                f,
                "model key '{model_key}' not defined for task '{task_type}'"
            ),
            Self::UnsupportedProvider { provider } => {
                write!(f, "unsupported provider '{provider}'")
            }
            Self::Runner(failure) => write!(f, "model runner failed: {failure}"),
        }
    }
}

impl std::error::Error for RouterError {}

/// Where the routing configuration document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingConfigSource {
    File(PathBuf),
    Inline(String),
}

impl RoutingConfigSource {
    pub fn from_env() -> Self {
        let path = env::var(ROUTING_CONFIG_PATH_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ROUTING_CONFIG_PATH.to_string());
        Self::File(PathBuf::from(path))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Inline(_) => "inline".to_string(),
        }
    }

    pub fn load(&self) -> Result<RoutingTable, RouterError> {
        let raw = match self {
            Self::File(path) => {
                if !path.exists() {
                    return Err(RouterError::Config {
                        origin: self.describe(),
                        detail: "routing config not found".to_string(),
                    });
                }
                fs::read_to_string(path).map_err(|err| RouterError::Config {
                    origin: self.describe(),
                    detail: format!("read failed: {err}"),
                })?
            }
            Self::Inline(raw) => raw.clone(),
        };
        parse_routing_table(&raw).map_err(|detail| RouterError::Config {
            origin: self.describe(),
            detail,
        })
    }
}

pub fn parse_routing_table(raw: &str) -> Result<RoutingTable, String> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(raw).map_err(|err| format!("yaml parse failed: {err}"))?;
    if doc.is_null() {
        return Ok(RoutingTable::default());
    }
    let table: RoutingTable =
        serde_yaml::from_value(doc).map_err(|err| format!("yaml shape invalid: {err}"))?;
    table.validate().map_err(|violation| violation.to_string())?;
    Ok(table)
}

/// Load-once holder for a routing table.
///
/// Concurrent first callers serialize on `load_lock`; exactly one of them runs
/// the loader and the rest observe its result. A failed load leaves the cache
/// empty. Once populated, reads go through the `OnceLock` without locking.
#[derive(Debug)]
pub struct RoutingTableCache {
    cell: OnceLock<Arc<RoutingTable>>,
    load_lock: Mutex<()>,
    load_count: AtomicUsize,
}

impl RoutingTableCache {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            load_lock: Mutex::new(()),
            load_count: AtomicUsize::new(0),
        }
    }

    /// Returns the cached table, loading it from `source` on first use only.
    /// Later calls ignore `source`.
    pub fn get_or_load(
        &self,
        source: &RoutingConfigSource,
    ) -> Result<Arc<RoutingTable>, RouterError> {
        if let Some(table) = self.cell.get() {
            return Ok(Arc::clone(table));
        }
        let _guard = self
            .load_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = self.cell.get() {
            return Ok(Arc::clone(table));
        }
        self.load_count.fetch_add(1, Ordering::SeqCst);
        let table = Arc::new(source.load()?);
        info!(
            origin = %source.describe(),
            models = table.models.len(),
            task_routes = table.routing_rules.by_task_type.len(),
            "routing table loaded"
        );
        Ok(Arc::clone(self.cell.get_or_init(|| table)))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Number of loader executions so far.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }
}

impl Default for RoutingTableCache {
    fn default() -> Self {
        Self::new()
    }
}

static PROCESS_ROUTING_TABLE: RoutingTableCache = RoutingTableCache::new();

/// Process-wide routing table. The first successful call fixes the table for
/// the lifetime of the process.
pub fn load_routing_table(
    source: &RoutingConfigSource,
) -> Result<Arc<RoutingTable>, RouterError> {
    PROCESS_ROUTING_TABLE.get_or_load(source)
}

/// Maps (task_type, sensitivity) to a model key and its config.
///
/// The high-sensitivity override only rewrites the literal `remote_tier` key.
/// A task mapped straight to some other remote-backed key is left alone.
pub fn resolve_model(
    table: &RoutingTable,
    task_type: &str,
    sensitivity: Sensitivity,
) -> Result<ResolvedModel, RouterError> {
    let rules = &table.routing_rules;
    let mut model_key = rules
        .by_task_type
        .get(task_type)
        .unwrap_or(&rules.default)
        .clone();
    let mut override_applied = false;
    if sensitivity == Sensitivity::High {
        let ov = &rules.overrides.high_sensitivity;
        if !ov.allow_remote && model_key == REMOTE_TIER_MODEL_KEY {
            model_key = ov
                .fallback
                .clone()
                .unwrap_or_else(|| rules.default.clone());
            override_applied = true;
        }
    }
    let config = table
        .model(&model_key)
        .cloned()
        .ok_or_else(|| RouterError::UnknownModel {
            model_key: model_key.clone(),
            task_type: task_type.to_string(),
        })?;
    debug!(
        task_type,
        sensitivity = sensitivity.as_str(),
        model_key = %model_key,
        override_applied,
        "model resolved"
    );
    Ok(ResolvedModel {
        model_key,
        config,
        override_applied,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub timeout_ms: u32,
    pub user_agent: String,
}

impl OllamaConfig {
    pub fn mvp_v1() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            user_agent: format!("sovereign/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::mvp_v1();
        if let Some(endpoint) = env::var(OLLAMA_URL_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            config.endpoint = endpoint;
        }
        if let Some(timeout_ms) = env::var(OLLAMA_TIMEOUT_MS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| (1..=MAX_DISPATCH_TIMEOUT_MS).contains(v))
        {
            config.timeout_ms = timeout_ms;
        }
        config
    }
}

/// Resolves models from an immutable routing table and dispatches prompts.
/// No retries: a failed dispatch is returned to the caller as-is.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    table: Arc<RoutingTable>,
    ollama: OllamaConfig,
}

impl ModelRouter {
    pub fn new(table: Arc<RoutingTable>, ollama: OllamaConfig) -> Self {
        Self { table, ollama }
    }

    pub fn from_process_cache(
        source: &RoutingConfigSource,
        ollama: OllamaConfig,
    ) -> Result<Self, RouterError> {
        Ok(Self::new(load_routing_table(source)?, ollama))
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn resolve(
        &self,
        task_type: &str,
        sensitivity: Sensitivity,
    ) -> Result<ResolvedModel, RouterError> {
        resolve_model(&self.table, task_type, sensitivity)
    }

    pub fn dispatch(
        &self,
        provider: &str,
        model_id: &str,
        prompt: &str,
        extra: &Map<String, Value>,
    ) -> Result<String, RouterError> {
        match provider {
            PROVIDER_OLLAMA => {
                call_ollama(&self.ollama, model_id, prompt, extra).map_err(|failure| {
                    warn!(
                        provider = %failure.provider,
                        error_kind = failure.error_kind,
                        http_status = ?failure.http_status,
                        "model dispatch failed"
                    );
                    RouterError::Runner(failure)
                })
            }
            PROVIDER_CLOUD_LLM => Ok(call_cloud_stub(model_id, prompt)),
            other => Err(RouterError::UnsupportedProvider {
                provider: other.to_string(),
            }),
        }
    }

    pub fn run_model_for_task(
        &self,
        task_type: &str,
        prompt: &str,
        sensitivity: Sensitivity,
    ) -> Result<ModelRunOutput, RouterError> {
        let resolved = self.resolve(task_type, sensitivity)?;
        let text = self.dispatch(
            &resolved.config.provider,
            &resolved.config.id,
            prompt,
            &Map::new(),
        )?;
        Ok(ModelRunOutput {
            model_key: resolved.model_key,
            model_id: resolved.config.id,
            provider: resolved.config.provider,
            text,
            sensitivity,
        })
    }
}

fn call_ollama(
    config: &OllamaConfig,
    model_id: &str,
    prompt: &str,
    extra: &Map<String, Value>,
) -> Result<String, RunnerFailure> {
    let agent = build_http_agent(config.timeout_ms, &config.user_agent)?;
    let mut payload = Map::new();
    payload.insert("model".to_string(), Value::String(model_id.to_string()));
    payload.insert("prompt".to_string(), Value::String(prompt.to_string()));
    payload.insert("stream".to_string(), Value::Bool(false));
    for (key, value) in extra {
        payload.insert(key.clone(), value.clone());
    }

    let response = agent
        .post(&config.endpoint)
        .set("Content-Type", "application/json")
        .set("Accept", "application/json")
        .send_json(Value::Object(payload))
        .map_err(runner_failure_from_ureq)?;
    if response.status() != 200 {
        let status = response.status();
        return Err(RunnerFailure::new(
            PROVIDER_OLLAMA,
            "http_non_200",
            Some(status),
            body_excerpt(response),
        ));
    }
    let body: Value = serde_json::from_reader(response.into_reader()).map_err(|err| {
        RunnerFailure::new(PROVIDER_OLLAMA, "json_parse", None, err.to_string())
    })?;
    Ok(extract_response_text(&body))
}

fn call_cloud_stub(model_id: &str, prompt: &str) -> String {
    let head: String = prompt.chars().take(REMOTE_STUB_PROMPT_CHARS).collect();
    format!("[REMOTE_STUB:{model_id}] {head}")
}

fn extract_response_text(body: &Value) -> String {
    ["response", "output"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn build_http_agent(timeout_ms: u32, user_agent: &str) -> Result<ureq::Agent, RunnerFailure> {
    if timeout_ms == 0 {
        return Err(RunnerFailure::new(
            PROVIDER_OLLAMA,
            "config_invalid",
            None,
            "timeout must be > 0".to_string(),
        ));
    }
    let timeout = Duration::from_millis(u64::from(timeout_ms));
    Ok(ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .timeout(timeout)
        .user_agent(user_agent)
        .try_proxy_from_env(false)
        .build())
}

fn runner_failure_from_ureq(err: ureq::Error) -> RunnerFailure {
    match err {
        ureq::Error::Status(status, response) => RunnerFailure::new(
            PROVIDER_OLLAMA,
            "http_non_200",
            Some(status),
            body_excerpt(response),
        ),
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            RunnerFailure::new(
                PROVIDER_OLLAMA,
                classify_transport_error_kind(&combined),
                None,
                transport.to_string(),
            )
        }
    }
}

fn body_excerpt(response: ureq::Response) -> String {
    response
        .into_string()
        .map(|body| body.chars().take(ERROR_BODY_EXCERPT_CHARS).collect())
        .unwrap_or_default()
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
