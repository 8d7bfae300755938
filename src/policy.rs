//! §4.3 PolicyGate: maps ops to `PermissionScope`, resolves `api.call`
//! decisions against a two-tier store (session in-memory, then a
//! persistent `PolicyStore`), and falls back to an injected `PolicyPrompt`
//! when neither tier has an opinion. Default decision with no prompt
//! handler installed is **deny** (§4.3: "prevents silent auto-allow").

use crate::authz::{self, UrlClass};
use crate::config::errors as codes;
use crate::envelope::Op;
use crate::error::{AdapterError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Op-to-scope mapping (§4.3). `Api` is not one of the spec's literal
/// three scopes — `api.call` is delegated to the finer URL-keyed
/// resolver below — but it is tracked here for telemetry uniformity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    Window,
    Dom,
    Components,
    Api,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::Window => "window",
            PermissionScope::Dom => "dom",
            PermissionScope::Components => "components",
            PermissionScope::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDecision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDuration {
    Session,
    Forever,
    Once,
}

#[derive(Debug, Clone)]
pub struct PolicyChoice {
    pub decision: PolicyDecision,
    pub duration: PolicyDuration,
    /// §6: a decision may be scoped to `url.pathname.startsWith(prefix)`.
    pub path_prefix: Option<String>,
}

/// §6 persisted value shape: `{decision, duration?, pathPrefix?, createdAt,
/// sessionOnly?}`. `duration`/`createdAt` default when absent so a legacy
/// bare-string record (migrated in [`FilePolicyStore::load`]) round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub decision: PolicyDecision,
    #[serde(default = "PolicyRecord::default_duration")]
    pub duration: PolicyDuration,
    #[serde(rename = "pathPrefix", default)]
    pub path_prefix: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "sessionOnly", default)]
    pub session_only: bool,
}

impl PolicyRecord {
    fn default_duration() -> PolicyDuration {
        PolicyDuration::Forever
    }
}

/// §6: "Legacy bare-string values auto-migrate to `{decision, duration:
/// 'forever'}`." Tried before the full-shape record on every file read.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawPolicyValue {
    Legacy(PolicyDecision),
    Full(PolicyRecord),
}

impl RawPolicyValue {
    fn into_record(self) -> PolicyRecord {
        match self {
            RawPolicyValue::Legacy(decision) => PolicyRecord {
                decision,
                duration: PolicyDuration::Forever,
                path_prefix: None,
                created_at: 0,
                session_only: false,
            },
            RawPolicyValue::Full(record) => record,
        }
    }
}

/// Outcome of a policy check, carrying enough for telemetry's
/// `permissions_{allow|deny|prompt}` events (§6).
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub scope: PermissionScope,
    pub key: String,
    pub decision: PolicyDecision,
    pub source: &'static str,
}

impl PolicyOutcome {
    pub fn is_allowed(&self) -> bool {
        self.decision == PolicyDecision::Allow
    }
}

/// External collaborator: the UI modal that asks the user to approve an
/// `api.call` origin. Absent (`NoPrompt`), every ambiguous decision denies.
#[async_trait]
pub trait PolicyPrompt: Send + Sync {
    async fn prompt(&self, key: &str, trace_id: Option<&str>) -> Option<PolicyChoice>;
}

pub struct NoPrompt;

#[async_trait]
impl PolicyPrompt for NoPrompt {
    async fn prompt(&self, _key: &str, _trace_id: Option<&str>) -> Option<PolicyChoice> {
        None
    }
}

/// Persistent tier: `forever`-duration decisions survive process restart.
pub trait PolicyStore: Send + Sync {
    fn load(&self) -> HashMap<String, PolicyRecord>;
    fn persist(&self, key: &str, record: PolicyRecord) -> Result<()>;
}

/// File-backed store, grounded on the teacher's `hostctx::FilePolicyStore`
/// / `authz::reload_policies` pair, extended to the full §6 record shape
/// (`pathPrefix`/`createdAt`/`sessionOnly`) with legacy bare-string
/// auto-migration on read.
pub struct FilePolicyStore {
    path: PathBuf,
}

impl FilePolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePolicyStore { path: path.into() }
    }
}

impl PolicyStore for FilePolicyStore {
    fn load(&self) -> HashMap<String, PolicyRecord> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(_) => return HashMap::new(),
        };
        let raw: HashMap<String, RawPolicyValue> = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => return HashMap::new(),
        };
        raw.into_iter().map(|(k, v)| (k, v.into_record())).collect()
    }

    fn persist(&self, key: &str, record: PolicyRecord) -> Result<()> {
        let mut map = self.load();
        map.insert(key.to_string(), record);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AdapterError::internal(format!("policy dir create failed: {e}")))?;
        }
        let text = serde_json::to_string_pretty(&map)
            .map_err(|e| AdapterError::internal(format!("policy serialize failed: {e}")))?;
        std::fs::write(&self.path, text)
            .map_err(|e| AdapterError::internal(format!("policy write failed: {e}")))?;
        Ok(())
    }
}

/// In-memory-only store used where no persistence directory is desired
/// (tests, ephemeral embeddings).
pub struct NullPolicyStore;

impl PolicyStore for NullPolicyStore {
    fn load(&self) -> HashMap<String, PolicyRecord> {
        HashMap::new()
    }

    fn persist(&self, _key: &str, _record: PolicyRecord) -> Result<()> {
        Ok(())
    }
}

fn scope_for(op: &Op) -> PermissionScope {
    match op {
        Op::WindowCreate(_)
        | Op::WindowUpdate(_)
        | Op::WindowMove(_)
        | Op::WindowResize(_)
        | Op::WindowFocus(_)
        | Op::WindowClose(_) => PermissionScope::Window,
        Op::ComponentRender(_) | Op::ComponentUpdate(_) | Op::ComponentDestroy(_) => {
            PermissionScope::Components
        }
        Op::DomSet(_) | Op::DomReplace(_) | Op::DomAppend(_) => PermissionScope::Dom,
        Op::StateSet(_)
        | Op::StateGet(_)
        | Op::StatePatch(_)
        | Op::StateWatch(_)
        | Op::StateUnwatch(_)
        | Op::TxnCancel(_) => PermissionScope::Dom,
        Op::ApiCall(_) => PermissionScope::Api,
    }
}

/// `PatchOp::Set`/`Merge`/`SetIfNull` never reach here with HTML, but the
/// dom-sanitise-false denial (§4.3) only applies to the literal dom ops.
fn dom_sanitize_denied(op: &Op) -> bool {
    matches!(op,
        Op::DomSet(p) | Op::DomReplace(p) | Op::DomAppend(p) if !p.sanitize
    )
}

pub struct PolicyGate<S: PolicyStore> {
    session: DashMap<String, (PolicyDecision, Option<String>)>,
    store: S,
    prompt: Arc<dyn PolicyPrompt>,
}

impl<S: PolicyStore> PolicyGate<S> {
    pub fn new(store: S, prompt: Arc<dyn PolicyPrompt>) -> Self {
        PolicyGate {
            session: DashMap::new(),
            store,
            prompt,
        }
    }

    pub fn with_no_prompt(store: S) -> Self {
        Self::new(store, Arc::new(NoPrompt))
    }

    /// §4.3 entry point: `PolicyGate.require(scope, context)`.
    pub async fn require(&self, op: &Op, trace_id: Option<&str>) -> Result<PolicyOutcome> {
        let scope = scope_for(op);
        match scope {
            PermissionScope::Window | PermissionScope::Components => Ok(PolicyOutcome {
                scope,
                key: scope.as_str().to_string(),
                decision: PolicyDecision::Allow,
                source: "allow-listed",
            }),
            PermissionScope::Dom => {
                if dom_sanitize_denied(op) {
                    return Ok(PolicyOutcome {
                        scope,
                        key: op.name().to_string(),
                        decision: PolicyDecision::Deny,
                        source: "sanitize-false",
                    });
                }
                Ok(PolicyOutcome {
                    scope,
                    key: op.name().to_string(),
                    decision: PolicyDecision::Allow,
                    source: "allow-listed",
                })
            }
            PermissionScope::Api => {
                let Op::ApiCall(params) = op else {
                    unreachable!("scope_for only maps ApiCall to PermissionScope::Api")
                };
                self.require_api(&params.url, &params.method, trace_id).await
            }
        }
    }

    async fn require_api(&self, raw_url: &str, method: &str, trace_id: Option<&str>) -> Result<PolicyOutcome> {
        let url = Url::parse(raw_url).map_err(|e| {
            AdapterError::validation(codes::VALIDATION_BAD_PARAMS, format!("invalid api.call url: {e}"))
        })?;

        match authz::classify_url(&url, method) {
            UrlClass::InternalAllow => Ok(self.api_outcome(raw_url.to_string(), PolicyDecision::Allow, "internal-scheme")),
            UrlClass::LocalhostAllow => Ok(self.api_outcome(raw_url.to_string(), PolicyDecision::Allow, "localhost")),
            UrlClass::UnknownSchemeDeny => Ok(self.api_outcome(raw_url.to_string(), PolicyDecision::Deny, "unknown-scheme")),
            UrlClass::NeedsDecision(key) => self.resolve_keyed(key, url.path(), trace_id).await,
        }
    }

    fn api_outcome(&self, key: String, decision: PolicyDecision, source: &'static str) -> PolicyOutcome {
        PolicyOutcome {
            scope: PermissionScope::Api,
            key,
            decision,
            source,
        }
    }

    async fn resolve_keyed(&self, key: String, path: &str, trace_id: Option<&str>) -> Result<PolicyOutcome> {
        let session_snapshot: HashMap<String, (PolicyDecision, Option<String>)> = self
            .session
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if let Some((decision, source)) = authz::lookup_decision(&self.store, &session_snapshot, &key, path) {
            return Ok(self.api_outcome(key, decision, source));
        }

        match self.prompt.prompt(&key, trace_id).await {
            Some(choice) => {
                self.apply_choice(&key, &choice)?;
                Ok(self.api_outcome(key, choice.decision, "prompt"))
            }
            None => Ok(self.api_outcome(key, PolicyDecision::Deny, "default")),
        }
    }

    fn apply_choice(&self, key: &str, choice: &PolicyChoice) -> Result<()> {
        match choice.duration {
            PolicyDuration::Once => {}
            PolicyDuration::Session => {
                self.session.insert(key.to_string(), (choice.decision, choice.path_prefix.clone()));
            }
            PolicyDuration::Forever => {
                self.session.insert(key.to_string(), (choice.decision, choice.path_prefix.clone()));
                self.store.persist(
                    key,
                    PolicyRecord {
                        decision: choice.decision,
                        duration: PolicyDuration::Forever,
                        path_prefix: choice.path_prefix.clone(),
                        created_at: Utc::now().timestamp_millis(),
                        session_only: false,
                    },
                )?;
            }
        }
        Ok(())
    }
}
