//! §3 DATA MODEL: `Envelope`, `Batch`, and the Op Taxonomy (§6).
//!
//! §9 REDESIGN FLAGS: "Polymorphism over Envelope ... implement as a
//! tagged variant over the op taxonomy (sum type with per-variant param
//! record)." `Op` is that sum type. Its `#[serde(tag = "op", content =
//! "params")]` representation, flattened into `Envelope`, reproduces the
//! wire shape `{op, params, id?, traceId?, idempotencyKey?, windowId?}`
//! exactly while giving the orchestrator a total match instead of string
//! dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single storage partition a piece of state lives in (§3 `StateEntry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateScope {
    Window,
    Workspace,
    Global,
}

/// `state.patch`'s ordered mutation ops (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PatchOp {
    Set { path: String, value: Value },
    Merge { path: String, value: Value },
    Toggle { path: String },
    SetIfNull { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Set { path, .. }
            | PatchOp::Merge { path, .. }
            | PatchOp::Toggle { path }
            | PatchOp::SetIfNull { path, .. } => path,
        }
    }
}

/// `dom.{set,replace,append}` mode, also reused by DomApplier internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomMode {
    Set,
    Replace,
    Append,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowCreateParams {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

pub type WindowUpdateParams = WindowCreateParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMoveParams {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResizeParams {
    pub id: String,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowFocusParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowCloseParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomOpParams {
    pub window_id: String,
    pub target: String,
    pub html: String,
    /// Defaults true; explicit `false` is denied by PolicyGate (§4.3).
    #[serde(default = "default_true")]
    pub sanitize: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRenderParams {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub window_id: String,
    pub target: String,
    #[serde(default)]
    pub props: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentUpdateParams {
    pub id: String,
    #[serde(default)]
    pub props: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDestroyParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSetParams {
    pub scope: StateScope,
    pub key: String,
    #[serde(default)]
    pub window_id: Option<String>,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateGetParams {
    pub scope: StateScope,
    pub key: String,
    #[serde(default)]
    pub window_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatchParams {
    pub scope: StateScope,
    pub key: String,
    #[serde(default)]
    pub window_id: Option<String>,
    pub ops: Vec<PatchOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateWatchParams {
    pub scope: StateScope,
    pub key: String,
    #[serde(default)]
    pub window_id: Option<String>,
    pub target: String,
    #[serde(default = "default_watch_mode")]
    pub mode: WatchMode,
}

fn default_watch_mode() -> WatchMode {
    WatchMode::Replace
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUnwatchParams {
    pub scope: StateScope,
    pub key: String,
    #[serde(default)]
    pub window_id: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallParams {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<Value>,
    /// State key seeded/resolved by compute and intent dispatch (§4.9).
    #[serde(default)]
    pub into: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxnCancelParams {}

/// The Op Taxonomy (§6), wire-stable. Variant tags are the literal
/// dotted op strings so `{"op":"window.create","params":{...}}` round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "params")]
pub enum Op {
    #[serde(rename = "window.create")]
    WindowCreate(WindowCreateParams),
    #[serde(rename = "window.update")]
    WindowUpdate(WindowUpdateParams),
    #[serde(rename = "window.move")]
    WindowMove(WindowMoveParams),
    #[serde(rename = "window.resize")]
    WindowResize(WindowResizeParams),
    #[serde(rename = "window.focus")]
    WindowFocus(WindowFocusParams),
    #[serde(rename = "window.close")]
    WindowClose(WindowCloseParams),
    #[serde(rename = "dom.set")]
    DomSet(DomOpParams),
    #[serde(rename = "dom.replace")]
    DomReplace(DomOpParams),
    #[serde(rename = "dom.append")]
    DomAppend(DomOpParams),
    #[serde(rename = "component.render")]
    ComponentRender(ComponentRenderParams),
    #[serde(rename = "component.update")]
    ComponentUpdate(ComponentUpdateParams),
    #[serde(rename = "component.destroy")]
    ComponentDestroy(ComponentDestroyParams),
    #[serde(rename = "state.set")]
    StateSet(StateSetParams),
    #[serde(rename = "state.get")]
    StateGet(StateGetParams),
    #[serde(rename = "state.patch")]
    StatePatch(StatePatchParams),
    #[serde(rename = "state.watch")]
    StateWatch(StateWatchParams),
    #[serde(rename = "state.unwatch")]
    StateUnwatch(StateUnwatchParams),
    #[serde(rename = "api.call")]
    ApiCall(ApiCallParams),
    #[serde(rename = "txn.cancel")]
    TxnCancel(TxnCancelParams),
}

impl Op {
    /// The wire op string, e.g. `"window.create"`. Used for telemetry and
    /// `outcome.errors` formatting (`"{op}: {message}"`, §4.11).
    pub fn name(&self) -> &'static str {
        match self {
            Op::WindowCreate(_) => "window.create",
            Op::WindowUpdate(_) => "window.update",
            Op::WindowMove(_) => "window.move",
            Op::WindowResize(_) => "window.resize",
            Op::WindowFocus(_) => "window.focus",
            Op::WindowClose(_) => "window.close",
            Op::DomSet(_) => "dom.set",
            Op::DomReplace(_) => "dom.replace",
            Op::DomAppend(_) => "dom.append",
            Op::ComponentRender(_) => "component.render",
            Op::ComponentUpdate(_) => "component.update",
            Op::ComponentDestroy(_) => "component.destroy",
            Op::StateSet(_) => "state.set",
            Op::StateGet(_) => "state.get",
            Op::StatePatch(_) => "state.patch",
            Op::StateWatch(_) => "state.watch",
            Op::StateUnwatch(_) => "state.unwatch",
            Op::ApiCall(_) => "api.call",
            Op::TxnCancel(_) => "txn.cancel",
        }
    }

    /// §3 `PersistedCommand`: ephemeral ops are never written to the log.
    pub fn is_ephemeral(&self) -> bool {
        match self {
            Op::StateGet(_) | Op::StateWatch(_) | Op::StateUnwatch(_) | Op::TxnCancel(_) => true,
            Op::ApiCall(params) => params.url.starts_with("uicp://intent"),
            _ => false,
        }
    }

    /// `windowId` implied by this op's own params, used when the envelope
    /// itself carries no explicit `windowId` (§4.10 partition key).
    pub fn implied_window_id(&self) -> Option<&str> {
        match self {
            Op::WindowCreate(p) | Op::WindowUpdate(p) => Some(p.id.as_str()),
            Op::WindowMove(p) => Some(p.id.as_str()),
            Op::WindowResize(p) => Some(p.id.as_str()),
            Op::WindowFocus(p) => Some(p.id.as_str()),
            Op::WindowClose(p) => Some(p.id.as_str()),
            Op::DomSet(p) | Op::DomReplace(p) | Op::DomAppend(p) => Some(p.window_id.as_str()),
            Op::ComponentRender(p) => Some(p.window_id.as_str()),
            Op::StateSet(p) | Op::StateGet(p) | Op::StatePatch(p) => p.window_id.as_deref(),
            Op::StateWatch(p) => p.window_id.as_deref(),
            Op::StateUnwatch(p) => p.window_id.as_deref(),
            _ => None,
        }
    }
}

/// §3 `Envelope`: one operation plus cross-cutting identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        default,
        rename = "traceId",
        skip_serializing_if = "Option::is_none"
    )]
    pub trace_id: Option<String>,
    #[serde(
        default,
        rename = "idempotencyKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub idempotency_key: Option<String>,
    #[serde(
        default,
        rename = "windowId",
        skip_serializing_if = "Option::is_none"
    )]
    pub window_id: Option<String>,
}

impl Envelope {
    pub fn new(op: Op) -> Self {
        Envelope {
            op,
            id: None,
            trace_id: None,
            idempotency_key: None,
            window_id: None,
        }
    }

    /// Partition key for the queue (§4.10): explicit `windowId`, else the
    /// op's own implied window id, else `"global"`.
    pub fn partition_key(&self) -> String {
        self.window_id
            .clone()
            .or_else(|| self.op.implied_window_id().map(str::to_string))
            .unwrap_or_else(|| "global".to_string())
    }
}

/// §3 `Batch`: ordered envelope sequence plus derived identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub envelopes: Vec<Envelope>,
    /// Opt-in override (§4.10 "Compute `batchId` (opt-in override)").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl Batch {
    pub fn new(envelopes: Vec<Envelope>) -> Self {
        Batch {
            envelopes,
            batch_id: None,
        }
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_wire_shape() {
        let json = serde_json::json!({
            "op": "window.create",
            "params": {"id": "win-1", "title": "Hello"},
            "traceId": "trace-1",
            "idempotencyKey": "idem-1"
        });
        let env: Envelope = serde_json::from_value(json.clone()).unwrap();
        match &env.op {
            Op::WindowCreate(p) => {
                assert_eq!(p.id, "win-1");
                assert_eq!(p.title.as_deref(), Some("Hello"));
            }
            _ => panic!("expected WindowCreate"),
        }
        assert_eq!(env.trace_id.as_deref(), Some("trace-1"));
        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(back["op"], "window.create");
        assert_eq!(back["params"]["id"], "win-1");
    }

    #[test]
    fn ephemeral_ops_are_flagged() {
        let state_get = Op::StateGet(StateGetParams {
            scope: StateScope::Global,
            key: "k".into(),
            window_id: None,
        });
        assert!(state_get.is_ephemeral());

        let intent = Op::ApiCall(ApiCallParams {
            url: "uicp://intent".into(),
            method: "POST".into(),
            headers: None,
            body: None,
            into: None,
        });
        assert!(intent.is_ephemeral());

        let fetch = Op::ApiCall(ApiCallParams {
            url: "https://example.com".into(),
            method: "GET".into(),
            headers: None,
            body: None,
            into: None,
        });
        assert!(!fetch.is_ephemeral());
    }

    #[test]
    fn partition_key_falls_back_to_implied_window_then_global() {
        let mut env = Envelope::new(Op::WindowCreate(WindowCreateParams {
            id: "w1".into(),
            ..Default::default()
        }));
        assert_eq!(env.partition_key(), "w1");

        env.window_id = Some("explicit".into());
        assert_eq!(env.partition_key(), "explicit");

        let global = Envelope::new(Op::TxnCancel(TxnCancelParams {}));
        assert_eq!(global.partition_key(), "global");
    }
}
