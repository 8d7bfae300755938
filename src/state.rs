//! §4.8 StateStore & Watchers. Three scoped maps (window/workspace/global),
//! copy-on-write `state.patch`, and watchers that render sink values into
//! DOM targets. Per §9 DESIGN NOTES ("prefer arena+index structures...
//! rather than pointer graphs"), state lives in a flat `DashMap` keyed by
//! `(scope, windowId, key)` rather than a nested object graph, so cycles
//! are structurally impossible and `stableStringify` never has to break one.
//!
//! Slot-aware rendering (§4.8) is approximated without an HTML parser: a
//! watched value is treated as sink-shaped (and four-slot markup is
//! synthesised) exactly when it carries a `status` field; a plain value
//! renders straight through `toHtml`. See DESIGN.md for why literal
//! `data-slot` probing of existing markup was not attempted.

use crate::envelope::{DomMode, PatchOp, StateScope, WatchMode};
use crate::error::{AdapterError, Result};
use crate::sanitize::escape_html;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

type StateKey = (StateScope, Option<String>, String);

/// A registered `state.watch` binding (§3).
#[derive(Debug, Clone)]
pub struct WatcherEntry {
    pub id: String,
    pub scope: StateScope,
    pub key: String,
    pub window_id: Option<String>,
    pub target: String,
    pub mode: WatchMode,
}

/// What the orchestrator must hand to `DomApplier::apply` after a state
/// change triggers a watcher.
pub struct WatchFire {
    pub window_id: Option<String>,
    pub target: String,
    pub mode: DomMode,
    pub html: String,
}

pub struct StateStore {
    values: DashMap<StateKey, Value>,
    watchers: DashMap<String, WatcherEntry>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore {
            values: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    fn key(scope: StateScope, window_id: &Option<String>, key: &str) -> StateKey {
        (scope, window_id.clone(), key.to_string())
    }

    /// §4.4 `replayAll`: drops every value and watcher before rebuilding
    /// from the replayed command log.
    pub fn clear_all(&self) {
        self.values.clear();
        self.watchers.clear();
    }

    pub fn get(&self, scope: StateScope, key: &str, window_id: &Option<String>) -> Option<Value> {
        self.values.get(&Self::key(scope, window_id, key)).map(|v| v.clone())
    }

    /// `set`: replace value at the key, structurally no-op if unchanged.
    pub fn set(&self, scope: StateScope, key: &str, window_id: Option<String>, value: Value) -> Vec<WatchFire> {
        let k = Self::key(scope, &window_id, key);
        let changed = self.values.get(&k).map(|existing| *existing != value).unwrap_or(true);
        if !changed {
            return Vec::new();
        }
        self.values.insert(k, value.clone());
        self.fire_watchers(scope, key, &window_id, &value)
    }

    /// `state.patch`: ordered ops applied copy-on-write against the
    /// current value (defaulting to `{}`); a no-change result (S5) fires
    /// nothing.
    pub fn patch(
        &self,
        scope: StateScope,
        key: &str,
        window_id: Option<String>,
        ops: &[PatchOp],
    ) -> Result<Vec<WatchFire>> {
        let k = Self::key(scope, &window_id, key);
        let current = self.values.get(&k).map(|v| v.clone()).unwrap_or(Value::Object(Map::new()));
        let mut next = current.clone();
        for op in ops {
            next = apply_patch_op(&next, op)?;
        }
        if next == current {
            return Ok(Vec::new());
        }
        self.values.insert(k, next.clone());
        Ok(self.fire_watchers(scope, key, &window_id, &next))
    }

    /// `state.watch`: registers the binding and fires immediately if a
    /// value already exists at the key (§4.8).
    pub fn watch(
        &self,
        id: String,
        scope: StateScope,
        key: &str,
        window_id: Option<String>,
        target: String,
        mode: WatchMode,
    ) -> Option<WatchFire> {
        let existing = self.get(scope, key, &window_id);
        self.watchers.insert(
            id.clone(),
            WatcherEntry {
                id,
                scope,
                key: key.to_string(),
                window_id: window_id.clone(),
                target: target.clone(),
                mode,
            },
        );
        existing.map(|value| WatchFire {
            window_id,
            target,
            mode: watch_mode_to_dom(mode),
            html: render_value(&value),
        })
    }

    pub fn unwatch(&self, id: &str) {
        self.watchers.remove(id);
    }

    /// Window-scoped watcher entries are purged on `window.close` (§4.8).
    pub fn purge_window_watchers(&self, window_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .watchers
            .iter()
            .filter(|entry| entry.window_id.as_deref() == Some(window_id))
            .map(|entry| entry.key().clone())
            .collect();
        for id in &ids {
            self.watchers.remove(id);
        }
        ids
    }

    fn fire_watchers(&self, scope: StateScope, key: &str, window_id: &Option<String>, value: &Value) -> Vec<WatchFire> {
        self.watchers
            .iter()
            .filter(|entry| entry.scope == scope && entry.key == key && &entry.window_id == window_id)
            .map(|entry| WatchFire {
                window_id: entry.window_id.clone(),
                target: entry.target.clone(),
                mode: watch_mode_to_dom(entry.mode),
                html: render_value(value),
            })
            .collect()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn watch_mode_to_dom(mode: WatchMode) -> DomMode {
    match mode {
        WatchMode::Replace => DomMode::Set,
        WatchMode::Append => DomMode::Append,
    }
}

fn apply_patch_op(current: &Value, op: &PatchOp) -> Result<Value> {
    let path = op.path();
    let segments: Vec<&str> = if path.is_empty() { Vec::new() } else { path.split('.').collect() };
    let op = op.clone();
    let leaf = move |existing: Option<&Value>| -> Value {
        match &op {
            PatchOp::Set { value, .. } => value.clone(),
            PatchOp::Merge { value, .. } => merge_shallow(existing, value),
            PatchOp::Toggle { .. } => match existing {
                Some(Value::Bool(b)) => Value::Bool(!b),
                _ => Value::Bool(true),
            },
            PatchOp::SetIfNull { value, .. } => match existing {
                None | Some(Value::Null) => value.clone(),
                Some(other) => other.clone(),
            },
        }
    };
    Ok(apply_at_path(Some(current), &segments, &leaf))
}

fn merge_shallow(existing: Option<&Value>, incoming: &Value) -> Value {
    let mut base = match existing {
        Some(Value::Object(o)) => o.clone(),
        _ => Map::new(),
    };
    if let Value::Object(incoming) = incoming {
        for (k, v) in incoming {
            base.insert(k.clone(), v.clone());
        }
    }
    Value::Object(base)
}

/// Recursively clones every container on `path`, applying `leaf` at the
/// end — the copy-on-write `setValueAtPath` from §9 DESIGN NOTES. Numeric
/// segments address array indices, creating arrays when the target is
/// absent (otherwise objects).
fn apply_at_path(current: Option<&Value>, path: &[&str], leaf: &dyn Fn(Option<&Value>) -> Value) -> Value {
    if path.is_empty() {
        return leaf(current);
    }
    let (head, rest) = (path[0], &path[1..]);
    if let Ok(idx) = head.parse::<usize>() {
        let mut arr: Vec<Value> = match current {
            Some(Value::Array(a)) => a.clone(),
            _ => Vec::new(),
        };
        while arr.len() <= idx {
            arr.push(Value::Null);
        }
        let child_current = arr.get(idx).cloned();
        arr[idx] = apply_at_path(child_current.as_ref(), rest, leaf);
        Value::Array(arr)
    } else {
        let mut obj: Map<String, Value> = match current {
            Some(Value::Object(o)) => o.clone(),
            _ => Map::new(),
        };
        let child_current = obj.get(head).cloned();
        let child = apply_at_path(child_current.as_ref(), rest, leaf);
        obj.insert(head.to_string(), child);
        Value::Object(obj)
    }
}

fn is_empty_data(data: Option<&Value>) -> bool {
    match data {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Renders a watched value: sink-shaped (`status` field present) values
/// get slot-aware markup; everything else goes straight through `toHtml`.
fn render_value(value: &Value) -> String {
    match value.get("status").and_then(Value::as_str) {
        Some(status) => render_sink(value, status),
        None => to_html(value),
    }
}

fn render_sink(sink: &Value, status: &str) -> String {
    let data = sink.get("data");
    let slot = if status == "error" {
        "error"
    } else if status == "loading" {
        "loading"
    } else if is_empty_data(data) {
        "empty"
    } else {
        "ready"
    };
    let ready_html = sink
        .get("html")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| to_html(data.unwrap_or(&Value::Null)));
    let error_text = sink.get("error").and_then(Value::as_str).unwrap_or("An error occurred.");
    format!(
        concat!(
            r#"<div class="uicp-watch">"#,
            r#"<div data-slot="loading"{}>Loading…</div>"#,
            r#"<div data-slot="empty"{}>No data.</div>"#,
            r#"<div data-slot="error"{}>{}</div>"#,
            r#"<div data-slot="ready"{}>{}</div>"#,
            "</div>"
        ),
        hide_unless(slot, "loading"),
        hide_unless(slot, "empty"),
        hide_unless(slot, "error"),
        escape_html(error_text),
        hide_unless(slot, "ready"),
        ready_html,
    )
}

fn hide_unless(active: &str, slot: &str) -> &'static str {
    if active == slot {
        ""
    } else {
        r#" style="display:none""#
    }
}

/// §4.8 `toHtml`: array-of-objects -> table (sorted column union);
/// array-of-scalars -> list; object -> pretty JSON; scalar -> escaped text.
fn to_html(value: &Value) -> String {
    match value {
        Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
            let mut columns: BTreeSet<String> = BTreeSet::new();
            for item in items {
                if let Value::Object(o) = item {
                    columns.extend(o.keys().cloned());
                }
            }
            let mut head = String::new();
            for col in &columns {
                head.push_str(&format!("<th>{}</th>", escape_html(col)));
            }
            let mut body = String::new();
            for item in items {
                let mut row = String::new();
                for col in &columns {
                    let cell = item.get(col).map(scalar_text).unwrap_or_default();
                    row.push_str(&format!("<td>{}</td>", escape_html(&cell)));
                }
                body.push_str(&format!("<tr>{row}</tr>"));
            }
            format!(r#"<table class="uicp-state-table"><thead><tr>{head}</tr></thead><tbody>{body}</tbody></table>"#)
        }
        Value::Array(items) => {
            let mut list = String::new();
            for item in items {
                list.push_str(&format!("<li>{}</li>", escape_html(&scalar_text(item))));
            }
            format!(r#"<ul class="uicp-state-list">{list}</ul>"#)
        }
        Value::Object(_) => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_default();
            format!(r#"<pre class="uicp-state-json">{}</pre>"#, escape_html(&pretty))
        }
        other => escape_html(&scalar_text(other)),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_structural_no_op_does_not_fire_watchers() {
        let store = StateStore::new();
        store.set(StateScope::Workspace, "data", None, json!({"a": {"x": 1}, "b": {"y": 2}}));
        store.watch(
            "w1".into(),
            StateScope::Workspace,
            "data",
            None,
            "#root".into(),
            WatchMode::Replace,
        );
        let fires = store.set(StateScope::Workspace, "data", None, json!({"a": {"x": 1}, "b": {"y": 2}}));
        assert!(fires.is_empty());
    }

    #[test]
    fn patch_set_same_value_is_a_structural_no_op() {
        let store = StateStore::new();
        store.set(StateScope::Workspace, "data", None, json!({"a": {"x": 1}, "b": {"y": 2}}));
        let fires = store
            .patch(
                StateScope::Workspace,
                "data",
                None,
                &[PatchOp::Set { path: "a.x".into(), value: json!(1) }],
            )
            .unwrap();
        assert!(fires.is_empty());
        assert_eq!(
            store.get(StateScope::Workspace, "data", &None).unwrap(),
            json!({"a": {"x": 1}, "b": {"y": 2}})
        );
    }

    #[test]
    fn patch_merge_only_touches_named_keys() {
        let store = StateStore::new();
        store.set(StateScope::Global, "cfg", None, json!({"a": 1, "b": 2}));
        store
            .patch(StateScope::Global, "cfg", None, &[PatchOp::Merge { path: String::new(), value: json!({"b": 5, "c": 6}) }])
            .unwrap();
        assert_eq!(store.get(StateScope::Global, "cfg", &None).unwrap(), json!({"a": 1, "b": 5, "c": 6}));
    }

    #[test]
    fn patch_toggle_flips_bool_and_defaults_null_to_true() {
        let store = StateStore::new();
        store.set(StateScope::Global, "flag", None, json!({"on": false}));
        store
            .patch(StateScope::Global, "flag", None, &[PatchOp::Toggle { path: "on".into() }])
            .unwrap();
        assert_eq!(store.get(StateScope::Global, "flag", &None).unwrap(), json!({"on": true}));
    }

    #[test]
    fn patch_numeric_segment_creates_array() {
        let store = StateStore::new();
        store
            .patch(
                StateScope::Global,
                "rows",
                None,
                &[PatchOp::Set { path: "0.name".into(), value: json!("first") }],
            )
            .unwrap();
        assert_eq!(store.get(StateScope::Global, "rows", &None).unwrap(), json!([{"name": "first"}]));
    }

    #[test]
    fn watch_fires_immediately_when_value_already_exists() {
        let store = StateStore::new();
        store.set(StateScope::Global, "list", None, json!(["a", "b"]));
        let fire = store.watch("w1".into(), StateScope::Global, "list", None, "#root".into(), WatchMode::Replace);
        assert!(fire.is_some());
        assert!(fire.unwrap().html.contains("<li>a</li>"));
    }

    #[test]
    fn sink_status_loading_renders_only_loading_slot_visible() {
        let html = render_value(&json!({"status": "loading"}));
        assert!(html.contains(r#"data-slot="loading">Loading…"#));
        assert!(html.contains(r#"data-slot="ready" style="display:none""#));
    }

    #[test]
    fn purge_window_watchers_only_removes_matching_entries() {
        let store = StateStore::new();
        store.watch("w1".into(), StateScope::Window, "k", Some("win-a".into()), "#t".into(), WatchMode::Replace);
        store.watch("w2".into(), StateScope::Window, "k", Some("win-b".into()), "#t".into(), WatchMode::Replace);
        let purged = store.purge_window_watchers("win-a");
        assert_eq!(purged.len(), 1);
    }
}
