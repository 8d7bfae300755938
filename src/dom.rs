//! §4.6 DomApplier. There is no real browser DOM here — the rendering
//! surface is an explicit out-of-scope collaborator (§1) — so `target` is
//! resolved against a headless `VirtualDocument`: a tree of addressable
//! containers (window root plus whatever `ComponentRenderer` registers)
//! each holding an opaque HTML content blob. `dom.*` payloads are never
//! parsed into structured children; they are sanitised strings assigned
//! to (or appended onto) a resolved node's content, which is exactly what
//! `#root`/`data-slot` addressing (S4, §4.8) needs without a CSS engine.

use crate::canonical;
use crate::config::errors as codes;
use crate::envelope::DomMode;
use crate::error::{AdapterError, Result};
use crate::sanitize;
use crate::telemetry::{Telemetry, TelemetryEvent};
use dashmap::DashMap;
use std::collections::HashMap;

/// One addressable container in a window's virtual tree.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub content: String,
    pub children: Vec<VirtualNode>,
}

impl VirtualNode {
    pub fn new(tag: impl Into<String>, id: Option<&str>) -> Self {
        let mut attrs = HashMap::new();
        if let Some(id) = id {
            attrs.insert("id".to_string(), id.to_string());
        }
        VirtualNode {
            tag: tag.into(),
            attrs,
            content: String::new(),
            children: Vec::new(),
        }
    }

    fn matches(&self, part: &str) -> bool {
        if let Some(id) = part.strip_prefix('#') {
            return self.attrs.get("id").map(|v| v == id).unwrap_or(false);
        }
        if let Some(class) = part.strip_prefix('.') {
            return self
                .attrs
                .get("class")
                .map(|c| c.split_whitespace().any(|x| x == class))
                .unwrap_or(false);
        }
        if let Some(rest) = part.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            if let Some((key, value)) = rest.split_once('=') {
                let value = value.trim_matches('"');
                return self.attrs.get(key).map(|v| v == value).unwrap_or(false);
            }
        }
        self.tag == part
    }
}

fn dfs_find(node: &VirtualNode, part: &str, skip_self: bool) -> Option<Vec<usize>> {
    if !skip_self && node.matches(part) {
        return Some(Vec::new());
    }
    for (i, child) in node.children.iter().enumerate() {
        if let Some(mut path) = dfs_find(child, part, false) {
            path.insert(0, i);
            return Some(path);
        }
    }
    None
}

fn get_node<'a>(root: &'a VirtualNode, path: &[usize]) -> &'a VirtualNode {
    let mut node = root;
    for &i in path {
        node = &node.children[i];
    }
    node
}

fn get_node_mut<'a>(root: &'a mut VirtualNode, path: &[usize]) -> &'a mut VirtualNode {
    let mut node = root;
    for &i in path {
        node = &mut node.children[i];
    }
    node
}

/// Resolves a (possibly compound, whitespace-separated) descendant
/// selector to an index path from `root`, or `None` if nothing matches.
fn resolve_path(root: &VirtualNode, selector: &str) -> Option<Vec<usize>> {
    let parts: Vec<&str> = selector.split_whitespace().collect();
    let first = parts.first()?;
    let mut path = dfs_find(root, first, false)?;
    for part in &parts[1..] {
        let current = get_node(root, &path);
        let rel = dfs_find(current, part, true)?;
        path.extend(rel);
    }
    Some(path)
}

/// One window's virtual tree, rooted at `#root` (the window's content
/// container, per §4.6 "`target` is a CSS selector inside `window.content`").
pub struct VirtualDocument {
    pub root: VirtualNode,
}

impl VirtualDocument {
    pub fn new() -> Self {
        VirtualDocument {
            root: VirtualNode::new("div", Some("root")),
        }
    }

    /// Registers a new addressable node as a child of `parent_selector`
    /// (used by `ComponentRenderer` to make rendered components and their
    /// `data-slot` children independently targetable).
    pub fn register_node(&mut self, parent_selector: &str, node: VirtualNode) -> Result<()> {
        let path = resolve_path(&self.root, parent_selector).ok_or_else(|| {
            AdapterError::validation(
                codes::DOM_TARGET_NOT_FOUND,
                format!("target '{parent_selector}' not found"),
            )
        })?;
        get_node_mut(&mut self.root, &path).children.push(node);
        Ok(())
    }

    pub fn find(&self, selector: &str) -> Option<&VirtualNode> {
        resolve_path(&self.root, selector).map(|path| get_node(&self.root, &path))
    }
}

impl Default for VirtualDocument {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ApplyOutcome {
    pub applied: bool,
    pub skipped: bool,
}

/// §4.6 DomApplier. Missing-window auto-recovery (§4.6: "synthesise a
/// `window.create`... then retry") is an orchestrator-level concern —
/// DomApplier only owns the per-window virtual tree and dedupe state.
pub struct DomApplier {
    documents: DashMap<String, VirtualDocument>,
    last_applied: DashMap<(String, String), String>,
    telemetry: Telemetry,
}

impl DomApplier {
    pub fn new(telemetry: Telemetry) -> Self {
        DomApplier {
            documents: DashMap::new(),
            last_applied: DashMap::new(),
            telemetry,
        }
    }

    pub fn document_exists(&self, window_id: &str) -> bool {
        self.documents.contains_key(window_id)
    }

    /// Rendered content at `#root`, for callers (tests, replay verifiers)
    /// that need to observe the latest applied HTML rather than dispatch
    /// through the orchestrator again.
    pub fn snapshot(&self, window_id: &str) -> Option<String> {
        self.documents.get(window_id).map(|doc| doc.root.content.clone())
    }

    pub fn ensure_document(&self, window_id: &str) {
        self.documents
            .entry(window_id.to_string())
            .or_insert_with(VirtualDocument::new);
    }

    pub fn drop_document(&self, window_id: &str) {
        self.documents.remove(window_id);
        self.last_applied.retain(|(w, _), _| w != window_id);
    }

    /// §4.4 `replayAll`: drops every virtual document before rebuilding
    /// from the replayed command log.
    pub fn clear_all(&self) {
        self.documents.clear();
        self.last_applied.clear();
    }

    /// §4.6 `apply`: sanitise, dedupe by `(windowId, target, mode, html)`
    /// hash, then mutate the resolved node's content per `mode`.
    pub fn apply(&self, window_id: &str, target: &str, html: &str, mode: DomMode) -> Result<ApplyOutcome> {
        let clean = sanitize::sanitize(html);
        let hash = canonical::dom_apply_hash(window_id, target, mode, &clean);

        let key = (window_id.to_string(), target.to_string());
        if self.last_applied.get(&key).map(|v| *v == hash).unwrap_or(false) {
            return Ok(ApplyOutcome { applied: false, skipped: true });
        }

        self.ensure_document(window_id);
        let mut doc = self
            .documents
            .get_mut(window_id)
            .expect("ensure_document just inserted this entry");

        let path = resolve_path(&doc.root, target).ok_or_else(|| {
            AdapterError::validation(codes::DOM_TARGET_NOT_FOUND, format!("target '{target}' not found"))
        })?;
        let node = get_node_mut(&mut doc.root, &path);
        match mode {
            DomMode::Set | DomMode::Replace => node.content = clean,
            DomMode::Append => node.content.push_str(&clean),
        }

        self.last_applied.insert(key, hash);
        self.telemetry.emit(TelemetryEvent::DomApply {
            window_id: window_id.to_string(),
            target: target.to_string(),
            mode: mode_name(mode),
        });

        Ok(ApplyOutcome { applied: true, skipped: false })
    }
}

fn mode_name(mode: DomMode) -> &'static str {
    match mode {
        DomMode::Set => "set",
        DomMode::Replace => "replace",
        DomMode::Append => "append",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_replay_leaves_latest_html() {
        let applier = DomApplier::new(Telemetry::new());
        applier.apply("w1", "#root", "<p>one</p>", DomMode::Set).unwrap();
        applier.apply("w1", "#root", "<p>two</p>", DomMode::Set).unwrap();
        let doc = applier.documents.get("w1").unwrap();
        assert_eq!(doc.root.content, "<p>two</p>");
    }

    #[test]
    fn identical_apply_is_deduped() {
        let applier = DomApplier::new(Telemetry::new());
        let first = applier.apply("w1", "#root", "<p>x</p>", DomMode::Set).unwrap();
        assert!(first.applied);
        let second = applier.apply("w1", "#root", "<p>x</p>", DomMode::Set).unwrap();
        assert!(second.skipped);
        assert!(!second.applied);
    }

    #[test]
    fn append_concatenates_onto_existing_content() {
        let applier = DomApplier::new(Telemetry::new());
        applier.apply("w1", "#root", "<p>a</p>", DomMode::Set).unwrap();
        applier.apply("w1", "#root", "<p>b</p>", DomMode::Append).unwrap();
        let doc = applier.documents.get("w1").unwrap();
        assert_eq!(doc.root.content, "<p>a</p><p>b</p>");
    }

    #[test]
    fn unknown_target_fails_with_dom_target_not_found() {
        let applier = DomApplier::new(Telemetry::new());
        let err = applier
            .apply("w1", "#missing", "<p>x</p>", DomMode::Set)
            .unwrap_err();
        assert_eq!(err.code(), codes::DOM_TARGET_NOT_FOUND);
    }

    #[test]
    fn registered_component_nodes_are_addressable_by_id() {
        let applier = DomApplier::new(Telemetry::new());
        applier.ensure_document("w1");
        {
            let mut doc = applier.documents.get_mut("w1").unwrap();
            doc.register_node("#root", VirtualNode::new("div", Some("panel-1"))).unwrap();
        }
        applier.apply("w1", "#panel-1", "<span>hi</span>", DomMode::Set).unwrap();
        let doc = applier.documents.get("w1").unwrap();
        assert_eq!(doc.root.children[0].content, "<span>hi</span>");
    }
}
