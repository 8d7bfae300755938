//! §4.7 ComponentRenderer. A small library of template builders keyed by
//! `kind`, mirroring the teacher's manifest-entry-by-key lookup in
//! `registry.rs` (there: task@version -> `ModuleEntry`; here: kind ->
//! `TemplateBuilder`). Every dynamic value goes through
//! [`sanitize::escape_html`] before interpolation; `props.command` is
//! attached as a `data-command` attribute and never executed here.

use crate::config::errors as codes;
use crate::error::{AdapterError, Result};
use crate::sanitize::escape_html;
use crate::validate;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

type TemplateBuilder = fn(id: &str, props: &Value) -> Result<String>;

static REGISTRY: Lazy<HashMap<&'static str, TemplateBuilder>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, TemplateBuilder> = HashMap::new();
    m.insert("button", build_button);
    m.insert("form", build_form);
    m.insert("table", build_table);
    m.insert("modal", build_modal);
    m.insert("cell", build_cell);
    m.insert("grid", build_grid);
    m.insert("script.panel", build_script_panel);
    m
});

fn prop_str<'a>(props: &'a Value, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

fn prop_array<'a>(props: &'a Value, key: &str) -> &'a [Value] {
    props.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Renders `data-command="..."` if `props.command` is present, validating
/// it the way `validate::validate_data_command` validates inline attributes
/// discovered in `dom.*` payloads — here at render time, since the
/// attribute doesn't exist in any payload until this function builds it.
fn command_attr(props: &Value) -> Result<String> {
    match prop_str(props, "command") {
        Some(command) => {
            validate::validate_data_command(command)?;
            Ok(format!(r#" data-command="{}""#, escape_html(command)))
        }
        None => Ok(String::new()),
    }
}

fn build_button(_id: &str, props: &Value) -> Result<String> {
    let label = prop_str(props, "label").unwrap_or("Button");
    let variant = prop_str(props, "variant").unwrap_or("default");
    let command = command_attr(props)?;
    Ok(format!(
        r#"<button class="uicp-button uicp-button--{}"{}>{}</button>"#,
        escape_html(variant),
        command,
        escape_html(label)
    ))
}

fn build_form(_id: &str, props: &Value) -> Result<String> {
    let submit_label = prop_str(props, "submitLabel").unwrap_or("Submit");
    let command = command_attr(props)?;
    let mut fields = String::new();
    for field in prop_array(props, "fields") {
        let name = field.get("name").and_then(Value::as_str).unwrap_or_default();
        let label = field.get("label").and_then(Value::as_str).unwrap_or(name);
        let kind = field.get("type").and_then(Value::as_str).unwrap_or("text");
        fields.push_str(&format!(
            r#"<label class="uicp-field"><span>{}</span><input type="{}" name="{}"></label>"#,
            escape_html(label),
            escape_html(kind),
            escape_html(name)
        ));
    }
    Ok(format!(
        r#"<form class="uicp-form"{}>{}<button type="submit">{}</button></form>"#,
        command,
        fields,
        escape_html(submit_label)
    ))
}

fn build_table(_id: &str, props: &Value) -> Result<String> {
    let columns = prop_array(props, "columns");
    let rows = prop_array(props, "rows");
    let mut head = String::new();
    for col in columns {
        let name = col.as_str().unwrap_or_default();
        head.push_str(&format!("<th>{}</th>", escape_html(name)));
    }
    let mut body = String::new();
    for row in rows {
        let mut tr = String::new();
        for cell in row.as_array().map(Vec::as_slice).unwrap_or(&[]) {
            tr.push_str(&format!("<td>{}</td>", escape_html(&scalar_to_string(cell))));
        }
        body.push_str(&format!("<tr>{tr}</tr>"));
    }
    Ok(format!(
        r#"<table class="uicp-table"><thead><tr>{head}</tr></thead><tbody>{body}</tbody></table>"#
    ))
}

fn build_modal(_id: &str, props: &Value) -> Result<String> {
    let title = prop_str(props, "title").unwrap_or("");
    let body = prop_str(props, "body").unwrap_or("");
    Ok(format!(
        r#"<div class="uicp-modal"><h2>{}</h2><div class="uicp-modal-body">{}</div></div>"#,
        escape_html(title),
        escape_html(body)
    ))
}

fn build_cell(_id: &str, props: &Value) -> Result<String> {
    let value = props.get("value").map(scalar_to_string).unwrap_or_default();
    Ok(format!(r#"<span class="uicp-cell">{}</span>"#, escape_html(&value)))
}

fn build_grid(_id: &str, props: &Value) -> Result<String> {
    let mut items = String::new();
    for item in prop_array(props, "items") {
        let html = item.as_str().unwrap_or_default();
        items.push_str(&format!(r#"<div class="uicp-grid-item">{}</div>"#, escape_html(html)));
    }
    Ok(format!(r#"<div class="uicp-grid">{items}</div>"#))
}

/// §4.7 step 1 only: "Render a stable wrapper
/// `<div class="uicp-script-panel" data-script-panel-id={panelId}>`."
/// Steps 2-5 (config write, seed+watch, compute `init`/`render`) are
/// orchestrator-level: they span StateStore and the compute bridge, which
/// ComponentRenderer does not own.
fn build_script_panel(id: &str, _props: &Value) -> Result<String> {
    Ok(format!(
        r#"<div class="uicp-script-panel" data-script-panel-id="{}"></div>"#,
        escape_html(id)
    ))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Owned by ComponentRenderer: destroyed when its host window is destroyed
/// or by `component.destroy` (§3).
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub id: String,
    pub window_id: String,
    pub kind: String,
    pub target: String,
}

pub struct ComponentRenderer {
    records: DashMap<String, ComponentRecord>,
}

impl ComponentRenderer {
    pub fn new() -> Self {
        ComponentRenderer {
            records: DashMap::new(),
        }
    }

    pub fn is_known_kind(kind: &str) -> bool {
        REGISTRY.contains_key(kind)
    }

    /// §4.4 `replayAll`: drops every component record before rebuilding
    /// from the replayed command log.
    pub fn clear_all(&self) {
        self.records.clear();
    }

    /// `component.render`: builds HTML and registers the record. The
    /// caller (orchestrator) is responsible for placing the returned HTML
    /// via DomApplier and for emitting `component_render`/`component_unknown`.
    pub fn render(&self, id: &str, kind: &str, window_id: &str, target: &str, props: &Value) -> Result<String> {
        let builder = REGISTRY.get(kind).ok_or_else(|| {
            AdapterError::validation(codes::COMPONENT_UNKNOWN_KIND, format!("unknown component kind '{kind}'"))
        })?;
        let html = builder(id, props)?;
        self.records.insert(
            id.to_string(),
            ComponentRecord {
                id: id.to_string(),
                window_id: window_id.to_string(),
                kind: kind.to_string(),
                target: target.to_string(),
            },
        );
        Ok(html)
    }

    /// `component.update`: re-renders with the previously recorded kind.
    pub fn update(&self, id: &str, props: &Value) -> Result<String> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| AdapterError::validation(codes::COMPONENT_NOT_FOUND, format!("component '{id}' not found")))?
            .clone();
        let builder = REGISTRY
            .get(record.kind.as_str())
            .expect("recorded kind was validated at render time");
        builder(id, props)
    }

    /// `component.destroy`: removes the record, returning it if present.
    pub fn destroy(&self, id: &str) -> Option<ComponentRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Window lifecycle purge: every component hosted by `window_id` is
    /// destroyed, returning the destroyed ids.
    pub fn purge_window(&self, window_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.window_id == window_id)
            .map(|entry| entry.id.clone())
            .collect();
        for id in &ids {
            self.records.remove(id);
        }
        ids
    }

    pub fn get(&self, id: &str) -> Option<ComponentRecord> {
        self.records.get(id).map(|r| r.clone())
    }
}

impl Default for ComponentRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn button_escapes_label_and_attaches_command() {
        let renderer = ComponentRenderer::new();
        let html = renderer
            .render("b1", "button", "w1", "#root", &json!({"label": "<x>", "command": "{\"op\":\"window.close\"}"}))
            .unwrap();
        assert!(html.contains("&lt;x&gt;"));
        assert!(html.contains("data-command="));
        assert!(!html.contains("<x>"));
    }

    #[test]
    fn unknown_kind_fails_with_component_unknown_kind() {
        let renderer = ComponentRenderer::new();
        let err = renderer.render("b1", "nope", "w1", "#root", &json!({})).unwrap_err();
        assert_eq!(err.code(), codes::COMPONENT_UNKNOWN_KIND);
    }

    #[test]
    fn update_reuses_recorded_kind() {
        let renderer = ComponentRenderer::new();
        renderer.render("c1", "cell", "w1", "#root", &json!({"value": "a"})).unwrap();
        let html = renderer.update("c1", &json!({"value": "b"})).unwrap();
        assert!(html.contains(">b<"));
    }

    #[test]
    fn purge_window_only_removes_matching_components() {
        let renderer = ComponentRenderer::new();
        renderer.render("c1", "cell", "w1", "#root", &json!({"value": "a"})).unwrap();
        renderer.render("c2", "cell", "w2", "#root", &json!({"value": "b"})).unwrap();
        let destroyed = renderer.purge_window("w1");
        assert_eq!(destroyed, vec!["c1".to_string()]);
        assert!(renderer.get("c2").is_some());
    }

    #[test]
    fn script_panel_renders_stable_wrapper_with_panel_id() {
        let renderer = ComponentRenderer::new();
        let html = renderer.render("panel-1", "script.panel", "w1", "#root", &json!({})).unwrap();
        assert!(html.contains(r#"data-script-panel-id="panel-1""#));
    }
}
