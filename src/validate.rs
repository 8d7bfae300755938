//! §4.1 Schema validator. Envelope shape is enforced structurally by
//! `Op`'s tagged-enum `Deserialize` (unknown `op` or malformed `params`
//! fail at parse time); this module layers the size and scope invariants
//! `serde` cannot express: HTML payload ceilings, `data-command` shape,
//! and the window-scope `StateEntry` invariant (§3).

use crate::config::errors as codes;
use crate::config::limits::{
    MAX_DATA_COMMAND_BYTES, MAX_HTML_PER_BATCH_BYTES, MAX_HTML_PER_OP_BYTES,
    MAX_TOKEN_SUBSTITUTIONS,
};
use crate::envelope::{Envelope, Op, StateScope};
use crate::error::{AdapterError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^{}]+\}\}").unwrap());
static DATA_COMMAND_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-command\s*=\s*"([^"]*)""#).unwrap());

/// Parse a raw JSON envelope, translating `serde` failures into the
/// validator's own error taxonomy so callers only ever see `AdapterError`.
pub fn parse_envelope(value: Value) -> Result<Envelope> {
    serde_json::from_value(value).map_err(|err| {
        let message = err.to_string();
        let code = if message.contains("unknown variant") {
            codes::VALIDATION_UNKNOWN_OP
        } else {
            codes::VALIDATION_BAD_PARAMS
        };
        AdapterError::validation(code, message)
    })
}

/// Bytes of HTML this envelope's params carry, for the per-op and
/// per-batch ceilings (§4.1).
fn html_bytes(op: &Op) -> usize {
    match op {
        Op::DomSet(p) | Op::DomReplace(p) | Op::DomAppend(p) => p.html.len(),
        Op::ComponentRender(p) => html_bytes_in_value(&p.props),
        Op::ComponentUpdate(p) => html_bytes_in_value(&p.props),
        _ => 0,
    }
}

/// Component props carry HTML inside string fields (e.g. a `body` or
/// `content` field holding markup); conservatively sum every string
/// value's length rather than guessing which keys are HTML.
fn html_bytes_in_value(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(html_bytes_in_value).sum(),
        Value::Object(map) => map.values().map(html_bytes_in_value).sum(),
        _ => 0,
    }
}

fn validate_scope(op: &Op) -> Result<()> {
    let (scope, window_id) = match op {
        Op::StateSet(p) => (p.scope, p.window_id.as_ref()),
        Op::StateGet(p) => (p.scope, p.window_id.as_ref()),
        Op::StatePatch(p) => (p.scope, p.window_id.as_ref()),
        Op::StateWatch(p) => (p.scope, p.window_id.as_ref()),
        Op::StateUnwatch(p) => (p.scope, p.window_id.as_ref()),
        _ => return Ok(()),
    };
    if scope == StateScope::Window && window_id.is_none() {
        return Err(AdapterError::validation(
            codes::VALIDATION_WINDOW_SCOPE_MISSING_ID,
            "window-scoped state op requires windowId",
        ));
    }
    Ok(())
}

/// Validates `data-command` shape at the point it is produced or read:
/// ≤32 KiB serialized, ≤16 `{{token}}` substitutions (§4.1, E-UICP-300/301).
pub fn validate_data_command(serialized: &str) -> Result<()> {
    if serialized.len() > MAX_DATA_COMMAND_BYTES {
        return Err(AdapterError::validation(
            codes::VALIDATION_DATA_COMMAND_TOO_LARGE,
            format!(
                "data-command is {} bytes, exceeds {MAX_DATA_COMMAND_BYTES}",
                serialized.len()
            ),
        ));
    }
    let tokens = TOKEN_RE.find_iter(serialized).count();
    if tokens > MAX_TOKEN_SUBSTITUTIONS {
        return Err(AdapterError::validation(
            codes::VALIDATION_DATA_COMMAND_TOO_MANY_TOKENS,
            format!("data-command has {tokens} token substitutions, exceeds {MAX_TOKEN_SUBSTITUTIONS}"),
        ));
    }
    Ok(())
}

/// Scans rendered HTML for `data-command="..."` occurrences and validates
/// each one found (used by DomApplier and ComponentRenderer output).
pub fn validate_data_commands_in_html(html: &str) -> Result<()> {
    for caps in DATA_COMMAND_ATTR_RE.captures_iter(html) {
        validate_data_command(&caps[1])?;
    }
    Ok(())
}

/// Running validator for one batch: tracks the cumulative HTML budget
/// across envelopes processed so far (§4.1 "total HTML across a batch").
pub struct Validator {
    html_budget_used: usize,
}

impl Validator {
    pub fn new() -> Self {
        Validator { html_budget_used: 0 }
    }

    /// Validate one envelope in sequence. Must be called in batch order;
    /// the per-batch ceiling depends on accumulated state.
    pub fn validate(&mut self, env: &Envelope) -> Result<()> {
        validate_scope(&env.op)?;

        let bytes = html_bytes(&env.op);
        if bytes > MAX_HTML_PER_OP_BYTES {
            return Err(AdapterError::validation(
                codes::VALIDATION_HTML_OP_TOO_LARGE,
                format!("op {} carries {bytes} bytes of HTML, exceeds {MAX_HTML_PER_OP_BYTES}", env.op.name()),
            ));
        }
        self.html_budget_used += bytes;
        if self.html_budget_used > MAX_HTML_PER_BATCH_BYTES {
            return Err(AdapterError::validation(
                codes::VALIDATION_HTML_BATCH_TOO_LARGE,
                format!(
                    "batch HTML total {} bytes exceeds {MAX_HTML_PER_BATCH_BYTES}",
                    self.html_budget_used
                ),
            ));
        }

        if let Op::DomSet(p) | Op::DomReplace(p) | Op::DomAppend(p) = &env.op {
            validate_data_commands_in_html(&p.html)?;
        }

        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{DomOpParams, StateGetParams, StateScope};

    fn dom_set(html: &str) -> Envelope {
        Envelope::new(Op::DomSet(DomOpParams {
            window_id: "w1".into(),
            target: "#root".into(),
            html: html.into(),
            sanitize: true,
        }))
    }

    #[test]
    fn per_op_html_ceiling_is_enforced() {
        let mut v = Validator::new();
        let huge = "x".repeat(MAX_HTML_PER_OP_BYTES + 1);
        let err = v.validate(&dom_set(&huge)).unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_HTML_OP_TOO_LARGE);
    }

    #[test]
    fn batch_total_ceiling_is_enforced_across_envelopes() {
        let mut v = Validator::new();
        let chunk = "x".repeat(MAX_HTML_PER_OP_BYTES);
        v.validate(&dom_set(&chunk)).unwrap();
        let err = v.validate(&dom_set(&chunk)).unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_HTML_BATCH_TOO_LARGE);
    }

    #[test]
    fn window_scope_requires_window_id() {
        let env = Envelope::new(Op::StateGet(StateGetParams {
            scope: StateScope::Window,
            key: "k".into(),
            window_id: None,
        }));
        let err = Validator::new().validate(&env).unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_WINDOW_SCOPE_MISSING_ID);
    }

    #[test]
    fn data_command_token_limit_enforced() {
        let tokens: String = (0..20).map(|i| format!("{{{{t{i}}}}}")).collect();
        let err = validate_data_command(&tokens).unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_DATA_COMMAND_TOO_MANY_TOKENS);
    }

    #[test]
    fn unknown_op_fails_validation() {
        let value = serde_json::json!({"op": "bogus.op", "params": {}});
        let err = parse_envelope(value).unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_UNKNOWN_OP);
    }
}
