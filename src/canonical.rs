//! Canonical JSON and hashing. §4.1: "`computeBatchHash(batch)` uses the
//! canonical-JSON stable stringifier over `[op, params]` pairs." §9: cycle
//! safety is a non-issue for `serde_json::Value` (it is a tree, not a
//! pointer graph), but the stringifier still visits children in a fixed
//! order so hashing is deterministic regardless of how a batch was built.

use crate::envelope::{Batch, DomMode};
use serde_json::Value;
use std::fmt::Write as _;

/// Deterministic string form of a JSON value: object keys sorted
/// lexicographically, array order preserved, no whitespace.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// `computeBatchHash`: hash of the canonical JSON of `[op, params]` pairs,
/// one per envelope, in batch order (§4.1, invariant 2 in §8).
pub fn batch_hash(batch: &Batch) -> String {
    let pairs: Vec<Value> = batch
        .envelopes
        .iter()
        .map(|env| {
            let params = serde_json::to_value(&env.op).unwrap_or(Value::Null);
            let op_name = env.op.name();
            let params_only = params.get("params").cloned().unwrap_or(Value::Null);
            serde_json::json!([op_name, params_only])
        })
        .collect();
    blake3_hex(&stable_stringify(&Value::Array(pairs)))
}

/// §4.6 DomApplier dedupe hash over `(windowId, target, mode, sanitisedHtml)`.
pub fn dom_apply_hash(window_id: &str, target: &str, mode: DomMode, html: &str) -> String {
    let mode_str = match mode {
        DomMode::Set => "set",
        DomMode::Replace => "replace",
        DomMode::Append => "append",
    };
    let payload = serde_json::json!([window_id, target, mode_str, html]);
    blake3_hex(&stable_stringify(&payload))
}

/// §4.10: "stable-stringify the full state snapshot, SHA-256" checkpoint digest.
pub fn checkpoint_digest(snapshot: &Value) -> String {
    use sha2::{Digest, Sha256};
    let canonical = stable_stringify(snapshot);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_is_irrelevant_array_order_is_material() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(stable_stringify(&a), stable_stringify(&b));

        let c = serde_json::json!([1, 2]);
        let d = serde_json::json!([2, 1]);
        assert_ne!(stable_stringify(&c), stable_stringify(&d));
    }

    #[test]
    fn checkpoint_digest_is_sha256_hex() {
        let digest = checkpoint_digest(&serde_json::json!({"a": 1}));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
