//! §4.9 ApiRouter. HTTP dispatch reuses the teacher's `egress.rs` shape
//! (method parsing via `reqwest::Method`, JSON body coercion, `api_call`
//! telemetry with duration) minus its token-bucket limiter and circuit
//! breaker, which nothing in this spec names. `uicp://`/`tauri://`
//! branches are new, grounded on the job-submission bookkeeping pattern
//! in the compute bridge contract.

use crate::compute_bridge::{ComputeBridge, ComputeOutcome, JobSpec};
use crate::config::errors as codes;
use crate::config::timeouts::DEFAULT_HTTP_TIMEOUT;
use crate::envelope::ApiCallParams;
use crate::error::{AdapterError, Result};
use crate::telemetry::{Telemetry, TelemetryEvent};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use url::Url;

const ALLOWED_HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "PATCH"];

/// A structured clarifier request recognised inside a `uicp://intent` body
/// (§4.9: "if body matches the structured-clarifier schema, render a modal
/// form instead").
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClarifierField {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClarifierSpec {
    pub title: String,
    #[serde(rename = "textPrompt")]
    pub text_prompt: String,
    pub fields: Vec<ClarifierField>,
    pub submit: String,
}

/// What a `api.call` dispatch produced — the orchestrator writes `sink` into
/// `params.into` as the watched state sink, and acts on `clarifier` by
/// spawning the modal window (§4.9).
pub struct ApiResult {
    pub sink: Value,
    pub clarifier: Option<ClarifierSpec>,
}

impl ApiResult {
    fn ready(data: Value) -> Self {
        ApiResult {
            sink: json!({"status": "ready", "data": data}),
            clarifier: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        ApiResult {
            sink: json!({"status": "error", "error": message.into()}),
            clarifier: None,
        }
    }
}

/// Base directories `tauri://fs/writeTextFile` may write under (§4.9:
/// "path restricted to allow-listed base directories").
pub struct FsSandbox {
    allowed_roots: Vec<PathBuf>,
}

impl FsSandbox {
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        FsSandbox { allowed_roots }
    }

    /// Rejects absolute paths, `..` traversal, and anything outside the
    /// allow-listed roots (mirrors `registry.rs`'s `is_clean_filename`
    /// basename check, generalised to a directory allow-list).
    fn resolve(&self, directory_token: &str, relative_path: &str) -> Result<PathBuf> {
        let root = self
            .allowed_roots
            .iter()
            .find(|root| root.file_name().and_then(|n| n.to_str()) == Some(directory_token))
            .ok_or_else(|| AdapterError::validation(codes::FS_SANDBOX_VIOLATION, format!("unknown directory token '{directory_token}'")))?;
        let candidate = Path::new(relative_path);
        if candidate.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
            return Err(AdapterError::validation(codes::FS_SANDBOX_VIOLATION, "path escapes sandbox"));
        }
        Ok(root.join(candidate))
    }
}

pub struct ApiRouter<C: ComputeBridge> {
    client: Client,
    compute: C,
    fs_sandbox: Option<FsSandbox>,
    telemetry: Telemetry,
}

impl<C: ComputeBridge> ApiRouter<C> {
    pub fn new(compute: C, fs_sandbox: Option<FsSandbox>, telemetry: Telemetry) -> Self {
        ApiRouter {
            client: Client::new(),
            compute,
            fs_sandbox,
            telemetry,
        }
    }

    pub async fn call(&self, params: &ApiCallParams) -> Result<ApiResult> {
        let url = Url::parse(&params.url).map_err(|e| AdapterError::validation(codes::VALIDATION_BAD_PARAMS, format!("invalid url: {e}")))?;
        match url.scheme() {
            "uicp" if url.host_str() == Some("compute.call") || url.path().starts_with("compute.call") => {
                self.dispatch_compute(params).await
            }
            "uicp" if url.host_str() == Some("intent") || url.path().starts_with("intent") => Ok(self.dispatch_intent(params)),
            "tauri" => self.dispatch_fs_write(params),
            "http" | "https" => self.dispatch_http(&url, params).await,
            _ => Ok(ApiResult::ready(Value::Null)),
        }
    }

    async fn dispatch_compute(&self, params: &ApiCallParams) -> Result<ApiResult> {
        let body = params.body.clone().unwrap_or(Value::Null);
        let spec: JobSpec = serde_json::from_value(body)
            .map_err(|e| AdapterError::validation(codes::VALIDATION_BAD_PARAMS, format!("invalid JobSpec: {e}")))?;
        crate::compute_bridge::enforce_job_policy(&spec)?;
        match self.compute.submit(spec).await {
            ComputeOutcome::Ok(ok) => Ok(ApiResult::ready(ok.output)),
            ComputeOutcome::Err(err) => Ok(ApiResult::error(format!("{}: {}", err.code, err.message))),
        }
    }

    /// Structured-clarifier recognition: a body carrying `fields`/`submit`
    /// in the clarifier shape renders a modal instead of forwarding a plain
    /// host-visible event (§4.9).
    fn dispatch_intent(&self, params: &ApiCallParams) -> ApiResult {
        let body = params.body.clone().unwrap_or(Value::Null);
        if let Ok(spec) = serde_json::from_value::<ClarifierSpec>(body.clone()) {
            return ApiResult {
                sink: json!({"status": "ready", "data": body}),
                clarifier: Some(spec),
            };
        }
        ApiResult::ready(body)
    }

    fn dispatch_fs_write(&self, params: &ApiCallParams) -> Result<ApiResult> {
        let sandbox = self
            .fs_sandbox
            .as_ref()
            .ok_or_else(|| AdapterError::validation(codes::FS_SANDBOX_VIOLATION, "no filesystem sandbox configured"))?;
        let body = params.body.clone().unwrap_or(Value::Null);
        let directory = body.get("directory").and_then(Value::as_str).unwrap_or_default();
        let path = body.get("path").and_then(Value::as_str).unwrap_or_default();
        let contents = body.get("contents").and_then(Value::as_str).unwrap_or_default();
        match sandbox.resolve(directory, path) {
            Ok(resolved) => {
                if let Some(parent) = resolved.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::write(&resolved, contents)
                    .map_err(|e| AdapterError::validation(codes::FS_SANDBOX_VIOLATION, format!("write failed: {e}")))?;
                Ok(ApiResult::ready(json!({"ok": true})))
            }
            Err(err) => Ok(ApiResult {
                sink: json!({"ok": false, "errorCode": err.code()}),
                clarifier: None,
            }),
        }
    }

    async fn dispatch_http(&self, url: &Url, params: &ApiCallParams) -> Result<ApiResult> {
        let method_str = params.method.to_ascii_uppercase();
        if !ALLOWED_HTTP_METHODS.contains(&method_str.as_str()) {
            return Err(AdapterError::validation(codes::VALIDATION_BAD_PARAMS, format!("unsupported method '{method_str}'")));
        }
        let method = Method::from_bytes(method_str.as_bytes()).expect("validated above");
        let origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));

        let mut builder = self.client.request(method, url.as_str()).timeout(DEFAULT_HTTP_TIMEOUT);
        if let Some(headers) = &params.headers {
            for (k, v) in headers {
                builder = builder.header(k, v);
            }
        }
        if let Some(body) = &params.body {
            builder = match body {
                Value::String(s) => builder.body(s.clone()),
                other => builder.json(other),
            };
        }

        let t0 = Instant::now();
        let response = builder.send().await;
        let duration_ms = t0.elapsed().as_millis() as u64;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                self.telemetry.emit(TelemetryEvent::ApiCall {
                    method: method_str,
                    origin,
                    status: Some(status),
                    duration_ms,
                });
                let data = match resp.json::<Value>().await {
                    Ok(v) => v,
                    Err(_) => Value::Null,
                };
                Ok(ApiResult::ready(json!({"status": status, "data": data})))
            }
            Err(err) => {
                self.telemetry.emit(TelemetryEvent::ApiCall {
                    method: method_str,
                    origin,
                    status: None,
                    duration_ms,
                });
                Err(AdapterError::validation(codes::API_FAILED, err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_bridge::NullComputeBridge;

    fn router() -> ApiRouter<NullComputeBridge> {
        ApiRouter::new(NullComputeBridge, None, Telemetry::new())
    }

    fn params(url: &str, body: Option<Value>) -> ApiCallParams {
        ApiCallParams {
            url: url.to_string(),
            method: "POST".to_string(),
            headers: None,
            body,
            into: None,
        }
    }

    #[tokio::test]
    async fn unknown_scheme_is_a_no_op_success() {
        let result = router().call(&params("ftp://example.com/file", None)).await.unwrap();
        assert_eq!(result.sink, Value::Null);
    }

    #[tokio::test]
    async fn intent_echoes_body_as_ready_sink() {
        let result = router().call(&params("uicp://intent", Some(json!({"text": "hi"})))).await.unwrap();
        assert_eq!(result.sink["status"], "ready");
        assert_eq!(result.sink["data"]["text"], "hi");
        assert!(result.clarifier.is_none());
    }

    #[tokio::test]
    async fn intent_with_clarifier_shape_is_recognised() {
        let body = json!({
            "title": "Clarify",
            "textPrompt": "Which city?",
            "fields": [{"name": "city", "label": "City", "required": true}],
            "submit": "Go",
        });
        let result = router().call(&params("uicp://intent", Some(body))).await.unwrap();
        let spec = result.clarifier.expect("clarifier spec recognised");
        assert_eq!(spec.title, "Clarify");
        assert_eq!(spec.fields[0].name, "city");
    }

    #[tokio::test]
    async fn compute_call_with_bad_timeout_is_rejected_before_dispatch() {
        let body = json!({"task": "csv.parse", "timeoutMs": 1});
        let err = router().call(&params("uicp://compute.call", Some(body))).await.unwrap_err();
        assert_eq!(err.code(), codes::COMPUTE_FAILED);
    }

    #[tokio::test]
    async fn compute_call_with_no_bridge_reports_unavailable() {
        let body = json!({"task": "csv.parse"});
        let result = router().call(&params("uicp://compute.call", Some(body))).await.unwrap();
        assert_eq!(result.sink["status"], "error");
        assert!(result.sink["error"].as_str().unwrap().contains("Compute.Unavailable"));
    }

    #[tokio::test]
    async fn fs_write_without_sandbox_configured_fails() {
        let body = json!({"directory": "appData", "path": "notes.txt", "contents": "hi"});
        let err = router().call(&params("tauri://fs/writeTextFile", Some(body))).await.unwrap_err();
        assert_eq!(err.code(), codes::FS_SANDBOX_VIOLATION);
    }

    #[tokio::test]
    async fn fs_write_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("appData");
        std::fs::create_dir_all(&root).unwrap();
        let router = ApiRouter::new(NullComputeBridge, Some(FsSandbox::new(vec![root])), Telemetry::new());
        let body = json!({"directory": "appData", "path": "../evil.txt", "contents": "x"});
        let result = router.call(&params("tauri://fs/writeTextFile", Some(body))).await.unwrap();
        assert_eq!(result.sink["ok"], false);
    }

    #[tokio::test]
    async fn fs_write_inside_sandbox_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("appData");
        std::fs::create_dir_all(&root).unwrap();
        let router = ApiRouter::new(NullComputeBridge, Some(FsSandbox::new(vec![root.clone()])), Telemetry::new());
        let body = json!({"directory": "appData", "path": "notes.txt", "contents": "hello"});
        let result = router.call(&params("tauri://fs/writeTextFile", Some(body))).await.unwrap();
        assert_eq!(result.sink["ok"], true);
        assert_eq!(std::fs::read_to_string(root.join("notes.txt")).unwrap(), "hello");
    }
}
