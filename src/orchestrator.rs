//! §4.11 Orchestrator. `apply_batch` is the sole public entry point: a
//! total match over `Op` routing each envelope to the module table in
//! §4.10, aggregating into one `ApplyOutcome`. Batches arriving before
//! the workspace root is registered queue in `AdapterContext`'s pending
//! list and drain in arrival order once `mark_workspace_ready` is called.

use crate::api::ApiRouter;
use crate::command_log::CommandStore;
use crate::compute_bridge::ComputeBridge;
use crate::config::errors as codes;
use crate::context::AdapterContext;
use crate::envelope::{Batch, DomMode, Op};
use crate::error::AdapterError;
use crate::policy::PolicyStore;
use crate::queue;
use crate::telemetry::TelemetryEvent;
use serde::{Deserialize, Serialize};

/// §3 `ApplyOutcome`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub success: bool,
    pub applied: usize,
    pub skipped_duplicates: usize,
    pub denied_by_policy: usize,
    pub errors: Vec<String>,
    pub batch_id: String,
    pub ops_hash: String,
}

impl ApplyOutcome {
    fn with_ids(batch_id: String, ops_hash: String) -> Self {
        ApplyOutcome {
            success: true,
            batch_id,
            ops_hash,
            ..Default::default()
        }
    }
}

/// Accumulated result of one `run_partition` call, merged into the
/// batch-wide `ApplyOutcome` once all partitions finish.
#[derive(Debug, Default)]
struct PartitionOutcome {
    applied: usize,
    denied_by_policy: usize,
    errors: Vec<String>,
    aborted: bool,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub run_id: Option<String>,
    /// Default true (§4.10: "Default: continue").
    pub allow_partial: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            run_id: None,
            allow_partial: true,
        }
    }
}

impl<S: CommandStore, P: PolicyStore, C: ComputeBridge> AdapterContext<S, P, C> {
    /// §4.11 entry point. If the workspace root is not yet registered,
    /// queues the batch and returns an empty, unsuccessful outcome rather
    /// than blocking — callers drain `take_pending_batches` once ready.
    pub async fn apply_batch(&self, batch: Batch, opts: ApplyOptions) -> ApplyOutcome {
        // §5: "Replay... must not be concurrent with live applyBatch calls
        // (host blocks new batches until replay finalises)." A batch that
        // arrives mid-replay queues exactly like one arriving before the
        // workspace root is ready, and drains the same way once replay ends.
        if !self.is_workspace_ready() || self.is_replaying() {
            let batch_id = batch.batch_id.clone().unwrap_or_default();
            self.pending_batches.lock().await.push(batch);
            return ApplyOutcome {
                success: false,
                batch_id,
                ..Default::default()
            };
        }
        self.apply_batch_ready(batch, opts).await
    }

    /// §4.4 `replayAll`: fetch persisted rows in insertion order, clear the
    /// transient runtime state, dedupe within this replay, and re-drive the
    /// orchestrator per row with `runId = id`. Blocks new `apply_batch`
    /// calls for its duration (§5) and drains whatever queued meanwhile
    /// once it finishes.
    pub async fn replay_all(&self) -> crate::error::Result<ApplyOutcome> {
        self.begin_replay();

        self.window.clear_all();
        self.dom.clear_all();
        self.component.clear_all();
        self.state.clear_all();
        self.dedup.clear_all();

        let outcome = match self.command_log.load_for_replay().await {
            Ok(items) => {
                let total = items.len();
                let mut applied = 0usize;
                let mut errors: Vec<String> = Vec::new();
                for (processed, item) in items.into_iter().enumerate() {
                    let run_outcome = self
                        .apply_batch_ready(
                            Batch::new(vec![item.envelope]),
                            ApplyOptions {
                                run_id: Some(item.run_id),
                                allow_partial: true,
                            },
                        )
                        .await;
                    applied += run_outcome.applied;
                    errors.extend(run_outcome.errors);
                    let done = processed + 1;
                    self.command_log.emit_progress(total, done, applied, errors.len());
                    // §4.4: yields cooperatively between blocks so a host
                    // driving its own event loop alongside this one stays
                    // responsive during a long replay.
                    if done % crate::config::limits::REPLAY_YIELD_EVERY == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                self.command_log.emit_complete(total, total, applied, errors.len());
                Ok(ApplyOutcome {
                    success: errors.is_empty(),
                    applied,
                    errors,
                    ..Default::default()
                })
            }
            Err(err) => Err(err),
        };

        self.end_replay();
        self.drain_pending_batches(ApplyOptions::default()).await;
        outcome
    }

    /// Drains any batches that queued while the workspace root was not
    /// yet registered, applying each in arrival order.
    pub async fn drain_pending_batches(&self, opts: ApplyOptions) -> Vec<ApplyOutcome> {
        let queued = std::mem::take(&mut *self.pending_batches.lock().await);
        let mut outcomes = Vec::with_capacity(queued.len());
        for batch in queued {
            outcomes.push(self.apply_batch_ready(batch, opts.clone()).await);
        }
        outcomes
    }

    async fn apply_batch_ready(&self, batch: Batch, opts: ApplyOptions) -> ApplyOutcome {
        let ops_hash = crate::canonical::batch_hash(&batch);
        let batch_id = batch.batch_id.clone().unwrap_or_else(|| ops_hash.clone());

        if !self.dedup.check_and_record(&batch_id) || !self.dedup.check_and_record(&ops_hash) {
            let age_ms = self.dedup.age_ms(&batch_id).or_else(|| self.dedup.age_ms(&ops_hash)).unwrap_or(0);
            self.telemetry.emit(TelemetryEvent::BatchDuplicateSkipped {
                batch_id: batch_id.clone(),
                ops_hash: ops_hash.clone(),
                skipped_count: batch.len(),
                age_ms,
            });
            return ApplyOutcome {
                success: true,
                skipped_duplicates: batch.len(),
                batch_id,
                ops_hash,
                ..Default::default()
            };
        }

        self.telemetry.emit(TelemetryEvent::ApplyStart {
            batch_id: batch_id.clone(),
            run_id: opts.run_id.clone(),
        });

        let mut outcome = ApplyOutcome::with_ids(batch_id.clone(), ops_hash);

        // §4.10/§5: distinct windowId/"global" partitions are driven as
        // concurrently-polled futures rather than one after another, so a
        // slow partition (a policy prompt, a compute job, a remote
        // `api.call`) never holds up another window's batch. Each
        // partition's own envelopes still apply strictly in arrival order.
        let partition_futures = queue::partition(batch.envelopes)
            .into_iter()
            .map(|(_partition_key, envelopes)| self.run_partition(envelopes, opts.allow_partial));
        let partition_outcomes = futures_util::future::join_all(partition_futures).await;

        let mut aborted = false;
        for p in partition_outcomes {
            outcome.applied += p.applied;
            outcome.denied_by_policy += p.denied_by_policy;
            outcome.errors.extend(p.errors);
            aborted |= p.aborted;
        }

        if aborted {
            outcome.success = false;
            self.telemetry.emit(TelemetryEvent::ApplyAbort {
                batch_id: outcome.batch_id.clone(),
                run_id: opts.run_id.clone(),
                reason: outcome.errors.last().cloned().unwrap_or_default(),
            });
        } else {
            self.telemetry.emit(TelemetryEvent::ApplyEnd {
                batch_id: outcome.batch_id.clone(),
                run_id: opts.run_id,
                applied: outcome.applied,
                skipped: outcome.skipped_duplicates,
                errors: outcome.errors.len(),
            });
        }

        outcome
    }

    /// One windowId/"global" partition's envelopes, applied strictly in
    /// arrival order while sibling partitions run concurrently alongside
    /// this one (§4.10/§5).
    async fn run_partition(&self, envelopes: Vec<crate::envelope::Envelope>, allow_partial: bool) -> PartitionOutcome {
        let mut result = PartitionOutcome::default();
        let mut validator = crate::validate::Validator::new();
        let envelopes = queue::collapse_consecutive_duplicates(envelopes);

        for env in envelopes {
            if let Err(err) = validator.validate(&env) {
                result.errors.push(format!("{}: {}", env.op.name(), err));
                if !allow_partial {
                    result.aborted = true;
                    break;
                }
                continue;
            }

            let policy_outcome = match self.policy.require(&env.op, env.trace_id.as_deref()).await {
                Ok(o) => o,
                Err(err) => {
                    result.errors.push(format!("{}: {}", env.op.name(), err));
                    if !allow_partial {
                        result.aborted = true;
                        break;
                    }
                    continue;
                }
            };
            if !policy_outcome.is_allowed() {
                result.denied_by_policy += 1;
                result.errors.push(format!("{}: denied by policy", env.op.name()));
                self.telemetry.emit(TelemetryEvent::PermissionsDeny {
                    key: policy_outcome.key.clone(),
                    reason: policy_outcome.source.to_string(),
                    trace_id: env.trace_id.clone(),
                });
                continue;
            }
            self.telemetry.emit(TelemetryEvent::PermissionsAllow {
                key: policy_outcome.key.clone(),
                trace_id: env.trace_id.clone(),
            });

            self.command_log.persist(&env).await;

            match self.dispatch(&env.op).await {
                Ok(applied) => {
                    if applied {
                        result.applied += 1;
                    }
                }
                Err(err) => {
                    let fatal = err.is_fatal();
                    result.errors.push(format!("{}: {}", env.op.name(), err));
                    if fatal || !allow_partial {
                        result.aborted = true;
                        break;
                    }
                }
            }
        }

        result
    }

    /// Op -> module routing table (§4.11). Returns whether the op
    /// produced an applied change, for `outcome.applied` bookkeeping.
    async fn dispatch(&self, op: &Op) -> crate::error::Result<bool> {
        match op {
            Op::WindowCreate(p) | Op::WindowUpdate(p) => Ok(self.window.create(p)),
            Op::WindowMove(p) => self.window.move_window(p),
            Op::WindowResize(p) => self.window.resize(p),
            Op::WindowFocus(p) => self.window.focus(p),
            Op::WindowClose(p) => {
                let is_pinned = |id: &str| self.is_pinned(id);
                let outcome = self.window.close(p, &is_pinned)?;
                for err in &outcome.lifecycle_errors {
                    #[cfg(feature = "otel_spans")]
                    tracing::warn!(target = "uicp", error = %err, "lifecycle listener failed");
                    #[cfg(not(feature = "otel_spans"))]
                    let _ = err;
                }
                self.component.purge_window(&p.id);
                self.state.purge_window_watchers(&p.id);
                self.dom.drop_document(&p.id);
                if outcome.should_delete_history {
                    let _ = self.command_log.clear(Some(&p.id)).await;
                }
                Ok(outcome.applied)
            }
            Op::DomSet(p) => self.dispatch_dom(&p.window_id, &p.target, &p.html, DomMode::Set).await,
            Op::DomReplace(p) => self.dispatch_dom(&p.window_id, &p.target, &p.html, DomMode::Replace).await,
            Op::DomAppend(p) => self.dispatch_dom(&p.window_id, &p.target, &p.html, DomMode::Append).await,
            Op::ComponentRender(p) => {
                match self.component.render(&p.id, &p.kind, &p.window_id, &p.target, &p.props) {
                    Ok(html) => {
                        self.dom.apply(&p.window_id, &p.target, &html, DomMode::Set)?;
                        self.telemetry.emit(TelemetryEvent::ComponentRender {
                            id: p.id.clone(),
                            kind: p.kind.clone(),
                        });
                        if p.kind == "script.panel" {
                            self.init_script_panel(p).await?;
                        }
                        Ok(true)
                    }
                    Err(err) if err.code() == codes::COMPONENT_UNKNOWN_KIND => {
                        self.telemetry.emit(TelemetryEvent::ComponentUnknown { kind: p.kind.clone() });
                        Err(err)
                    }
                    Err(err) => Err(err),
                }
            }
            Op::ComponentUpdate(p) => {
                let record = self
                    .component
                    .get(&p.id)
                    .ok_or_else(|| AdapterError::validation(codes::COMPONENT_NOT_FOUND, format!("component '{}' not found", p.id)))?;
                let html = self.component.update(&p.id, &p.props)?;
                self.dom.apply(&record.window_id, &record.target, &html, DomMode::Set)?;
                Ok(true)
            }
            Op::ComponentDestroy(p) => Ok(self.component.destroy(&p.id).is_some()),
            Op::StateSet(p) => {
                let fires = self.state.set(p.scope, &p.key, p.window_id.clone(), p.value.clone());
                self.apply_watch_fires(fires)?;
                Ok(true)
            }
            Op::StateGet(_) => Ok(false),
            Op::StatePatch(p) => {
                let fires = self.state.patch(p.scope, &p.key, p.window_id.clone(), &p.ops)?;
                let changed = !fires.is_empty();
                self.apply_watch_fires(fires)?;
                Ok(changed)
            }
            Op::StateWatch(p) => {
                let id = format!("{:?}:{}:{:?}:{}", p.scope, p.key, p.window_id, p.target);
                let fire = self.state.watch(id, p.scope, &p.key, p.window_id.clone(), p.target.clone(), p.mode);
                if let Some(fire) = fire {
                    self.apply_watch_fires(vec![fire])?;
                }
                Ok(true)
            }
            Op::StateUnwatch(p) => {
                let id = format!("{:?}:{}:{:?}:{}", p.scope, p.key, p.window_id, p.target);
                self.state.unwatch(&id);
                Ok(true)
            }
            Op::ApiCall(p) => {
                // §4.9: `into` seeds `{status:"loading", correlationId}` before the
                // call, then overwrites with the final `ready`/`error` sink.
                let correlation_id = p.into.as_ref().map(|_| uuid::Uuid::new_v4().to_string());
                if let (Some(key), Some(cid)) = (&p.into, &correlation_id) {
                    let fires = self.state.set(
                        crate::envelope::StateScope::Global,
                        key,
                        None,
                        serde_json::json!({"status": "loading", "correlationId": cid}),
                    );
                    self.apply_watch_fires(fires)?;
                }

                let result = match self.api.call(p).await {
                    Ok(result) => result,
                    Err(err) => {
                        if let Some(key) = &p.into {
                            let mut sink = serde_json::json!({"status": "error", "error": err.to_string()});
                            if let Some(cid) = &correlation_id {
                                sink["correlationId"] = serde_json::Value::String(cid.clone());
                            }
                            let fires = self.state.set(crate::envelope::StateScope::Global, key, None, sink);
                            self.apply_watch_fires(fires)?;
                        }
                        return Err(err);
                    }
                };
                if let Some(spec) = &result.clarifier {
                    self.spawn_clarifier(spec)?;
                }
                if let Some(key) = &p.into {
                    let mut sink = result.sink;
                    if let Some(cid) = &correlation_id {
                        sink["correlationId"] = serde_json::Value::String(cid.clone());
                    }
                    let fires = self.state.set(crate::envelope::StateScope::Global, key, None, sink);
                    self.apply_watch_fires(fires)?;
                }
                Ok(true)
            }
            Op::TxnCancel(_) => {
                for record in self.window.list() {
                    let is_pinned = |id: &str| self.is_pinned(id);
                    let _ = self.window.close(&crate::envelope::WindowCloseParams { id: record.id.clone() }, &is_pinned);
                    self.component.purge_window(&record.id);
                    self.state.purge_window_watchers(&record.id);
                    self.dom.drop_document(&record.id);
                }
                Ok(true)
            }
        }
    }

    /// Auto-creates the target window's virtual document if missing
    /// (§4.6/§4.11: "DomApplier (auto-create window if missing)") before
    /// applying, rather than synthesising a full `window.create` envelope.
    async fn dispatch_dom(&self, window_id: &str, target: &str, html: &str, mode: DomMode) -> crate::error::Result<bool> {
        if !self.window.exists(window_id) {
            self.window.create(&crate::envelope::WindowCreateParams {
                id: window_id.to_string(),
                ..Default::default()
            });
        }
        let outcome = self.dom.apply(window_id, target, html, mode)?;
        Ok(outcome.applied)
    }

    /// §4.7 steps 2-5 for `script.panel`: the wrapper div itself is built by
    /// `ComponentRenderer::render` (step 1); this drives the config write,
    /// the loading seed + watch bind, and the `init`/`render` compute jobs.
    /// `init`/`render` reuse `ApiRouter::call`'s `uicp://compute.call`
    /// dispatch so they get the same policy/timeout enforcement as an
    /// author-issued `api.call`.
    async fn init_script_panel(&self, p: &crate::envelope::ComponentRenderParams) -> crate::error::Result<()> {
        use crate::envelope::{ApiCallParams, StateScope, WatchMode};

        let module = p.props.get("module").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
        let source = p.props.get("source").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
        let source_key = p.props.get("sourceKey").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
        let state_key = p.props.get("stateKey").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();

        let config_key = format!("panels.{}.config", p.id);
        let fires = self.state.set(
            StateScope::Workspace,
            &config_key,
            None,
            serde_json::json!({
                "module": module,
                "source": source,
                "sourceKey": source_key,
                "stateKey": state_key,
                "windowId": p.window_id,
            }),
        );
        self.apply_watch_fires(fires)?;

        let fires = self.state.set(StateScope::Workspace, &state_key, None, serde_json::json!({"status": "loading"}));
        self.apply_watch_fires(fires)?;
        let watch_id = format!("{:?}:{}:{:?}:{}", StateScope::Workspace, state_key, Some(p.window_id.clone()), p.target);
        if let Some(fire) = self.state.watch(
            watch_id,
            StateScope::Workspace,
            &state_key,
            Some(p.window_id.clone()),
            p.target.clone(),
            WatchMode::Replace,
        ) {
            self.apply_watch_fires(vec![fire])?;
        }

        let init = ApiCallParams {
            url: "uicp://compute.call".into(),
            method: "POST".into(),
            headers: None,
            body: Some(serde_json::json!({
                "task": module,
                "input": {"mode": "init", "source": source, "sourceKey": source_key},
            })),
            into: None,
        };
        let init_result = self.api.call(&init).await?;
        if init_result.sink.get("status").and_then(serde_json::Value::as_str) != Some("ready") {
            let fires = self.state.set(StateScope::Workspace, &state_key, None, init_result.sink);
            self.apply_watch_fires(fires)?;
            return Ok(());
        }
        let model = init_result.sink.get("data").cloned().unwrap_or(serde_json::Value::Null);
        let model_key = format!("panels.{}.model", p.id);
        self.state.set(StateScope::Workspace, &model_key, None, serde_json::Value::String(model.to_string()));

        let render = ApiCallParams {
            url: "uicp://compute.call".into(),
            method: "POST".into(),
            headers: None,
            body: Some(serde_json::json!({
                "task": module,
                "input": {"mode": "render", "source": source, "sourceKey": source_key, "state": model},
            })),
            into: None,
        };
        let render_result = self.api.call(&render).await?;
        let fires = self.state.set(StateScope::Workspace, &state_key, None, render_result.sink);
        self.apply_watch_fires(fires)?;
        Ok(())
    }

    /// §4.9/S6: renders a modal `clarifier-*` window in place of a plain
    /// `uicp://intent` host event when the body matched the structured
    /// clarifier schema. The submit button's `data-command` re-issues the
    /// intent with the filled fields and closes the clarifier window.
    fn spawn_clarifier(&self, spec: &crate::api::ClarifierSpec) -> crate::error::Result<()> {
        let window_id = format!("clarifier-{}", uuid::Uuid::new_v4());
        self.window.create(&crate::envelope::WindowCreateParams {
            id: window_id.clone(),
            title: Some(spec.title.clone()),
            ..Default::default()
        });

        let tokens: Vec<String> = spec
            .fields
            .iter()
            .map(|f| format!("{}: {{{{form.{}}}}}", f.label, f.name))
            .collect();
        let submit_batch = serde_json::json!([
            {
                "op": "api.call",
                "params": {
                    "url": "uicp://intent",
                    "method": "POST",
                    "body": {"text": tokens.join(", ")},
                },
            },
            {"op": "window.close", "params": {"id": window_id}},
        ]);
        let command = serde_json::to_string(&submit_batch)
            .map_err(|e| AdapterError::internal(format!("clarifier batch serialization failed: {e}")))?;

        let fields: Vec<serde_json::Value> = spec
            .fields
            .iter()
            .map(|f| serde_json::json!({"name": f.name, "label": f.label, "type": "text", "required": f.required}))
            .collect();
        let props = serde_json::json!({
            "submitLabel": spec.submit,
            "command": command,
            "fields": fields,
        });

        let html = self.component.render(&format!("{window_id}-form"), "form", &window_id, "#root", &props)?;
        self.dom.apply(&window_id, "#root", &html, DomMode::Set)?;
        Ok(())
    }

    fn apply_watch_fires(&self, fires: Vec<crate::state::WatchFire>) -> crate::error::Result<()> {
        for fire in fires {
            let Some(window_id) = fire.window_id.as_deref() else {
                continue;
            };
            self.dom.apply(window_id, &fire.target, &fire.html, fire.mode)?;
        }
        Ok(())
    }
}
