//! §6 Telemetry bus. Every component hands its event to [`Telemetry::emit`],
//! which both broadcasts it to external collectors (a `tokio::sync::broadcast`
//! channel — no subscriber is required, matching the teacher's "emit and
//! move on" event style) and, under the `otel_spans` feature, logs it via
//! `tracing` the way `commands/persistence.rs` times and logs each command.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TelemetryEvent {
    ApplyStart {
        batch_id: String,
        run_id: Option<String>,
    },
    ApplyEnd {
        batch_id: String,
        run_id: Option<String>,
        applied: usize,
        skipped: usize,
        errors: usize,
    },
    ApplyAbort {
        batch_id: String,
        run_id: Option<String>,
        reason: String,
    },
    WindowCreate {
        id: String,
    },
    WindowUpdate {
        id: String,
    },
    WindowClose {
        id: String,
    },
    DomApply {
        window_id: String,
        target: String,
        mode: &'static str,
    },
    ComponentRender {
        id: String,
        kind: String,
    },
    ComponentUnknown {
        kind: String,
    },
    BatchDuplicateSkipped {
        batch_id: String,
        ops_hash: String,
        skipped_count: usize,
        age_ms: u64,
    },
    PermissionsAllow {
        key: String,
        trace_id: Option<String>,
    },
    PermissionsDeny {
        key: String,
        reason: String,
        trace_id: Option<String>,
    },
    PermissionsPrompt {
        key: String,
        trace_id: Option<String>,
    },
    ApiCall {
        method: String,
        origin: String,
        status: Option<u16>,
        duration_ms: u64,
    },
    WorkspaceReplayProgress {
        total: usize,
        processed: usize,
        applied: usize,
        errors: usize,
    },
    WorkspaceReplayComplete {
        total: usize,
        processed: usize,
        applied: usize,
        errors: usize,
    },
    WindowLifecycle {
        kind: &'static str,
        id: String,
        title: Option<String>,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::ApplyStart { .. } => "apply_start",
            TelemetryEvent::ApplyEnd { .. } => "apply_end",
            TelemetryEvent::ApplyAbort { .. } => "apply_abort",
            TelemetryEvent::WindowCreate { .. } => "window_create",
            TelemetryEvent::WindowUpdate { .. } => "window_update",
            TelemetryEvent::WindowClose { .. } => "window_close",
            TelemetryEvent::DomApply { .. } => "dom_apply",
            TelemetryEvent::ComponentRender { .. } => "component_render",
            TelemetryEvent::ComponentUnknown { .. } => "component_unknown",
            TelemetryEvent::BatchDuplicateSkipped { .. } => "batch_duplicate_skipped",
            TelemetryEvent::PermissionsAllow { .. } => "permissions_allow",
            TelemetryEvent::PermissionsDeny { .. } => "permissions_deny",
            TelemetryEvent::PermissionsPrompt { .. } => "permissions_prompt",
            TelemetryEvent::ApiCall { .. } => "api_call",
            TelemetryEvent::WorkspaceReplayProgress { .. } => "workspace-replay-progress",
            TelemetryEvent::WorkspaceReplayComplete { .. } => "workspace-replay-complete",
            TelemetryEvent::WindowLifecycle { .. } => "window-lifecycle",
        }
    }
}

/// Process-wide event bus. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct Telemetry {
    sender: broadcast::Sender<TelemetryEvent>,
}

impl Telemetry {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Telemetry { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    /// Broadcast the event; a lagging or absent subscriber never blocks or
    /// panics the emitter (`broadcast::Sender::send` only fails when there
    /// are zero receivers, which is a normal idle state here).
    pub fn emit(&self, event: TelemetryEvent) {
        #[cfg(feature = "otel_spans")]
        tracing::info!(target = "uicp", event = event.name(), "{:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = Telemetry::new();
        bus.emit(TelemetryEvent::ApplyStart {
            batch_id: "b1".into(),
            run_id: None,
        });
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_events() {
        let bus = Telemetry::new();
        let mut rx = bus.subscribe();
        bus.emit(TelemetryEvent::WindowCreate { id: "w1".into() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "window_create");
    }
}
