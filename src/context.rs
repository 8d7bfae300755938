//! Owns every long-lived component for one embedding (§9 DESIGN NOTES:
//! process-wide state is explicit and constructed once, mirroring the
//! teacher's `AppState` in `core.rs` rather than module-level statics).
//! `orchestrator.rs` is the sole place that mutates these components in
//! concert; everything here is otherwise independently testable.

use crate::api::{ApiRouter, FsSandbox};
use crate::command_log::{CommandLog, CommandStore, SqliteCommandStore};
use crate::component::ComponentRenderer;
use crate::compute_bridge::ComputeBridge;
use crate::dom::DomApplier;
use crate::error::{AdapterError, Result};
use crate::policy::{NoPrompt, NullPolicyStore, PolicyGate, PolicyPrompt, PolicyStore};
use crate::queue::Dedup;
use crate::state::StateStore;
use crate::telemetry::Telemetry;
use crate::window::WindowMgr;
use dashmap::DashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything `Orchestrator::apply_batch` needs, generic over the three
/// swappable external collaborators (§6): command persistence, the
/// policy decision store, and the compute runtime.
pub struct AdapterContext<S: CommandStore, P: PolicyStore, C: ComputeBridge> {
    pub telemetry: Telemetry,
    pub window: WindowMgr,
    pub dom: DomApplier,
    pub component: ComponentRenderer,
    pub state: StateStore,
    pub api: ApiRouter<C>,
    pub policy: PolicyGate<P>,
    pub command_log: CommandLog<S>,
    pub dedup: Dedup,
    /// §4.5: pinned windows keep their persisted history across close.
    pub pinned_windows: DashSet<String>,
    /// §4.11 step 1: batches arriving before the workspace root is
    /// registered queue here and drain once in arrival order.
    pub(crate) pending_batches: Mutex<Vec<crate::envelope::Batch>>,
    workspace_ready: AtomicBool,
    /// §4.4/§5: set for the duration of `replay_all`. `apply_batch` queues
    /// rather than processes while this is set, since replay must not run
    /// concurrently with live batches.
    replay_in_progress: AtomicBool,
}

impl<S: CommandStore, P: PolicyStore, C: ComputeBridge> AdapterContext<S, P, C> {
    pub fn new(
        telemetry: Telemetry,
        command_log: CommandLog<S>,
        policy: PolicyGate<P>,
        compute: C,
        fs_sandbox: Option<FsSandbox>,
    ) -> Self {
        AdapterContext {
            window: WindowMgr::new(telemetry.clone()),
            dom: DomApplier::new(telemetry.clone()),
            component: ComponentRenderer::new(),
            state: StateStore::new(),
            api: ApiRouter::new(compute, fs_sandbox, telemetry.clone()),
            policy,
            command_log,
            dedup: Dedup::new(),
            pinned_windows: DashSet::new(),
            pending_batches: Mutex::new(Vec::new()),
            workspace_ready: AtomicBool::new(false),
            replay_in_progress: AtomicBool::new(false),
            telemetry,
        }
    }

    pub fn mark_workspace_ready(&self) {
        self.workspace_ready.store(true, Ordering::SeqCst);
    }

    pub fn is_workspace_ready(&self) -> bool {
        self.workspace_ready.load(Ordering::SeqCst)
    }

    pub fn is_replaying(&self) -> bool {
        self.replay_in_progress.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_replay(&self) {
        self.replay_in_progress.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_replay(&self) {
        self.replay_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn pin_window(&self, window_id: &str) {
        self.pinned_windows.insert(window_id.to_string());
    }

    pub(crate) fn is_pinned(&self, window_id: &str) -> bool {
        self.pinned_windows.contains(window_id)
    }
}

/// Convenience constructor wiring the default storage and policy
/// backends, mirroring `core::init_database`'s single-call setup.
pub async fn open_default<C: ComputeBridge>(
    db_path: &std::path::Path,
    policy_path: PathBuf,
    compute: C,
    fs_roots: Vec<PathBuf>,
) -> Result<AdapterContext<SqliteCommandStore, crate::policy::FilePolicyStore, C>> {
    let telemetry = Telemetry::new();
    let store = SqliteCommandStore::open(db_path)
        .await
        .map_err(|e| AdapterError::internal(format!("command store open failed: {e}")))?;
    let command_log = CommandLog::new(store, telemetry.clone());
    let policy = PolicyGate::new(crate::policy::FilePolicyStore::new(policy_path), Arc::new(NoPrompt) as Arc<dyn PolicyPrompt>);
    let fs_sandbox = if fs_roots.is_empty() { None } else { Some(FsSandbox::new(fs_roots)) };
    Ok(AdapterContext::new(telemetry, command_log, policy, compute, fs_sandbox))
}

/// In-memory context for tests and ephemeral embeddings.
pub async fn open_ephemeral<C: ComputeBridge>(compute: C) -> Result<AdapterContext<SqliteCommandStore, NullPolicyStore, C>> {
    let telemetry = Telemetry::new();
    let store = SqliteCommandStore::in_memory()
        .await
        .map_err(|e| AdapterError::internal(format!("command store open failed: {e}")))?;
    let command_log = CommandLog::new(store, telemetry.clone());
    let policy = PolicyGate::with_no_prompt(NullPolicyStore);
    Ok(AdapterContext::new(telemetry, command_log, policy, compute, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_bridge::NullComputeBridge;

    #[tokio::test]
    async fn ephemeral_context_starts_with_no_windows_and_not_ready() {
        let ctx = open_ephemeral(NullComputeBridge).await.unwrap();
        assert!(!ctx.is_workspace_ready());
        assert!(ctx.window.list().is_empty());
    }

    #[tokio::test]
    async fn pinning_a_window_is_observed_by_is_pinned() {
        let ctx = open_ephemeral(NullComputeBridge).await.unwrap();
        ctx.pin_window("w1");
        assert!(ctx.is_pinned("w1"));
        assert!(!ctx.is_pinned("w2"));
    }
}
