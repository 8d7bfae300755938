#![deny(clippy::print_stderr)]

//! UICP Command Adapter: validates, sanitises, and applies agent-authored
//! command batches against a sandboxed virtual workspace (windows, DOM
//! targets, components, shared state) and the narrow external surface
//! (`api.call`, filesystem writes) that batch can reach. See `SPEC_FULL.md`
//! for the module map this crate implements.

pub mod api;
pub mod authz;
pub mod canonical;
pub mod command_log;
pub mod component;
pub mod compute_bridge;
pub mod config;
pub mod context;
pub mod dom;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod queue;
pub mod sanitize;
pub mod state;
pub mod telemetry;
pub mod validate;
pub mod window;

pub use api::{ApiResult, ApiRouter, ClarifierField, ClarifierSpec, FsSandbox};
pub use command_log::{CommandLog, CommandStore, PersistedCommand, ReplayItem, SqliteCommandStore};
pub use component::{ComponentRecord, ComponentRenderer};
pub use compute_bridge::{ComputeBridge, ComputeFinalErr, ComputeFinalOk, ComputeOutcome, JobSpec, NullComputeBridge};
pub use context::{open_default, open_ephemeral, AdapterContext};
pub use dom::{ApplyOutcome as DomApplyOutcome, DomApplier};
pub use envelope::{Batch, Envelope, Op};
pub use error::{AdapterError, Result};
pub use orchestrator::{ApplyOptions, ApplyOutcome};
pub use policy::{FilePolicyStore, NullPolicyStore, PolicyGate, PolicyStore};
pub use queue::{Dedup, FrameCoalescer};
pub use state::StateStore;
pub use telemetry::{Telemetry, TelemetryEvent};
pub use window::WindowMgr;
