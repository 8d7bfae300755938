//! Compute bridge boundary (§4.9, §6 "storage/compute bridge contracts",
//! explicitly out of scope per §1). The adapter only needs a narrow
//! contract — submit a job, get back a terminal result — so this is a
//! simplified, task-shaped cousin of the teacher's `policy.rs`
//! `ComputeJobSpec`/`ComputeFinalOk`/`ComputeFinalErr` (there: full WASM
//! capability/timeout/memory gating for a Wasmtime host; here: the
//! `JobSpec {jobId?, task, input?, timeoutMs?, cache?}` shape §4.9 names,
//! with the same timeout-bounds check kept as the one piece of policy
//! that belongs on this side of the boundary).

use crate::config::errors as codes;
use crate::config::timeouts::DEFAULT_COMPUTE_TIMEOUT;
use crate::error::{AdapterError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 120_000;

/// `uicp://compute.call` body (§4.9).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub job_id: Option<String>,
    pub task: String,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub cache: Option<String>,
}

impl JobSpec {
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_COMPUTE_TIMEOUT.as_millis() as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeFinalOk {
    pub job_id: String,
    pub task: String,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeFinalErr {
    pub job_id: String,
    pub task: String,
    pub code: String,
    pub message: String,
}

pub enum ComputeOutcome {
    Ok(ComputeFinalOk),
    Err(ComputeFinalErr),
}

/// Timeout-bounds check mirroring the teacher's `enforce_compute_policy`
/// gate, run before a job ever reaches the bridge.
pub fn enforce_job_policy(spec: &JobSpec) -> Result<()> {
    let timeout = spec.timeout_ms();
    if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout) {
        return Err(AdapterError::validation(
            codes::COMPUTE_FAILED,
            format!("timeoutMs outside allowed range ({MIN_TIMEOUT_MS}-{MAX_TIMEOUT_MS})"),
        ));
    }
    Ok(())
}

/// External collaborator (§1 non-goal: "the actual compute runtime").
#[async_trait]
pub trait ComputeBridge: Send + Sync {
    async fn submit(&self, spec: JobSpec) -> ComputeOutcome;
}

/// Default bridge for contexts with no compute runtime wired up: every
/// job fails closed rather than hanging.
pub struct NullComputeBridge;

#[async_trait]
impl ComputeBridge for NullComputeBridge {
    async fn submit(&self, spec: JobSpec) -> ComputeOutcome {
        ComputeOutcome::Err(ComputeFinalErr {
            job_id: spec.job_id.unwrap_or_default(),
            task: spec.task,
            code: "Compute.Unavailable".to_string(),
            message: "no compute bridge configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_outside_bounds_is_rejected() {
        let spec = JobSpec {
            job_id: None,
            task: "csv.parse".into(),
            input: None,
            timeout_ms: Some(500),
            cache: None,
        };
        assert!(enforce_job_policy(&spec).is_err());
    }

    #[test]
    fn default_timeout_is_within_bounds() {
        let spec = JobSpec {
            job_id: None,
            task: "csv.parse".into(),
            input: None,
            timeout_ms: None,
            cache: None,
        };
        assert!(enforce_job_policy(&spec).is_ok());
    }

    #[tokio::test]
    async fn null_bridge_fails_closed() {
        let bridge = NullComputeBridge;
        let outcome = bridge
            .submit(JobSpec {
                job_id: Some("j1".into()),
                task: "csv.parse".into(),
                input: None,
                timeout_ms: None,
                cache: None,
            })
            .await;
        match outcome {
            ComputeOutcome::Err(err) => assert_eq!(err.code, "Compute.Unavailable"),
            ComputeOutcome::Ok(_) => panic!("expected Err"),
        }
    }
}
