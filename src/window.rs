//! §4.5 WindowMgr. Geometry clamping, drag/resize threshold math, and the
//! idempotent-create convention are new relative to the teacher (its
//! `window` table only stores geometry — clamping lived in the frontend).
//! Lifecycle listeners follow §9 REDESIGN FLAGS: "message passing /
//! observer-channels... a listener's exception propagate after all
//! siblings run" — every listener runs regardless of earlier failures,
//! and failures are returned aggregated rather than short-circuiting.

use crate::envelope::{WindowCloseParams, WindowCreateParams, WindowFocusParams, WindowMoveParams, WindowResizeParams};
use crate::error::{AdapterError, Result};
use crate::telemetry::{Telemetry, TelemetryEvent};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const DRAG_THRESHOLD_PX: f64 = 2.0;
const EDGE_MARGIN_PX: f64 = 16.0;
const MIN_WIDTH_RATIO: f64 = 0.6;
const MIN_HEIGHT_RATIO: f64 = 0.6;
const MIN_WIDTH_FLOOR: f64 = 240.0;
const MIN_HEIGHT_FLOOR: f64 = 220.0;
const DEFAULT_WIDTH: f64 = 640.0;
const DEFAULT_HEIGHT: f64 = 480.0;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub inner_width: f64,
    pub inner_height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            inner_width: 1280.0,
            inner_height: 800.0,
        }
    }
}

/// §3 `WindowRecord`. No wrapper-element handle or teardown closures —
/// there is no real DOM here (§1: the UI framework is an external
/// collaborator); geometry and identity are all this crate owns.
#[derive(Debug, Clone)]
pub struct WindowRecord {
    pub id: String,
    pub title: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub z_index: i64,
    pub initial_width: f64,
    pub initial_height: f64,
}

/// Lifecycle listener callback shape (§6: `{type, id, title?}`).
#[derive(Debug, Clone)]
pub struct WindowEvent {
    pub kind: &'static str,
    pub id: String,
    pub title: Option<String>,
}

pub type LifecycleListener = Arc<dyn Fn(&WindowEvent) -> Result<()> + Send + Sync>;

pub struct WindowMgr {
    records: DashMap<String, WindowRecord>,
    viewport: Viewport,
    z_counter: AtomicI64,
    telemetry: Telemetry,
    listeners: parking_lot::RwLock<Vec<LifecycleListener>>,
}

impl WindowMgr {
    pub fn new(telemetry: Telemetry) -> Self {
        Self::with_viewport(telemetry, Viewport::default())
    }

    pub fn with_viewport(telemetry: Telemetry, viewport: Viewport) -> Self {
        WindowMgr {
            records: DashMap::new(),
            viewport,
            z_counter: AtomicI64::new(0),
            telemetry,
            listeners: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn on_lifecycle(&self, listener: LifecycleListener) {
        self.listeners.write().push(listener);
    }

    /// §4.4 `replayAll`: drops every window record without firing lifecycle
    /// listeners or touching persisted history — replay rebuilds the set
    /// from the command log that follows.
    pub fn clear_all(&self) {
        self.records.clear();
    }

    /// Runs every registered listener regardless of earlier failures,
    /// then returns the aggregated failures (§9 REDESIGN FLAGS).
    fn fire(&self, event: WindowEvent) -> Vec<AdapterError> {
        let mut errors = Vec::new();
        for listener in self.listeners.read().iter() {
            if let Err(err) = listener(&event) {
                errors.push(err);
            }
        }
        errors
    }

    fn next_z(&self) -> i64 {
        self.z_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn clamp_x(&self, x: f64, width: f64) -> f64 {
        let max_x = (self.viewport.inner_width - width - EDGE_MARGIN_PX).max(0.0);
        x.clamp(0.0, max_x)
    }

    fn clamp_y(&self, y: f64, height: f64) -> f64 {
        let max_y = (self.viewport.inner_height - height - EDGE_MARGIN_PX).max(0.0);
        y.clamp(0.0, max_y)
    }

    /// `create` is idempotent: an existing `id` is treated as `update`,
    /// still counting `applied=true` (§4.5).
    pub fn create(&self, params: &WindowCreateParams) -> bool {
        let width = params.width.unwrap_or(DEFAULT_WIDTH).max(1.0);
        let height = params.height.unwrap_or(DEFAULT_HEIGHT).max(1.0);
        let x = self.clamp_x(params.x.unwrap_or(40.0), width);
        let y = self.clamp_y(params.y.unwrap_or(40.0), height);

        if let Some(mut existing) = self.records.get_mut(&params.id) {
            existing.title = params.title.clone().or_else(|| existing.title.clone());
            existing.x = x;
            existing.y = y;
            existing.width = width;
            existing.height = height;
            self.fire(WindowEvent {
                kind: "updated",
                id: params.id.clone(),
                title: existing.title.clone(),
            });
            self.telemetry.emit(TelemetryEvent::WindowUpdate { id: params.id.clone() });
            return true;
        }

        let record = WindowRecord {
            id: params.id.clone(),
            title: params.title.clone(),
            x,
            y,
            width,
            height,
            z_index: self.next_z(),
            initial_width: width,
            initial_height: height,
        };
        self.fire(WindowEvent {
            kind: "created",
            id: record.id.clone(),
            title: record.title.clone(),
        });
        self.telemetry.emit(TelemetryEvent::WindowCreate { id: record.id.clone() });
        self.records.insert(record.id.clone(), record);
        true
    }

    /// `update` reuses `create`'s reapply semantics (§4.5: treated alike).
    pub fn update(&self, params: &WindowCreateParams) -> bool {
        self.create(params)
    }

    /// Drag: ignored for movements under the 2px threshold; otherwise
    /// clamped to the viewport box (§4.5).
    pub fn move_window(&self, params: &WindowMoveParams) -> Result<bool> {
        let mut record = self
            .records
            .get_mut(&params.id)
            .ok_or_else(|| AdapterError::WindowNotFound { window_id: params.id.clone() })?;

        let dx = (params.x - record.x).abs();
        let dy = (params.y - record.y).abs();
        if dx < DRAG_THRESHOLD_PX && dy < DRAG_THRESHOLD_PX {
            return Ok(false);
        }

        record.x = self.clamp_x(params.x, record.width);
        record.y = self.clamp_y(params.y, record.height);
        Ok(true)
    }

    /// Resize: clamps to `(max(240, 0.6*initialW), max(220, 0.6*initialH))`
    /// at the low end, viewport-edge-minus-16px at the high end (§4.5).
    pub fn resize(&self, params: &WindowResizeParams) -> Result<bool> {
        let mut record = self
            .records
            .get_mut(&params.id)
            .ok_or_else(|| AdapterError::WindowNotFound { window_id: params.id.clone() })?;

        let min_width = (MIN_WIDTH_RATIO * record.initial_width).max(MIN_WIDTH_FLOOR);
        let min_height = (MIN_HEIGHT_RATIO * record.initial_height).max(MIN_HEIGHT_FLOOR);
        let max_width = (self.viewport.inner_width - record.x - EDGE_MARGIN_PX).max(min_width);
        let max_height = (self.viewport.inner_height - record.y - EDGE_MARGIN_PX).max(min_height);

        record.width = params.width.clamp(min_width, max_width);
        record.height = params.height.clamp(min_height, max_height);
        Ok(true)
    }

    pub fn focus(&self, params: &WindowFocusParams) -> Result<bool> {
        let mut record = self
            .records
            .get_mut(&params.id)
            .ok_or_else(|| AdapterError::WindowNotFound { window_id: params.id.clone() })?;
        record.z_index = self.next_z();
        Ok(true)
    }

    /// §4.5: teardown listeners, delete the record, emit `destroyed`. When
    /// `is_pinned(id)` is false, the caller should also delete persisted
    /// commands for this window; pinned windows keep their history.
    pub fn close(&self, params: &WindowCloseParams, is_pinned: &(dyn Fn(&str) -> bool + Send + Sync)) -> Result<CloseOutcome> {
        let Some((_, record)) = self.records.remove(&params.id) else {
            return Ok(CloseOutcome {
                applied: false,
                should_delete_history: false,
                lifecycle_errors: Vec::new(),
            });
        };
        let lifecycle_errors = self.fire(WindowEvent {
            kind: "destroyed",
            id: record.id.clone(),
            title: record.title.clone(),
        });
        self.telemetry.emit(TelemetryEvent::WindowClose { id: record.id.clone() });
        Ok(CloseOutcome {
            applied: true,
            should_delete_history: !is_pinned(&record.id),
            lifecycle_errors,
        })
    }

    pub fn list(&self) -> Vec<WindowRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get_record(&self, id: &str) -> Option<WindowRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }
}

pub struct CloseOutcome {
    pub applied: bool,
    pub should_delete_history: bool,
    pub lifecycle_errors: Vec<AdapterError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> WindowMgr {
        WindowMgr::new(Telemetry::new())
    }

    #[test]
    fn create_is_idempotent_and_counts_applied() {
        let mgr = mgr();
        let params = WindowCreateParams {
            id: "w1".into(),
            title: Some("One".into()),
            ..Default::default()
        };
        assert!(mgr.create(&params));
        assert!(mgr.create(&params));
        assert_eq!(mgr.list().len(), 1);
    }

    #[test]
    fn geometry_is_clamped_into_viewport() {
        let mgr = mgr();
        let params = WindowCreateParams {
            id: "w1".into(),
            x: Some(10_000.0),
            y: Some(10_000.0),
            width: Some(400.0),
            height: Some(300.0),
            ..Default::default()
        };
        mgr.create(&params);
        let record = mgr.get_record("w1").unwrap();
        assert!(record.x <= 1280.0 - 400.0 - 16.0 + 0.001);
        assert!(record.y <= 800.0 - 300.0 - 16.0 + 0.001);
    }

    #[test]
    fn drag_under_threshold_is_ignored() {
        let mgr = mgr();
        mgr.create(&WindowCreateParams {
            id: "w1".into(),
            x: Some(100.0),
            y: Some(100.0),
            width: Some(300.0),
            height: Some(200.0),
            ..Default::default()
        });
        let moved = mgr
            .move_window(&WindowMoveParams { id: "w1".into(), x: 101.0, y: 100.5 })
            .unwrap();
        assert!(!moved);
        let record = mgr.get_record("w1").unwrap();
        assert_eq!(record.x, 100.0);
    }

    #[test]
    fn resize_respects_minimum_floor() {
        let mgr = mgr();
        mgr.create(&WindowCreateParams {
            id: "w1".into(),
            width: Some(300.0),
            height: Some(250.0),
            ..Default::default()
        });
        mgr.resize(&WindowResizeParams { id: "w1".into(), width: 10.0, height: 10.0 })
            .unwrap();
        let record = mgr.get_record("w1").unwrap();
        assert_eq!(record.width, MIN_WIDTH_FLOOR.max(0.6 * 300.0));
        assert_eq!(record.height, MIN_HEIGHT_FLOOR.max(0.6 * 250.0));
    }

    #[test]
    fn close_reports_pinned_windows_keep_history() {
        let mgr = mgr();
        mgr.create(&WindowCreateParams { id: "w1".into(), ..Default::default() });
        let outcome = mgr.close(&WindowCloseParams { id: "w1".into() }, &|_| true).unwrap();
        assert!(outcome.applied);
        assert!(!outcome.should_delete_history);
        assert!(!mgr.exists("w1"));
    }

    #[test]
    fn lifecycle_listener_errors_are_aggregated_not_short_circuited() {
        let mgr = mgr();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c1 = calls.clone();
        mgr.on_lifecycle(Arc::new(move |_event| {
            c1.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::internal("listener one failed"))
        }));
        let c2 = calls.clone();
        mgr.on_lifecycle(Arc::new(move |_event| {
            c2.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::internal("listener two failed"))
        }));
        mgr.create(&WindowCreateParams { id: "w1".into(), ..Default::default() });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
