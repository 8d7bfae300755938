//! Wall-clock timeout defaults. §5: "callers provide wall-clock budgets"
//! for replay/prompt/fetch; the compute bridge is the one path with an
//! intrinsic default per spec.

use std::time::Duration;

/// §5 "Compute job waits time out (default 60 s; overridable per spec)".
pub const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// §4.9 ApiRouter http(s) request timeout (not spec-mandated; matches the
/// teacher's `egress.rs` per-request timeout).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
