//! Stable error code constants, one reserved block per component.
//!
//! Codes are never renumbered once shipped: callers may match on these
//! strings (telemetry dashboards, clarifier copy) across crate versions.

/// Schema validator codes (0100-0199)
pub const VALIDATION_UNKNOWN_OP: &str = "E-UICP-0100";
pub const VALIDATION_BAD_PARAMS: &str = "E-UICP-0101";
pub const VALIDATION_HTML_OP_TOO_LARGE: &str = "E-UICP-0102";
pub const VALIDATION_HTML_BATCH_TOO_LARGE: &str = "E-UICP-0103";
pub const VALIDATION_DATA_COMMAND_TOO_LARGE: &str = "E-UICP-0104";
pub const VALIDATION_DATA_COMMAND_TOO_MANY_TOKENS: &str = "E-UICP-0105";
pub const VALIDATION_WINDOW_SCOPE_MISSING_ID: &str = "E-UICP-0106";

/// Sanitizer codes (0200-0299)
pub const SANITIZER_REJECTED_EMPTIED: &str = "E-UICP-0200";

/// PolicyGate codes (0300-0399)
pub const POLICY_DENIED: &str = "E-UICP-0300";
pub const POLICY_PROMPT_UNAVAILABLE: &str = "E-UICP-0301";

/// CommandLog / persistence codes (0400-0499)
pub const PERSISTENCE_WRITE_FAILED: &str = "E-UICP-0400";
pub const PERSISTENCE_READ_FAILED: &str = "E-UICP-0401";
pub const PERSISTENCE_CLEAR_FAILED: &str = "E-UICP-0402";

/// WindowMgr codes (0500-0599)
pub const WINDOW_NOT_FOUND: &str = "E-UICP-0500";

/// DomApplier codes (0600-0699)
pub const DOM_TARGET_NOT_FOUND: &str = "E-UICP-0600";

/// ComponentRenderer codes (0700-0799)
pub const COMPONENT_UNKNOWN_KIND: &str = "E-UICP-0700";
pub const COMPONENT_NOT_FOUND: &str = "E-UICP-0701";

/// StateStore codes (0800-0899)
pub const STATE_INVALID_PATH: &str = "E-UICP-0800";

/// ApiRouter / compute bridge codes (0900-0999)
pub const API_FAILED: &str = "E-UICP-0900";
pub const COMPUTE_FAILED: &str = "E-UICP-0901";
pub const COMPUTE_TIMEOUT: &str = "E-UICP-0902";
pub const COMPUTE_CANCELLED: &str = "E-UICP-0903";
pub const FS_SANDBOX_VIOLATION: &str = "E-UICP-0904";

/// Orchestrator / internal invariant codes (1000-1099)
pub const INTERNAL_NO_WORKSPACE_ROOT: &str = "E-UICP-1000";
pub const INTERNAL_INVARIANT: &str = "E-UICP-1001";
