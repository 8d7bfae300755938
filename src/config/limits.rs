//! Size, count, and capacity limits enforced by the validator and queue.

/// §4.1 validator: per-op HTML payload ceiling.
pub const MAX_HTML_PER_OP_BYTES: usize = 64 * 1024; // 64 KiB

/// §4.1 validator: total HTML across a batch.
pub const MAX_HTML_PER_BATCH_BYTES: usize = 128 * 1024; // 128 KiB

/// §4.1 validator: serialized `data-command` attribute ceiling.
pub const MAX_DATA_COMMAND_BYTES: usize = 32 * 1024; // 32 KiB

/// §4.1 validator: max `{{token}}` substitutions per `data-command`.
pub const MAX_TOKEN_SUBSTITUTIONS: usize = 16;

/// §4.10 Queue/Dedup: dedupe record TTL.
pub const DEDUP_TTL_SECS: u64 = 10 * 60; // 10 minutes

/// §4.10 Queue/Dedup: bounded dedupe history size.
pub const DEDUP_MAX_ENTRIES: usize = 500;

/// §4.4 CommandLog: replay yields cooperatively every N rows.
pub const REPLAY_YIELD_EVERY: usize = 20;

/// §4.10 Queue/Dedup: frame coalescer tick interval, standing in for
/// `requestAnimationFrame` off the browser thread.
pub const FRAME_TICK_MILLIS: u64 = 16;
