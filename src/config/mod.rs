//! Configuration constants for the command adapter.
//!
//! This module centralizes size limits, TTLs, timeouts, and stable error
//! codes so behavior tuning never requires touching component logic.

pub mod errors;
pub mod limits;
pub mod timeouts;
