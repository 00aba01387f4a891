// SPDX-License-Identifier: MIT OR Apache-2.0
//! cloudscan
//!
//! Top-level facade re-exporting the engine crates that make up a scan:
//! registry compilation, input expansion, call identity, the per-context
//! and cross-context schedulers, and the compaction/hierarchy pass.
//!
//! The binary entry point lives in `scan-cli`; this crate exists so
//! end-to-end integration tests under `tests/` can exercise the whole
//! pipeline without depending on the CLI's argument parsing.

pub use scan_compact as compact;
pub use scan_core as core;
pub use scan_errors as errors;
pub use scan_expand as expand;
pub use scan_identity as identity;
pub use scan_registry as registry;
pub use scan_scheduler as scheduler;
pub use scan_sdk as sdk;
pub use scan_services as services;
