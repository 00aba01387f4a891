// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-context and cross-context call scheduling.
//!
//! [`ctx::Ctx`] walks one (account, region, service) context's compiled DAG,
//! turning newly-satisfied links into batches of concrete calls with no I/O
//! of its own. [`coordinator::Coordinator`] owns every context in a scan and
//! drives them concurrently behind a bounded worker pool, picking which
//! context to advance next with a priority queue over "has ready work, then
//! fewest calls issued so far". [`cancel::CancellationToken`] signals
//! coarse, scan-wide cancellation between the two.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod coordinator;
pub mod ctx;

pub use cancel::{CancellationReason, CancellationToken};
pub use coordinator::{Coordinator, ContextSpec};
pub use ctx::{Ctx, LinkKey};
