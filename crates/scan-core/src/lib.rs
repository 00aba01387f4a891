// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for the dependency-directed call engine.
//!
//! Every other crate in the workspace builds on the types defined here:
//! [`Call`], [`Map`], [`Stats`], [`Mode`], [`Opts`], and the `Io` document
//! shape used for both request input and response output once a call has
//! been reduced to JSON.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

/// Name of a scannable service (e.g. `"iam"`).
pub type ServiceName = String;

/// Name of a single API within a service (e.g. `"ListUsers"`).
pub type ApiName = String;

/// A sparse, field-retaining document shape used for both concrete call
/// input and each page of call output once reduced out of the SDK's typed
/// shape. `BTreeMap` keeps serialization order stable for snapshot tests.
pub type Io = BTreeMap<String, serde_json::Value>;

/// Decoded error record attached to a [`Call`] that failed.
///
/// Carries enough of the provider's response to let an adapter's
/// `handle_error` hook decide whether the failure is benign (`ignore`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
pub struct CallErr {
    /// HTTP status code returned by the transport, or 0 if none applies.
    pub status: u16,
    /// Provider-specific error code (e.g. `"AccessDenied"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Upstream request id, if the transport exposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Set by a service adapter's error hook when the failure should not
    /// count against exit status and should be dropped during compaction.
    #[serde(default)]
    pub ignore: bool,
    /// Chained cause, when the transport wrapped an inner error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<CallErr>>,
}

impl CallErr {
    /// Build a minimal error record with no request id or cause.
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            request_id: None,
            ignore: false,
            cause: None,
        }
    }

    /// Mark this error as benign; it will be dropped during compaction.
    #[must_use]
    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }
}

impl std::fmt::Display for CallErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl std::error::Error for CallErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Monotone per-call (or combined per-subtree) timing and counters.
///
/// Every field but the round-trip extrema combines by addition; durations
/// are seconds internally and rounded to milliseconds only at presentation
/// time via [`Stats::rounded_millis`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct Stats {
    /// Number of requests issued (including retries).
    pub requests: u64,
    /// Number of retries the transport performed.
    pub retries: u64,
    /// Number of terminal (non-ignored) errors.
    pub errors: u64,
    /// Total time spent queued before a worker picked up the call, seconds.
    pub queue_time: f64,
    /// Total time spent executing (request + pagination), seconds.
    pub exec_time: f64,
    /// Fastest single round trip observed, seconds. `0.0` if no sample yet.
    pub min_round_trip: f64,
    /// Slowest single round trip observed, seconds.
    pub max_round_trip: f64,
}

impl Stats {
    /// Record a single round trip sample, updating counters and extrema.
    pub fn observe_round_trip(&mut self, seconds: f64) {
        if self.requests == 0 {
            self.min_round_trip = seconds;
            self.max_round_trip = seconds;
        } else {
            self.min_round_trip = self.min_round_trip.min(seconds);
            self.max_round_trip = self.max_round_trip.max(seconds);
        }
        self.requests += 1;
    }

    /// Combine two stats into their element-wise sum, taking extrema for
    /// the round-trip min/max rather than summing them.
    #[must_use]
    pub fn combine(&self, other: &Stats) -> Stats {
        Stats {
            requests: self.requests + other.requests,
            retries: self.retries + other.retries,
            errors: self.errors + other.errors,
            queue_time: self.queue_time + other.queue_time,
            exec_time: self.exec_time + other.exec_time,
            min_round_trip: min_nonzero(self.min_round_trip, other.min_round_trip),
            max_round_trip: self.max_round_trip.max(other.max_round_trip),
        }
    }

    /// Round every duration field to whole milliseconds, for presentation.
    #[must_use]
    pub fn rounded_millis(&self) -> Stats {
        let round = |s: f64| (s * 1000.0).round() / 1000.0;
        Stats {
            queue_time: round(self.queue_time),
            exec_time: round(self.exec_time),
            min_round_trip: round(self.min_round_trip),
            max_round_trip: round(self.max_round_trip),
            ..*self
        }
    }
}

fn min_nonzero(a: f64, b: f64) -> f64 {
    match (a == 0.0, b == 0.0) {
        (true, true) => 0.0,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a.min(b),
    }
}

/// Free-form mode bitset queried by service adapters.
///
/// `ROOTS_ONLY`, `POST_PROC_ONLY`, and `KEEP_STATS` have built-in meaning to
/// the scheduler; `CLOUD_ASSERT` is carried through unchanged for adapters to
/// interpret themselves, since its semantics are service-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u32);

impl Mode {
    /// No flags set.
    pub const NONE: Mode = Mode(0);
    /// Skip every non-root link, with no exception; only root calls are
    /// issued.
    pub const ROOTS_ONLY: Mode = Mode(1 << 0);
    /// Retain per-call [`Stats`] through to the final document.
    pub const KEEP_STATS: Mode = Mode(1 << 1);
    /// Adapter-interpreted flag; the engine attaches no behavior to it.
    pub const CLOUD_ASSERT: Mode = Mode(1 << 2);
    /// Skip every link that does not feed a post-processing hook. Distinct
    /// from `ROOTS_ONLY`: a root link with no hook downstream is still
    /// pruned under this mode, and a non-root link that feeds a hook is
    /// still issued.
    pub const POST_PROC_ONLY: Mode = Mode(1 << 3);

    /// Returns `true` if every bit set in `other` is also set in `self`.
    #[must_use]
    pub fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Mode {
    type Output = Mode;
    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mode {
    fn bitor_assign(&mut self, rhs: Mode) {
        self.0 |= rhs.0;
    }
}

/// How retained calls are grouped into the final nested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierSpec {
    /// The last `n` path segments of the default template become sibling
    /// keys; everything before that is merged into one `/`-joined key.
    Depth(u8),
    /// An explicit comma-separated template, e.g.
    /// `"{account}/{region}/{service}.{api},{id}"`.
    Template(String),
}

impl Default for HierSpec {
    fn default() -> Self {
        HierSpec::Template("{account}/{region}/{service}.{api},{id}".to_string())
    }
}

/// Scan-wide options shared by the scheduler, compactor, and hierarchizer.
///
/// `scan-cli` parses command-line flags and a `scan.toml` overlay into one
/// of these; everything downstream consumes only this type, not `clap`.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Number of parallel workers in the cross-context scheduler's pool.
    pub workers: usize,
    /// Adapter- and scheduler-visible mode bitset.
    pub mode: Mode,
    /// Skip compaction entirely and emit the raw document.
    pub raw: bool,
    /// Emit compact (non-pretty) JSON.
    pub minify: bool,
    /// Emit `#stats` subtree aggregates alongside each hierarchy level.
    pub stats: bool,
    /// Hierarchy grouping for the final document.
    pub hier: HierSpec,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            workers: 64,
            mode: Mode::NONE,
            raw: false,
            minify: false,
            stats: false,
            hier: HierSpec::default(),
        }
    }
}

/// A single concrete API call, whether pending, in flight, or completed.
///
/// `id` is populated lazily: the scheduler leaves it `None` until the call
/// is about to be dispatched, at which point `scan-identity` computes and
/// caches it over the now-final `in_` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct Call {
    /// Content-addressed identifier; `None` until just before dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// For each upstream dependency, the upstream call id and the index
    /// within that call's `out[]` that produced this call's input.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub src: BTreeMap<String, usize>,
    /// The concrete input presented to the SDK.
    #[serde(rename = "in")]
    pub in_: serde_json::Value,
    /// Ordered output pages returned by pagination.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out: Vec<serde_json::Value>,
    /// Decoded error, if the call (or one of its pages) failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<CallErr>,
    /// Per-call timing, present only when [`Mode::KEEP_STATS`] is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
}

impl Call {
    /// Create a pending call for the given concrete input. `id` is left
    /// unset until dispatch.
    pub fn new(in_: serde_json::Value) -> Self {
        Self {
            id: None,
            src: BTreeMap::new(),
            in_,
            out: Vec::new(),
            err: None,
            stats: None,
        }
    }

    /// Record that this call's input was derived from `upstream_id`'s
    /// output page `index`.
    pub fn add_src(&mut self, upstream_id: impl Into<String>, index: usize) {
        self.src.insert(upstream_id.into(), index);
    }

    /// `true` once `out` holds at least one page or an error was recorded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.out.is_empty() || self.err.is_some()
    }
}

/// The sole observable output of one (account, region, service) context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Map {
    /// Account identifier the context scanned.
    pub account: String,
    /// Region the context scanned.
    pub region: String,
    /// Service name the context scanned.
    pub service: ServiceName,
    /// Completed calls, grouped by API name.
    #[serde(default)]
    pub calls: BTreeMap<ApiName, Vec<Call>>,
}

impl Map {
    /// Create an empty map for the given context triple.
    pub fn new(account: impl Into<String>, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            service: service.into(),
            calls: BTreeMap::new(),
        }
    }

    /// Total number of calls across every API in this map.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.values().map(Vec::len).sum()
    }
}
