// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-context scheduler: walks one service's compiled DAG for a
//! single (account, region, service) triple, allocating a [`Batch`] per
//! link as soon as its dependencies are satisfied and merging completed
//! batches back into the context's [`scan_core::Map`].
//!
//! `Ctx` performs no I/O. The cross-context scheduler (`coordinator.rs`)
//! pulls ready calls out with [`Ctx::next`], executes them against the SDK
//! contract, and feeds the result back in through [`Ctx::done`].

use scan_core::{Call, CallErr, Map, Mode};
use scan_registry::{ApiName, Registry, ROOT};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Identifies one link within a service's registry: the API it calls and
/// its position among any sibling links that share the same API name (the
/// N:1 case).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey(pub ApiName, pub usize);

impl LinkKey {
    /// The API name this link calls.
    #[must_use]
    pub fn api(&self) -> &str {
        &self.0
    }
}

/// Ephemeral per-link container of concrete calls spawned by one expansion.
/// Done when nothing is pending and nothing is in flight.
struct Batch {
    pending: VecDeque<(Instant, Call)>,
    in_flight: usize,
    completed: Vec<Call>,
}

impl Batch {
    fn empty() -> Self {
        Self { pending: VecDeque::new(), in_flight: 0, completed: Vec::new() }
    }

    fn is_done(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

/// One (account, region, service) scan context. Owns the [`Map`] it will
/// eventually hand back once [`Ctx::is_done`] reports `true`.
pub struct Ctx {
    /// Account identifier this context scans.
    pub account: String,
    /// Region this context scans.
    pub region: String,
    /// Service name this context scans.
    pub service: String,
    registry: Arc<Registry>,
    mode: Mode,
    map: Map,
    run: BTreeMap<LinkKey, Batch>,
    seen_ids: HashSet<String>,
    /// Number of calls handed out by [`Ctx::next`] so far.
    pub total_calls: u64,
    /// Number of calls pending across every batch, i.e. queued but not yet
    /// handed to a worker.
    pub ready_calls: u64,
}

impl Ctx {
    /// Build a context for one (account, region, service) triple against an
    /// already-compiled [`Registry`]. Call [`Ctx::start`] before polling.
    #[must_use]
    pub fn new(account: impl Into<String>, region: impl Into<String>, service: impl Into<String>, registry: Arc<Registry>, mode: Mode) -> Self {
        let account = account.into();
        let region = region.into();
        let service = service.into();
        let map = Map::new(account.clone(), region.clone(), service.clone());
        Self {
            account,
            region,
            service,
            registry,
            mode,
            map,
            run: BTreeMap::new(),
            seen_ids: HashSet::new(),
            total_calls: 0,
            ready_calls: 0,
        }
    }

    /// Kick off the context: allocate batches for every root link. Must be
    /// called exactly once, before the first [`Ctx::next`].
    pub fn start(&mut self) {
        self.try_next(ROOT);
    }

    /// `true` once every link has a committed or empty batch and no work
    /// remains in flight.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.run.is_empty()
    }

    /// The request constructor registered for `api`.
    #[must_use]
    pub fn request_for(&self, api: &str) -> Arc<dyn scan_sdk::Request> {
        Arc::clone(&self.registry.requests[api])
    }

    /// `true` if this context was started with [`Mode::KEEP_STATS`], i.e.
    /// the coordinator should attach [`scan_core::Stats`] to each call it
    /// hands back through [`Ctx::done`].
    #[must_use]
    pub fn keep_stats(&self) -> bool {
        self.mode.contains(Mode::KEEP_STATS)
    }

    /// Pull one ready call out of any non-empty batch. No ordering guarantee
    /// among batches; `BTreeMap` iteration order is used,
    /// which is merely deterministic, not meaningful.
    ///
    /// Assigns the call's content-addressed id lazily, right before handing
    /// it to a caller for dispatch, and returns how long it sat queued.
    pub fn next(&mut self) -> Option<(LinkKey, Call, f64)> {
        for (key, batch) in &mut self.run {
            if let Some((queued_at, mut call)) = batch.pending.pop_front() {
                batch.in_flight += 1;
                self.ready_calls -= 1;
                self.total_calls += 1;
                call.id = Some(scan_identity::call_id(&self.account, &self.region, &self.service, key.api(), &call.in_));
                let queue_secs = queued_at.elapsed().as_secs_f64();
                return Some((key.clone(), call, queue_secs));
            }
        }
        None
    }

    /// Report a call's completion. Applies the service's error-classification
    /// hook (if any), merges the owning batch once every sibling batch for
    /// the same API is also done, and unblocks successor APIs.
    pub fn done(&mut self, link_key: LinkKey, mut call: Call) {
        if let Some(err) = &mut call.err {
            if let Some(hook) = &self.registry.error_hook {
                hook(err);
            }
        }
        if let Some(batch) = self.run.get_mut(&link_key) {
            batch.in_flight -= 1;
            batch.completed.push(call);
        }
        self.maybe_commit(link_key.api());
    }

    /// For every API that depends on `from_api` (the pseudo-root [`ROOT`]
    /// on the initial step), allocate a batch for each of its links whose
    /// dependencies are now satisfied.
    fn try_next(&mut self, from_api: &str) {
        let registry = Arc::clone(&self.registry);
        let Some(downstream) = registry.next.get(from_api) else { return };
        for api in downstream.clone() {
            let n = registry.links.get(&api).map(Vec::len).unwrap_or(0);
            for idx in 0..n {
                self.try_run(&api, idx);
            }
        }
    }

    /// Allocate and populate a batch for one link, if its API isn't already
    /// committed, it doesn't already have a batch, and every dependency has
    /// completed.
    fn try_run(&mut self, api: &ApiName, idx: usize) {
        if self.map.calls.contains_key(api) {
            return;
        }
        let link_key = LinkKey(api.clone(), idx);
        if self.run.contains_key(&link_key) {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let link = &registry.links[api][idx];
        if !link.deps.iter().all(|d| self.map.calls.contains_key(d)) {
            return;
        }

        if self.mode.contains(Mode::ROOTS_ONLY) && !link.is_root {
            tracing::debug!(service = %self.service, %api, "link pruned under roots-only mode");
            self.run.insert(link_key, Batch::empty());
            self.maybe_commit(api);
            return;
        }
        if self.mode.contains(Mode::POST_PROC_ONLY) && !link.feeds_hook {
            tracing::debug!(service = %self.service, %api, "link pruned under post-processing-only mode");
            self.run.insert(link_key, Batch::empty());
            self.maybe_commit(api);
            return;
        }

        let inputs = scan_expand::expand(link, &self.map);
        debug_assert!(
            !(link.is_root && inputs.is_empty()),
            "root link '{api}' emitted zero inputs; an adapter bug, not a valid scan outcome"
        );
        tracing::debug!(service = %self.service, %api, count = inputs.len(), "batch allocated");
        let now = Instant::now();
        let mut batch = Batch::empty();
        self.ready_calls += inputs.len() as u64;
        batch.pending.extend(inputs.into_iter().map(|c| (now, c)));
        self.run.insert(link_key, batch);
        self.maybe_commit(api);
    }

    /// If every link sharing `api` now has a done batch, merge them (in
    /// link-declaration order) into `calls[api]`, drop the batches, run any
    /// post-processing hook keyed by the API's output shape, and unblock
    /// successor APIs.
    fn maybe_commit(&mut self, api: &str) {
        let registry = Arc::clone(&self.registry);
        let n = registry.links.get(api).map(Vec::len).unwrap_or(0);
        if n == 0 {
            return;
        }
        for idx in 0..n {
            match self.run.get(&LinkKey(api.to_string(), idx)) {
                Some(batch) if batch.is_done() => {}
                _ => return,
            }
        }

        let mut merged = Vec::new();
        for idx in 0..n {
            let batch = self.run.remove(&LinkKey(api.to_string(), idx)).expect("checked present above");
            merged.extend(batch.completed);
        }

        for call in &mut merged {
            let Some(id) = call.id.clone() else { continue };
            if !self.seen_ids.insert(id.clone()) {
                tracing::warn!(
                    service = %self.service,
                    %api,
                    call_id = %id,
                    "duplicate call id within context; an expander is producing non-unique input"
                );
                call.err = Some(CallErr::new(
                    0,
                    scan_errors::ScanCode::DuplicateCallId.as_str(),
                    format!("duplicate call id within context {}/{}/{}: {id}", self.account, self.region, self.service),
                ));
            }
        }

        if let Some(output_shape) = registry.links.get(api).and_then(|ls| ls.first()).map(|l| l.output_shape) {
            if let Some(hooks) = registry.hooks_by_shape.get(&output_shape) {
                for call in &merged {
                    if call.err.is_some() {
                        continue;
                    }
                    for page in &call.out {
                        for hook in hooks {
                            if let Err(e) = hook(page) {
                                tracing::warn!(service = %self.service, %api, error = %e, "post-processing hook failed");
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!(service = %self.service, %api, count = merged.len(), "batch committed");
        self.map.calls.insert(api.to_string(), merged);
        self.try_next(api);
    }

    /// Consume the context, returning its completed [`Map`]. Only
    /// meaningful once [`Ctx::is_done`] is `true`.
    #[must_use]
    pub fn into_map(self) -> Map {
        self.map
    }
}
