// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-context scheduler: a single-threaded coordinator plus a
//! bounded pool of `tokio` worker tasks, sharing one execute/return channel
//! pair across every context in a scan.
//!
//! The coordinator keeps a lazily-cleaned priority queue over contexts
//! (std's `BinaryHeap` has no decrease-key, so stale entries are pushed
//! fresh and discarded on pop rather than updated in place) ordered by
//! "has ready work" first, then fewest calls issued so far — the heuristic
//! that widens fan-out across contexts early in a scan.

use crate::cancel::CancellationToken;
use crate::ctx::{Ctx, LinkKey};
use scan_core::{Call, Map, Mode};
use scan_registry::Registry;
use scan_sdk::Request;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};

/// One (account, region, service) triple and its compiled registry, ready
/// to be turned into a running [`Ctx`] by the [`Coordinator`].
pub struct ContextSpec {
    /// Account identifier.
    pub account: String,
    /// Region to scan.
    pub region: String,
    /// Service name.
    pub service: String,
    /// The service's compiled registry. Services sharing a name across
    /// regions should share one `Arc<Registry>` rather than recompile.
    pub registry: Arc<Registry>,
    /// Mode bits visible to the scheduler and adapters.
    pub mode: Mode,
}

struct Dispatch {
    ctx_id: usize,
    link_key: LinkKey,
    call: Call,
    request: Arc<dyn Request>,
    queue_secs: f64,
    keep_stats: bool,
}

struct Completion {
    ctx_id: usize,
    link_key: LinkKey,
    call: Call,
}

/// A context's current scheduling priority, snapshotted at push time.
/// `Ord` is defined so `BinaryHeap::pop` returns the *highest* priority:
/// ready beats not-ready, then fewer `total_calls` wins, then the
/// lower (first-registered) `ctx_id` wins.
#[derive(Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    ctx_id: usize,
    ready: bool,
    total_calls: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready
            .cmp(&other.ready)
            .then_with(|| other.total_calls.cmp(&self.total_calls))
            .then_with(|| other.ctx_id.cmp(&self.ctx_id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The cross-context scheduler: owns every running [`Ctx`] for one scan and
/// drives them to completion behind a bounded worker pool.
pub struct Coordinator {
    contexts: Vec<Ctx>,
    heap: BinaryHeap<HeapEntry>,
    workers: usize,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Build a coordinator over the given contexts, starting each one so
    /// the heap has an accurate initial snapshot.
    #[must_use]
    pub fn new(specs: Vec<ContextSpec>, workers: usize, cancel: CancellationToken) -> Self {
        let mut contexts: Vec<Ctx> = specs
            .into_iter()
            .map(|s| Ctx::new(s.account, s.region, s.service, s.registry, s.mode))
            .collect();
        let mut heap = BinaryHeap::with_capacity(contexts.len());
        for (ctx_id, ctx) in contexts.iter_mut().enumerate() {
            ctx.start();
            heap.push(HeapEntry { ctx_id, ready: ctx.ready_calls > 0, total_calls: ctx.total_calls });
        }
        Self { contexts, heap, workers: workers.max(1), cancel }
    }

    /// Run every context to completion, returning one [`Map`] per context in
    /// the order they were supplied to [`Coordinator::new`].
    pub async fn run(mut self) -> Vec<Map> {
        let (exec_tx, exec_rx) = mpsc::channel::<Dispatch>(1);
        let (ret_tx, mut ret_rx) = mpsc::channel::<Completion>(1);
        let exec_rx = Arc::new(Mutex::new(exec_rx));

        let mut workers = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let exec_rx = Arc::clone(&exec_rx);
            let ret_tx = ret_tx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let dispatch = { exec_rx.lock().await.recv().await };
                    let Some(Dispatch { ctx_id, link_key, mut call, request, queue_secs, keep_stats }) = dispatch else {
                        break;
                    };
                    let started = Instant::now();
                    execute_call(request.as_ref(), &mut call).await;
                    let exec_secs = started.elapsed().as_secs_f64();
                    if keep_stats {
                        apply_stats(&mut call, queue_secs, exec_secs);
                    }
                    if ret_tx.send(Completion { ctx_id, link_key, call }).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(ret_tx);

        let mut in_flight = 0usize;
        'dispatch: loop {
            if self.cancel.is_cancelled() && in_flight == 0 {
                break;
            }

            let Some(ctx_id) = self.pop_ready() else {
                if in_flight > 0 {
                    match ret_rx.recv().await {
                        Some(completion) => {
                            in_flight -= 1;
                            self.apply_completion(completion);
                        }
                        None => break,
                    }
                    continue;
                }
                if self.all_done() {
                    break;
                }
                // Not done, nothing ready, nothing in flight: every context
                // is waiting on a dependency that will never complete. An
                // adapter bug, not a scheduler state reachable from a
                // correctly-compiled registry.
                break;
            };

            // Reserve a send slot before touching the context, so a
            // completion racing in on `ret_rx` can still be applied without
            // ever leaving a popped call stranded outside its batch.
            tokio::select! {
                biased;
                Some(completion) = ret_rx.recv() => {
                    in_flight -= 1;
                    self.apply_completion(completion);
                    self.push_current(ctx_id);
                }
                permit = exec_tx.reserve() => {
                    let Ok(permit) = permit else { break 'dispatch };
                    let (link_key, call, queue_secs) = self.contexts[ctx_id]
                        .next()
                        .expect("heap picked a context with no ready call");
                    self.push_current(ctx_id);
                    let request = self.contexts[ctx_id].request_for(link_key.api());
                    let keep_stats = self.contexts[ctx_id].keep_stats();
                    permit.send(Dispatch { ctx_id, link_key, call, request, queue_secs, keep_stats });
                    in_flight += 1;
                }
            }
        }

        drop(exec_tx);
        for handle in workers {
            let _ = handle.await;
        }
        self.contexts.into_iter().map(Ctx::into_map).collect()
    }

    fn all_done(&self) -> bool {
        self.contexts.iter().all(Ctx::is_done)
    }

    fn current_entry(&self, ctx_id: usize) -> HeapEntry {
        HeapEntry { ctx_id, ready: self.contexts[ctx_id].ready_calls > 0, total_calls: self.contexts[ctx_id].total_calls }
    }

    fn push_current(&mut self, ctx_id: usize) {
        self.heap.push(self.current_entry(ctx_id));
    }

    /// Pop the highest-priority context that still actually has ready work,
    /// discarding stale entries left over from a now-outdated snapshot.
    fn pop_ready(&mut self) -> Option<usize> {
        while let Some(top) = self.heap.pop() {
            let current = self.current_entry(top.ctx_id);
            if current == top && current.ready {
                return Some(top.ctx_id);
            }
        }
        None
    }

    fn apply_completion(&mut self, completion: Completion) {
        let Completion { ctx_id, link_key, call } = completion;
        self.contexts[ctx_id].done(link_key, call);
        self.push_current(ctx_id);
    }
}

async fn execute_call(request: &dyn Request, call: &mut Call) {
    let mut pager = request.paginate(call.in_.clone());
    loop {
        match pager.next_page().await {
            Ok(Some(page)) => call.out.push(page),
            Ok(None) => break,
            Err(e) => {
                call.err = Some(scan_errors::decode_sdk_error(&e));
                break;
            }
        }
    }
}

fn apply_stats(call: &mut Call, queue_secs: f64, exec_secs: f64) {
    let mut stats = scan_core::Stats::default();
    stats.queue_time = queue_secs;
    stats.exec_time = exec_secs;
    stats.observe_round_trip(exec_secs);
    if call.err.is_some() {
        stats.errors = 1;
    }
    call.stats = Some(stats);
}
