// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-call field stripping (the compaction pass).
//!
//! Paginator bookkeeping fields are identified once per output shape by
//! consulting [`scan_sdk::PaginatorMeta`] and cached process-wide, since
//! every call against the same API shares the same skip set. The cache is
//! keyed by [`ShapeId`] rather than `ApiName`, matching the registry's own
//! notion of "same shape" (an API's output and input can, in principle,
//! share a shape with another API's).

use scan_core::{Call, Map};
use scan_registry::{Registry, ShapeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

/// The set of field names to drop from a shape's input and output values,
/// derived once from its [`scan_sdk::PaginatorMeta`].
#[derive(Debug, Clone, Default)]
struct SkipFields {
    input: HashSet<&'static str>,
    output: HashSet<&'static str>,
}

fn skip_cache() -> &'static Mutex<HashMap<ShapeId, SkipFields>> {
    static CACHE: OnceLock<Mutex<HashMap<ShapeId, SkipFields>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn skip_fields_for(shape: ShapeId, meta: &scan_sdk::PaginatorMeta) -> SkipFields {
    let mut cache = skip_cache().lock().expect("skip-fields cache poisoned");
    cache
        .entry(shape)
        .or_insert_with(|| {
            let mut input = HashSet::new();
            let mut output = HashSet::new();
            if let Some(f) = meta.input_token_field {
                input.insert(f);
            }
            if let Some(f) = meta.limit_field {
                input.insert(f);
            }
            if let Some(f) = meta.output_token_field {
                output.insert(f);
            }
            if let Some(f) = meta.truncation_field {
                output.insert(f);
            }
            SkipFields { input, output }
        })
        .clone()
}

/// `true` if `value` carries no information and should be dropped: `null`,
/// an empty array, an empty object, or (input shapes only) an empty string.
/// Output shapes retain empty strings, since some APIs use one to signal
/// "default" rather than "absent".
fn is_droppable(value: &serde_json::Value, is_input: bool) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        serde_json::Value::String(s) => is_input && s.is_empty(),
        _ => false,
    }
}

/// Reduce one JSON value (assumed to be an object; anything else passes
/// through unchanged) into a sparse [`scan_core::Io`]-shaped value, dropping
/// skipped fields and uninformative ones.
fn compact_value(value: &serde_json::Value, skip: &HashSet<&'static str>, is_input: bool) -> serde_json::Value {
    let Some(obj) = value.as_object() else {
        return value.clone();
    };
    let mut out = serde_json::Map::new();
    for (k, v) in obj {
        if skip.contains(k.as_str()) {
            continue;
        }
        if is_droppable(v, is_input) {
            continue;
        }
        out.insert(k.clone(), v.clone());
    }
    serde_json::Value::Object(out)
}

/// Compact one call in place against the skip set for its output shape.
/// Returns `None` if the call should be dropped entirely: a benign
/// (`err.ignore`) error, or every output page compacted to empty with no
/// error at all.
fn compact_call(call: &Call, skip: &SkipFields) -> Option<Call> {
    if let Some(err) = &call.err {
        if err.ignore {
            return None;
        }
    }

    let mut compacted = call.clone();
    compacted.in_ = compact_value(&call.in_, &skip.input, true);
    compacted.out = call.out.iter().map(|page| compact_value(page, &skip.output, false)).collect();

    let all_pages_empty = compacted.out.iter().all(|p| matches!(p, serde_json::Value::Object(o) if o.is_empty()));
    if all_pages_empty && compacted.err.is_none() {
        return None;
    }
    Some(compacted)
}

/// Compact an entire context [`Map`]: strip bookkeeping fields from every
/// retained call's `in`/`out`, drop ignored-error and empty-output calls,
/// and drop any API whose retained call list becomes empty.
#[must_use]
pub fn compact_map(map: &Map, registry: &Registry) -> Map {
    let mut out = Map::new(map.account.clone(), map.region.clone(), map.service.clone());
    for (api, calls) in &map.calls {
        let output_shape = registry
            .links
            .get(api)
            .and_then(|links| links.first())
            .map(|l| l.output_shape)
            .unwrap_or(ShapeId::named(""));
        let meta = registry.requests.get(api).map(|r| r.paginator_meta()).unwrap_or_default();
        let skip = skip_fields_for(output_shape, &meta);

        let retained: Vec<Call> = calls.iter().filter_map(|c| compact_call(c, &skip)).collect();
        if !retained.is_empty() {
            out.calls.insert(api.clone(), retained);
        }
    }
    out
}
