// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hierarchization (the second compaction pass): re-groups a flat `calls[api] ->
//! Vec<Call>` map into a nested document keyed by an interpolated template,
//! optionally annotating every intermediate level with a `#stats` subtree
//! aggregate.

use scan_core::{Call, HierSpec, Map, Stats};
use std::collections::BTreeMap;

/// The four interpolatable path components every template or numeric depth
/// ultimately resolves to, outermost first.
const COMPONENTS: [&str; 4] = ["{account}", "{region}", "{service}.{api}", "{id}"];

/// Resolve a [`HierSpec`] into an ordered list of comma-segment templates,
/// each still containing its placeholders.
///
/// A numeric depth `d` (clamped to `0..=4`) keeps the last `d` of the four
/// canonical components as separate sibling levels and merges the leading
/// `4 - d` components into a single `/`-joined first level. Depth `1`
/// produces exactly the default template; depth `0` collapses everything,
/// including `{id}`, into one flat key per call.
fn resolve_segments(spec: &HierSpec) -> Vec<String> {
    match spec {
        HierSpec::Template(t) => t.split(',').map(str::to_string).collect(),
        HierSpec::Depth(d) => {
            let keep = usize::from((*d).min(4));
            let merge = COMPONENTS.len() - keep;
            let mut segments = Vec::new();
            if merge > 0 {
                segments.push(COMPONENTS[..merge].join("/"));
            }
            segments.extend(COMPONENTS[merge..].iter().map(|s| s.to_string()));
            segments
        }
    }
}

/// Interpolate `{account}`, `{region}`, `{service}`, `{api}`, `{id}` in one
/// template segment against a concrete call's context.
fn interpolate(segment: &str, account: &str, region: &str, service: &str, api: &str, id: &str) -> String {
    segment
        .replace("{account}", account)
        .replace("{region}", region)
        .replace("{service}", service)
        .replace("{api}", api)
        .replace("{id}", id)
}

enum Node {
    Branch(BTreeMap<String, Node>),
    Leaf(serde_json::Value, Stats),
}

impl Node {
    fn insert(&mut self, path: &[String], value: serde_json::Value, stats: Stats) {
        match path.split_first() {
            None => unreachable!("hierarchization path must have at least one segment"),
            Some((head, [])) => {
                let Node::Branch(children) = self else { unreachable!("leaf inserted past another leaf") };
                children.insert(head.clone(), Node::Leaf(value, stats));
            }
            Some((head, rest)) => {
                let Node::Branch(children) = self else { unreachable!("leaf inserted past another leaf") };
                children.entry(head.clone()).or_insert_with(|| Node::Branch(BTreeMap::new())).insert(rest, value, stats);
            }
        }
    }

    /// Convert to a JSON value, returning the subtree's aggregate stats so
    /// the parent can fold it upward. `with_stats` controls whether `#stats`
    /// keys are emitted at branch nodes.
    fn into_value(self, with_stats: bool) -> (serde_json::Value, Stats) {
        match self {
            Node::Leaf(value, stats) => (value, stats),
            Node::Branch(children) => {
                let mut obj = serde_json::Map::new();
                let mut total = Stats::default();
                for (key, child) in children {
                    let (value, stats) = child.into_value(with_stats);
                    total = total.combine(&stats);
                    obj.insert(key, value);
                }
                if with_stats {
                    obj.insert("#stats".to_string(), serde_json::to_value(total.rounded_millis()).expect("Stats serializes infallibly"));
                }
                (serde_json::Value::Object(obj), total)
            }
        }
    }
}

/// Build the hierarchical document for one context's retained calls.
///
/// `with_stats` emits a `#stats` subtree aggregate at every branch node;
/// leaf call objects keep their own `stats` field as-is (set only when the
/// scan ran with `Mode::KEEP_STATS`).
#[must_use]
pub fn hierarchize(map: &Map, spec: &HierSpec, with_stats: bool) -> serde_json::Value {
    let segments = resolve_segments(spec);
    let mut root = Node::Branch(BTreeMap::new());
    let mut any = false;

    for (api, calls) in &map.calls {
        for call in calls {
            let id = call.id.as_deref().unwrap_or_default();
            let path: Vec<String> = segments
                .iter()
                .map(|seg| interpolate(seg, &map.account, &map.region, &map.service, api, id))
                .collect();
            let stats = call.stats.unwrap_or_default();
            let value = serde_json::to_value(call).expect("Call serializes infallibly");
            root.insert(&path, value, stats);
            any = true;
        }
    }

    if !any {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    root.into_value(with_stats).0
}

/// Recursively merge `addition` into `base`, preferring `base`'s leaves on
/// a literal key collision that isn't itself a further object to merge
/// into (which should not occur across distinct contexts unless two
/// contexts produce an identical hierarchy key).
pub fn merge_documents(mut base: serde_json::Value, addition: serde_json::Value) -> serde_json::Value {
    match (&mut base, addition) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(add_map)) => {
            for (key, value) in add_map {
                match base_map.remove(&key) {
                    Some(existing) => {
                        base_map.insert(key, merge_documents(existing, value));
                    }
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
            base
        }
        (_, addition) => addition,
    }
}

/// Flatten a hierarchized document back into `(id, call)` pairs, recovering
/// every leaf whose key structurally identifies it as a call (any value
/// that round-trips through [`Call`]'s shape). Used by the round-trip
/// round-trip tests.
#[must_use]
pub fn flatten(doc: &serde_json::Value) -> Vec<Call> {
    let mut out = Vec::new();
    flatten_into(doc, &mut out);
    out
}

fn flatten_into(value: &serde_json::Value, out: &mut Vec<Call>) {
    let Some(obj) = value.as_object() else { return };
    if let Ok(call) = serde_json::from_value::<Call>(value.clone()) {
        if call.id.is_some() {
            out.push(call);
            return;
        }
    }
    for (key, child) in obj {
        if key == "#stats" {
            continue;
        }
        flatten_into(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::CallErr;

    fn sample_map() -> Map {
        let mut map = Map::new("123456789012", "us-east-1", "iam");
        let mut c1 = Call::new(serde_json::json!({"UserName": "alice"}));
        c1.id = Some("id-alice".to_string());
        c1.out = vec![serde_json::json!({"Policies": ["p0"]})];
        let mut c2 = Call::new(serde_json::json!({"UserName": "bob"}));
        c2.id = Some("id-bob".to_string());
        c2.out = vec![serde_json::json!({"Policies": ["p1"]})];
        map.calls.insert("ListUserPolicies".to_string(), vec![c1, c2]);
        map
    }

    #[test]
    fn default_template_groups_context_then_id() {
        let map = sample_map();
        let doc = hierarchize(&map, &HierSpec::default(), false);
        let ctx_key = "123456789012/us-east-1/iam.ListUserPolicies";
        assert!(doc[ctx_key]["id-alice"].is_object());
        assert!(doc[ctx_key]["id-bob"].is_object());
    }

    #[test]
    fn depth_one_matches_default_template() {
        let map = sample_map();
        let by_template = hierarchize(&map, &HierSpec::default(), false);
        let by_depth = hierarchize(&map, &HierSpec::Depth(1), false);
        assert_eq!(by_template, by_depth);
    }

    #[test]
    fn depth_zero_collapses_to_one_flat_key_per_call() {
        let map = sample_map();
        let doc = hierarchize(&map, &HierSpec::Depth(0), false);
        let obj = doc.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("123456789012/us-east-1/iam.ListUserPolicies/id-alice"));
    }

    #[test]
    fn depth_four_nests_every_component_separately() {
        let map = sample_map();
        let doc = hierarchize(&map, &HierSpec::Depth(4), false);
        assert!(doc["123456789012"]["us-east-1"]["iam.ListUserPolicies"]["id-alice"].is_object());
    }

    #[test]
    fn stats_subtree_aggregates_leaf_stats() {
        let mut map = sample_map();
        for calls in map.calls.values_mut() {
            for call in calls {
                let mut s = Stats::default();
                s.observe_round_trip(0.1);
                call.stats = Some(s);
            }
        }
        let doc = hierarchize(&map, &HierSpec::default(), true);
        let ctx_key = "123456789012/us-east-1/iam.ListUserPolicies";
        assert_eq!(doc[ctx_key]["#stats"]["requests"], serde_json::json!(2));
    }

    #[test]
    fn no_stats_key_when_disabled() {
        let map = sample_map();
        let doc = hierarchize(&map, &HierSpec::default(), false);
        let ctx_key = "123456789012/us-east-1/iam.ListUserPolicies";
        assert!(doc[ctx_key].get("#stats").is_none());
    }

    #[test]
    fn flatten_recovers_every_call_regardless_of_template() {
        let map = sample_map();
        let doc = hierarchize(&map, &HierSpec::Template("{id}".to_string()), false);
        let mut ids: Vec<String> = flatten(&doc).into_iter().map(|c| c.id.unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec!["id-alice".to_string(), "id-bob".to_string()]);
    }

    #[test]
    fn merge_documents_combines_distinct_top_level_keys() {
        let a = serde_json::json!({"A": {"x": 1}});
        let b = serde_json::json!({"B": {"y": 2}});
        let merged = merge_documents(a, b);
        assert_eq!(merged["A"]["x"], 1);
        assert_eq!(merged["B"]["y"], 2);
    }

    #[test]
    fn merge_documents_merges_shared_branch_keys_recursively() {
        let a = serde_json::json!({"ctx": {"id-1": {"in": {}}}});
        let b = serde_json::json!({"ctx": {"id-2": {"in": {}}}});
        let merged = merge_documents(a, b);
        assert!(merged["ctx"]["id-1"].is_object());
        assert!(merged["ctx"]["id-2"].is_object());
    }

    #[test]
    fn err_field_survives_hierarchization() {
        let mut map = Map::new("123456789012", "us-east-1", "iam");
        let mut call = Call::new(serde_json::json!({}));
        call.id = Some("id-err".to_string());
        call.err = Some(CallErr::new(403, "AccessDenied", "nope"));
        map.calls.insert("ListUsers".to_string(), vec![call]);
        let doc = hierarchize(&map, &HierSpec::Template("{id}".to_string()), false);
        assert_eq!(doc["id-err"]["err"]["code"], "AccessDenied");
    }
}
