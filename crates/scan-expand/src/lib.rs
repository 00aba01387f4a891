// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cartesian-product input expansion.
//!
//! Given a compiled link and the map of calls completed so far, [`expand`]
//! builds the Cartesian product of each dependency's flattened output pages
//! and invokes the link's expander closure once per combination, attaching
//! `src` provenance automatically. An empty domain on any dependency is a
//! short circuit: the link produces no calls this round, not one call with
//! missing data.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use scan_core::Call;
use scan_registry::{CompiledLink, Upstream};

/// Expand one link against the calls completed so far in `map`.
///
/// Root links (no dependencies) invoke their closure once with an empty
/// slice, typically producing a single synthetic input. Every other link's
/// domain is the flattened `(call_id, page_index, page, input)` list of
/// every successfully completed call of each dependency API; the product is
/// taken across dependencies in the link's declared order.
#[must_use]
pub fn expand(link: &CompiledLink, map: &scan_core::Map) -> Vec<Call> {
    if link.is_root {
        return (link.expand)(&[]).into_iter().map(Call::new).collect();
    }

    let domains: Vec<Vec<(String, usize, serde_json::Value, serde_json::Value)>> = link
        .deps
        .iter()
        .map(|dep_api| {
            map.calls
                .get(dep_api)
                .into_iter()
                .flatten()
                .filter(|c| c.err.is_none())
                .flat_map(|c| {
                    let id = c.id.clone().unwrap_or_default();
                    let call_input = c.in_.clone();
                    c.out
                        .iter()
                        .enumerate()
                        .map(move |(idx, page)| (id.clone(), idx, page.clone(), call_input.clone()))
                })
                .collect()
        })
        .collect();

    if domains.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    let sizes: Vec<usize> = domains.iter().map(Vec::len).collect();
    let mut calls = Vec::new();
    for combo in cartesian_indices(&sizes) {
        let upstream: Vec<Upstream<'_>> = combo
            .iter()
            .enumerate()
            .map(|(dep_i, &elem_i)| {
                let (call_id, page_index, page, input) = &domains[dep_i][elem_i];
                Upstream { call_id, page_index: *page_index, page, input }
            })
            .collect();
        for input in (link.expand)(&upstream) {
            let mut call = Call::new(input);
            for up in &upstream {
                call.add_src(up.call_id.to_string(), up.page_index);
            }
            calls.push(call);
        }
    }
    calls
}

/// Every combination of indices into `sizes`, as an odometer: the last
/// dependency varies fastest. `sizes` must contain no zero (callers check
/// for an empty domain before reaching here).
fn cartesian_indices(sizes: &[usize]) -> Vec<Vec<usize>> {
    let mut acc = vec![Vec::new()];
    for &size in sizes {
        let mut next = Vec::with_capacity(acc.len() * size);
        for combo in &acc {
            for i in 0..size {
                let mut c = combo.clone();
                c.push(i);
                next.push(c);
            }
        }
        acc = next;
    }
    acc
}

/// Build an expander closure that, for a single-dependency link, extracts
/// an array field from the upstream page and emits one concrete input per
/// element, copying it under `dest_field`. Mirrors the IAM `ListUsers` ->
/// `ListUserPolicies` per-user fan-out.
#[must_use]
pub fn split(
    source_field: &'static str,
    dest_field: &'static str,
) -> impl Fn(&[Upstream<'_>]) -> Vec<serde_json::Value> + Send + Sync + Clone {
    move |ups: &[Upstream<'_>]| {
        let Some(up) = ups.first() else { return Vec::new() };
        let Some(items) = up.page.get(source_field).and_then(serde_json::Value::as_array) else {
            return Vec::new();
        };
        items.iter().map(|item| serde_json::json!({ dest_field: item.clone() })).collect()
    }
}

/// Like [`split`], but also copies a field from the upstream call's own
/// input onto every emitted element. Mirrors the Go original's
/// `GetGroupPolicy`/`GetRolePolicy` pattern of carrying the parent
/// `GroupName`/`RoleName` alongside each per-item field, so the downstream
/// call's input is unique per (parent, item) pair rather than per item
/// alone.
#[must_use]
pub fn split_with_parent(
    source_field: &'static str,
    dest_field: &'static str,
    parent_field: &'static str,
) -> impl Fn(&[Upstream<'_>]) -> Vec<serde_json::Value> + Send + Sync + Clone {
    move |ups: &[Upstream<'_>]| {
        let Some(up) = ups.first() else { return Vec::new() };
        let Some(items) = up.page.get(source_field).and_then(serde_json::Value::as_array) else {
            return Vec::new();
        };
        let parent = up.input.get(parent_field).cloned().unwrap_or(serde_json::Value::Null);
        items
            .iter()
            .map(|item| {
                let mut obj = serde_json::Map::new();
                obj.insert(dest_field.to_string(), item.clone());
                obj.insert(parent_field.to_string(), parent.clone());
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

/// Build an expander closure that merges an array field from every
/// dependency present in one combination, then chunks the merged elements
/// into inputs of up to `max` elements each, producing
/// `ceil(merged.len() / max)` calls rather than one per element. The
/// complement of [`split`], used when a link's input is a batch of its
/// parents' data rather than a fan-out over it. A `max` of `0` is treated
/// as "no limit": every merged element lands in a single input.
#[must_use]
pub fn group(
    source_field: &'static str,
    dest_field: &'static str,
    max: usize,
) -> impl Fn(&[Upstream<'_>]) -> Vec<serde_json::Value> + Send + Sync + Clone {
    move |ups: &[Upstream<'_>]| {
        let mut merged = Vec::new();
        for up in ups {
            if let Some(items) = up.page.get(source_field).and_then(serde_json::Value::as_array) {
                merged.extend(items.iter().cloned());
            }
        }
        if merged.is_empty() {
            return Vec::new();
        }
        let chunk_size = if max == 0 { merged.len() } else { max };
        merged
            .chunks(chunk_size)
            .map(|chunk| serde_json::json!({ dest_field: chunk.to_vec() }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::Map;
    use scan_registry::{LinkDef, ShapeId};
    use std::sync::Arc;

    struct Users;
    struct Policies;

    fn compiled_link(deps: Vec<ShapeId>, expand_fn: Arc<scan_registry::ExpandFn>) -> CompiledLink {
        CompiledLink {
            api: "ListUserPolicies".into(),
            output_shape: ShapeId::of::<Policies>(),
            is_root: deps.is_empty(),
            deps: deps.iter().map(|_| "ListUsers".to_string()).collect(),
            feeds_hook: false,
            expand: expand_fn,
        }
    }

    fn map_with_users(pages: Vec<serde_json::Value>) -> Map {
        let mut map = Map::new("123456789012", "us-east-1", "iam");
        let mut call = scan_core::Call::new(serde_json::json!({}));
        call.id = Some("call-users-1".to_string());
        call.out = pages;
        map.calls.insert("ListUsers".to_string(), vec![call]);
        map
    }

    #[test]
    fn root_link_invokes_closure_once_with_empty_slice() {
        let link = LinkDef::root("ListUsers", ShapeId::of::<Users>(), |ups| {
            assert!(ups.is_empty());
            vec![serde_json::json!({})]
        });
        let compiled = CompiledLink {
            api: link.api,
            output_shape: link.output_shape,
            deps: Vec::new(),
            is_root: true,
            feeds_hook: false,
            expand: link.expand,
        };
        let map = Map::new("123456789012", "us-east-1", "iam");
        let calls = expand(&compiled, &map);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].src.is_empty());
    }

    #[test]
    fn empty_upstream_short_circuits_to_zero_calls() {
        let compiled = compiled_link(vec![ShapeId::of::<Users>()], Arc::new(split("Users", "UserName")));
        let map = map_with_users(Vec::new());
        assert!(expand(&compiled, &map).is_empty());
    }

    #[test]
    fn split_emits_one_call_per_element_with_page_index_src() {
        let compiled = compiled_link(vec![ShapeId::of::<Users>()], Arc::new(split("Users", "UserName")));
        let map = map_with_users(vec![
            serde_json::json!({"Users": ["alice", "bob"]}),
            serde_json::json!({"Users": ["carol"]}),
        ]);
        let calls = expand(&compiled, &map);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].in_, serde_json::json!({"UserName": "alice"}));
        assert_eq!(calls[0].src["call-users-1"], 0);
        assert_eq!(calls[2].in_, serde_json::json!({"UserName": "carol"}));
        assert_eq!(calls[2].src["call-users-1"], 1);
    }

    #[test]
    fn errored_upstream_calls_are_excluded_from_the_domain() {
        let compiled = compiled_link(vec![ShapeId::of::<Users>()], Arc::new(split("Users", "UserName")));
        let mut map = Map::new("123456789012", "us-east-1", "iam");
        let mut ok_call = scan_core::Call::new(serde_json::json!({}));
        ok_call.id = Some("call-ok".to_string());
        ok_call.out = vec![serde_json::json!({"Users": ["alice"]})];
        let mut failed_call = scan_core::Call::new(serde_json::json!({}));
        failed_call.id = Some("call-failed".to_string());
        failed_call.err = Some(scan_core::CallErr::new(500, "InternalError", "boom"));
        map.calls.insert("ListUsers".to_string(), vec![ok_call, failed_call]);

        let calls = expand(&compiled, &map);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].src["call-ok"], 0);
    }

    #[test]
    fn cartesian_product_across_two_dependencies() {
        struct A;
        struct B;
        struct C;
        let link = LinkDef::depends_on("C", ShapeId::of::<C>(), vec![ShapeId::of::<A>(), ShapeId::of::<B>()], |ups| {
            vec![serde_json::json!({"from": ups.len()})]
        });
        let compiled = CompiledLink {
            api: link.api,
            output_shape: link.output_shape,
            deps: vec!["A".to_string(), "B".to_string()],
            is_root: false,
            feeds_hook: false,
            expand: link.expand,
        };
        let mut map = Map::new("123456789012", "us-east-1", "svc");
        let mut a1 = scan_core::Call::new(serde_json::json!({}));
        a1.id = Some("a1".to_string());
        a1.out = vec![serde_json::json!({"v": 1})];
        let mut a2 = scan_core::Call::new(serde_json::json!({}));
        a2.id = Some("a2".to_string());
        a2.out = vec![serde_json::json!({"v": 2})];
        map.calls.insert("A".to_string(), vec![a1, a2]);
        let mut b1 = scan_core::Call::new(serde_json::json!({}));
        b1.id = Some("b1".to_string());
        b1.out = vec![serde_json::json!({"v": "b"})];
        map.calls.insert("B".to_string(), vec![b1]);

        let calls = expand(&compiled, &map);
        assert_eq!(calls.len(), 2, "2 A outputs x 1 B output = 2 combinations");
        for call in &calls {
            assert_eq!(call.src.len(), 2);
            assert!(call.src.contains_key("b1"));
        }
    }

    #[test]
    fn group_with_no_limit_merges_array_fields_from_every_dependency_into_one_input() {
        let f = group("Items", "Merged", 0);
        let empty = serde_json::json!({});
        let a = serde_json::json!({"Items": ["x", "y"]});
        let b = serde_json::json!({"Items": ["z"]});
        let ups = vec![
            Upstream { call_id: "a1", page_index: 0, page: &a, input: &empty },
            Upstream { call_id: "b1", page_index: 0, page: &b, input: &empty },
        ];
        let out = f(&ups);
        assert_eq!(out, vec![serde_json::json!({"Merged": ["x", "y", "z"]})]);
    }

    #[test]
    fn group_chunks_merged_elements_into_inputs_of_up_to_max() {
        let f = group("Items", "Merged", 2);
        let empty = serde_json::json!({});
        let a = serde_json::json!({"Items": ["w", "x", "y", "z"]});
        let ups = vec![Upstream { call_id: "a1", page_index: 0, page: &a, input: &empty }];
        let out = f(&ups);
        assert_eq!(
            out,
            vec![
                serde_json::json!({"Merged": ["w", "x"]}),
                serde_json::json!({"Merged": ["y", "z"]}),
            ]
        );
    }

    #[test]
    fn group_chunk_count_is_ceil_of_merged_len_over_max() {
        let f = group("Items", "Merged", 2);
        let empty = serde_json::json!({});
        let a = serde_json::json!({"Items": ["w", "x", "y"]});
        let ups = vec![Upstream { call_id: "a1", page_index: 0, page: &a, input: &empty }];
        let out = f(&ups);
        assert_eq!(out.len(), 2, "3 elements chunked by 2 must yield ceil(3/2) = 2 inputs");
        assert_eq!(out[1], serde_json::json!({"Merged": ["y"]}));
    }

    #[test]
    fn group_with_empty_domain_emits_zero_inputs() {
        let f = group("Items", "Merged", 2);
        let empty = serde_json::json!({});
        let a = serde_json::json!({"Items": []});
        let ups = vec![Upstream { call_id: "a1", page_index: 0, page: &a, input: &empty }];
        assert!(f(&ups).is_empty());
    }

    #[test]
    fn split_with_parent_copies_the_upstream_calls_own_input_field() {
        let f = split_with_parent("PolicyNames", "PolicyName", "UserName");
        let policies_input = serde_json::json!({"UserName": "alice"});
        let page = serde_json::json!({"PolicyNames": ["AdministratorAccess"]});
        let ups = vec![Upstream { call_id: "c1", page_index: 0, page: &page, input: &policies_input }];
        let out = f(&ups);
        assert_eq!(out, vec![serde_json::json!({"PolicyName": "AdministratorAccess", "UserName": "alice"})]);
    }

    #[test]
    fn split_with_parent_disambiguates_identically_named_items_from_different_parents() {
        let f = split_with_parent("PolicyNames", "PolicyName", "UserName");
        let alice_input = serde_json::json!({"UserName": "alice"});
        let bob_input = serde_json::json!({"UserName": "bob"});
        let alice_page = serde_json::json!({"PolicyNames": ["AdministratorAccess"]});
        let bob_page = serde_json::json!({"PolicyNames": ["AdministratorAccess"]});
        let alice_out = f(&[Upstream { call_id: "a", page_index: 0, page: &alice_page, input: &alice_input }]);
        let bob_out = f(&[Upstream { call_id: "b", page_index: 0, page: &bob_page, input: &bob_input }]);
        assert_ne!(alice_out, bob_out, "same policy name under two different parents must not collapse to the same input");
    }
}
