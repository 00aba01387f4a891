// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal IAM-shaped adapter: `ListUsers -> ListUserPolicies ->
//! GetUserPolicy`, the scenario walked through end to end in the engine
//! design (identity prefix `123456789012/us-east-1/iam`).
//!
//! Every request here returns canned, in-memory fixture data rather than
//! talking to a real provider — this crate exists to exercise the
//! scheduler's invariants, not to scan a real account. A production
//! adapter would replace the bodies of `next_page` with actual SDK calls
//! and keep everything else (shapes, links, expander, error hook)
//! unchanged.

use async_trait::async_trait;
use scan_sdk::{PaginatorMeta, Paginator, Request, SdkErrorInfo};
use scan_registry::{LinkDef, ServiceDef, ShapeId};
use std::collections::VecDeque;

/// Output shape token for `ListUsers`.
pub struct Users;
/// Output shape token for `ListUserPolicies`.
pub struct Policies;
/// Output shape token for `GetUserPolicy`.
pub struct PolicyDoc;

struct FixturePager {
    pages: VecDeque<serde_json::Value>,
}

#[async_trait]
impl Paginator for FixturePager {
    async fn next_page(&mut self) -> Result<Option<serde_json::Value>, SdkErrorInfo> {
        Ok(self.pages.pop_front())
    }
}

struct ListUsersRequest;

impl Request for ListUsersRequest {
    fn paginate(&self, _input: serde_json::Value) -> Box<dyn Paginator> {
        Box::new(FixturePager {
            pages: VecDeque::from(vec![
                serde_json::json!({"Users": ["alice", "bob"], "Marker": "page-2", "IsTruncated": true}),
                serde_json::json!({"Users": ["carol"], "IsTruncated": false}),
            ]),
        })
    }

    fn paginator_meta(&self) -> PaginatorMeta {
        PaginatorMeta {
            output_token_field: Some("Marker"),
            truncation_field: Some("IsTruncated"),
            ..PaginatorMeta::default()
        }
    }
}

struct ListUserPoliciesRequest;

impl Request for ListUserPoliciesRequest {
    fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator> {
        let user = input["UserName"].as_str().unwrap_or_default();
        // alice and bob both carry an inline "AdministratorAccess" policy,
        // same name under two different users, to exercise GetUserPolicy's
        // parent-qualified identity below.
        let names: Vec<&str> = match user {
            "alice" => vec!["policy0", "policy1", "AdministratorAccess"],
            "bob" => vec!["policy2", "AdministratorAccess"],
            _ => vec![],
        };
        Box::new(FixturePager {
            pages: VecDeque::from(vec![serde_json::json!({"PolicyNames": names, "IsTruncated": false})]),
        })
    }

    fn paginator_meta(&self) -> PaginatorMeta {
        PaginatorMeta { truncation_field: Some("IsTruncated"), ..PaginatorMeta::default() }
    }
}

struct GetUserPolicyRequest;

impl Request for GetUserPolicyRequest {
    fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator> {
        let name = input["PolicyName"].as_str().unwrap_or_default();
        let user = input["UserName"].as_str().unwrap_or_default();
        let version = name.strip_prefix("policy").unwrap_or(name);
        Box::new(FixturePager {
            pages: VecDeque::from(vec![serde_json::json!({
                "PolicyDocument": {"Version": version, "UserName": user},
            })]),
        })
    }
}

/// Build the worked-example IAM service: a root `ListUsers`, a per-user
/// `ListUserPolicies` fan-out, and a per-policy `GetUserPolicy` fan-out.
/// `NoSuchEntity` is treated as benign, since a user or policy can
/// disappear between the list and describe calls in any real account.
///
/// `GetUserPolicy`'s input carries `UserName` alongside `PolicyName`: the
/// real API requires it, and two users can share an inline policy name
/// (e.g. both owning an `AdministratorAccess` policy), which would
/// otherwise produce identical canonical inputs for distinct calls.
#[must_use]
pub fn iam_service() -> ServiceDef {
    ServiceDef::new("iam")
        .with_error_hook(|err| {
            if err.code == "NoSuchEntity" {
                err.ignore = true;
            }
        })
        .with_link(
            LinkDef::root("ListUsers", ShapeId::of::<Users>(), |_| vec![serde_json::json!({})]),
            ListUsersRequest,
        )
        .with_link(
            LinkDef::depends_on(
                "ListUserPolicies",
                ShapeId::of::<Policies>(),
                vec![ShapeId::of::<Users>()],
                scan_expand::split("Users", "UserName"),
            ),
            ListUserPoliciesRequest,
        )
        .with_link(
            LinkDef::depends_on(
                "GetUserPolicy",
                ShapeId::of::<PolicyDoc>(),
                vec![ShapeId::of::<Policies>()],
                scan_expand::split_with_parent("PolicyNames", "PolicyName", "UserName"),
            ),
            GetUserPolicyRequest,
        )
}
