// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed link registry and one-time DAG compilation.
//!
//! A service adapter describes its APIs as a set of [`LinkDef`]s plus one
//! [`scan_sdk::Request`] per API name. [`compile`] resolves every link's
//! dependencies by output shape, topologically orders the APIs, and builds
//! the `next[dep] -> Vec<api>` adjacency the scheduler walks. Compilation
//! runs once per service, lazily, before the first call of a scan; nothing
//! here performs network I/O.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use scan_core::ApiName;
use scan_errors::{ScanCode, ScanError};
use scan_sdk::Request;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Pseudo-API name used as the root of the dependency graph; every root
/// link's sole "dependency" is this key.
pub const ROOT: &str = "";

/// Opaque token identifying the shape (Rust type) an API produces.
///
/// Two links sharing a [`ShapeId`] are understood to describe the same
/// kind of data; a dependent link declares the shapes it needs and the
/// registry resolves them to concrete API names. Most adapters derive a
/// token from a concrete marker type via [`ShapeId::of`]; [`ShapeId::named`]
/// is an escape hatch for registrations built without a dedicated type
/// (tests, or adapters sharing one enum across several output shapes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeId {
    /// A `TypeId`-backed token, one per distinct Rust type.
    Type(TypeId),
    /// A string-literal token, for callers that don't want a marker type.
    Named(&'static str),
}

impl ShapeId {
    /// Derive a token from a concrete, `'static` marker type.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        ShapeId::Type(TypeId::of::<T>())
    }

    /// Build a token from a string literal.
    #[must_use]
    pub const fn named(name: &'static str) -> Self {
        ShapeId::Named(name)
    }
}

/// One upstream contribution available to a link's expander: the id of the
/// call that produced it, the page index within that call's output, and the
/// call's own input (so a downstream expander can copy a parent context
/// field the output page itself never carries, e.g. `UserName` alongside a
/// `ListUserPolicies` page's `PolicyNames`).
#[derive(Debug, Clone, Copy)]
pub struct Upstream<'a> {
    /// Content-addressed id of the upstream call.
    pub call_id: &'a str,
    /// Index into the upstream call's `out[]` this page came from.
    pub page_index: usize,
    /// The page itself.
    pub page: &'a serde_json::Value,
    /// The input the upstream call itself was invoked with.
    pub input: &'a serde_json::Value,
}

/// Per-combination expander closure: given one [`Upstream`] per dependency
/// (in the link's declared dependency order, empty for a root link), return
/// zero or more concrete inputs. The registry and scheduler attach `src`
/// automatically from the combination; the closure only produces `in_`
/// values (see `scan-expand` for the Split/Group helpers adapters use here).
pub type ExpandFn = dyn Fn(&[Upstream<'_>]) -> Vec<serde_json::Value> + Send + Sync;

/// One link: an API, the output shape it produces, the shapes it depends
/// on, and the closure that turns upstream pages into concrete inputs.
pub struct LinkDef {
    /// The API name this link calls.
    pub api: ApiName,
    /// The shape token this API's output is tagged with.
    pub output_shape: ShapeId,
    /// Shape tokens this link depends on, in the order the expander expects
    /// its `Upstream` slice.
    pub dep_shapes: Vec<ShapeId>,
    /// Expander closure.
    pub expand: Arc<ExpandFn>,
}

impl LinkDef {
    /// Declare a root link: no dependencies, invoked once per context with
    /// an empty `Upstream` slice.
    pub fn root(
        api: impl Into<String>,
        output_shape: ShapeId,
        expand: impl Fn(&[Upstream<'_>]) -> Vec<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            api: api.into(),
            output_shape,
            dep_shapes: Vec::new(),
            expand: Arc::new(expand),
        }
    }

    /// Declare a link depending on one or more upstream shapes.
    pub fn depends_on(
        api: impl Into<String>,
        output_shape: ShapeId,
        dep_shapes: Vec<ShapeId>,
        expand: impl Fn(&[Upstream<'_>]) -> Vec<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            api: api.into(),
            output_shape,
            dep_shapes,
            expand: Arc::new(expand),
        }
    }

    /// `true` if this link has no dependencies.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.dep_shapes.is_empty()
    }
}

/// A post-processing hook, run once a call producing `input_shape` has
/// completed. Hooks never mutate the map; they exist for adapter-side
/// assertions (`Mode::CLOUD_ASSERT`) and validation side effects.
pub struct HookDef {
    /// Shape this hook consumes.
    pub input_shape: ShapeId,
    /// The hook body. Receives one page at a time.
    pub run: Arc<dyn Fn(&serde_json::Value) -> Result<(), ScanError> + Send + Sync>,
}

/// A per-service error hook: given the decoded error on a just-completed
/// call, may flip `ignore` for a benign provider error (e.g. "no policy
/// attached" surfaced as 404 by some APIs).
pub type ErrorHook = dyn Fn(&mut scan_core::CallErr) + Send + Sync;

/// A service's full, uncompiled declaration: its links, request
/// constructors, and any post-processing hooks.
pub struct ServiceDef {
    /// Service name, e.g. `"iam"`.
    pub name: scan_core::ServiceName,
    /// Every link this service declares.
    pub links: Vec<LinkDef>,
    /// One request constructor per API name.
    pub requests: HashMap<ApiName, Arc<dyn Request>>,
    /// Post-processing hooks, keyed by the shape they consume.
    pub hooks: Vec<HookDef>,
    /// Optional error-classification hook, run on every decoded call error.
    pub error_hook: Option<Arc<ErrorHook>>,
}

impl ServiceDef {
    /// Start an empty service declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
            requests: HashMap::new(),
            hooks: Vec::new(),
            error_hook: None,
        }
    }

    /// Attach the service's error-classification hook.
    #[must_use]
    pub fn with_error_hook(mut self, hook: impl Fn(&mut scan_core::CallErr) + Send + Sync + 'static) -> Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Register one link and its request constructor together, since every
    /// link needs exactly one and adapters rarely want to declare them apart.
    #[must_use]
    pub fn with_link(mut self, link: LinkDef, request: impl Request + 'static) -> Self {
        self.requests.insert(link.api.clone(), Arc::new(request));
        self.links.push(link);
        self
    }

    /// Register a post-processing hook.
    #[must_use]
    pub fn with_hook(mut self, hook: HookDef) -> Self {
        self.hooks.push(hook);
        self
    }
}

/// One compiled link: dependencies resolved to concrete API names, and
/// whether this link (or anything downstream of it) feeds a hook.
pub struct CompiledLink {
    /// The API name this link calls.
    pub api: ApiName,
    /// The shape token this API's output is tagged with.
    pub output_shape: ShapeId,
    /// Upstream API names, resolved from `dep_shapes`, in declared order.
    pub deps: Vec<ApiName>,
    /// `true` if this link has no dependencies.
    pub is_root: bool,
    /// `true` if this link or any of its transitive dependents feeds a
    /// registered hook, letting the scheduler prune everything else under
    /// `Mode::POST_PROC_ONLY` without also dropping the data a hook still
    /// needs.
    pub feeds_hook: bool,
    /// Expander closure.
    pub expand: Arc<ExpandFn>,
}

/// A compiled, ready-to-schedule service: every link's dependencies
/// resolved, topologically ordered, with the adjacency the scheduler walks
/// to discover newly-runnable APIs as their upstreams complete.
pub struct Registry {
    /// Service name.
    pub name: scan_core::ServiceName,
    /// Compiled links, keyed by API name. An API maps to more than one
    /// link only when several branches of the graph independently declare
    /// it (the "N:1" case); all such links share `output_shape`.
    pub links: BTreeMap<ApiName, Vec<CompiledLink>>,
    /// Topological order over API names (pseudo-root excluded).
    pub order: Vec<ApiName>,
    /// `next[dep]` is every API name that depends on `dep`, including the
    /// pseudo-root [`ROOT`] mapping to every link with no dependencies.
    pub next: BTreeMap<ApiName, Vec<ApiName>>,
    /// Request constructors, one per API name.
    pub requests: HashMap<ApiName, Arc<dyn Request>>,
    /// Hooks, keyed by the shape they consume.
    pub hooks_by_shape: HashMap<ShapeId, Vec<Arc<dyn Fn(&serde_json::Value) -> Result<(), ScanError> + Send + Sync>>>,
    /// Optional error-classification hook, run on every decoded call error.
    pub error_hook: Option<Arc<ErrorHook>>,
}

impl Registry {
    /// APIs with no dependencies, in declaration order.
    #[must_use]
    pub fn roots(&self) -> &[ApiName] {
        self.next.get(ROOT).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Compile a [`ServiceDef`] into a [`Registry`]:
///
/// 1. Every API name maps to exactly one request constructor.
/// 2. Every link's `output_shape` maps to exactly one API name (links that
///    share an API name are required to also share their output shape).
/// 3. Every link's `dep_shapes` resolve to concrete API names via step 2's
///    map; an unresolved shape is a fatal configuration error.
/// 4. The post-processing "needed" flag propagates from any link whose
///    shape a hook consumes, backward across every dependency edge.
/// 5. APIs are topologically ordered (Kahn's algorithm); leftover
///    in-degree after the queue drains means a cycle, reported by name.
/// 6. `next[dep] -> Vec<api>` adjacency is built, including the
///    pseudo-root [`ROOT`] key for every link with no dependencies.
pub fn compile(service: ServiceDef) -> Result<Registry, ScanError> {
    let ServiceDef { name, links, requests, hooks, error_hook } = service;

    // Step 2: output shape -> api, collision fatal across different APIs.
    let mut shape_to_api: HashMap<ShapeId, ApiName> = HashMap::new();
    for link in &links {
        match shape_to_api.get(&link.output_shape) {
            Some(existing) if existing != &link.api => {
                return Err(ScanError::new(
                    ScanCode::ShapeCollision,
                    format!("APIs '{existing}' and '{}' declare the same output shape", link.api),
                )
                .with_context("service", name.clone())
                .with_context("api_a", existing.clone())
                .with_context("api_b", link.api.clone()));
            }
            _ => {
                shape_to_api.insert(link.output_shape, link.api.clone());
            }
        }
    }

    // Step 1: every API needs exactly one request constructor.
    let mut seen_apis: std::collections::HashSet<&ApiName> = std::collections::HashSet::new();
    for link in &links {
        seen_apis.insert(&link.api);
    }
    for api in &seen_apis {
        if !requests.contains_key(*api) {
            return Err(ScanError::new(
                ScanCode::MissingRequestConstructor,
                format!("API '{api}' has no registered request constructor"),
            )
            .with_context("service", name.clone())
            .with_context("api", (*api).clone()));
        }
    }

    // Step 3: resolve each link's dep_shapes to concrete api names.
    let mut resolved: Vec<(LinkDef, Vec<ApiName>)> = Vec::with_capacity(links.len());
    for link in links {
        let mut deps = Vec::with_capacity(link.dep_shapes.len());
        for shape in &link.dep_shapes {
            let dep_api = shape_to_api.get(shape).cloned().ok_or_else(|| {
                ScanError::new(
                    ScanCode::UnresolvedDependency,
                    format!("link '{}' depends on a shape with no registered producer", link.api),
                )
                .with_context("service", name.clone())
                .with_context("api", link.api.clone())
            })?;
            deps.push(dep_api);
        }
        resolved.push((link, deps));
    }

    // Step 4: propagate feeds_hook backward from every hooked shape.
    let hooked_apis: std::collections::HashSet<ApiName> = resolved
        .iter()
        .filter(|(link, _)| hooks.iter().any(|h| h.input_shape == link.output_shape))
        .map(|(link, _)| link.api.clone())
        .collect();

    // Mark every transitive dependency of a hooked api: if D's output feeds
    // a hook, every upstream that produced D's input must run too, even
    // under a mode that would otherwise prune non-root links.
    let by_api: HashMap<&str, &Vec<ApiName>> =
        resolved.iter().map(|(link, deps)| (link.api.as_str(), deps)).collect();
    let mut feeds_hook: std::collections::HashSet<ApiName> = hooked_apis.clone();
    let mut stack: Vec<ApiName> = hooked_apis.into_iter().collect();
    while let Some(api) = stack.pop() {
        if let Some(deps) = by_api.get(api.as_str()) {
            for dep in *deps {
                if feeds_hook.insert(dep.clone()) {
                    stack.push(dep.clone());
                }
            }
        }
    }

    // Step 5: Kahn's algorithm over the api graph.
    let all_apis: Vec<ApiName> = seen_apis.iter().map(|s| (*s).clone()).collect();
    let mut in_degree: HashMap<ApiName, usize> = all_apis.iter().map(|a| (a.clone(), 0)).collect();
    for (link, deps) in &resolved {
        // Count distinct upstream apis once; duplicate deps on the same
        // api (multiple dependency positions on one upstream) do not
        // inflate in-degree for ordering purposes.
        let mut counted: std::collections::HashSet<&ApiName> = std::collections::HashSet::new();
        for dep in deps {
            if counted.insert(dep) {
                *in_degree.get_mut(&link.api).unwrap() += 1;
            }
        }
    }
    let mut next: BTreeMap<ApiName, Vec<ApiName>> = BTreeMap::new();
    for (link, deps) in &resolved {
        if deps.is_empty() {
            let root_bucket = next.entry(ROOT.to_string()).or_default();
            if !root_bucket.contains(&link.api) {
                root_bucket.push(link.api.clone());
            }
        }
        for dep in deps {
            let bucket = next.entry(dep.clone()).or_default();
            if !bucket.contains(&link.api) {
                bucket.push(link.api.clone());
            }
        }
    }

    let mut queue: VecDeque<ApiName> =
        in_degree.iter().filter(|(_, d)| **d == 0).map(|(a, _)| a.clone()).collect();
    let mut order = Vec::with_capacity(all_apis.len());
    let mut remaining = in_degree.clone();
    while let Some(api) = queue.pop_front() {
        order.push(api.clone());
        if let Some(downstream) = next.get(&api) {
            for d in downstream {
                let entry = remaining.get_mut(d).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(d.clone());
                }
            }
        }
    }
    if order.len() != all_apis.len() {
        let stuck: Vec<&str> = remaining
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(a, _)| a.as_str())
            .collect();
        let mut stuck = stuck;
        stuck.sort_unstable();
        return Err(ScanError::new(
            ScanCode::DependencyCycle,
            format!("dependency cycle among: {}", stuck.join(", ")),
        )
        .with_context("service", name.clone())
        .with_context("apis", stuck));
    }

    let mut compiled_links: BTreeMap<ApiName, Vec<CompiledLink>> = BTreeMap::new();
    for (link, deps) in resolved {
        let is_root = deps.is_empty();
        let feeds = feeds_hook.contains(&link.api);
        compiled_links.entry(link.api.clone()).or_default().push(CompiledLink {
            api: link.api,
            output_shape: link.output_shape,
            deps,
            is_root,
            feeds_hook: feeds,
            expand: link.expand,
        });
    }

    let mut hooks_by_shape: HashMap<ShapeId, Vec<Arc<dyn Fn(&serde_json::Value) -> Result<(), ScanError> + Send + Sync>>> =
        HashMap::new();
    for hook in hooks {
        hooks_by_shape.entry(hook.input_shape).or_default().push(hook.run);
    }

    Ok(Registry {
        name,
        links: compiled_links,
        order,
        next,
        requests,
        hooks_by_shape,
        error_hook,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_sdk::mock::{PageResult, ScriptedRequest};

    struct Users;
    struct Policies;

    fn users_request() -> ScriptedRequest {
        ScriptedRequest::new(|_| vec![PageResult::Page(serde_json::json!({"Users": ["alice", "bob"]}))])
    }

    fn policies_request() -> ScriptedRequest {
        ScriptedRequest::new(|_| vec![PageResult::Page(serde_json::json!({"Policies": []}))])
    }

    fn simple_service() -> ServiceDef {
        ServiceDef::new("iam")
            .with_link(
                LinkDef::root("ListUsers", ShapeId::of::<Users>(), |_| vec![serde_json::json!({})]),
                users_request(),
            )
            .with_link(
                LinkDef::depends_on("ListUserPolicies", ShapeId::of::<Policies>(), vec![ShapeId::of::<Users>()], |ups| {
                    ups.iter().map(|_| serde_json::json!({})).collect()
                }),
                policies_request(),
            )
    }

    #[test]
    fn compiles_a_linear_chain_in_order() {
        let reg = compile(simple_service()).expect("should compile");
        assert_eq!(reg.order, vec!["ListUsers".to_string(), "ListUserPolicies".to_string()]);
        assert_eq!(reg.roots(), &["ListUsers".to_string()]);
        assert_eq!(reg.next["ListUsers"], vec!["ListUserPolicies".to_string()]);
    }

    #[test]
    fn shape_collision_across_different_apis_is_fatal() {
        let svc = ServiceDef::new("broken")
            .with_link(
                LinkDef::root("ListUsers", ShapeId::named("same"), |_| vec![serde_json::json!({})]),
                users_request(),
            )
            .with_link(
                LinkDef::root("ListGroups", ShapeId::named("same"), |_| vec![serde_json::json!({})]),
                users_request(),
            );
        let err = compile(svc).unwrap_err();
        assert_eq!(err.code, ScanCode::ShapeCollision);
    }

    #[test]
    fn unresolved_dependency_is_fatal() {
        let svc = ServiceDef::new("broken").with_link(
            LinkDef::depends_on("ListUserPolicies", ShapeId::of::<Policies>(), vec![ShapeId::of::<Users>()], |_| vec![]),
            policies_request(),
        );
        let err = compile(svc).unwrap_err();
        assert_eq!(err.code, ScanCode::UnresolvedDependency);
    }

    #[test]
    fn missing_request_constructor_is_fatal() {
        let mut svc = simple_service();
        svc.requests.remove("ListUserPolicies");
        let err = compile(svc).unwrap_err();
        assert_eq!(err.code, ScanCode::MissingRequestConstructor);
    }

    #[test]
    fn dependency_cycle_is_detected_by_name() {
        struct B;
        struct C;
        struct D;
        let svc = ServiceDef::new("cyclic")
            .with_link(
                LinkDef::depends_on("B", ShapeId::of::<B>(), vec![ShapeId::of::<D>()], |_| vec![]),
                policies_request(),
            )
            .with_link(
                LinkDef::depends_on("C", ShapeId::of::<C>(), vec![ShapeId::of::<B>()], |_| vec![]),
                policies_request(),
            )
            .with_link(
                LinkDef::depends_on("D", ShapeId::of::<D>(), vec![ShapeId::of::<C>()], |_| vec![]),
                policies_request(),
            );
        let err = compile(svc).unwrap_err();
        assert_eq!(err.code, ScanCode::DependencyCycle);
        assert_eq!(err.context["apis"], serde_json::json!(["B", "C", "D"]));
    }

    #[test]
    fn diamond_dependency_resolves_both_parents() {
        struct A;
        struct B;
        struct C;
        struct D;
        let svc = ServiceDef::new("diamond")
            .with_link(LinkDef::root("A", ShapeId::of::<A>(), |_| vec![serde_json::json!({})]), users_request())
            .with_link(
                LinkDef::depends_on("B", ShapeId::of::<B>(), vec![ShapeId::of::<A>()], |ups| {
                    ups.iter().map(|_| serde_json::json!({})).collect()
                }),
                users_request(),
            )
            .with_link(
                LinkDef::depends_on("C", ShapeId::of::<C>(), vec![ShapeId::of::<A>()], |ups| {
                    ups.iter().map(|_| serde_json::json!({})).collect()
                }),
                users_request(),
            )
            .with_link(
                LinkDef::depends_on("D", ShapeId::of::<D>(), vec![ShapeId::of::<B>(), ShapeId::of::<C>()], |ups| {
                    vec![serde_json::json!({"from": ups.len()})]
                }),
                users_request(),
            );
        let reg = compile(svc).expect("should compile");
        let d_link = &reg.links["D"][0];
        assert_eq!(d_link.deps, vec!["B".to_string(), "C".to_string()]);
        let pos_b = reg.order.iter().position(|a| a == "B").unwrap();
        let pos_c = reg.order.iter().position(|a| a == "C").unwrap();
        let pos_d = reg.order.iter().position(|a| a == "D").unwrap();
        assert!(pos_b < pos_d && pos_c < pos_d);
    }

    #[test]
    fn hook_need_propagates_to_every_upstream() {
        let svc = simple_service().with_hook(HookDef {
            input_shape: ShapeId::of::<Policies>(),
            run: Arc::new(|_| Ok(())),
        });
        let reg = compile(svc).expect("should compile");
        assert!(reg.links["ListUserPolicies"][0].feeds_hook);
        assert!(reg.links["ListUsers"][0].feeds_hook);
    }
}
