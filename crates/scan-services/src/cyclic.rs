// SPDX-License-Identifier: MIT OR Apache-2.0
//! A deliberately broken service used only to exercise the registry's
//! cycle-detection path: `B` depends on `D`'s output, `C`
//! depends on `B`'s, `D` depends on `C`'s — a cycle with no root to break
//! it. [`compile`](scan_registry::compile) must reject this at
//! registration time, never at scan time.

use async_trait::async_trait;
use scan_registry::{LinkDef, ServiceDef, ShapeId};
use scan_sdk::{Paginator, Request, SdkErrorInfo};

struct B;
struct C;
struct D;

struct Never;

#[async_trait]
impl Paginator for Never {
    async fn next_page(&mut self) -> Result<Option<serde_json::Value>, SdkErrorInfo> {
        Ok(None)
    }
}

struct Unreachable;
impl Request for Unreachable {
    fn paginate(&self, _input: serde_json::Value) -> Box<dyn Paginator> {
        Box::new(Never)
    }
}

/// Build the cyclic service. Always fails [`scan_registry::compile`] with
/// [`scan_errors::ScanCode::DependencyCycle`].
#[must_use]
pub fn cyclic_service() -> ServiceDef {
    ServiceDef::new("cyclic")
        .with_link(LinkDef::depends_on("B", ShapeId::of::<B>(), vec![ShapeId::of::<D>()], |_| vec![]), Unreachable)
        .with_link(LinkDef::depends_on("C", ShapeId::of::<C>(), vec![ShapeId::of::<B>()], |_| vec![]), Unreachable)
        .with_link(LinkDef::depends_on("D", ShapeId::of::<D>(), vec![ShapeId::of::<C>()], |_| vec![]), Unreachable)
}
