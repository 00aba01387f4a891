// SPDX-License-Identifier: MIT OR Apache-2.0
//! Diamond-dependency test service: `A -> {B, C} -> D`, exercising the
//! Cartesian-product boundary case ("a service with a diamond
//! dependency ... must produce |B.out| x |C.out| D-calls with `src`
//! referencing both branches").

use async_trait::async_trait;
use scan_registry::{LinkDef, ServiceDef, ShapeId};
use scan_sdk::{Paginator, Request, SdkErrorInfo};
use std::collections::VecDeque;

/// Output shape token for `A`.
pub struct A;
/// Output shape token for `B`.
pub struct B;
/// Output shape token for `C`.
pub struct C;
/// Output shape token for `D`.
pub struct D;

struct OnePage(Option<serde_json::Value>);

#[async_trait]
impl Paginator for OnePage {
    async fn next_page(&mut self) -> Result<Option<serde_json::Value>, SdkErrorInfo> {
        Ok(self.0.take())
    }
}

struct ListA;
impl Request for ListA {
    fn paginate(&self, _input: serde_json::Value) -> Box<dyn Paginator> {
        Box::new(OnePage(Some(serde_json::json!({"Items": ["a1", "a2"]}))))
    }
}

struct DescribeB;
impl Request for DescribeB {
    fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator> {
        let key = input["Key"].as_str().unwrap_or_default();
        Box::new(OnePage(Some(serde_json::json!({"Items": [format!("{key}-b1"), format!("{key}-b2")]}))))
    }
}

struct DescribeC;
impl Request for DescribeC {
    fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator> {
        let key = input["Key"].as_str().unwrap_or_default();
        Box::new(OnePage(Some(serde_json::json!({"Items": [format!("{key}-c1")]}))))
    }
}

struct DescribeD;
impl Request for DescribeD {
    fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator> {
        Box::new(OnePage(Some(serde_json::json!({"Merged": input["Merged"].clone()}))))
    }
}

/// Build the diamond service: `A` fans into `B` and `C` independently,
/// both of which feed `D`'s Cartesian product.
#[must_use]
pub fn diamond_service() -> ServiceDef {
    ServiceDef::new("diamond")
        .with_link(LinkDef::root("A", ShapeId::of::<A>(), |_| vec![serde_json::json!({})]), ListA)
        .with_link(
            LinkDef::depends_on("B", ShapeId::of::<B>(), vec![ShapeId::of::<A>()], scan_expand::split("Items", "Key")),
            DescribeB,
        )
        .with_link(
            LinkDef::depends_on("C", ShapeId::of::<C>(), vec![ShapeId::of::<A>()], scan_expand::split("Items", "Key")),
            DescribeC,
        )
        .with_link(
            LinkDef::depends_on("D", ShapeId::of::<D>(), vec![ShapeId::of::<B>(), ShapeId::of::<C>()], scan_expand::group("Items", "Merged", 0)),
            DescribeD,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_registry::compile;

    #[test]
    fn compiles_with_b_and_c_both_before_d() {
        let registry = compile(diamond_service()).expect("diamond service should compile");
        let pos_b = registry.order.iter().position(|a| a == "B").unwrap();
        let pos_c = registry.order.iter().position(|a| a == "C").unwrap();
        let pos_d = registry.order.iter().position(|a| a == "D").unwrap();
        assert!(pos_b < pos_d && pos_c < pos_d);
    }
}
