// SPDX-License-Identifier: MIT OR Apache-2.0
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use scan_identity::{call_id, canonical_json};

fn small_input() -> serde_json::Value {
    serde_json::json!({"UserName": "alice"})
}

fn large_input() -> serde_json::Value {
    serde_json::json!({
        "UserName": "alice",
        "Tags": (0..50).map(|i| format!("tag-{i}")).collect::<Vec<_>>(),
        "Filter": {"Key": "Department", "Values": ["eng", "sales", "ops"]},
    })
}

fn bench_canonical_json(c: &mut Criterion) {
    let input = large_input();
    c.bench_function("canonical_json/50_tags", |b| {
        b.iter(|| canonical_json(black_box(&input)))
    });
}

fn bench_call_id_small(c: &mut Criterion) {
    let input = small_input();
    c.bench_function("call_id/small_input", |b| {
        b.iter(|| call_id(black_box("123456789012"), black_box("us-east-1"), black_box("iam"), black_box("ListUserPolicies"), black_box(&input)))
    });
}

fn bench_call_id_large(c: &mut Criterion) {
    let input = large_input();
    c.bench_function("call_id/50_tags", |b| {
        b.iter(|| call_id(black_box("123456789012"), black_box("us-east-1"), black_box("ec2"), black_box("DescribeInstances"), black_box(&input)))
    });
}

criterion_group!(benches, bench_canonical_json, bench_call_id_small, bench_call_id_large);
criterion_main!(benches);
