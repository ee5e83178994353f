//! 规则引擎性能基准测试
//!
//! 覆盖操作符解析、单条规则运行以及规则数量增长下的整体运行开销。

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rule_engine::{Condition, Engine, EngineOptions, Event, Fact, OperatorRegistry, Rule};
use serde_json::{Map, Value, json};
use std::hint::black_box;

fn runtime_facts() -> Map<String, Value> {
    json!({
        "age": 22,
        "score": 65,
        "username": "Alice",
        "tags": ["frequent_visitor", "annual_pass"]
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn extended_engine() -> Engine {
    Engine::with_options(EngineOptions {
        extended_operators: true,
        ..Default::default()
    })
}

/// 操作符字符串解析基准
fn bench_operator_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("operator_resolution");

    let mut registry = OperatorRegistry::new();
    registry.install_extended();

    for operator in ["equal", "caseInsensitive:equal", "not:someFact:caseInsensitive:equal"] {
        group.bench_with_input(BenchmarkId::from_parameter(operator), operator, |b, op| {
            b.iter(|| registry.resolve(black_box(op)))
        });
    }

    let resolved = registry.resolve("caseInsensitive:equal").unwrap();
    let (fact, value) = (json!("Alice"), json!("alice"));
    group.bench_function("call_decorated", |b| {
        b.iter(|| resolved(black_box(&fact), black_box(&value)))
    });

    group.finish();
}

/// 单条规则运行基准
fn bench_single_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_rule");

    let mut engine = Engine::new();
    engine
        .add_rule(Rule::new(
            "young-adult",
            Condition::all(vec![
                Condition::fact("age", "greaterThanInclusive", 18),
                Condition::fact("age", "lessThanInclusive", 25),
            ]),
            Event::new("young-adult"),
        ))
        .unwrap();

    let facts = runtime_facts();
    group.bench_function("runtime_facts", |b| {
        b.iter(|| engine.run(black_box(Some(facts.clone()))).map(|r| r.events.len()))
    });

    let mut computed = Engine::new();
    computed.add_fact(Fact::computed("age", |_, _| Ok(json!(22))));
    computed
        .add_rule(Rule::new(
            "young-adult",
            Condition::all(vec![
                Condition::fact("age", "greaterThanInclusive", 18),
                Condition::fact("age", "lessThanInclusive", 25),
            ]),
            Event::new("young-adult"),
        ))
        .unwrap();

    group.bench_function("computed_fact_cached", |b| {
        b.iter(|| computed.run(None).map(|r| r.events.len()))
    });

    group.finish();
}

/// 规则数量增长下的运行开销
fn bench_rule_count_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_count_scaling");

    let facts = runtime_facts();
    for size in [10, 50, 100, 500].iter() {
        let mut engine = extended_engine();
        for i in 0..*size {
            let condition = Condition::any(vec![
                Condition::fact("score", "greaterThan", i % 100),
                Condition::fact("username", "caseInsensitive:equal", "alice"),
                Condition::fact("tags", "contains", "annual_pass"),
            ]);
            engine
                .add_rule(
                    Rule::new(format!("rule-{}", i), condition, Event::new(format!("event-{}", i)))
                        .with_priority(i % 7),
                )
                .unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| engine.run(black_box(Some(facts.clone()))).map(|r| r.events.len()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_operator_resolution,
    bench_single_rule,
    bench_rule_count_scaling,
);

criterion_main!(benches);
