//! 单次运行的事实簿
//!
//! Almanac 持有调用方提供的运行时事实、按参数缓存的计算事实值，
//! 以及本次运行累积的规则结果。每次 `Engine::run` 创建一个新的 Almanac。

use rules_shared::observability::metrics;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::trace;

use crate::engine::Engine;
use crate::error::{Result, RuleError};
use crate::fact::Params;
use crate::models::Event;
use crate::rule::RuleResult;

/// 无参数调用共享的缓存键
pub const NIL_CACHE_KEY: &str = "nil";

/// 事实簿
pub struct Almanac<'e> {
    engine: &'e Engine,
    runtime_facts: Map<String, Value>,
    /// fact_id -> (cache_key -> value)
    cache: HashMap<String, HashMap<String, Value>>,
    results: Vec<RuleResult>,
    trace: Option<Vec<String>>,
}

impl<'e> Almanac<'e> {
    pub(crate) fn new(engine: &'e Engine, runtime_facts: Option<Map<String, Value>>) -> Self {
        Self {
            engine,
            runtime_facts: runtime_facts.unwrap_or_default(),
            cache: HashMap::new(),
            results: Vec::new(),
            trace: None,
        }
    }

    pub(crate) fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// 获取事实值
    ///
    /// 运行时事实优先，且不经过缓存；其次按 (fact_id, cache_key) 查缓存；
    /// 最后调用引擎中注册的事实计算并写入缓存。`path` 非空时对结果做路径提取。
    pub fn fact_value(
        &mut self,
        fact_id: &str,
        params: Option<&Params>,
        path: Option<&str>,
    ) -> Result<Value> {
        let engine = self.engine;

        if let Some(value) = self.runtime_facts.get(fact_id) {
            return Ok(engine.extract_path(value, path));
        }

        let cache_key = cache_key(params);
        if let Some(value) = self.cache.get(fact_id).and_then(|c| c.get(&cache_key)) {
            trace!(fact = fact_id, cache_key = %cache_key, "事实缓存命中");
            metrics::record_fact_cache_hit();
            return Ok(engine.extract_path(value, path));
        }

        let Some(fact) = engine.fact(fact_id) else {
            if engine.options().allow_undefined_facts {
                return Ok(Value::Null);
            }
            return Err(RuleError::UndefinedFact(fact_id.to_string()));
        };

        let empty = Params::new();
        let value = fact
            .evaluate(params.unwrap_or(&empty), self)
            .map_err(|source| RuleError::FactComputation {
                fact: fact_id.to_string(),
                source,
            })?;

        let extracted = engine.extract_path(&value, path);
        if fact.cache_enabled() {
            self.cache
                .entry(fact_id.to_string())
                .or_default()
                .insert(cache_key, value);
        }

        Ok(extracted)
    }

    /// 写入运行时事实，后续评估的规则可见
    pub fn add_runtime_fact(&mut self, fact_id: impl Into<String>, value: impl Into<Value>) {
        self.runtime_facts.insert(fact_id.into(), value.into());
    }

    pub fn runtime_fact(&self, fact_id: &str) -> Option<&Value> {
        self.runtime_facts.get(fact_id)
    }

    pub fn runtime_facts(&self) -> &Map<String, Value> {
        &self.runtime_facts
    }

    /// 请求停止本次运行，尚未开始评估的规则将被跳过
    pub fn stop(&self) {
        self.engine.stop();
    }

    /// 截至目前已评估规则的结果（按评估顺序）
    pub fn rule_results(&self) -> &[RuleResult] {
        &self.results
    }

    /// 已触发的事件
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.results.iter().filter(|r| r.success).map(|r| &r.event)
    }

    /// 未触发规则的事件
    pub fn failure_events(&self) -> impl Iterator<Item = &Event> {
        self.results.iter().filter(|r| !r.success).map(|r| &r.event)
    }

    pub(crate) fn push_result(&mut self, result: RuleResult) {
        self.results.push(result);
    }

    /// 开始记录一条规则的评估追踪
    pub(crate) fn begin_trace(&mut self) {
        if self.engine.options().trace {
            self.trace = Some(Vec::new());
        }
    }

    pub(crate) fn take_trace(&mut self) -> Vec<String> {
        self.trace.take().unwrap_or_default()
    }

    /// 追踪关闭时不会构造消息
    pub(crate) fn trace(&mut self, line: impl FnOnce() -> String) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(line());
        }
    }
}

/// f64 可精确表示的整数上界 (2^53)
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// 由调用参数生成缓存键
///
/// 缺省或空参数映射为固定键；对象键递归排序，保证语义相同的参数得到相同的键。
pub fn cache_key(params: Option<&Params>) -> String {
    match params {
        Some(params) if !params.is_empty() => {
            let mut out = String::new();
            write_object(params, &mut out);
            out
        }
        _ => NIL_CACHE_KEY.to_string(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // 整数值的浮点数按整数写出，1 与 1.0 共用缓存键
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
                out.push_str(&(f as i64).to_string())
            }
            _ => out.push_str(&n.to_string()),
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineOptions};
    use crate::fact::{Fact, FactOptions};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn counting_fact(id: &str, counter: Arc<AtomicUsize>) -> Fact {
        Fact::computed(id, move |params, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "echo": Value::Object(params.clone()) }))
        })
    }

    #[test]
    fn test_cache_key_nil_for_absent_or_empty() {
        assert_eq!(cache_key(None), NIL_CACHE_KEY);
        assert_eq!(cache_key(Some(&Params::new())), NIL_CACHE_KEY);
    }

    #[test]
    fn test_cache_key_is_canonical() {
        let a = params(json!({"b": 1, "a": {"y": [1, {"k": 2, "j": 1}], "x": "s"}}));
        let b = params(json!({"a": {"x": "s", "y": [1, {"j": 1, "k": 2}]}, "b": 1}));
        assert_eq!(cache_key(Some(&a)), cache_key(Some(&b)));
        assert_eq!(
            cache_key(Some(&a)),
            r#"{"a":{"x":"s","y":[1,{"j":1,"k":2}]},"b":1}"#
        );
    }

    #[test]
    fn test_cache_key_integral_floats() {
        let int = params(json!({"n": 1, "list": [2, 3]}));
        let float = params(json!({"n": 1.0, "list": [2.0, 3]}));
        assert_eq!(cache_key(Some(&int)), cache_key(Some(&float)));

        let fractional = params(json!({"n": 1.5}));
        assert_eq!(cache_key(Some(&fractional)), r#"{"n":1.5}"#);
        assert_ne!(cache_key(Some(&fractional)), cache_key(Some(&int)));
    }

    #[test]
    fn test_constant_fact_value() {
        let mut engine = Engine::new();
        engine.add_fact(Fact::constant("limit", 500));

        let mut almanac = Almanac::new(&engine, None);
        for _ in 0..3 {
            assert_eq!(almanac.fact_value("limit", None, None).unwrap(), json!(500));
        }
    }

    #[test]
    fn test_computed_fact_cached_per_params() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut engine = Engine::new();
        engine.add_fact(counting_fact("account", counter.clone()));

        let mut almanac = Almanac::new(&engine, None);
        let p1 = params(json!({"id": 1}));
        let p2 = params(json!({"id": 2}));

        almanac.fact_value("account", Some(&p1), None).unwrap();
        almanac.fact_value("account", Some(&p1), None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        almanac.fact_value("account", Some(&p2), None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        almanac.fact_value("account", None, None).unwrap();
        almanac.fact_value("account", Some(&Params::new()), None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_cache_fact_recomputed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut engine = Engine::new();
        engine.add_fact(counting_fact("clock", counter.clone()).with_options(FactOptions::no_cache()));

        let mut almanac = Almanac::new(&engine, None);
        almanac.fact_value("clock", None, None).unwrap();
        almanac.fact_value("clock", None, None).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_runtime_fact_takes_precedence() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut engine = Engine::new();
        engine.add_fact(counting_fact("age", counter.clone()));

        let mut runtime = Map::new();
        runtime.insert("age".to_string(), json!(30));
        let mut almanac = Almanac::new(&engine, Some(runtime));

        assert_eq!(almanac.fact_value("age", None, None).unwrap(), json!(30));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_undefined_fact() {
        let engine = Engine::new();
        let mut almanac = Almanac::new(&engine, None);
        assert!(matches!(
            almanac.fact_value("missing", None, None),
            Err(RuleError::UndefinedFact(id)) if id == "missing"
        ));

        let lenient = Engine::with_options(EngineOptions {
            allow_undefined_facts: true,
            ..Default::default()
        });
        let mut almanac = Almanac::new(&lenient, None);
        assert_eq!(almanac.fact_value("missing", None, None).unwrap(), Value::Null);
    }

    #[test]
    fn test_fact_error_not_cached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut engine = Engine::new();
        let calls = counter.clone();
        engine.add_fact(Fact::computed("flaky", move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("backend unavailable")
        }));

        let mut almanac = Almanac::new(&engine, None);
        let err = almanac.fact_value("flaky", None, None).unwrap_err();
        assert_eq!(err.code(), "FACT_COMPUTATION_ERROR");
        assert!(almanac.fact_value("flaky", None, None).is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_path_extraction() {
        let mut engine = Engine::new();
        engine.add_fact(Fact::constant("user", json!({"name": "alice", "profile": {"age": 30}})));

        let mut almanac = Almanac::new(&engine, None);
        assert_eq!(
            almanac.fact_value("user", None, Some(".name")).unwrap(),
            json!("alice")
        );
        // 默认解析器只支持顶层字段
        assert_eq!(
            almanac.fact_value("user", None, Some(".profile.age")).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_fact_depends_on_other_fact() {
        let mut engine = Engine::new();
        engine.add_fact(Fact::constant("base", 10));
        engine.add_fact(Fact::computed("double", |_, almanac| {
            let base = almanac.fact_value("base", None, None)?;
            Ok(json!(base.as_i64().unwrap_or_default() * 2))
        }));

        let mut almanac = Almanac::new(&engine, None);
        assert_eq!(almanac.fact_value("double", None, None).unwrap(), json!(20));
    }

    #[test]
    fn test_add_runtime_fact() {
        let engine = Engine::new();
        let mut almanac = Almanac::new(&engine, None);
        almanac.add_runtime_fact("flag", true);

        assert_eq!(almanac.runtime_fact("flag"), Some(&json!(true)));
        assert_eq!(almanac.fact_value("flag", None, None).unwrap(), json!(true));
    }
}
