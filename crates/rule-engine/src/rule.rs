//! 规则定义
//!
//! 规则把条件树绑定到事件、优先级以及可选的成功/失败回调。

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::almanac::Almanac;
use crate::condition::Condition;
use crate::error::{Result, RuleError};
use crate::models::{Event, RuleSpec};

/// 规则回调签名
///
/// 回调只能通过 Almanac 写入运行时事实或请求停止，不能修改引擎的其他状态。
pub type RuleCallback =
    dyn Fn(&Event, &mut Almanac<'_>, &RuleResult) -> anyhow::Result<()> + Send + Sync;

pub const DEFAULT_PRIORITY: i32 = 1;

/// 规则
#[derive(Clone)]
pub struct Rule {
    name: String,
    priority: i32,
    condition: Condition,
    event: Event,
    on_success: Option<Arc<RuleCallback>>,
    on_failure: Option<Arc<RuleCallback>>,
}

impl Rule {
    pub fn new(name: impl Into<String>, condition: Condition, event: Event) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            condition,
            event,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 规则满足后调用
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Event, &mut Almanac<'_>, &RuleResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// 规则不满足后调用
    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Event, &mut Almanac<'_>, &RuleResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// 评估规则条件并生成结果
    pub fn evaluate(&self, almanac: &mut Almanac<'_>) -> Result<RuleResult> {
        almanac.begin_trace();
        let success = self.condition.evaluate(almanac)?;

        let event = if almanac.engine().options().replace_facts_in_event_params {
            self.resolve_event_params(almanac)?
        } else {
            self.event.clone()
        };

        Ok(RuleResult {
            name: self.name.clone(),
            priority: self.priority,
            success,
            event,
            trace: almanac.take_trace(),
        })
    }

    /// 将形如 `{"fact": id, "params"?: {...}, "path"?: "..."}` 的事件参数替换为事实值
    fn resolve_event_params(&self, almanac: &mut Almanac<'_>) -> Result<Event> {
        let mut params = Map::with_capacity(self.event.params.len());

        for (key, value) in &self.event.params {
            let resolved = match fact_reference(value) {
                Some((fact, fact_params, path)) => almanac.fact_value(fact, fact_params, path)?,
                None => value.clone(),
            };
            params.insert(key.clone(), resolved);
        }

        Ok(Event {
            event_type: self.event.event_type.clone(),
            params,
        })
    }

    pub(crate) fn callback(&self, success: bool) -> Option<&Arc<RuleCallback>> {
        if success {
            self.on_success.as_ref()
        } else {
            self.on_failure.as_ref()
        }
    }

    /// 纯数据形式，回调不参与序列化
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            name: self.name.clone(),
            priority: self.priority,
            conditions: self.condition.clone().into(),
            event: self.event.clone(),
        }
    }
}

type FactReference<'a> = (&'a str, Option<&'a Map<String, Value>>, Option<&'a str>);

fn fact_reference(value: &Value) -> Option<FactReference<'_>> {
    let object = value.as_object()?;
    let fact = object.get("fact")?.as_str()?;
    let params = object.get("params").and_then(Value::as_object);
    let path = object.get("path").and_then(Value::as_str);
    Some((fact, params, path))
}

impl TryFrom<RuleSpec> for Rule {
    type Error = RuleError;

    fn try_from(spec: RuleSpec) -> Result<Self> {
        let condition = Condition::try_from(spec.conditions)?;
        Ok(Rule::new(spec.name, condition, spec.event).with_priority(spec.priority))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("condition", &self.condition)
            .field("event", &self.event)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// 规则评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub name: String,
    pub priority: i32,
    pub success: bool,
    pub event: Event,
    /// 仅在引擎开启追踪时填充
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineOptions};
    use crate::fact::Fact;
    use serde_json::json;

    #[test]
    fn test_rule_defaults() {
        let rule = Rule::new("r", Condition::fact("a", "equal", 1), Event::new("e"));
        assert_eq!(rule.priority(), DEFAULT_PRIORITY);
        assert!(rule.callback(true).is_none());
        assert!(rule.callback(false).is_none());
    }

    #[test]
    fn test_evaluate_wraps_outcome() {
        let engine = Engine::new();
        let rule = Rule::new("adult", Condition::fact("age", "greaterThan", 17), Event::new("adult"))
            .with_priority(3);

        let mut almanac = Almanac::new(&engine, json!({"age": 20}).as_object().cloned());
        let result = rule.evaluate(&mut almanac).unwrap();

        assert_eq!(result.name, "adult");
        assert_eq!(result.priority, 3);
        assert!(result.success);
        assert_eq!(result.event, Event::new("adult"));
        assert!(result.trace.is_empty());
    }

    #[test]
    fn test_trace_recorded_when_enabled() {
        let engine = Engine::with_options(EngineOptions {
            trace: true,
            ..Default::default()
        });
        let rule = Rule::new(
            "r",
            Condition::all(vec![
                Condition::fact("a", "equal", 1),
                Condition::fact("b", "equal", 2),
            ]),
            Event::new("e"),
        );

        let mut almanac = Almanac::new(&engine, json!({"a": 0, "b": 2}).as_object().cloned());
        let result = rule.evaluate(&mut almanac).unwrap();

        assert!(!result.success);
        assert_eq!(result.trace.len(), 2);
        assert!(result.trace[0].contains("NOT_MATCHED"));
        assert!(result.trace[1].contains("短路"));
    }

    #[test]
    fn test_event_params_replaced_with_facts() {
        let mut engine = Engine::with_options(EngineOptions {
            replace_facts_in_event_params: true,
            ..Default::default()
        });
        engine.add_fact(Fact::constant("user", json!({"name": "alice"})));

        let event = Event::new("greet")
            .with_param("name", json!({"fact": "user", "path": ".name"}))
            .with_param("static", "hello");
        let rule = Rule::new("r", Condition::fact("user", "notEqual", Value::Null), event);

        let mut almanac = Almanac::new(&engine, None);
        let result = rule.evaluate(&mut almanac).unwrap();

        assert_eq!(result.event.params["name"], json!("alice"));
        assert_eq!(result.event.params["static"], json!("hello"));
        // 规则本身的事件不变
        assert_eq!(rule.event().params["name"], json!({"fact": "user", "path": ".name"}));
    }

    #[test]
    fn test_event_params_verbatim_by_default() {
        let engine = Engine::new();
        let event = Event::new("greet").with_param("name", json!({"fact": "user"}));
        let rule = Rule::new("r", Condition::fact("x", "equal", 1), event.clone());

        let mut almanac = Almanac::new(&engine, json!({"x": 1}).as_object().cloned());
        assert_eq!(rule.evaluate(&mut almanac).unwrap().event, event);
    }

    #[test]
    fn test_spec_round_trip() {
        let rule = Rule::new(
            "score",
            Condition::any(vec![Condition::fact("score", "lessThan", 10)]),
            Event::new("low").with_param("level", 1),
        )
        .with_priority(7)
        .on_success(|_, _, _| Ok(()));

        let spec = rule.to_spec();
        assert_eq!(spec.priority, 7);

        let restored = Rule::try_from(spec.clone()).unwrap();
        assert_eq!(restored.to_spec(), spec);
        assert!(restored.callback(true).is_none());
    }
}
