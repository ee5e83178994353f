//! 规则引擎
//!
//! 引擎持有事实表、按优先级排序的规则列表、操作符注册表和命名条件表。
//! 每次运行创建新的 Almanac，按优先级依次评估规则并收集结果。
//!
//! 运行只需要 `&self`；在运行过程中修改规则表或事实表需要 `&mut self`，
//! 因而被借用规则拒绝。经由 [`EngineManager`](crate::EngineManager) 共享时，
//! 运行持有读锁，修改持有写锁。

use rules_shared::config::{EngineSettings, PathResolution};
use rules_shared::observability::metrics;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::almanac::Almanac;
use crate::condition::Condition;
use crate::error::{Result, RuleError};
use crate::fact::{Fact, FactInfo};
use crate::models::{Event, RuleSpec};
use crate::operators::{OperatorFn, OperatorRegistry};
use crate::path::{self, PathResolver};
use crate::rule::{Rule, RuleResult};

pub const DEFAULT_ENGINE_NAME: &str = "default";

/// 引擎选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// 未注册的事实返回 null 而不是报错
    pub allow_undefined_facts: bool,
    /// 未注册的命名条件视为不满足而不是报错
    pub allow_undefined_conditions: bool,
    /// 将事件参数中的事实引用替换为事实值
    pub replace_facts_in_event_params: bool,
    /// 安装扩展操作符和装饰器
    pub extended_operators: bool,
    pub path_resolution: PathResolution,
    /// 在规则结果中记录评估追踪
    pub trace: bool,
}

impl From<&EngineSettings> for EngineOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            allow_undefined_facts: settings.allow_undefined_facts,
            allow_undefined_conditions: settings.allow_undefined_conditions,
            replace_facts_in_event_params: settings.replace_facts_in_event_params,
            extended_operators: settings.extended_operators,
            path_resolution: settings.path_resolution,
            trace: settings.trace,
        }
    }
}

/// 规则引擎
pub struct Engine {
    name: String,
    facts: HashMap<String, Fact>,
    /// 按优先级降序，同优先级保持插入顺序
    rules: Vec<Rule>,
    operators: OperatorRegistry,
    conditions: HashMap<String, Condition>,
    options: EngineOptions,
    path_resolver: PathResolver,
    stop_requested: AtomicBool,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let mut operators = OperatorRegistry::new();
        if options.extended_operators {
            operators.install_extended();
        }

        Self {
            name: DEFAULT_ENGINE_NAME.to_string(),
            facts: HashMap::new(),
            rules: Vec::new(),
            operators,
            conditions: HashMap::new(),
            path_resolver: path::resolver_for(options.path_resolution),
            options,
            stop_requested: AtomicBool::new(false),
        }
    }

    /// 设置引擎名，用于日志和指标
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // ==================== 事实 ====================

    /// 注册事实，同 id 的事实会被替换
    pub fn add_fact(&mut self, fact: Fact) {
        debug!(engine = %self.name, fact = fact.id(), "事实已注册");
        self.facts.insert(fact.id().to_string(), fact);
    }

    pub fn remove_fact(&mut self, id: &str) -> Option<Fact> {
        self.facts.remove(id)
    }

    pub fn fact(&self, id: &str) -> Option<&Fact> {
        self.facts.get(id)
    }

    /// 事实元数据（按 id 排序）
    pub fn facts(&self) -> Vec<FactInfo> {
        let mut facts: Vec<FactInfo> = self.facts.values().map(Fact::info).collect();
        facts.sort_by(|a, b| a.id.cmp(&b.id));
        facts
    }

    // ==================== 规则 ====================

    /// 添加规则并按优先级降序重新排序（稳定排序）
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        rule.condition().validate()?;

        debug!(engine = %self.name, rule = rule.name(), priority = rule.priority(), "规则已添加");
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Ok(())
    }

    /// 从纯数据形式添加规则
    pub fn add_rule_spec(&mut self, spec: RuleSpec) -> Result<()> {
        let rule = Rule::try_from(spec)?;
        self.add_rule(rule)
    }

    /// 删除所有同名规则，返回删除数量
    pub fn remove_rule(&mut self, name: &str) -> usize {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != name);
        let removed = before - self.rules.len();

        if removed == 0 {
            warn!(engine = %self.name, rule = name, "删除不存在的规则");
        }
        removed
    }

    /// 当前执行顺序下的规则
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// 按名称查找第一条规则
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    pub fn rule_specs(&self) -> Vec<RuleSpec> {
        self.rules.iter().map(Rule::to_spec).collect()
    }

    // ==================== 操作符 ====================

    pub fn add_operator<F>(&mut self, name: impl Into<String>, op: F)
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.operators.register(name, op);
    }

    pub fn remove_operator(&mut self, name: &str) -> bool {
        self.operators.unregister(name).is_some()
    }

    pub fn add_operator_decorator<F>(&mut self, name: impl Into<String>, decorator: F)
    where
        F: Fn(&Value, &Value, &OperatorFn) -> bool + Send + Sync + 'static,
    {
        self.operators.register_decorator(name, decorator);
    }

    pub fn remove_operator_decorator(&mut self, name: &str) -> bool {
        self.operators.unregister_decorator(name).is_some()
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    // ==================== 命名条件 ====================

    /// 设置可被规则引用的命名条件
    pub fn set_condition(&mut self, name: impl Into<String>, condition: Condition) -> Result<()> {
        condition.validate()?;
        self.conditions.insert(name.into(), condition);
        Ok(())
    }

    pub fn remove_condition(&mut self, name: &str) -> Option<Condition> {
        self.conditions.remove(name)
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.get(name)
    }

    /// 命名条件名（已排序）
    pub fn condition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.conditions.keys().cloned().collect();
        names.sort();
        names
    }

    // ==================== 路径 ====================

    /// 替换路径解析器
    pub fn set_path_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&Value, &str) -> Value + Send + Sync + 'static,
    {
        self.path_resolver = Arc::new(resolver);
    }

    pub(crate) fn extract_path(&self, value: &Value, path: Option<&str>) -> Value {
        match path {
            Some(path) if !path.is_empty() => (self.path_resolver)(value, path),
            _ => value.clone(),
        }
    }

    // ==================== 运行 ====================

    /// 请求停止当前运行，尚未开始评估的规则将被跳过
    ///
    /// 已在进行中的事实计算不会被中断。标志在下次运行开始时复位。
    pub fn stop(&self) {
        info!(engine = %self.name, "收到停止请求");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// 使用运行时事实评估所有规则
    ///
    /// 任一规则的评估或回调出错都会中止整次运行并返回错误，不返回部分结果。
    #[instrument(skip(self, runtime_facts), fields(engine = %self.name, rules = self.rules.len()))]
    pub fn run(&self, runtime_facts: Option<Map<String, Value>>) -> Result<RunResult<'_>> {
        let start = Instant::now();
        self.stop_requested.store(false, Ordering::SeqCst);

        let mut almanac = Almanac::new(self, runtime_facts);
        if let Err(e) = self.run_rules(&mut almanac) {
            warn!(error = %e, code = e.code(), "运行中止");
            metrics::record_run(&self.name, "aborted", start.elapsed().as_secs_f64());
            return Err(e);
        }

        let result = RunResult::from_almanac(almanac);
        info!(
            events = result.events.len(),
            failures = result.failure_events.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "运行完成"
        );
        metrics::record_run(&self.name, "completed", start.elapsed().as_secs_f64());
        Ok(result)
    }

    fn run_rules(&self, almanac: &mut Almanac<'_>) -> Result<()> {
        for rule in &self.rules {
            if self.is_stop_requested() {
                debug!(next_rule = rule.name(), "已请求停止，跳过剩余规则");
                break;
            }

            let result = rule.evaluate(almanac)?;
            metrics::record_rule_evaluation(result.success);
            debug!(rule = rule.name(), priority = rule.priority(), success = result.success, "规则评估完成");

            almanac.push_result(result.clone());
            if let Some(callback) = rule.callback(result.success) {
                callback(&result.event, almanac, &result).map_err(|source| RuleError::Callback {
                    rule: rule.name().to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("facts", &self.facts.len())
            .field("rules", &self.rules.len())
            .field("operators", &self.operators)
            .field("conditions", &self.condition_names())
            .field("options", &self.options)
            .finish()
    }
}

/// 一次运行的结果
pub struct RunResult<'e> {
    pub events: Vec<Event>,
    pub failure_events: Vec<Event>,
    pub rule_results: Vec<RuleResult>,
    pub failure_rule_results: Vec<RuleResult>,
    pub almanac: Almanac<'e>,
}

impl<'e> RunResult<'e> {
    fn from_almanac(almanac: Almanac<'e>) -> Self {
        let (rule_results, failure_rule_results): (Vec<RuleResult>, Vec<RuleResult>) = almanac
            .rule_results()
            .iter()
            .cloned()
            .partition(|r| r.success);

        Self {
            events: rule_results.iter().map(|r| r.event.clone()).collect(),
            failure_events: failure_rule_results.iter().map(|r| r.event.clone()).collect(),
            rule_results,
            failure_rule_results,
            almanac,
        }
    }

    /// 已触发的事件类型，按触发顺序
    pub fn event_types(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.event_type.as_str()).collect()
    }
}

impl fmt::Debug for RunResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunResult")
            .field("events", &self.events)
            .field("failure_events", &self.failure_events)
            .field("rule_results", &self.rule_results)
            .field("failure_rule_results", &self.failure_rule_results)
            .finish()
    }
}
