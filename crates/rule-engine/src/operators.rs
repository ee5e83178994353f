//! 操作符注册表
//!
//! 操作符是 (事实值, 条件值) -> bool 的二元谓词；装饰器包装下一个操作符，
//! 可以在委托前改写输入或结果。操作符字符串形如 `dec1:dec2:base`。

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RuleError};

/// 操作符函数签名
pub type OperatorFn = dyn Fn(&Value, &Value) -> bool + Send + Sync;

/// 装饰器函数签名，`next` 为被包装的操作符
pub type DecoratorFn = dyn Fn(&Value, &Value, &OperatorFn) -> bool + Send + Sync;

pub type Operator = Arc<OperatorFn>;
pub type OperatorDecorator = Arc<DecoratorFn>;

/// 操作符字符串中装饰器与基础操作符的分隔符
pub const DECORATOR_SEPARATOR: char = ':';

pub const EQUAL: &str = "equal";
pub const NOT_EQUAL: &str = "notEqual";
pub const LESS_THAN: &str = "lessThan";
pub const LESS_THAN_INCLUSIVE: &str = "lessThanInclusive";
pub const GREATER_THAN: &str = "greaterThan";
pub const GREATER_THAN_INCLUSIVE: &str = "greaterThanInclusive";

/// 操作符与装饰器注册表
#[derive(Clone)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
    decorators: HashMap<String, OperatorDecorator>,
}

impl OperatorRegistry {
    /// 创建注册表并安装内置比较操作符
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.install_builtins();
        registry
    }

    /// 创建空注册表
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
            decorators: HashMap::new(),
        }
    }

    fn install_builtins(&mut self) {
        self.register(EQUAL, |a, b| equal(a, b));
        self.register(NOT_EQUAL, |a, b| !equal(a, b));
        self.register(LESS_THAN, |a, b| compare(a, b) == Ordering::Less);
        self.register(LESS_THAN_INCLUSIVE, |a, b| compare(a, b) != Ordering::Greater);
        self.register(GREATER_THAN, |a, b| compare(a, b) == Ordering::Greater);
        self.register(GREATER_THAN_INCLUSIVE, |a, b| compare(a, b) != Ordering::Less);
    }

    /// 注册操作符，同名操作符会被替换
    pub fn register<F>(&mut self, name: impl Into<String>, op: F)
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.operators.insert(name.into(), Arc::new(op));
    }

    pub fn unregister(&mut self, name: &str) -> Option<Operator> {
        self.operators.remove(name)
    }

    /// 注册装饰器，同名装饰器会被替换
    pub fn register_decorator<F>(&mut self, name: impl Into<String>, decorator: F)
    where
        F: Fn(&Value, &Value, &OperatorFn) -> bool + Send + Sync + 'static,
    {
        self.decorators.insert(name.into(), Arc::new(decorator));
    }

    pub fn unregister_decorator(&mut self, name: &str) -> Option<OperatorDecorator> {
        self.decorators.remove(name)
    }

    /// 查找基础操作符
    pub fn get(&self, name: &str) -> Option<Operator> {
        self.operators.get(name).cloned()
    }

    pub fn get_decorator(&self, name: &str) -> Option<OperatorDecorator> {
        self.decorators.get(name).cloned()
    }

    /// 已注册的操作符名（已排序）
    pub fn operator_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operators.keys().cloned().collect();
        names.sort();
        names
    }

    /// 已注册的装饰器名（已排序）
    pub fn decorator_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.decorators.keys().cloned().collect();
        names.sort();
        names
    }

    /// 解析操作符字符串为可调用的操作符
    ///
    /// 最右侧片段为基础操作符，其余片段为装饰器。所有装饰器先全部解析，
    /// 任一缺失即失败；随后从右向左组合：离基础操作符最近的装饰器在最内层，
    /// 最左侧的装饰器在最外层并最先执行。
    pub fn resolve(&self, operator: &str) -> Result<Operator> {
        let mut segments: Vec<&str> = operator.split(DECORATOR_SEPARATOR).collect();
        // split 至少产生一个片段
        let base_name = segments.pop().unwrap_or_default();

        let base = self
            .get(base_name)
            .ok_or_else(|| RuleError::UndefinedOperator(base_name.to_string()))?;

        let decorators = segments
            .iter()
            .map(|name| {
                self.get_decorator(name)
                    .ok_or_else(|| RuleError::UndefinedOperatorDecorator(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(decorators.into_iter().rev().fold(base, |next, decorator| {
            let composed: Operator =
                Arc::new(move |fact: &Value, value: &Value| decorator(fact, value, next.as_ref()));
            composed
        }))
    }

    /// 安装扩展操作符与装饰器
    pub fn install_extended(&mut self) {
        self.register("in", |fact, value| in_list(fact, value));
        self.register("notIn", |fact, value| !in_list(fact, value));
        self.register("contains", contains);
        self.register("doesNotContain", |fact, value| !contains(fact, value));
        self.register("startsWith", |fact, value| match (fact, value) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        });
        self.register("endsWith", |fact, value| match (fact, value) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        });

        let patterns = RegexCache::default();
        self.register("matches", move |fact, value| patterns.is_match(fact, value));

        self.register_decorator("someFact", |fact, value, next| match fact {
            Value::Array(items) => items.iter().any(|item| next(item, value)),
            _ => false,
        });
        self.register_decorator("someValue", |fact, value, next| match value {
            Value::Array(items) => items.iter().any(|item| next(fact, item)),
            _ => false,
        });
        self.register_decorator("everyFact", |fact, value, next| match fact {
            Value::Array(items) => items.iter().all(|item| next(item, value)),
            _ => false,
        });
        self.register_decorator("everyValue", |fact, value, next| match value {
            Value::Array(items) => items.iter().all(|item| next(fact, item)),
            _ => false,
        });
        self.register_decorator("swap", |fact, value, next| next(value, fact));
        self.register_decorator("not", |fact, value, next| !next(fact, value));
        self.register_decorator("caseInsensitive", |fact, value, next| match (fact, value) {
            (Value::String(a), Value::String(b)) => next(
                &Value::String(a.to_lowercase()),
                &Value::String(b.to_lowercase()),
            ),
            _ => next(fact, value),
        });
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.operator_names())
            .field("decorators", &self.decorator_names())
            .finish()
    }
}

/// 相等比较
///
/// 两侧均为字符串时做精确比较，否则做深度结构比较。整数之间精确比较；
/// 任一侧为浮点数时按 f64 比较，因此 100 与 100.0 相等。
pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, x)| y.get(key).is_some_and(|y| equal(x, y)))
        }
        _ => a == b,
    }
}

/// 两侧均为整数时精确比较，任一侧为浮点数时按 f64 比较
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if x.is_f64() || y.is_f64() {
        return x.as_f64() == y.as_f64();
    }
    match (x.as_i64(), y.as_i64()) {
        (Some(x), Some(y)) => x == y,
        // 至少一侧超出 i64，只可能同为 u64 时相等
        _ => x.as_u64().is_some() && x.as_u64() == y.as_u64(),
    }
}

/// 大小比较
///
/// 两侧均为数值时按数值比较，否则两侧均为字符串时按字典序比较；
/// 其余情况无法比较，约定返回 `Ordering::Equal`。
pub fn compare(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// 数值转换，字符串不做解析
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// 列表包含检查 (in)
fn in_list(fact: &Value, list: &Value) -> bool {
    match list {
        Value::Array(items) => items.iter().any(|item| equal(fact, item)),
        _ => false,
    }
}

/// 字符串/数组包含检查
fn contains(fact: &Value, value: &Value) -> bool {
    match (fact, value) {
        (Value::Array(items), _) => items.iter().any(|item| equal(item, value)),
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        _ => false,
    }
}

/// 正则缓存容量，超出时整体清空
const MAX_CACHED_PATTERNS: usize = 256;

/// 按模式缓存编译后的正则
#[derive(Default)]
struct RegexCache {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl RegexCache {
    /// 非法模式视为不匹配
    fn is_match(&self, fact: &Value, pattern: &Value) -> bool {
        let (Value::String(text), Value::String(pattern)) = (fact, pattern) else {
            return false;
        };

        let mut compiled = self.compiled.lock();
        // 模式可能来自事实值（如 swap:matches），限制缓存大小
        if compiled.len() >= MAX_CACHED_PATTERNS && !compiled.contains_key(pattern.as_str()) {
            compiled.clear();
        }
        compiled
            .entry(pattern.clone())
            .or_insert_with(|| Regex::new(pattern).ok())
            .as_ref()
            .is_some_and(|re| re.is_match(text))
    }
}
