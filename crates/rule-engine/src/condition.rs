//! 条件树与递归评估
//!
//! 条件是布尔表达式节点：`All`/`Any` 从左到右短路求值，`Not` 取反，
//! `Reference` 引用引擎中的命名条件，`Leaf` 用操作符比较事实值与条件值。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::almanac::Almanac;
use crate::error::{Result, RuleError};
use crate::fact::Params;
use crate::models::ConditionSpec;

/// 命名条件引用的最大嵌套深度，超过视为循环引用
pub const MAX_REFERENCE_DEPTH: usize = 64;

/// 条件节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionSpec", into = "ConditionSpec")]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    /// 命名条件引用
    Reference(String),
    Leaf(LeafCondition),
}

/// 叶子条件：`operator(fact_value, value)`
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCondition {
    pub fact: String,
    /// 可带装饰器，如 `caseInsensitive:equal`
    pub operator: String,
    pub value: Value,
    pub params: Option<Params>,
    pub path: Option<String>,
}

impl LeafCondition {
    pub fn new(fact: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fact: fact.into(),
            operator: operator.into(),
            value: value.into(),
            params: None,
            path: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl From<LeafCondition> for Condition {
    fn from(leaf: LeafCondition) -> Self {
        Self::Leaf(leaf)
    }
}

impl Condition {
    pub fn all(children: Vec<Condition>) -> Self {
        Self::All(children)
    }

    pub fn any(children: Vec<Condition>) -> Self {
        Self::Any(children)
    }

    pub fn not(child: Condition) -> Self {
        Self::Not(Box::new(child))
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// 叶子条件的简写
    pub fn fact(fact: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Leaf(LeafCondition::new(fact, operator, value))
    }

    /// 验证条件结构：逻辑组不能为空，叶子必须有事实和操作符
    pub fn validate(&self) -> Result<()> {
        self.validate_node("root")
    }

    fn validate_node(&self, path: &str) -> Result<()> {
        match self {
            Self::All(children) | Self::Any(children) => {
                let tag = if matches!(self, Self::All(_)) { "all" } else { "any" };
                if children.is_empty() {
                    return Err(RuleError::InvalidCondition(format!(
                        "逻辑组 '{}.{}' 不能为空",
                        path, tag
                    )));
                }
                for (i, child) in children.iter().enumerate() {
                    child.validate_node(&format!("{}.{}[{}]", path, tag, i))?;
                }
                Ok(())
            }
            Self::Not(child) => child.validate_node(&format!("{}.not", path)),
            Self::Reference(name) if name.is_empty() => Err(RuleError::InvalidCondition(
                format!("条件 '{}' 的引用名不能为空", path),
            )),
            Self::Reference(_) => Ok(()),
            Self::Leaf(leaf) => {
                if leaf.fact.is_empty() || leaf.operator.is_empty() {
                    return Err(RuleError::InvalidCondition(format!(
                        "条件 '{}' 必须同时包含 fact 和 operator",
                        path
                    )));
                }
                Ok(())
            }
        }
    }

    /// 评估条件，任何事实或操作符错误都会中止整棵树的评估
    pub fn evaluate(&self, almanac: &mut Almanac<'_>) -> Result<bool> {
        self.evaluate_node(almanac, "root", 0)
    }

    fn evaluate_node(&self, almanac: &mut Almanac<'_>, path: &str, depth: usize) -> Result<bool> {
        match self {
            Self::Reference(name) => {
                let engine = almanac.engine();
                let Some(condition) = engine.condition(name) else {
                    if engine.options().allow_undefined_conditions {
                        almanac.trace(|| format!("{}: 未定义的命名条件 {} => false", path, name));
                        return Ok(false);
                    }
                    return Err(RuleError::UndefinedCondition(name.clone()));
                };
                if depth >= MAX_REFERENCE_DEPTH {
                    return Err(RuleError::InvalidCondition(format!(
                        "命名条件 '{}' 嵌套过深，可能存在循环引用",
                        name
                    )));
                }
                condition.evaluate_node(almanac, &format!("{}->{}", path, name), depth + 1)
            }
            Self::All(children) => {
                for (i, child) in children.iter().enumerate() {
                    let child_path = format!("{}.all[{}]", path, i);
                    if !child.evaluate_node(almanac, &child_path, depth)? {
                        almanac.trace(|| format!("{}: all 短路 - 子节点 {} 不满足", path, i));
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(children) => {
                for (i, child) in children.iter().enumerate() {
                    let child_path = format!("{}.any[{}]", path, i);
                    if child.evaluate_node(almanac, &child_path, depth)? {
                        almanac.trace(|| format!("{}: any 短路 - 子节点 {} 满足", path, i));
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(child) => Ok(!child.evaluate_node(almanac, &format!("{}.not", path), depth)?),
            Self::Leaf(leaf) => {
                let fact_value =
                    almanac.fact_value(&leaf.fact, leaf.params.as_ref(), leaf.path.as_deref())?;
                let operator = almanac.engine().operators().resolve(&leaf.operator)?;
                let matched = operator(&fact_value, &leaf.value);

                almanac.trace(|| {
                    format!(
                        "{}: {}({}) {} {} => {}",
                        path,
                        leaf.fact,
                        fact_value,
                        leaf.operator,
                        leaf.value,
                        if matched { "MATCHED" } else { "NOT_MATCHED" }
                    )
                });

                Ok(matched)
            }
        }
    }

    fn from_spec(spec: ConditionSpec, path: &str) -> Result<Self> {
        let is_leaf = spec.fact.is_some()
            || spec.operator.is_some()
            || spec.value.is_some()
            || spec.params.is_some()
            || spec.path.is_some();
        let shapes = [
            spec.all.is_some(),
            spec.any.is_some(),
            spec.not.is_some(),
            spec.condition.is_some(),
            is_leaf,
        ]
        .into_iter()
        .filter(|present| *present)
        .count();

        if shapes != 1 {
            return Err(RuleError::InvalidCondition(format!(
                "条件 '{}' 必须且只能包含 all/any/not/condition/fact 中的一种",
                path
            )));
        }

        let ConditionSpec {
            all,
            any,
            not,
            fact,
            operator,
            value,
            params,
            path: fact_path,
            condition,
        } = spec;

        if let Some(children) = all {
            return Ok(Self::All(Self::children_from(children, path, "all")?));
        }
        if let Some(children) = any {
            return Ok(Self::Any(Self::children_from(children, path, "any")?));
        }
        if let Some(child) = not {
            return Ok(Self::not(Self::from_spec(*child, &format!("{}.not", path))?));
        }
        if let Some(name) = condition {
            let reference = Self::Reference(name);
            reference.validate_node(path)?;
            return Ok(reference);
        }

        match (fact, operator) {
            (Some(fact), Some(operator)) => {
                let leaf = Self::Leaf(LeafCondition {
                    fact,
                    operator,
                    value: value.unwrap_or(Value::Null),
                    params,
                    path: fact_path,
                });
                leaf.validate_node(path)?;
                Ok(leaf)
            }
            _ => Err(RuleError::InvalidCondition(format!(
                "条件 '{}' 必须同时包含 fact 和 operator",
                path
            ))),
        }
    }

    fn children_from(children: Vec<ConditionSpec>, path: &str, tag: &str) -> Result<Vec<Self>> {
        if children.is_empty() {
            return Err(RuleError::InvalidCondition(format!(
                "逻辑组 '{}.{}' 不能为空",
                path, tag
            )));
        }
        children
            .into_iter()
            .enumerate()
            .map(|(i, child)| Self::from_spec(child, &format!("{}.{}[{}]", path, tag, i)))
            .collect()
    }
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = RuleError;

    fn try_from(spec: ConditionSpec) -> Result<Self> {
        Self::from_spec(spec, "root")
    }
}

impl From<Condition> for ConditionSpec {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::All(children) => Self {
                all: Some(children.into_iter().map(Into::into).collect()),
                ..Default::default()
            },
            Condition::Any(children) => Self {
                any: Some(children.into_iter().map(Into::into).collect()),
                ..Default::default()
            },
            Condition::Not(child) => Self {
                not: Some(Box::new((*child).into())),
                ..Default::default()
            },
            Condition::Reference(name) => Self {
                condition: Some(name),
                ..Default::default()
            },
            Condition::Leaf(leaf) => Self {
                fact: Some(leaf.fact),
                operator: Some(leaf.operator),
                value: Some(leaf.value),
                params: leaf.params,
                path: leaf.path,
                ..Default::default()
            },
        }
    }
}
