//! 引擎定义
//!
//! 以 JSON 描述的常量事实、命名条件和规则集合，可整体安装到引擎中。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::condition::Condition;
use crate::engine::Engine;
use crate::error::Result;
use crate::fact::{Fact, FactOptions};
use crate::models::{ConditionSpec, RuleSpec};
use crate::rule::Rule;

/// 常量事实定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactDefinition {
    pub id: String,
    pub value: Value,
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_cache() -> bool {
    true
}

fn default_priority() -> i32 {
    1
}

impl From<&FactDefinition> for Fact {
    fn from(def: &FactDefinition) -> Self {
        Fact::constant(def.id.clone(), def.value.clone()).with_options(FactOptions {
            cache: def.cache,
            priority: def.priority,
        })
    }
}

/// 引擎定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineDefinition {
    #[serde(default)]
    pub facts: Vec<FactDefinition>,
    #[serde(default)]
    pub conditions: BTreeMap<String, ConditionSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl EngineDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 安装到引擎
    ///
    /// 先转换全部条件和规则，任何一项无效时引擎保持不变。
    #[instrument(skip_all, fields(engine = %engine.name()))]
    pub fn apply(&self, engine: &mut Engine) -> Result<()> {
        let conditions = self
            .conditions
            .iter()
            .map(|(name, spec)| Ok((name.clone(), Condition::try_from(spec.clone())?)))
            .collect::<Result<Vec<_>>>()?;
        let rules = self
            .rules
            .iter()
            .map(|spec| Rule::try_from(spec.clone()))
            .collect::<Result<Vec<_>>>()?;

        for fact in &self.facts {
            engine.add_fact(fact.into());
        }
        for (name, condition) in conditions {
            engine.set_condition(name, condition)?;
        }
        for rule in rules {
            engine.add_rule(rule)?;
        }

        info!(
            facts = self.facts.len(),
            conditions = self.conditions.len(),
            rules = self.rules.len(),
            "引擎定义已安装"
        );
        Ok(())
    }
}
