//! 前向链式规则引擎
//!
//! 提供可嵌入的事实/规则评估能力，支持：
//! - 常量事实与计算事实，单次运行内按参数缓存
//! - all / any / not / 命名条件引用组成的条件树
//! - 可组合的操作符装饰器（如 `caseInsensitive:equal`）
//! - 按优先级执行规则，回调可写入运行时事实或停止运行
//! - JSON 形式的规则与引擎定义

pub mod almanac;
pub mod condition;
pub mod definition;
pub mod engine;
pub mod error;
pub mod fact;
pub mod manager;
pub mod models;
pub mod operators;
pub mod path;
pub mod rule;

pub use almanac::Almanac;
pub use condition::{Condition, LeafCondition};
pub use definition::{EngineDefinition, FactDefinition};
pub use engine::{Engine, EngineOptions, RunResult};
pub use error::{Result, RuleError};
pub use fact::{Fact, FactInfo, FactOptions, Params};
pub use manager::{EngineManager, SharedEngine};
pub use models::{ConditionSpec, Event, RuleSpec};
pub use operators::{Operator, OperatorDecorator, OperatorRegistry};
pub use rule::{Rule, RuleResult};
