//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("未定义的事实: {0}")]
    UndefinedFact(String),

    #[error("未定义的操作符: {0}")]
    UndefinedOperator(String),

    #[error("未定义的操作符装饰器: {0}")]
    UndefinedOperatorDecorator(String),

    #[error("未定义的命名条件: {0}")]
    UndefinedCondition(String),

    #[error("无效的条件: {0}")]
    InvalidCondition(String),

    #[error("事实 {fact} 计算失败: {source}")]
    FactComputation {
        fact: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("规则 {rule} 回调失败: {source}")]
    Callback {
        rule: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("引擎未找到: {0}")]
    EngineNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl RuleError {
    /// 获取错误码，供接入层映射为请求失败
    pub fn code(&self) -> &'static str {
        match self {
            Self::UndefinedFact(_) => "UNDEFINED_FACT",
            Self::UndefinedOperator(_) => "UNDEFINED_OPERATOR",
            Self::UndefinedOperatorDecorator(_) => "UNDEFINED_OPERATOR_DECORATOR",
            Self::UndefinedCondition(_) => "UNDEFINED_CONDITION",
            Self::InvalidCondition(_) => "INVALID_CONDITION",
            Self::FactComputation { .. } => "FACT_COMPUTATION_ERROR",
            Self::Callback { .. } => "CALLBACK_ERROR",
            Self::EngineNotFound(_) => "ENGINE_NOT_FOUND",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }
}
