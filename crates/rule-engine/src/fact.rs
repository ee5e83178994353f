//! 事实定义
//!
//! 事实是按 id 解析的值来源：常量，或由调用参数与本次运行的 Almanac 计算得出。

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::almanac::Almanac;

/// 事实调用参数
pub type Params = Map<String, Value>;

/// 事实计算函数签名
pub type FactFn = dyn Fn(&Params, &mut Almanac<'_>) -> anyhow::Result<Value> + Send + Sync;

/// 事实选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactOptions {
    /// 是否在单次运行内缓存计算结果
    pub cache: bool,
    pub priority: i32,
}

impl Default for FactOptions {
    fn default() -> Self {
        Self {
            cache: true,
            priority: 1,
        }
    }
}

impl FactOptions {
    /// 禁用缓存，每次访问都重新计算
    pub fn no_cache() -> Self {
        Self {
            cache: false,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone)]
enum FactSource {
    Constant(Value),
    Computed(Arc<FactFn>),
}

/// 事实
#[derive(Clone)]
pub struct Fact {
    id: String,
    source: FactSource,
    options: FactOptions,
}

impl Fact {
    /// 常量事实
    pub fn constant(id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            source: FactSource::Constant(value.into()),
            options: FactOptions::default(),
        }
    }

    /// 计算型事实
    pub fn computed<F>(id: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Params, &mut Almanac<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            source: FactSource::Computed(Arc::new(compute)),
            options: FactOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FactOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cache_enabled(&self) -> bool {
        self.options.cache
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.source, FactSource::Constant(_))
    }

    /// 计算事实值，常量忽略参数
    pub fn evaluate(&self, params: &Params, almanac: &mut Almanac<'_>) -> anyhow::Result<Value> {
        match &self.source {
            FactSource::Constant(value) => Ok(value.clone()),
            FactSource::Computed(compute) => compute(params, almanac),
        }
    }

    /// 接入层使用的元数据
    pub fn info(&self) -> FactInfo {
        FactInfo {
            id: self.id.clone(),
            cache_enabled: self.cache_enabled(),
            priority: self.priority(),
            is_constant: self.is_constant(),
        }
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Fact");
        debug.field("id", &self.id).field("options", &self.options);
        match &self.source {
            FactSource::Constant(value) => debug.field("constant", value),
            FactSource::Computed(_) => debug.field("computed", &true),
        };
        debug.finish()
    }
}

/// 事实元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactInfo {
    pub id: String,
    pub cache_enabled: bool,
    pub priority: i32,
    pub is_constant: bool,
}
