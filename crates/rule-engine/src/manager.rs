//! 引擎管理
//!
//! 使用 DashMap 按名称保存引擎实例，支持并发创建、查找、删除和列举。

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::engine::{Engine, EngineOptions};
use crate::error::{Result, RuleError};

/// 共享的引擎句柄
///
/// 运行和停止持有读锁，修改事实、规则或操作符持有写锁。
pub type SharedEngine = Arc<RwLock<Engine>>;

/// 引擎管理器
#[derive(Clone, Default)]
pub struct EngineManager {
    engines: Arc<DashMap<String, SharedEngine>>,
}

impl EngineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// 使用默认选项创建引擎，同名引擎会被替换
    pub fn create_engine(&self, name: &str) -> SharedEngine {
        self.create_engine_with(name, EngineOptions::default())
    }

    #[instrument(skip(self, options))]
    pub fn create_engine_with(&self, name: &str, options: EngineOptions) -> SharedEngine {
        let engine = Arc::new(RwLock::new(Engine::with_options(options).with_name(name)));

        if self.engines.insert(name.to_string(), engine.clone()).is_some() {
            info!("引擎已替换: {}", name);
        } else {
            info!("引擎已创建: {}", name);
        }
        engine
    }

    pub fn get_engine(&self, name: &str) -> Result<SharedEngine> {
        match self.engines.get(name) {
            Some(engine) => Ok(engine.value().clone()),
            None => {
                warn!("引擎不存在: {}", name);
                Err(RuleError::EngineNotFound(name.to_string()))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    /// 删除引擎，已取得的句柄仍可继续使用
    #[instrument(skip(self))]
    pub fn delete_engine(&self, name: &str) -> Result<()> {
        if self.engines.remove(name).is_some() {
            info!("引擎已删除: {}", name);
            Ok(())
        } else {
            warn!("删除不存在的引擎: {}", name);
            Err(RuleError::EngineNotFound(name.to_string()))
        }
    }

    /// 所有引擎（按名称排序）
    pub fn list_engines(&self) -> Vec<(String, SharedEngine)> {
        let mut engines: Vec<(String, SharedEngine)> = self
            .engines
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        engines.sort_by(|a, b| a.0.cmp(&b.0));
        engines
    }

    /// 所有引擎名（已排序）
    pub fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
