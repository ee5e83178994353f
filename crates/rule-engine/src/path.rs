//! 事实值的路径提取

use rules_shared::config::PathResolution;
use serde_json::Value;
use std::sync::Arc;

/// 路径解析函数签名
pub type PathResolverFn = dyn Fn(&Value, &str) -> Value + Send + Sync;

pub type PathResolver = Arc<PathResolverFn>;

/// 默认解析器：仅支持顶层字段
///
/// `".field"` 或 `"field"` 返回对象的 `field` 字段；非对象或字段不存在时返回 null，
/// 多级路径因此也返回 null。
pub fn top_level(value: &Value, path: &str) -> Value {
    let key = path.strip_prefix('.').unwrap_or(path);
    match value {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// 点号分隔的多级路径（如 "user.profile.age" 或 "items.0.name"）
pub fn dotted(value: &Value, path: &str) -> Value {
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return value.clone();
    }

    let mut current = value;
    for part in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(part),
            // 支持数组索引访问
            Value::Array(arr) => part.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }

    current.clone()
}

/// 按配置选择解析器
pub fn resolver_for(resolution: PathResolution) -> PathResolver {
    match resolution {
        PathResolution::TopLevel => Arc::new(top_level),
        PathResolution::Dotted => Arc::new(dotted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "event": {"type": "PURCHASE"},
            "order": {
                "amount": 1000,
                "items": [
                    {"name": "ticket", "price": 500},
                    {"name": "food", "price": 500}
                ]
            },
            "level": "gold"
        })
    }

    #[test]
    fn test_top_level() {
        let value = sample();
        assert_eq!(top_level(&value, ".level"), json!("gold"));
        assert_eq!(top_level(&value, "level"), json!("gold"));
        assert_eq!(top_level(&value, ".event.type"), Value::Null);
        assert_eq!(top_level(&json!([1, 2]), ".0"), Value::Null);
        assert_eq!(top_level(&value, ".missing"), Value::Null);
    }

    #[test]
    fn test_dotted() {
        let value = sample();
        assert_eq!(dotted(&value, "event.type"), json!("PURCHASE"));
        assert_eq!(dotted(&value, ".order.amount"), json!(1000));
        assert_eq!(dotted(&value, "order.items.0.name"), json!("ticket"));
        assert_eq!(dotted(&value, "order.items.5.name"), Value::Null);
        assert_eq!(dotted(&value, "level.deeper"), Value::Null);
    }

    #[test]
    fn test_resolver_for() {
        let value = sample();
        assert_eq!(resolver_for(PathResolution::TopLevel)(&value, "event.type"), Value::Null);
        assert_eq!(
            resolver_for(PathResolution::Dotted)(&value, "event.type"),
            json!("PURCHASE")
        );
    }
}
