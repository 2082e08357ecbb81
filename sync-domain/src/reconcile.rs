//! 字段对账（Reconciliation）
//!
//! 计算把目标记录对齐到期望值所需的最小字段变更集。
//! 只比较期望值中出现的字段，目标上多出的字段保持不动；
//! 变更集为空时调用方应跳过写入，从而让重复投递不产生额外写操作。
//!
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 字段集合（字段名 -> 值）
pub type Fields = BTreeMap<String, Value>;

/// 字段变更封装，包含旧值与新值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChanged<T> {
    pub old: T,
    pub new: T,
}

impl<T> FieldChanged<T> {
    pub fn new(old: T, new: T) -> Self {
        Self { old, new }
    }

    pub fn new_value(&self) -> &T {
        &self.new
    }

    pub fn old_value(&self) -> &T {
        &self.old
    }
}

impl<T> FieldChanged<T>
where
    T: PartialEq,
{
    pub fn is_changed(&self) -> bool {
        self.old != self.new
    }
}

/// 最小变更集
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDelta {
    changes: BTreeMap<String, FieldChanged<Value>>,
}

impl FieldDelta {
    /// 对比当前值与期望值；缺失字段按 null 处理
    pub fn between(current: &Fields, desired: &Fields) -> Self {
        let changes = desired
            .iter()
            .map(|(name, new)| {
                let old = current.get(name).cloned().unwrap_or(Value::Null);
                (name.clone(), FieldChanged::new(old, new.clone()))
            })
            .filter(|(_, change)| change.is_changed())
            .collect();

        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, name: &str) -> Option<&FieldChanged<Value>> {
        self.changes.get(name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    /// 需要写入的新值
    pub fn into_updates(self) -> Fields {
        self.changes
            .into_iter()
            .map(|(name, change)| (name, change.new))
            .collect()
    }
}

/// 便捷构造 `Fields`
pub fn fields<I, K>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_differing_desired_fields_are_changed() {
        let current = fields([
            ("status", json!("Enrolled")),
            ("phone", json!("555")),
            ("untouched", json!(true)),
        ]);
        let desired = fields([
            ("status", json!("Dropped")),
            ("phone", json!("555")),
            ("tracking", json!("1Z")),
        ]);

        let delta = FieldDelta::between(&current, &desired);
        assert_eq!(delta.field_names(), ["status", "tracking"]);
        assert_eq!(delta.get("status").unwrap().old_value(), &json!("Enrolled"));
        assert_eq!(delta.get("tracking").unwrap().old_value(), &Value::Null);

        let updates = delta.into_updates();
        assert_eq!(updates["status"], json!("Dropped"));
        assert!(!updates.contains_key("phone"));
    }

    #[test]
    fn applying_the_delta_converges() {
        let mut current = fields([("status", json!("Started"))]);
        let desired = fields([("status", json!("Completed")), ("grade", json!("P"))]);

        let delta = FieldDelta::between(&current, &desired);
        current.extend(delta.into_updates());
        assert!(FieldDelta::between(&current, &desired).is_empty());
    }

    #[test]
    fn field_changed_detects_change() {
        assert!(FieldChanged::new(1, 2).is_changed());
        assert!(!FieldChanged::new("a", "a").is_changed());
    }
}
