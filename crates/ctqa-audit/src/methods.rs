//! 审计方法表
//!
//! 厂商字符串到 ROI 测量定义集合的静态映射. 每个厂商的方法都是纯数据,
//! 所有厂商使用同一套统计算法.

use std::collections::HashMap;

use ctqa_core::{Direction, MeasurementDefinition};
use once_cell::sync::Lazy;

/// 未识别厂商使用的键
pub const DEFAULT_METHOD: &str = "DEFAULT";

static METHODS: Lazy<HashMap<&'static str, Vec<MeasurementDefinition>>> = Lazy::new(|| {
    let mut methods = HashMap::new();
    methods.insert(
        "GE MEDICAL SYSTEMS",
        vec![
            MeasurementDefinition::new("audit_one", Direction::North, 75.0, 400.0),
            MeasurementDefinition::new("audit_two", Direction::South, 75.0, 400.0),
            MeasurementDefinition::new("audit_three", Direction::East, 75.0, 400.0),
            MeasurementDefinition::new("audit_four", Direction::West, 75.0, 400.0),
            MeasurementDefinition::new("audit_five", Direction::Center, 0.0, 400.0),
        ],
    );
    methods.insert(
        DEFAULT_METHOD,
        vec![MeasurementDefinition::new(
            "audit_one",
            Direction::Center,
            0.0,
            400.0,
        )],
    );
    methods
});

fn methods_for(manufacturer: &str) -> &'static [MeasurementDefinition] {
    let key = manufacturer.trim().to_uppercase();
    METHODS
        .get(key.as_str())
        .or_else(|| METHODS.get(DEFAULT_METHOD))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// 按厂商获取测量定义. 未识别的厂商返回默认集合 (单个 CENTER).
///
/// 返回值是独立副本, 调用方可以随意修改.
pub fn lookup_methods(manufacturer: &str) -> Vec<MeasurementDefinition> {
    methods_for(manufacturer).to_vec()
}

/// 厂商方法中出现的不同方向, 保持定义顺序
pub fn audit_directions(manufacturer: &str) -> Vec<Direction> {
    let mut directions = Vec::new();
    for definition in methods_for(manufacturer) {
        if !directions.contains(&definition.direction) {
            directions.push(definition.direction);
        }
    }
    directions
}
