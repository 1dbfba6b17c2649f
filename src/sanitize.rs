//! Numeric guards shared by the estimators and scorers

use crate::types::EPSILON;

/// 检查数组是否包含无效值 (NaN 或 Inf)
pub fn has_invalid_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_nan() || x.is_infinite())
}

/// 有限值原样返回，否则返回 `fallback`
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// 截断到 [0, 1]，NaN 视为 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// 数值稳定的 logistic 函数
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// 安全除法：分母接近 0 或结果非有限值时返回 `fallback`
pub fn safe_div(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() < EPSILON {
        return fallback;
    }
    finite_or(num / den, fallback)
}
