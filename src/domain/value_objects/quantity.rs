use serde::{Deserialize, Serialize};

/// Order or position size in shares/coins.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Quantity must be finite".to_string());
        }
        if value < 0.0 {
            return Err("Quantity must be non-negative".to_string());
        }
        Ok(Quantity(value))
    }

    pub fn zero() -> Self {
        Quantity(0.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 <= f64::EPSILON
    }

    /// Round down to `decimals` places. Brokers reject sizes above what was
    /// affordable, so sizing never rounds up.
    pub fn floor_to(&self, decimals: u32) -> Quantity {
        let factor = 10f64.powi(decimals as i32);
        Quantity((self.0 * factor).floor() / factor)
    }

    pub fn min(&self, other: Quantity) -> Quantity {
        if other.0 < self.0 {
            other
        } else {
            *self
        }
    }

    /// Wire representation: trailing zeros trimmed, never scientific notation.
    pub fn to_order_string(&self) -> String {
        let formatted = format!("{:.9}", self.0);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}
