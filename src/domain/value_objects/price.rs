use serde::{Deserialize, Serialize};

/// Non-negative, finite USD price.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Price must be finite".to_string());
        }
        if value < 0.0 {
            return Err("Price must be non-negative".to_string());
        }
        Ok(Price(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Price {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Price::new(value)
    }
}

impl From<Price> for f64 {
    fn from(price: Price) -> Self {
        price.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_rejects_negative_and_nan() {
        assert_eq!(Price::new(-1.0).unwrap_err(), "Price must be non-negative");
        assert_eq!(Price::new(f64::NAN).unwrap_err(), "Price must be finite");
        assert!(Price::new(0.0).is_ok());
    }

    #[test]
    fn test_price_deserialize_validates() {
        let ok: Result<Price, _> = serde_json::from_str("42.5");
        assert_eq!(ok.unwrap().value(), 42.5);
        let bad: Result<Price, _> = serde_json::from_str("-3.0");
        assert!(bad.is_err());
    }
}
