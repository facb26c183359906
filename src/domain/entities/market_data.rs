use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, String> {
        for (name, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("Invalid {} price: {}", name, value));
            }
        }
        if high < low {
            return Err(format!("Bar high {} below low {}", high, low));
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(format!("Invalid volume: {}", volume));
        }
        Ok(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Bar width requested from the data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    OneDay,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1Min",
            Timeframe::FiveMinutes => "5Min",
            Timeframe::FifteenMinutes => "15Min",
            Timeframe::OneHour => "1Hour",
            Timeframe::OneDay => "1Day",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Midpoint, falling back to whichever side is quoted.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid > 0.0, self.ask > 0.0) {
            (true, true) => Some((self.bid + self.ask) / 2.0),
            (true, false) => Some(self.bid),
            (false, true) => Some(self.ask),
            (false, false) => None,
        }
    }
}
