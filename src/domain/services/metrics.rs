use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Running counters for one bot session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotMetrics {
    /// Completed polling cycles, successful or not
    pub cycles: u64,
    /// BUY or SELL signals produced by the scorer
    pub signals_generated: u64,
    pub orders_submitted: u64,
    /// Orders stopped by the risk gate, sizing, or the broker
    pub orders_rejected: u64,
    pub errors: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Moving average of cycle duration in milliseconds
    pub avg_cycle_ms: f64,
}

impl BotMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&mut self, at: DateTime<Utc>, duration_ms: f64) {
        self.cycles += 1;
        self.last_cycle_at = Some(at);
        let n = self.cycles as f64;
        self.avg_cycle_ms += (duration_ms - self.avg_cycle_ms) / n;
    }

    pub fn record_signal(&mut self) {
        self.signals_generated += 1;
    }

    pub fn record_submitted(&mut self) {
        self.orders_submitted += 1;
    }

    pub fn record_rejected(&mut self) {
        self.orders_rejected += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Share of attempted orders that reached the broker (0.0 to 100.0)
    pub fn fill_rate(&self) -> f64 {
        let attempts = self.orders_submitted + self.orders_rejected;
        if attempts == 0 {
            0.0
        } else {
            self.orders_submitted as f64 / attempts as f64 * 100.0
        }
    }

    /// Share of cycles that ended in an error (0.0 to 100.0)
    pub fn error_rate(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.errors as f64 / self.cycles as f64 * 100.0
        }
    }
}
