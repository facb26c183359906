//! Bot configuration and in-memory run state.
//!
//! The run state is process-local: a restart drops a running bot and nothing
//! is recovered from storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Widest allowed limit-order offset from the reference price
pub const MAX_LIMIT_OFFSET_PCT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotMode {
    Conservative,
    Balanced,
    Aggressive,
}

impl BotMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CONSERVATIVE" => Some(BotMode::Conservative),
            "BALANCED" => Some(BotMode::Balanced),
            "AGGRESSIVE" => Some(BotMode::Aggressive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Conservative => "CONSERVATIVE",
            BotMode::Balanced => "BALANCED",
            BotMode::Aggressive => "AGGRESSIVE",
        }
    }

    /// Score thresholds as (buy at or above, sell at or below).
    pub fn score_thresholds(&self) -> (f64, f64) {
        match self {
            BotMode::Conservative => (70.0, 30.0),
            BotMode::Balanced => (65.0, 35.0),
            BotMode::Aggressive => (60.0, 40.0),
        }
    }

    /// Minimum number of triggered rules behind a BUY/SELL.
    pub fn min_signal_strength(&self) -> u32 {
        match self {
            BotMode::Aggressive => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    Rsi,
    Macd,
    MovingAverage,
    Bollinger,
    Volume,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Rsi,
        StrategyKind::Macd,
        StrategyKind::MovingAverage,
        StrategyKind::Bollinger,
        StrategyKind::Volume,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            StrategyKind::Rsi => "rsi",
            StrategyKind::Macd => "macd",
            StrategyKind::MovingAverage => "moving_average",
            StrategyKind::Bollinger => "bollinger",
            StrategyKind::Volume => "volume",
        }
    }
}

/// Rolling stats for one strategy, updated every cycle it contributes to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub signals: u64,
    pub executed: u64,
    pub avg_confidence: f64,
}

impl StrategyPerformance {
    pub fn record(&mut self, confidence: f64, executed: bool) {
        self.signals += 1;
        if executed {
            self.executed += 1;
        }
        self.avg_confidence += (confidence - self.avg_confidence) / self.signals as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub kind: StrategyKind,
    pub weight: f64,
    pub enabled: bool,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
    #[serde(default)]
    pub performance: StrategyPerformance,
}

impl StrategyConfig {
    pub fn new(kind: StrategyKind, weight: f64) -> Self {
        Self {
            id: kind.id().to_string(),
            kind,
            weight,
            enabled: true,
            parameters: HashMap::new(),
            performance: StrategyPerformance::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskManagement {
    /// Largest single position as a fraction of equity.
    pub max_position_pct: f64,
    /// Trading halts once equity falls this fraction below the last close.
    pub max_daily_loss_pct: f64,
    pub min_confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingMethod {
    PercentOfEquity,
    PercentOfPortfolio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    pub auto_execute: bool,
    /// Fraction of the sizing base committed per order before confidence scaling.
    pub order_size_pct: f64,
    pub sizing_method: SizingMethod,
    pub max_orders_per_day: u32,
    /// When set, signal entries go out as limit orders this far through the
    /// reference price. Exits always use market orders.
    #[serde(default)]
    pub limit_offset_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub trade_stocks: bool,
    pub trade_crypto: bool,
    /// When set, nothing trades while the equities session is closed.
    pub market_hours_only: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            trade_stocks: true,
            trade_crypto: true,
            market_hours_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub mode: BotMode,
    pub strategies: Vec<StrategyConfig>,
    pub risk_management: RiskManagement,
    pub execution_settings: ExecutionSettings,
    #[serde(default)]
    pub schedule_settings: ScheduleSettings,
}

impl BotConfig {
    /// Preset for `mode`.
    pub fn for_mode(mode: BotMode) -> Self {
        let (max_position_pct, max_daily_loss_pct, min_confidence, order_size_pct, max_orders) =
            match mode {
                BotMode::Conservative => (0.05, 0.02, 0.75, 0.02, 5),
                BotMode::Balanced => (0.10, 0.03, 0.65, 0.05, 10),
                BotMode::Aggressive => (0.20, 0.05, 0.55, 0.10, 20),
            };

        let strategies = vec![
            StrategyConfig::new(StrategyKind::Rsi, 1.0),
            StrategyConfig::new(StrategyKind::Macd, 1.0),
            StrategyConfig::new(StrategyKind::MovingAverage, 1.0),
            StrategyConfig::new(StrategyKind::Bollinger, 1.0),
            StrategyConfig::new(StrategyKind::Volume, 1.0),
        ];

        Self {
            mode,
            strategies,
            risk_management: RiskManagement {
                max_position_pct,
                max_daily_loss_pct,
                min_confidence,
                stop_loss_pct: 0.05,
                take_profit_pct: 0.10,
            },
            execution_settings: ExecutionSettings {
                auto_execute: true,
                order_size_pct,
                sizing_method: SizingMethod::PercentOfEquity,
                max_orders_per_day: max_orders,
                limit_offset_pct: None,
            },
            schedule_settings: ScheduleSettings::default(),
        }
    }

    /// Weight applied to `kind`'s rules, or None when the strategy is disabled.
    /// Strategies missing from the list count with weight 1.0.
    pub fn strategy_weight(&self, kind: StrategyKind) -> Option<f64> {
        match self.strategies.iter().find(|s| s.kind == kind) {
            Some(s) if s.enabled => Some(s.weight),
            Some(_) => None,
            None => Some(1.0),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let risk = &self.risk_management;
        let exec = &self.execution_settings;

        let fractions = [
            ("max_position_pct", risk.max_position_pct),
            ("max_daily_loss_pct", risk.max_daily_loss_pct),
            ("stop_loss_pct", risk.stop_loss_pct),
            ("order_size_pct", exec.order_size_pct),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if !(0.0..=1.0).contains(&risk.min_confidence) {
            return Err(format!(
                "min_confidence must be in [0, 1], got {}",
                risk.min_confidence
            ));
        }
        if !(risk.take_profit_pct > 0.0) {
            return Err(format!(
                "take_profit_pct must be positive, got {}",
                risk.take_profit_pct
            ));
        }
        if let Some(offset) = exec.limit_offset_pct {
            if !(0.0..=MAX_LIMIT_OFFSET_PCT).contains(&offset) {
                return Err(format!(
                    "limit_offset_pct must be in [0, {}], got {}",
                    MAX_LIMIT_OFFSET_PCT, offset
                ));
            }
        }
        if exec.max_orders_per_day == 0 {
            return Err("max_orders_per_day must be at least 1".to_string());
        }
        if let Some(s) = self
            .strategies
            .iter()
            .find(|s| !s.weight.is_finite() || s.weight < 0.0)
        {
            return Err(format!("Strategy {} has invalid weight {}", s.id, s.weight));
        }
        if !self.schedule_settings.trade_stocks && !self.schedule_settings.trade_crypto {
            return Err("At least one of trade_stocks/trade_crypto must be enabled".to_string());
        }
        Ok(())
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::for_mode(BotMode::Balanced)
    }
}

/// Process-global bot state.
#[derive(Debug, Clone, Serialize)]
pub struct BotState {
    pub is_running: bool,
    pub config: BotConfig,
    pub start_time: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
}

impl BotState {
    pub fn idle(config: BotConfig) -> Self {
        Self {
            is_running: false,
            config,
            start_time: None,
            session_id: None,
        }
    }

    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> i64 {
        match (self.is_running, self.start_time) {
            (true, Some(start)) => (now - start).num_seconds().max(0),
            _ => 0,
        }
    }
}
