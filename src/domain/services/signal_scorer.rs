//! Composite signal scoring.
//!
//! Indicator readings feed additive rules around a neutral score of 50. Each
//! rule belongs to a strategy kind, so disabling a strategy removes its rules
//! and a strategy's weight scales its points. The clamped score, the number of
//! rules that fired ("strength") and the bot mode decide BUY/SELL/HOLD.

use chrono::Utc;
use thiserror::Error;

use crate::domain::entities::analysis::{
    IndicatorSnapshot, MarketCondition, Signal, TechnicalAnalysis,
};
use crate::domain::entities::bot::{BotConfig, StrategyKind};
use crate::domain::entities::market_data::Bar;
use crate::domain::services::indicators::compute_snapshot;

/// Bars needed before a symbol is scored at all.
pub const MIN_BARS_FOR_ANALYSIS: usize = 30;

const NEUTRAL_SCORE: f64 = 50.0;
const MIN_CONFIDENCE: f64 = 0.50;
const MAX_CONFIDENCE: f64 = 0.95;
const VOLATILE_ATR_RATIO: f64 = 0.04;
const TREND_SMA_SPREAD: f64 = 0.01;
const VOLUME_SPIKE_RATIO: f64 = 1.5;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Insufficient bars for {symbol}: need {required}, have {available}")]
    InsufficientData {
        symbol: String,
        required: usize,
        available: usize,
    },
}

/// Score and strength before the mode thresholds are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub strength: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SignalScorer;

impl SignalScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        symbol: &str,
        bars: &[Bar],
        config: &BotConfig,
    ) -> Result<TechnicalAnalysis, AnalysisError> {
        let insufficient = || AnalysisError::InsufficientData {
            symbol: symbol.to_string(),
            required: MIN_BARS_FOR_ANALYSIS,
            available: bars.len(),
        };
        if bars.len() < MIN_BARS_FOR_ANALYSIS {
            return Err(insufficient());
        }
        let indicators = compute_snapshot(bars).ok_or_else(insufficient)?;

        let breakdown = self.score(&indicators, config);
        let (signal, confidence) = self.classify(breakdown, config);
        let market_condition = self.market_condition(&indicators);

        Ok(TechnicalAnalysis {
            symbol: symbol.to_string(),
            signal,
            confidence,
            score: breakdown.score,
            strength: breakdown.strength,
            indicators,
            market_condition,
            analyzed_at: Utc::now(),
        })
    }

    pub fn score(&self, ind: &IndicatorSnapshot, config: &BotConfig) -> ScoreBreakdown {
        let mut score = NEUTRAL_SCORE;
        let mut strength = 0u32;
        let price = ind.price;

        if let Some(w) = config.strategy_weight(StrategyKind::Rsi) {
            if ind.rsi < 30.0 {
                score += 20.0 * w;
                strength += 1;
            } else if ind.rsi < 40.0 {
                score += 10.0 * w;
            } else if ind.rsi > 70.0 {
                score -= 20.0 * w;
                strength += 1;
            } else if ind.rsi > 60.0 {
                score -= 10.0 * w;
            }
        }

        if let (Some(w), Some(macd)) = (config.strategy_weight(StrategyKind::Macd), ind.macd) {
            if macd.histogram > 0.0 {
                score += 10.0 * w;
                if macd.macd > 0.0 {
                    strength += 1;
                }
            } else if macd.histogram < 0.0 {
                score -= 10.0 * w;
                if macd.macd < 0.0 {
                    strength += 1;
                }
            }
        }

        if let Some(w) = config.strategy_weight(StrategyKind::MovingAverage) {
            if let (Some(sma20), Some(sma50)) = (ind.sma20, ind.sma50) {
                if price > sma20 && sma20 > sma50 {
                    score += 15.0 * w;
                    strength += 1;
                } else if price < sma20 && sma20 < sma50 {
                    score -= 15.0 * w;
                    strength += 1;
                }
            }
            if let (Some(ema12), Some(ema26)) = (ind.ema12, ind.ema26) {
                if ema12 > ema26 {
                    score += 5.0 * w;
                } else {
                    score -= 5.0 * w;
                }
            }
        }

        if let (Some(w), Some(bands)) =
            (config.strategy_weight(StrategyKind::Bollinger), ind.bollinger)
        {
            if price <= bands.lower {
                score += 15.0 * w;
                strength += 1;
            } else if price >= bands.upper {
                score -= 15.0 * w;
                strength += 1;
            }
        }

        if let (Some(w), Some(avg)) = (config.strategy_weight(StrategyKind::Volume), ind.avg_volume)
        {
            // Volume confirms whichever way the other rules already lean
            if avg > 0.0 && ind.volume > avg * VOLUME_SPIKE_RATIO && score != NEUTRAL_SCORE {
                if score > NEUTRAL_SCORE {
                    score += 5.0 * w;
                } else {
                    score -= 5.0 * w;
                }
                strength += 1;
            }
        }

        ScoreBreakdown {
            score: score.clamp(0.0, 100.0),
            strength,
        }
    }

    /// Map a score to a signal and confidence for the configured mode.
    pub fn classify(&self, breakdown: ScoreBreakdown, config: &BotConfig) -> (Signal, f64) {
        let (buy_at, sell_at) = config.mode.score_thresholds();
        let min_strength = config.mode.min_signal_strength();
        let ScoreBreakdown { score, strength } = breakdown;

        let signal = if score >= buy_at && strength >= min_strength {
            Signal::Buy
        } else if score <= sell_at && strength >= min_strength {
            Signal::Sell
        } else {
            Signal::Hold
        };

        let confidence = match signal {
            Signal::Hold => MIN_CONFIDENCE,
            _ => (0.5 + (score - NEUTRAL_SCORE).abs() / 100.0 + 0.05 * strength as f64)
                .clamp(MIN_CONFIDENCE, MAX_CONFIDENCE),
        };

        (signal, confidence)
    }

    pub fn market_condition(&self, ind: &IndicatorSnapshot) -> MarketCondition {
        if let Some(atr) = ind.atr {
            if ind.price > 0.0 && atr / ind.price > VOLATILE_ATR_RATIO {
                return MarketCondition::Volatile;
            }
        }
        match (ind.sma20, ind.sma50) {
            (Some(fast), Some(slow)) if slow > 0.0 => {
                let spread = (fast - slow) / slow;
                if spread > TREND_SMA_SPREAD {
                    MarketCondition::Bullish
                } else if spread < -TREND_SMA_SPREAD {
                    MarketCondition::Bearish
                } else {
                    MarketCondition::Sideways
                }
            }
            _ => MarketCondition::Sideways,
        }
    }
}
