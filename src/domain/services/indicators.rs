//! Technical indicators over OHLCV bars.
//!
//! All indicators are stateless: each call recomputes from the bars it is
//! given and reports the reading at the latest bar.

use crate::domain::entities::analysis::{BollingerValues, IndicatorSnapshot, MacdValues};
use crate::domain::entities::market_data::Bar;

/// Fraction of the MACD line used as its signal line in place of a 9-period EMA.
pub const MACD_SIGNAL_APPROXIMATION: f64 = 0.9;

pub trait Indicator {
    type Output;

    /// Reading at the last bar, or None when there is not enough history.
    fn latest(&self, bars: &[Bar]) -> Option<Self::Output>;
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

pub struct Sma {
    pub period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Sma { period }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Option<f64> {
        if self.period == 0 || values.len() < self.period {
            return None;
        }
        let window = &values[values.len() - self.period..];
        Some(window.iter().sum::<f64>() / self.period as f64)
    }
}

impl Indicator for Sma {
    type Output = f64;

    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        self.calculate_on_values(&closes(bars))
    }
}

pub struct Ema {
    pub period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Ema { period }
    }

    /// Full EMA series, one value per input from index `period - 1` on.
    pub fn series(&self, values: &[f64]) -> Vec<f64> {
        if self.period == 0 || values.len() < self.period {
            return vec![];
        }
        let multiplier = 2.0 / (self.period as f64 + 1.0);

        // Seeded with the SMA of the first window
        let mut ema = values[..self.period].iter().sum::<f64>() / self.period as f64;
        let mut out = Vec::with_capacity(values.len() - self.period + 1);
        out.push(ema);

        for &value in &values[self.period..] {
            ema = (value - ema) * multiplier + ema;
            out.push(ema);
        }
        out
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Option<f64> {
        self.series(values).last().copied()
    }
}

impl Indicator for Ema {
    type Output = f64;

    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        self.calculate_on_values(&closes(bars))
    }
}

pub struct Rsi {
    pub period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Rsi { period }
    }

    /// Simple-average RSI over the last `period` changes. Neutral 50 when
    /// history is too short.
    pub fn calculate_on_values(&self, values: &[f64]) -> f64 {
        if self.period == 0 || values.len() < self.period + 1 {
            return 50.0;
        }
        let window = &values[values.len() - self.period - 1..];
        let (mut gains, mut losses) = (0.0, 0.0);
        for pair in window.windows(2) {
            let change = pair[1] - pair[0];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        let avg_gain = gains / self.period as f64;
        let avg_loss = losses / self.period as f64;

        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

impl Indicator for Rsi {
    type Output = f64;

    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        Some(self.calculate_on_values(&closes(bars)))
    }
}

pub struct Macd {
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Macd {
            fast_period,
            slow_period,
        }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Option<MacdValues> {
        let fast = Ema::new(self.fast_period).calculate_on_values(values)?;
        let slow = Ema::new(self.slow_period).calculate_on_values(values)?;
        let macd = fast - slow;
        let signal = macd * MACD_SIGNAL_APPROXIMATION;
        Some(MacdValues {
            macd,
            signal,
            histogram: macd - signal,
        })
    }
}

impl Default for Macd {
    fn default() -> Self {
        Macd::new(12, 26)
    }
}

impl Indicator for Macd {
    type Output = MacdValues;

    fn latest(&self, bars: &[Bar]) -> Option<MacdValues> {
        self.calculate_on_values(&closes(bars))
    }
}

pub struct BollingerBands {
    pub period: usize,
    pub std_dev: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        BollingerBands { period, std_dev }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Option<BollingerValues> {
        let middle = Sma::new(self.period).calculate_on_values(values)?;
        let window = &values[values.len() - self.period..];
        let variance =
            window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / self.period as f64;
        let std = variance.sqrt();
        let upper = middle + self.std_dev * std;
        let lower = middle - self.std_dev * std;

        let price = *values.last()?;
        let width = upper - lower;
        let percent_b = if width > f64::EPSILON {
            (price - lower) / width
        } else {
            0.5
        };

        Some(BollingerValues {
            upper,
            middle,
            lower,
            percent_b,
        })
    }
}

impl Indicator for BollingerBands {
    type Output = BollingerValues;

    fn latest(&self, bars: &[Bar]) -> Option<BollingerValues> {
        self.calculate_on_values(&closes(bars))
    }
}

pub struct Atr {
    pub period: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Atr { period }
    }

    fn true_range(bar: &Bar, previous_close: f64) -> f64 {
        (bar.high - bar.low)
            .max((bar.high - previous_close).abs())
            .max((bar.low - previous_close).abs())
    }
}

impl Indicator for Atr {
    type Output = f64;

    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        if self.period == 0 || bars.len() < self.period + 1 {
            return None;
        }
        let window = &bars[bars.len() - self.period - 1..];
        let total: f64 = window
            .windows(2)
            .map(|pair| Self::true_range(&pair[1], pair[0].close))
            .sum();
        Some(total / self.period as f64)
    }
}

/// Average volume over the last `period` bars.
pub fn average_volume(bars: &[Bar], period: usize) -> Option<f64> {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    Sma::new(period).calculate_on_values(&volumes)
}

/// All indicator readings used by the scorer, at the latest bar.
pub fn compute_snapshot(bars: &[Bar]) -> Option<IndicatorSnapshot> {
    let last = bars.last()?;
    let values = closes(bars);

    Some(IndicatorSnapshot {
        price: last.close,
        rsi: Rsi::new(14).calculate_on_values(&values),
        macd: Macd::default().calculate_on_values(&values),
        sma20: Sma::new(20).calculate_on_values(&values),
        sma50: Sma::new(50).calculate_on_values(&values),
        ema12: Ema::new(12).calculate_on_values(&values),
        ema26: Ema::new(26).calculate_on_values(&values),
        bollinger: BollingerBands::new(20, 2.0).calculate_on_values(&values),
        atr: Atr::new(14).latest(bars),
        volume: last.volume,
        avg_volume: average_volume(bars, 20),
    })
}
