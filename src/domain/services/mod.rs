pub mod asset_universe;
pub mod indicators;
pub mod market_hours;
pub mod metrics;
pub mod order_executor;
pub mod position_sizer;
pub mod risk_gate;
pub mod signal_scorer;
