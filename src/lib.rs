//! Paper-trading bot
//!
//! Polls a broker's paper account, scores one symbol per cycle with a set of
//! technical indicators, and places risk-checked market orders. A small JSON
//! API controls the bot and exposes its activity.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod secrets;
pub mod task_runner;
