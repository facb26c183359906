pub mod account;
pub mod analysis;
pub mod asset;
pub mod bot;
pub mod market_data;
pub mod order;
