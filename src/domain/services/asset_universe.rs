//! Tradable asset universe
//!
//! Equity and crypto symbol pools listed by the broker, filtered to clean
//! symbols and cached for a TTL. A pool that cannot be listed falls back to a
//! fixed list and is retried after a few minutes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::entities::asset::{Asset, AssetClass};
use crate::domain::entities::bot::ScheduleSettings;
use crate::domain::repositories::broker_client::BrokerClient;

pub const DEFAULT_UNIVERSE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const FALLBACK_RETRY_TTL: Duration = Duration::from_secs(5 * 60);
pub const MAX_EQUITIES: usize = 50;
pub const MAX_CRYPTO: usize = 20;

pub const FALLBACK_STOCKS: [&str; 10] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "TSLA", "META", "AMD", "SPY", "QQQ",
];
pub const FALLBACK_CRYPTO: [&str; 6] = [
    "BTC/USD", "ETH/USD", "SOL/USD", "DOGE/USD", "AVAX/USD", "LTC/USD",
];

/// Cache performance statistics
#[derive(Clone, Debug, Default, Serialize)]
pub struct UniverseStats {
    pub hits: u64,
    pub refreshes: u64,
    pub fallbacks: u64,
}

/// Snapshot of tradable symbols.
#[derive(Clone, Debug)]
pub struct AssetUniverse {
    pub stocks: Vec<String>,
    pub crypto: Vec<String>,
    /// Equities the broker only trades in whole shares
    pub whole_shares_only: HashSet<String>,
    pub from_fallback: bool,
    fetched_at: Instant,
    ttl: Duration,
}

impl AssetUniverse {
    pub fn fallback() -> Self {
        Self {
            stocks: FALLBACK_STOCKS.iter().map(|s| s.to_string()).collect(),
            crypto: FALLBACK_CRYPTO.iter().map(|s| s.to_string()).collect(),
            whole_shares_only: HashSet::new(),
            from_fallback: true,
            fetched_at: Instant::now(),
            ttl: FALLBACK_RETRY_TTL,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
            || (self.stocks.is_empty() && self.crypto.is_empty())
    }

    /// Symbols eligible right now given the session state and schedule.
    pub fn candidates(&self, market_open: bool, schedule: &ScheduleSettings) -> Vec<&str> {
        let mut pool: Vec<&str> = Vec::new();
        if market_open && schedule.trade_stocks {
            pool.extend(self.stocks.iter().map(String::as_str));
        }
        if schedule.trade_crypto && (market_open || !schedule.market_hours_only) {
            pool.extend(self.crypto.iter().map(String::as_str));
        }
        pool
    }

    pub fn pick<R: Rng + ?Sized>(
        &self,
        market_open: bool,
        schedule: &ScheduleSettings,
        rng: &mut R,
    ) -> Option<String> {
        self.candidates(market_open, schedule)
            .choose(rng)
            .map(|s| s.to_string())
    }

    pub fn is_fractionable(&self, symbol: &str) -> bool {
        !self.whole_shares_only.contains(symbol)
    }
}

fn is_plain_equity_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_usd_crypto_pair(symbol: &str) -> bool {
    match symbol.split_once('/') {
        Some((base, quote)) => {
            quote == "USD" && !base.is_empty() && base.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

fn keep_asset(asset: &Asset, class: AssetClass) -> bool {
    asset.class == class
        && asset.tradable
        && asset.is_active()
        && match class {
            AssetClass::UsEquity => is_plain_equity_symbol(&asset.symbol),
            AssetClass::Crypto => is_usd_crypto_pair(&asset.symbol),
        }
}

/// Keeps tradable, active assets with clean symbols, in broker order, capped at `limit`.
pub fn filter_assets(assets: Vec<Asset>, class: AssetClass, limit: usize) -> Vec<Asset> {
    assets
        .into_iter()
        .filter(|a| keep_asset(a, class))
        .take(limit)
        .collect()
}

/// Broker-backed symbol universe with a TTL cache.
pub struct AssetUniverseService {
    broker: Arc<dyn BrokerClient>,
    cache: RwLock<Option<AssetUniverse>>,
    ttl: Duration,
    stats: RwLock<UniverseStats>,
}

impl AssetUniverseService {
    pub fn new(broker: Arc<dyn BrokerClient>, ttl: Duration) -> Self {
        Self {
            broker,
            cache: RwLock::new(None),
            ttl,
            stats: RwLock::new(UniverseStats::default()),
        }
    }

    pub async fn is_stale(&self) -> bool {
        self.cache
            .read()
            .await
            .as_ref()
            .map_or(true, AssetUniverse::is_stale)
    }

    /// Cached universe, refreshed first when stale.
    pub async fn current(&self) -> AssetUniverse {
        {
            let cache = self.cache.read().await;
            if let Some(universe) = cache.as_ref().filter(|u| !u.is_stale()) {
                self.stats.write().await.hits += 1;
                return universe.clone();
            }
        }
        self.refresh().await
    }

    /// Fetches both pools from the broker, falling back per pool on failure.
    pub async fn refresh(&self) -> AssetUniverse {
        let stocks = self.fetch_pool(AssetClass::UsEquity, MAX_EQUITIES).await;
        let crypto = self.fetch_pool(AssetClass::Crypto, MAX_CRYPTO).await;

        let from_fallback = stocks.is_none() || crypto.is_none();
        let whole_shares_only = stocks
            .iter()
            .flatten()
            .chain(crypto.iter().flatten())
            .filter(|a| !a.fractionable)
            .map(|a| a.symbol.clone())
            .collect();
        let symbols = |pool: Option<Vec<Asset>>, fallback: &[&str]| -> Vec<String> {
            match pool {
                Some(assets) => assets.into_iter().map(|a| a.symbol).collect(),
                None => fallback.iter().map(|s| s.to_string()).collect(),
            }
        };
        let universe = AssetUniverse {
            stocks: symbols(stocks, &FALLBACK_STOCKS),
            crypto: symbols(crypto, &FALLBACK_CRYPTO),
            whole_shares_only,
            from_fallback,
            fetched_at: Instant::now(),
            ttl: if from_fallback { FALLBACK_RETRY_TTL.min(self.ttl) } else { self.ttl },
        };

        {
            let mut stats = self.stats.write().await;
            stats.refreshes += 1;
            if from_fallback {
                stats.fallbacks += 1;
            }
        }

        info!(
            stocks = universe.stocks.len(),
            crypto = universe.crypto.len(),
            from_fallback,
            ttl_secs = universe.ttl.as_secs(),
            "Asset universe refreshed"
        );

        *self.cache.write().await = Some(universe.clone());
        universe
    }

    async fn fetch_pool(&self, class: AssetClass, limit: usize) -> Option<Vec<Asset>> {
        match self.broker.list_assets(class).await {
            Ok(assets) => {
                let listed = assets.len();
                let symbols = filter_assets(assets, class, limit);
                debug!(
                    asset_class = %class,
                    listed,
                    kept = symbols.len(),
                    "Filtered asset listing"
                );
                if symbols.is_empty() {
                    warn!(asset_class = %class, "Asset listing empty after filtering, using fallback list");
                    None
                } else {
                    Some(symbols)
                }
            }
            Err(e) => {
                warn!(asset_class = %class, error = %e, "Asset listing failed, using fallback list");
                None
            }
        }
    }

    pub async fn stats(&self) -> UniverseStats {
        self.stats.read().await.clone()
    }
}
