use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    UsEquity,
    Crypto,
}

impl AssetClass {
    /// Crypto pairs are written `BASE/QUOTE`; everything else is an equity ticker.
    pub fn from_symbol(symbol: &str) -> Self {
        if symbol.contains('/') {
            AssetClass::Crypto
        } else {
            AssetClass::UsEquity
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::UsEquity => "us_equity",
            AssetClass::Crypto => "crypto",
        }
    }

    /// Crypto trades around the clock and is exempt from PDT.
    pub fn trades_continuously(&self) -> bool {
        matches!(self, AssetClass::Crypto)
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub class: AssetClass,
    pub tradable: bool,
    pub fractionable: bool,
    pub status: String,
}

impl Asset {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}
