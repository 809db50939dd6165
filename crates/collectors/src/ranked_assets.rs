//! Ranked-asset list loading.
//!
//! The historical collector's universe comes from an external CSV with a
//! header row and at least `rank`, `name` and `symbol` columns. BTC and the
//! major stablecoins are excluded by default.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Assets never targeted by the historical collector unless overridden.
pub const DEFAULT_EXCLUDED_ASSETS: &[&str] = &[
    "BTC", "USDT", "USDC", "FDUSD", "TUSD", "DAI", "BUSD", "USDD", "USDP", "GUSD", "LUSD",
    "USDX", "EURT", "PYUSD",
];

/// One row of the ranked-asset list.
#[derive(Debug, Clone, Deserialize)]
pub struct RankedAsset {
    pub rank: u32,
    pub name: String,
    pub symbol: String,
}

/// Loads and rank-orders the asset list. Extra CSV columns are ignored;
/// quoting follows RFC 4180.
///
/// # Errors
/// Returns an error when the file is unreadable or a row fails to parse.
pub fn load_ranked_assets(path: impl AsRef<Path>) -> Result<Vec<RankedAsset>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening ranked asset list {}", path.display()))?;

    let mut assets = Vec::new();
    for row in reader.deserialize() {
        let asset: RankedAsset =
            row.with_context(|| format!("parsing ranked asset list {}", path.display()))?;
        assets.push(asset);
    }

    assets.sort_by_key(|a| a.rank);
    Ok(assets)
}

/// The default exclusion set, uppercased.
#[must_use]
pub fn default_exclusions() -> HashSet<String> {
    DEFAULT_EXCLUDED_ASSETS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_orders_by_rank() {
        let file = write_csv("rank,name,symbol\n2,Ethereum,ETH\n1,Bitcoin,BTC\n3,Solana,SOL\n");
        let assets = load_ranked_assets(file.path()).unwrap();

        assert_eq!(
            assets.iter().map(|a| a.symbol.as_str()).collect::<Vec<_>>(),
            vec!["BTC", "ETH", "SOL"]
        );
    }

    #[test]
    fn test_load_handles_quoted_fields() {
        let file = write_csv("rank,name,symbol\n1,\"Wrapped, Staked ETH\",WSTETH\n");
        let assets = load_ranked_assets(file.path()).unwrap();
        assert_eq!(assets[0].name, "Wrapped, Staked ETH");
        assert_eq!(assets[0].symbol, "WSTETH");
    }

    #[test]
    fn test_load_ignores_extra_columns() {
        let file = write_csv("rank,name,symbol,market_cap\n1,Bitcoin,BTC,1000000000\n");
        let assets = load_ranked_assets(file.path()).unwrap();
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn test_load_rejects_bad_rows() {
        let file = write_csv("rank,name,symbol\nnot-a-rank,Bitcoin,BTC\n");
        assert!(load_ranked_assets(file.path()).is_err());
    }

    #[test]
    fn test_default_exclusions_cover_btc_and_stables() {
        let exclusions = default_exclusions();
        assert!(exclusions.contains("BTC"));
        assert!(exclusions.contains("USDT"));
        assert!(exclusions.contains("PYUSD"));
        assert!(!exclusions.contains("ETH"));
    }
}
