//! Asset metadata enrichment
//!
//! When an import auto-creates an asset we only know its ticker. Providers
//! fill in the display name and sector. Enrichment is best effort: a ticker
//! the provider does not know simply stays with its fallback name, and
//! network failures never fail an import.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const YAHOO_QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const MAX_CONCURRENT_LOOKUPS: usize = 8;

/// Metadata looked up for one ticker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub name: String,
    pub sector: Option<String>,
}

/// Source of name/sector metadata for exchange-listed tickers
///
/// `suffix` is the exchange suffix to append to each symbol (".SA" for B3,
/// empty for US listings). Implementations return only the tickers they
/// resolved; absent entries mean "unknown".
pub trait AssetInfoProvider {
    fn lookup(&self, tickers: &[String], suffix: &str) -> HashMap<String, AssetInfo>;
}

/// Provider that resolves nothing; used when enrichment is disabled
pub struct NullInfoProvider;

impl AssetInfoProvider for NullInfoProvider {
    fn lookup(&self, _tickers: &[String], _suffix: &str) -> HashMap<String, AssetInfo> {
        HashMap::new()
    }
}

/// Yahoo Finance quoteSummary lookup
pub struct YahooInfoProvider {
    client: Client,
}

impl YahooInfoProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("Mozilla/5.0 (compatible; carteira)")
            .build()
            .unwrap_or_default();
        YahooInfoProvider { client }
    }

    fn fetch_one(&self, ticker: &str, suffix: &str) -> Option<AssetInfo> {
        let symbol = format!("{}{}", ticker, suffix);
        let url = format!(
            "{}/{}?modules=price,assetProfile",
            YAHOO_QUOTE_SUMMARY_URL, symbol
        );

        let response: QuoteSummaryResponse = match self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
        {
            Ok(body) => body,
            Err(e) => {
                warn!("Enrichment lookup failed for {}: {}", symbol, e);
                return None;
            }
        };

        let result = response.quote_summary?.result?.into_iter().next()?;
        let name = result
            .price
            .and_then(|p| p.long_name.or(p.short_name))
            .filter(|n| !n.trim().is_empty())?;
        let sector = result.asset_profile.and_then(|p| p.sector);

        debug!("Enriched {}: {} ({:?})", ticker, name, sector);
        Some(AssetInfo { name, sector })
    }
}

impl Default for YahooInfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetInfoProvider for YahooInfoProvider {
    fn lookup(&self, tickers: &[String], suffix: &str) -> HashMap<String, AssetInfo> {
        let results = Mutex::new(HashMap::new());

        // Bounded fan-out: chunks of tickers, one worker per ticker in a chunk
        for chunk in tickers.chunks(MAX_CONCURRENT_LOOKUPS) {
            std::thread::scope(|scope| {
                for ticker in chunk {
                    scope.spawn(|| {
                        if let Some(info) = self.fetch_one(ticker, suffix) {
                            results
                                .lock()
                                .expect("enrichment results mutex poisoned")
                                .insert(ticker.clone(), info);
                        }
                    });
                }
            });
        }

        results.into_inner().expect("enrichment results mutex poisoned")
    }
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: Option<QuoteSummary>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResult {
    price: Option<PriceModule>,
    #[serde(rename = "assetProfile")]
    asset_profile: Option<AssetProfileModule>,
}

#[derive(Debug, Deserialize)]
struct PriceModule {
    #[serde(rename = "longName")]
    long_name: Option<String>,
    #[serde(rename = "shortName")]
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetProfileModule {
    sector: Option<String>,
}
