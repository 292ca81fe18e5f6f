//! Price history access for regime detection and candidate scoring.
//!
//! Network retrieval lives outside this crate; a driver either implements
//! [`PriceSource`] over its own feed or loads a CSV export.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// One bar of price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Extract the close series from a bar slice.
pub fn closes(bars: &[PriceBar]) -> Vec<Decimal> {
    bars.iter().map(|b| b.close).collect()
}

/// Source of date-ordered price history.
#[cfg_attr(test, mockall::automock)]
pub trait PriceSource: Send + Sync {
    /// Bars for `symbol` with `timestamp <= as_of`, oldest first.
    ///
    /// Unknown symbols yield an empty series.
    fn history(&self, symbol: &str, as_of: DateTime<Utc>) -> Result<Vec<PriceBar>>;

    /// All symbols the source can serve, sorted.
    fn symbols(&self) -> Vec<String>;

    /// Timestamp of the most recent bar across all symbols.
    fn latest_timestamp(&self) -> Option<DateTime<Utc>>;
}

/// CSV price loader.
///
/// Expected CSV format:
/// ```csv
/// timestamp,symbol,high,low,close
/// 2024-01-02T00:00:00Z,SPY,476.36,471.70,472.65
/// ```
#[derive(Debug, Clone, Default)]
pub struct CsvPriceSource {
    series: BTreeMap<String, Vec<PriceBar>>,
}

impl CsvPriceSource {
    /// Load bars from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load bars from CSV content string.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut series: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
        let mut seen: HashSet<(String, DateTime<Utc>)> = HashSet::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let row = CsvRow::parse(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;

            if !seen.insert((row.symbol.clone(), row.bar.timestamp)) {
                anyhow::bail!(
                    "Duplicate bar for {} at {} on line {}",
                    row.symbol,
                    row.bar.timestamp,
                    line_num + 1
                );
            }

            series.entry(row.symbol).or_default().push(row.bar);
        }

        if series.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        for bars in series.values_mut() {
            bars.sort_by_key(|b| b.timestamp);
        }

        Ok(Self { series })
    }

    /// Number of symbols loaded.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Check if the source has no data.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl PriceSource for CsvPriceSource {
    fn history(&self, symbol: &str, as_of: DateTime<Utc>) -> Result<Vec<PriceBar>> {
        Ok(self
            .series
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .take_while(|b| b.timestamp <= as_of)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn symbols(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.series
            .values()
            .filter_map(|bars| bars.last().map(|b| b.timestamp))
            .max()
    }
}

/// Parse a holdings snapshot from `symbol,quantity` CSV content.
///
/// Repeated symbols are summed.
pub fn parse_holdings(content: &str) -> Result<HashMap<String, Decimal>> {
    let mut holdings: HashMap<String, Decimal> = HashMap::new();

    for (line_num, line) in content.lines().enumerate() {
        if line_num == 0 && line.starts_with("symbol") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 2 {
            anyhow::bail!("Expected 2 columns (symbol,quantity) on line {}", line_num + 1);
        }

        let symbol = parts[0].trim().to_string();
        let quantity: Decimal = parts[1]
            .trim()
            .parse()
            .with_context(|| format!("Invalid quantity on line {}: {}", line_num + 1, parts[1]))?;

        *holdings.entry(symbol).or_default() += quantity;
    }

    Ok(holdings)
}

/// Load a holdings snapshot from a CSV file.
pub fn load_holdings<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Decimal>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read holdings file: {}", path.display()))?;
    parse_holdings(&content)
}

/// Last close at or before `as_of` for each symbol that has one.
pub fn latest_prices<'a>(
    source: &dyn PriceSource,
    symbols: impl IntoIterator<Item = &'a String>,
    as_of: DateTime<Utc>,
) -> Result<HashMap<String, Decimal>> {
    let mut prices = HashMap::new();
    for symbol in symbols {
        if let Some(bar) = source.history(symbol, as_of)?.last() {
            prices.insert(symbol.clone(), bar.close);
        }
    }
    Ok(prices)
}

/// Internal struct for parsing CSV rows.
#[derive(Debug)]
struct CsvRow {
    symbol: String,
    bar: PriceBar,
}

impl CsvRow {
    fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 5 {
            anyhow::bail!(
                "Expected 5 columns (timestamp,symbol,high,low,close), got {}",
                parts.len()
            );
        }

        let symbol = parts[1].trim().to_string();
        if symbol.is_empty() {
            anyhow::bail!("Empty symbol");
        }

        Ok(Self {
            symbol,
            bar: PriceBar {
                timestamp: parts[0]
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid timestamp: {}", parts[0]))?,
                high: parts[2]
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid high: {}", parts[2]))?,
                low: parts[3]
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid low: {}", parts[3]))?,
                close: parts[4]
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid close: {}", parts[4]))?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const CSV: &str = r#"timestamp,symbol,high,low,close
2024-01-03T00:00:00Z,SPY,475.0,470.0,472.0
2024-01-02T00:00:00Z,SPY,476.0,471.0,473.0
2024-01-02T00:00:00Z,AAPL,188.0,184.0,185.5
2024-01-04T00:00:00Z,SPY,474.0,469.0,470.5
"#;

    #[test]
    fn test_csv_parsing_sorts_per_symbol() {
        let source = CsvPriceSource::from_csv_content(CSV).unwrap();

        assert_eq!(source.len(), 2);
        assert_eq!(source.symbols(), vec!["AAPL", "SPY"]);

        let as_of = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let spy = source.history("SPY", as_of).unwrap();
        assert_eq!(closes(&spy), vec![dec!(473.0), dec!(472.0), dec!(470.5)]);
    }

    #[test]
    fn test_history_respects_as_of() {
        let source = CsvPriceSource::from_csv_content(CSV).unwrap();

        let as_of = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let spy = source.history("SPY", as_of).unwrap();
        assert_eq!(spy.len(), 2);
        assert_eq!(spy.last().unwrap().close, dec!(472.0));

        assert!(source.history("MSFT", as_of).unwrap().is_empty());
    }

    #[test]
    fn test_latest_timestamp() {
        let source = CsvPriceSource::from_csv_content(CSV).unwrap();
        assert_eq!(
            source.latest_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_duplicate_bar_rejected() {
        let csv = "timestamp,symbol,high,low,close\n\
                   2024-01-02T00:00:00Z,SPY,1,1,1\n\
                   2024-01-02T00:00:00Z,SPY,2,2,2\n";
        assert!(CsvPriceSource::from_csv_content(csv).is_err());
    }

    #[test]
    fn test_malformed_rows_rejected() {
        assert!(CsvPriceSource::from_csv_content("timestamp,symbol,high,low,close\n").is_err());
        assert!(CsvPriceSource::from_csv_content("2024-01-02T00:00:00Z,SPY,1,1\n").is_err());
        assert!(CsvPriceSource::from_csv_content("2024-01-02T00:00:00Z,SPY,x,1,1\n").is_err());
    }

    #[test]
    fn test_parse_holdings() {
        let holdings = parse_holdings("symbol,quantity\nAAPL,10\nGLD,2.5\n\nAAPL,5\n").unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings["AAPL"], dec!(15));
        assert_eq!(holdings["GLD"], dec!(2.5));

        assert!(parse_holdings("symbol,quantity\nAAPL,ten\n").is_err());
        assert!(parse_holdings("AAPL\n").is_err());
    }

    #[test]
    fn test_latest_prices_skips_unknown_symbols() {
        let source = CsvPriceSource::from_csv_content(CSV).unwrap();
        let as_of = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let symbols = vec!["SPY".to_string(), "AAPL".to_string(), "MSFT".to_string()];

        let prices = latest_prices(&source, &symbols, as_of).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["SPY"], dec!(472.0));
        assert_eq!(prices["AAPL"], dec!(185.5));
    }
}
