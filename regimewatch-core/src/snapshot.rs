//! Indicator snapshot — an immutable, point-in-time view of tracked instruments.
//!
//! Snapshots are produced by an external data collector. The engine only
//! queries them by symbol and window; every rule and regime read is a pure
//! function of one snapshot. Non-finite values are treated as absent.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MissingMetricError;

/// Symbols tracked by the default rule catalogue.
pub mod symbols {
    pub const SPY: &str = "SPY";
    pub const QQQ: &str = "QQQ";
    pub const IWM: &str = "IWM";
    pub const TNX: &str = "^TNX";
    pub const TLT: &str = "TLT";
    pub const HYG: &str = "HYG";
    pub const VIX: &str = "^VIX";
    pub const DXY: &str = "DX-Y.NYB";
    pub const GLD: &str = "GLD";
    pub const BTC: &str = "BTC-USD";

    pub const ALL: [&str; 10] = [SPY, QQQ, IWM, TNX, TLT, HYG, VIX, DXY, GLD, BTC];
}

/// Return window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDay,
}

impl Window {
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::OneDay => "1d",
            Window::FiveDay => "5d",
        }
    }
}

/// A single field of a symbol's metrics, used for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Level,
    PreviousLevel,
    Return(Window),
    High52w,
    Low52w,
    Sma200,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Level => write!(f, "level"),
            Metric::PreviousLevel => write!(f, "previous_level"),
            Metric::Return(window) => write!(f, "return_{}", window.as_str()),
            Metric::High52w => write!(f, "high_52w"),
            Metric::Low52w => write!(f, "low_52w"),
            Metric::Sma200 => write!(f, "sma_200"),
        }
    }
}

/// Metrics for one instrument. Returns are in percent (−3.0 = −3%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetrics {
    pub level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_1d_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_5d_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_52w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_52w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sma_200: Option<f64>,
}

impl SymbolMetrics {
    /// Metrics with only the current level set.
    pub fn at_level(level: f64) -> Self {
        Self {
            level,
            previous_level: None,
            change_1d_pct: None,
            change_5d_pct: None,
            high_52w: None,
            low_52w: None,
            sma_200: None,
        }
    }

    pub fn with_previous_level(mut self, previous: f64) -> Self {
        self.previous_level = Some(previous);
        self
    }

    pub fn with_return(mut self, window: Window, pct: f64) -> Self {
        match window {
            Window::OneDay => self.change_1d_pct = Some(pct),
            Window::FiveDay => self.change_5d_pct = Some(pct),
        }
        self
    }

    pub fn with_high_52w(mut self, high: f64) -> Self {
        self.high_52w = Some(high);
        self
    }

    pub fn with_low_52w(mut self, low: f64) -> Self {
        self.low_52w = Some(low);
        self
    }

    pub fn with_sma_200(mut self, sma: f64) -> Self {
        self.sma_200 = Some(sma);
        self
    }

    fn field(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Level => Some(self.level),
            Metric::PreviousLevel => self.previous_level,
            Metric::Return(Window::OneDay) => self.change_1d_pct,
            Metric::Return(Window::FiveDay) => self.change_5d_pct,
            Metric::High52w => self.high_52w,
            Metric::Low52w => self.low_52w,
            Metric::Sma200 => self.sma_200,
        }
    }
}

/// Point-in-time view of all tracked instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    timestamp: DateTime<Utc>,
    metrics: BTreeMap<String, SymbolMetrics>,
}

impl IndicatorSnapshot {
    pub fn new<I, S>(timestamp: DateTime<Utc>, metrics: I) -> Self
    where
        I: IntoIterator<Item = (S, SymbolMetrics)>,
        S: Into<String>,
    {
        Self {
            timestamp,
            metrics: metrics.into_iter().map(|(s, m)| (s.into(), m)).collect(),
        }
    }

    /// Parse a snapshot from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolMetrics> {
        self.metrics.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Read one finite field for a symbol.
    pub fn metric(&self, symbol: &str, metric: Metric) -> Result<f64, MissingMetricError> {
        self.metrics
            .get(symbol)
            .and_then(|m| m.field(metric))
            .filter(|v| v.is_finite())
            .ok_or_else(|| MissingMetricError::new(symbol, metric))
    }

    pub fn level(&self, symbol: &str) -> Result<f64, MissingMetricError> {
        self.metric(symbol, Metric::Level)
    }

    pub fn previous_level(&self, symbol: &str) -> Result<f64, MissingMetricError> {
        self.metric(symbol, Metric::PreviousLevel)
    }

    pub fn return_pct(&self, symbol: &str, window: Window) -> Result<f64, MissingMetricError> {
        self.metric(symbol, Metric::Return(window))
    }

    /// Percent distance of the current level from the 52-week high (≤ 0 normally).
    ///
    /// A zero or negative high is treated as missing.
    pub fn drawdown_from_high_pct(&self, symbol: &str) -> Result<f64, MissingMetricError> {
        let level = self.level(symbol)?;
        let high = self.metric(symbol, Metric::High52w)?;
        if high <= 0.0 {
            return Err(MissingMetricError::new(symbol, Metric::High52w));
        }
        Ok((level - high) / high * 100.0)
    }

    /// Whether the current level is strictly below the 200-day average.
    pub fn below_sma_200(&self, symbol: &str) -> Result<bool, MissingMetricError> {
        let level = self.level(symbol)?;
        let sma = self.metric(symbol, Metric::Sma200)?;
        Ok(level < sma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 5, 14, 30, 0).unwrap()
    }

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot::new(
            ts(),
            [
                (
                    symbols::SPY,
                    SymbolMetrics::at_level(480.0)
                        .with_return(Window::OneDay, -1.2)
                        .with_high_52w(500.0)
                        .with_sma_200(490.0),
                ),
                (
                    symbols::HYG,
                    SymbolMetrics::at_level(76.0).with_return(Window::FiveDay, f64::NAN),
                ),
            ],
        )
    }

    #[test]
    fn reads_returns_by_window() {
        let snap = snapshot();
        assert_eq!(snap.return_pct(symbols::SPY, Window::OneDay).unwrap(), -1.2);
        let err = snap.return_pct(symbols::SPY, Window::FiveDay).unwrap_err();
        assert_eq!(err.metric, Metric::Return(Window::FiveDay));
        assert_eq!(err.symbol, "SPY");
    }

    #[test]
    fn non_finite_values_are_missing() {
        let snap = snapshot();
        assert!(snap.return_pct(symbols::HYG, Window::FiveDay).is_err());
    }

    #[test]
    fn unknown_symbol_is_missing() {
        let err = snapshot().level("NOPE").unwrap_err();
        assert_eq!(err.to_string(), "missing metric level for 'NOPE'");
    }

    #[test]
    fn drawdown_from_high() {
        let dd = snapshot().drawdown_from_high_pct(symbols::SPY).unwrap();
        assert!((dd - -4.0).abs() < 1e-12);
    }

    #[test]
    fn zero_high_is_missing() {
        let snap =
            IndicatorSnapshot::new(ts(), [("X", SymbolMetrics::at_level(1.0).with_high_52w(0.0))]);
        assert!(snap.drawdown_from_high_pct("X").is_err());
    }

    #[test]
    fn below_sma_200() {
        assert!(snapshot().below_sma_200(symbols::SPY).unwrap());
    }

    #[test]
    fn json_form() {
        let json = r#"{
            "timestamp": "2024-08-05T14:30:00Z",
            "metrics": {
                "SPY": { "level": 480.0, "change_1d_pct": -1.2, "high_52w": 500.0 }
            }
        }"#;
        let snap = IndicatorSnapshot::from_json(json).unwrap();
        assert_eq!(snap.timestamp(), ts());
        assert_eq!(snap.symbols().collect::<Vec<_>>(), vec!["SPY"]);
        assert!(snap.previous_level("SPY").is_err());
    }
}
