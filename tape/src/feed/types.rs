//! Trade record types for the TRACE-style feed.
//!
//! A feed message is one JSON object per line. Field names and formats match
//! the upstream trace feed: RFC 3339 timestamps, `BUY`/`SELL` sides, and
//! single-letter reporting capacities.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::issuers::IssuerTable;

/// Reports filed more than this many seconds after execution are late and
/// carry the `Z` modifier.
pub const ON_TIME_THRESHOLD_SECS: i64 = 15 * 60;

/// Buy or sell leg of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposite side, used when synthesizing the second leg of a pair.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Wire/database spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Whether the dealer reported as principal or agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportingCapacity {
    #[serde(rename = "P")]
    Principal,
    #[serde(rename = "A")]
    Agent,
}

impl ReportingCapacity {
    /// Wire/database spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Principal => "P",
            Self::Agent => "A",
        }
    }
}

/// One trade leg as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Feed-assigned identifier; both legs of a pair share it.
    pub control_id: String,
    pub cusip: String,
    pub issuer: String,
    pub exec_time: DateTime<Utc>,
    pub report_time: DateTime<Utc>,
    pub price: f64,
    pub volume: u64,
    pub side: Side,
    pub dealer_id: u32,
    pub reporting_capacity: ReportingCapacity,
    /// `Z` when the feed already flagged the report late, empty otherwise.
    #[serde(default)]
    pub modifier3: String,
    pub coupon: f64,
    pub maturity: NaiveDate,
}

/// A trade enriched with reporting latency and issuer reference data,
/// ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTrade {
    pub trade: Trade,
    /// Seconds between execution and report.
    pub report_delay_secs: i64,
    /// Reported later than [`ON_TIME_THRESHOLD_SECS`] after execution.
    pub late: bool,
    /// Issuer sector from the lookup table, if the issuer is known.
    pub sector: Option<String>,
    /// Issuer credit rating from the lookup table, if the issuer is known.
    pub rating: Option<String>,
}

impl Trade {
    /// Computes derived fields and resolves issuer reference data.
    #[must_use]
    pub fn enrich(self, issuers: &IssuerTable) -> EnrichedTrade {
        let report_delay_secs = (self.report_time - self.exec_time).num_seconds();
        let late = report_delay_secs > ON_TIME_THRESHOLD_SECS;
        let info = issuers.get(&self.issuer);
        EnrichedTrade {
            report_delay_secs,
            late,
            sector: info.map(|i| i.sector.clone()),
            rating: info.map(|i| i.rating.clone()),
            trade: self,
        }
    }
}

/// CUSIP identifier helpers.
///
/// A CUSIP is eight base characters plus a check digit computed with the
/// standard modulus-10 double-add-double scheme.
pub mod cusip {
    /// Numeric value of a single CUSIP character.
    fn char_value(c: char) -> Option<u32> {
        match c {
            '0'..='9' => Some(c as u32 - '0' as u32),
            'A'..='Z' => Some(c as u32 - 'A' as u32 + 10),
            'a'..='z' => Some(c as u32 - 'a' as u32 + 10),
            '*' => Some(36),
            '@' => Some(37),
            '#' => Some(38),
            _ => None,
        }
    }

    /// Computes the check digit for an 8-character CUSIP base.
    ///
    /// Returns `None` if `base` is not exactly 8 valid CUSIP characters.
    #[must_use]
    pub fn check_digit(base: &str) -> Option<char> {
        if base.chars().count() != 8 {
            return None;
        }
        let mut total = 0u32;
        for (i, c) in base.chars().enumerate() {
            let mut v = char_value(c)?;
            if i % 2 == 1 {
                v *= 2;
            }
            total += v / 10 + v % 10;
        }
        let check = (10 - (total % 10)) % 10;
        char::from_digit(check, 10)
    }

    /// Whether a 9-character CUSIP has a correct check digit.
    #[must_use]
    pub fn is_valid(cusip: &str) -> bool {
        if cusip.chars().count() != 9 {
            return false;
        }
        let base: String = cusip.chars().take(8).collect();
        match check_digit(&base) {
            Some(expected) => cusip.chars().nth(8) == Some(expected),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_trade(delay_secs: i64) -> Trade {
        let exec = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        Trade {
            control_id: "AB12CD34EF".to_string(),
            cusip: "037833100".to_string(), // Apple
            issuer: "Apple".to_string(),
            exec_time: exec,
            report_time: exec + chrono::TimeDelta::seconds(delay_secs),
            price: 101.125,
            volume: 1_000_000,
            side: Side::Buy,
            dealer_id: 4242,
            reporting_capacity: ReportingCapacity::Principal,
            modifier3: String::new(),
            coupon: 3.25,
            maturity: NaiveDate::from_ymd_opt(2032, 6, 1).unwrap(),
        }
    }

    #[test]
    fn test_parse_feed_line() {
        let line = r#"{
            "control_id": "K8Q2ZL0XWY",
            "cusip": "594918104",
            "issuer": "Microsoft",
            "exec_time": "2025-06-02T14:30:00Z",
            "report_time": "2025-06-02T14:35:00Z",
            "price": 99.875,
            "volume": 250000,
            "side": "SELL",
            "dealer_id": 1701,
            "reporting_capacity": "A",
            "modifier3": "",
            "coupon": 4.5,
            "maturity": "2030-01-15"
        }"#;

        let trade: Trade = serde_json::from_str(line).unwrap();
        assert_eq!(trade.issuer, "Microsoft");
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.reporting_capacity, ReportingCapacity::Agent);
        assert_eq!(trade.volume, 250_000);
        assert_eq!(
            trade.maturity,
            NaiveDate::from_ymd_opt(2030, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let trade = sample_trade(120);
        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(trade, back);
    }

    #[test]
    fn test_enrich_on_time() {
        let enriched = sample_trade(600).enrich(&IssuerTable::empty());
        assert_eq!(enriched.report_delay_secs, 600);
        assert!(!enriched.late);
        assert_eq!(enriched.sector, None);
    }

    #[test]
    fn test_enrich_late() {
        let enriched = sample_trade(ON_TIME_THRESHOLD_SECS + 1).enrich(&IssuerTable::empty());
        assert!(enriched.late);
    }

    #[test]
    fn test_enrich_threshold_boundary() {
        // Exactly on the threshold is still on time.
        let enriched = sample_trade(ON_TIME_THRESHOLD_SECS).enrich(&IssuerTable::empty());
        assert!(!enriched.late);
    }

    #[test]
    fn test_side_flip() {
        assert_eq!(Side::Buy.flipped(), Side::Sell);
        assert_eq!(Side::Sell.flipped(), Side::Buy);
    }

    #[test]
    fn test_cusip_check_digit() {
        // Well-known CUSIPs: Apple 037833100, Microsoft 594918104.
        assert_eq!(cusip::check_digit("03783310"), Some('0'));
        assert_eq!(cusip::check_digit("59491810"), Some('4'));
    }

    #[test]
    fn test_cusip_validation() {
        assert!(cusip::is_valid("037833100"));
        assert!(cusip::is_valid("594918104"));
        assert!(!cusip::is_valid("037833101"));
        assert!(!cusip::is_valid("short"));
        assert!(!cusip::is_valid("0378331000"));
        assert!(!cusip::is_valid("03783_100"));
    }
}
