//! Target allocation table and its validation.
//!
//! The table is built once at startup and is immutable for the lifetime of
//! the process. A table that breaks any invariant is rejected as a whole.

mod source;

pub use source::{AllocationSource, ConfigAllocationSource};

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AllocationError;
use crate::exchange::InstrumentInfo;

/// Upper bound for the sum of absolute target percents.
pub const MAX_PERCENT_SUM: Decimal = Decimal::ONE_HUNDRED;

/// Percent as it arrives from the allocation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PercentValue {
    Number(f64),
    Text(String),
}

/// One unvalidated row from the allocation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub instrument: String,
    pub target_percent: PercentValue,
    #[serde(default)]
    pub max_exposure: Option<Decimal>,
    /// Canonical host instrument when `instrument` is a display alias
    #[serde(default)]
    pub origin: Option<String>,
}

/// A validated row of the target table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationEntry {
    /// Display key as written in the source
    pub alias: String,
    /// Instrument the host executes on, unique within the table
    pub instrument_key: String,
    /// Signed percent of the capital basis; sign is the long/short bias
    pub target_percent: Decimal,
    /// Optional volume ceiling; host maximum when absent
    pub max_exposure_cap: Option<Decimal>,
}

impl AllocationEntry {
    /// `ALIAS(ORIGIN)` when the alias differs from the host instrument.
    pub fn display_name(&self) -> String {
        if self.alias == self.instrument_key {
            self.alias.clone()
        } else {
            format!("{}({})", self.alias, self.instrument_key)
        }
    }

    /// Capital this entry should consume at the given capital value.
    pub fn expected_margin(&self, capital: Decimal) -> Decimal {
        capital * self.target_percent / Decimal::ONE_HUNDRED
    }

    /// Volume ceiling once the host instrument is known.
    ///
    /// Falls back to `default_cap`, then to the instrument maximum.
    pub fn effective_cap(&self, default_cap: Option<Decimal>, info: &InstrumentInfo) -> Decimal {
        self.max_exposure_cap
            .or(default_cap)
            .unwrap_or(info.max_trade_volume)
    }

    /// Lazy check of the cap against host limits.
    pub fn check_instrument(
        &self,
        default_cap: Option<Decimal>,
        info: &InstrumentInfo,
    ) -> Result<Decimal, AllocationError> {
        let cap = self.effective_cap(default_cap, info);
        if cap < info.min_trade_volume {
            return Err(AllocationError::CapBelowMinimum {
                instrument: self.display_name(),
                cap,
                min: info.min_trade_volume,
            });
        }
        Ok(cap)
    }
}

/// The immutable set of allocation entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationTable {
    entries: Vec<AllocationEntry>,
}

impl AllocationTable {
    /// Build and validate a table from raw rows.
    pub fn from_rows(rows: &[AllocationRow]) -> Result<Self, AllocationError> {
        let mut entries = Vec::with_capacity(rows.len());

        for row in rows {
            let alias = row.instrument.trim();
            if alias.is_empty() {
                return Err(AllocationError::EmptyKey);
            }

            let instrument_key = row
                .origin
                .as_deref()
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .unwrap_or(alias);

            entries.push(AllocationEntry {
                alias: alias.to_string(),
                instrument_key: instrument_key.to_string(),
                target_percent: parse_percent(alias, &row.target_percent)?,
                max_exposure_cap: row.max_exposure,
            });
        }

        Self::new(entries)
    }

    /// Wrap already-typed entries, validating them.
    pub fn new(entries: Vec<AllocationEntry>) -> Result<Self, AllocationError> {
        let table = Self { entries };
        validate(&table)?;
        Ok(table)
    }

    pub fn entries(&self) -> &[AllocationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, instrument_key: &str) -> Option<&AllocationEntry> {
        self.entries
            .iter()
            .find(|e| e.instrument_key == instrument_key)
    }

    /// Sum of absolute target percents.
    pub fn total_percent(&self) -> Decimal {
        self.entries.iter().map(|e| e.target_percent.abs()).sum()
    }

    /// Per-entry percents, used in error and status text.
    pub fn distribution(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}={}", e.display_name(), e.target_percent.normalize()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for AllocationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{} = {}%", entry.display_name(), entry.target_percent.normalize())?;
            if let Some(cap) = entry.max_exposure_cap {
                write!(f, ", max exposure = {}", cap)?;
            }
            writeln!(f)?;
        }
        write!(f, "Total = {}%", self.total_percent().normalize())
    }
}

/// Check the structural invariants of a table.
///
/// Instrument limits are not known here; caps are checked per cycle with
/// [`AllocationEntry::check_instrument`].
pub fn validate(table: &AllocationTable) -> Result<(), AllocationError> {
    let mut seen = HashSet::with_capacity(table.entries.len());

    for entry in &table.entries {
        if entry.instrument_key.is_empty() {
            return Err(AllocationError::EmptyKey);
        }
        if !seen.insert(entry.instrument_key.as_str()) {
            return Err(AllocationError::Duplicate(entry.instrument_key.clone()));
        }
        if let Some(cap) = entry.max_exposure_cap {
            if cap <= Decimal::ZERO {
                return Err(AllocationError::InvalidCap {
                    instrument: entry.display_name(),
                    cap,
                });
            }
        }
    }

    let total = table.total_percent();
    if total > MAX_PERCENT_SUM {
        return Err(AllocationError::OverAllocated {
            total,
            distribution: table.distribution(),
        });
    }

    Ok(())
}

/// Parse a source percent into percent units.
///
/// Text may carry a trailing `%` and a decimal comma.
pub fn parse_percent(instrument: &str, value: &PercentValue) -> Result<Decimal, AllocationError> {
    match value {
        PercentValue::Number(number) => {
            if !number.is_finite() {
                return Err(AllocationError::NonFinitePercent {
                    instrument: instrument.to_string(),
                    value: number.to_string(),
                });
            }
            Decimal::from_f64(*number).ok_or_else(|| AllocationError::InvalidPercent {
                instrument: instrument.to_string(),
                value: number.to_string(),
            })
        }
        PercentValue::Text(text) => {
            let cleaned = text.trim().trim_end_matches('%').trim().replace(',', ".");

            if let Ok(number) = cleaned.parse::<f64>() {
                if !number.is_finite() {
                    return Err(AllocationError::NonFinitePercent {
                        instrument: instrument.to_string(),
                        value: text.clone(),
                    });
                }
            }

            Decimal::from_str(&cleaned).map_err(|_| AllocationError::InvalidPercent {
                instrument: instrument.to_string(),
                value: text.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(instrument: &str, percent: f64) -> AllocationRow {
        AllocationRow {
            instrument: instrument.to_string(),
            target_percent: PercentValue::Number(percent),
            max_exposure: None,
            origin: None,
        }
    }

    fn instrument(min: Decimal, max: Decimal) -> InstrumentInfo {
        InstrumentInfo {
            key: "EURUSD".to_string(),
            min_trade_volume: min,
            max_trade_volume: max,
            volume_step: dec!(0.01),
            contract_size: dec!(100000),
            tradable: true,
        }
    }

    #[test]
    fn test_accepts_signed_distribution_up_to_hundred() {
        let table =
            AllocationTable::from_rows(&[row("EURUSD", 40.0), row("GBPUSD", -30.0), row("XAUUSD", 30.0)])
                .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.total_percent(), dec!(100));
        assert_eq!(table.get("GBPUSD").unwrap().target_percent, dec!(-30));
    }

    #[test]
    fn test_rejects_over_allocation_with_breakdown() {
        let err = AllocationTable::from_rows(&[row("EURUSD", 60.0), row("GBPUSD", -45.0)])
            .unwrap_err();

        match err {
            AllocationError::OverAllocated {
                total,
                distribution,
            } => {
                assert_eq!(total, dec!(105));
                assert!(distribution.contains("EURUSD=60"));
                assert!(distribution.contains("GBPUSD=-45"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_after_origin_mapping() {
        let mut alias = row("EUR", 10.0);
        alias.origin = Some("EURUSD".to_string());

        let err = AllocationTable::from_rows(&[row("EURUSD", 10.0), alias]).unwrap_err();
        assert_eq!(err, AllocationError::Duplicate("EURUSD".to_string()));
    }

    #[test]
    fn test_rejects_non_finite_percent() {
        let err = AllocationTable::from_rows(&[row("EURUSD", f64::NAN)]).unwrap_err();
        assert!(matches!(err, AllocationError::NonFinitePercent { .. }));

        let text = AllocationRow {
            target_percent: PercentValue::Text("inf".to_string()),
            ..row("GBPUSD", 0.0)
        };
        let err = AllocationTable::from_rows(&[text]).unwrap_err();
        assert!(matches!(err, AllocationError::NonFinitePercent { .. }));
    }

    #[test]
    fn test_parse_percent_text_forms() {
        let parse = |s: &str| parse_percent("X", &PercentValue::Text(s.to_string()));

        assert_eq!(parse("40%").unwrap(), dec!(40));
        assert_eq!(parse(" -12,5 % ").unwrap(), dec!(-12.5));
        assert_eq!(parse("7.25").unwrap(), dec!(7.25));
        assert!(matches!(
            parse("forty"),
            Err(AllocationError::InvalidPercent { .. })
        ));
    }

    #[test]
    fn test_origin_override_and_display_name() {
        let mut aliased = row("Gold", 5.0);
        aliased.origin = Some("XAUUSD".to_string());
        let table = AllocationTable::from_rows(&[aliased]).unwrap();

        let entry = &table.entries()[0];
        assert_eq!(entry.instrument_key, "XAUUSD");
        assert_eq!(entry.display_name(), "Gold(XAUUSD)");
    }

    #[test]
    fn test_expected_margin_scenario() {
        let table = AllocationTable::from_rows(&[row("EURUSD", 40.0), row("GBPUSD", -30.0)]).unwrap();

        assert_eq!(
            table.get("EURUSD").unwrap().expected_margin(dec!(10000)),
            dec!(4000)
        );
        assert_eq!(
            table.get("GBPUSD").unwrap().expected_margin(dec!(10000)),
            dec!(-3000)
        );
    }

    #[test]
    fn test_lazy_cap_check_against_instrument() {
        let mut capped = row("EURUSD", 10.0);
        capped.max_exposure = Some(dec!(0.005));
        let table = AllocationTable::from_rows(&[capped]).unwrap();
        let entry = &table.entries()[0];

        let err = entry
            .check_instrument(None, &instrument(dec!(0.01), dec!(100)))
            .unwrap_err();
        assert!(matches!(err, AllocationError::CapBelowMinimum { .. }));

        let uncapped = AllocationTable::from_rows(&[row("EURUSD", 10.0)]).unwrap();
        let cap = uncapped.entries()[0]
            .check_instrument(Some(dec!(3)), &instrument(dec!(0.01), dec!(100)))
            .unwrap();
        assert_eq!(cap, dec!(3));
    }

    #[test]
    fn test_rejects_non_positive_cap() {
        let mut capped = row("EURUSD", 10.0);
        capped.max_exposure = Some(dec!(-1));
        let err = AllocationTable::from_rows(&[capped]).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidCap { .. }));
    }
}
