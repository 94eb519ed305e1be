//! `derived` stage: computed columns on top of the joined table.
//!
//! # Columns
//!
//! ```text
//! week_start | week ──► week_date ──► year, quarter
//! description         ──► description_upper
//! sales_amount        ──► revenue ──► revenue_per_unit (÷ units)
//!                                 └─► quarter_revenue (Σ per year+quarter)
//!                                 └─► q4_trend        (per year, vs mean Q4)
//! ```
//!
//! A missing source column skips only the columns that depend on it and
//! leaves a warning. Nothing here fails.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

use super::{Stage, StageWarning};
use crate::models::{columns, Table, Value};

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y"];

pub const TREND_HIGH: &str = "high";
pub const TREND_NORMAL: &str = "normal";

/// Add the derived columns to a copy of `joined`.
pub fn derive(joined: &Table) -> (Table, Vec<StageWarning>) {
    let mut table = joined.clone();
    let mut warnings = Vec::new();
    let mut missing = |column: &str, skipped: &str| {
        warnings.push(StageWarning::missing_column(
            Stage::Derived,
            format!("Column '{}' not found; {} not computed", column, skipped),
        ));
    };

    // week_date
    let date_source = [columns::WEEK_START, columns::WEEK]
        .into_iter()
        .find(|c| table.has_column(c));
    let dates: Vec<Option<NaiveDateTime>> = match date_source.and_then(|c| table.column_values(c)) {
        Some(values) => values.into_iter().map(parse_date).collect(),
        None => {
            missing(columns::WEEK_START, columns::WEEK_DATE);
            vec![None; table.row_count()]
        }
    };
    if date_source.is_some() {
        table.set_column(
            columns::WEEK_DATE,
            dates.iter().map(|d| (*d).map(Value::DateTime).unwrap_or_default()).collect(),
        );
    }

    // description_upper
    match table.column_values(columns::DESCRIPTION) {
        Some(values) => {
            let upper = values
                .into_iter()
                .map(|v| match v {
                    Value::Null => Value::Null,
                    other => Value::Str(other.to_string().to_uppercase()),
                })
                .collect();
            table.set_column(columns::DESCRIPTION_UPPER, upper);
        }
        None => missing(columns::DESCRIPTION, columns::DESCRIPTION_UPPER),
    }

    // revenue, revenue_per_unit
    let revenue: Option<Vec<Value>> = table
        .column_values(columns::SALES_AMOUNT)
        .map(|values| values.into_iter().cloned().collect());
    match &revenue {
        Some(revenue) => {
            table.set_column(columns::REVENUE, revenue.clone());
            match table.column_values(columns::UNITS) {
                Some(units) => {
                    let per_unit = revenue
                        .iter()
                        .zip(units)
                        .map(|(r, u)| safe_divide(r, u))
                        .collect();
                    table.set_column(columns::REVENUE_PER_UNIT, per_unit);
                }
                None => missing(columns::UNITS, columns::REVENUE_PER_UNIT),
            }
        }
        None => missing(columns::SALES_AMOUNT, columns::REVENUE),
    }

    // year, quarter, quarter_revenue, q4_trend
    if dates.iter().any(Option::is_some) {
        let periods: Vec<Option<(i64, i64)>> = dates
            .iter()
            .map(|d| d.map(|d| (i64::from(d.year()), i64::from((d.month() - 1) / 3 + 1))))
            .collect();
        table.set_column(
            columns::YEAR,
            periods.iter().map(|p| p.map(|(y, _)| y).into()).collect(),
        );
        table.set_column(
            columns::QUARTER,
            periods.iter().map(|p| p.map(|(_, q)| q).into()).collect(),
        );

        match &revenue {
            Some(revenue) => {
                let totals = QuarterTotals::collect(&periods, revenue);
                table.set_column(
                    columns::QUARTER_REVENUE,
                    periods
                        .iter()
                        .map(|p| p.map(|p| totals.quarter_sum(p)).into())
                        .collect(),
                );
                table.set_column(
                    columns::Q4_TREND,
                    periods
                        .iter()
                        .map(|p| p.map(|(year, _)| totals.trend(year)).into())
                        .collect(),
                );
            }
            None => missing(columns::SALES_AMOUNT, columns::QUARTER_REVENUE),
        }
    } else if date_source.is_some() {
        warnings.push(StageWarning::missing_column(
            Stage::Derived,
            format!(
                "No parseable dates in '{}'; {} and {} not computed",
                columns::WEEK_DATE,
                columns::YEAR,
                columns::QUARTER
            ),
        ));
    }

    (table, warnings)
}

/// Parse a cell into a timestamp. Unparseable cells yield `None`.
///
/// Integers are read as `YYYYMMDD`; plain week numbers therefore never
/// become dates.
pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Int(i) if (10000101..=99991231).contains(i) => {
            NaiveDate::parse_from_str(&i.to_string(), "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        Value::Str(s) => {
            let s = s.trim();
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

/// `numerator / denominator`, or null when either side is not a number or
/// the divisor is zero.
pub fn safe_divide(numerator: &Value, denominator: &Value) -> Value {
    match (numerator.as_f64(), denominator.as_f64()) {
        (Some(n), Some(d)) if d != 0.0 => {
            let q = n / d;
            if q.is_finite() {
                Value::Float(q)
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

/// Revenue sums per (year, quarter) and the Q4 mean across years.
struct QuarterTotals {
    sums: HashMap<(i64, i64), f64>,
    q4_mean: Option<f64>,
}

impl QuarterTotals {
    /// Nulls and non-numeric revenue count as zero.
    fn collect(periods: &[Option<(i64, i64)>], revenue: &[Value]) -> Self {
        let mut sums: HashMap<(i64, i64), f64> = HashMap::new();
        for (period, value) in periods.iter().zip(revenue) {
            if let Some(period) = period {
                *sums.entry(*period).or_default() += value.as_f64().unwrap_or(0.0);
            }
        }

        let q4: BTreeMap<i64, f64> = sums
            .iter()
            .filter(|((_, quarter), _)| *quarter == 4)
            .map(|((year, _), sum)| (*year, *sum))
            .collect();
        let q4_mean = if q4.is_empty() {
            None
        } else {
            Some(q4.values().sum::<f64>() / q4.len() as f64)
        };

        Self { sums, q4_mean }
    }

    fn quarter_sum(&self, period: (i64, i64)) -> f64 {
        self.sums.get(&period).copied().unwrap_or(0.0)
    }

    fn trend(&self, year: i64) -> &'static str {
        match (self.sums.get(&(year, 4)), self.q4_mean) {
            (Some(sum), Some(mean)) if *sum > mean => TREND_HIGH,
            _ => TREND_NORMAL,
        }
    }
}
