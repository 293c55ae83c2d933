//! Dated series over ledger and like timestamps.
//!
//! Values are bucketed by the UTC calendar date of their timestamp. Entries at
//! the sentinel date count toward every running total but never produce a
//! point of their own.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::pdv;
use crate::types::{DateValue, DecentrStats};

/// Running total per date, ascending, sentinel date omitted.
pub fn cumulative_series<I>(entries: I) -> Vec<DateValue>
where
    I: IntoIterator<Item = (DateTime<Utc>, i64)>,
{
    let mut per_date: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for (at, amount) in entries {
        *per_date.entry(at.date_naive()).or_default() += amount;
    }

    let mut total = 0i64;
    per_date
        .into_iter()
        .filter_map(|(date, amount)| {
            total += amount;
            (!pdv::is_sentinel(date)).then_some(DateValue { date, value: total })
        })
        .collect()
}

/// Cumulative distributed value: like [`cumulative_series`] but initial
/// balances do not count at all.
pub fn ddv_series<I>(entries: I) -> Vec<DateValue>
where
    I: IntoIterator<Item = (DateTime<Utc>, i64)>,
{
    cumulative_series(
        entries
            .into_iter()
            .filter(|(at, _)| !pdv::is_sentinel(at.date_naive())),
    )
}

/// Aggregate ledger figures from every `(address, amount, at)` entry.
pub fn decentr_stats<'a, I>(entries: I) -> DecentrStats
where
    I: IntoIterator<Item = (&'a str, i64, DateTime<Utc>)>,
{
    let mut balances: BTreeMap<&str, i64> = BTreeMap::new();
    let mut ddv = 0i64;
    for (address, amount, at) in entries {
        *balances.entry(address).or_default() += amount;
        if !pdv::is_sentinel(at.date_naive()) {
            ddv += amount;
        }
    }

    let adv = if balances.is_empty() {
        0.0
    } else {
        balances.values().map(|v| *v as f64).sum::<f64>() / balances.len() as f64
    };
    DecentrStats { adv, ddv }
}
