use std::fmt;

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScreenerError};
use crate::gateway::UpstreamGateway;

/// Which monthly expiry slot a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Near,
    Next,
    Far,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Near, Bucket::Next, Bucket::Far];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Near => "near",
            Bucket::Next => "next",
            Bucket::Far => "far",
        }
    }

    /// 1-based index used by reference file names (`forward_vol_expiry_1.csv`).
    pub fn ordinal(&self) -> usize {
        match self {
            Bucket::Near => 1,
            Bucket::Next => 2,
            Bucket::Far => 3,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Bucket {
    type Err = ScreenerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "near" | "1" => Ok(Bucket::Near),
            "next" | "2" => Ok(Bucket::Next),
            "far" | "3" => Ok(Bucket::Far),
            other => Err(ScreenerError::Config(format!("unknown expiry bucket '{other}'"))),
        }
    }
}

/// The three monthly expiries every analytic is keyed on.
///
/// Always three distinct, strictly increasing dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpiryBuckets {
    near: NaiveDate,
    next: NaiveDate,
    far: NaiveDate,
}

impl ExpiryBuckets {
    pub fn new(near: NaiveDate, next: NaiveDate, far: NaiveDate) -> Result<Self> {
        if !(near < next && next < far) {
            return Err(ScreenerError::Config(format!(
                "expiries must be strictly increasing, got {near}, {next}, {far}"
            )));
        }
        Ok(Self { near, next, far })
    }

    /// Take the first three dates of a sorted, de-duplicated list.
    pub fn from_dates(dates: &[NaiveDate]) -> Result<Self> {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();
        match dates.as_slice() {
            [near, next, far, ..] => Self::new(*near, *next, *far),
            _ => Err(ScreenerError::Config(format!(
                "need three distinct expiries, got {}",
                dates.len()
            ))),
        }
    }

    /// Parse a `;`-separated list of ISO dates (the `EXPIRY_DATES` override).
    pub fn parse_override(raw: &str) -> Result<Self> {
        let dates = raw
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| ScreenerError::Config(format!("bad expiry '{s}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_dates(&dates)
    }

    /// Last-Thursday monthly expiries, rolling forward once `today` is past
    /// this month's last Thursday.
    pub fn computed(today: NaiveDate) -> Result<Self> {
        let this_month = last_thursday(today.year(), today.month())?;
        let start = if today > this_month { 1 } else { 0 };
        let dates = (0..3)
            .map(|offset| monthly_expiry(today, start + offset))
            .collect::<Result<Vec<_>>>()?;
        Self::from_dates(&dates)
    }

    pub fn get(&self, bucket: Bucket) -> NaiveDate {
        match bucket {
            Bucket::Near => self.near,
            Bucket::Next => self.next,
            Bucket::Far => self.far,
        }
    }

    pub fn near(&self) -> NaiveDate {
        self.near
    }

    pub fn next(&self) -> NaiveDate {
        self.next
    }

    pub fn far(&self) -> NaiveDate {
        self.far
    }

    pub fn bucket_of(&self, expiry: NaiveDate) -> Option<Bucket> {
        Bucket::ALL.into_iter().find(|b| self.get(*b) == expiry)
    }

    pub fn dates(&self) -> [NaiveDate; 3] {
        [self.near, self.next, self.far]
    }
}

/// Resolve buckets: explicit override, then the upstream list, then the
/// last-Thursday rule.
pub async fn resolve(
    override_dates: Option<&str>,
    gateway: &dyn UpstreamGateway,
    today: NaiveDate,
) -> Result<ExpiryBuckets> {
    if let Some(raw) = override_dates.filter(|s| !s.trim().is_empty()) {
        let buckets = ExpiryBuckets::parse_override(raw)?;
        tracing::info!(?buckets, "expiries from override");
        return Ok(buckets);
    }

    match gateway.fetch_expiries().await {
        Ok(Some(dates)) => match ExpiryBuckets::from_dates(&dates) {
            Ok(buckets) => {
                tracing::info!(?buckets, "expiries from upstream");
                return Ok(buckets);
            }
            Err(e) => tracing::warn!(error = %e, "upstream expiries unusable"),
        },
        Ok(None) => tracing::info!("upstream has no expiry list"),
        Err(e) => tracing::warn!(error = %e, "fetching expiries failed"),
    }

    let buckets = ExpiryBuckets::computed(today)?;
    tracing::info!(?buckets, "expiries from last-Thursday rule");
    Ok(buckets)
}

fn monthly_expiry(today: NaiveDate, month_offset: u32) -> Result<NaiveDate> {
    let first = today
        .with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(month_offset)))
        .ok_or_else(|| ScreenerError::Config(format!("month offset {month_offset} out of range")))?;
    last_thursday(first.year(), first.month())
}

pub fn last_thursday(year: i32, month: u32) -> Result<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ScreenerError::Config(format!("invalid month {year}-{month}")))?;
    let last_day = first
        .checked_add_months(Months::new(1))
        .map(|d| d - Duration::days(1))
        .ok_or_else(|| ScreenerError::Config(format!("invalid month {year}-{month}")))?;

    let back = (last_day.weekday().num_days_from_monday() + 7 - Weekday::Thu.num_days_from_monday()) % 7;
    Ok(last_day - Duration::days(back as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn last_thursday_of_month() {
        assert_eq!(last_thursday(2024, 2).unwrap(), d(2024, 2, 29));
        assert_eq!(last_thursday(2024, 3).unwrap(), d(2024, 3, 28));
        assert_eq!(last_thursday(2024, 8).unwrap(), d(2024, 8, 29));
    }

    #[test]
    fn computed_rolls_after_last_thursday() {
        let before = ExpiryBuckets::computed(d(2024, 3, 28)).unwrap();
        assert_eq!(before.near(), d(2024, 3, 28));
        assert_eq!(before.far(), d(2024, 5, 30));

        let after = ExpiryBuckets::computed(d(2024, 3, 29)).unwrap();
        assert_eq!(after.near(), d(2024, 4, 25));
        assert_eq!(after.next(), d(2024, 5, 30));
        assert_eq!(after.far(), d(2024, 6, 27));
    }

    #[test]
    fn computed_crosses_year_end() {
        let b = ExpiryBuckets::computed(d(2024, 12, 27)).unwrap();
        assert_eq!(b.near(), d(2025, 1, 30));
        assert_eq!(b.far(), d(2025, 3, 27));
    }

    #[test]
    fn rejects_non_increasing() {
        assert!(ExpiryBuckets::new(d(2024, 3, 28), d(2024, 3, 28), d(2024, 5, 30)).is_err());
        assert!(ExpiryBuckets::parse_override("2024-03-28;2024-04-25").is_err());
    }

    #[test]
    fn override_is_sorted() {
        let b = ExpiryBuckets::parse_override("2024-05-30; 2024-03-28;2024-04-25").unwrap();
        assert_eq!(b.bucket_of(d(2024, 4, 25)), Some(Bucket::Next));
        assert_eq!(b.bucket_of(d(2024, 4, 26)), None);
    }
}
