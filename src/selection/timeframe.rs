//! Timeframe shortcut resolution
//!
//! Turns `__` shortcut tokens into concrete inclusive day ranges relative to
//! an anchor date, and compare-to shortcuts into ranges relative to the main
//! interval.

use chrono::{Datelike, Duration, Months, NaiveDate};
use std::cmp::Ordering;

use super::Bound;
use crate::model::{ScopeError, ScopeResult, Value};

/// Inclusive day range; `None` bounds are open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Number of days covered, when closed
    pub fn days(&self) -> Option<i64> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some((e - s).num_days() + 1),
            _ => None,
        }
    }
}

fn out_of_range(token: &str) -> ScopeError {
    ScopeError::new("date out of range", token)
}

fn month_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
}

fn month_range(start: NaiveDate) -> Option<DateRange> {
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some(DateRange::new(start, end))
}

fn year_range(year: i32) -> Option<DateRange> {
    Some(DateRange::new(
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

fn last_days(anchor: NaiveDate, days: i64) -> Option<DateRange> {
    Some(DateRange::new(anchor.checked_sub_signed(Duration::days(days - 1))?, anchor))
}

/// Resolve a main timeframe shortcut against an anchor date
pub fn resolve_shortcut(token: &str, anchor: NaiveDate) -> ScopeResult<DateRange> {
    let range = match token.to_uppercase().as_str() {
        "__ALL" => Some(DateRange::unbounded()),
        "__TODAY" | "__CURRENT_DATE" => Some(DateRange::new(anchor, anchor)),
        "__YESTERDAY" => anchor.pred_opt().map(|d| DateRange::new(d, d)),
        "__CURRENT_MONTH" => month_start(anchor).and_then(month_range),
        "__PREVIOUS_MONTH" => month_start(anchor)
            .and_then(|d| d.checked_sub_months(Months::new(1)))
            .and_then(month_range),
        "__CURRENT_YEAR" => year_range(anchor.year()),
        "__PREVIOUS_YEAR" => year_range(anchor.year() - 1),
        "__LAST_7_DAYS" => last_days(anchor, 7),
        "__LAST_30_DAYS" => last_days(anchor, 30),
        "__LAST_90_DAYS" => last_days(anchor, 90),
        _ => {
            return Err(ScopeError::new(
                format!("unknown timeframe shortcut '{}'", token),
                token,
            ))
        }
    };
    range.ok_or_else(|| out_of_range(token))
}

/// Resolve a compare-to shortcut relative to the main range
pub fn resolve_compare(token: &str, main: &DateRange) -> ScopeResult<DateRange> {
    let (start, end) = match (main.start, main.end) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(ScopeError::new(
                "cannot compare against an unbounded timeframe",
                token,
            ))
        }
    };

    let range = match token.to_uppercase().as_str() {
        "__COMPARE_TO_PREVIOUS_PERIOD" => {
            let days = main.days().unwrap_or(1);
            start.pred_opt().and_then(|new_end| {
                let new_start = new_end.checked_sub_signed(Duration::days(days - 1))?;
                Some(DateRange::new(new_start, new_end))
            })
        }
        "__COMPARE_TO_PREVIOUS_YEAR" => shift_months(start, end, 12),
        "__COMPARE_TO_PREVIOUS_MONTH" => shift_months(start, end, 1),
        _ => {
            return Err(ScopeError::new(
                format!("unknown compare-to shortcut '{}'", token),
                token,
            ))
        }
    };
    range.ok_or_else(|| out_of_range(token))
}

fn shift_months(start: NaiveDate, end: NaiveDate, months: u32) -> Option<DateRange> {
    Some(DateRange::new(
        start.checked_sub_months(Months::new(months))?,
        end.checked_sub_months(Months::new(months))?,
    ))
}

fn is_compare_token(bound: &Bound) -> bool {
    matches!(bound, Bound::Shortcut(s) if s.starts_with("__COMPARE_TO_"))
}

/// Concrete bounds of an interval member
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInterval {
    pub lower: Option<Value>,
    pub upper: Option<Value>,
}

impl ResolvedInterval {
    /// Resolve a main interval against an anchor date
    pub fn resolve(lower: &Bound, upper: &Bound, anchor: NaiveDate) -> ScopeResult<Self> {
        Ok(Self {
            lower: Self::bound(lower, anchor, true)?,
            upper: Self::bound(upper, anchor, false)?,
        })
    }

    /// Resolve a compare-to interval; compare shortcuts shift the main interval
    pub fn resolve_compare(
        lower: &Bound,
        upper: &Bound,
        main: &ResolvedInterval,
        anchor: NaiveDate,
    ) -> ScopeResult<Self> {
        if is_compare_token(lower) || is_compare_token(upper) {
            let token = if is_compare_token(lower) { lower } else { upper };
            let token = token.to_token();
            let range = resolve_compare(&token, &main.to_range())?;
            return Ok(Self::from_range(range));
        }
        Self::resolve(lower, upper, anchor)
    }

    fn bound(bound: &Bound, anchor: NaiveDate, lower: bool) -> ScopeResult<Option<Value>> {
        match bound {
            Bound::Value(Value::Null) => Ok(None),
            Bound::Value(v) => Ok(Some(v.clone())),
            Bound::Shortcut(token) => {
                let range = resolve_shortcut(token, anchor)?;
                let day = if lower { range.start } else { range.end };
                Ok(day.map(Value::Date))
            }
        }
    }

    fn from_range(range: DateRange) -> Self {
        Self {
            lower: range.start.map(Value::Date),
            upper: range.end.map(Value::Date),
        }
    }

    /// Day range spanned by temporal bounds
    pub fn to_range(&self) -> DateRange {
        DateRange {
            start: self.lower.as_ref().and_then(day_of),
            end: self.upper.as_ref().and_then(day_of),
        }
    }

    /// Whether a value falls within the interval, bounds included
    ///
    /// A date bound covers its whole day when compared with timestamps.
    pub fn contains(&self, value: &Value) -> bool {
        if self.lower.is_none() && self.upper.is_none() {
            return true;
        }
        let above = self
            .lower
            .as_ref()
            .map(|l| matches!(compare_bound(value, l), Some(Ordering::Greater | Ordering::Equal)))
            .unwrap_or(true);
        let below = self
            .upper
            .as_ref()
            .map(|u| matches!(compare_bound(value, u), Some(Ordering::Less | Ordering::Equal)))
            .unwrap_or(true);
        above && below
    }
}

fn day_of(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Timestamp(t) => Some(t.date_naive()),
        Value::Text(s) => Value::parse_temporal(s).as_ref().and_then(day_of),
        _ => None,
    }
}

fn compare_bound(value: &Value, bound: &Value) -> Option<Ordering> {
    if let Value::Date(day) = bound {
        return day_of(value).map(|d| d.cmp(day));
    }
    value.compare(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_shortcuts() {
        let anchor = day(2024, 3, 15);
        assert_eq!(
            resolve_shortcut("__CURRENT_MONTH", anchor).unwrap(),
            DateRange::new(day(2024, 3, 1), day(2024, 3, 31))
        );
        assert_eq!(
            resolve_shortcut("__PREVIOUS_MONTH", anchor).unwrap(),
            DateRange::new(day(2024, 2, 1), day(2024, 2, 29))
        );
        assert_eq!(
            resolve_shortcut("__last_7_days", anchor).unwrap(),
            DateRange::new(day(2024, 3, 9), day(2024, 3, 15))
        );
    }

    #[test]
    fn test_all_is_unbounded() {
        let range = resolve_shortcut("__ALL", day(2024, 1, 1)).unwrap();
        assert_eq!(range, DateRange::unbounded());
        assert!(range.days().is_none());
    }

    #[test]
    fn test_unknown_shortcut() {
        let err = resolve_shortcut("__NEXT_DECADE", day(2024, 1, 1)).unwrap_err();
        assert!(err.message.contains("unknown timeframe shortcut"));
    }

    #[test]
    fn test_compare_shortcuts() {
        let main = DateRange::new(day(2024, 3, 1), day(2024, 3, 10));
        assert_eq!(
            resolve_compare("__COMPARE_TO_PREVIOUS_PERIOD", &main).unwrap(),
            DateRange::new(day(2024, 2, 20), day(2024, 2, 29))
        );
        assert_eq!(
            resolve_compare("__COMPARE_TO_PREVIOUS_YEAR", &main).unwrap(),
            DateRange::new(day(2023, 3, 1), day(2023, 3, 10))
        );
        assert!(resolve_compare("__COMPARE_TO_PREVIOUS_YEAR", &DateRange::unbounded()).is_err());
    }

    #[test]
    fn test_interval_contains_whole_days() {
        let interval = ResolvedInterval::resolve(
            &Bound::Shortcut("__CURRENT_MONTH".into()),
            &Bound::Shortcut("__CURRENT_MONTH".into()),
            day(2024, 3, 15),
        )
        .unwrap();
        let late = Value::parse_temporal("2024-03-31T23:00:00Z").unwrap();
        assert!(interval.contains(&late));
        assert!(!interval.contains(&Value::Date(day(2024, 4, 1))));
        assert!(!interval.contains(&Value::Null));
    }

    #[test]
    fn test_numeric_interval() {
        let interval = ResolvedInterval::resolve(
            &Bound::Value(Value::Integer(3)),
            &Bound::Value(Value::Integer(7)),
            day(2024, 1, 1),
        )
        .unwrap();
        assert!(interval.contains(&Value::Number(3.0)));
        assert!(!interval.contains(&Value::Integer(8)));
    }
}
