use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  Duration,
  Months,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Timelike,
  Weekday
};
use serde::{
  Deserialize,
  Serialize
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
  Minute,
  Hour,
  Day,
  Week,
  Month,
  Year
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
  #[default]
  Sunday,
  Monday
}

impl WeekStart {
  pub fn from_name(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "sunday" | "sun" => {
        Some(Self::Sunday)
      }
      | "monday" | "mon" => {
        Some(Self::Monday)
      }
      | _ => None
    }
  }

  #[must_use]
  pub fn weekday(self) -> Weekday {
    match self {
      | Self::Sunday => Weekday::Sun,
      | Self::Monday => Weekday::Mon
    }
  }

  #[must_use]
  pub fn start_of_week(
    self,
    day: NaiveDate
  ) -> NaiveDate {
    let day_idx = i64::from(
      day
        .weekday()
        .num_days_from_monday()
    );
    let start_idx = i64::from(
      self
        .weekday()
        .num_days_from_monday()
    );
    let diff =
      (7 + day_idx - start_idx) % 7;
    add_days(day, -diff)
  }
}

impl TimeUnit {
  pub const ALL: [TimeUnit; 6] = [
    TimeUnit::Minute,
    TimeUnit::Hour,
    TimeUnit::Day,
    TimeUnit::Week,
    TimeUnit::Month,
    TimeUnit::Year
  ];

  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Minute => "minute",
      | Self::Hour => "hour",
      | Self::Day => "day",
      | Self::Week => "week",
      | Self::Month => "month",
      | Self::Year => "year"
    }
  }

  /// Label pattern used when a row is
  /// generated without a configured
  /// header definition.
  #[must_use]
  pub fn default_label(
    self
  ) -> &'static str {
    match self {
      | Self::Minute => "mm",
      | Self::Hour => "h a",
      | Self::Day => "ccc, LLL d",
      | Self::Week => "'w.' W",
      | Self::Month => "LLLL",
      | Self::Year => "yyyy"
    }
  }

  #[must_use]
  pub fn start_of(
    self,
    dt: NaiveDateTime,
    week_start: WeekStart
  ) -> NaiveDateTime {
    let date = dt.date();
    match self {
      | Self::Minute => {
        date
          .and_hms_opt(
            dt.hour(),
            dt.minute(),
            0
          )
          .unwrap_or(dt)
      }
      | Self::Hour => {
        date
          .and_hms_opt(dt.hour(), 0, 0)
          .unwrap_or(dt)
      }
      | Self::Day => {
        date.and_time(NaiveTime::MIN)
      }
      | Self::Week => {
        week_start
          .start_of_week(date)
          .and_time(NaiveTime::MIN)
      }
      | Self::Month => {
        first_day_of_month(
          date.year(),
          date.month()
        )
        .and_time(NaiveTime::MIN)
      }
      | Self::Year => {
        first_day_of_month(
          date.year(),
          1
        )
        .and_time(NaiveTime::MIN)
      }
    }
  }

  /// Last millisecond of the unit
  /// containing `dt`.
  #[must_use]
  pub fn end_of(
    self,
    dt: NaiveDateTime,
    week_start: WeekStart
  ) -> NaiveDateTime {
    let start =
      self.start_of(dt, week_start);
    self.add(start, 1)
      - Duration::milliseconds(1)
  }

  #[must_use]
  pub fn add(
    self,
    dt: NaiveDateTime,
    amount: i64
  ) -> NaiveDateTime {
    match self {
      | Self::Minute => {
        add_duration(
          dt,
          Duration::minutes(amount)
        )
      }
      | Self::Hour => {
        add_duration(
          dt,
          Duration::hours(amount)
        )
      }
      | Self::Day => {
        add_duration(
          dt,
          Duration::days(amount)
        )
      }
      | Self::Week => {
        add_duration(
          dt,
          Duration::weeks(amount)
        )
      }
      | Self::Month => {
        add_months(dt, amount)
      }
      | Self::Year => {
        add_months(
          dt,
          amount.saturating_mul(12)
        )
      }
    }
  }

  /// Number of distinct unit periods
  /// touched by `[start, end]`.
  #[must_use]
  pub fn units_between(
    self,
    start: NaiveDateTime,
    end: NaiveDateTime,
    week_start: WeekStart
  ) -> u64 {
    if end < start {
      return 0;
    }

    let a =
      self.start_of(start, week_start);
    let b =
      self.start_of(end, week_start);
    let whole = match self {
      | Self::Minute => {
        (b - a).num_minutes()
      }
      | Self::Hour => {
        (b - a).num_hours()
      }
      | Self::Day => {
        (b.date() - a.date()).num_days()
      }
      | Self::Week => {
        (b.date() - a.date()).num_days()
          / 7
      }
      | Self::Month => {
        month_index(b) - month_index(a)
      }
      | Self::Year => {
        i64::from(b.year() - a.year())
      }
    };

    u64::try_from(whole + 1)
      .unwrap_or(0)
  }

  /// Advances `dt` by `fraction` of
  /// `span` units, measured on the
  /// actual calendar length of that
  /// span.
  #[must_use]
  pub fn advance_fraction(
    self,
    dt: NaiveDateTime,
    span: u32,
    fraction: f64
  ) -> NaiveDateTime {
    let full_end =
      self.add(dt, i64::from(span));
    let total =
      (full_end - dt).num_milliseconds();
    let part = (total as f64
      * fraction.clamp(0.0, 1.0))
    .round() as i64;
    add_duration(
      dt,
      Duration::milliseconds(part)
    )
  }

  /// Places the sub-unit components
  /// of `source` (day of month, time
  /// of day, ...) inside the unit
  /// starting at `unit_start`.
  #[must_use]
  pub fn align_offset(
    self,
    source: NaiveDateTime,
    unit_start: NaiveDateTime,
    week_start: WeekStart
  ) -> NaiveDateTime {
    match self {
      | Self::Minute
      | Self::Hour
      | Self::Day
      | Self::Week => {
        let offset = source
          - self.start_of(
            source, week_start
          );
        add_duration(unit_start, offset)
      }
      | Self::Month => {
        let year = unit_start.year();
        let month = unit_start.month();
        let day = source
          .day()
          .min(days_in_month(year, month));
        NaiveDate::from_ymd_opt(
          year, month, day
        )
        .map(|date| {
          date.and_time(source.time())
        })
        .unwrap_or(unit_start)
      }
      | Self::Year => {
        let year = unit_start.year();
        let month = source.month();
        let day = source
          .day()
          .min(days_in_month(year, month));
        NaiveDate::from_ymd_opt(
          year, month, day
        )
        .map(|date| {
          date.and_time(source.time())
        })
        .unwrap_or(unit_start)
      }
    }
  }
}

impl fmt::Display for TimeUnit {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TimeUnit {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let lower =
      s.trim().to_ascii_lowercase();
    let trimmed = lower
      .strip_suffix('s')
      .unwrap_or(&lower);
    TimeUnit::ALL
      .into_iter()
      .find(|unit| {
        unit.as_str() == trimmed
      })
      .ok_or_else(|| {
        anyhow!(
          "unknown time unit: {s} \
           (expected minute, hour, \
           day, week, month or year)"
        )
      })
  }
}

pub(crate) fn add_duration(
  dt: NaiveDateTime,
  duration: Duration
) -> NaiveDateTime {
  dt.checked_add_signed(duration)
    .unwrap_or(dt)
}

pub(crate) fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

fn add_months(
  dt: NaiveDateTime,
  months: i64
) -> NaiveDateTime {
  let magnitude = Months::new(
    u32::try_from(months.unsigned_abs())
      .unwrap_or(u32::MAX)
  );
  let shifted = if months >= 0 {
    dt.checked_add_months(magnitude)
  } else {
    dt.checked_sub_months(magnitude)
  };
  shifted.unwrap_or(dt)
}

fn month_index(
  dt: NaiveDateTime
) -> i64 {
  i64::from(dt.year()) * 12
    + i64::from(dt.month0())
}

fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub(crate) fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
  .day()
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    NaiveDateTime
  };

  use super::{
    TimeUnit,
    WeekStart
  };

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32
  ) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
      .and_hms_opt(h, min, 0)
      .expect("valid time")
  }

  #[test]
  fn units_are_ordered_finest_first() {
    assert!(
      TimeUnit::Minute < TimeUnit::Hour
    );
    assert!(
      TimeUnit::Week < TimeUnit::Month
    );
    assert!(
      TimeUnit::Month < TimeUnit::Year
    );
  }

  #[test]
  fn week_start_controls_week_floor() {
    // 2024-01-03 is a Wednesday.
    let wed = at(2024, 1, 3, 15, 30);
    assert_eq!(
      TimeUnit::Week
        .start_of(wed, WeekStart::Sunday),
      at(2023, 12, 31, 0, 0)
    );
    assert_eq!(
      TimeUnit::Week
        .start_of(wed, WeekStart::Monday),
      at(2024, 1, 1, 0, 0)
    );
  }

  #[test]
  fn end_of_month_handles_leap_year() {
    let end = TimeUnit::Month.end_of(
      at(2024, 2, 10, 0, 0),
      WeekStart::Sunday
    );
    assert_eq!(
      end.format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string(),
      "2024-02-29 23:59:59.999"
    );
  }

  #[test]
  fn month_addition_clamps_day() {
    assert_eq!(
      TimeUnit::Month
        .add(at(2024, 1, 31, 0, 0), 1),
      at(2024, 2, 29, 0, 0)
    );
    assert_eq!(
      TimeUnit::Year
        .add(at(2024, 2, 29, 0, 0), 1),
      at(2025, 2, 28, 0, 0)
    );
  }

  #[test]
  fn units_between_counts_touched_periods()
  {
    let start = at(2024, 1, 1, 0, 0);
    let end = TimeUnit::Day.add(start, 7)
      - chrono::Duration::milliseconds(1);
    assert_eq!(
      TimeUnit::Day.units_between(
        start,
        end,
        WeekStart::Sunday
      ),
      7
    );
    assert_eq!(
      TimeUnit::Hour.units_between(
        start,
        end,
        WeekStart::Sunday
      ),
      168
    );
    assert_eq!(
      TimeUnit::Month.units_between(
        at(2024, 1, 15, 0, 0),
        at(2024, 2, 14, 23, 59),
        WeekStart::Sunday
      ),
      2
    );
    assert_eq!(
      TimeUnit::Day.units_between(
        end,
        start,
        WeekStart::Sunday
      ),
      0
    );
  }

  #[test]
  fn align_offset_keeps_day_of_month() {
    let aligned =
      TimeUnit::Month.align_offset(
        at(2024, 1, 31, 6, 0),
        at(2024, 2, 1, 0, 0),
        WeekStart::Sunday
      );
    assert_eq!(
      aligned,
      at(2024, 2, 29, 6, 0)
    );
  }

  #[test]
  fn parses_unit_names() {
    assert_eq!(
      "Hours"
        .parse::<TimeUnit>()
        .expect("parse unit"),
      TimeUnit::Hour
    );
    assert!(
      "fortnight"
        .parse::<TimeUnit>()
        .is_err()
    );
  }
}
