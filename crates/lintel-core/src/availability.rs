use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  Datelike,
  NaiveDateTime,
  NaiveTime,
  Timelike
};
use regex::Regex;
use serde::Serialize;

use crate::unit::{
  TimeUnit,
  WeekStart,
  add_days
};

const MINUTES_PER_DAY: u32 = 24 * 60;
const SEARCH_HORIZON_MONTHS: i64 = 24;

/// Half-open time-of-day range, in
/// minutes since midnight.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize
)]
pub struct TimeFrame {
  pub start: u32,
  pub end:   u32
}

impl TimeFrame {
  pub fn new(
    start: u32,
    end: u32
  ) -> anyhow::Result<Self> {
    if end > MINUTES_PER_DAY {
      return Err(anyhow!(
        "time frame end past midnight: \
         {end} minutes"
      ));
    }
    if start >= end {
      return Err(anyhow!(
        "time frame start must be \
         before its end"
      ));
    }
    Ok(Self { start, end })
  }

  #[must_use]
  pub fn full_day() -> Self {
    Self {
      start: 0,
      end:   MINUTES_PER_DAY
    }
  }

  fn contains(
    &self,
    minute: u32
  ) -> bool {
    minute >= self.start
      && minute < self.end
  }
}

impl fmt::Display for TimeFrame {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "{:02}:{:02}-{:02}:{:02}",
      self.start / 60,
      self.start % 60,
      self.end / 60,
      self.end % 60
    )
  }
}

impl FromStr for TimeFrame {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let frame_re = Regex::new(
      r"^(?P<sh>\d{1,2}):(?P<sm>\d{2})\s*-\s*(?P<eh>\d{1,2}):(?P<em>\d{2})$"
    )
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })?;
    let caps = frame_re
      .captures(s.trim())
      .ok_or_else(|| {
        anyhow!(
          "expected HH:MM-HH:MM, got: \
           {s}"
        )
      })?;

    let field = |name: &str| {
      caps
        .name(name)
        .map(|m| m.as_str())
        .ok_or_else(|| {
          anyhow!(
            "missing {name} in time \
             frame"
          )
        })?
        .parse::<u32>()
        .with_context(|| {
          format!(
            "invalid {name} in time \
             frame {s}"
          )
        })
    };

    let (sh, sm) =
      (field("sh")?, field("sm")?);
    let (eh, em) =
      (field("eh")?, field("em")?);
    if sh > 23 || sm > 59 || em > 59 {
      return Err(anyhow!(
        "time frame out of range: {s}"
      ));
    }
    if eh > 24 || (eh == 24 && em > 0)
    {
      return Err(anyhow!(
        "time frame out of range: {s}"
      ));
    }

    TimeFrame::new(
      sh * 60 + sm,
      eh * 60 + em
    )
    .with_context(|| {
      format!("invalid time frame {s}")
    })
  }
}

enum FramePosition {
  Inside,
  Before(u32),
  After
}

/// Allowed months (0-11), weekdays
/// (0-6, Sunday = 0) and time-of-day
/// frames. `None` leaves a dimension
/// unrestricted; an empty set allows
/// nothing.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq
)]
pub struct AvailabilityFilter {
  months:      Option<BTreeSet<u32>>,
  weekdays:    Option<BTreeSet<u32>>,
  time_frames: Option<Vec<TimeFrame>>
}

impl AvailabilityFilter {
  #[must_use]
  pub fn unrestricted() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_months<I>(
    mut self,
    months: I
  ) -> Self
  where
    I: IntoIterator<Item = u32>
  {
    self.months = Some(
      months
        .into_iter()
        .filter(|m| *m < 12)
        .collect()
    );
    self
  }

  #[must_use]
  pub fn with_weekdays<I>(
    mut self,
    weekdays: I
  ) -> Self
  where
    I: IntoIterator<Item = u32>
  {
    self.weekdays = Some(
      weekdays
        .into_iter()
        .filter(|d| *d < 7)
        .collect()
    );
    self
  }

  #[must_use]
  pub fn with_time_frames<I>(
    mut self,
    frames: I
  ) -> Self
  where
    I: IntoIterator<Item = TimeFrame>
  {
    let mut frames: Vec<TimeFrame> =
      frames.into_iter().collect();
    frames.sort();
    self.time_frames = Some(frames);
    self
  }

  #[must_use]
  pub fn is_unrestricted(
    &self
  ) -> bool {
    self.months.is_none()
      && self.weekdays.is_none()
      && self.time_frames.is_none()
  }

  pub fn month_allowed(
    &self,
    dt: NaiveDateTime
  ) -> bool {
    self.months.as_ref().is_none_or(
      |months| {
        months.contains(&dt.month0())
      }
    )
  }

  pub fn weekday_allowed(
    &self,
    dt: NaiveDateTime
  ) -> bool {
    self.weekdays.as_ref().is_none_or(
      |days| {
        days.contains(
          &dt
            .weekday()
            .num_days_from_sunday()
        )
      }
    )
  }

  fn frame_position(
    &self,
    dt: NaiveDateTime
  ) -> FramePosition {
    let Some(frames) =
      self.time_frames.as_ref()
    else {
      return FramePosition::Inside;
    };

    let minute =
      dt.hour() * 60 + dt.minute();
    if frames
      .iter()
      .any(|frame| frame.contains(minute))
    {
      return FramePosition::Inside;
    }

    frames
      .iter()
      .map(|frame| frame.start)
      .filter(|start| *start > minute)
      .min()
      .map_or(
        FramePosition::After,
        FramePosition::Before
      )
  }

  /// First instant at or after `from`
  /// that passes the filter at the
  /// granularity of `unit`: months
  /// always, weekdays below month,
  /// time frames below day.
  pub fn next_allowed(
    &self,
    from: NaiveDateTime,
    unit: TimeUnit
  ) -> Option<NaiveDateTime> {
    let horizon = TimeUnit::Month
      .add(from, SEARCH_HORIZON_MONTHS);
    let mut date = from;

    while date <= horizon {
      if !self.month_allowed(date) {
        date = TimeUnit::Month.add(
          TimeUnit::Month.start_of(
            date,
            WeekStart::Sunday
          ),
          1
        );
        continue;
      }

      if unit < TimeUnit::Month
        && !self.weekday_allowed(date)
      {
        date = next_day(date);
        continue;
      }

      if unit < TimeUnit::Day {
        match self.frame_position(date) {
          | FramePosition::Inside => {}
          | FramePosition::Before(
            minute
          ) => {
            date = date
              .date()
              .and_hms_opt(
                minute / 60,
                minute % 60,
                0
              )
              .unwrap_or(date);
            continue;
          }
          | FramePosition::After => {
            date = next_day(date);
            continue;
          }
        }
      }

      return Some(date);
    }

    None
  }

  /// Whether any allowed minute lies
  /// in `[start, end]`.
  pub fn has_allowed_between(
    &self,
    start: NaiveDateTime,
    end: NaiveDateTime
  ) -> bool {
    if self.is_unrestricted() {
      return start <= end;
    }
    self
      .next_allowed(
        start,
        TimeUnit::Minute
      )
      .is_some_and(|date| date <= end)
  }
}

fn next_day(
  dt: NaiveDateTime
) -> NaiveDateTime {
  add_days(dt.date(), 1)
    .and_time(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    NaiveDate,
    NaiveDateTime
  };

  use super::{
    AvailabilityFilter,
    TimeFrame
  };
  use crate::unit::TimeUnit;

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
  fn parses_time_frames() {
    let frame: TimeFrame = "08:30-17:00"
      .parse()
      .expect("parse frame");
    assert_eq!(frame.start, 510);
    assert_eq!(frame.end, 1020);
    assert_eq!(
      frame.to_string(),
      "08:30-17:00"
    );

    let whole: TimeFrame = "00:00-24:00"
      .parse()
      .expect("parse full day");
    assert_eq!(
      whole,
      TimeFrame::full_day()
    );

    assert!(
      "17:00-08:00"
        .parse::<TimeFrame>()
        .is_err()
    );
    assert!(
      "8am-5pm"
        .parse::<TimeFrame>()
        .is_err()
    );
  }

  #[test]
  fn skips_disallowed_months() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_months([2, 3]);
    let next = filter
      .next_allowed(
        at(2024, 1, 15, 10, 0),
        TimeUnit::Day
      )
      .expect("allowed date");
    assert_eq!(
      next,
      at(2024, 3, 1, 0, 0)
    );
  }

  #[test]
  fn weekday_filter_applies_below_month() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_weekdays([1, 2, 3, 4, 5]);
    // 2024-01-06 is a Saturday.
    let saturday = at(2024, 1, 6, 9, 0);
    let next = filter
      .next_allowed(
        saturday,
        TimeUnit::Day
      )
      .expect("allowed date");
    assert_eq!(
      next.weekday(),
      chrono::Weekday::Mon
    );
    assert_eq!(
      filter.next_allowed(
        saturday,
        TimeUnit::Month
      ),
      Some(saturday)
    );
  }

  #[test]
  fn time_frames_jump_to_next_frame() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_time_frames([
          "09:00-12:00"
            .parse::<TimeFrame>()
            .expect("frame"),
          "13:00-17:00"
            .parse::<TimeFrame>()
            .expect("frame")
        ]);
    assert_eq!(
      filter.next_allowed(
        at(2024, 1, 1, 12, 30),
        TimeUnit::Hour
      ),
      Some(at(2024, 1, 1, 13, 0))
    );
    assert_eq!(
      filter.next_allowed(
        at(2024, 1, 1, 18, 0),
        TimeUnit::Hour
      ),
      Some(at(2024, 1, 2, 9, 0))
    );
    assert_eq!(
      filter.next_allowed(
        at(2024, 1, 1, 18, 0),
        TimeUnit::Day
      ),
      Some(at(2024, 1, 1, 18, 0))
    );
  }

  #[test]
  fn empty_set_allows_nothing() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_weekdays(Vec::new());
    assert_eq!(
      filter.next_allowed(
        at(2024, 1, 1, 0, 0),
        TimeUnit::Hour
      ),
      None
    );
    assert!(!filter.has_allowed_between(
      at(2024, 1, 1, 0, 0),
      at(2024, 12, 31, 0, 0)
    ));
  }
}
