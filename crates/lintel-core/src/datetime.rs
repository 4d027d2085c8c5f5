use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Offset,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

use crate::unit::add_days;

const TIMEZONE_ENV_VAR: &str =
  "LINTEL_TIMEZONE";

/// Grid timezone: `LINTEL_TIMEZONE`,
/// then the configured id, then UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  {
    if let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    ) {
      return tz;
    }
  }

  if let Some(raw) = configured {
    if let Some(tz) =
      parse_timezone(raw, "config")
    {
      return tz;
    }
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured grid timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Epoch milliseconds for a wall-clock
/// time. Ambiguous times resolve to the
/// earliest instant; times inside a gap
/// map to the transition that opens it.
#[must_use]
pub fn to_millis(
  tz: Tz,
  local: NaiveDateTime
) -> i64 {
  match tz.from_local_datetime(&local) {
    | LocalResult::Single(dt) => {
      dt.timestamp_millis()
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      first
        .timestamp_millis()
        .min(second.timestamp_millis())
    }
    | LocalResult::None => {
      gap_transition_millis(tz, local)
    }
  }
}

/// First instant carrying the offset in
/// force after the gap containing
/// `local`.
fn gap_transition_millis(
  tz: Tz,
  local: NaiveDateTime
) -> i64 {
  let offset_at = |utc: NaiveDateTime| {
    i64::from(
      tz.offset_from_utc_datetime(&utc)
        .fix()
        .local_minus_utc()
    )
  };
  let shifted = |offset: i64| {
    (local - Duration::seconds(offset))
      .and_utc()
      .timestamp_millis()
  };

  let before = offset_at(
    local
      .checked_sub_signed(Duration::days(1))
      .unwrap_or(local)
  );
  let after = offset_at(
    local
      .checked_add_signed(Duration::days(1))
      .unwrap_or(local)
  );

  // `lo` still carries the old offset,
  // `hi` already carries the new one.
  let mut lo = shifted(after);
  let mut hi = shifted(before);
  if lo >= hi {
    return hi;
  }
  while hi - lo > 1 {
    let mid = lo + (hi - lo) / 2;
    let mid_offset =
      DateTime::<Utc>::from_timestamp_millis(
        mid
      )
      .map_or(after, |dt| {
        offset_at(dt.naive_utc())
      });
    if mid_offset == before {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  hi
}

#[must_use]
pub fn from_millis(
  tz: Tz,
  millis: i64
) -> Option<NaiveDateTime> {
  DateTime::<Utc>::from_timestamp_millis(
    millis
  )
  .map(|dt| {
    dt.with_timezone(&tz).naive_local()
  })
}

/// Parses a grid start expression into
/// wall-clock time in `tz`.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_start_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<NaiveDateTime> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_now =
    now.with_timezone(&tz).naive_local();
  let today = local_now.date();

  match lower.as_str() {
    | "now" => return Ok(local_now),
    | "today" => {
      return Ok(midnight(today));
    }
    | "tomorrow" => {
      return Ok(midnight(add_days(
        today, 1
      )));
    }
    | "yesterday" => {
      return Ok(midnight(add_days(
        today, -1
      )));
    }
    | _ => {}
  }

  if token.len() == 4
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let year: i32 =
      token.parse().context(
        "invalid 4-digit year"
      )?;
    let date = NaiveDate::from_ymd_opt(
      year, 1, 1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid year value: {year}"
      )
    })?;
    return Ok(midnight(date));
  }

  if token.len() > 4
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let millis: i64 =
      token.parse().context(
        "invalid epoch milliseconds"
      )?;
    return from_millis(tz, millis)
      .ok_or_else(|| {
        anyhow!(
          "epoch milliseconds out of \
           range: {millis}"
        )
      });
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(midnight(
      next_weekday_date(
        today,
        target_weekday
      )
    ));
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let mut year = today.year();
    if target_month <= today.month() {
      year = year.saturating_add(1);
    }
    let date = NaiveDate::from_ymd_opt(
      year,
      target_month,
      1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month/year \
         candidate"
      )
    })?;
    return Ok(midnight(date));
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };

    return Ok(
      if sign == "-" {
        local_now - duration
      } else {
        local_now + duration
      }
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      dt.with_timezone(&tz).naive_local()
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(midnight(date));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Ok(ndt);
    }
  }

  Err(anyhow!(
    "unrecognized start expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     4-digit year, epoch milliseconds, \
     weekday names (e.g. monday), month \
     names (e.g. march), +Nd/+Nh/+Nm, \
     RFC3339, YYYY-MM-DD, \
     YYYY-MM-DDTHH:MM[:SS], \
     YYYY-MM-DD HH:MM"
  })
}

fn midnight(
  date: NaiveDate
) -> NaiveDateTime {
  date.and_time(NaiveTime::MIN)
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = i64::from(
    from
      .weekday()
      .num_days_from_monday()
  );
  let target_idx = i64::from(
    target.num_days_from_monday()
  );
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}
