use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::availability::{
  AvailabilityFilter,
  TimeFrame
};
use crate::datetime::{
  parse_start_expr,
  resolve_timezone
};
use crate::header_group::{
  HeaderDefinition,
  HeaderGroupConfig,
  HeaderPreset,
  TimeSpan
};
use crate::unit::{
  TimeUnit,
  WeekStart
};

const CONFIG_ENV_VAR: &str =
  "LINTEL_CONFIG";

/// Largest finest-row cell count a
/// resolved config may ask for.
pub const MAX_FINEST_CELLS: u64 = 100_000;

fn default_span() -> i64 {
  1
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
pub struct RawTimeSpan {
  pub unit: TimeUnit,
  #[serde(default = "default_span")]
  pub span: i64
}

impl Default for RawTimeSpan {
  fn default() -> Self {
    Self {
      unit: TimeUnit::Day,
      span: 1
    }
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
pub struct RawHeader {
  pub unit:  TimeUnit,
  #[serde(default = "default_span")]
  pub span:  i64,
  #[serde(default)]
  pub label: String
}

/// `headers = "hour_and_day"` or a list
/// of `{ unit, span, label }` tables.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(untagged)]
pub enum HeadersSetting {
  Preset(String),
  List(Vec<RawHeader>)
}

impl Default for HeadersSetting {
  fn default() -> Self {
    Self::Preset(
      HeaderPreset::default()
        .name()
        .to_string()
    )
  }
}

/// Grid settings as written in
/// `grid.toml`, before sanitizing.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize
)]
#[serde(default)]
pub struct GridConfig {
  pub start: Option<String>,
  pub time_span: RawTimeSpan,
  pub headers: HeadersSetting,
  pub available_months: Option<Vec<i64>>,
  pub available_days_of_the_week:
    Option<Vec<i64>>,
  pub available_time_frames:
    Option<Vec<String>>,
  pub timezone: Option<String>,
  pub week_start: Option<String>,
  pub show_disabled_dates: bool,
  #[serde(skip)]
  pub loaded_files: Vec<PathBuf>
}

impl GridConfig {
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let path = resolve_config_path(
      config_override
    )?;
    let Some(path) = path else {
      warn!(
        "no grid config found; using \
         defaults"
      );
      return Ok(Self::default());
    };

    info!(config = %path.display(), "loading grid config");
    let path = expand_tilde(&path);
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    let mut cfg = Self::from_toml_str(
      &text
    )
    .with_context(|| {
      format!(
        "invalid grid config {}",
        path.display()
      )
    })?;
    cfg.loaded_files.push(path);
    Ok(cfg)
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let cfg: Self = toml::from_str(text)
      .context(
        "failed to parse grid TOML"
      )?;
    trace!(?cfg, "parsed grid config");
    Ok(cfg)
  }

  /// Applies `key=value` pairs on top of
  /// the loaded file. Unknown keys are
  /// logged and skipped.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .trim()
        .strip_prefix("grid.")
        .unwrap_or(k.trim())
        .to_string();
      let value = v.trim().to_string();
      debug!(key = %key, value = %value, "applying override");

      match key.as_str() {
        | "start" => {
          self.start = Some(value)
        }
        | "time_span" => {
          self.time_span =
            parse_time_span(&value)?;
        }
        | "time_span.unit" => {
          self.time_span.unit =
            value.parse()?;
        }
        | "time_span.span" => {
          self.time_span.span = value
            .parse()
            .with_context(|| {
              format!(
                "invalid span: {value}"
              )
            })?;
        }
        | "headers" => {
          self.headers =
            parse_headers_setting(&value)?;
        }
        | "available_months" => {
          self.available_months =
            parse_index_list(&value)?;
        }
        | "available_days_of_the_week" => {
          self.available_days_of_the_week =
            parse_index_list(&value)?;
        }
        | "available_time_frames" => {
          self.available_time_frames =
            parse_string_list(&value);
        }
        | "timezone" => {
          self.timezone = Some(value)
        }
        | "week_start" => {
          self.week_start = Some(value)
        }
        | "show_disabled_dates" => {
          self.show_disabled_dates =
            parse_bool(&value);
        }
        | _ => {
          warn!(key = %key, "unknown grid setting; ignoring");
        }
      }
    }
    Ok(())
  }

  /// Sanitizes the raw settings into the
  /// engine configuration.
  #[tracing::instrument(skip(self, now))]
  pub fn resolve(
    &self,
    now: DateTime<Utc>
  ) -> anyhow::Result<HeaderGroupConfig> {
    let timezone = resolve_timezone(
      self.timezone.as_deref()
    );
    let start_expr = self
      .start
      .as_deref()
      .unwrap_or("today");
    let start = parse_start_expr(
      start_expr, now, timezone
    )
    .with_context(|| {
      format!(
        "invalid grid start: \
         {start_expr}"
      )
    })?;

    let time_span = TimeSpan {
      unit: self.time_span.unit,
      span: sanitize_span(
        self.time_span.span,
        "time_span"
      )
    };

    let week_start = match self
      .week_start
      .as_deref()
    {
      | None => WeekStart::default(),
      | Some(raw) => {
        WeekStart::from_name(raw)
          .unwrap_or_else(|| {
            warn!(
              value = %raw,
              "invalid week_start; using sunday"
            );
            WeekStart::default()
          })
      }
    };

    let mut config =
      HeaderGroupConfig::new(start);
    config.time_span = time_span;
    config.headers = self.header_definitions()?;
    config.availability =
      self.availability()?;
    config.week_start = week_start;
    config.show_disabled_dates =
      self.show_disabled_dates;
    config.timezone = timezone;
    check_cell_budget(&config)?;

    info!(
      start = %config.start,
      unit = %config.time_span.unit,
      span = config.time_span.span,
      rows = config.headers.len(),
      timezone = %config.timezone,
      "resolved grid config"
    );
    Ok(config)
  }

  fn header_definitions(
    &self
  ) -> anyhow::Result<Vec<HeaderDefinition>>
  {
    match &self.headers {
      | HeadersSetting::Preset(name) => {
        let preset = name
          .parse::<HeaderPreset>()?;
        debug!(preset = preset.name(), "using header preset");
        Ok(preset.definitions())
      }
      | HeadersSetting::List(list)
        if list.is_empty() =>
      {
        warn!(
          "empty header list; using \
           default preset"
        );
        Ok(
          HeaderPreset::default()
            .definitions()
        )
      }
      | HeadersSetting::List(list) => {
        Ok(
          list
            .iter()
            .map(|raw| {
              HeaderDefinition::new(
                raw.unit,
                sanitize_span(
                  raw.span, "header"
                ),
                raw.label.clone()
              )
            })
            .collect()
        )
      }
    }
  }

  fn availability(
    &self
  ) -> anyhow::Result<AvailabilityFilter> {
    let mut filter =
      AvailabilityFilter::unrestricted();

    if let Some(months) = non_empty(
      self.available_months.as_deref(),
      12,
      "available_months"
    ) {
      filter = filter.with_months(months);
    }

    if let Some(days) = non_empty(
      self
        .available_days_of_the_week
        .as_deref(),
      7,
      "available_days_of_the_week"
    ) {
      filter = filter.with_weekdays(days);
    }

    if let Some(frames) = self
      .available_time_frames
      .as_ref()
      .filter(|frames| {
        if frames.is_empty() {
          warn!(
            "available_time_frames is \
             empty; allowing the full day"
          );
        }
        !frames.is_empty()
      })
    {
      let parsed = frames
        .iter()
        .map(|raw| {
          raw.parse::<TimeFrame>().with_context(
            || {
              format!(
                "invalid time frame: {raw}"
              )
            }
          )
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
      filter =
        filter.with_time_frames(parsed);
    }

    Ok(filter)
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(config_env) =
    std::env::var(CONFIG_ENV_VAR)
  {
    if config_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      config_env
    )));
  }

  let Some(config_dir) = dirs::config_dir()
  else {
    debug!(
      "cannot determine config \
       directory"
    );
    return Ok(None);
  };
  let candidate = config_dir
    .join("lintel")
    .join("grid.toml");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn sanitize_span(
  span: i64,
  field: &str
) -> u32 {
  if span < 1 {
    warn!(field, span, "span below 1; using 1");
    return 1;
  }
  u32::try_from(span).unwrap_or_else(|_| {
    warn!(field, span, "span too large; clamping");
    u32::MAX
  })
}

/// Rejects windows whose finest row would
/// exceed [`MAX_FINEST_CELLS`].
fn check_cell_budget(
  config: &HeaderGroupConfig
) -> anyhow::Result<()> {
  let span = config.time_span;
  let end = span.unit.add(
    config.start,
    i64::from(span.span)
  );
  if end <= config.start {
    return Err(anyhow!(
      "time span of {} {} runs past \
       the supported calendar range",
      span.span,
      span.unit
    ));
  }

  let (unit, unit_span) = config
    .headers
    .iter()
    .map(|def| (def.unit, def.span.max(1)))
    .min()
    .filter(|(unit, _)| *unit <= span.unit)
    .unwrap_or((span.unit, 1));
  let cells = unit.units_between(
    config.start,
    end,
    config.week_start
  ) / u64::from(unit_span);
  trace!(%unit, cells, "estimated finest cells");

  if cells > MAX_FINEST_CELLS {
    return Err(anyhow!(
      "time span of {} {} needs about \
       {cells} {unit} cells; the limit \
       is {MAX_FINEST_CELLS}",
      span.span,
      span.unit
    ));
  }
  Ok(())
}

/// Sanitized indices, or `None` when the
/// list is missing or nothing valid is
/// left in it.
fn non_empty(
  values: Option<&[i64]>,
  limit: u32,
  field: &str
) -> Option<Vec<u32>> {
  let indices = sanitize_indices(
    values?, limit, field
  );
  if indices.is_empty() {
    warn!(
      field,
      "no usable values; leaving \
       unrestricted"
    );
    return None;
  }
  Some(indices)
}

fn sanitize_indices(
  values: &[i64],
  limit: u32,
  field: &str
) -> Vec<u32> {
  values
    .iter()
    .filter_map(|value| {
      match u32::try_from(*value) {
        | Ok(idx) if idx < limit => {
          Some(idx)
        }
        | _ => {
          warn!(
            field,
            value,
            "dropping out-of-range index"
          );
          None
        }
      }
    })
    .collect()
}

/// `day` or `day:7`.
fn parse_time_span(
  raw: &str
) -> anyhow::Result<RawTimeSpan> {
  let (unit, span) = match raw
    .split_once(':')
  {
    | Some((unit, span)) => {
      (unit, Some(span))
    }
    | None => (raw, None)
  };
  let span = match span {
    | Some(span) => {
      span.trim().parse().with_context(
        || format!("invalid span: {span}")
      )?
    }
    | None => 1
  };
  Ok(RawTimeSpan {
    unit: unit.parse()?,
    span
  })
}

/// A preset name, or `unit[:span[:label]]`
/// entries separated by `;`.
fn parse_headers_setting(
  raw: &str
) -> anyhow::Result<HeadersSetting> {
  if !raw.contains(':')
    && !raw.contains(';')
    && raw.parse::<HeaderPreset>().is_ok()
  {
    return Ok(HeadersSetting::Preset(
      raw.to_string()
    ));
  }

  let mut list = Vec::new();
  for entry in raw
    .split(';')
    .map(str::trim)
    .filter(|entry| !entry.is_empty())
  {
    let mut parts = entry.splitn(3, ':');
    let unit = parts
      .next()
      .ok_or_else(|| {
        anyhow!("empty header entry")
      })?
      .parse::<TimeUnit>()?;
    let span = match parts.next() {
      | Some(span)
        if !span.trim().is_empty() =>
      {
        span.trim().parse().with_context(
          || {
            format!(
              "invalid header span: \
               {span}"
            )
          }
        )?
      }
      | _ => 1
    };
    let label = parts
      .next()
      .unwrap_or_default()
      .to_string();
    list.push(RawHeader {
      unit,
      span,
      label
    });
  }

  if list.is_empty() {
    return Err(anyhow!(
      "headers override is empty"
    ));
  }
  Ok(HeadersSetting::List(list))
}

/// Comma-separated indices; `none`
/// clears the restriction.
fn parse_index_list(
  raw: &str
) -> anyhow::Result<Option<Vec<i64>>> {
  if raw.eq_ignore_ascii_case("none") {
    return Ok(None);
  }
  raw
    .split(',')
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .map(|item| {
      item.parse::<i64>().with_context(
        || format!("invalid index: {item}")
      )
    })
    .collect::<anyhow::Result<Vec<_>>>()
    .map(Some)
}

fn parse_string_list(
  raw: &str
) -> Option<Vec<String>> {
  if raw.eq_ignore_ascii_case("none") {
    return None;
  }
  Some(
    raw
      .split(',')
      .map(str::trim)
      .filter(|item| !item.is_empty())
      .map(str::to_string)
      .collect()
  )
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    GridConfig,
    HeadersSetting
  };
  use crate::header_group::HeaderPreset;
  use crate::unit::{
    TimeUnit,
    WeekStart
  };

  fn now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2024, 3, 5, 10, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn parses_full_grid_file() {
    let cfg = GridConfig::from_toml_str(
      r#"
start = "2024-01-01"
week_start = "monday"
available_days_of_the_week = [1, 2, 3, 4, 5, 9]
available_time_frames = ["08:00-12:00", "13:00-17:00"]
timezone = "Europe/Paris"

[time_span]
unit = "day"
span = 7

[[headers]]
unit = "week"
label = "'Week' W"

[[headers]]
unit = "day"
span = 1
label = "ccc d"
"#
    )
    .expect("parse toml");

    assert_eq!(cfg.time_span.span, 7);
    assert!(matches!(
      &cfg.headers,
      HeadersSetting::List(list) if list.len() == 2
    ));

    let resolved =
      cfg.resolve(now()).expect("resolve");
    assert_eq!(
      resolved.start,
      NaiveDate::from_ymd_opt(2024, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time")
    );
    assert_eq!(
      resolved.week_start,
      WeekStart::Monday
    );
    assert_eq!(resolved.headers[0].span, 1);
    assert!(
      !resolved.availability.is_unrestricted()
    );
  }

  #[test]
  fn defaults_to_hour_and_day_preset() {
    let cfg = GridConfig::from_toml_str("")
      .expect("empty toml");
    let resolved =
      cfg.resolve(now()).expect("resolve");

    assert_eq!(
      resolved.headers,
      HeaderPreset::HourAndDay.definitions()
    );
    assert_eq!(
      resolved.time_span.unit,
      TimeUnit::Day
    );
    assert!(
      resolved.availability.is_unrestricted()
    );
  }

  #[test]
  fn sanitizes_spans_and_indices() {
    let cfg = GridConfig::from_toml_str(
      r#"
start = "2024-01-01"
available_months = [-1, 0, 5, 12]

[time_span]
unit = "hour"
span = 0
"#
    )
    .expect("parse toml");
    let resolved =
      cfg.resolve(now()).expect("resolve");

    assert_eq!(resolved.time_span.span, 1);
    assert!(
      resolved.availability.month_allowed(
        NaiveDate::from_ymd_opt(2024, 6, 1)
          .expect("valid date")
          .and_hms_opt(0, 0, 0)
          .expect("valid time")
      )
    );
    assert!(
      !resolved.availability.month_allowed(
        NaiveDate::from_ymd_opt(2024, 2, 1)
          .expect("valid date")
          .and_hms_opt(0, 0, 0)
          .expect("valid time")
      )
    );
  }

  #[test]
  fn empty_lists_fall_back_to_unrestricted() {
    let cfg = GridConfig::from_toml_str(
      r#"
start = "2024-01-01"
available_months = []
available_days_of_the_week = [7, 8]
available_time_frames = []
"#
    )
    .expect("parse toml");
    let resolved =
      cfg.resolve(now()).expect("resolve");

    assert!(
      resolved.availability.is_unrestricted()
    );
  }

  #[test]
  fn overrides_replace_file_values() {
    let mut cfg = GridConfig::default();
    cfg
      .apply_overrides([
        (
          "start".to_string(),
          "2024-02-01".to_string()
        ),
        (
          "grid.time_span".to_string(),
          "week:2".to_string()
        ),
        (
          "headers".to_string(),
          "week:1:'W'W;day::d".to_string()
        ),
        (
          "show_disabled_dates".to_string(),
          "yes".to_string()
        ),
        (
          "colour".to_string(),
          "blue".to_string()
        ),
      ])
      .expect("apply overrides");

    assert_eq!(
      cfg.time_span.unit,
      TimeUnit::Week
    );
    assert_eq!(cfg.time_span.span, 2);
    assert!(cfg.show_disabled_dates);
    let resolved =
      cfg.resolve(now()).expect("resolve");
    assert_eq!(resolved.headers.len(), 2);
    assert_eq!(
      resolved.headers[0].label,
      "'W'W"
    );
    assert_eq!(resolved.headers[1].span, 1);
    assert_eq!(resolved.headers[1].label, "d");
  }

  #[test]
  fn preset_override_is_kept_by_name() {
    let mut cfg = GridConfig::default();
    cfg
      .apply_overrides([(
        "headers".to_string(),
        "month_and_year".to_string()
      )])
      .expect("apply overrides");
    assert_eq!(
      cfg.headers,
      HeadersSetting::Preset(
        "month_and_year".to_string()
      )
    );
  }

  #[test]
  fn rejects_bad_values() {
    assert!(
      GridConfig::from_toml_str(
        "time_span = { unit = \"fortnight\" }"
      )
      .is_err()
    );

    let cfg = GridConfig::from_toml_str(
      "available_time_frames = [\"9am-5pm\"]"
    )
    .expect("parse toml");
    assert!(cfg.resolve(now()).is_err());

    let cfg = GridConfig::from_toml_str(
      "headers = \"fortnights\""
    )
    .expect("parse toml");
    assert!(cfg.resolve(now()).is_err());
  }

  #[test]
  fn rejects_oversized_windows() {
    let cfg = GridConfig::from_toml_str(
      r#"
start = "2024-01-01"

[time_span]
unit = "day"
span = 1000000
"#
    )
    .expect("parse toml");
    let err = cfg
      .resolve(now())
      .expect_err("window too large");
    assert!(
      err.to_string().contains("limit")
    );

    let cfg = GridConfig::from_toml_str(
      r#"
start = "2024-01-01"
headers = "minute_and_hour"

[time_span]
unit = "day"
span = 2500
"#
    )
    .expect("parse toml");
    assert!(cfg.resolve(now()).is_err());

    let cfg = GridConfig::from_toml_str(
      r#"
start = "2024-01-01"

[time_span]
unit = "day"
span = 365
"#
    )
    .expect("parse toml");
    assert!(cfg.resolve(now()).is_ok());
  }
}
