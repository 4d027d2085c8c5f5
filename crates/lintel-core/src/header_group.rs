//! Orchestrates the stack of header
//! rows for one scheduler view.
//!
//! The row whose unit matches the time
//! span is the reference: it is built
//! first and fixes the window end. The
//! other rows are built against that end,
//! then every row is cut back to the
//! earliest natural end so coarse rows
//! never run past the finest one.
//!
//! Rows are immutable snapshots. Scrolling
//! right pushes the current snapshot on a
//! history stack and scrolling left pops
//! it, so a round trip restores the exact
//! same window.

use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Duration,
  NaiveDateTime
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::availability::AvailabilityFilter;
use crate::datetime::from_millis;
use crate::header_unit::{
  HeaderUnit,
  HeaderUnitParams
};
use crate::observer::{
  HeaderObserver,
  NoopObserver,
  ScrollDirection,
  VisibleInterval,
  VisibleWindowChange
};
use crate::unit::{
  TimeUnit,
  WeekStart
};

fn default_span() -> u32 {
  1
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
pub struct TimeSpan {
  pub unit: TimeUnit,
  #[serde(default = "default_span")]
  pub span: u32
}

impl Default for TimeSpan {
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
pub struct HeaderDefinition {
  pub unit:  TimeUnit,
  #[serde(default = "default_span")]
  pub span:  u32,
  /// Date-format pattern; empty means
  /// the unit's default label.
  #[serde(default)]
  pub label: String
}

impl HeaderDefinition {
  pub fn new(
    unit: TimeUnit,
    span: u32,
    label: impl Into<String>
  ) -> Self {
    Self {
      unit,
      span,
      label: label.into()
    }
  }

  fn label_pattern(&self) -> String {
    if self.label.trim().is_empty() {
      self.unit.default_label().to_string()
    } else {
      self.label.clone()
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum HeaderPreset {
  MinuteAndHour,
  MinuteHourAndDay,
  #[default]
  HourAndDay,
  HourDayAndWeek,
  DayAndMonth,
  DayAndWeek,
  DayWeekAndMonth,
  WeekAndMonth,
  WeekMonthAndYear,
  MonthAndYear,
  QuartersAndYear
}

impl HeaderPreset {
  pub const ALL: [HeaderPreset; 11] = [
    HeaderPreset::MinuteAndHour,
    HeaderPreset::MinuteHourAndDay,
    HeaderPreset::HourAndDay,
    HeaderPreset::HourDayAndWeek,
    HeaderPreset::DayAndMonth,
    HeaderPreset::DayAndWeek,
    HeaderPreset::DayWeekAndMonth,
    HeaderPreset::WeekAndMonth,
    HeaderPreset::WeekMonthAndYear,
    HeaderPreset::MonthAndYear,
    HeaderPreset::QuartersAndYear
  ];

  #[must_use]
  pub fn name(self) -> &'static str {
    match self {
      | Self::MinuteAndHour => {
        "minute_and_hour"
      }
      | Self::MinuteHourAndDay => {
        "minute_hour_and_day"
      }
      | Self::HourAndDay => "hour_and_day",
      | Self::HourDayAndWeek => {
        "hour_day_and_week"
      }
      | Self::DayAndMonth => "day_and_month",
      | Self::DayAndWeek => "day_and_week",
      | Self::DayWeekAndMonth => {
        "day_week_and_month"
      }
      | Self::WeekAndMonth => {
        "week_and_month"
      }
      | Self::WeekMonthAndYear => {
        "week_month_and_year"
      }
      | Self::MonthAndYear => {
        "month_and_year"
      }
      | Self::QuartersAndYear => {
        "quarters_and_year"
      }
    }
  }

  #[must_use]
  pub fn definitions(
    self
  ) -> Vec<HeaderDefinition> {
    use TimeUnit::{
      Day,
      Hour,
      Minute,
      Month,
      Week,
      Year
    };

    let def = HeaderDefinition::new;
    match self {
      | Self::MinuteAndHour => {
        vec![
          def(Hour, 1, "h a"),
          def(Minute, 30, "mm")
        ]
      }
      | Self::MinuteHourAndDay => {
        vec![
          def(Day, 1, "ccc, LLL d"),
          def(Hour, 1, "h a"),
          def(Minute, 30, "mm")
        ]
      }
      | Self::HourAndDay => {
        vec![
          def(Day, 1, "ccc, LLL d"),
          def(Hour, 1, "h a")
        ]
      }
      | Self::HourDayAndWeek => {
        vec![
          def(Week, 1, "'Week' W"),
          def(Day, 1, "ccc, LLL d"),
          def(Hour, 1, "h a")
        ]
      }
      | Self::DayAndMonth => {
        vec![
          def(Month, 1, "LLLL yyyy"),
          def(Day, 1, "d")
        ]
      }
      | Self::DayAndWeek => {
        vec![
          def(Week, 1, "'Week' W"),
          def(Day, 1, "ccc d")
        ]
      }
      | Self::DayWeekAndMonth => {
        vec![
          def(Month, 1, "LLLL yyyy"),
          def(Week, 1, "'Week' W"),
          def(Day, 1, "d")
        ]
      }
      | Self::WeekAndMonth => {
        vec![
          def(Month, 1, "LLLL yyyy"),
          def(Week, 1, "'Week' W")
        ]
      }
      | Self::WeekMonthAndYear => {
        vec![
          def(Year, 1, "yyyy"),
          def(Month, 1, "LLLL"),
          def(Week, 1, "'Week' W")
        ]
      }
      | Self::MonthAndYear => {
        vec![
          def(Year, 1, "yyyy"),
          def(Month, 1, "LLL")
        ]
      }
      | Self::QuartersAndYear => {
        vec![
          def(Year, 1, "yyyy"),
          def(Month, 3, "'Q'q")
        ]
      }
    }
  }
}

impl FromStr for HeaderPreset {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let wanted: String = s
      .chars()
      .filter(|c| c.is_ascii_alphanumeric())
      .map(|c| c.to_ascii_lowercase())
      .collect();
    HeaderPreset::ALL
      .into_iter()
      .find(|preset| {
        preset.name().replace('_', "")
          == wanted
      })
      .ok_or_else(|| {
        anyhow!(
          "unknown header preset: {s}"
        )
      })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderGroupConfig {
  pub start:               NaiveDateTime,
  pub time_span:           TimeSpan,
  pub headers:             Vec<HeaderDefinition>,
  pub availability:        AvailabilityFilter,
  pub week_start:          WeekStart,
  pub show_disabled_dates: bool,
  pub timezone:            Tz
}

impl HeaderGroupConfig {
  pub fn new(
    start: NaiveDateTime
  ) -> Self {
    Self {
      start,
      time_span: TimeSpan::default(),
      headers: HeaderPreset::default()
        .definitions(),
      availability:
        AvailabilityFilter::unrestricted(),
      week_start: WeekStart::default(),
      show_disabled_dates: false,
      timezone: chrono_tz::UTC
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
struct WindowSnapshot {
  start: NaiveDateTime,
  units: Vec<HeaderUnit>
}

#[derive(Debug)]
pub struct HeaderGroup<O = NoopObserver>
where
  O: HeaderObserver
{
  config:             HeaderGroupConfig,
  start:              NaiveDateTime,
  units:              Vec<HeaderUnit>,
  cell_width:         Option<f64>,
  visible_cell_count: usize,
  history:            Vec<WindowSnapshot>,
  observer:           O
}

impl HeaderGroup<NoopObserver> {
  pub fn without_observer(
    config: HeaderGroupConfig
  ) -> Self {
    Self::new(config, NoopObserver)
  }
}

impl<O> HeaderGroup<O>
where
  O: HeaderObserver
{
  pub fn new(
    config: HeaderGroupConfig,
    observer: O
  ) -> Self {
    let mut group = Self {
      start: config.start,
      config,
      units: Vec::new(),
      cell_width: None,
      visible_cell_count: 0,
      history: Vec::new(),
      observer
    };
    group.init_headers();
    group
  }

  /// Rebuilds every row from the
  /// configured start and resets the
  /// viewport state.
  #[tracing::instrument(skip(self), fields(start = %self.config.start))]
  pub fn init_headers(&mut self) {
    self.start = self.config.start;
    self.units =
      self.build_units(self.start);
    self.cell_width = None;
    self.visible_cell_count = self
      .finest()
      .map_or(0, |finest| {
        finest.cells().len()
      });
    self.history.clear();

    info!(
      rows = self.units.len(),
      visible_cells = self.visible_cell_count,
      "initialized headers"
    );
    if let Some(finest) = self.units.last() {
      self
        .observer
        .on_headers_changed(finest);
    }
  }

  fn build_units(
    &self,
    start: NaiveDateTime
  ) -> Vec<HeaderUnit> {
    let cfg = &self.config;
    let week_start = cfg.week_start;

    let mut defs = cfg.headers.clone();
    defs.sort_by(|a, b| b.unit.cmp(&a.unit));

    let ref_unit = cfg.time_span.unit;
    let ref_idx = defs
      .iter()
      .position(|def| def.unit == ref_unit);
    let is_hidden = ref_idx.is_none();
    let ref_def = ref_idx
      .and_then(|idx| defs.get(idx))
      .cloned()
      .unwrap_or_else(|| {
        HeaderDefinition::new(
          ref_unit,
          1,
          ""
        )
      });
    let finest_unit = defs
      .iter()
      .map(|def| def.unit)
      .chain([ref_unit])
      .min()
      .unwrap_or(ref_unit);

    let computed_end = ref_unit.add(
      start,
      i64::from(cfg.time_span.span.max(1))
    ) - Duration::milliseconds(1);
    let reference_columns = ref_unit
      .units_between(
        start,
        computed_end,
        week_start
      ) as f64
      / f64::from(ref_def.span.max(1));
    debug!(
      unit = %ref_unit,
      hidden = is_hidden,
      columns = reference_columns,
      "building reference row"
    );

    let reference =
      HeaderUnit::build(self.row_params(
        &ref_def,
        start,
        computed_end,
        reference_columns,
        true,
        is_hidden
      ));
    let group_end = if finest_unit < ref_unit {
      finest_unit
        .end_of(reference.end(), week_start)
    } else {
      reference.end()
    };
    let reference =
      reference.extend_to(group_end);
    let row_start = reference.start();

    let mut units =
      Vec::with_capacity(defs.len() + 1);
    for (idx, def) in defs.iter().enumerate()
    {
      if Some(idx) == ref_idx {
        units.push(reference.clone());
        continue;
      }
      let columns = def.unit.units_between(
        row_start,
        group_end,
        week_start
      ) as f64
        / f64::from(def.span.max(1));
      units.push(HeaderUnit::build(
        self.row_params(
          def, row_start, group_end,
          columns, false, false
        )
      ));
    }

    if is_hidden {
      let position = units
        .iter()
        .position(|unit| {
          unit.unit() < ref_unit
        })
        .unwrap_or(units.len());
      units.insert(position, reference);
    }

    let end = units
      .iter()
      .filter(|unit| !unit.cells().is_empty())
      .map(HeaderUnit::end)
      .min()
      .unwrap_or(group_end);
    if end < group_end {
      debug!(
        from = %group_end,
        to = %end,
        "shrinking rows to earliest row end"
      );
    }

    units
      .into_iter()
      .map(|unit| unit.truncate_to(end))
      .collect()
  }

  fn row_params<'a>(
    &'a self,
    def: &HeaderDefinition,
    start: NaiveDateTime,
    end: NaiveDateTime,
    number_of_cells: f64,
    is_reference: bool,
    is_hidden: bool
  ) -> HeaderUnitParams<'a> {
    HeaderUnitParams {
      unit: def.unit,
      span: def.span.max(1),
      label: def.label_pattern(),
      start,
      end,
      number_of_cells,
      is_reference,
      is_hidden,
      can_expand_over_end_of_unit:
        is_reference,
      availability: &self
        .config
        .availability,
      week_start: self.config.week_start,
      show_disabled_dates: self
        .config
        .show_disabled_dates,
      timezone: self.config.timezone
    }
  }

  /// Stores the rendered width of one
  /// finest cell and, when the viewport
  /// width is known, how many finest cells
  /// fit in it.
  #[tracing::instrument(skip(self))]
  pub fn measure(
    &mut self,
    cell_width: f64,
    viewport_width: Option<f64>
  ) {
    if !cell_width.is_finite()
      || cell_width <= 0.0
    {
      warn!(
        cell_width,
        "ignoring unusable cell width"
      );
      return;
    }

    self.cell_width = Some(cell_width);
    if let Some(viewport) =
      viewport_width.filter(|width| {
        width.is_finite() && *width > 0.0
      })
    {
      self.visible_cell_count =
        ((viewport / cell_width).floor()
          as usize)
          .max(1);
    }
    debug!(
      visible_cells = self.visible_cell_count,
      "measured viewport"
    );

    self.compute_widths();
    self
      .observer
      .on_cell_width_changed(cell_width);
  }

  fn compute_widths(&mut self) {
    let Some(base) = self.cell_width else {
      return;
    };
    let Some((finest, coarser)) =
      self.units.split_last_mut()
    else {
      return;
    };

    finest.fill_cell_widths(base);
    for unit in coarser.iter_mut() {
      unit.aggregate_cell_widths(finest);
    }
  }

  /// Moves the window one viewport to
  /// the right, or back to the previous
  /// window. Returns `false` when there
  /// is nothing to scroll to.
  #[tracing::instrument(skip(self))]
  pub fn scroll_to(
    &mut self,
    direction: ScrollDirection
  ) -> bool {
    match direction {
      | ScrollDirection::Left => {
        let Some(snapshot) =
          self.history.pop()
        else {
          debug!(
            "no previous window; ignoring"
          );
          return false;
        };
        self.start = snapshot.start;
        self.units = snapshot.units;
      }
      | ScrollDirection::Right => {
        let next_start = self
          .finest()
          .and_then(|finest| {
            finest
              .cells()
              .get(self.visible_cell_count)
          })
          .map(|cell| cell.local_start);
        let Some(next_start) = next_start
        else {
          debug!(
            "no cell past the viewport; \
             ignoring"
          );
          return false;
        };

        let units =
          self.build_units(next_start);
        let previous = WindowSnapshot {
          start: self.start,
          units: std::mem::replace(
            &mut self.units,
            units
          )
        };
        self.history.push(previous);
        self.start = next_start;
      }
    }

    self.compute_widths();
    let change = VisibleWindowChange {
      direction,
      visible_cell_count: self
        .visible_cell_count,
      interval: self.visible_interval()
    };
    debug!(
      start = %self.start,
      history = self.history.len(),
      "scrolled headers"
    );
    self
      .observer
      .on_visible_window_changed(&change);
    true
  }

  /// `[first finest start, last finest
  /// end]` as a half-open interval.
  pub fn visible_interval(
    &self
  ) -> Option<VisibleInterval> {
    let finest = self.finest()?;
    let first = finest.cells().first()?;
    let last = finest.cells().last()?;
    Some(VisibleInterval {
      start: first.start,
      end:   last.end + 1
    })
  }

  pub fn set_start(
    &mut self,
    start: NaiveDateTime
  ) {
    self.config.start = start;
    self.init_headers();
  }

  pub fn set_start_millis(
    &mut self,
    millis: i64
  ) {
    match from_millis(
      self.config.timezone,
      millis
    ) {
      | Some(start) => self.set_start(start),
      | None => {
        warn!(
          millis,
          "start out of range; ignoring"
        );
      }
    }
  }

  pub fn set_time_span(
    &mut self,
    time_span: TimeSpan
  ) {
    self.config.time_span = time_span;
    self.init_headers();
  }

  pub fn set_headers(
    &mut self,
    headers: Vec<HeaderDefinition>
  ) {
    self.config.headers = headers;
    self.init_headers();
  }

  pub fn set_availability(
    &mut self,
    availability: AvailabilityFilter
  ) {
    self.config.availability =
      availability;
    self.init_headers();
  }

  pub fn set_week_start(
    &mut self,
    week_start: WeekStart
  ) {
    self.config.week_start = week_start;
    self.init_headers();
  }

  pub fn set_show_disabled_dates(
    &mut self,
    show: bool
  ) {
    self.config.show_disabled_dates = show;
    self.init_headers();
  }

  pub fn set_timezone(
    &mut self,
    timezone: Tz
  ) {
    self.config.timezone = timezone;
    self.init_headers();
  }

  pub fn config(
    &self
  ) -> &HeaderGroupConfig {
    &self.config
  }

  /// Start of the current window.
  pub fn start(&self) -> NaiveDateTime {
    self.start
  }

  /// End of the current window.
  pub fn end(
    &self
  ) -> Option<NaiveDateTime> {
    self.finest().map(HeaderUnit::end)
  }

  /// Rows, coarsest first.
  pub fn units(&self) -> &[HeaderUnit] {
    &self.units
  }

  pub fn finest(
    &self
  ) -> Option<&HeaderUnit> {
    self.units.last()
  }

  pub fn reference(
    &self
  ) -> Option<&HeaderUnit> {
    self
      .units
      .iter()
      .find(|unit| unit.is_reference())
  }

  pub fn cell_width(&self) -> Option<f64> {
    self.cell_width
  }

  pub fn visible_cell_count(
    &self
  ) -> usize {
    self.visible_cell_count
  }

  pub fn can_scroll_left(&self) -> bool {
    !self.history.is_empty()
  }

  pub fn observer(&self) -> &O {
    &self.observer
  }

  pub fn observer_mut(
    &mut self
  ) -> &mut O {
    &mut self.observer
  }
}
