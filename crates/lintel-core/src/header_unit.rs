//! One row of a calendar header.
//!
//! A row walks forward from its start,
//! jumping over dates the availability
//! filter rejects, and emits one cell
//! per `span` units. The reference row
//! emits exactly the number of cells the
//! group asked for; every other row stops
//! at the group end.

use chrono::{
  Duration,
  NaiveDateTime
};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{
  debug,
  trace
};

use crate::availability::AvailabilityFilter;
use crate::datetime::to_millis;
use crate::label::format_label;
use crate::unit::{
  TimeUnit,
  WeekStart,
  add_duration
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
  pub label:       String,
  /// Epoch milliseconds, inclusive.
  pub start:       i64,
  /// Epoch milliseconds, inclusive.
  pub end:         i64,
  pub disabled:    bool,
  pub local_start: NaiveDateTime,
  pub local_end:   NaiveDateTime
}

impl Cell {
  pub fn contains(
    &self,
    millis: i64
  ) -> bool {
    millis >= self.start
      && millis <= self.end
  }
}

#[derive(Debug, Clone)]
pub struct HeaderUnitParams<'a> {
  pub unit: TimeUnit,
  pub span: u32,
  pub label: String,
  pub start: NaiveDateTime,
  pub end: NaiveDateTime,
  /// Upper bound on the cell count;
  /// a fractional part yields a partial
  /// trailing cell on the reference row.
  pub number_of_cells: f64,
  pub is_reference: bool,
  pub is_hidden: bool,
  pub can_expand_over_end_of_unit: bool,
  pub availability: &'a AvailabilityFilter,
  pub week_start: WeekStart,
  pub show_disabled_dates: bool,
  pub timezone: Tz
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderUnit {
  unit:                TimeUnit,
  span:                u32,
  label:               String,
  is_reference:        bool,
  is_hidden:           bool,
  start:               NaiveDateTime,
  end:                 NaiveDateTime,
  number_of_cells:     usize,
  cells:               Vec<Cell>,
  cell_widths:         Vec<f64>,
  #[serde(skip)]
  week_start:          WeekStart,
  #[serde(skip)]
  timezone:            Tz,
  #[serde(skip)]
  availability:        AvailabilityFilter,
  #[serde(skip)]
  show_disabled_dates: bool
}

impl HeaderUnit {
  #[tracing::instrument(
    skip_all,
    fields(
      unit = %params.unit,
      span = params.span,
      reference = params.is_reference
    )
  )]
  pub fn build(
    params: HeaderUnitParams<'_>
  ) -> Self {
    let mut header = Self {
      unit:                params.unit,
      span:                params.span.max(1),
      label:               params.label,
      is_reference:        params.is_reference,
      is_hidden:           params.is_hidden,
      start:               params.start,
      end:                 params.end,
      number_of_cells:     0,
      cells:               Vec::new(),
      cell_widths:         Vec::new(),
      week_start:          params.week_start,
      timezone:            params.timezone,
      availability:        params
        .availability
        .clone(),
      show_disabled_dates: params
        .show_disabled_dates
    };

    header.init_cells(
      params.start,
      params.end,
      params.number_of_cells,
      params.can_expand_over_end_of_unit
    );
    debug!(
      cells = header.cells.len(),
      start = %header.start,
      end = %header.end,
      "built header row"
    );
    header
  }

  fn init_cells(
    &mut self,
    start: NaiveDateTime,
    end: NaiveDateTime,
    number_of_cells: f64,
    can_expand_over_end_of_unit: bool
  ) {
    let week_start = self.week_start;
    let span = i64::from(self.span);
    let mut target = number_of_cells;
    let mut cells: Vec<Cell> = Vec::new();
    let mut date = start;

    loop {
      if self.is_reference
        && cells.len() as f64
          >= target.ceil()
      {
        break;
      }

      if self.filters_active() {
        // Only the first week cell is
        // anchored on an allowed weekday.
        let granularity = if self.unit
          == TimeUnit::Week
          && !cells.is_empty()
        {
          TimeUnit::Month
        } else {
          self.unit
        };
        match self
          .availability
          .next_allowed(date, granularity)
        {
          | Some(next) => date = next,
          | None => {
            debug!(
              from = %date,
              "no allowed date left"
            );
            break;
          }
        }
      }

      if !self.is_reference && date > end
      {
        break;
      }

      if cells.is_empty()
        && self.is_reference
        && self.unit == TimeUnit::Week
        && date != start
      {
        let shifted_end =
          add_duration(date, end - start);
        target = self.unit.units_between(
          date,
          shifted_end,
          week_start
        ) as f64
          / f64::from(self.span);
        debug!(
          from = %date,
          target,
          "recomputed week cell count"
        );
        if target <= 0.0 {
          break;
        }
      }

      let unit_start =
        self.unit.start_of(date, week_start);
      let mut cell_end = self.unit.end_of(
        self.unit.add(unit_start, span - 1),
        week_start
      );

      let is_last = self.is_reference
        && (cells.len() + 1) as f64
          >= target.ceil();
      let fraction = target.fract();
      if is_last && fraction > 0.0 {
        let partial = self
          .unit
          .advance_fraction(
            unit_start,
            self.span,
            fraction
          )
          - Duration::milliseconds(1);
        if partial >= date {
          cell_end = partial.min(cell_end);
        }
      }

      if !self.is_reference
        && cell_end > end
      {
        cell_end = end;
      }

      trace!(
        start = %date,
        end = %cell_end,
        "generated cell"
      );
      cells.push(
        self.make_cell(date, cell_end)
      );
      date = cell_end
        + Duration::milliseconds(1);
    }

    self.cells = cells;
    self.drop_skipped_cells();
    if let Some(first) = self.cells.first()
    {
      self.start = first.local_start;
    }

    if self.is_reference
      && can_expand_over_end_of_unit
    {
      self.set_header_end(start, target);
    }

    self.clean_empty_last_cell();
    self.sync_bounds(end);
  }

  /// Moves the end of the last cell to
  /// the offset the configured start has
  /// inside its own unit, so a window
  /// starting on the 15th ends on the
  /// 14th.
  fn set_header_end(
    &mut self,
    configured_start: NaiveDateTime,
    target: f64
  ) {
    if target.fract() > 0.0 {
      return;
    }

    let week_start = self.week_start;
    if self.unit.start_of(
      configured_start,
      week_start
    ) == configured_start
    {
      return;
    }

    let Some(last) = self.cells.last()
    else {
      return;
    };
    let last_unit = self.unit.add(
      self
        .unit
        .start_of(last.local_start, week_start),
      i64::from(self.span) - 1
    );
    let aligned = self.unit.align_offset(
      configured_start,
      last_unit,
      week_start
    ) - Duration::milliseconds(1);

    if aligned >= last.local_start
      && aligned < last.local_end
    {
      let cell = self.make_cell(
        last.local_start,
        aligned
      );
      debug!(
        end = %aligned,
        "aligned reference end with start offset"
      );
      self.cells.pop();
      self.cells.push(cell);
    }
  }

  /// Cells lying wholly inside a DST gap
  /// cover no real time.
  fn drop_skipped_cells(&mut self) {
    let before = self.cells.len();
    self
      .cells
      .retain(|cell| cell.end >= cell.start);
    if self.cells.len() < before {
      debug!(
        dropped = before - self.cells.len(),
        "dropped cells inside a DST gap"
      );
    }
  }

  fn clean_empty_last_cell(&mut self) {
    if self.show_disabled_dates {
      return;
    }

    let empty =
      self.cells.last().is_some_and(
        |cell| {
          !self
            .availability
            .has_allowed_between(
              cell.local_start,
              cell.local_end
            )
        }
      );
    if empty {
      if let Some(cell) = self.cells.pop()
      {
        trace!(
          label = %cell.label,
          "dropped empty trailing cell"
        );
      }
    }
  }

  fn sync_bounds(
    &mut self,
    fallback_end: NaiveDateTime
  ) {
    self.end = self
      .cells
      .last()
      .map_or(fallback_end, |cell| {
        cell.local_end
      });
    self.number_of_cells =
      self.cells.len();
    self.cell_widths.clear();
  }

  fn filters_active(&self) -> bool {
    !self.show_disabled_dates
      && !self.availability.is_unrestricted()
  }

  fn make_cell(
    &self,
    start: NaiveDateTime,
    end: NaiveDateTime
  ) -> Cell {
    let disabled = self.show_disabled_dates
      && !self
        .availability
        .has_allowed_between(start, end);
    Cell {
      label: format_label(
        &self.label,
        start,
        self.week_start
      ),
      start: to_millis(
        self.timezone,
        start
      ),
      end: to_millis(
        self.timezone,
        add_duration(
          end,
          Duration::milliseconds(1)
        )
      ) - 1,
      disabled,
      local_start: start,
      local_end: end
    }
  }

  /// Stretches the last cell so the row
  /// ends at `end`.
  #[must_use]
  pub fn extend_to(
    mut self,
    end: NaiveDateTime
  ) -> Self {
    let stretched = self
      .cells
      .last()
      .filter(|cell| cell.local_end < end)
      .map(|cell| {
        self.make_cell(cell.local_start, end)
      });
    if let Some(cell) = stretched {
      self.cells.pop();
      self.cells.push(cell);
    }
    self.drop_skipped_cells();
    self.sync_bounds(end);
    self
  }

  /// Drops cells starting after `end`
  /// and clamps the last one to it.
  #[must_use]
  pub fn truncate_to(
    mut self,
    end: NaiveDateTime
  ) -> Self {
    self
      .cells
      .retain(|cell| cell.local_start <= end);
    let clamped = self
      .cells
      .last()
      .filter(|cell| cell.local_end > end)
      .map(|cell| {
        self.make_cell(cell.local_start, end)
      });
    if let Some(cell) = clamped {
      self.cells.pop();
      self.cells.push(cell);
    }
    self.drop_skipped_cells();
    self.clean_empty_last_cell();
    self.sync_bounds(end.min(self.end));
    self
  }

  /// Finest row: every cell gets the
  /// measured width.
  pub fn fill_cell_widths(
    &mut self,
    base_width: f64
  ) {
    self.cell_widths =
      vec![base_width; self.cells.len()];
  }

  /// Coarser rows: each cell sums the
  /// widths of the finest cells starting
  /// between its own start and the next
  /// cell's start.
  pub fn aggregate_cell_widths(
    &mut self,
    finest: &HeaderUnit
  ) {
    let mut widths =
      Vec::with_capacity(self.cells.len());
    let mut idx = 0;

    for (i, cell) in
      self.cells.iter().enumerate()
    {
      let next_start = self
        .cells
        .get(i + 1)
        .map(|next| next.start);
      let mut width = 0.0;

      while let Some(fine) =
        finest.cells.get(idx)
      {
        if fine.start < cell.start {
          idx += 1;
          continue;
        }
        if next_start.is_some_and(
          |next| fine.start >= next
        ) {
          break;
        }
        width += finest
          .cell_widths
          .get(idx)
          .copied()
          .unwrap_or_default();
        idx += 1;
      }

      widths.push(width);
    }

    self.cell_widths = widths;
  }

  pub fn unit(&self) -> TimeUnit {
    self.unit
  }

  pub fn span(&self) -> u32 {
    self.span
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn is_reference(&self) -> bool {
    self.is_reference
  }

  pub fn is_hidden(&self) -> bool {
    self.is_hidden
  }

  pub fn start(&self) -> NaiveDateTime {
    self.start
  }

  pub fn end(&self) -> NaiveDateTime {
    self.end
  }

  pub fn number_of_cells(&self) -> usize {
    self.number_of_cells
  }

  pub fn cells(&self) -> &[Cell] {
    &self.cells
  }

  pub fn cell_widths(&self) -> &[f64] {
    &self.cell_widths
  }

  pub fn total_width(&self) -> f64 {
    self.cell_widths.iter().sum()
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    Duration,
    NaiveDate,
    NaiveDateTime,
    Weekday
  };

  use super::{
    HeaderUnit,
    HeaderUnitParams
  };
  use crate::availability::{
    AvailabilityFilter,
    TimeFrame
  };
  use crate::unit::{
    TimeUnit,
    WeekStart
  };

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32
  ) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
      .and_hms_opt(h, 0, 0)
      .expect("valid time")
  }

  fn params<'a>(
    unit: TimeUnit,
    span: u32,
    start: NaiveDateTime,
    end: NaiveDateTime,
    number_of_cells: f64,
    availability: &'a AvailabilityFilter
  ) -> HeaderUnitParams<'a> {
    HeaderUnitParams {
      unit,
      span,
      label: unit
        .default_label()
        .to_string(),
      start,
      end,
      number_of_cells,
      is_reference: true,
      is_hidden: false,
      can_expand_over_end_of_unit: true,
      availability,
      week_start: WeekStart::Sunday,
      show_disabled_dates: false,
      timezone: chrono_tz::UTC
    }
  }

  fn assert_contiguous(header: &HeaderUnit) {
    for pair in header.cells().windows(2) {
      assert_eq!(
        pair[0].end + 1,
        pair[1].start,
        "cells {} and {} leave a gap",
        pair[0].label,
        pair[1].label
      );
    }
  }

  #[test]
  fn reference_row_emits_requested_cells() {
    let filter =
      AvailabilityFilter::unrestricted();
    let start = at(2024, 1, 1, 0);
    let header = HeaderUnit::build(params(
      TimeUnit::Day,
      1,
      start,
      at(2024, 1, 7, 23),
      7.0,
      &filter
    ));

    assert_eq!(header.cells().len(), 7);
    assert_eq!(header.number_of_cells(), 7);
    assert_eq!(header.start(), start);
    assert_eq!(
      header.end(),
      at(2024, 1, 8, 0)
        - Duration::milliseconds(1)
    );
    assert_contiguous(&header);
  }

  #[test]
  fn fractional_count_gives_partial_last_cell(
  ) {
    let filter =
      AvailabilityFilter::unrestricted();
    let header = HeaderUnit::build(params(
      TimeUnit::Day,
      2,
      at(2024, 1, 1, 0),
      at(2024, 1, 7, 23),
      3.5,
      &filter
    ));

    assert_eq!(header.cells().len(), 4);
    let last = header
      .cells()
      .last()
      .expect("last cell");
    assert_eq!(
      last.local_start,
      at(2024, 1, 7, 0)
    );
    assert_eq!(
      last.local_end,
      at(2024, 1, 8, 0)
        - Duration::milliseconds(1)
    );
    assert_contiguous(&header);
  }

  #[test]
  fn mid_unit_start_aligns_reference_end() {
    let filter =
      AvailabilityFilter::unrestricted();
    let header = HeaderUnit::build(params(
      TimeUnit::Month,
      1,
      at(2024, 1, 15, 0),
      at(2024, 2, 15, 0)
        - Duration::milliseconds(1),
      2.0,
      &filter
    ));

    assert_eq!(header.cells().len(), 2);
    assert_eq!(
      header.end(),
      at(2024, 2, 15, 0)
        - Duration::milliseconds(1)
    );
    assert_eq!(
      header.cells()[0].label,
      "January"
    );
  }

  #[test]
  fn non_reference_row_truncates_at_end() {
    let filter =
      AvailabilityFilter::unrestricted();
    let mut p = params(
      TimeUnit::Week,
      1,
      at(2024, 1, 3, 0),
      at(2024, 1, 10, 12),
      0.0,
      &filter
    );
    p.is_reference = false;
    let header = HeaderUnit::build(p);

    assert_eq!(header.cells().len(), 2);
    assert_eq!(
      header.cells()[0].local_end,
      at(2024, 1, 7, 0)
        - Duration::milliseconds(1)
    );
    assert_eq!(
      header.end(),
      at(2024, 1, 10, 12)
    );
    assert_contiguous(&header);
  }

  #[test]
  fn weekday_filter_skips_weekend_cells() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_weekdays([1, 2, 3, 4, 5]);
    // 2024-01-06 is a Saturday.
    let header = HeaderUnit::build(params(
      TimeUnit::Day,
      1,
      at(2024, 1, 6, 0),
      at(2024, 1, 12, 23),
      7.0,
      &filter
    ));

    assert_eq!(header.cells().len(), 7);
    assert!(header.cells().iter().all(
      |cell| {
        !matches!(
          cell.local_start.weekday(),
          Weekday::Sat | Weekday::Sun
        )
      }
    ));
    assert_eq!(
      header.start(),
      at(2024, 1, 8, 0)
    );
  }

  #[test]
  fn week_reference_recounts_after_skip() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_weekdays([1, 2, 3, 4, 5]);
    // Saturday start, two weeks.
    let start = at(2024, 1, 6, 0);
    let end = at(2024, 1, 20, 0)
      - Duration::milliseconds(1);
    let header = HeaderUnit::build(params(
      TimeUnit::Week,
      1,
      start,
      end,
      3.0,
      &filter
    ));

    assert_eq!(
      header.cells()[0].local_start,
      at(2024, 1, 8, 0)
    );
    // Monday + 14 days touches the
    // Jan 7 and Jan 14 weeks plus the
    // Jan 21 week.
    assert_eq!(header.cells().len(), 3);
  }

  #[test]
  fn time_frames_limit_hour_cells() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_time_frames([
          "09:00-12:00"
            .parse::<TimeFrame>()
            .expect("frame")
        ]);
    let mut p = params(
      TimeUnit::Hour,
      1,
      at(2024, 1, 1, 0),
      at(2024, 1, 2, 23),
      0.0,
      &filter
    );
    p.is_reference = false;
    let header = HeaderUnit::build(p);

    let labels: Vec<&str> = header
      .cells()
      .iter()
      .map(|cell| cell.label.as_str())
      .collect();
    assert_eq!(
      labels,
      vec![
        "9 AM", "10 AM", "11 AM", "9 AM",
        "10 AM", "11 AM"
      ]
    );
  }

  #[test]
  fn disabled_dates_are_flagged_not_skipped(
  ) {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_weekdays([1, 2, 3, 4, 5]);
    let mut p = params(
      TimeUnit::Day,
      1,
      at(2024, 1, 6, 0),
      at(2024, 1, 12, 23),
      7.0,
      &filter
    );
    p.show_disabled_dates = true;
    let header = HeaderUnit::build(p);

    assert_eq!(header.cells().len(), 7);
    let disabled: Vec<bool> = header
      .cells()
      .iter()
      .map(|cell| cell.disabled)
      .collect();
    assert_eq!(
      disabled,
      vec![
        true, true, false, false, false,
        false, false
      ]
    );
  }

  #[test]
  fn empty_filter_yields_empty_row() {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_months(Vec::new());
    let header = HeaderUnit::build(params(
      TimeUnit::Day,
      1,
      at(2024, 1, 1, 0),
      at(2024, 1, 7, 23),
      7.0,
      &filter
    ));

    assert!(header.cells().is_empty());
    assert_eq!(header.number_of_cells(), 0);
  }

  #[test]
  fn coarse_widths_sum_finest_widths() {
    let filter =
      AvailabilityFilter::unrestricted();
    let start = at(2024, 1, 1, 0);
    let end = at(2024, 1, 3, 0)
      - Duration::milliseconds(1);

    let mut hours = params(
      TimeUnit::Hour,
      1,
      start,
      end,
      0.0,
      &filter
    );
    hours.is_reference = false;
    let mut hours = HeaderUnit::build(hours);
    hours.fill_cell_widths(10.0);

    let mut days = HeaderUnit::build(params(
      TimeUnit::Day,
      1,
      start,
      end,
      2.0,
      &filter
    ));
    days.aggregate_cell_widths(&hours);

    assert_eq!(
      days.cell_widths(),
      &[240.0, 240.0]
    );
    assert!(
      (days.total_width()
        - hours.total_width())
      .abs()
        < f64::EPSILON
    );
  }

  fn hour_row_for_day(
    tz: chrono_tz::Tz,
    day: NaiveDateTime,
    filter: &AvailabilityFilter
  ) -> HeaderUnit {
    let mut p = params(
      TimeUnit::Hour,
      1,
      day,
      day + Duration::days(1)
        - Duration::milliseconds(1),
      0.0,
      filter
    );
    p.is_reference = false;
    p.timezone = tz;
    HeaderUnit::build(p)
  }

  fn real_span_hours(
    header: &HeaderUnit
  ) -> i64 {
    let first = header
      .cells()
      .first()
      .expect("first cell");
    let last = header
      .cells()
      .last()
      .expect("last cell");
    (last.end + 1 - first.start)
      / Duration::hours(1)
        .num_milliseconds()
  }

  #[test]
  fn spring_forward_hours_stay_contiguous(
  ) {
    let filter =
      AvailabilityFilter::unrestricted();
    let header = hour_row_for_day(
      chrono_tz::America::New_York,
      at(2024, 3, 10, 0),
      &filter
    );

    assert_contiguous(&header);
    assert_eq!(header.cells().len(), 23);
    assert_eq!(header.number_of_cells(), 23);
    assert!(header.cells().iter().all(
      |cell| cell.local_start != at(2024, 3, 10, 2)
    ));
    assert_eq!(real_span_hours(&header), 23);
  }

  #[test]
  fn fall_back_hours_stay_contiguous() {
    let filter =
      AvailabilityFilter::unrestricted();
    let header = hour_row_for_day(
      chrono_tz::America::New_York,
      at(2024, 11, 3, 0),
      &filter
    );

    assert_contiguous(&header);
    assert_eq!(header.cells().len(), 24);
    let repeated = &header.cells()[1];
    assert_eq!(
      repeated.local_start,
      at(2024, 11, 3, 1)
    );
    assert_eq!(
      repeated.end + 1 - repeated.start,
      Duration::hours(2)
        .num_milliseconds()
    );
    assert_eq!(real_span_hours(&header), 25);
  }

  #[test]
  fn only_first_week_cell_follows_weekday_filter(
  ) {
    let filter =
      AvailabilityFilter::unrestricted()
        .with_weekdays([3]);
    // 2024-01-03 is a Wednesday.
    let mut p = params(
      TimeUnit::Week,
      1,
      at(2024, 1, 3, 0),
      at(2024, 1, 21, 0)
        - Duration::milliseconds(1),
      0.0,
      &filter
    );
    p.is_reference = false;
    let header = HeaderUnit::build(p);

    let starts: Vec<NaiveDateTime> = header
      .cells()
      .iter()
      .map(|cell| cell.local_start)
      .collect();
    assert_eq!(
      starts,
      vec![
        at(2024, 1, 3, 0),
        at(2024, 1, 7, 0),
        at(2024, 1, 14, 0)
      ]
    );
    assert_eq!(
      header.cells()[0].local_start.weekday(),
      Weekday::Wed
    );
    assert!(header.cells()[1..].iter().all(
      |cell| {
        cell.local_start.weekday()
          == Weekday::Sun
      }
    ));
    assert_contiguous(&header);
  }
}
