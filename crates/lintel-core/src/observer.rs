use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};
use tracing::info;

use crate::header_unit::HeaderUnit;
use crate::unit::TimeUnit;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
  Left,
  Right
}

impl fmt::Display for ScrollDirection {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::Left => f.write_str("left"),
      | Self::Right => f.write_str("right")
    }
  }
}

impl FromStr for ScrollDirection {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "left" | "l" | "back" => {
        Ok(Self::Left)
      }
      | "right" | "r" | "forward" => {
        Ok(Self::Right)
      }
      | other => {
        Err(anyhow!(
          "unknown scroll direction: \
           {other}"
        ))
      }
    }
  }
}

/// Half-open `[start, end)` interval
/// in epoch milliseconds.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize
)]
pub struct VisibleInterval {
  pub start: i64,
  pub end:   i64
}

impl VisibleInterval {
  pub fn contains(
    &self,
    millis: i64
  ) -> bool {
    millis >= self.start
      && millis < self.end
  }

  pub fn duration_ms(&self) -> i64 {
    self.end - self.start
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize
)]
pub struct VisibleWindowChange {
  pub direction:          ScrollDirection,
  pub visible_cell_count: usize,
  pub interval:           Option<VisibleInterval>
}

/// Receives layout and window changes
/// from a header group. Every method
/// defaults to doing nothing.
pub trait HeaderObserver {
  fn on_headers_changed(
    &mut self,
    _finest: &HeaderUnit
  ) {
  }

  fn on_cell_width_changed(
    &mut self,
    _cell_width: f64
  ) {
  }

  fn on_visible_window_changed(
    &mut self,
    _change: &VisibleWindowChange
  ) {
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl HeaderObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl HeaderObserver for TracingObserver {
  fn on_headers_changed(
    &mut self,
    finest: &HeaderUnit
  ) {
    info!(
      unit = %finest.unit(),
      cells = finest.cells().len(),
      start = %finest.start(),
      end = %finest.end(),
      "headers changed"
    );
  }

  fn on_cell_width_changed(
    &mut self,
    cell_width: f64
  ) {
    info!(cell_width, "cell width determined");
  }

  fn on_visible_window_changed(
    &mut self,
    change: &VisibleWindowChange
  ) {
    info!(
      direction = %change.direction,
      visible_cells = change.visible_cell_count,
      interval = ?change.interval,
      "visible window changed"
    );
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderEvent {
  HeadersChanged {
    unit:  TimeUnit,
    cells: usize
  },
  CellWidthChanged(f64),
  VisibleWindowChanged(VisibleWindowChange)
}

/// Keeps every notification, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
  pub events: Vec<HeaderEvent>
}

impl HeaderObserver for RecordingObserver {
  fn on_headers_changed(
    &mut self,
    finest: &HeaderUnit
  ) {
    self.events.push(
      HeaderEvent::HeadersChanged {
        unit:  finest.unit(),
        cells: finest.cells().len()
      }
    );
  }

  fn on_cell_width_changed(
    &mut self,
    cell_width: f64
  ) {
    self.events.push(
      HeaderEvent::CellWidthChanged(
        cell_width
      )
    );
  }

  fn on_visible_window_changed(
    &mut self,
    change: &VisibleWindowChange
  ) {
    self.events.push(
      HeaderEvent::VisibleWindowChanged(
        *change
      )
    );
  }
}
