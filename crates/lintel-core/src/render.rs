use std::io::{self, IsTerminal, Write};

use chrono::NaiveDateTime;
use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::header_group::HeaderGroup;
use crate::header_unit::{Cell, HeaderUnit};
use crate::observer::{HeaderObserver, VisibleInterval};

/// Pixels represented by one terminal column.
pub const PIXELS_PER_COLUMN: f64 = 8.0;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

#[derive(Debug, Serialize)]
struct GridView<'a> {
    start: NaiveDateTime,
    end: Option<NaiveDateTime>,
    cell_width: Option<f64>,
    visible_cell_count: usize,
    visible_interval: Option<VisibleInterval>,
    rows: &'a [HeaderUnit],
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    #[tracing::instrument(skip(self, group))]
    pub fn print_grid<O: HeaderObserver>(&mut self, group: &HeaderGroup<O>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let painter = |text: &str, code: &str| self.paint(text, code);
        write_grid(&mut out, group, &painter)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, group))]
    pub fn print_json<O: HeaderObserver>(&mut self, group: &HeaderGroup<O>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write_json(&mut out, group)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn write_json<W: Write, O: HeaderObserver>(mut writer: W, group: &HeaderGroup<O>) -> anyhow::Result<()> {
    let view = GridView {
        start: group.start(),
        end: group.end(),
        cell_width: group.cell_width(),
        visible_cell_count: group.visible_cell_count(),
        visible_interval: group.visible_interval(),
        rows: group.units(),
    };
    serde_json::to_writer_pretty(&mut writer, &view)?;
    writeln!(writer)?;
    Ok(())
}

/// Writes every visible row as a line of `|`-separated cells. Cell
/// boundaries come from the cumulative pixel widths, so a coarse cell
/// lines up with the finest cells it covers.
pub fn write_grid<W, O, P>(mut writer: W, group: &HeaderGroup<O>, paint: &P) -> anyhow::Result<()>
where
    W: Write,
    O: HeaderObserver,
    P: Fn(&str, &str) -> String,
{
    for unit in group.units().iter().filter(|unit| !unit.is_hidden()) {
        let line = render_row(unit, paint);
        writeln!(writer, "{line}")?;
    }

    let first_start = group
        .finest()
        .and_then(|finest| finest.cells().first())
        .map(|cell| cell.local_start);
    match (group.visible_interval(), first_start, group.end()) {
        (Some(interval), Some(start), Some(end)) => {
            writeln!(
                writer,
                "{} cells visible, {} .. {} ({} ms)",
                group.visible_cell_count(),
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M"),
                interval.duration_ms()
            )?;
        }
        _ => writeln!(writer, "no cells")?,
    }

    Ok(())
}

fn render_row<P>(unit: &HeaderUnit, paint: &P) -> String
where
    P: Fn(&str, &str) -> String,
{
    let mut line = String::new();
    let mut offset = 0.0_f64;
    let mut column = 0usize;

    for (idx, cell) in unit.cells().iter().enumerate() {
        let inner = match unit.cell_widths().get(idx) {
            Some(width) => {
                offset += *width;
                let end = (offset / PIXELS_PER_COLUMN).round() as usize;
                let span = end.saturating_sub(column).max(1);
                column += span;
                span - 1
            }
            None => UnicodeWidthStr::width(cell.label.as_str()),
        };

        line.push('|');
        line.push_str(&paint_cell(cell, &fit_label(&cell.label, inner), paint));
    }

    if !unit.cells().is_empty() {
        line.push('|');
    }
    line
}

fn paint_cell<P>(cell: &Cell, text: &str, paint: &P) -> String
where
    P: Fn(&str, &str) -> String,
{
    if cell.disabled {
        paint(text, "2")
    } else {
        text.to_string()
    }
}

/// Pads or cuts `label` to exactly `width` terminal columns.
pub fn fit_label(label: &str, width: usize) -> String {
    let full = UnicodeWidthStr::width(label);
    if full <= width {
        return format!("{label}{}", " ".repeat(width - full));
    }
    if width == 0 {
        return String::new();
    }

    let mut out = String::with_capacity(width);
    let mut used = 0;
    for ch in label.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width + 1 > width {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out.push('…');
    used += 1;
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
