//! Cell labels from date-format
//! patterns such as `ccc, LLL d` or
//! `h a`. Runs of the same letter form
//! a token, text in single quotes is
//! copied verbatim (`''` is a literal
//! quote) and unknown letters pass
//! through.

use chrono::{
  Datelike,
  NaiveDateTime,
  Timelike,
  Weekday
};

use crate::unit::WeekStart;

const MONTHS: [&str; 12] = [
  "January",
  "February",
  "March",
  "April",
  "May",
  "June",
  "July",
  "August",
  "September",
  "October",
  "November",
  "December"
];

const WEEKDAYS: [&str; 7] = [
  "Monday",
  "Tuesday",
  "Wednesday",
  "Thursday",
  "Friday",
  "Saturday",
  "Sunday"
];

#[derive(Debug, PartialEq, Eq)]
enum Piece {
  Literal(String),
  Token(char, usize)
}

pub fn format_label(
  pattern: &str,
  dt: NaiveDateTime,
  week_start: WeekStart
) -> String {
  let mut out =
    String::with_capacity(pattern.len());
  for piece in tokenize(pattern) {
    match piece {
      | Piece::Literal(text) => {
        out.push_str(&text)
      }
      | Piece::Token(letter, count) => {
        out.push_str(&render_token(
          letter, count, dt, week_start
        ))
      }
    }
  }
  out
}

fn tokenize(pattern: &str) -> Vec<Piece> {
  let mut pieces = Vec::new();
  let mut chars =
    pattern.chars().peekable();

  while let Some(ch) = chars.next() {
    if ch == '\'' {
      let mut literal = String::new();
      if chars.peek() == Some(&'\'') {
        chars.next();
        pieces.push(Piece::Literal(
          "'".to_string()
        ));
        continue;
      }
      while let Some(inner) = chars.next()
      {
        if inner == '\'' {
          if chars.peek() == Some(&'\'')
          {
            chars.next();
            literal.push('\'');
            continue;
          }
          break;
        }
        literal.push(inner);
      }
      pieces.push(Piece::Literal(literal));
      continue;
    }

    if ch.is_ascii_alphabetic() {
      let mut count = 1;
      while chars.peek() == Some(&ch) {
        chars.next();
        count += 1;
      }
      pieces.push(Piece::Token(ch, count));
      continue;
    }

    match pieces.last_mut() {
      | Some(Piece::Literal(text)) => {
        text.push(ch)
      }
      | _ => {
        pieces.push(Piece::Literal(
          ch.to_string()
        ))
      }
    }
  }

  pieces
}

fn render_token(
  letter: char,
  count: usize,
  dt: NaiveDateTime,
  week_start: WeekStart
) -> String {
  match letter {
    | 'y' => {
      match count {
        | 2 => {
          format!(
            "{:02}",
            dt.year().rem_euclid(100)
          )
        }
        | 1 => dt.year().to_string(),
        | _ => {
          format!(
            "{:0width$}",
            dt.year(),
            width = count
          )
        }
      }
    }
    | 'L' | 'M' => {
      month_token(dt.month0(), count)
    }
    | 'd' => pad(dt.day(), count),
    | 'c' | 'E' => {
      weekday_token(dt.weekday(), count)
    }
    | 'H' => pad(dt.hour(), count),
    | 'h' => {
      let hour = match dt.hour() % 12 {
        | 0 => 12,
        | other => other
      };
      pad(hour, count)
    }
    | 'm' => pad(dt.minute(), count),
    | 's' => pad(dt.second(), count),
    | 'a' => {
      if dt.hour() < 12 {
        "AM".to_string()
      } else {
        "PM".to_string()
      }
    }
    | 'q' => pad(dt.month0() / 3 + 1, count),
    | 'W' => {
      pad(week_number(dt, week_start), count)
    }
    | other => {
      std::iter::repeat_n(other, count)
        .collect()
    }
  }
}

fn pad(
  value: u32,
  count: usize
) -> String {
  if count >= 2 {
    format!("{value:02}")
  } else {
    value.to_string()
  }
}

fn month_token(
  month0: u32,
  count: usize
) -> String {
  let name = MONTHS
    .get(month0 as usize)
    .copied()
    .unwrap_or_default();
  match count {
    | 1 | 2 => pad(month0 + 1, count),
    | 3 => name.chars().take(3).collect(),
    | 4 => name.to_string(),
    | _ => name.chars().take(1).collect()
  }
}

fn weekday_token(
  weekday: Weekday,
  count: usize
) -> String {
  let idx =
    weekday.num_days_from_monday();
  let name = WEEKDAYS
    .get(idx as usize)
    .copied()
    .unwrap_or_default();
  match count {
    | 1 | 2 => (idx + 1).to_string(),
    | 3 => name.chars().take(3).collect(),
    | 4 => name.to_string(),
    | _ => name.chars().take(1).collect()
  }
}

/// ISO week number for Monday weeks;
/// for Sunday weeks, week 1 is the one
/// containing January 1st.
fn week_number(
  dt: NaiveDateTime,
  week_start: WeekStart
) -> u32 {
  match week_start {
    | WeekStart::Monday => {
      dt.iso_week().week()
    }
    | WeekStart::Sunday => {
      let jan1 = dt
        .with_ordinal(1)
        .unwrap_or(dt)
        .weekday()
        .num_days_from_sunday();
      (dt.ordinal0() + jan1) / 7 + 1
    }
  }
}
