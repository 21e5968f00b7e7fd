//! 📅 Rolling index suffixes -- `logs` today, `logs-2024-01-15` in the logs.
//!
//! Operators write date patterns the way they always have: `yyyy-MM-dd`,
//! `yyyy.MM.dd-HH`, `yyyyMMdd'T'HH`. chrono speaks strftime. This module is the
//! interpreter standing between them. Patterns containing `%` are taken as
//! strftime already and passed straight through.
//!
//! Every failure here is recoverable by design of the caller: the builder
//! swallows it and leaves the index unsuffixed.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDateTime, Timelike};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RollingFormatError {
    #[error("unsupported pattern letter '{letter}' (x{count})")]
    UnsupportedLetter { letter: char, count: usize },
    #[error("reserved pattern character '{0}'")]
    Reserved(char),
    #[error("unterminated quoted literal")]
    UnterminatedQuote,
    #[error("invalid strftime pattern '{0}'")]
    InvalidStrftime(String),
    #[error("formatting failed")]
    Format,
}

/// 🧩 One compiled chunk of a pattern.
///
/// Most letters have a strftime twin. Two do not: `k` counts hours 1-24 and `S`
/// takes any number of fraction digits, so those get rendered by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Strftime(String),
    ClockHour { width: usize },
    Fraction { digits: usize },
}

/// 🎯 Format `now` with the configured pattern.
pub fn format_suffix(pattern: &str, now: &NaiveDateTime) -> Result<String, RollingFormatError> {
    let pieces = if pattern.contains('%') {
        vec![Piece::Strftime(pattern.to_string())]
    } else {
        compile(pattern)?
    };

    let mut formatted = String::new();
    for piece in &pieces {
        match piece {
            Piece::Strftime(strftime) => write_strftime(&mut formatted, strftime, now)?,
            Piece::ClockHour { width } => {
                let hour = match now.hour() {
                    0 => 24,
                    hour => hour,
                };
                write!(formatted, "{hour:0width$}").map_err(|_| RollingFormatError::Format)?;
            }
            Piece::Fraction { digits } => {
                let nanos = format!("{:09}", now.nanosecond() % 1_000_000_000);
                formatted.push_str(&nanos[..(*digits).min(9)]);
                formatted.extend(std::iter::repeat_n('0', digits.saturating_sub(9)));
            }
        }
    }
    Ok(formatted)
}

fn write_strftime(
    out: &mut String,
    strftime: &str,
    now: &NaiveDateTime,
) -> Result<(), RollingFormatError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(strftime).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(RollingFormatError::InvalidStrftime(strftime.to_string()));
    }
    // -- 🔧 write! instead of to_string(): Display panics on a bad item, write! just says no
    write!(out, "{}", now.format_with_items(items.iter())).map_err(|_| RollingFormatError::Format)
}

/// 🔄 Compile a date-time pattern (`yyyy-MM-dd`) into strftime chunks and hand-rendered pieces.
pub fn compile(pattern: &str) -> Result<Vec<Piece>, RollingFormatError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut pieces = Vec::new();
    let mut strftime = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() {
            let count = chars[i..].iter().take_while(|&&next| next == c).count();
            let special = match (c, count) {
                ('k', 1 | 2) => Some(Piece::ClockHour { width: count }),
                ('S', _) => Some(Piece::Fraction { digits: count }),
                _ => None,
            };
            match special {
                Some(piece) => {
                    if !strftime.is_empty() {
                        pieces.push(Piece::Strftime(std::mem::take(&mut strftime)));
                    }
                    pieces.push(piece);
                }
                None => strftime.push_str(letter_run(c, count)?),
            }
            i += count;
        } else if c == '\'' {
            i = quoted_literal(&chars, i + 1, &mut strftime)?;
        } else if matches!(c, '[' | ']' | '{' | '}' | '#') {
            return Err(RollingFormatError::Reserved(c));
        } else {
            push_literal(&mut strftime, c);
            i += 1;
        }
    }

    if !strftime.is_empty() {
        pieces.push(Piece::Strftime(strftime));
    }
    Ok(pieces)
}

// 📝 Reads a quoted literal starting right after the opening quote. `''` is a literal quote.
// Returns the index just past the closing quote.
fn quoted_literal(
    chars: &[char],
    mut i: usize,
    out: &mut String,
) -> Result<usize, RollingFormatError> {
    // -- `''` outside a literal: one apostrophe, no literal
    if chars.get(i) == Some(&'\'') {
        out.push('\'');
        return Ok(i + 1);
    }
    loop {
        match chars.get(i) {
            None => return Err(RollingFormatError::UnterminatedQuote),
            Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                out.push('\'');
                i += 2;
            }
            Some('\'') => return Ok(i + 1),
            Some(&c) => {
                push_literal(out, c);
                i += 1;
            }
        }
    }
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

fn letter_run(letter: char, count: usize) -> Result<&'static str, RollingFormatError> {
    let directive = match (letter, count) {
        ('y' | 'u', 2) => "%y",
        ('y' | 'u', _) => "%Y",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', 4) => "%B",
        ('d', 1) => "%-d",
        ('d', 2) => "%d",
        ('D', 1) => "%-j",
        ('D', 2 | 3) => "%j",
        ('H', 1) => "%-H",
        ('H', 2) => "%H",
        ('h', 1) => "%-I",
        ('h', 2) => "%I",
        ('m', 1) => "%-M",
        ('m', 2) => "%M",
        ('s', 1) => "%-S",
        ('s', 2) => "%S",
        ('a', 1) => "%p",
        ('E', 1..=3) => "%a",
        ('E', 4) => "%A",
        _ => return Err(RollingFormatError::UnsupportedLetter { letter, count }),
    };
    Ok(directive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn mid_january() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_milli_opt(9, 5, 7, 42))
            .expect("valid date")
    }

    #[test]
    fn the_one_where_the_classic_daily_pattern_just_works() {
        assert_eq!(format_suffix("yyyy-MM-dd", &mid_january()).unwrap(), "2024-01-15");
    }

    #[test]
    fn the_one_where_every_supported_letter_shows_up_for_work() {
        let now = mid_january();
        assert_eq!(format_suffix("yy.M.d", &now).unwrap(), "24.1.15");
        assert_eq!(format_suffix("yyyyMMdd'T'HHmmss", &now).unwrap(), "20240115T090507");
        assert_eq!(format_suffix("H:m:s.SSS", &now).unwrap(), "9:5:7.042");
        assert_eq!(format_suffix("hh a", &now).unwrap(), "09 AM");
        assert_eq!(format_suffix("EEE MMM", &now).unwrap(), "Mon Jan");
        assert_eq!(format_suffix("EEEE MMMM", &now).unwrap(), "Monday January");
        assert_eq!(format_suffix("DDD", &now).unwrap(), "015");
        assert_eq!(format_suffix("yyyy'''s' 'week'", &now).unwrap(), "2024's week");
    }

    #[test]
    fn the_one_where_percent_signs_mean_strftime_already() {
        assert_eq!(format_suffix("%Y.%m", &mid_january()).unwrap(), "2024.01");
    }

    #[test]
    fn the_one_where_literal_percent_is_escaped_on_the_way_through() {
        assert_eq!(
            compile("yyyy'%'").unwrap(),
            vec![Piece::Strftime("%Y%%".into())]
        );
    }

    #[test]
    fn the_one_where_k_counts_hours_from_one_to_twenty_four() {
        let now = mid_january();
        assert_eq!(format_suffix("k", &now).unwrap(), "9");
        assert_eq!(format_suffix("yyyy.MM.dd-kk", &now).unwrap(), "2024.01.15-09");

        let midnight = NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(0, 30, 0))
            .expect("valid date");
        assert_eq!(format_suffix("k", &midnight).unwrap(), "24");
        assert_eq!(format_suffix("kk:mm", &midnight).unwrap(), "24:30");
    }

    #[test]
    fn the_one_where_fractions_take_as_many_digits_as_asked() {
        let now = mid_january();
        assert_eq!(format_suffix("HH:mm:ss.S", &now).unwrap(), "09:05:07.0");
        assert_eq!(format_suffix("ss.SS", &now).unwrap(), "07.04");
        assert_eq!(format_suffix("SSSS", &now).unwrap(), "0420");
        assert_eq!(format_suffix("SSSSSSSSSSS", &now).unwrap(), "04200000000");
    }

    #[test]
    fn the_one_where_nonsense_patterns_are_refused_politely() {
        let now = mid_january();
        assert_eq!(
            format_suffix("yyyy-QQ", &now),
            Err(RollingFormatError::UnsupportedLetter { letter: 'Q', count: 2 })
        );
        assert_eq!(
            format_suffix("ddd", &now),
            Err(RollingFormatError::UnsupportedLetter { letter: 'd', count: 3 })
        );
        assert_eq!(format_suffix("yyyy'oops", &now), Err(RollingFormatError::UnterminatedQuote));
        assert_eq!(format_suffix("[yyyy]", &now), Err(RollingFormatError::Reserved('[')));
        assert!(matches!(
            format_suffix("%Q-%", &now),
            Err(RollingFormatError::InvalidStrftime(_))
        ));
    }
}
