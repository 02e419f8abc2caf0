//! Cell value normalisation
//!
//! Pure conversions from untrusted spreadsheet cells into typed values.
//! Every function returns `None` for input it cannot interpret; callers decide
//! whether that rejects the row or falls back to a default.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime};

use crate::models::CellValue;

/// Largest serial a spreadsheet can represent (9999-12-31).
const MAX_DAY_SERIAL: f64 = 2_958_465.0;

/// Serial 60 is the fictitious 1900-02-29; later serials are offset by one.
const LEAP_BUG_SERIAL: f64 = 59.0;

/// `%Y` also matches one or two digit years; anything earlier than this was a
/// short year that belongs to a `%y` format.
const MIN_FOUR_DIGIT_YEAR: i32 = 1000;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%m/%d/%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%y %H:%M",
];

/// Parse a date from a typed date, a day serial, or a date-like string.
pub fn parse_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Number(serial) => serial_to_date(*serial),
        CellValue::Text(text) => parse_date_str(text),
        CellValue::Bool(_) | CellValue::Empty => None,
    }
}

/// Convert a spreadsheet day serial (1900 date system) into a calendar date.
///
/// Fractional parts (time of day) are ignored.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_DAY_SERIAL).contains(&serial) {
        return None;
    }

    let whole = serial.floor();
    let epoch = if whole > LEAP_BUG_SERIAL {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    };

    epoch.checked_add_days(Days::new(whole as u64))
}

/// Parse a date-like string. Purely numeric strings are read as day serials.
pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if text.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        if let Ok(serial) = text.parse::<f64>() {
            return serial_to_date(serial);
        }
    }

    if let Some(date) = DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .filter(|d| d.year() >= MIN_FOUR_DIGIT_YEAR)
    }) {
        return Some(date);
    }

    if let Some(dt) = DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .filter(|dt| dt.year() >= MIN_FOUR_DIGIT_YEAR)
    }) {
        return Some(dt.date());
    }

    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .ok()
        .map(|dt| dt.date_naive())
}

/// Parse a number, tolerating currency symbols, thousands separators and
/// accounting-style negatives (`(123.45)` is `-123.45`).
pub fn clean_number(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Text(text) => clean_number_str(text),
        _ => None,
    }
}

pub fn clean_number_str(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let negative = text.len() > 1 && text.starts_with('(') && text.ends_with(')');

    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let value = cleaned.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negative { -value.abs() } else { value })
}

/// Lowercase, collapse runs of non-alphanumerics into `_`, trim underscores.
///
/// `"Order Date"`, `"order-date"` and `"ORDER_DATE "` all become `order_date`.
pub fn normalize_header_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

/// Trimmed text content of a cell; `None` when blank.
///
/// Whole numbers render without a fractional part so numeric order ids
/// (`1001.0`) read back as `1001`.
pub fn clean_text(cell: &CellValue) -> Option<String> {
    let text = match cell {
        CellValue::Empty => return None,
        CellValue::Text(s) => s.trim().to_string(),
        CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        CellValue::Number(n) => n.to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::DateTime(dt) => dt.date().to_string(),
    };

    (!text.is_empty()).then_some(text)
}
