//! Table normalization: raw rendered HTML table → typed [`PriceTable`].
//!
//! The source site renders headers and dates in Japanese and formats numbers
//! with locale-specific separators. This module maps all of that onto the
//! canonical schema of [`crate::models`]:
//!
//! 1. The table is split into a header row and body rows of cell text.
//! 2. Headers are matched by prefix against a fixed dictionary
//!    ([`map_header`]); unknown headers are carried through unchanged.
//! 3. Dates of the form `2025年9月26日` are built directly from their three
//!    numbers, anything else goes through a handful of generic formats.
//! 4. Numeric cells lose their thousands separators and percent signs;
//!    placeholder tokens become `None`.
//! 5. Rows without a date are dropped and the rest sorted latest-first.
//!
//! Malformed cells degrade to `None`. A table with no usable rows yields an
//! empty [`PriceTable`] rather than an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use crate::models::{Column, Field, PriceRecord, PriceTable};
use crate::utils::fold_digits;

/// Header prefixes of the source locale, checked in order.
const HEADER_PREFIXES: [(&str, Field); 7] = [
    ("日付", Field::Date),
    ("始値", Field::Open),
    ("高値", Field::High),
    ("安値", Field::Low),
    ("終値", Field::Close),
    ("出来高", Field::Volume),
    // also matches the footnoted "調整後終値*"
    ("調整後終値", Field::AdjClose),
];

/// Cell contents that mean "no value".
const NULL_TOKENS: [&str; 7] = ["", "-", "—", "ー", "NaN", "nan", "None"];

/// Formats tried when a date is not in year/month/day unit form.
const FALLBACK_DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

static JP_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日\s*$")
        .expect("static date pattern")
});

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("static selector"));
static HEAD_ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("thead tr").expect("static selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("static selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("static selector"));

/// A numeric cell value before it is coerced to its column's type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integral values only; a fractional or out-of-range float has no
    /// integer form.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            // i64::MAX as f64 rounds up to 2^63, which is already out of range
            Number::Float(f)
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Some(f as i64)
            }
            Number::Float(_) => None,
        }
    }
}

/// Header row plus body rows of a parsed table, as trimmed cell text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Trim a header and drop trailing footnote asterisks.
pub fn clean_header(raw: &str) -> &str {
    raw.trim().trim_end_matches('*').trim_end()
}

/// Map a raw header onto the canonical vocabulary.
pub fn map_header(raw: &str) -> Column {
    let name = clean_header(raw);
    HEADER_PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, field)| Column::Known(*field))
        .unwrap_or_else(|| Column::Unknown(name.to_string()))
}

/// Parse a date cell.
///
/// Year/month/day unit dates are taken literally; an impossible combination
/// such as `2024年2月30日` yields `None` instead of falling back.
pub fn parse_date(cell: &str) -> Option<NaiveDate> {
    let cell = fold_digits(cell);
    if let Some(caps) = JP_DATE.captures(&cell) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    parse_date_fallback(cell.trim())
}

fn parse_date_fallback(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

/// Parse a numeric cell, tolerating separators, percent signs and
/// placeholder tokens.
pub fn parse_number(cell: &str) -> Option<Number> {
    let s = cell.trim();
    if NULL_TOKENS.contains(&s) {
        return None;
    }
    let s = fold_digits(s)
        .replace([',', '，'], "")
        .replace('％', "%")
        .replace('%', "");

    let parsed = if s.contains('.') {
        s.parse::<f64>().ok().map(Number::Float)
    } else {
        s.parse::<i64>().ok().map(Number::Int)
    };
    parsed
        .or_else(|| s.parse::<f64>().ok().map(Number::Float))
        .filter(|n| n.as_f64().is_finite())
}

pub fn parse_price(cell: &str) -> Option<f64> {
    parse_number(cell).map(Number::as_f64)
}

pub fn parse_volume(cell: &str) -> Option<i64> {
    parse_number(cell).and_then(Number::as_i64)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().split_whitespace().join(" ")
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.select(&CELL).map(cell_text).collect()
}

fn is_header_row(row: ElementRef<'_>) -> bool {
    let mut cells = row.select(&CELL).peekable();
    cells.peek().is_some() && cells.all(|c| c.value().name() == "th")
}

fn in_thead(row: ElementRef<'_>) -> bool {
    row.parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|parent| parent.value().name() == "thead")
}

/// Split the first `<table>` of an HTML fragment into header and body text.
///
/// The header is the `<thead>` row when present, otherwise the first row made
/// only of `<th>` cells, otherwise the first row. Body rows shorter than the
/// header are padded with empty cells; longer ones are cut.
pub fn parse_html_table(html: &str) -> Option<TextTable> {
    let fragment = Html::parse_fragment(html);
    let table = fragment.select(&TABLE).next()?;

    let rows: Vec<ElementRef<'_>> = table.select(&ROW).collect();
    let header_row = table
        .select(&HEAD_ROW)
        .next()
        .or_else(|| rows.iter().copied().find(|r| is_header_row(*r)))
        .or_else(|| rows.first().copied())?;

    let headers = row_cells(header_row);
    if headers.is_empty() {
        return None;
    }

    let body = rows
        .iter()
        .filter(|r| r.id() != header_row.id() && !in_thead(**r))
        .map(|r| {
            let mut cells = row_cells(*r);
            cells.resize(headers.len(), String::new());
            cells
        })
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .collect();

    Some(TextTable {
        headers,
        rows: body,
    })
}

/// Convert one rendered table into a typed, latest-first [`PriceTable`].
#[instrument(level = "debug", skip_all, fields(bytes = html.len()))]
pub fn normalize(html: &str) -> PriceTable {
    match parse_html_table(html) {
        Some(text) => normalize_text(&text),
        None => {
            debug!("no table rows found");
            PriceTable::default()
        }
    }
}

/// Normalize an already-split table.
pub fn normalize_text(text: &TextTable) -> PriceTable {
    let mapped: Vec<Column> = text.headers.iter().map(|h| map_header(h)).collect();

    let Some(date_idx) = mapped.iter().position(|c| *c == Column::Known(Field::Date)) else {
        debug!(headers = ?text.headers, "table has no date column");
        return PriceTable::default();
    };

    let mut records: Vec<PriceRecord> = Vec::with_capacity(text.rows.len());
    let mut dropped = 0usize;

    for row in &text.rows {
        let Some(date) = row.get(date_idx).and_then(|c| parse_date(c)) else {
            dropped += 1;
            continue;
        };

        let mut record = PriceRecord::on(date);
        for (column, cell) in mapped.iter().zip(row) {
            match column {
                Column::Known(Field::Date) => {}
                Column::Known(Field::Volume) => record.volume = parse_volume(cell),
                Column::Known(field) => record.set_price(*field, parse_price(cell)),
                Column::Unknown(name) => record.extra.push((name.clone(), cell.trim().to_string())),
            }
        }
        records.push(record);
    }

    if dropped > 0 {
        debug!(dropped, "dropped rows without a parseable date");
    }

    let columns = Field::CANONICAL
        .into_iter()
        .map(Column::Known)
        .filter(|c| mapped.contains(c))
        .chain(mapped.iter().filter(|c| matches!(c, Column::Unknown(_))).cloned())
        .unique()
        .collect();

    let mut table = PriceTable { columns, records };
    table.sort_descending();
    table
}
