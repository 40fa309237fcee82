//! Data models for normalized price history.
//!
//! This module defines the core data structures used throughout the crawler:
//! - [`Field`] and [`Column`]: the canonical column vocabulary
//! - [`PriceRecord`]: one typed row of history
//! - [`PriceTable`]: a set of records plus the columns actually present
//! - [`PageBatch`]: the table produced by one page, tagged with its index
//!
//! Every table handed out by this module is sorted latest-first.

use chrono::NaiveDate;
use itertools::Itertools;
use std::fmt;

/// A canonical price-history field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
    AdjClose,
}

impl Field {
    /// Canonical column order for normalized and persisted tables.
    pub const CANONICAL: [Field; 7] = [
        Field::Date,
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
        Field::AdjClose,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
            Field::AdjClose => "adj_close",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column of a normalized table.
///
/// Recognized headers map to a [`Field`]; anything else is carried through
/// under its original (trimmed) header text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Column {
    Known(Field),
    Unknown(String),
}

impl Column {
    pub fn name(&self) -> &str {
        match self {
            Column::Known(field) => field.name(),
            Column::Unknown(name) => name,
        }
    }
}

/// One row of price history.
///
/// Numeric fields are `None` either when the cell held a placeholder or when
/// the source table lacked the column entirely; [`PriceTable::columns`]
/// tells the two apart.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    /// Trading date. Rows without a parseable date never become records.
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub adj_close: Option<f64>,
    /// Cells of unrecognized columns as `(header, text)`, in table order.
    pub extra: Vec<(String, String)>,
}

/// Hashable identity of a record, used for exact-duplicate removal.
type RecordKey = (NaiveDate, [Option<u64>; 5], Option<i64>, Vec<(String, String)>);

impl PriceRecord {
    /// A record with only its date set.
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            adj_close: None,
            extra: Vec::new(),
        }
    }

    /// Read a floating-point field. `Date` and `Volume` are not floats.
    pub fn price(&self, field: Field) -> Option<f64> {
        match field {
            Field::Open => self.open,
            Field::High => self.high,
            Field::Low => self.low,
            Field::Close => self.close,
            Field::AdjClose => self.adj_close,
            Field::Date | Field::Volume => None,
        }
    }

    pub fn set_price(&mut self, field: Field, value: Option<f64>) {
        match field {
            Field::Open => self.open = value,
            Field::High => self.high = value,
            Field::Low => self.low = value,
            Field::Close => self.close = value,
            Field::AdjClose => self.adj_close = value,
            Field::Date | Field::Volume => {}
        }
    }

    /// Text of an unrecognized column, if this record carries it.
    pub fn extra_value(&self, header: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.as_str())
    }

    fn key(&self) -> RecordKey {
        let bits = |v: Option<f64>| v.map(f64::to_bits);
        (
            self.date,
            [
                bits(self.open),
                bits(self.high),
                bits(self.low),
                bits(self.close),
                bits(self.adj_close),
            ],
            self.volume,
            self.extra.clone(),
        )
    }
}

/// A normalized table: the columns present plus the typed rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceTable {
    /// Columns in canonical order, followed by unrecognized columns in the
    /// order they were first seen.
    pub columns: Vec<Column>,
    /// Rows, latest date first.
    pub records: Vec<PriceRecord>,
}

impl PriceTable {
    /// An empty table carrying the full canonical header.
    pub fn empty() -> Self {
        Self {
            columns: Field::CANONICAL.into_iter().map(Column::Known).collect(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Date of the first row, the key used to detect a repeated page.
    pub fn leading_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.columns.contains(&Column::Known(field))
    }

    /// Stable sort, latest date first.
    pub fn sort_descending(&mut self) {
        self.records.sort_by(|a, b| b.date.cmp(&a.date));
    }

    /// Concatenate tables, drop exact-duplicate rows and sort latest-first.
    ///
    /// Columns are unioned: canonical ones in canonical order, unrecognized
    /// ones in first-seen order. The first occurrence of a duplicate wins.
    pub fn merge<'a, I>(tables: I) -> PriceTable
    where
        I: IntoIterator<Item = &'a PriceTable>,
    {
        let mut known: Vec<Field> = Vec::new();
        let mut unknown: Vec<String> = Vec::new();
        let mut records: Vec<PriceRecord> = Vec::new();

        for table in tables {
            for column in &table.columns {
                match column {
                    Column::Known(field) if !known.contains(field) => known.push(*field),
                    Column::Unknown(name) if !unknown.contains(name) => unknown.push(name.clone()),
                    _ => {}
                }
            }
            records.extend(table.records.iter().cloned());
        }

        known.sort();
        let columns = known
            .into_iter()
            .map(Column::Known)
            .chain(unknown.into_iter().map(Column::Unknown))
            .collect();

        let records = records.into_iter().unique_by(PriceRecord::key).collect();
        let mut merged = PriceTable { columns, records };
        merged.sort_descending();
        merged
    }
}

/// The normalized table produced from one page.
///
/// The page index is kept for diagnostics and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBatch {
    pub page: usize,
    pub table: PriceTable,
}

impl PageBatch {
    pub fn new(page: usize, table: PriceTable) -> Self {
        Self { page, table }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(date: NaiveDate, close: f64, volume: i64) -> PriceRecord {
        PriceRecord {
            close: Some(close),
            volume: Some(volume),
            ..PriceRecord::on(date)
        }
    }

    fn table(records: Vec<PriceRecord>) -> PriceTable {
        PriceTable {
            columns: vec![
                Column::Known(Field::Date),
                Column::Known(Field::Close),
                Column::Known(Field::Volume),
            ],
            records,
        }
    }

    #[test]
    fn test_canonical_names() {
        let names: Vec<&str> = Field::CANONICAL.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            ["date", "open", "high", "low", "close", "volume", "adj_close"]
        );
    }

    #[test]
    fn test_merge_removes_exact_duplicates_and_sorts() {
        let a = table(vec![bar(day(2024, 1, 5), 10.0, 100), bar(day(2024, 1, 4), 9.0, 90)]);
        let b = table(vec![bar(day(2024, 1, 4), 9.0, 90), bar(day(2024, 1, 3), 8.0, 80)]);

        let merged = PriceTable::merge([&b, &a]);
        let dates: Vec<NaiveDate> = merged.records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2024, 1, 5), day(2024, 1, 4), day(2024, 1, 3)]);
    }

    #[test]
    fn test_merge_keeps_rows_that_differ_only_in_value() {
        let a = table(vec![bar(day(2024, 1, 4), 9.0, 90)]);
        let b = table(vec![bar(day(2024, 1, 4), 9.5, 90)]);

        let merged = PriceTable::merge([&a, &b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.records[0].close, Some(9.0));
    }

    #[test]
    fn test_merge_unions_columns_in_canonical_order() {
        let a = PriceTable {
            columns: vec![
                Column::Known(Field::Date),
                Column::Known(Field::Close),
                Column::Unknown("備考".to_string()),
            ],
            records: vec![],
        };
        let b = PriceTable {
            columns: vec![
                Column::Known(Field::Date),
                Column::Known(Field::Open),
                Column::Known(Field::AdjClose),
            ],
            records: vec![],
        };

        let merged = PriceTable::merge([&a, &b]);
        assert_eq!(
            merged.columns,
            vec![
                Column::Known(Field::Date),
                Column::Known(Field::Open),
                Column::Known(Field::Close),
                Column::Known(Field::AdjClose),
                Column::Unknown("備考".to_string()),
            ]
        );
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        let merged = PriceTable::merge(std::iter::empty::<&PriceTable>());
        assert!(merged.is_empty());
        assert!(merged.columns.is_empty());
    }

    #[test]
    fn test_leading_date() {
        let t = table(vec![bar(day(2024, 2, 1), 1.0, 1), bar(day(2024, 1, 31), 1.0, 1)]);
        assert_eq!(t.leading_date(), Some(day(2024, 2, 1)));
        assert_eq!(PriceTable::empty().leading_date(), None);
    }

    #[test]
    fn test_extra_value_lookup() {
        let mut r = PriceRecord::on(day(2024, 1, 1));
        r.extra.push(("備考".to_string(), "分割".to_string()));
        assert_eq!(r.extra_value("備考"), Some("分割"));
        assert_eq!(r.extra_value("other"), None);
    }

    fn arb_record() -> impl Strategy<Value = PriceRecord> {
        (0u32..40, proptest::option::of(0u32..5), proptest::option::of(0i64..3)).prop_map(
            |(offset, close, volume)| PriceRecord {
                close: close.map(f64::from),
                volume,
                ..PriceRecord::on(day(2020, 1, 1) + chrono::Duration::days(offset.into()))
            },
        )
    }

    proptest! {
        /// Merging a merged table with itself changes nothing.
        #[test]
        fn merge_is_idempotent(records in proptest::collection::vec(arb_record(), 0..60)) {
            let once = PriceTable::merge([&table(records)]);
            let twice = PriceTable::merge([&once, &once]);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn merge_output_is_sorted_descending(records in proptest::collection::vec(arb_record(), 0..60)) {
            let merged = PriceTable::merge([&table(records)]);
            prop_assert!(merged.records.windows(2).all(|w| w[0].date >= w[1].date));
        }
    }
}
