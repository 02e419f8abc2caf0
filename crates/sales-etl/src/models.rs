//! Row and batch types flowing through the pipeline

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

use crate::parser::normalize::{clean_number, clean_text, parse_date};

/// One spreadsheet cell, independent of the container format.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// A data row mapped onto the recognised columns.
///
/// Columns missing from the worksheet header stay [`CellValue::Empty`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSaleRow {
    pub order_id: CellValue,
    pub order_date: CellValue,
    pub ship_date: CellValue,
    pub ship_mode: CellValue,
    pub quantity: CellValue,
    pub discount: CellValue,
    pub sales: CellValue,
    pub profit: CellValue,
    pub category: CellValue,
    pub subcategory: CellValue,
    pub product_name: CellValue,
    pub state: CellValue,
    pub country: CellValue,
    pub region: CellValue,
}

/// Why a data row was dropped before batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("missing order id")]
    MissingOrderId,

    #[error("invalid order date")]
    InvalidOrderDate,

    #[error("invalid ship date")]
    InvalidShipDate,

    #[error("invalid sales amount")]
    InvalidSalesAmount,

    #[error("{column} does not fit its column")]
    OutOfRange { column: &'static str },
}

/// Precision of `sales.discount` (`NUMERIC(5, 2)`).
const DISCOUNT_PRECISION: i32 = 5;

/// Precision of `sales.sales_amount` and `sales.profit` (`NUMERIC(12, 2)`).
const MONEY_PRECISION: i32 = 12;

/// Whether `value` fits a `NUMERIC(precision, 2)` column once rounded to cents.
fn fits_numeric(value: f64, precision: i32) -> bool {
    let cents = (value * 100.0).round() / 100.0;
    cents.abs() < 10f64.powi(precision - 2)
}

fn bounded(value: f64, precision: i32, column: &'static str) -> Result<f64, RowRejection> {
    if fits_numeric(value, precision) {
        Ok(value)
    } else {
        Err(RowRejection::OutOfRange { column })
    }
}

impl RawSaleRow {
    /// Type the row. `source_row` is the 1-based worksheet row number.
    ///
    /// Optional measures (`quantity`, `discount`, `profit`) fall back to zero;
    /// dimension names are left optional and checked during resolution.
    pub fn validate(self, source_row: u32) -> Result<SaleRow, RowRejection> {
        let order_id = clean_text(&self.order_id).ok_or(RowRejection::MissingOrderId)?;
        let order_date = parse_date(&self.order_date).ok_or(RowRejection::InvalidOrderDate)?;
        let ship_date = parse_date(&self.ship_date).ok_or(RowRejection::InvalidShipDate)?;
        let sales_amount = clean_number(&self.sales).ok_or(RowRejection::InvalidSalesAmount)?;
        let sales_amount = bounded(sales_amount, MONEY_PRECISION, "sales")?;
        let discount = bounded(
            clean_number(&self.discount).unwrap_or(0.0),
            DISCOUNT_PRECISION,
            "discount",
        )?;
        let profit = bounded(
            clean_number(&self.profit).unwrap_or(0.0),
            MONEY_PRECISION,
            "profit",
        )?;

        let quantity = clean_number(&self.quantity)
            .and_then(|q| i32::try_from(q.round() as i64).ok())
            .unwrap_or(0);

        Ok(SaleRow {
            source_row,
            order_id,
            order_date,
            ship_date,
            ship_mode: clean_text(&self.ship_mode),
            quantity,
            discount,
            sales_amount,
            profit,
            category: clean_text(&self.category),
            subcategory: clean_text(&self.subcategory),
            product_name: clean_text(&self.product_name),
            state: clean_text(&self.state),
            country: clean_text(&self.country),
            region: clean_text(&self.region),
        })
    }
}

/// A typed row ready for dimension resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRow {
    pub source_row: u32,
    pub order_id: String,
    pub order_date: NaiveDate,
    pub ship_date: NaiveDate,
    pub ship_mode: Option<String>,
    pub quantity: i32,
    pub discount: f64,
    pub sales_amount: f64,
    pub profit: f64,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub product_name: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

/// Rows handed to one transaction.
#[derive(Debug, Clone)]
pub struct Batch {
    pub sheet: Arc<str>,
    /// 1-based position of the batch within its worksheet
    pub ordinal: u64,
    pub rows: Vec<SaleRow>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inclusive worksheet row range covered by this batch.
    pub fn source_rows(&self) -> Option<(u32, u32)> {
        let first = self.rows.first()?.source_row;
        let last = self.rows.last()?.source_row;
        Some((first, last))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn raw_row() -> RawSaleRow {
        RawSaleRow {
            order_id: "O1".into(),
            order_date: "2021-01-05".into(),
            ship_date: "2021-01-07".into(),
            ship_mode: "First Class".into(),
            quantity: 2.0.into(),
            discount: 0.1.into(),
            sales: "$100.00".into(),
            profit: "(10.00)".into(),
            category: " Furniture ".into(),
            subcategory: "Chairs".into(),
            product_name: "Chair A".into(),
            state: "CA".into(),
            country: "US".into(),
            region: "West".into(),
        }
    }

    #[test]
    fn test_validate_types_every_field() {
        let row = raw_row().validate(2).unwrap();
        assert_eq!(row.source_row, 2);
        assert_eq!(row.order_id, "O1");
        assert_eq!(row.order_date, NaiveDate::from_ymd_opt(2021, 1, 5).unwrap());
        assert_eq!(row.ship_date, NaiveDate::from_ymd_opt(2021, 1, 7).unwrap());
        assert_eq!(row.quantity, 2);
        assert_eq!(row.sales_amount, 100.0);
        assert_eq!(row.profit, -10.0);
        assert_eq!(row.category.as_deref(), Some("Furniture"));
        assert_eq!(row.region.as_deref(), Some("West"));
    }

    #[test]
    fn test_validate_rejects_missing_order_id() {
        let mut raw = raw_row();
        raw.order_id = CellValue::Text("   ".to_string());
        assert_eq!(raw.validate(3), Err(RowRejection::MissingOrderId));
    }

    #[test]
    fn test_validate_rejects_unparseable_dates() {
        let mut raw = raw_row();
        raw.order_date = "not a date".into();
        assert_eq!(raw.validate(3), Err(RowRejection::InvalidOrderDate));

        let mut raw = raw_row();
        raw.ship_date = CellValue::Empty;
        assert_eq!(raw.validate(3), Err(RowRejection::InvalidShipDate));
    }

    #[test]
    fn test_validate_rejects_missing_sales() {
        let mut raw = raw_row();
        raw.sales = "-".into();
        assert_eq!(raw.validate(4), Err(RowRejection::InvalidSalesAmount));
    }

    #[test]
    fn test_validate_rejects_values_too_wide_for_their_column() {
        let mut raw = raw_row();
        raw.discount = 1000.0.into();
        assert_eq!(
            raw.validate(7),
            Err(RowRejection::OutOfRange { column: "discount" })
        );

        let mut raw = raw_row();
        raw.sales = 1e11.into();
        assert_eq!(
            raw.validate(7),
            Err(RowRejection::OutOfRange { column: "sales" })
        );

        let mut raw = raw_row();
        raw.profit = "(99,999,999,999.99)".into();
        assert_eq!(
            raw.validate(7),
            Err(RowRejection::OutOfRange { column: "profit" })
        );
    }

    #[test]
    fn test_column_bounds_apply_after_rounding_to_cents() {
        assert!(fits_numeric(999.994, DISCOUNT_PRECISION));
        assert!(!fits_numeric(999.995, DISCOUNT_PRECISION));
        assert!(fits_numeric(-9_999_999_999.99, MONEY_PRECISION));
        assert!(!fits_numeric(10_000_000_000.0, MONEY_PRECISION));

        let mut raw = raw_row();
        raw.discount = "999.99".into();
        assert_eq!(raw.validate(8).unwrap().discount, 999.99);
    }

    #[test]
    fn test_optional_measures_default_to_zero() {
        let mut raw = raw_row();
        raw.quantity = CellValue::Empty;
        raw.discount = "n/a".into();
        raw.profit = CellValue::Bool(true);
        let row = raw.validate(5).unwrap();
        assert_eq!(row.quantity, 0);
        assert_eq!(row.discount, 0.0);
        assert_eq!(row.profit, 0.0);
    }

    #[test]
    fn test_missing_dimension_names_are_kept_as_none() {
        let mut raw = raw_row();
        raw.category = CellValue::Empty;
        let row = raw.validate(6).unwrap();
        assert_eq!(row.category, None);
    }

    #[test]
    fn test_batch_source_rows() {
        let first = raw_row().validate(10).unwrap();
        let last = raw_row().validate(14).unwrap();
        let batch = Batch {
            sheet: Arc::from("Orders"),
            ordinal: 1,
            rows: vec![first, last],
        };
        assert_eq!(batch.source_rows(), Some((10, 14)));
        assert_eq!(batch.len(), 2);
    }
}
