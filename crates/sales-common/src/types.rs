//! Rows of the fixed reporting schema
//!
//! `categories → subcategories → products → sales`. Dimension rows are only
//! ever created by ingestion and never mutated; a sale is unique on
//! `(order_id, product_id)`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Top-level product grouping (e.g. "Furniture").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: i32,
    pub name: String,
}

/// Unique on `(name, category_id)`: the same name may appear under
/// different categories as distinct rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Subcategory {
    pub id: i32,
    pub name: String,
    pub category_id: i32,
}

/// Unique on `(name, subcategory_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub subcategory_id: i32,
}

/// A committed order line.
///
/// Monetary columns are stored as `NUMERIC`; read them with an explicit
/// `::float8` cast when mapping into this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: i32,
    pub order_id: String,
    pub order_date: NaiveDate,
    pub ship_date: NaiveDate,
    pub ship_mode: Option<String>,
    pub quantity: i32,
    pub discount: f64,
    pub sales_amount: f64,
    pub profit: f64,
    pub product_id: i32,
    pub state: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl Sale {
    /// Natural key of the order line.
    pub fn conflict_key(&self) -> (&str, i32) {
        (&self.order_id, self.product_id)
    }

    /// Days between ordering and shipping; negative when the source data is inconsistent.
    pub fn days_to_ship(&self) -> i64 {
        (self.ship_date - self.order_date).num_days()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_sale() -> Sale {
        Sale {
            id: 1,
            order_id: "O1".to_string(),
            order_date: NaiveDate::from_ymd_opt(2021, 1, 5).unwrap(),
            ship_date: NaiveDate::from_ymd_opt(2021, 1, 7).unwrap(),
            ship_mode: Some("First Class".to_string()),
            quantity: 2,
            discount: 0.1,
            sales_amount: 100.0,
            profit: 10.0,
            product_id: 7,
            state: Some("CA".to_string()),
            country: Some("US".to_string()),
            region: Some("West".to_string()),
        }
    }

    #[test]
    fn test_sale_conflict_key() {
        assert_eq!(sample_sale().conflict_key(), ("O1", 7));
    }

    #[test]
    fn test_days_to_ship() {
        assert_eq!(sample_sale().days_to_ship(), 2);
    }

    #[test]
    fn test_sale_serializes_dates_as_iso() {
        let json = serde_json::to_value(sample_sale()).unwrap();
        assert_eq!(json["order_date"], "2021-01-05");
        assert_eq!(json["ship_mode"], "First Class");
    }
}
